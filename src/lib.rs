//! Backend-agnostic GPU device layer with window, monitor and
//! desktop-duplication capture.
//!
//! A backend is resolved by name into a [`GraphicsExports`] table, a
//! [`Device`] is created from it, and every resource operation runs on the
//! [`GraphicsContext`] guard returned by [`Device::enter_context`]. Capture
//! sessions produce frames on a background thread and upload them into
//! textures from inside a context scope.

pub mod backend;
pub mod capture;
pub mod config;
pub mod desktop;
pub mod device;
pub mod duplicator;
pub(crate) mod env_config;
pub mod error;
pub mod exports;
pub mod format;
pub mod frame;
pub mod logging;
pub mod math;
pub mod module;
pub mod monitor;
pub mod platform;
pub mod resource;
pub mod shader;
pub mod soft;
pub mod state;
pub mod sync;
pub mod window;

pub use capture::{CaptureService, CaptureSession, CaptureTarget, SessionState};
pub use config::GraphicsConfig;
pub use desktop::{DesktopSource, DuplicationPoll, OutputDuplication};
pub use device::{Device, GraphicsContext, SYNC_INFINITE};
pub use error::{GraphicsError, GraphicsErrorClass, GraphicsResult};
pub use exports::{
    Capability, GRAPHICS_API_VERSION, GraphicsExports, PlatformGroup, SOFT_BACKEND,
    load_graphics_imports,
};
pub use format::{ColorFormat, ColorSpace, TextureFlags, TextureType, ZStencilFormat};
pub use frame::{CapturedFrame, FrameMetadata};
pub use logging::{LoggingConfig, init_logging};
pub use module::{ModuleDescriptor, ModuleHost};
pub use monitor::{MonitorId, MonitorInfo};
pub use resource::{
    DuplicatorId, IndexBufferId, SamplerId, ShaderId, ShaderParamId, StageSurfaceId,
    SwapchainId, TextureDesc, TextureId, TimerId, TimerRangeId, VertexBufferId, ZStencilId,
};
pub use sync::{KeyedMutex, LossIdentity, SyncStatus};
pub use window::WindowId;
