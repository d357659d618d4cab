//! Backend seam: a [`GraphicsModule`] per native graphics API, the
//! [`DeviceBackend`] it creates, and the optional platform interop groups.
//!
//! Device-level state (render target, blend, projection) is tracked by the
//! front end in [`crate::device`] and handed to the backend as a
//! [`PipelineState`] snapshot on every draw and clear.

use std::time::Duration;

use crate::error::{GraphicsError, GraphicsResult};
use crate::exports::PlatformGroup;
use crate::format::{ColorFormat, ColorSpace, PlanarFormat, TextureFlags, ZStencilFormat};
use crate::monitor::{MonitorId, MonitorInfo};
use crate::resource::{
    AdapterInfo, DmaBufCapabilities, DmaBufImport, DuplicatorId, GdiDc, IndexBufferId, IndexData,
    IoSurfaceRef, NativeObject, PixmapImport, SamplerId, SamplerInfo, ShaderId, StageSurfaceId,
    StageSurfaceInfo, SwapchainDesc, SwapchainId, TextureDesc, TextureId, TextureInfo,
    TimerId, TimerRangeData, TimerRangeId, VertexBufferId, VertexData, ZStencilId, ZStencilInfo,
};
use crate::shader::{ShaderParams, ShaderType};
use crate::state::{ClearRequest, DrawMode, PipelineState};
use crate::sync::SyncStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Direct3D11,
    OpenGl,
    Software,
}

impl DeviceType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Direct3D11 => "d3d11",
            Self::OpenGl => "opengl",
            Self::Software => "software",
        }
    }
}

/// A loadable graphics backend. One module serves any number of devices.
pub trait GraphicsModule: Send + Sync {
    fn name(&self) -> &'static str;

    fn device_type(&self) -> DeviceType;

    /// Macro name shader sources can test to specialize per backend.
    fn preprocessor_name(&self) -> &'static str;

    fn api_version(&self) -> u32 {
        crate::exports::GRAPHICS_API_VERSION
    }

    /// Platform groups this module can serve.
    fn platform_groups(&self) -> &[PlatformGroup];

    fn adapter_count(&self) -> GraphicsResult<u32>;

    /// Calls `callback` per adapter until it returns `false`.
    fn enum_adapters(
        &self,
        callback: &mut dyn FnMut(&AdapterInfo) -> bool,
    ) -> GraphicsResult<()>;

    fn create_device(
        &self,
        adapter: u32,
        group: Option<PlatformGroup>,
    ) -> GraphicsResult<Box<dyn DeviceBackend>>;
}

fn unsupported<T>(what: &str) -> GraphicsResult<T> {
    Err(GraphicsError::Unsupported(format!(
        "{what} is not supported by this backend"
    )))
}

/// One native device. All calls come from the thread that owns the
/// [`crate::device::Device`].
pub trait DeviceBackend: Send {
    fn device_obj(&self) -> NativeObject;

    /// Recreates the native device after a loss. Resource handles stay
    /// valid; their contents are undefined until rewritten.
    fn rebuild(&mut self) -> GraphicsResult<NativeObject>;

    // -- swapchains ------------------------------------------------------

    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> GraphicsResult<SwapchainId>;
    fn destroy_swapchain(&mut self, swapchain: SwapchainId) -> GraphicsResult<()>;
    fn resize_swapchain(
        &mut self,
        swapchain: SwapchainId,
        width: u32,
        height: u32,
        format: Option<ColorFormat>,
    ) -> GraphicsResult<()>;
    fn swapchain_desc(&self, swapchain: SwapchainId) -> GraphicsResult<SwapchainDesc>;
    /// Re-reads the output color space of the swapchain's window.
    fn swapchain_color_space(&mut self, swapchain: SwapchainId) -> GraphicsResult<ColorSpace>;
    fn is_present_ready(&self, swapchain: SwapchainId) -> GraphicsResult<bool>;

    // -- textures ----------------------------------------------------------

    /// `data` holds one slice per mip level with every cube face or volume
    /// slice of that level stored back to back. Missing levels start zeroed.
    fn create_texture(&mut self, desc: &TextureDesc, data: &[&[u8]]) -> GraphicsResult<TextureId>;
    fn destroy_texture(&mut self, texture: TextureId) -> GraphicsResult<()>;
    fn texture_info(&self, texture: TextureId) -> GraphicsResult<TextureInfo>;
    fn texture_obj(&self, texture: TextureId) -> GraphicsResult<NativeObject>;
    /// Maps level 0 for writing and returns its linesize.
    fn map_texture(&mut self, texture: TextureId) -> GraphicsResult<u32>;
    fn texture_mapped_data(&mut self, texture: TextureId) -> GraphicsResult<&mut [u8]>;
    fn unmap_texture(&mut self, texture: TextureId) -> GraphicsResult<()>;

    fn create_planar(
        &mut self,
        format: PlanarFormat,
        width: u32,
        height: u32,
        flags: TextureFlags,
    ) -> GraphicsResult<(TextureId, TextureId)> {
        let _ = (width, height, flags);
        unsupported(match format {
            PlanarFormat::Nv12 => "NV12 textures",
            PlanarFormat::P010 => "P010 textures",
        })
    }

    fn planar_available(&self, format: PlanarFormat) -> bool {
        let _ = format;
        false
    }

    // -- stage surfaces ----------------------------------------------------

    fn create_stagesurface(
        &mut self,
        width: u32,
        height: u32,
        format: ColorFormat,
    ) -> GraphicsResult<StageSurfaceId>;
    fn destroy_stagesurface(&mut self, surface: StageSurfaceId) -> GraphicsResult<()>;
    fn stagesurface_info(&self, surface: StageSurfaceId) -> GraphicsResult<StageSurfaceInfo>;
    /// Maps the surface for reading and returns its linesize.
    fn map_stagesurface(&mut self, surface: StageSurfaceId) -> GraphicsResult<u32>;
    fn stagesurface_mapped_data(&self, surface: StageSurfaceId) -> GraphicsResult<&[u8]>;
    fn unmap_stagesurface(&mut self, surface: StageSurfaceId) -> GraphicsResult<()>;

    // -- depth, samplers ---------------------------------------------------

    fn create_zstencil(
        &mut self,
        width: u32,
        height: u32,
        format: ZStencilFormat,
    ) -> GraphicsResult<ZStencilId>;
    fn destroy_zstencil(&mut self, zstencil: ZStencilId) -> GraphicsResult<()>;
    fn zstencil_info(&self, zstencil: ZStencilId) -> GraphicsResult<ZStencilInfo>;

    fn create_sampler(&mut self, info: &SamplerInfo) -> GraphicsResult<SamplerId>;
    fn destroy_sampler(&mut self, sampler: SamplerId) -> GraphicsResult<()>;

    // -- shaders -----------------------------------------------------------

    /// Compiles `source`; failures are [`GraphicsError::ShaderCompile`].
    fn create_shader(
        &mut self,
        shader_type: ShaderType,
        source: &str,
        file: &str,
    ) -> GraphicsResult<ShaderId>;
    fn destroy_shader(&mut self, shader: ShaderId) -> GraphicsResult<()>;
    fn shader_type(&self, shader: ShaderId) -> GraphicsResult<ShaderType>;
    fn shader_params(&self, shader: ShaderId) -> GraphicsResult<&ShaderParams>;
    fn shader_params_mut(&mut self, shader: ShaderId) -> GraphicsResult<&mut ShaderParams>;
    /// Drops `texture` from the parameters of every live shader.
    fn forget_texture_params(&mut self, texture: TextureId);

    // -- buffers -----------------------------------------------------------

    fn create_vertexbuffer(&mut self, data: VertexData, dynamic: bool)
    -> GraphicsResult<VertexBufferId>;
    fn destroy_vertexbuffer(&mut self, buffer: VertexBufferId) -> GraphicsResult<()>;
    fn vertexbuffer_data(&self, buffer: VertexBufferId) -> GraphicsResult<&VertexData>;
    fn vertexbuffer_data_mut(&mut self, buffer: VertexBufferId)
    -> GraphicsResult<&mut VertexData>;
    /// Uploads `data`, or the CPU copy when `None`.
    fn flush_vertexbuffer(
        &mut self,
        buffer: VertexBufferId,
        data: Option<&VertexData>,
    ) -> GraphicsResult<()>;

    fn create_indexbuffer(&mut self, data: IndexData, dynamic: bool)
    -> GraphicsResult<IndexBufferId>;
    fn destroy_indexbuffer(&mut self, buffer: IndexBufferId) -> GraphicsResult<()>;
    fn indexbuffer_data(&self, buffer: IndexBufferId) -> GraphicsResult<&IndexData>;
    fn indexbuffer_data_mut(&mut self, buffer: IndexBufferId) -> GraphicsResult<&mut IndexData>;
    fn flush_indexbuffer(
        &mut self,
        buffer: IndexBufferId,
        data: Option<&IndexData>,
    ) -> GraphicsResult<()>;

    // -- timers ------------------------------------------------------------

    fn create_timer(&mut self) -> GraphicsResult<TimerId>;
    fn destroy_timer(&mut self, timer: TimerId) -> GraphicsResult<()>;
    fn timer_begin(&mut self, timer: TimerId) -> GraphicsResult<()>;
    fn timer_end(&mut self, timer: TimerId) -> GraphicsResult<()>;
    /// Elapsed ticks, or `None` until the query resolves.
    fn timer_data(&mut self, timer: TimerId) -> GraphicsResult<Option<u64>>;

    fn create_timer_range(&mut self) -> GraphicsResult<TimerRangeId>;
    fn destroy_timer_range(&mut self, range: TimerRangeId) -> GraphicsResult<()>;
    fn timer_range_begin(&mut self, range: TimerRangeId) -> GraphicsResult<()>;
    fn timer_range_end(&mut self, range: TimerRangeId) -> GraphicsResult<()>;
    fn timer_range_data(&mut self, range: TimerRangeId) -> GraphicsResult<Option<TimerRangeData>>;

    // -- copies ------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn copy_texture_region(
        &mut self,
        dst: TextureId,
        dst_x: u32,
        dst_y: u32,
        src: TextureId,
        src_x: u32,
        src_y: u32,
        width: u32,
        height: u32,
    ) -> GraphicsResult<()>;
    fn stage_texture(&mut self, dst: StageSurfaceId, src: TextureId) -> GraphicsResult<()>;

    // -- frame -------------------------------------------------------------

    fn begin_frame(&mut self) -> GraphicsResult<()>;
    fn begin_scene(&mut self) -> GraphicsResult<()>;
    fn end_scene(&mut self) -> GraphicsResult<()>;
    fn draw(
        &mut self,
        state: &PipelineState,
        swapchain: Option<SwapchainId>,
        mode: DrawMode,
        start: u32,
        count: u32,
    ) -> GraphicsResult<()>;
    fn clear(
        &mut self,
        state: &PipelineState,
        swapchain: Option<SwapchainId>,
        request: &ClearRequest,
    ) -> GraphicsResult<()>;
    /// [`GraphicsError::DeviceLost`] starts the loss flow in the front end.
    fn present(&mut self, swapchain: Option<SwapchainId>) -> GraphicsResult<()>;
    fn flush(&mut self) -> GraphicsResult<()>;

    fn debug_marker_begin(&mut self, name: &str, color: [f32; 4]) {
        let _ = (name, color);
    }

    fn debug_marker_end(&mut self) {}

    fn is_monitor_hdr(&self, monitor: &MonitorId) -> bool {
        let _ = monitor;
        false
    }

    // -- platform groups ---------------------------------------------------

    fn win32(&mut self) -> Option<&mut dyn Win32Interop> {
        None
    }

    fn iosurface(&mut self) -> Option<&mut dyn IoSurfaceInterop> {
        None
    }

    fn dmabuf(&mut self) -> Option<&mut dyn DmaBufInterop> {
        None
    }
}

/// Windows interop: GDI and shared textures, keyed mutexes, NV12/P010
/// staging and desktop duplication.
pub trait Win32Interop {
    fn gdi_texture_available(&self) -> bool;
    fn shared_texture_available(&self) -> bool;
    fn can_adapter_fast_clear(&self) -> bool;

    fn texture_create_gdi(&mut self, width: u32, height: u32) -> GraphicsResult<TextureId>;
    fn texture_get_dc(&mut self, texture: TextureId) -> GraphicsResult<GdiDc>;
    fn texture_release_dc(&mut self, texture: TextureId) -> GraphicsResult<()>;

    fn texture_open_shared(&mut self, handle: u32) -> GraphicsResult<TextureId>;
    fn texture_open_nt_shared(&mut self, handle: u32) -> GraphicsResult<TextureId>;
    fn texture_get_shared_handle(&self, texture: TextureId) -> GraphicsResult<u32>;
    fn texture_wrap_obj(&mut self, object: NativeObject) -> GraphicsResult<TextureId>;

    fn texture_acquire_sync(
        &mut self,
        texture: TextureId,
        key: u64,
        timeout: Duration,
    ) -> GraphicsResult<SyncStatus>;
    fn texture_release_sync(&mut self, texture: TextureId, key: u64) -> GraphicsResult<()>;

    fn stagesurface_create_planar(
        &mut self,
        format: PlanarFormat,
        width: u32,
        height: u32,
    ) -> GraphicsResult<StageSurfaceId>;

    fn duplicator_monitor_info(&self, index: usize) -> GraphicsResult<Option<MonitorInfo>>;
    fn duplicator_monitor_index(&self, monitor: &MonitorId) -> GraphicsResult<Option<usize>>;
    fn duplicator_create(&mut self, monitor_index: usize) -> GraphicsResult<DuplicatorId>;
    fn duplicator_destroy(&mut self, duplicator: DuplicatorId) -> GraphicsResult<()>;
    /// `Ok(false)` keeps the previous texture.
    fn duplicator_update_frame(&mut self, duplicator: DuplicatorId) -> GraphicsResult<bool>;
    fn duplicator_texture(&self, duplicator: DuplicatorId) -> GraphicsResult<Option<TextureId>>;
    fn duplicator_color_space(&self, duplicator: DuplicatorId) -> GraphicsResult<ColorSpace>;
    fn duplicator_sdr_white_level(&self, duplicator: DuplicatorId) -> GraphicsResult<f32>;
}

/// macOS interop: textures backed by externally owned IOSurfaces.
pub trait IoSurfaceInterop {
    fn texture_create_from_iosurface(&mut self, surface: &IoSurfaceRef)
    -> GraphicsResult<TextureId>;
    fn texture_rebind_iosurface(
        &mut self,
        texture: TextureId,
        surface: &IoSurfaceRef,
    ) -> GraphicsResult<()>;
    fn texture_open_shared(&mut self, handle: u32) -> GraphicsResult<TextureId>;
}

/// Linux interop: dma-buf and X11 pixmap imports.
pub trait DmaBufInterop {
    fn texture_create_from_dmabuf(&mut self, import: &DmaBufImport) -> GraphicsResult<TextureId>;
    fn query_dmabuf_capabilities(&self) -> DmaBufCapabilities;
    fn query_dmabuf_modifiers_for_format(&self, drm_format: u32) -> GraphicsResult<Vec<u64>>;
    fn texture_create_from_pixmap(&mut self, import: &PixmapImport) -> GraphicsResult<TextureId>;
}
