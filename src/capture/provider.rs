use std::any::Any;

use crate::error::GraphicsResult;
use crate::frame::CapturedFrame;
use crate::monitor::MonitorId;
use crate::window::WindowId;

/// What a capture session records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureTarget {
    Window {
        window: WindowId,
        /// Crop to the client area instead of the full window frame.
        client_area: bool,
    },
    Monitor(MonitorId),
}

impl CaptureTarget {
    pub fn describe(&self) -> String {
        match self {
            Self::Window { window, .. } => format!("window {}", window.stable_id()),
            Self::Monitor(monitor) => format!("monitor {monitor}"),
        }
    }
}

/// Result of one poll of a capture item.
#[derive(Debug)]
pub enum CapturePoll {
    Frame(CapturedFrame),
    NoChange,
    /// The window closed or the monitor went away.
    SourceLost,
}

/// Per-thread state a provider keeps alive while the capture thread runs,
/// such as an apartment initialisation guard. Dropped on the capture
/// thread when it exits.
pub type ThreadAttachment = Box<dyn Any>;

/// Platform capture API. Items it opens are polled from the capture
/// thread only.
pub trait CaptureProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn supported(&self) -> bool;

    fn cursor_toggle_supported(&self) -> bool;

    fn open(&self, target: &CaptureTarget, cursor: bool) -> GraphicsResult<Box<dyn CaptureItem>>;

    /// Runs on the capture thread every time it starts.
    fn attach_thread(&self) -> GraphicsResult<ThreadAttachment> {
        Ok(Box::new(()))
    }
}

/// One open capture of a window or monitor.
pub trait CaptureItem: Send {
    fn poll(&mut self) -> GraphicsResult<CapturePoll>;

    /// Whether the source was presenting HDR content when opened.
    fn source_hdr(&self) -> bool;

    /// Returns false when the platform cannot toggle the cursor.
    fn set_cursor_visible(&mut self, visible: bool) -> bool;
}

/// Provider for builds without a capture API.
#[derive(Debug, Default)]
pub struct UnsupportedProvider;

impl CaptureProvider for UnsupportedProvider {
    fn name(&self) -> &'static str {
        "unsupported"
    }

    fn supported(&self) -> bool {
        false
    }

    fn cursor_toggle_supported(&self) -> bool {
        false
    }

    fn open(&self, target: &CaptureTarget, _cursor: bool) -> GraphicsResult<Box<dyn CaptureItem>> {
        Err(crate::error::GraphicsError::Unsupported(format!(
            "capture of {} is not available on this platform",
            target.describe()
        )))
    }
}
