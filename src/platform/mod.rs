//! Platform desktop sources and capture providers.

use std::sync::Arc;

use crate::capture::provider::CaptureProvider;
use crate::desktop::DesktopSource;

pub mod headless;

#[cfg(target_os = "windows")]
pub(crate) mod windows;

/// Desktop used for duplication when no source is given explicitly.
#[cfg(target_os = "windows")]
pub fn native_desktop() -> Arc<dyn DesktopSource> {
    Arc::new(windows::WindowsDesktop::new())
}

#[cfg(not(target_os = "windows"))]
pub fn native_desktop() -> Arc<dyn DesktopSource> {
    Arc::new(headless::HeadlessDesktop::new())
}

/// Window and monitor capture API of the running platform.
#[cfg(target_os = "windows")]
pub fn native_capture_provider() -> Arc<dyn CaptureProvider> {
    Arc::new(windows::wgc::WgcProvider::new())
}

#[cfg(not(target_os = "windows"))]
pub fn native_capture_provider() -> Arc<dyn CaptureProvider> {
    Arc::new(crate::capture::provider::UnsupportedProvider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn non_windows_defaults_are_headless_and_unsupported() -> crate::error::GraphicsResult<()> {
        assert!(native_desktop().monitors()?.is_empty());
        let provider = native_capture_provider();
        assert_eq!(provider.name(), "unsupported");
        assert!(!provider.supported());
        Ok(())
    }
}
