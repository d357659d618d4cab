//! CPU reference backend. Every resource lives in host memory; shared
//! textures and keyed mutexes are in-process objects, and desktop
//! duplication reads from a [`DesktopSource`].

mod device;
mod interop;
mod parallel;
mod raster;
mod shared;
mod texture;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::backend::{DeviceBackend, DeviceType, GraphicsModule};
use crate::desktop::DesktopSource;
use crate::error::{GraphicsError, GraphicsResult};
use crate::exports::PlatformGroup;
use crate::resource::AdapterInfo;

pub use device::SoftDevice;

const ADAPTER_NAME: &str = "Software Rasterizer";
const ALL_GROUPS: [PlatformGroup; 3] = [
    PlatformGroup::Win32,
    PlatformGroup::IoSurface,
    PlatformGroup::DmaBuf,
];

/// Counts one live soft allocation for as long as it exists.
#[derive(Debug)]
pub(crate) struct AllocationToken(Arc<AtomicUsize>);

impl AllocationToken {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(counter))
    }
}

impl Drop for AllocationToken {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

static NEXT_NATIVE_OBJECT: AtomicUsize = AtomicUsize::new(0x1000);

/// Process-unique stand-in for a native object pointer.
pub(crate) fn next_native_object() -> crate::resource::NativeObject {
    crate::resource::NativeObject(NEXT_NATIVE_OBJECT.fetch_add(1, Ordering::Relaxed))
}

/// The `"soft"` graphics module.
pub struct SoftModule {
    live: Arc<AtomicUsize>,
    device_removed: Arc<AtomicBool>,
    desktop: Arc<dyn DesktopSource>,
}

impl SoftModule {
    /// Module whose duplicators read the platform's native desktop.
    pub fn new() -> Self {
        Self::with_desktop(crate::platform::native_desktop())
    }

    pub fn with_desktop(desktop: Arc<dyn DesktopSource>) -> Self {
        Self {
            live: Arc::new(AtomicUsize::new(0)),
            device_removed: Arc::new(AtomicBool::new(false)),
            desktop,
        }
    }

    /// Resources currently allocated by devices of this module.
    pub fn live_allocations(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Makes the next `present` or `flush` of any device of this module
    /// report a removed device.
    pub fn simulate_device_removed(&self) {
        log::debug!("soft backend: device removal requested");
        self.device_removed.store(true, Ordering::SeqCst);
    }
}

impl Default for SoftModule {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsModule for SoftModule {
    fn name(&self) -> &'static str {
        crate::exports::SOFT_BACKEND
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Software
    }

    fn preprocessor_name(&self) -> &'static str {
        "_SOFT"
    }

    fn platform_groups(&self) -> &[PlatformGroup] {
        &ALL_GROUPS
    }

    fn adapter_count(&self) -> GraphicsResult<u32> {
        Ok(1)
    }

    fn enum_adapters(
        &self,
        callback: &mut dyn FnMut(&AdapterInfo) -> bool,
    ) -> GraphicsResult<()> {
        callback(&AdapterInfo {
            index: 0,
            name: ADAPTER_NAME.to_string(),
            driver_version: Some(env!("CARGO_PKG_VERSION").to_string()),
        });
        Ok(())
    }

    fn create_device(
        &self,
        adapter: u32,
        group: Option<PlatformGroup>,
    ) -> GraphicsResult<Box<dyn DeviceBackend>> {
        if adapter != 0 {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "soft backend has one adapter, requested {adapter}"
            )));
        }
        Ok(Box::new(SoftDevice::new(
            Arc::clone(&self.live),
            Arc::clone(&self.device_removed),
            Arc::clone(&self.desktop),
            group,
        )))
    }
}
