//! Direct3D 11 devices and COM apartments behind the Windows capture paths.

use anyhow::Context;
use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::Graphics::Direct3D::{
    D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_UNKNOWN, D3D_FEATURE_LEVEL, D3D_FEATURE_LEVEL_10_0,
    D3D_FEATURE_LEVEL_10_1, D3D_FEATURE_LEVEL_11_0,
};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_CREATE_DEVICE_DEBUG, D3D11_CREATE_DEVICE_FLAG,
    D3D11_CREATE_DEVICE_SINGLETHREADED, D3D11_SDK_VERSION, D3D11CreateDevice, ID3D11Device,
    ID3D11DeviceContext,
};
use windows::Win32::Graphics::Dxgi::IDXGIAdapter;
use windows::Win32::System::Com::{COINIT_MULTITHREADED, CoInitializeEx, CoUninitialize};

use crate::env_config::define_env_flag;
use crate::error::{GraphicsError, GraphicsResult};

define_env_flag!(enabled_when(d3d11_debug_enabled, "SNOW_GS_D3D11_DEBUG"));

const CAPTURE_FEATURE_LEVELS: [D3D_FEATURE_LEVEL; 3] = [
    D3D_FEATURE_LEVEL_11_0,
    D3D_FEATURE_LEVEL_10_1,
    D3D_FEATURE_LEVEL_10_0,
];

/// Which threads reach a capture device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DeviceThreading {
    /// Only the thread that owns the capture; driver locking is skipped.
    Exclusive,
    /// Also WinRT worker threads, through a free-threaded frame pool.
    Shared,
}

impl DeviceThreading {
    fn create_flags(self) -> D3D11_CREATE_DEVICE_FLAG {
        let mut flags = D3D11_CREATE_DEVICE_BGRA_SUPPORT;
        if self == Self::Exclusive {
            flags |= D3D11_CREATE_DEVICE_SINGLETHREADED;
        }
        if d3d11_debug_enabled() {
            flags |= D3D11_CREATE_DEVICE_DEBUG;
        }
        flags
    }
}

/// Device plus immediate context of one capture source.
pub(crate) struct CaptureDevice {
    pub(crate) device: ID3D11Device,
    pub(crate) context: ID3D11DeviceContext,
}

impl CaptureDevice {
    /// Opens a device on `adapter`, or on the default hardware adapter.
    /// `label` names the capture source in errors.
    pub(crate) fn open(
        adapter: Option<&IDXGIAdapter>,
        threading: DeviceThreading,
        label: &str,
    ) -> GraphicsResult<Self> {
        let driver = match adapter {
            Some(_) => D3D_DRIVER_TYPE_UNKNOWN,
            None => D3D_DRIVER_TYPE_HARDWARE,
        };
        let flags = threading.create_flags();
        log::debug!("opening {threading:?} D3D11 device for {label} (flags {:#x})", flags.0);

        let mut device: Option<ID3D11Device> = None;
        let mut context: Option<ID3D11DeviceContext> = None;
        unsafe {
            D3D11CreateDevice(
                adapter,
                driver,
                None,
                flags,
                Some(&CAPTURE_FEATURE_LEVELS),
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )
        }
        .with_context(|| format!("no D3D11 device for {label}"))
        .map_err(GraphicsError::Platform)?;

        match (device, context) {
            (Some(device), Some(context)) => Ok(Self { device, context }),
            _ => Err(GraphicsError::Platform(anyhow::anyhow!(
                "D3D11CreateDevice returned no device for {label}"
            ))),
        }
    }
}

/// Multithreaded COM apartment on the current thread, left on drop.
pub(crate) struct MtaApartment {
    /// False when the thread already sat in another apartment; that
    /// initialisation belongs to someone else.
    entered: bool,
}

impl MtaApartment {
    pub(crate) fn enter() -> GraphicsResult<Self> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr == RPC_E_CHANGED_MODE {
            log::trace!("thread already has a COM apartment; reusing it");
            return Ok(Self { entered: false });
        }
        hr.ok()
            .context("could not join the multithreaded COM apartment")
            .map_err(GraphicsError::Platform)?;
        Ok(Self { entered: true })
    }
}

impl Drop for MtaApartment {
    fn drop(&mut self) {
        if self.entered {
            unsafe { CoUninitialize() };
        }
    }
}
