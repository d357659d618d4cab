//! Window and monitor capture through Windows.Graphics.Capture.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use anyhow::Context;
use windows::Foundation::Metadata::ApiInformation;
use windows::Foundation::{EventRegistrationToken, TypedEventHandler};
use windows::Graphics::Capture::{
    Direct3D11CaptureFrame, Direct3D11CaptureFramePool, GraphicsCaptureItem,
    GraphicsCaptureSession,
};
use windows::Graphics::DirectX::Direct3D11::IDirect3DDevice;
use windows::Graphics::DirectX::DirectXPixelFormat;
use windows::Graphics::SizeInt32;
use windows::Win32::Foundation::{HWND, POINT, RECT};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BOX, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D,
};
use windows::Win32::Graphics::Dwm::{DWMWA_EXTENDED_FRAME_BOUNDS, DwmGetWindowAttribute};
use windows::Win32::Graphics::Dxgi::IDXGIDevice;
use windows::Win32::Graphics::Gdi::{ClientToScreen, HMONITOR, MONITOR_DEFAULTTONULL, MonitorFromWindow};
use windows::Win32::System::WinRT::Direct3D11::{
    CreateDirect3D11DeviceFromDXGIDevice, IDirect3DDxgiInterfaceAccess,
};
use windows::Win32::System::WinRT::Graphics::Capture::IGraphicsCaptureItemInterop;
use windows::Win32::UI::WindowsAndMessaging::{GetClientRect, IsWindow};
use windows::core::{HSTRING, IInspectable, Interface};

use crate::capture::provider::{
    CaptureItem, CapturePoll, CaptureProvider, CaptureTarget, ThreadAttachment,
};
use crate::error::{GraphicsError, GraphicsResult};
use crate::frame::CapturedFrame;

use super::device::{CaptureDevice, DeviceThreading, MtaApartment};
use super::monitor::{enumerate_resolved, resolve};
use super::surface::StagingReader;

const FRAME_POOL_BUFFERS: i32 = 2;
const SESSION_CLASS: &str = "Windows.Graphics.Capture.GraphicsCaptureSession";

fn platform(error: windows::core::Error, context: &'static str) -> GraphicsError {
    GraphicsError::Platform(anyhow::Error::from(error).context(context))
}

fn hwnd(window: &crate::window::WindowId) -> HWND {
    HWND(window.raw_handle() as *mut std::ffi::c_void)
}

#[derive(Default)]
pub(crate) struct WgcProvider {
    supported: OnceLock<bool>,
    cursor_toggle: OnceLock<bool>,
}

impl WgcProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

impl CaptureProvider for WgcProvider {
    fn name(&self) -> &'static str {
        "windows-graphics-capture"
    }

    fn supported(&self) -> bool {
        *self.supported.get_or_init(|| {
            GraphicsCaptureSession::IsSupported()
                .inspect_err(|err| log::debug!("GraphicsCaptureSession::IsSupported failed: {err}"))
                .unwrap_or(false)
        })
    }

    fn cursor_toggle_supported(&self) -> bool {
        *self.cursor_toggle.get_or_init(|| {
            ApiInformation::IsPropertyPresent(
                &HSTRING::from(SESSION_CLASS),
                &HSTRING::from("IsCursorCaptureEnabled"),
            )
            .unwrap_or(false)
        })
    }

    fn open(&self, target: &CaptureTarget, cursor: bool) -> GraphicsResult<Box<dyn CaptureItem>> {
        let _apartment = MtaApartment::enter()?;
        let (item, hdr, client_window) = match target {
            CaptureTarget::Monitor(monitor) => {
                let resolved = resolve(monitor)?;
                (
                    create_monitor_item(resolved.handle)?,
                    resolved.info.hdr,
                    None,
                )
            }
            CaptureTarget::Window {
                window,
                client_area,
            } => {
                let hwnd = hwnd(window);
                if !unsafe { IsWindow(hwnd) }.as_bool() {
                    return Err(GraphicsError::InvalidDescriptor(format!(
                        "{} is not a window",
                        target.describe()
                    )));
                }
                (
                    create_window_item(hwnd)?,
                    window_on_hdr_monitor(hwnd),
                    client_area.then_some(hwnd),
                )
            }
        };
        let capture = WgcItem::new(item, hdr, cursor && self.cursor_toggle_supported(), client_window)?;
        log::debug!("WGC capture of {} started (hdr: {hdr})", target.describe());
        Ok(Box::new(capture))
    }

    fn attach_thread(&self) -> GraphicsResult<ThreadAttachment> {
        Ok(Box::new(MtaApartment::enter()?))
    }
}

fn create_monitor_item(monitor: HMONITOR) -> GraphicsResult<GraphicsCaptureItem> {
    let interop = windows::core::factory::<GraphicsCaptureItem, IGraphicsCaptureItemInterop>()
        .map_err(|e| platform(e, "failed to get IGraphicsCaptureItemInterop factory"))?;
    unsafe { interop.CreateForMonitor(monitor) }
        .map_err(|e| platform(e, "IGraphicsCaptureItemInterop::CreateForMonitor failed"))
}

fn create_window_item(window: HWND) -> GraphicsResult<GraphicsCaptureItem> {
    let interop = windows::core::factory::<GraphicsCaptureItem, IGraphicsCaptureItemInterop>()
        .map_err(|e| platform(e, "failed to get IGraphicsCaptureItemInterop factory"))?;
    unsafe { interop.CreateForWindow(window) }
        .map_err(|e| platform(e, "IGraphicsCaptureItemInterop::CreateForWindow failed"))
}

fn window_on_hdr_monitor(window: HWND) -> bool {
    let monitor = unsafe { MonitorFromWindow(window, MONITOR_DEFAULTTONULL) };
    if monitor.is_invalid() {
        return false;
    }
    enumerate_resolved()
        .map(|monitors| monitors.iter().any(|m| m.handle == monitor && m.info.hdr))
        .unwrap_or(false)
}

/// Client area of `window` relative to the captured frame, which covers
/// the window's extended frame bounds.
fn client_box(window: HWND, width: u32, height: u32) -> Option<D3D11_BOX> {
    let mut client = RECT::default();
    unsafe { GetClientRect(window, &mut client) }.ok()?;
    let mut origin = POINT::default();
    if !unsafe { ClientToScreen(window, &mut origin) }.as_bool() {
        return None;
    }
    let mut bounds = RECT::default();
    unsafe {
        DwmGetWindowAttribute(
            window,
            DWMWA_EXTENDED_FRAME_BOUNDS,
            (&mut bounds as *mut RECT).cast(),
            std::mem::size_of::<RECT>() as u32,
        )
    }
    .ok()?;

    let left = (origin.x - bounds.left).clamp(0, width as i32) as u32;
    let top = (origin.y - bounds.top).clamp(0, height as i32) as u32;
    let right = (left as i32 + client.right - client.left).clamp(left as i32, width as i32) as u32;
    let bottom = (top as i32 + client.bottom - client.top).clamp(top as i32, height as i32) as u32;
    (right > left && bottom > top).then_some(D3D11_BOX {
        left,
        top,
        front: 0,
        right,
        bottom,
        back: 1,
    })
}

fn create_winrt_device(device: &ID3D11Device) -> GraphicsResult<IDirect3DDevice> {
    let dxgi_device: IDXGIDevice = device
        .cast()
        .context("failed to cast ID3D11Device to IDXGIDevice")
        .map_err(GraphicsError::Platform)?;
    let inspectable = unsafe { CreateDirect3D11DeviceFromDXGIDevice(&dxgi_device) }
        .map_err(|e| platform(e, "CreateDirect3D11DeviceFromDXGIDevice failed"))?;
    inspectable
        .cast()
        .context("failed to cast IInspectable to IDirect3DDevice")
        .map_err(GraphicsError::Platform)
}

struct WgcItem {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    winrt_device: IDirect3DDevice,
    item: GraphicsCaptureItem,
    frame_pool: Direct3D11CaptureFramePool,
    session: GraphicsCaptureSession,
    pixel_format: DirectXPixelFormat,
    pool_size: SizeInt32,
    closed: Arc<AtomicBool>,
    closed_token: EventRegistrationToken,
    client_window: Option<HWND>,
    reader: StagingReader,
    sequence: u64,
}

// SAFETY: the capture item, frame pool and session are agile WinRT
// objects. The D3D11 device is multithreaded and the item is polled by
// one thread at a time under the session's item lock.
unsafe impl Send for WgcItem {}

impl WgcItem {
    fn new(
        item: GraphicsCaptureItem,
        hdr: bool,
        cursor: bool,
        client_window: Option<HWND>,
    ) -> GraphicsResult<Self> {
        let CaptureDevice { device, context } =
            CaptureDevice::open(None, DeviceThreading::Shared, "a WGC capture item")?;
        let winrt_device = create_winrt_device(&device)?;
        let pool_size = item
            .Size()
            .map_err(|e| platform(e, "GraphicsCaptureItem::Size failed"))?;
        let pixel_format = if hdr {
            DirectXPixelFormat::R16G16B16A16Float
        } else {
            DirectXPixelFormat::B8G8R8A8UIntNormalized
        };

        let frame_pool = Direct3D11CaptureFramePool::CreateFreeThreaded(
            &winrt_device,
            pixel_format,
            FRAME_POOL_BUFFERS,
            pool_size,
        )
        .map_err(|e| platform(e, "Direct3D11CaptureFramePool::CreateFreeThreaded failed"))?;
        let session = frame_pool
            .CreateCaptureSession(&item)
            .map_err(|e| platform(e, "Direct3D11CaptureFramePool::CreateCaptureSession failed"))?;
        // Both are best effort; older builds lack the properties.
        let _ = session.SetIsCursorCaptureEnabled(cursor);
        let _ = session.SetIsBorderRequired(false);

        let closed = Arc::new(AtomicBool::new(false));
        let closed_flag = Arc::clone(&closed);
        let closed_token = item
            .Closed(&TypedEventHandler::<GraphicsCaptureItem, IInspectable>::new(
                move |_, _| {
                    closed_flag.store(true, Ordering::Release);
                    Ok(())
                },
            ))
            .map_err(|e| platform(e, "GraphicsCaptureItem::Closed registration failed"))?;

        session
            .StartCapture()
            .map_err(|e| platform(e, "GraphicsCaptureSession::StartCapture failed"))?;

        Ok(Self {
            device,
            context,
            winrt_device,
            item,
            frame_pool,
            session,
            pixel_format,
            pool_size,
            closed,
            closed_token,
            client_window,
            reader: StagingReader::default(),
            sequence: 0,
        })
    }

    /// Newest queued frame; older ones are closed unread.
    fn latest_frame(&self) -> Option<Direct3D11CaptureFrame> {
        let mut newest: Option<Direct3D11CaptureFrame> = None;
        while let Ok(frame) = self.frame_pool.TryGetNextFrame() {
            if let Some(previous) = newest.replace(frame) {
                let _ = previous.Close();
            }
        }
        newest
    }

    fn recreate_pool_if_needed(&mut self, frame: &Direct3D11CaptureFrame) -> GraphicsResult<bool> {
        let size = frame
            .ContentSize()
            .map_err(|e| platform(e, "Direct3D11CaptureFrame::ContentSize failed"))?;
        if size.Width == self.pool_size.Width && size.Height == self.pool_size.Height {
            return Ok(false);
        }
        self.frame_pool
            .Recreate(&self.winrt_device, self.pixel_format, FRAME_POOL_BUFFERS, size)
            .map_err(|e| platform(e, "Direct3D11CaptureFramePool::Recreate failed"))?;
        log::debug!(
            "WGC frame pool resized to {}x{}",
            size.Width,
            size.Height
        );
        self.pool_size = size;
        self.reader.reset();
        Ok(true)
    }

    fn read(&mut self, frame: &Direct3D11CaptureFrame) -> GraphicsResult<CapturedFrame> {
        let surface = frame
            .Surface()
            .map_err(|e| platform(e, "Direct3D11CaptureFrame::Surface failed"))?;
        let access: IDirect3DDxgiInterfaceAccess = surface
            .cast()
            .context("failed to cast frame surface to IDirect3DDxgiInterfaceAccess")
            .map_err(GraphicsError::Platform)?;
        let texture: ID3D11Texture2D = unsafe { access.GetInterface() }
            .map_err(|e| platform(e, "IDirect3DDxgiInterfaceAccess::GetInterface failed"))?;

        let (width, height) = (
            self.pool_size.Width.max(0) as u32,
            self.pool_size.Height.max(0) as u32,
        );
        let region = self
            .client_window
            .and_then(|window| client_box(window, width, height))
            .or(Some(D3D11_BOX {
                left: 0,
                top: 0,
                front: 0,
                right: width,
                bottom: height,
                back: 1,
            }));
        let mut captured = self
            .reader
            .read(&self.device, &self.context, &texture, region)?;
        self.sequence += 1;
        captured.metadata.sequence = self.sequence;
        captured.metadata.capture_time = Some(Instant::now());
        captured.metadata.present_time = frame.SystemRelativeTime().ok().map(|t| t.Duration);
        Ok(captured)
    }
}

impl CaptureItem for WgcItem {
    fn poll(&mut self) -> GraphicsResult<CapturePoll> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(CapturePoll::SourceLost);
        }
        let Some(frame) = self.latest_frame() else {
            return Ok(CapturePoll::NoChange);
        };
        let result = match self.recreate_pool_if_needed(&frame) {
            // Frames already queued at the old size are stale.
            Ok(true) => Ok(CapturePoll::NoChange),
            Ok(false) => self.read(&frame).map(CapturePoll::Frame),
            Err(err) => Err(err),
        };
        let _ = frame.Close();
        result
    }

    fn source_hdr(&self) -> bool {
        self.pixel_format == DirectXPixelFormat::R16G16B16A16Float
    }

    fn set_cursor_visible(&mut self, visible: bool) -> bool {
        self.session.SetIsCursorCaptureEnabled(visible).is_ok()
    }
}

impl Drop for WgcItem {
    fn drop(&mut self) {
        let _ = self.item.RemoveClosed(self.closed_token);
        if let Err(err) = self.session.Close() {
            log::debug!("GraphicsCaptureSession::Close failed: {err}");
        }
        let _ = self.frame_pool.Close();
    }
}
