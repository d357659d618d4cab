use std::time::{Duration, Instant};

use anyhow::Context;
use windows::Win32::Graphics::Direct3D11::{ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_R16G16B16A16_FLOAT,
};
use windows::Win32::Graphics::Dxgi::{
    DXGI_ERROR_ACCESS_LOST, DXGI_ERROR_WAIT_TIMEOUT, DXGI_OUTDUPL_FRAME_INFO, IDXGIOutput,
    IDXGIOutput1, IDXGIOutput5, IDXGIOutputDuplication, IDXGIResource,
};
use windows::core::Interface;

use crate::desktop::{DuplicationPoll, OutputDuplication};
use crate::error::{GraphicsError, GraphicsResult};

use super::device::{CaptureDevice, DeviceThreading};
use super::monitor::ResolvedMonitor;
use super::surface::StagingReader;

fn create_duplication(
    output: &IDXGIOutput,
    device: &ID3D11Device,
) -> GraphicsResult<IDXGIOutputDuplication> {
    // DuplicateOutput1 keeps HDR desktops in half float instead of
    // clipping them to 8 bits.
    if let Ok(output5) = output.cast::<IDXGIOutput5>() {
        let formats = [DXGI_FORMAT_R16G16B16A16_FLOAT, DXGI_FORMAT_B8G8R8A8_UNORM];
        if let Ok(duplication) = unsafe { output5.DuplicateOutput1(device, 0, &formats) } {
            return Ok(duplication);
        }
    }

    let output1: IDXGIOutput1 = output
        .cast()
        .context("failed to query IDXGIOutput1")
        .map_err(GraphicsError::Platform)?;
    unsafe { output1.DuplicateOutput(device) }
        .context("IDXGIOutput1::DuplicateOutput failed")
        .map_err(GraphicsError::Platform)
}

/// Calls `ReleaseFrame` once the acquired image has been read.
struct AcquiredFrame<'a> {
    duplication: &'a IDXGIOutputDuplication,
}

impl Drop for AcquiredFrame<'_> {
    fn drop(&mut self) {
        if let Err(err) = unsafe { self.duplication.ReleaseFrame() } {
            log::debug!("IDXGIOutputDuplication::ReleaseFrame failed: {err}");
        }
    }
}

pub(crate) struct DxgiDuplication {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    duplication: IDXGIOutputDuplication,
    reader: StagingReader,
    monitor_name: String,
    sdr_white_level_nits: f32,
    sequence: u64,
}

// SAFETY: the D3D11 device is created single-threaded and every COM object
// here is only touched by whichever thread currently owns the duplication.
unsafe impl Send for DxgiDuplication {}

impl DxgiDuplication {
    pub(crate) fn open(monitor: &ResolvedMonitor) -> GraphicsResult<Self> {
        let label = monitor.info.id.to_string();
        let CaptureDevice { device, context } =
            CaptureDevice::open(Some(&monitor.adapter), DeviceThreading::Exclusive, &label)?;
        let duplication = create_duplication(&monitor.output, &device)?;
        log::debug!(
            "duplicating {} ({}x{}, hdr: {})",
            monitor.info.id,
            monitor.info.cx,
            monitor.info.cy,
            monitor.info.hdr
        );
        Ok(Self {
            device,
            context,
            duplication,
            reader: StagingReader::default(),
            monitor_name: monitor.info.id.name().to_string(),
            sdr_white_level_nits: monitor.info.sdr_white_level_nits,
            sequence: 0,
        })
    }
}

impl OutputDuplication for DxgiDuplication {
    fn acquire_next_frame(&mut self, timeout: Duration) -> GraphicsResult<DuplicationPoll> {
        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        let mut info = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource: Option<IDXGIResource> = None;
        let acquired =
            unsafe { self.duplication.AcquireNextFrame(timeout_ms, &mut info, &mut resource) };
        if let Err(error) = acquired {
            if error.code() == DXGI_ERROR_WAIT_TIMEOUT {
                return Ok(DuplicationPoll::NoChange);
            }
            if error.code() == DXGI_ERROR_ACCESS_LOST {
                log::debug!("desktop duplication of {} lost access", self.monitor_name);
                self.reader.reset();
                return Ok(DuplicationPoll::AccessLost);
            }
            return Err(GraphicsError::Platform(
                anyhow::Error::from(error).context("AcquireNextFrame failed"),
            ));
        }
        let _release = AcquiredFrame {
            duplication: &self.duplication,
        };

        // Pointer-only updates carry no new desktop image.
        if info.LastPresentTime == 0 {
            return Ok(DuplicationPoll::NoChange);
        }
        let Some(resource) = resource else {
            return Ok(DuplicationPoll::NoChange);
        };
        let texture: ID3D11Texture2D = resource
            .cast()
            .context("failed to cast acquired IDXGIResource to ID3D11Texture2D")
            .map_err(GraphicsError::Platform)?;

        let mut frame = self
            .reader
            .read(&self.device, &self.context, &texture, None)?;
        self.sequence += 1;
        frame.metadata.sequence = self.sequence;
        frame.metadata.capture_time = Some(Instant::now());
        frame.metadata.present_time = Some(info.LastPresentTime);
        frame.metadata.sdr_white_level_nits = self.sdr_white_level_nits;
        Ok(DuplicationPoll::Frame(frame))
    }
}
