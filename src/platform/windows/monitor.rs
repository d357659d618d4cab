use std::mem;

use anyhow::Context;
use rustc_hash::FxHashMap;
use windows::Win32::Devices::Display::{
    DISPLAYCONFIG_DEVICE_INFO_GET_ADVANCED_COLOR_INFO,
    DISPLAYCONFIG_DEVICE_INFO_GET_SDR_WHITE_LEVEL, DISPLAYCONFIG_DEVICE_INFO_GET_SOURCE_NAME,
    DISPLAYCONFIG_DEVICE_INFO_HEADER, DISPLAYCONFIG_GET_ADVANCED_COLOR_INFO,
    DISPLAYCONFIG_MODE_INFO, DISPLAYCONFIG_PATH_INFO, DISPLAYCONFIG_SDR_WHITE_LEVEL,
    DISPLAYCONFIG_SOURCE_DEVICE_NAME, DisplayConfigGetDeviceInfo, GetDisplayConfigBufferSizes,
    QDC_ONLY_ACTIVE_PATHS, QueryDisplayConfig,
};
use windows::Win32::Foundation::{LUID, POINT};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_COLOR_SPACE_RGB_FULL_G2084_NONE_P2020, DXGI_COLOR_SPACE_RGB_STUDIO_G2084_NONE_P2020,
    DXGI_MODE_ROTATION, DXGI_MODE_ROTATION_ROTATE90, DXGI_MODE_ROTATION_ROTATE180,
    DXGI_MODE_ROTATION_ROTATE270,
};
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory1, DXGI_ERROR_NOT_FOUND, IDXGIAdapter, IDXGIFactory1, IDXGIOutput,
    IDXGIOutput6,
};
use windows::Win32::Graphics::Gdi::{HMONITOR, MONITOR_DEFAULTTOPRIMARY, MonitorFromPoint};
use windows::core::Interface;

use crate::error::{GraphicsError, GraphicsResult};
use crate::monitor::{DEFAULT_HDR_MAX_NITS, DEFAULT_SDR_WHITE_LEVEL_NITS, MonitorId, MonitorInfo, MonitorKey};

/// An attached output with the DXGI objects needed to duplicate it.
pub(crate) struct ResolvedMonitor {
    pub info: MonitorInfo,
    pub handle: HMONITOR,
    pub adapter: IDXGIAdapter,
    pub output: IDXGIOutput,
}

#[derive(Clone, Copy, Debug, Default)]
struct DisplayConfigHdrInfo {
    advanced_color_enabled: bool,
    sdr_white_level_nits: Option<f32>,
}

fn primary_hmonitor() -> HMONITOR {
    unsafe { MonitorFromPoint(POINT { x: 0, y: 0 }, MONITOR_DEFAULTTOPRIMARY) }
}

fn luid_to_u64(luid: LUID) -> u64 {
    (u64::from(luid.HighPart as u32) << 32) | u64::from(luid.LowPart)
}

fn utf16z_to_string(input: &[u16]) -> String {
    let len = input.iter().position(|&ch| ch == 0).unwrap_or(input.len());
    String::from_utf16_lossy(&input[..len])
}

fn rotation_degrees(rotation: DXGI_MODE_ROTATION) -> i32 {
    match rotation {
        DXGI_MODE_ROTATION_ROTATE90 => 90,
        DXGI_MODE_ROTATION_ROTATE180 => 180,
        DXGI_MODE_ROTATION_ROTATE270 => 270,
        _ => 0,
    }
}

/// Advanced-color state and SDR white level per GDI device name.
fn query_displayconfig_hdr_map() -> FxHashMap<String, DisplayConfigHdrInfo> {
    let mut path_count = 0u32;
    let mut mode_count = 0u32;
    if unsafe {
        GetDisplayConfigBufferSizes(QDC_ONLY_ACTIVE_PATHS, &mut path_count, &mut mode_count)
    }
    .ok()
    .is_err()
        || path_count == 0
    {
        return FxHashMap::default();
    }

    let mut paths = vec![DISPLAYCONFIG_PATH_INFO::default(); path_count as usize];
    let mut modes = vec![DISPLAYCONFIG_MODE_INFO::default(); mode_count as usize];
    if unsafe {
        QueryDisplayConfig(
            QDC_ONLY_ACTIVE_PATHS,
            &mut path_count,
            paths.as_mut_ptr(),
            &mut mode_count,
            modes.as_mut_ptr(),
            None,
        )
    }
    .ok()
    .is_err()
    {
        return FxHashMap::default();
    }

    let mut map = FxHashMap::default();
    let count = usize::min(path_count as usize, paths.len());
    for path in &paths[..count] {
        let mut source = DISPLAYCONFIG_SOURCE_DEVICE_NAME {
            header: DISPLAYCONFIG_DEVICE_INFO_HEADER {
                r#type: DISPLAYCONFIG_DEVICE_INFO_GET_SOURCE_NAME,
                size: mem::size_of::<DISPLAYCONFIG_SOURCE_DEVICE_NAME>() as u32,
                adapterId: path.sourceInfo.adapterId,
                id: path.sourceInfo.id,
            },
            ..Default::default()
        };
        if unsafe { DisplayConfigGetDeviceInfo(&mut source.header) } != 0 {
            continue;
        }
        let gdi_name = utf16z_to_string(&source.viewGdiDeviceName);
        if gdi_name.is_empty() {
            continue;
        }

        let mut advanced = DISPLAYCONFIG_GET_ADVANCED_COLOR_INFO {
            header: DISPLAYCONFIG_DEVICE_INFO_HEADER {
                r#type: DISPLAYCONFIG_DEVICE_INFO_GET_ADVANCED_COLOR_INFO,
                size: mem::size_of::<DISPLAYCONFIG_GET_ADVANCED_COLOR_INFO>() as u32,
                adapterId: path.targetInfo.adapterId,
                id: path.targetInfo.id,
            },
            ..Default::default()
        };
        // Bit 0: supported, bit 1: enabled.
        let advanced_color_enabled =
            unsafe { DisplayConfigGetDeviceInfo(&mut advanced.header) } == 0 && {
                let flags = unsafe { advanced.Anonymous.value };
                (flags & 0x3) == 0x3
            };

        let mut sdr_white = DISPLAYCONFIG_SDR_WHITE_LEVEL {
            header: DISPLAYCONFIG_DEVICE_INFO_HEADER {
                r#type: DISPLAYCONFIG_DEVICE_INFO_GET_SDR_WHITE_LEVEL,
                size: mem::size_of::<DISPLAYCONFIG_SDR_WHITE_LEVEL>() as u32,
                adapterId: path.targetInfo.adapterId,
                id: path.targetInfo.id,
            },
            ..Default::default()
        };
        // SDRWhiteLevel is in thousandths of 80 nits.
        let sdr_white_level_nits = (advanced_color_enabled
            && unsafe { DisplayConfigGetDeviceInfo(&mut sdr_white.header) } == 0)
            .then(|| ((sdr_white.SDRWhiteLevel as f32) * 80.0 / 1000.0).round());

        let entry = map.entry(gdi_name).or_insert_with(DisplayConfigHdrInfo::default);
        entry.advanced_color_enabled |= advanced_color_enabled;
        if entry.sdr_white_level_nits.is_none() {
            entry.sdr_white_level_nits = sdr_white_level_nits;
        }
    }

    map
}

/// Whether the output scans out in a PQ color space, and its peak
/// luminance when reported.
fn query_dxgi_hdr(output: &IDXGIOutput) -> (bool, Option<f32>) {
    let Ok(output6) = output.cast::<IDXGIOutput6>() else {
        return (false, None);
    };
    let Ok(desc1) = (unsafe { output6.GetDesc1() }) else {
        return (false, None);
    };
    let hdr = matches!(
        desc1.ColorSpace,
        DXGI_COLOR_SPACE_RGB_FULL_G2084_NONE_P2020 | DXGI_COLOR_SPACE_RGB_STUDIO_G2084_NONE_P2020
    );
    let peak = (desc1.MaxLuminance.is_finite() && desc1.MaxLuminance > 0.0)
        .then_some(desc1.MaxLuminance);
    (hdr, peak)
}

/// Desktop-attached outputs in adapter/output order. Indices are dense and
/// match `duplicator_create`'s monitor index.
pub(crate) fn enumerate_resolved() -> GraphicsResult<Vec<ResolvedMonitor>> {
    let hdr_map = query_displayconfig_hdr_map();
    let primary = primary_hmonitor();

    let factory: IDXGIFactory1 = unsafe { CreateDXGIFactory1() }
        .context("CreateDXGIFactory1 failed")
        .map_err(GraphicsError::Platform)?;

    let mut monitors = Vec::new();
    let mut adapter_idx = 0u32;
    loop {
        let adapter1 = match unsafe { factory.EnumAdapters1(adapter_idx) } {
            Ok(a) => a,
            Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
            Err(e) => {
                return Err(GraphicsError::Platform(
                    anyhow::Error::from(e).context(format!("EnumAdapters1({adapter_idx}) failed")),
                ));
            }
        };
        let adapter_desc = unsafe { adapter1.GetDesc1() }
            .context("IDXGIAdapter1::GetDesc1 failed")
            .map_err(GraphicsError::Platform)?;
        let adapter_luid = luid_to_u64(adapter_desc.AdapterLuid);
        let adapter: IDXGIAdapter = adapter1
            .cast()
            .context("failed to cast IDXGIAdapter1 to IDXGIAdapter")
            .map_err(GraphicsError::Platform)?;

        let mut output_idx = 0u32;
        loop {
            let output = match unsafe { adapter.EnumOutputs(output_idx) } {
                Ok(o) => o,
                Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
                Err(e) => {
                    return Err(GraphicsError::Platform(anyhow::Error::from(e).context(
                        format!("EnumOutputs({output_idx}) on adapter {adapter_idx} failed"),
                    )));
                }
            };
            output_idx += 1;

            let desc = unsafe { output.GetDesc() }
                .context("IDXGIOutput::GetDesc failed")
                .map_err(GraphicsError::Platform)?;
            if !desc.AttachedToDesktop.as_bool() {
                continue;
            }

            let name = utf16z_to_string(&desc.DeviceName);
            let key = MonitorKey::from_device_name(adapter_luid, &name);
            let id = MonitorId::from_parts(
                key.adapter_luid,
                key.output_id,
                desc.Monitor.0 as isize,
                name.clone(),
                desc.Monitor == primary,
            );
            let rect = desc.DesktopCoordinates;
            let mut info = MonitorInfo::new(
                monitors.len(),
                id,
                rect.left,
                rect.top,
                rect.right.saturating_sub(rect.left).max(0) as u32,
                rect.bottom.saturating_sub(rect.top).max(0) as u32,
            );
            info.rotation_degrees = rotation_degrees(desc.Rotation);

            let (pq, peak) = query_dxgi_hdr(&output);
            let display_config = hdr_map.get(&name).copied().unwrap_or_default();
            if pq || display_config.advanced_color_enabled {
                info = info.with_hdr(
                    display_config
                        .sdr_white_level_nits
                        .unwrap_or(DEFAULT_SDR_WHITE_LEVEL_NITS),
                );
                info.max_luminance_nits = peak.unwrap_or(DEFAULT_HDR_MAX_NITS);
            }

            monitors.push(ResolvedMonitor {
                info,
                handle: desc.Monitor,
                adapter: adapter.clone(),
                output,
            });
        }

        adapter_idx += 1;
    }

    Ok(monitors)
}

/// Finds the output `id` names, surviving handle churn.
pub(crate) fn resolve(id: &MonitorId) -> GraphicsResult<ResolvedMonitor> {
    let monitors = enumerate_resolved()?;
    let infos: Vec<MonitorInfo> = monitors.iter().map(|m| m.info.clone()).collect();
    let index = crate::monitor::monitor_index(&infos, id)
        .ok_or_else(|| GraphicsError::InvalidDescriptor(format!("unknown monitor {id}")))?;
    monitors
        .into_iter()
        .find(|m| m.info.index == index)
        .ok_or(GraphicsError::SourceLost)
}
