use anyhow::Context;
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BOX, D3D11_CPU_ACCESS_READ, D3D11_MAP_READ, D3D11_MAPPED_SUBRESOURCE,
    D3D11_TEXTURE2D_DESC, D3D11_USAGE_STAGING, ID3D11Device, ID3D11DeviceContext,
    ID3D11Resource, ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,
    DXGI_FORMAT_R8G8B8A8_UNORM, DXGI_FORMAT_R16G16B16A16_FLOAT, DXGI_SAMPLE_DESC,
};
use windows::core::Interface;

use crate::error::{GraphicsError, GraphicsResult};
use crate::format::ColorFormat;
use crate::frame::CapturedFrame;

// D3D11_MAP_FLAG_DO_NOT_WAIT
const MAP_DO_NOT_WAIT: u32 = 0x100000;

fn dxgi_color_format(format: DXGI_FORMAT) -> Option<ColorFormat> {
    match format {
        DXGI_FORMAT_B8G8R8A8_UNORM | DXGI_FORMAT_B8G8R8A8_UNORM_SRGB => Some(ColorFormat::Bgra),
        DXGI_FORMAT_R8G8B8A8_UNORM => Some(ColorFormat::Rgba),
        DXGI_FORMAT_R16G16B16A16_FLOAT => Some(ColorFormat::Rgba16F),
        _ => None,
    }
}

fn as_resource(texture: &ID3D11Texture2D, what: &'static str) -> GraphicsResult<ID3D11Resource> {
    texture
        .cast()
        .with_context(|| format!("failed to cast {what} to ID3D11Resource"))
        .map_err(GraphicsError::Platform)
}

/// Reads GPU textures back into [`CapturedFrame`]s through a reusable
/// CPU-readable staging texture.
#[derive(Default)]
pub(crate) struct StagingReader {
    staging: Option<(ID3D11Texture2D, D3D11_TEXTURE2D_DESC)>,
}

impl StagingReader {
    pub(crate) fn reset(&mut self) {
        self.staging = None;
    }

    fn ensure(
        &mut self,
        device: &ID3D11Device,
        width: u32,
        height: u32,
        format: DXGI_FORMAT,
    ) -> GraphicsResult<ID3D11Texture2D> {
        if let Some((texture, desc)) = &self.staging
            && desc.Width == width
            && desc.Height == height
            && desc.Format == format
        {
            return Ok(texture.clone());
        }

        let desc = D3D11_TEXTURE2D_DESC {
            Width: width,
            Height: height,
            MipLevels: 1,
            ArraySize: 1,
            Format: format,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_STAGING,
            BindFlags: Default::default(),
            CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
            MiscFlags: Default::default(),
        };
        let mut texture: Option<ID3D11Texture2D> = None;
        unsafe { device.CreateTexture2D(&desc, None, Some(&mut texture)) }
            .context("CreateTexture2D for the staging texture failed")
            .map_err(GraphicsError::Platform)?;
        let texture = texture
            .context("CreateTexture2D returned no staging texture")
            .map_err(GraphicsError::Platform)?;
        log::debug!("staging texture recreated at {width}x{height} ({format:?})");
        self.staging = Some((texture.clone(), desc));
        Ok(texture)
    }

    /// Copies `source`, or the `region` of it, to the CPU.
    pub(crate) fn read(
        &mut self,
        device: &ID3D11Device,
        context: &ID3D11DeviceContext,
        source: &ID3D11Texture2D,
        region: Option<D3D11_BOX>,
    ) -> GraphicsResult<CapturedFrame> {
        let mut src_desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { source.GetDesc(&mut src_desc) };
        let format = dxgi_color_format(src_desc.Format).ok_or_else(|| {
            GraphicsError::Unsupported(format!("captured surface format {:?}", src_desc.Format))
        })?;
        let (width, height) = match region {
            Some(b) => (b.right - b.left, b.bottom - b.top),
            None => (src_desc.Width, src_desc.Height),
        };

        let staging = self.ensure(device, width, height, src_desc.Format)?;
        let staging_resource = as_resource(&staging, "staging texture")?;
        let source_resource = as_resource(source, "captured texture")?;
        unsafe {
            match region {
                Some(b) => context.CopySubresourceRegion(
                    &staging_resource,
                    0,
                    0,
                    0,
                    0,
                    &source_resource,
                    0,
                    Some(&b),
                ),
                None => context.CopyResource(&staging_resource, &source_resource),
            }
        }

        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        let non_blocking = unsafe {
            context.Map(
                &staging_resource,
                0,
                D3D11_MAP_READ,
                MAP_DO_NOT_WAIT,
                Some(&mut mapped),
            )
        };
        if non_blocking.is_err() {
            mapped = D3D11_MAPPED_SUBRESOURCE::default();
            unsafe { context.Map(&staging_resource, 0, D3D11_MAP_READ, 0, Some(&mut mapped)) }
                .context("ID3D11DeviceContext::Map on the staging texture failed")
                .map_err(GraphicsError::Platform)?;
        }
        let copied = copy_mapped(&mapped, width, height, format);
        unsafe { context.Unmap(&staging_resource, 0) };
        CapturedFrame::from_pixels(width, height, format, copied?)
    }
}

fn copy_mapped(
    mapped: &D3D11_MAPPED_SUBRESOURCE,
    width: u32,
    height: u32,
    format: ColorFormat,
) -> GraphicsResult<Vec<u8>> {
    let row = format.row_bytes(width)?;
    let pitch = mapped.RowPitch as usize;
    if pitch < row || mapped.pData.is_null() {
        return Err(GraphicsError::Platform(anyhow::anyhow!(
            "mapped staging texture has pitch {pitch} for {row}-byte rows"
        )));
    }
    let mut out = Vec::with_capacity(format.surface_bytes(width, height)?);
    let base = mapped.pData as *const u8;
    for y in 0..height as usize {
        // SAFETY: the mapping covers `height` rows of `RowPitch` bytes and
        // stays valid until Unmap.
        let src = unsafe { std::slice::from_raw_parts(base.add(y * pitch), row) };
        out.extend_from_slice(src);
    }
    Ok(out)
}
