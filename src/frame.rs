use std::time::Instant;

use half::f16;

use crate::error::{GraphicsError, GraphicsResult};
use crate::format::{ColorFormat, ColorSpace};
use crate::math::Vec4;
use crate::monitor::DEFAULT_SDR_WHITE_LEVEL_NITS;

/// Metadata attached to each frame handed from a capture source to the
/// render thread.
#[derive(Clone, Debug, Default)]
pub struct FrameMetadata {
    /// Monotonic timestamp taken right after the OS delivered the frame.
    pub capture_time: Option<Instant>,
    /// OS presentation time in 100ns ticks, when the source reports one.
    pub present_time: Option<i64>,
    /// Monotonic per-source counter.
    pub sequence: u64,
    pub color_space: ColorSpace,
    /// SDR reference white of the source output, in nits.
    pub sdr_white_level_nits: f32,
}

/// CPU copy of a captured surface, either 8-bit BGRA/RGBA or linear
/// half-float RGBA for HDR sources.
#[derive(Clone)]
pub struct CapturedFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    linesize: usize,
    format: ColorFormat,
    pub metadata: FrameMetadata,
}

impl CapturedFrame {
    /// Wraps tightly packed pixel rows.
    pub fn from_pixels(
        width: u32,
        height: u32,
        format: ColorFormat,
        data: Vec<u8>,
    ) -> GraphicsResult<Self> {
        let linesize = format.row_bytes(width)?;
        Self::from_rows(width, height, format, linesize, data)
    }

    /// Wraps rows with a stride of `linesize` bytes.
    pub fn from_rows(
        width: u32,
        height: u32,
        format: ColorFormat,
        linesize: usize,
        data: Vec<u8>,
    ) -> GraphicsResult<Self> {
        if !matches!(
            format,
            ColorFormat::Bgra | ColorFormat::Bgrx | ColorFormat::Rgba | ColorFormat::Rgba16F
        ) {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "captured frames cannot use {}",
                format.as_str()
            )));
        }
        let row = format.row_bytes(width)?;
        if linesize < row {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "frame linesize {linesize} is shorter than a row ({row} bytes)"
            )));
        }
        let expected = required_len(linesize, row, height)?;
        if data.len() < expected {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "frame data length mismatch: got {}, expected at least {expected} for {width}x{height}",
                data.len()
            )));
        }
        let color_space = if format == ColorFormat::Rgba16F {
            ColorSpace::Rec709ScRgb
        } else {
            ColorSpace::Srgb
        };
        Ok(Self {
            data,
            width,
            height,
            linesize,
            format,
            metadata: FrameMetadata {
                color_space,
                sdr_white_level_nits: DEFAULT_SDR_WHITE_LEVEL_NITS,
                ..FrameMetadata::default()
            },
        })
    }

    /// A frame filled with one color. Half-float frames store the color
    /// as linear scRGB.
    pub fn solid(width: u32, height: u32, format: ColorFormat, color: Vec4) -> GraphicsResult<Self> {
        let texel = encode_texel(format, color)?;
        let pixels = (width as usize)
            .checked_mul(height as usize)
            .ok_or(GraphicsError::BufferOverflow)?;
        let data = texel.repeat(pixels);
        Self::from_pixels(width, height, format, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> ColorFormat {
        self.format
    }

    pub fn linesize(&self) -> usize {
        self.linesize
    }

    pub fn is_hdr(&self) -> bool {
        self.metadata.color_space.is_hdr()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let start = self.linesize * y as usize;
        let row = self.format.row_bytes(self.width).ok()?;
        self.data.get(start..start + row)
    }

    /// Copies every row into `dst` laid out with `dst_pitch` bytes per row.
    pub fn copy_rows_into(&self, dst: &mut [u8], dst_pitch: usize) -> GraphicsResult<()> {
        let row = self.format.row_bytes(self.width)?;
        let needed = required_len(dst_pitch, row, self.height)?;
        if dst_pitch < row || dst.len() < needed {
            return Err(GraphicsError::BufferOverflow);
        }
        for y in 0..self.height as usize {
            let src = &self.data[y * self.linesize..y * self.linesize + row];
            dst[y * dst_pitch..y * dst_pitch + row].copy_from_slice(src);
        }
        Ok(())
    }

    /// Tone-maps an HDR frame into 8-bit sRGB BGRA, placing the source's
    /// SDR white at display white. SDR frames are returned unchanged.
    pub fn into_sdr(self) -> GraphicsResult<Self> {
        if self.format != ColorFormat::Rgba16F {
            return Ok(self);
        }
        let white_scale = DEFAULT_SDR_WHITE_LEVEL_NITS / self.metadata.sdr_white_level_nits.max(1.0);
        let mut out = Vec::with_capacity(self.width as usize * self.height as usize * 4);
        for y in 0..self.height {
            let row = self.row(y).ok_or(GraphicsError::BufferOverflow)?;
            for texel in row.chunks_exact(8) {
                let channel = |i: usize| {
                    f16::from_le_bytes([texel[i * 2], texel[i * 2 + 1]]).to_f32()
                };
                let r = linear_to_srgb_u8(channel(0) * white_scale);
                let g = linear_to_srgb_u8(channel(1) * white_scale);
                let b = linear_to_srgb_u8(channel(2) * white_scale);
                let a = (channel(3).clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
                out.extend_from_slice(&[b, g, r, a]);
            }
        }
        let mut frame = Self::from_pixels(self.width, self.height, ColorFormat::Bgra, out)?;
        frame.metadata = FrameMetadata {
            color_space: ColorSpace::Srgb,
            ..self.metadata
        };
        Ok(frame)
    }
}

impl std::fmt::Debug for CapturedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("linesize", &self.linesize)
            .field("metadata", &self.metadata)
            .finish()
    }
}

fn required_len(pitch: usize, row: usize, height: u32) -> GraphicsResult<usize> {
    if height == 0 {
        return Ok(0);
    }
    pitch
        .checked_mul(height as usize - 1)
        .and_then(|base| base.checked_add(row))
        .ok_or(GraphicsError::BufferOverflow)
}

/// Linear [0, 1] to an sRGB-encoded byte (IEC 61966-2-1).
pub(crate) fn linear_to_srgb_u8(v: f32) -> u8 {
    let c = v.clamp(0.0, 1.0);
    let srgb = if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    };
    (srgb * 255.0 + 0.5).floor().clamp(0.0, 255.0) as u8
}

/// Byte encoding of one texel of `format` holding `color`.
pub(crate) fn encode_texel(format: ColorFormat, color: Vec4) -> GraphicsResult<Vec<u8>> {
    let unorm = |v: f32| (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
    let half = |v: f32| f16::from_f32(v).to_le_bytes();
    let texel = match format {
        ColorFormat::A8 => vec![unorm(color.w)],
        ColorFormat::R8 => vec![unorm(color.x)],
        ColorFormat::R8G8 => vec![unorm(color.x), unorm(color.y)],
        ColorFormat::Rgba | ColorFormat::RgbaUnorm => {
            vec![unorm(color.x), unorm(color.y), unorm(color.z), unorm(color.w)]
        }
        ColorFormat::Bgra | ColorFormat::BgraUnorm => {
            vec![unorm(color.z), unorm(color.y), unorm(color.x), unorm(color.w)]
        }
        ColorFormat::Bgrx | ColorFormat::BgrxUnorm => {
            vec![unorm(color.z), unorm(color.y), unorm(color.x), 0xff]
        }
        ColorFormat::R16 => ((color.x.clamp(0.0, 1.0) * 65535.0 + 0.5) as u16)
            .to_le_bytes()
            .to_vec(),
        ColorFormat::Rg16 => [color.x, color.y]
            .iter()
            .flat_map(|v| ((v.clamp(0.0, 1.0) * 65535.0 + 0.5) as u16).to_le_bytes())
            .collect(),
        ColorFormat::Rgba16 => [color.x, color.y, color.z, color.w]
            .iter()
            .flat_map(|v| ((v.clamp(0.0, 1.0) * 65535.0 + 0.5) as u16).to_le_bytes())
            .collect(),
        ColorFormat::R16F => half(color.x).to_vec(),
        ColorFormat::Rg16F => [half(color.x), half(color.y)].concat(),
        ColorFormat::Rgba16F => {
            [half(color.x), half(color.y), half(color.z), half(color.w)].concat()
        }
        ColorFormat::R32F => color.x.to_le_bytes().to_vec(),
        ColorFormat::Rg32F => [color.x.to_le_bytes(), color.y.to_le_bytes()].concat(),
        ColorFormat::Rgba32F => bytemuck::bytes_of(&color).to_vec(),
        ColorFormat::R10G10B10A2 => {
            let ten = |v: f32| (v.clamp(0.0, 1.0) * 1023.0 + 0.5) as u32;
            let two = (color.w.clamp(0.0, 1.0) * 3.0 + 0.5) as u32;
            (ten(color.x) | (ten(color.y) << 10) | (ten(color.z) << 20) | (two << 30))
                .to_le_bytes()
                .to_vec()
        }
        ColorFormat::Unknown | ColorFormat::Dxt1 | ColorFormat::Dxt3 | ColorFormat::Dxt5 => {
            return Err(GraphicsError::Unsupported(format!(
                "per-texel encoding of {}",
                format.as_str()
            )));
        }
    };
    Ok(texel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pitched_rows_are_validated() -> GraphicsResult<()> {
        let frame = CapturedFrame::from_rows(2, 2, ColorFormat::Bgra, 12, vec![7; 20])?;
        assert_eq!(frame.row(1), Some(&[7u8; 8][..]));
        assert!(CapturedFrame::from_rows(2, 2, ColorFormat::Bgra, 12, vec![0; 19]).is_err());
        assert!(CapturedFrame::from_rows(2, 2, ColorFormat::Bgra, 4, vec![0; 64]).is_err());
        Ok(())
    }

    #[test]
    fn half_float_frames_are_tagged_scrgb() -> GraphicsResult<()> {
        let frame = CapturedFrame::solid(4, 2, ColorFormat::Rgba16F, Vec4::new(2.0, 1.0, 0.5, 1.0))?;
        assert!(frame.is_hdr());
        assert_eq!(frame.as_bytes().len(), 4 * 2 * 8);
        let sdr = CapturedFrame::solid(4, 2, ColorFormat::Bgra, Vec4::new(1.0, 0.0, 0.0, 1.0))?;
        assert_eq!(sdr.metadata.color_space, ColorSpace::Srgb);
        assert_eq!(&sdr.as_bytes()[..4], &[0, 0, 255, 255]);
        Ok(())
    }

    #[test]
    fn sdr_conversion_clips_above_white() -> GraphicsResult<()> {
        let hdr = CapturedFrame::solid(1, 1, ColorFormat::Rgba16F, Vec4::new(4.0, 1.0, 0.0, 1.0))?;
        let sdr = hdr.into_sdr()?;
        assert_eq!(sdr.format(), ColorFormat::Bgra);
        assert_eq!(sdr.metadata.color_space, ColorSpace::Srgb);
        assert_eq!(sdr.as_bytes(), &[0, 255, 255, 255]);
        Ok(())
    }

    #[test]
    fn copy_rows_respects_destination_pitch() -> GraphicsResult<()> {
        let frame = CapturedFrame::from_pixels(1, 2, ColorFormat::Rgba, vec![1, 2, 3, 4, 5, 6, 7, 8])?;
        let mut dst = vec![0u8; 16];
        frame.copy_rows_into(&mut dst, 8)?;
        assert_eq!(&dst[..4], &[1, 2, 3, 4]);
        assert_eq!(&dst[8..12], &[5, 6, 7, 8]);
        assert!(frame.copy_rows_into(&mut dst[..10], 8).is_err());
        Ok(())
    }
}
