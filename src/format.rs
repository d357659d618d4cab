use crate::error::{GraphicsError, GraphicsResult};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ColorFormat {
    #[default]
    Unknown,
    A8,
    R8,
    Rgba,
    Bgrx,
    Bgra,
    R10G10B10A2,
    Rgba16,
    R16,
    Rgba16F,
    Rgba32F,
    Rg16F,
    Rg32F,
    R16F,
    R32F,
    Dxt1,
    Dxt3,
    Dxt5,
    R8G8,
    RgbaUnorm,
    BgrxUnorm,
    BgraUnorm,
    Rg16,
}

impl ColorFormat {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::A8 => "a8",
            Self::R8 => "r8",
            Self::Rgba => "rgba",
            Self::Bgrx => "bgrx",
            Self::Bgra => "bgra",
            Self::R10G10B10A2 => "r10g10b10a2",
            Self::Rgba16 => "rgba16",
            Self::R16 => "r16",
            Self::Rgba16F => "rgba16f",
            Self::Rgba32F => "rgba32f",
            Self::Rg16F => "rg16f",
            Self::Rg32F => "rg32f",
            Self::R16F => "r16f",
            Self::R32F => "r32f",
            Self::Dxt1 => "dxt1",
            Self::Dxt3 => "dxt3",
            Self::Dxt5 => "dxt5",
            Self::R8G8 => "r8g8",
            Self::RgbaUnorm => "rgba_unorm",
            Self::BgrxUnorm => "bgrx_unorm",
            Self::BgraUnorm => "bgra_unorm",
            Self::Rg16 => "rg16",
        }
    }

    pub const fn bits_per_pixel(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::A8 | Self::R8 => 8,
            Self::Dxt1 => 4,
            Self::Dxt3 | Self::Dxt5 => 8,
            Self::R16 | Self::R16F | Self::R8G8 => 16,
            Self::Rgba
            | Self::Bgrx
            | Self::Bgra
            | Self::R10G10B10A2
            | Self::Rg16F
            | Self::R32F
            | Self::RgbaUnorm
            | Self::BgrxUnorm
            | Self::BgraUnorm
            | Self::Rg16 => 32,
            Self::Rgba16 | Self::Rgba16F | Self::Rg32F => 64,
            Self::Rgba32F => 128,
        }
    }

    pub const fn is_compressed(self) -> bool {
        matches!(self, Self::Dxt1 | Self::Dxt3 | Self::Dxt5)
    }

    /// Formats with a hardware sRGB view.
    pub const fn has_srgb_view(self) -> bool {
        matches!(self, Self::Rgba | Self::Bgrx | Self::Bgra)
    }

    /// The non-sRGB twin used when a texture is bound linearly.
    pub const fn linear_twin(self) -> Self {
        match self {
            Self::Rgba => Self::RgbaUnorm,
            Self::Bgrx => Self::BgrxUnorm,
            Self::Bgra => Self::BgraUnorm,
            other => other,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(
            self,
            Self::Rgba16F | Self::Rgba32F | Self::Rg16F | Self::Rg32F | Self::R16F | Self::R32F
        )
    }

    /// Bytes in one row of `width` texels. Block-compressed formats round
    /// up to whole 4x4 blocks.
    pub fn row_bytes(self, width: u32) -> GraphicsResult<usize> {
        if self == Self::Unknown {
            return Err(GraphicsError::InvalidDescriptor(
                "texture format is unknown".into(),
            ));
        }
        let width = usize::try_from(width).map_err(|_| GraphicsError::BufferOverflow)?;
        if self.is_compressed() {
            let block_bytes = if self == Self::Dxt1 { 8 } else { 16 };
            return width
                .div_ceil(4)
                .checked_mul(block_bytes)
                .ok_or(GraphicsError::BufferOverflow);
        }
        width
            .checked_mul(self.bits_per_pixel() as usize / 8)
            .ok_or(GraphicsError::BufferOverflow)
    }

    /// Number of rows stored for `height` texels.
    pub fn row_count(self, height: u32) -> usize {
        if self.is_compressed() {
            (height as usize).div_ceil(4)
        } else {
            height as usize
        }
    }

    pub fn surface_bytes(self, width: u32, height: u32) -> GraphicsResult<usize> {
        self.row_bytes(width)?
            .checked_mul(self.row_count(height))
            .ok_or(GraphicsError::BufferOverflow)
    }

    /// Maps a DRM fourcc to the format a dmabuf import produces.
    pub fn from_drm_fourcc(fourcc: u32) -> Option<Self> {
        match &fourcc.to_le_bytes() {
            b"AR24" => Some(Self::Bgra),
            b"XR24" => Some(Self::Bgrx),
            b"AB24" => Some(Self::Rgba),
            b"AR30" | b"AB30" => Some(Self::R10G10B10A2),
            b"R8  " => Some(Self::R8),
            b"GR88" => Some(Self::R8G8),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ZStencilFormat {
    #[default]
    None,
    Z16,
    Z24S8,
    Z32F,
    Z32FS8X24,
}

impl ZStencilFormat {
    pub const fn bytes_per_texel(self) -> usize {
        match self {
            Self::None => 0,
            Self::Z16 => 2,
            Self::Z24S8 | Self::Z32F => 4,
            Self::Z32FS8X24 => 8,
        }
    }

    pub const fn has_stencil(self) -> bool {
        matches!(self, Self::Z24S8 | Self::Z32FS8X24)
    }
}

/// Color space of a render target, swapchain or captured surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    #[default]
    Srgb,
    /// sRGB primaries stored in a half-float target.
    Srgb16F,
    /// BT.709 primaries, linear, values above 1.0 allowed.
    Rec709Extended,
    /// BT.709 primaries, linear, 1.0 = 80 nits.
    Rec709ScRgb,
}

impl ColorSpace {
    pub const fn is_hdr(self) -> bool {
        matches!(self, Self::Rec709Extended | Self::Rec709ScRgb)
    }

    /// Preferred texture format for content in this color space.
    pub const fn preferred_format(self) -> ColorFormat {
        match self {
            Self::Srgb => ColorFormat::Bgra,
            Self::Srgb16F | Self::Rec709Extended | Self::Rec709ScRgb => ColorFormat::Rgba16F,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum IndexType {
    #[default]
    U16,
    U32,
}

impl IndexType {
    pub const fn size(self) -> usize {
        match self {
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureType {
    Texture2D,
    Texture3D,
    Cube,
}

/// Two-plane YUV layouts supported for video interop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlanarFormat {
    Nv12,
    P010,
}

impl PlanarFormat {
    /// Formats of the luma and interleaved chroma planes.
    pub const fn plane_formats(self) -> (ColorFormat, ColorFormat) {
        match self {
            Self::Nv12 => (ColorFormat::R8, ColorFormat::R8G8),
            Self::P010 => (ColorFormat::R16, ColorFormat::Rg16),
        }
    }

    /// Bytes for a full frame of the given dimensions (luma plus half
    /// resolution chroma).
    pub fn frame_bytes(self, width: u32, height: u32) -> GraphicsResult<usize> {
        let (luma, chroma) = self.plane_formats();
        let luma_bytes = luma.surface_bytes(width, height)?;
        let chroma_bytes = chroma.surface_bytes(width.div_ceil(2), height.div_ceil(2))?;
        luma_bytes
            .checked_add(chroma_bytes)
            .ok_or(GraphicsError::BufferOverflow)
    }
}

bitflags::bitflags! {
    /// Creation flags for textures.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct TextureFlags: u32 {
        const BUILD_MIPMAPS = 1 << 0;
        const DYNAMIC = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const DUP_BUFFER = 1 << 4;
        const SHARED_TEX = 1 << 5;
        const SHARED_KM_TEX = 1 << 6;
    }
}

impl TextureFlags {
    pub fn is_shared(self) -> bool {
        self.intersects(Self::SHARED_TEX | Self::SHARED_KM_TEX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_bytes_handles_block_compression() -> GraphicsResult<()> {
        assert_eq!(ColorFormat::Bgra.row_bytes(17)?, 68);
        assert_eq!(ColorFormat::Dxt1.row_bytes(17)?, 5 * 8);
        assert_eq!(ColorFormat::Dxt5.surface_bytes(8, 9)?, 2 * 16 * 3);
        assert_eq!(ColorFormat::Rgba32F.surface_bytes(2, 2)?, 64);
        Ok(())
    }

    #[test]
    fn unknown_format_is_rejected() {
        assert!(matches!(
            ColorFormat::Unknown.row_bytes(4),
            Err(GraphicsError::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn drm_fourcc_maps_common_formats() {
        let argb = u32::from_le_bytes(*b"AR24");
        let xrgb = u32::from_le_bytes(*b"XR24");
        assert_eq!(ColorFormat::from_drm_fourcc(argb), Some(ColorFormat::Bgra));
        assert_eq!(ColorFormat::from_drm_fourcc(xrgb), Some(ColorFormat::Bgrx));
        assert_eq!(ColorFormat::from_drm_fourcc(0), None);
    }

    #[test]
    fn nv12_frame_size_includes_chroma_plane() -> GraphicsResult<()> {
        assert_eq!(PlanarFormat::Nv12.frame_bytes(4, 4)?, 16 + 8);
        assert_eq!(PlanarFormat::P010.frame_bytes(4, 4)?, 32 + 16);
        Ok(())
    }

    #[test]
    fn hdr_color_spaces_prefer_half_float() {
        assert!(ColorSpace::Rec709ScRgb.is_hdr());
        assert!(!ColorSpace::Srgb16F.is_hdr());
        assert_eq!(ColorSpace::Rec709ScRgb.preferred_format(), ColorFormat::Rgba16F);
        assert_eq!(ColorSpace::Srgb.preferred_format(), ColorFormat::Bgra);
    }
}
