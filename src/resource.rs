use crate::error::{GraphicsError, GraphicsResult};
use crate::format::{ColorFormat, IndexType, PlanarFormat, TextureFlags, TextureType, ZStencilFormat};
use crate::math::Vec3;
use crate::window::WindowId;

/// Declares an opaque, copyable resource handle. Backends mint raw ids
/// and never reuse them, so a stale handle is always detectable.
macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident, $label:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub const KIND: &'static str = $label;

            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

define_handle!(TextureId, "texture");
define_handle!(StageSurfaceId, "stage surface");
define_handle!(ZStencilId, "z-stencil buffer");
define_handle!(SamplerId, "sampler state");
define_handle!(ShaderId, "shader");
define_handle!(VertexBufferId, "vertex buffer");
define_handle!(IndexBufferId, "index buffer");
define_handle!(SwapchainId, "swapchain");
define_handle!(TimerId, "timer");
define_handle!(TimerRangeId, "timer range");
define_handle!(
    /// Per-monitor desktop duplication session bound to a device.
    DuplicatorId,
    "duplicator"
);

/// A shader parameter, addressed by shader and declaration index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShaderParamId {
    pub shader: ShaderId,
    pub index: usize,
}

/// Backend-native object pointer or id, never dereferenced by this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NativeObject(pub usize);

/// Device context handle of a GDI-compatible texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GdiDc(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureKind {
    Flat { width: u32, height: u32 },
    Cube { size: u32 },
    Volume { width: u32, height: u32, depth: u32 },
}

impl TextureKind {
    pub const fn texture_type(self) -> TextureType {
        match self {
            Self::Flat { .. } => TextureType::Texture2D,
            Self::Cube { .. } => TextureType::Cube,
            Self::Volume { .. } => TextureType::Texture3D,
        }
    }

    /// `(width, height, depth)` of the top level.
    pub const fn extent(self) -> (u32, u32, u32) {
        match self {
            Self::Flat { width, height } => (width, height, 1),
            Self::Cube { size } => (size, size, 1),
            Self::Volume {
                width,
                height,
                depth,
            } => (width, height, depth),
        }
    }

    /// Independent 2D images per mip level (cube faces or volume slices).
    pub const fn layers(self) -> u32 {
        match self {
            Self::Flat { .. } => 1,
            Self::Cube { .. } => 6,
            Self::Volume { depth, .. } => depth,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub kind: TextureKind,
    pub format: ColorFormat,
    /// Mip levels; `0` requests the full chain.
    pub levels: u32,
    pub flags: TextureFlags,
}

impl TextureDesc {
    pub fn texture_2d(width: u32, height: u32, format: ColorFormat) -> Self {
        Self {
            kind: TextureKind::Flat { width, height },
            format,
            levels: 1,
            flags: TextureFlags::empty(),
        }
    }

    pub fn cube(size: u32, format: ColorFormat) -> Self {
        Self {
            kind: TextureKind::Cube { size },
            ..Self::texture_2d(size, size, format)
        }
    }

    pub fn volume(width: u32, height: u32, depth: u32, format: ColorFormat) -> Self {
        Self {
            kind: TextureKind::Volume {
                width,
                height,
                depth,
            },
            ..Self::texture_2d(width, height, format)
        }
    }

    pub fn with_flags(mut self, flags: TextureFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_levels(mut self, levels: u32) -> Self {
        self.levels = levels;
        self
    }

    /// Level count after resolving `0` to the full chain.
    pub fn resolved_levels(&self) -> u32 {
        let (w, h, d) = self.kind.extent();
        let full = 32 - w.max(h).max(d).max(1).leading_zeros();
        if self.levels == 0 {
            full
        } else {
            self.levels.min(full)
        }
    }

    pub fn validate(&self) -> GraphicsResult<()> {
        let (w, h, d) = self.kind.extent();
        if w == 0 || h == 0 || d == 0 {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "texture dimensions must be non-zero, got {w}x{h}x{d}"
            )));
        }
        if self.format == ColorFormat::Unknown {
            return Err(GraphicsError::InvalidDescriptor(
                "texture format is unknown".into(),
            ));
        }
        if self.flags.contains(TextureFlags::RENDER_TARGET) && self.format.is_compressed() {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "{} cannot be a render target",
                self.format.as_str()
            )));
        }
        if self.flags.is_shared() && !matches!(self.kind, TextureKind::Flat { .. }) {
            return Err(GraphicsError::InvalidDescriptor(
                "only 2D textures can be shared".into(),
            ));
        }
        if self.flags.is_shared() && self.flags.contains(TextureFlags::DYNAMIC) {
            return Err(GraphicsError::InvalidDescriptor(
                "shared textures cannot be dynamic".into(),
            ));
        }
        if self.flags.contains(TextureFlags::DYNAMIC) && self.resolved_levels() > 1 {
            return Err(GraphicsError::InvalidDescriptor(
                "dynamic textures cannot have mip levels".into(),
            ));
        }
        Ok(())
    }

    /// `(width, height)` of a mip level.
    pub fn level_extent(&self, level: u32) -> (u32, u32) {
        let (w, h, _) = self.kind.extent();
        ((w >> level).max(1), (h >> level).max(1))
    }

    /// Images stored at `level`: six cube faces, or the volume depth
    /// halved per level.
    pub fn level_layers(&self, level: u32) -> u32 {
        match self.kind {
            TextureKind::Volume { depth, .. } => (depth >> level).max(1),
            kind => kind.layers(),
        }
    }

    /// Byte size of one level including all of its layers.
    pub fn level_bytes(&self, level: u32) -> GraphicsResult<usize> {
        let (w, h) = self.level_extent(level);
        self.format
            .surface_bytes(w, h)?
            .checked_mul(self.level_layers(level) as usize)
            .ok_or(GraphicsError::BufferOverflow)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureInfo {
    pub texture_type: TextureType,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub format: ColorFormat,
    pub levels: u32,
    pub flags: TextureFlags,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StageSurfaceInfo {
    pub width: u32,
    pub height: u32,
    pub format: ColorFormat,
    pub planar: Option<PlanarFormat>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ZStencilInfo {
    pub width: u32,
    pub height: u32,
    pub format: ZStencilFormat,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SampleFilter {
    Point,
    #[default]
    Linear,
    Anisotropic,
    MinMagPointMipLinear,
    MinPointMagLinearMipPoint,
    MinPointMagMipLinear,
    MinLinearMagMipPoint,
    MinLinearMagPointMipLinear,
    MinMagLinearMipPoint,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AddressMode {
    #[default]
    Clamp,
    Wrap,
    Mirror,
    Border,
    MirrorOnce,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SamplerInfo {
    pub filter: SampleFilter,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    pub max_anisotropy: u32,
    /// `0xAARRGGBB`.
    pub border_color: u32,
}

impl Default for SamplerInfo {
    fn default() -> Self {
        Self {
            filter: SampleFilter::Linear,
            address_u: AddressMode::Clamp,
            address_v: AddressMode::Clamp,
            address_w: AddressMode::Clamp,
            max_anisotropy: 1,
            border_color: 0,
        }
    }
}

impl SamplerInfo {
    pub fn validate(&self) -> GraphicsResult<()> {
        if self.max_anisotropy == 0 || self.max_anisotropy > 16 {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "max anisotropy must be within 1..=16, got {}",
                self.max_anisotropy
            )));
        }
        Ok(())
    }
}

/// Texture coordinate channel; `width` components per vertex.
#[derive(Clone, Debug, PartialEq)]
pub struct TexCoords {
    pub width: u32,
    pub data: Vec<f32>,
}

/// CPU-side vertex streams. Every present stream has one entry per point.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VertexData {
    pub points: Vec<Vec3>,
    pub normals: Option<Vec<Vec3>>,
    pub tangents: Option<Vec<Vec3>>,
    /// Packed `0xAABBGGRR` colors.
    pub colors: Option<Vec<u32>>,
    pub tex_coords: Vec<TexCoords>,
}

impl VertexData {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn validate(&self) -> GraphicsResult<()> {
        let n = self.points.len();
        let mismatch = |stream: &str, len: usize| {
            GraphicsError::InvalidDescriptor(format!(
                "vertex stream '{stream}' has {len} entries, expected {n}"
            ))
        };
        if let Some(normals) = &self.normals
            && normals.len() != n
        {
            return Err(mismatch("normals", normals.len()));
        }
        if let Some(tangents) = &self.tangents
            && tangents.len() != n
        {
            return Err(mismatch("tangents", tangents.len()));
        }
        if let Some(colors) = &self.colors
            && colors.len() != n
        {
            return Err(mismatch("colors", colors.len()));
        }
        for (idx, tex) in self.tex_coords.iter().enumerate() {
            if !(1..=4).contains(&tex.width) {
                return Err(GraphicsError::InvalidDescriptor(format!(
                    "texture coordinate channel {idx} has width {}",
                    tex.width
                )));
            }
            let expected = n * tex.width as usize;
            if tex.data.len() != expected {
                return Err(mismatch("tex_coords", tex.data.len() / tex.width as usize));
            }
        }
        Ok(())
    }

    /// Same stream layout (present streams and coordinate widths).
    pub fn same_layout(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self.normals.is_some() == other.normals.is_some()
            && self.tangents.is_some() == other.tangents.is_some()
            && self.colors.is_some() == other.colors.is_some()
            && self.tex_coords.len() == other.tex_coords.len()
            && self
                .tex_coords
                .iter()
                .zip(&other.tex_coords)
                .all(|(a, b)| a.width == b.width)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexData {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl IndexData {
    pub fn index_type(&self) -> IndexType {
        match self {
            Self::U16(_) => IndexType::U16,
            Self::U32(_) => IndexType::U32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::U16(v) => v.len(),
            Self::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::U16(v) => bytemuck::cast_slice(v),
            Self::U32(v) => bytemuck::cast_slice(v),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SwapchainDesc {
    pub window: WindowId,
    pub width: u32,
    pub height: u32,
    pub format: ColorFormat,
    pub zstencil_format: ZStencilFormat,
    pub backbuffers: u32,
}

impl SwapchainDesc {
    pub fn validate(&self) -> GraphicsResult<()> {
        if self.window.is_null() {
            return Err(GraphicsError::InvalidDescriptor(
                "swapchain window handle is null".into(),
            ));
        }
        if self.width == 0 || self.height == 0 {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "swapchain size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.backbuffers == 0 {
            return Err(GraphicsError::InvalidDescriptor(
                "swapchain needs at least one back buffer".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerRangeData {
    pub disjoint: bool,
    /// Ticks per second of the timer clock.
    pub frequency: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AdapterInfo {
    pub index: u32,
    pub name: String,
    pub driver_version: Option<String>,
}

/// Plane of a Linux dma-buf import.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DmaBufPlane {
    pub fd: i32,
    pub offset: u32,
    pub stride: u32,
    pub modifier: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DmaBufImport {
    pub width: u32,
    pub height: u32,
    /// DRM fourcc code.
    pub drm_format: u32,
    pub color_format: ColorFormat,
    pub planes: Vec<DmaBufPlane>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DmaBufCapabilities {
    pub implicit_modifiers_support: bool,
}

/// Reference to an IOSurface-like externally owned surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IoSurfaceRef {
    pub surface: NativeObject,
    pub width: u32,
    pub height: u32,
    pub format: ColorFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PixmapImport {
    pub width: u32,
    pub height: u32,
    pub format: ColorFormat,
    /// GL texture target the pixmap binds to.
    pub target: u32,
    pub pixmap: NativeObject,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_mip_chain_is_resolved_from_zero_levels() {
        let desc = TextureDesc::texture_2d(256, 64, ColorFormat::Rgba).with_levels(0);
        assert_eq!(desc.resolved_levels(), 9);
        assert_eq!(desc.level_extent(8), (1, 1));
        assert_eq!(desc.level_extent(2), (64, 16));
    }

    #[test]
    fn dynamic_textures_reject_mips() {
        let desc = TextureDesc::texture_2d(16, 16, ColorFormat::Bgra)
            .with_levels(2)
            .with_flags(TextureFlags::DYNAMIC);
        assert!(matches!(
            desc.validate(),
            Err(GraphicsError::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn shared_cube_is_rejected() {
        let desc = TextureDesc {
            kind: TextureKind::Cube { size: 8 },
            format: ColorFormat::Rgba,
            levels: 1,
            flags: TextureFlags::SHARED_TEX,
        };
        assert!(desc.validate().is_err());
        assert_eq!(desc.kind.layers(), 6);
    }

    #[test]
    fn vertex_streams_must_match_point_count() {
        let mut data = VertexData {
            points: vec![Vec3::default(); 3],
            colors: Some(vec![0; 3]),
            tex_coords: vec![TexCoords {
                width: 2,
                data: vec![0.0; 6],
            }],
            ..VertexData::default()
        };
        assert!(data.validate().is_ok());
        data.colors = Some(vec![0; 2]);
        assert!(data.validate().is_err());
    }

    #[test]
    fn index_bytes_follow_index_type() {
        let indices = IndexData::U32(vec![0, 1, 2]);
        assert_eq!(indices.as_bytes().len(), 12);
        assert_eq!(indices.index_type(), IndexType::U32);
        assert_eq!(IndexData::U16(vec![1, 2]).as_bytes(), &[1, 0, 2, 0]);
    }
}
