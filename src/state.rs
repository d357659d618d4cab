//! Immediate-mode pipeline state tracked by the device front end and
//! handed to the backend with every draw and clear.

use crate::format::ColorSpace;
use crate::math::{Matrix4, Vec4};
use crate::resource::{
    IndexBufferId, SamplerId, ShaderId, TextureId, VertexBufferId, ZStencilId,
};

/// Texture/sampler slots per shader stage.
pub const MAX_TEXTURE_UNITS: usize = 16;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CullMode {
    Back,
    Front,
    #[default]
    Neither,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendType {
    Zero,
    One,
    SrcColor,
    InvSrcColor,
    SrcAlpha,
    InvSrcAlpha,
    DstColor,
    InvDstColor,
    DstAlpha,
    InvDstAlpha,
    SrcAlphaSat,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DepthTest {
    Never,
    Less,
    LessEqual,
    Equal,
    GreaterEqual,
    Greater,
    NotEqual,
    Always,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StencilSide {
    Front,
    Back,
    Both,
}

impl StencilSide {
    fn applies_front(self) -> bool {
        matches!(self, Self::Front | Self::Both)
    }

    fn applies_back(self) -> bool {
        matches!(self, Self::Back | Self::Both)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StencilOpType {
    Keep,
    Zero,
    Replace,
    Incr,
    Decr,
    Invert,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DrawMode {
    Points,
    Lines,
    LineStrip,
    Tris,
    TriStrip,
}

impl DrawMode {
    /// Minimum vertex count that produces at least one primitive.
    pub const fn min_vertices(self) -> u32 {
        match self {
            Self::Points => 1,
            Self::Lines | Self::LineStrip => 2,
            Self::Tris | Self::TriStrip => 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CubeSide {
    PositiveX,
    NegativeX,
    PositiveY,
    NegativeY,
    PositiveZ,
    NegativeZ,
}

impl CubeSide {
    pub const fn index(self) -> usize {
        self as usize
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct ClearFlags: u32 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub cx: i32,
    pub cy: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, cx: i32, cy: i32) -> Self {
        Self { x, y, cx, cy }
    }

    pub const fn is_empty(&self) -> bool {
        self.cx <= 0 || self.cy <= 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub enabled: bool,
    pub src_color: BlendType,
    pub dest_color: BlendType,
    pub src_alpha: BlendType,
    pub dest_alpha: BlendType,
    pub op: BlendOp,
}

impl Default for BlendState {
    fn default() -> Self {
        Self {
            enabled: true,
            src_color: BlendType::SrcAlpha,
            dest_color: BlendType::InvSrcAlpha,
            src_alpha: BlendType::One,
            dest_alpha: BlendType::InvSrcAlpha,
            op: BlendOp::Add,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StencilFace {
    pub test: DepthTest,
    pub fail: StencilOpType,
    pub zfail: StencilOpType,
    pub zpass: StencilOpType,
}

impl Default for StencilFace {
    fn default() -> Self {
        Self {
            test: DepthTest::Always,
            fail: StencilOpType::Keep,
            zfail: StencilOpType::Keep,
            zpass: StencilOpType::Keep,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    pub depth_enabled: bool,
    pub depth_write: bool,
    pub depth_func: DepthTest,
    pub stencil_enabled: bool,
    pub stencil_write: bool,
    pub front: StencilFace,
    pub back: StencilFace,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_enabled: false,
            depth_write: false,
            depth_func: DepthTest::Less,
            stencil_enabled: false,
            stencil_write: true,
            front: StencilFace::default(),
            back: StencilFace::default(),
        }
    }
}

impl DepthStencilState {
    pub(crate) fn set_stencil_function(&mut self, side: StencilSide, test: DepthTest) {
        if side.applies_front() {
            self.front.test = test;
        }
        if side.applies_back() {
            self.back.test = test;
        }
    }

    pub(crate) fn set_stencil_op(
        &mut self,
        side: StencilSide,
        fail: StencilOpType,
        zfail: StencilOpType,
        zpass: StencilOpType,
    ) {
        let apply = |face: &mut StencilFace| {
            face.fail = fail;
            face.zfail = zfail;
            face.zpass = zpass;
        };
        if side.applies_front() {
            apply(&mut self.front);
        }
        if side.applies_back() {
            apply(&mut self.back);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ColorMask {
    pub red: bool,
    pub green: bool,
    pub blue: bool,
    pub alpha: bool,
}

impl Default for ColorMask {
    fn default() -> Self {
        Self {
            red: true,
            green: true,
            blue: true,
            alpha: true,
        }
    }
}

/// Where draws and clears land.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RenderTarget {
    /// The back buffer of the loaded swapchain.
    #[default]
    Swapchain,
    Texture(TextureId),
    CubeFace(TextureId, CubeSide),
}

impl RenderTarget {
    pub fn texture(self) -> Option<TextureId> {
        match self {
            Self::Swapchain => None,
            Self::Texture(id) | Self::CubeFace(id, _) => Some(id),
        }
    }
}

/// Snapshot of the bound pipeline passed to `DeviceBackend::draw`.
#[derive(Clone, Debug)]
pub struct PipelineState {
    pub target: RenderTarget,
    pub zstencil: Option<ZStencilId>,
    pub target_color_space: ColorSpace,
    pub framebuffer_srgb: bool,
    pub viewport: Rect,
    pub scissor: Option<Rect>,
    pub cull_mode: CullMode,
    pub blend: BlendState,
    pub depth_stencil: DepthStencilState,
    pub color_mask: ColorMask,
    pub vertex_buffer: Option<VertexBufferId>,
    pub index_buffer: Option<IndexBufferId>,
    pub vertex_shader: Option<ShaderId>,
    pub pixel_shader: Option<ShaderId>,
    pub textures: [Option<BoundTexture>; MAX_TEXTURE_UNITS],
    pub samplers: [Option<SamplerId>; MAX_TEXTURE_UNITS],
    pub view_proj: Matrix4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BoundTexture {
    pub texture: TextureId,
    pub srgb: bool,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            target: RenderTarget::Swapchain,
            zstencil: None,
            target_color_space: ColorSpace::Srgb,
            framebuffer_srgb: false,
            viewport: Rect::default(),
            scissor: None,
            cull_mode: CullMode::Neither,
            blend: BlendState::default(),
            depth_stencil: DepthStencilState::default(),
            color_mask: ColorMask::default(),
            vertex_buffer: None,
            index_buffer: None,
            vertex_shader: None,
            pixel_shader: None,
            textures: [None; MAX_TEXTURE_UNITS],
            samplers: [None; MAX_TEXTURE_UNITS],
            view_proj: Matrix4::IDENTITY,
        }
    }
}

/// Clear request forwarded to the backend.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearRequest {
    pub flags: ClearFlags,
    pub color: Vec4,
    pub depth: f32,
    pub stencil: u8,
}
