use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::backend::{DeviceBackend, DmaBufInterop, IoSurfaceInterop, Win32Interop};
use crate::config::GraphicsConfig;
use crate::desktop::DesktopSource;
use crate::error::{GraphicsError, GraphicsResult, violation};
use crate::exports::PlatformGroup;
use crate::format::{ColorFormat, ColorSpace, PlanarFormat, TextureFlags, TextureType, ZStencilFormat};
use crate::frame::encode_texel;
use crate::monitor::MonitorId;
use crate::resource::{
    DuplicatorId, IndexBufferId, IndexData, NativeObject, SamplerId, SamplerInfo, ShaderId,
    StageSurfaceId, StageSurfaceInfo, SwapchainDesc, SwapchainId, TextureDesc, TextureId,
    TextureInfo, TimerId, TimerRangeData, TimerRangeId, VertexBufferId, VertexData, ZStencilId,
    ZStencilInfo,
};
use crate::math::Vec4;
use crate::shader::{ShaderParams, ShaderType, ShaderValue, reflect_uniforms};
use crate::state::{ClearFlags, ClearRequest, DrawMode, PipelineState, Rect, RenderTarget};

use super::interop::SoftDuplicator;
use super::parallel;
use super::raster::{self, Shape, Surface};
use super::texture::SoftTexture;
use super::{AllocationToken, next_native_object};

const TIMER_FREQUENCY: u64 = 1_000_000_000;

/// Unpacks a `0xAABBGGRR` vertex color.
fn unpack_abgr(color: u32) -> Vec4 {
    let channel = |shift: u32| ((color >> shift) & 0xff) as f32 / 255.0;
    Vec4::new(channel(0), channel(8), channel(16), channel(24))
}

struct SoftStageSurface {
    info: StageSurfaceInfo,
    data: Vec<u8>,
    linesize: usize,
    mapped: bool,
    _token: AllocationToken,
}

struct SoftZStencil {
    info: ZStencilInfo,
    depth: Vec<f32>,
    stencil: Vec<u8>,
    _token: AllocationToken,
}

struct SoftSampler {
    _info: SamplerInfo,
    _token: AllocationToken,
}

struct SoftShader {
    shader_type: ShaderType,
    params: ShaderParams,
    _token: AllocationToken,
}

struct SoftBuffer<T> {
    cpu: T,
    gpu: T,
    dynamic: bool,
    _token: AllocationToken,
}

struct SoftSwapchain {
    desc: SwapchainDesc,
    backbuffer: Vec<u8>,
    _token: AllocationToken,
}

struct SoftTimer {
    begin: Option<Instant>,
    end: Option<Instant>,
    _token: AllocationToken,
}

struct SoftTimerRange {
    active: bool,
    resolved: bool,
    _token: AllocationToken,
}

fn lookup<'m, K, V>(map: &'m FxHashMap<K, V>, id: &K, kind: &'static str) -> GraphicsResult<&'m V>
where
    K: std::hash::Hash + Eq,
{
    map.get(id).ok_or(GraphicsError::InvalidHandle(kind))
}

fn lookup_mut<'m, K, V>(
    map: &'m mut FxHashMap<K, V>,
    id: &K,
    kind: &'static str,
) -> GraphicsResult<&'m mut V>
where
    K: std::hash::Hash + Eq,
{
    map.get_mut(id).ok_or(GraphicsError::InvalidHandle(kind))
}

fn remove<K, V>(map: &mut FxHashMap<K, V>, id: &K, kind: &'static str) -> GraphicsResult<V>
where
    K: std::hash::Hash + Eq,
{
    map.remove(id).ok_or(GraphicsError::InvalidHandle(kind))
}

/// Device of the soft backend.
pub struct SoftDevice {
    live: Arc<AtomicUsize>,
    device_removed: Arc<AtomicBool>,
    pub(super) desktop: Arc<dyn DesktopSource>,
    group: Option<PlatformGroup>,
    object: NativeObject,
    next_id: u64,
    pub(super) textures: FxHashMap<TextureId, SoftTexture>,
    stage_surfaces: FxHashMap<StageSurfaceId, SoftStageSurface>,
    zstencils: FxHashMap<ZStencilId, SoftZStencil>,
    samplers: FxHashMap<SamplerId, SoftSampler>,
    shaders: FxHashMap<ShaderId, SoftShader>,
    vertex_buffers: FxHashMap<VertexBufferId, SoftBuffer<VertexData>>,
    index_buffers: FxHashMap<IndexBufferId, SoftBuffer<IndexData>>,
    swapchains: FxHashMap<SwapchainId, SoftSwapchain>,
    timers: FxHashMap<TimerId, SoftTimer>,
    timer_ranges: FxHashMap<TimerRangeId, SoftTimerRange>,
    pub(super) duplicators: FxHashMap<DuplicatorId, SoftDuplicator>,
    pub(super) duplicator_timeout: Duration,
    in_scene: bool,
    markers: Vec<String>,
}

impl SoftDevice {
    pub(super) fn new(
        live: Arc<AtomicUsize>,
        device_removed: Arc<AtomicBool>,
        desktop: Arc<dyn DesktopSource>,
        group: Option<PlatformGroup>,
    ) -> Self {
        let object = next_native_object();
        log::debug!("soft device {:#x} created (group {group:?})", object.0);
        Self {
            live,
            device_removed,
            desktop,
            group,
            object,
            next_id: 1,
            textures: FxHashMap::default(),
            stage_surfaces: FxHashMap::default(),
            zstencils: FxHashMap::default(),
            samplers: FxHashMap::default(),
            shaders: FxHashMap::default(),
            vertex_buffers: FxHashMap::default(),
            index_buffers: FxHashMap::default(),
            swapchains: FxHashMap::default(),
            timers: FxHashMap::default(),
            timer_ranges: FxHashMap::default(),
            duplicators: FxHashMap::default(),
            duplicator_timeout: GraphicsConfig::from_env().duplicator_timeout,
            in_scene: false,
            markers: Vec::new(),
        }
    }

    pub(super) fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(super) fn token(&self) -> AllocationToken {
        AllocationToken::new(&self.live)
    }

    pub(super) fn insert_texture(&mut self, texture: SoftTexture) -> TextureId {
        let id = TextureId::from_raw(self.alloc_id());
        self.textures.insert(id, texture);
        id
    }

    pub(super) fn texture(&self, id: TextureId) -> GraphicsResult<&SoftTexture> {
        lookup(&self.textures, &id, TextureId::KIND)
    }

    pub(super) fn texture_mut(&mut self, id: TextureId) -> GraphicsResult<&mut SoftTexture> {
        lookup_mut(&mut self.textures, &id, TextureId::KIND)
    }

    pub(super) fn insert_stagesurface(
        &mut self,
        info: StageSurfaceInfo,
        bytes: usize,
        linesize: usize,
    ) -> StageSurfaceId {
        let id = StageSurfaceId::from_raw(self.alloc_id());
        let surface = SoftStageSurface {
            info,
            data: vec![0; bytes],
            linesize,
            mapped: false,
            _token: self.token(),
        };
        self.stage_surfaces.insert(id, surface);
        id
    }

    fn check_lost(&self) -> GraphicsResult<()> {
        if self.device_removed.swap(false, Ordering::SeqCst) {
            log::error!("soft device {:#x} removed", self.object.0);
            return Err(GraphicsError::DeviceLost);
        }
        Ok(())
    }

    fn target_size(
        &self,
        target: RenderTarget,
        swapchain: Option<SwapchainId>,
    ) -> GraphicsResult<(u32, u32)> {
        match target {
            RenderTarget::Swapchain => {
                let id = swapchain.ok_or_else(|| {
                    GraphicsError::InvalidDescriptor("no swapchain is loaded".into())
                })?;
                let chain = lookup(&self.swapchains, &id, SwapchainId::KIND)?;
                Ok((chain.desc.width, chain.desc.height))
            }
            RenderTarget::Texture(id) | RenderTarget::CubeFace(id, _) => {
                let (w, h, _) = self.texture(id)?.desc.kind.extent();
                Ok((w, h))
            }
        }
    }

    /// The pixel shader's `color` uniform, which overrides vertex colors.
    fn uniform_color(&self, shader: Option<ShaderId>) -> Option<Vec4> {
        let params = &self.shaders.get(&shader?)?.params;
        match &params.get(params.index_of("color")?)?.value {
            ShaderValue::Vec4(color) => Some(*color),
            _ => None,
        }
    }

    fn rasterize_shapes(
        &mut self,
        state: &PipelineState,
        swapchain: Option<SwapchainId>,
        (width, height): (u32, u32),
        shapes: &[(Shape, Vec4)],
    ) -> GraphicsResult<usize> {
        if shapes.is_empty() || !raster::writes_enabled(state.color_mask) {
            return Ok(0);
        }
        let bounds = Rect::new(
            0,
            0,
            i32::try_from(width).unwrap_or(i32::MAX),
            i32::try_from(height).unwrap_or(i32::MAX),
        );
        let mut clip = raster::intersect(bounds, state.viewport);
        if let Some(scissor) = state.scissor {
            clip = raster::intersect(clip, scissor);
        }
        let paint = |format: ColorFormat, bytes: &mut [u8]| -> GraphicsResult<usize> {
            let mut surface = Surface {
                bytes,
                width,
                height,
                pitch: format.row_bytes(width)?,
            };
            let mut written = 0;
            for (shape, color) in shapes {
                let texel = encode_texel(format, *color)?;
                written += raster::rasterize(&mut surface, clip, shape, &texel);
            }
            Ok(written)
        };

        match state.target {
            RenderTarget::Swapchain => {
                let id = swapchain.ok_or_else(|| {
                    GraphicsError::InvalidDescriptor("no swapchain is loaded".into())
                })?;
                let chain = lookup_mut(&mut self.swapchains, &id, SwapchainId::KIND)?;
                let format = chain.desc.format;
                paint(format, &mut chain.backbuffer)
            }
            RenderTarget::Texture(id) => {
                let texture = self.texture_mut(id)?;
                let format = texture.desc.format;
                texture.with_level_mut(0, |bytes| paint(format, bytes))?
            }
            RenderTarget::CubeFace(id, side) => {
                let texture = self.texture_mut(id)?;
                let format = texture.desc.format;
                let face = format.surface_bytes(width, height)?;
                let start = face * side.index();
                texture.with_level_mut(0, |bytes| match bytes.get_mut(start..start + face) {
                    Some(layer) => paint(format, layer),
                    None => Ok(0),
                })?
            }
        }
    }

    fn check_shader(&self, shader: Option<ShaderId>, expected: ShaderType) -> GraphicsResult<()> {
        let id = shader.ok_or_else(|| {
            GraphicsError::InvalidDescriptor(format!("no {expected:?} shader is loaded"))
        })?;
        let shader = lookup(&self.shaders, &id, ShaderId::KIND)?;
        if shader.shader_type != expected {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "shader {} is a {:?} shader",
                id.raw(),
                shader.shader_type
            )));
        }
        Ok(())
    }
}

impl DeviceBackend for SoftDevice {
    fn device_obj(&self) -> NativeObject {
        self.object
    }

    fn rebuild(&mut self) -> GraphicsResult<NativeObject> {
        self.object = next_native_object();
        self.in_scene = false;
        log::info!("soft device rebuilt as {:#x}", self.object.0);
        Ok(self.object)
    }

    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> GraphicsResult<SwapchainId> {
        desc.validate()?;
        let bytes = desc.format.surface_bytes(desc.width, desc.height)?;
        encode_texel(desc.format, Default::default())?;
        let id = SwapchainId::from_raw(self.alloc_id());
        let chain = SoftSwapchain {
            desc: *desc,
            backbuffer: vec![0; bytes],
            _token: self.token(),
        };
        self.swapchains.insert(id, chain);
        Ok(id)
    }

    fn destroy_swapchain(&mut self, swapchain: SwapchainId) -> GraphicsResult<()> {
        remove(&mut self.swapchains, &swapchain, SwapchainId::KIND).map(drop)
    }

    fn resize_swapchain(
        &mut self,
        swapchain: SwapchainId,
        width: u32,
        height: u32,
        format: Option<ColorFormat>,
    ) -> GraphicsResult<()> {
        let chain = lookup_mut(&mut self.swapchains, &swapchain, SwapchainId::KIND)?;
        let mut desc = chain.desc;
        desc.width = width;
        desc.height = height;
        if let Some(format) = format {
            desc.format = format;
        }
        desc.validate()?;
        chain.backbuffer = vec![0; desc.format.surface_bytes(width, height)?];
        chain.desc = desc;
        Ok(())
    }

    fn swapchain_desc(&self, swapchain: SwapchainId) -> GraphicsResult<SwapchainDesc> {
        lookup(&self.swapchains, &swapchain, SwapchainId::KIND).map(|chain| chain.desc)
    }

    fn swapchain_color_space(&mut self, swapchain: SwapchainId) -> GraphicsResult<ColorSpace> {
        let chain = lookup(&self.swapchains, &swapchain, SwapchainId::KIND)?;
        Ok(if chain.desc.format.is_float() {
            ColorSpace::Rec709Extended
        } else {
            ColorSpace::Srgb
        })
    }

    fn is_present_ready(&self, swapchain: SwapchainId) -> GraphicsResult<bool> {
        lookup(&self.swapchains, &swapchain, SwapchainId::KIND).map(|_| true)
    }

    fn create_texture(&mut self, desc: &TextureDesc, data: &[&[u8]]) -> GraphicsResult<TextureId> {
        desc.validate()?;
        let texture = SoftTexture::new(*desc, data, self.token())?;
        Ok(self.insert_texture(texture))
    }

    fn destroy_texture(&mut self, texture: TextureId) -> GraphicsResult<()> {
        let entry = self.texture(texture)?;
        if entry.mapped {
            return Err(violation(GraphicsError::ResourceBusy(format!(
                "texture {} is mapped",
                texture.raw()
            ))));
        }
        if entry.dc_held {
            return Err(violation(GraphicsError::ResourceBusy(format!(
                "texture {} still holds its GDI DC",
                texture.raw()
            ))));
        }
        if self.duplicators.values().any(|d| d.texture == Some(texture)) {
            return Err(violation(GraphicsError::ResourceBusy(format!(
                "texture {} is owned by a duplicator",
                texture.raw()
            ))));
        }
        let entry = remove(&mut self.textures, &texture, TextureId::KIND)?;
        if entry.held_key.is_some()
            && let Some(mutex) = entry.shared_surface().and_then(|s| s.keyed_mutex.as_ref())
        {
            log::warn!("texture {} destroyed while holding its keyed mutex", texture.raw());
            mutex.abandon();
        }
        Ok(())
    }

    fn texture_info(&self, texture: TextureId) -> GraphicsResult<TextureInfo> {
        self.texture(texture).map(SoftTexture::info)
    }

    fn texture_obj(&self, texture: TextureId) -> GraphicsResult<NativeObject> {
        let entry = self.texture(texture)?;
        Ok(match entry.shared_surface() {
            Some(surface) => NativeObject(surface.handle() as usize),
            None => entry.object,
        })
    }

    fn map_texture(&mut self, texture: TextureId) -> GraphicsResult<u32> {
        let entry = self.texture_mut(texture)?;
        if !entry.desc.flags.contains(TextureFlags::DYNAMIC) {
            return Err(violation(GraphicsError::MapViolation(format!(
                "texture {} was not created dynamic",
                texture.raw()
            ))));
        }
        if entry.mapped {
            return Err(violation(GraphicsError::MapViolation(format!(
                "texture {} is already mapped",
                texture.raw()
            ))));
        }
        let linesize = entry.linesize()?;
        entry.mapped = true;
        u32::try_from(linesize).map_err(|_| GraphicsError::BufferOverflow)
    }

    fn texture_mapped_data(&mut self, texture: TextureId) -> GraphicsResult<&mut [u8]> {
        let entry = self.texture_mut(texture)?;
        if !entry.mapped {
            return Err(GraphicsError::MapViolation(format!(
                "texture {} is not mapped",
                texture.raw()
            )));
        }
        entry
            .local_level0_mut()
            .ok_or_else(|| GraphicsError::MapViolation("shared textures cannot be mapped".into()))
    }

    fn unmap_texture(&mut self, texture: TextureId) -> GraphicsResult<()> {
        let entry = self.texture_mut(texture)?;
        if !std::mem::take(&mut entry.mapped) {
            return Err(violation(GraphicsError::MapViolation(format!(
                "texture {} unmapped without a map",
                texture.raw()
            ))));
        }
        Ok(())
    }

    fn create_planar(
        &mut self,
        format: PlanarFormat,
        width: u32,
        height: u32,
        flags: TextureFlags,
    ) -> GraphicsResult<(TextureId, TextureId)> {
        if width % 2 != 0 || height % 2 != 0 {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "{format:?} textures need even dimensions, got {width}x{height}"
            )));
        }
        let (luma_format, chroma_format) = format.plane_formats();
        let luma_desc = TextureDesc::texture_2d(width, height, luma_format).with_flags(flags);
        let chroma_desc =
            TextureDesc::texture_2d(width / 2, height / 2, chroma_format).with_flags(flags);
        luma_desc.validate()?;
        chroma_desc.validate()?;

        let chroma = SoftTexture::new(chroma_desc, &[], self.token())?;
        let mut luma = SoftTexture::new(luma_desc, &[], self.token())?;
        let chroma_id = self.insert_texture(chroma);
        luma.planar = Some((format, chroma_id));
        let luma_id = self.insert_texture(luma);
        Ok((luma_id, chroma_id))
    }

    fn planar_available(&self, _format: PlanarFormat) -> bool {
        true
    }

    fn create_stagesurface(
        &mut self,
        width: u32,
        height: u32,
        format: ColorFormat,
    ) -> GraphicsResult<StageSurfaceId> {
        if width == 0 || height == 0 {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "stage surface size must be non-zero, got {width}x{height}"
            )));
        }
        let linesize = format.row_bytes(width)?;
        let bytes = format.surface_bytes(width, height)?;
        let info = StageSurfaceInfo {
            width,
            height,
            format,
            planar: None,
        };
        Ok(self.insert_stagesurface(info, bytes, linesize))
    }

    fn destroy_stagesurface(&mut self, surface: StageSurfaceId) -> GraphicsResult<()> {
        let entry = lookup(&self.stage_surfaces, &surface, StageSurfaceId::KIND)?;
        if entry.mapped {
            return Err(violation(GraphicsError::ResourceBusy(format!(
                "stage surface {} is mapped",
                surface.raw()
            ))));
        }
        remove(&mut self.stage_surfaces, &surface, StageSurfaceId::KIND).map(drop)
    }

    fn stagesurface_info(&self, surface: StageSurfaceId) -> GraphicsResult<StageSurfaceInfo> {
        lookup(&self.stage_surfaces, &surface, StageSurfaceId::KIND).map(|s| s.info)
    }

    fn map_stagesurface(&mut self, surface: StageSurfaceId) -> GraphicsResult<u32> {
        let entry = lookup_mut(&mut self.stage_surfaces, &surface, StageSurfaceId::KIND)?;
        if entry.mapped {
            return Err(violation(GraphicsError::MapViolation(format!(
                "stage surface {} is already mapped",
                surface.raw()
            ))));
        }
        entry.mapped = true;
        u32::try_from(entry.linesize).map_err(|_| GraphicsError::BufferOverflow)
    }

    fn stagesurface_mapped_data(&self, surface: StageSurfaceId) -> GraphicsResult<&[u8]> {
        let entry = lookup(&self.stage_surfaces, &surface, StageSurfaceId::KIND)?;
        if !entry.mapped {
            return Err(GraphicsError::MapViolation(format!(
                "stage surface {} is not mapped",
                surface.raw()
            )));
        }
        Ok(&entry.data)
    }

    fn unmap_stagesurface(&mut self, surface: StageSurfaceId) -> GraphicsResult<()> {
        let entry = lookup_mut(&mut self.stage_surfaces, &surface, StageSurfaceId::KIND)?;
        if !std::mem::take(&mut entry.mapped) {
            return Err(violation(GraphicsError::MapViolation(format!(
                "stage surface {} unmapped without a map",
                surface.raw()
            ))));
        }
        Ok(())
    }

    fn create_zstencil(
        &mut self,
        width: u32,
        height: u32,
        format: ZStencilFormat,
    ) -> GraphicsResult<ZStencilId> {
        if width == 0 || height == 0 || format == ZStencilFormat::None {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "invalid z-stencil buffer {width}x{height} {format:?}"
            )));
        }
        let texels = width as usize * height as usize;
        let id = ZStencilId::from_raw(self.alloc_id());
        let zstencil = SoftZStencil {
            info: ZStencilInfo {
                width,
                height,
                format,
            },
            depth: vec![1.0; texels],
            stencil: if format.has_stencil() {
                vec![0; texels]
            } else {
                Vec::new()
            },
            _token: self.token(),
        };
        self.zstencils.insert(id, zstencil);
        Ok(id)
    }

    fn destroy_zstencil(&mut self, zstencil: ZStencilId) -> GraphicsResult<()> {
        remove(&mut self.zstencils, &zstencil, ZStencilId::KIND).map(drop)
    }

    fn zstencil_info(&self, zstencil: ZStencilId) -> GraphicsResult<ZStencilInfo> {
        lookup(&self.zstencils, &zstencil, ZStencilId::KIND).map(|z| z.info)
    }

    fn create_sampler(&mut self, info: &SamplerInfo) -> GraphicsResult<SamplerId> {
        info.validate()?;
        let id = SamplerId::from_raw(self.alloc_id());
        let sampler = SoftSampler {
            _info: *info,
            _token: self.token(),
        };
        self.samplers.insert(id, sampler);
        Ok(id)
    }

    fn destroy_sampler(&mut self, sampler: SamplerId) -> GraphicsResult<()> {
        remove(&mut self.samplers, &sampler, SamplerId::KIND).map(drop)
    }

    fn create_shader(
        &mut self,
        shader_type: ShaderType,
        source: &str,
        file: &str,
    ) -> GraphicsResult<ShaderId> {
        let decls = reflect_uniforms(source, file).map_err(GraphicsError::ShaderCompile)?;
        let id = ShaderId::from_raw(self.alloc_id());
        let shader = SoftShader {
            shader_type,
            params: ShaderParams::from_decls(decls),
            _token: self.token(),
        };
        self.shaders.insert(id, shader);
        Ok(id)
    }

    fn destroy_shader(&mut self, shader: ShaderId) -> GraphicsResult<()> {
        remove(&mut self.shaders, &shader, ShaderId::KIND).map(drop)
    }

    fn shader_type(&self, shader: ShaderId) -> GraphicsResult<ShaderType> {
        lookup(&self.shaders, &shader, ShaderId::KIND).map(|s| s.shader_type)
    }

    fn shader_params(&self, shader: ShaderId) -> GraphicsResult<&ShaderParams> {
        lookup(&self.shaders, &shader, ShaderId::KIND).map(|s| &s.params)
    }

    fn shader_params_mut(&mut self, shader: ShaderId) -> GraphicsResult<&mut ShaderParams> {
        lookup_mut(&mut self.shaders, &shader, ShaderId::KIND).map(|s| &mut s.params)
    }

    fn forget_texture_params(&mut self, texture: TextureId) {
        for shader in self.shaders.values_mut() {
            shader.params.forget_texture(texture);
        }
    }

    fn create_vertexbuffer(
        &mut self,
        data: VertexData,
        dynamic: bool,
    ) -> GraphicsResult<VertexBufferId> {
        data.validate()?;
        let id = VertexBufferId::from_raw(self.alloc_id());
        let buffer = SoftBuffer {
            gpu: data.clone(),
            cpu: data,
            dynamic,
            _token: self.token(),
        };
        self.vertex_buffers.insert(id, buffer);
        Ok(id)
    }

    fn destroy_vertexbuffer(&mut self, buffer: VertexBufferId) -> GraphicsResult<()> {
        remove(&mut self.vertex_buffers, &buffer, VertexBufferId::KIND).map(drop)
    }

    fn vertexbuffer_data(&self, buffer: VertexBufferId) -> GraphicsResult<&VertexData> {
        lookup(&self.vertex_buffers, &buffer, VertexBufferId::KIND).map(|b| &b.cpu)
    }

    fn vertexbuffer_data_mut(&mut self, buffer: VertexBufferId) -> GraphicsResult<&mut VertexData> {
        lookup_mut(&mut self.vertex_buffers, &buffer, VertexBufferId::KIND).map(|b| &mut b.cpu)
    }

    fn flush_vertexbuffer(
        &mut self,
        buffer: VertexBufferId,
        data: Option<&VertexData>,
    ) -> GraphicsResult<()> {
        let entry = lookup_mut(&mut self.vertex_buffers, &buffer, VertexBufferId::KIND)?;
        if !entry.dynamic {
            return Err(violation(GraphicsError::InvalidDescriptor(format!(
                "vertex buffer {} was not created dynamic",
                buffer.raw()
            ))));
        }
        let source = data.unwrap_or(&entry.cpu);
        source.validate()?;
        if !source.same_layout(&entry.gpu) {
            return Err(GraphicsError::InvalidDescriptor(
                "flushed vertex data does not match the buffer layout".into(),
            ));
        }
        entry.gpu = source.clone();
        Ok(())
    }

    fn create_indexbuffer(
        &mut self,
        data: IndexData,
        dynamic: bool,
    ) -> GraphicsResult<IndexBufferId> {
        let id = IndexBufferId::from_raw(self.alloc_id());
        let buffer = SoftBuffer {
            gpu: data.clone(),
            cpu: data,
            dynamic,
            _token: self.token(),
        };
        self.index_buffers.insert(id, buffer);
        Ok(id)
    }

    fn destroy_indexbuffer(&mut self, buffer: IndexBufferId) -> GraphicsResult<()> {
        remove(&mut self.index_buffers, &buffer, IndexBufferId::KIND).map(drop)
    }

    fn indexbuffer_data(&self, buffer: IndexBufferId) -> GraphicsResult<&IndexData> {
        lookup(&self.index_buffers, &buffer, IndexBufferId::KIND).map(|b| &b.cpu)
    }

    fn indexbuffer_data_mut(&mut self, buffer: IndexBufferId) -> GraphicsResult<&mut IndexData> {
        lookup_mut(&mut self.index_buffers, &buffer, IndexBufferId::KIND).map(|b| &mut b.cpu)
    }

    fn flush_indexbuffer(
        &mut self,
        buffer: IndexBufferId,
        data: Option<&IndexData>,
    ) -> GraphicsResult<()> {
        let entry = lookup_mut(&mut self.index_buffers, &buffer, IndexBufferId::KIND)?;
        if !entry.dynamic {
            return Err(violation(GraphicsError::InvalidDescriptor(format!(
                "index buffer {} was not created dynamic",
                buffer.raw()
            ))));
        }
        let source = data.unwrap_or(&entry.cpu);
        if source.index_type() != entry.gpu.index_type() || source.len() != entry.gpu.len() {
            return Err(GraphicsError::InvalidDescriptor(
                "flushed index data does not match the buffer size".into(),
            ));
        }
        entry.gpu = source.clone();
        Ok(())
    }

    fn create_timer(&mut self) -> GraphicsResult<TimerId> {
        let id = TimerId::from_raw(self.alloc_id());
        let timer = SoftTimer {
            begin: None,
            end: None,
            _token: self.token(),
        };
        self.timers.insert(id, timer);
        Ok(id)
    }

    fn destroy_timer(&mut self, timer: TimerId) -> GraphicsResult<()> {
        remove(&mut self.timers, &timer, TimerId::KIND).map(drop)
    }

    fn timer_begin(&mut self, timer: TimerId) -> GraphicsResult<()> {
        let entry = lookup_mut(&mut self.timers, &timer, TimerId::KIND)?;
        entry.begin = Some(Instant::now());
        entry.end = None;
        Ok(())
    }

    fn timer_end(&mut self, timer: TimerId) -> GraphicsResult<()> {
        let entry = lookup_mut(&mut self.timers, &timer, TimerId::KIND)?;
        if entry.begin.is_none() {
            return Err(violation(GraphicsError::ContextViolation(
                "timer ended before it began".into(),
            )));
        }
        entry.end = Some(Instant::now());
        Ok(())
    }

    fn timer_data(&mut self, timer: TimerId) -> GraphicsResult<Option<u64>> {
        let entry = lookup(&self.timers, &timer, TimerId::KIND)?;
        Ok(match (entry.begin, entry.end) {
            (Some(begin), Some(end)) => {
                Some(u64::try_from(end.duration_since(begin).as_nanos()).unwrap_or(u64::MAX))
            }
            _ => None,
        })
    }

    fn create_timer_range(&mut self) -> GraphicsResult<TimerRangeId> {
        let id = TimerRangeId::from_raw(self.alloc_id());
        let range = SoftTimerRange {
            active: false,
            resolved: false,
            _token: self.token(),
        };
        self.timer_ranges.insert(id, range);
        Ok(id)
    }

    fn destroy_timer_range(&mut self, range: TimerRangeId) -> GraphicsResult<()> {
        remove(&mut self.timer_ranges, &range, TimerRangeId::KIND).map(drop)
    }

    fn timer_range_begin(&mut self, range: TimerRangeId) -> GraphicsResult<()> {
        let entry = lookup_mut(&mut self.timer_ranges, &range, TimerRangeId::KIND)?;
        entry.active = true;
        entry.resolved = false;
        Ok(())
    }

    fn timer_range_end(&mut self, range: TimerRangeId) -> GraphicsResult<()> {
        let entry = lookup_mut(&mut self.timer_ranges, &range, TimerRangeId::KIND)?;
        if !std::mem::take(&mut entry.active) {
            return Err(violation(GraphicsError::ContextViolation(
                "timer range ended before it began".into(),
            )));
        }
        entry.resolved = true;
        Ok(())
    }

    fn timer_range_data(&mut self, range: TimerRangeId) -> GraphicsResult<Option<TimerRangeData>> {
        let entry = lookup(&self.timer_ranges, &range, TimerRangeId::KIND)?;
        Ok(entry.resolved.then_some(TimerRangeData {
            disjoint: false,
            frequency: TIMER_FREQUENCY,
        }))
    }

    fn copy_texture_region(
        &mut self,
        dst: TextureId,
        dst_x: u32,
        dst_y: u32,
        src: TextureId,
        src_x: u32,
        src_y: u32,
        width: u32,
        height: u32,
    ) -> GraphicsResult<()> {
        let source = self.texture(src)?;
        let dst_format = self.texture(dst)?.desc.format;
        if source.desc.format.linear_twin() != dst_format.linear_twin() {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "cannot copy {} into {}",
                source.desc.format.as_str(),
                dst_format.as_str()
            )));
        }
        let (src_w, src_h) = source.desc.level_extent(0);
        let width = if width == 0 { src_w.saturating_sub(src_x) } else { width };
        let height = if height == 0 { src_h.saturating_sub(src_y) } else { height };
        let pixels = source.read_region(src_x, src_y, width, height)?;
        self.texture_mut(dst)?
            .write_region(dst_x, dst_y, width, height, &pixels)
    }

    fn stage_texture(&mut self, dst: StageSurfaceId, src: TextureId) -> GraphicsResult<()> {
        let source = lookup(&self.textures, &src, TextureId::KIND)?;
        let stage = lookup_mut(&mut self.stage_surfaces, &dst, StageSurfaceId::KIND)?;
        if stage.mapped {
            return Err(violation(GraphicsError::MapViolation(format!(
                "stage surface {} is mapped during a stage",
                dst.raw()
            ))));
        }
        let (width, height) = source.desc.level_extent(0);
        if (width, height) != (stage.info.width, stage.info.height) {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "stage surface is {}x{}, texture is {width}x{height}",
                stage.info.width, stage.info.height
            )));
        }

        match stage.info.planar {
            Some(planar) => {
                let Some((format, chroma_id)) = source.planar.filter(|(f, _)| *f == planar) else {
                    return Err(GraphicsError::InvalidDescriptor(format!(
                        "texture {} is not a {planar:?} luma plane",
                        src.raw()
                    )));
                };
                let chroma = lookup(&self.textures, &chroma_id, TextureId::KIND)?;
                let luma_bytes = source.with_level(0, |b| b.len())?;
                source.with_level(0, |b| stage.data[..luma_bytes].copy_from_slice(b))?;
                chroma.with_level(0, |b| {
                    stage.data[luma_bytes..luma_bytes + b.len()].copy_from_slice(b)
                })?;
                log::trace!("staged {format:?} texture {}", src.raw());
            }
            None => {
                if source.desc.format.linear_twin() != stage.info.format.linear_twin() {
                    return Err(GraphicsError::InvalidDescriptor(format!(
                        "stage surface is {}, texture is {}",
                        stage.info.format.as_str(),
                        source.desc.format.as_str()
                    )));
                }
                let pixels = source.read_region(0, 0, width, height)?;
                stage.data[..pixels.len()].copy_from_slice(&pixels);
            }
        }
        Ok(())
    }

    fn begin_frame(&mut self) -> GraphicsResult<()> {
        Ok(())
    }

    fn begin_scene(&mut self) -> GraphicsResult<()> {
        self.in_scene = true;
        Ok(())
    }

    fn end_scene(&mut self) -> GraphicsResult<()> {
        if !std::mem::take(&mut self.in_scene) {
            return Err(violation(GraphicsError::ContextViolation(
                "end_scene without begin_scene".into(),
            )));
        }
        Ok(())
    }

    fn draw(
        &mut self,
        state: &PipelineState,
        swapchain: Option<SwapchainId>,
        mode: DrawMode,
        start: u32,
        count: u32,
    ) -> GraphicsResult<()> {
        let target_size = self.target_size(state.target, swapchain)?;
        self.check_shader(state.vertex_shader, ShaderType::Vertex)?;
        self.check_shader(state.pixel_shader, ShaderType::Pixel)?;
        if let Some(zstencil) = state.zstencil {
            let info = lookup(&self.zstencils, &zstencil, ZStencilId::KIND)?.info;
            if (info.width, info.height) != target_size {
                return Err(GraphicsError::InvalidDescriptor(
                    "z-stencil buffer size differs from the render target".into(),
                ));
            }
        }
        for bound in state.textures.iter().flatten() {
            self.texture(bound.texture)?;
        }

        let vertex_buffer = state.vertex_buffer.ok_or_else(|| {
            GraphicsError::InvalidDescriptor("no vertex buffer is loaded".into())
        })?;
        let vertices = lookup(&self.vertex_buffers, &vertex_buffer, VertexBufferId::KIND)?
            .gpu
            .len();
        let available = match state.index_buffer {
            Some(index_buffer) => {
                let indices = &lookup(&self.index_buffers, &index_buffer, IndexBufferId::KIND)?.gpu;
                let max_index = match indices {
                    IndexData::U16(v) => v.iter().map(|&i| i as usize).max(),
                    IndexData::U32(v) => v.iter().map(|&i| i as usize).max(),
                };
                if max_index.is_some_and(|i| i >= vertices) {
                    return Err(GraphicsError::InvalidDescriptor(
                        "index buffer references vertices beyond the vertex buffer".into(),
                    ));
                }
                indices.len()
            }
            None => vertices,
        };

        let start = start as usize;
        let count = if count == 0 {
            available.saturating_sub(start)
        } else {
            count as usize
        };
        if start + count > available {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "draw of {count} from {start} exceeds {available} elements"
            )));
        }
        if count < mode.min_vertices() as usize {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "{mode:?} needs at least {} vertices, got {count}",
                mode.min_vertices()
            )));
        }
        let order: Vec<usize> = match state.index_buffer {
            Some(index_buffer) => {
                match &lookup(&self.index_buffers, &index_buffer, IndexBufferId::KIND)?.gpu {
                    IndexData::U16(v) => v[start..start + count].iter().map(|&i| i as usize).collect(),
                    IndexData::U32(v) => v[start..start + count].iter().map(|&i| i as usize).collect(),
                }
            }
            None => (start..start + count).collect(),
        };
        let fill = self.uniform_color(state.pixel_shader);
        let shapes: Vec<(Shape, Vec4)> = {
            let vertices = &lookup(&self.vertex_buffers, &vertex_buffer, VertexBufferId::KIND)?.gpu;
            raster::assemble(mode, &order)
                .into_iter()
                .filter_map(|primitive| {
                    let points = primitive
                        .iter()
                        .map(|&i| {
                            let point = *vertices.points.get(i)?;
                            raster::to_screen(&state.view_proj, state.viewport, point)
                        })
                        .collect::<Option<Vec<_>>>()?;
                    let shape = match points.as_slice() {
                        [p] => Shape::Point(*p),
                        [a, b] => Shape::Line(*a, *b),
                        [a, b, c] => Shape::Triangle([*a, *b, *c]),
                        _ => return None,
                    };
                    let color = fill
                        .or_else(|| {
                            let first = *primitive.first()?;
                            vertices.colors.as_ref()?.get(first).copied().map(unpack_abgr)
                        })
                        .unwrap_or(Vec4::new(1.0, 1.0, 1.0, 1.0));
                    Some((shape, color))
                })
                .collect()
        };
        let written = self.rasterize_shapes(state, swapchain, target_size, &shapes)?;
        log::trace!("{mode:?} draw of {count} element(s) wrote {written} pixel(s)");

        for shader in [state.vertex_shader, state.pixel_shader].into_iter().flatten() {
            let shader_entry = lookup_mut(&mut self.shaders, &shader, ShaderId::KIND)?;
            let uploaded = shader_entry.params.take_changed();
            if !uploaded.is_empty() {
                log::trace!("shader {} uploads {} constant(s)", shader.raw(), uploaded.len());
            }
        }
        Ok(())
    }

    fn clear(
        &mut self,
        state: &PipelineState,
        swapchain: Option<SwapchainId>,
        request: &ClearRequest,
    ) -> GraphicsResult<()> {
        let target_size = self.target_size(state.target, swapchain)?;
        if request.flags.contains(ClearFlags::COLOR) {
            match state.target {
                RenderTarget::Swapchain => {
                    let id = swapchain.ok_or_else(|| {
                        GraphicsError::InvalidDescriptor("no swapchain is loaded".into())
                    })?;
                    let chain = lookup_mut(&mut self.swapchains, &id, SwapchainId::KIND)?;
                    let texel = encode_texel(chain.desc.format, request.color)?;
                    parallel::fill_texels(&mut chain.backbuffer, &texel);
                }
                RenderTarget::Texture(id) => {
                    let texture = self.texture_mut(id)?;
                    let texel = encode_texel(texture.desc.format, request.color)?;
                    texture.fill_layer(0, 0, &texel)?;
                }
                RenderTarget::CubeFace(id, side) => {
                    let texture = self.texture_mut(id)?;
                    if texture.desc.kind.texture_type() != TextureType::Cube {
                        return Err(GraphicsError::InvalidDescriptor(format!(
                            "texture {} is not a cube map",
                            id.raw()
                        )));
                    }
                    let texel = encode_texel(texture.desc.format, request.color)?;
                    texture.fill_layer(0, side.index() as u32, &texel)?;
                }
            }
        }

        if request.flags.intersects(ClearFlags::DEPTH | ClearFlags::STENCIL)
            && let Some(zstencil) = state.zstencil
        {
            let entry = lookup_mut(&mut self.zstencils, &zstencil, ZStencilId::KIND)?;
            if (entry.info.width, entry.info.height) != target_size {
                return Err(GraphicsError::InvalidDescriptor(
                    "z-stencil buffer size differs from the render target".into(),
                ));
            }
            if request.flags.contains(ClearFlags::DEPTH) {
                entry.depth.fill(request.depth);
            }
            if request.flags.contains(ClearFlags::STENCIL) {
                entry.stencil.fill(request.stencil);
            }
        }
        Ok(())
    }

    fn present(&mut self, swapchain: Option<SwapchainId>) -> GraphicsResult<()> {
        self.check_lost()?;
        if let Some(id) = swapchain {
            lookup(&self.swapchains, &id, SwapchainId::KIND)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> GraphicsResult<()> {
        self.check_lost()
    }

    fn debug_marker_begin(&mut self, name: &str, _color: [f32; 4]) {
        log::trace!("marker begin: {name}");
        self.markers.push(name.to_string());
    }

    fn debug_marker_end(&mut self) {
        if self.markers.pop().is_none() {
            log::warn!("debug marker ended without a matching begin");
        }
    }

    fn is_monitor_hdr(&self, monitor: &MonitorId) -> bool {
        self.desktop.is_monitor_hdr(monitor)
    }

    fn win32(&mut self) -> Option<&mut dyn Win32Interop> {
        (self.group == Some(PlatformGroup::Win32)).then_some(self as &mut dyn Win32Interop)
    }

    fn iosurface(&mut self) -> Option<&mut dyn IoSurfaceInterop> {
        (self.group == Some(PlatformGroup::IoSurface)).then_some(self as &mut dyn IoSurfaceInterop)
    }

    fn dmabuf(&mut self) -> Option<&mut dyn DmaBufInterop> {
        (self.group == Some(PlatformGroup::DmaBuf)).then_some(self as &mut dyn DmaBufInterop)
    }
}

impl Drop for SoftDevice {
    fn drop(&mut self) {
        self.duplicators.clear();
        log::debug!("soft device {:#x} destroyed", self.object.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::headless::HeadlessDesktop;

    fn device() -> SoftDevice {
        SoftDevice::new(
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicBool::new(false)),
            Arc::new(HeadlessDesktop::new()),
            Some(PlatformGroup::Win32),
        )
    }

    #[test]
    fn double_map_is_a_violation() -> GraphicsResult<()> {
        let mut dev = device();
        let desc = TextureDesc::texture_2d(4, 4, ColorFormat::Bgra).with_flags(TextureFlags::DYNAMIC);
        let tex = dev.create_texture(&desc, &[])?;
        assert_eq!(dev.map_texture(tex)?, 16);
        assert!(matches!(dev.map_texture(tex), Err(GraphicsError::MapViolation(_))));
        assert!(matches!(dev.destroy_texture(tex), Err(GraphicsError::ResourceBusy(_))));
        dev.unmap_texture(tex)?;
        assert!(matches!(dev.unmap_texture(tex), Err(GraphicsError::MapViolation(_))));
        dev.destroy_texture(tex)
    }

    #[test]
    fn static_textures_are_not_mappable() -> GraphicsResult<()> {
        let mut dev = device();
        let tex = dev.create_texture(&TextureDesc::texture_2d(4, 4, ColorFormat::Bgra), &[])?;
        assert!(matches!(dev.map_texture(tex), Err(GraphicsError::MapViolation(_))));
        Ok(())
    }

    #[test]
    fn staged_copy_matches_texture_contents() -> GraphicsResult<()> {
        let mut dev = device();
        let pixels: Vec<u8> = (0..32).collect();
        let tex = dev.create_texture(&TextureDesc::texture_2d(2, 4, ColorFormat::Rgba), &[&pixels])?;
        let stage = dev.create_stagesurface(2, 4, ColorFormat::Rgba)?;
        dev.stage_texture(stage, tex)?;
        assert_eq!(dev.map_stagesurface(stage)?, 8);
        assert_eq!(dev.stagesurface_mapped_data(stage)?, pixels.as_slice());
        dev.unmap_stagesurface(stage)?;

        let wrong = dev.create_stagesurface(4, 4, ColorFormat::Rgba)?;
        assert!(dev.stage_texture(wrong, tex).is_err());
        Ok(())
    }

    #[test]
    fn draw_validates_ranges_and_shaders() -> GraphicsResult<()> {
        let mut dev = device();
        let target = dev.create_texture(
            &TextureDesc::texture_2d(8, 8, ColorFormat::Rgba).with_flags(TextureFlags::RENDER_TARGET),
            &[],
        )?;
        let vs = dev.create_shader(ShaderType::Vertex, "uniform float4x4 ViewProj;", "vs")?;
        let ps = dev.create_shader(ShaderType::Pixel, "uniform texture2d image;", "ps")?;
        let vb = dev.create_vertexbuffer(
            VertexData {
                points: vec![Default::default(); 4],
                ..VertexData::default()
            },
            false,
        )?;

        let mut state = PipelineState {
            target: RenderTarget::Texture(target),
            vertex_shader: Some(vs),
            pixel_shader: Some(ps),
            vertex_buffer: Some(vb),
            ..PipelineState::default()
        };
        dev.draw(&state, None, DrawMode::TriStrip, 0, 0)?;
        assert!(dev.draw(&state, None, DrawMode::Tris, 2, 3).is_err());

        state.pixel_shader = Some(vs);
        assert!(dev.draw(&state, None, DrawMode::TriStrip, 0, 0).is_err());
        Ok(())
    }

    #[test]
    fn draw_fills_covered_pixels_with_the_uniform_color() -> GraphicsResult<()> {
        use crate::math::{Matrix4, Vec3};
        use crate::state::ColorMask;

        let mut dev = device();
        let target = dev.create_texture(
            &TextureDesc::texture_2d(4, 2, ColorFormat::Rgba).with_flags(TextureFlags::RENDER_TARGET),
            &[],
        )?;
        let vs = dev.create_shader(ShaderType::Vertex, "uniform float4x4 ViewProj;", "vs")?;
        let ps = dev.create_shader(ShaderType::Pixel, "uniform float4 color;", "ps")?;
        let params = dev.shader_params_mut(ps)?;
        let index = params
            .index_of("color")
            .ok_or(GraphicsError::InvalidHandle("shader parameter"))?;
        params.set(index, ShaderValue::Vec4(Vec4::new(1.0, 0.0, 0.0, 1.0)))?;
        let vb = dev.create_vertexbuffer(
            VertexData {
                points: vec![
                    Vec3::new(0.0, 0.0, 0.0),
                    Vec3::new(2.0, 0.0, 0.0),
                    Vec3::new(0.0, 2.0, 0.0),
                    Vec3::new(2.0, 2.0, 0.0),
                ],
                ..VertexData::default()
            },
            false,
        )?;

        let mut state = PipelineState {
            target: RenderTarget::Texture(target),
            viewport: Rect::new(0, 0, 4, 2),
            view_proj: Matrix4::ortho(0.0, 4.0, 0.0, 2.0, -1.0, 1.0),
            vertex_shader: Some(vs),
            pixel_shader: Some(ps),
            vertex_buffer: Some(vb),
            ..PipelineState::default()
        };
        dev.draw(&state, None, DrawMode::TriStrip, 0, 0)?;
        let drawn = dev.texture(target)?.with_level(0, <[u8]>::to_vec)?;
        for (i, px) in drawn.chunks(4).enumerate() {
            let expected: &[u8] = if i % 4 < 2 { &[255, 0, 0, 255] } else { &[0; 4] };
            assert_eq!(px, expected, "pixel {i}");
        }

        state.color_mask = ColorMask {
            red: false,
            green: false,
            blue: false,
            alpha: false,
        };
        state.viewport = Rect::new(0, 0, 8, 4);
        dev.draw(&state, None, DrawMode::TriStrip, 0, 0)?;
        assert_eq!(dev.texture(target)?.with_level(0, <[u8]>::to_vec)?, drawn);
        Ok(())
    }

    #[test]
    fn vertex_colors_fill_when_no_color_uniform() -> GraphicsResult<()> {
        let mut dev = device();
        let target = dev.create_texture(
            &TextureDesc::texture_2d(2, 2, ColorFormat::Bgra).with_flags(TextureFlags::RENDER_TARGET),
            &[],
        )?;
        let vs = dev.create_shader(ShaderType::Vertex, "uniform float4x4 ViewProj;", "vs")?;
        let ps = dev.create_shader(ShaderType::Pixel, "uniform texture2d image;", "ps")?;
        let vb = dev.create_vertexbuffer(
            VertexData {
                points: vec![Default::default(); 1],
                colors: Some(vec![0xff00_ff00]),
                ..VertexData::default()
            },
            false,
        )?;
        let state = PipelineState {
            target: RenderTarget::Texture(target),
            viewport: Rect::new(0, 0, 2, 2),
            vertex_shader: Some(vs),
            pixel_shader: Some(ps),
            vertex_buffer: Some(vb),
            ..PipelineState::default()
        };
        dev.draw(&state, None, DrawMode::Points, 0, 0)?;
        let level = dev.texture(target)?.with_level(0, <[u8]>::to_vec)?;
        assert_eq!(&level[12..16], &[0, 255, 0, 255]);
        assert!(level[..12].iter().all(|&b| b == 0));
        Ok(())
    }

    #[test]
    fn clear_fills_cube_face_only() -> GraphicsResult<()> {
        let mut dev = device();
        let cube = dev.create_texture(
            &TextureDesc::cube(2, ColorFormat::Rgba).with_flags(TextureFlags::RENDER_TARGET),
            &[],
        )?;
        let state = PipelineState {
            target: RenderTarget::CubeFace(cube, crate::state::CubeSide::NegativeY),
            ..PipelineState::default()
        };
        let request = ClearRequest {
            flags: ClearFlags::COLOR,
            color: crate::math::Vec4::new(1.0, 0.0, 0.0, 1.0),
            depth: 1.0,
            stencil: 0,
        };
        dev.clear(&state, None, &request)?;
        let level = dev.texture(cube)?.with_level(0, <[u8]>::to_vec)?;
        let face = 2 * 2 * 4;
        assert!(level[3 * face..4 * face].chunks(4).all(|px| px == [255, 0, 0, 255]));
        assert!(level[..3 * face].iter().all(|&b| b == 0));
        Ok(())
    }

    #[test]
    fn timers_resolve_after_end() -> GraphicsResult<()> {
        let mut dev = device();
        let timer = dev.create_timer()?;
        assert_eq!(dev.timer_data(timer)?, None);
        dev.timer_begin(timer)?;
        dev.timer_end(timer)?;
        assert!(dev.timer_data(timer)?.is_some());

        let range = dev.create_timer_range()?;
        assert!(dev.timer_range_end(range).is_err());
        dev.timer_range_begin(range)?;
        assert_eq!(dev.timer_range_data(range)?, None);
        dev.timer_range_end(range)?;
        assert_eq!(
            dev.timer_range_data(range)?.map(|d| d.frequency),
            Some(TIMER_FREQUENCY)
        );
        Ok(())
    }

    #[test]
    fn planar_textures_need_even_sizes() -> GraphicsResult<()> {
        let mut dev = device();
        assert!(dev.create_planar(PlanarFormat::Nv12, 3, 2, TextureFlags::empty()).is_err());
        let (luma, chroma) = dev.create_planar(PlanarFormat::P010, 4, 2, TextureFlags::RENDER_TARGET)?;
        assert_eq!(dev.texture_info(luma)?.format, ColorFormat::R16);
        assert_eq!(dev.texture_info(chroma)?.width, 2);
        Ok(())
    }
}
