//! Device front end.
//!
//! A [`Device`] owns one backend device plus the immediate-mode pipeline
//! state. Every operation is issued through a [`GraphicsContext`] obtained
//! from [`Device::enter_context`]; dropping the guard leaves the context.

mod context;
mod interop;
mod resources;
mod shaders;
mod stack;

use std::cell::Cell;
use std::marker::PhantomData;

use rustc_hash::FxHashMap;

use crate::backend::DeviceBackend;
use crate::error::{GraphicsError, GraphicsResult, violation};
use crate::exports::GraphicsExports;
use crate::format::{ColorSpace, PlanarFormat, TextureFlags, TextureType};
use crate::math::{Matrix4, Vec4};
use crate::monitor::MonitorId;
use crate::resource::{
    IndexBufferId, NativeObject, SamplerId, SamplerInfo, ShaderId, SwapchainDesc, SwapchainId,
    TextureId, VertexBufferId, ZStencilId,
};
use crate::shader::{ShaderType, ShaderValue, VIEW_PROJ_PARAM};
use crate::state::{
    BlendOp, BlendState, BlendType, BoundTexture, ClearFlags, ClearRequest, CubeSide, CullMode,
    DepthTest, DrawMode, MAX_TEXTURE_UNITS, PipelineState, Rect, RenderTarget, StencilOpType,
    StencilSide,
};
use crate::sync::DeviceLossRegistry;

pub use context::ContextTracker;
pub use interop::SYNC_INFINITE;
pub use resources::{StageMap, TextureMap};

use stack::StateStack;

/// One logical GPU device. `Send` so it can be created on one thread and
/// rendered from another, but never shared.
pub struct Device {
    exports: GraphicsExports,
    adapter: u32,
    backend: Box<dyn DeviceBackend>,
    tracker: ContextTracker,
    state: PipelineState,
    projection: Matrix4,
    projections: StateStack<Matrix4>,
    viewports: StateStack<Rect>,
    blends: StateStack<BlendState>,
    swapchain: Option<SwapchainId>,
    loss: DeviceLossRegistry,
    live: FxHashMap<&'static str, i64>,
    default_sampler: Option<SamplerId>,
    _not_sync: PhantomData<Cell<()>>,
}

impl Device {
    /// Creates a device on `adapter` of the backend behind `exports`.
    pub fn create(exports: &GraphicsExports, adapter: u32) -> GraphicsResult<Self> {
        exports.check_version()?;
        let module = exports.module()?;
        let backend = module.create_device(adapter, exports.platform_group())?;
        log::debug!(
            "created {} device on adapter {adapter} (group {:?})",
            module.name(),
            exports.platform_group()
        );
        Ok(Self {
            exports: exports.clone(),
            adapter,
            backend,
            tracker: ContextTracker::new(),
            state: PipelineState::default(),
            projection: Matrix4::IDENTITY,
            projections: StateStack::new("projection"),
            viewports: StateStack::new("viewport"),
            blends: StateStack::new("blend state"),
            swapchain: None,
            loss: DeviceLossRegistry::default(),
            live: FxHashMap::default(),
            default_sampler: None,
            _not_sync: PhantomData,
        })
    }

    pub fn enter_context(&mut self) -> GraphicsResult<GraphicsContext<'_>> {
        self.tracker.enter()?;
        Ok(GraphicsContext { device: self })
    }

    pub fn context_depth(&self) -> usize {
        self.tracker.depth()
    }

    pub fn exports(&self) -> &GraphicsExports {
        &self.exports
    }

    pub fn adapter(&self) -> u32 {
        self.adapter
    }

    /// Resources created through this device and not yet destroyed.
    pub fn live_resources(&self) -> usize {
        self.live.values().map(|&n| n.max(0) as usize).sum()
    }

    fn track(&mut self, kind: &'static str, delta: i64) {
        *self.live.entry(kind).or_default() += delta;
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Some(sampler) = self.default_sampler.take()
            && self.backend.destroy_sampler(sampler).is_ok()
        {
            self.track(SamplerId::KIND, -1);
        }
        if self.tracker.depth() > 0 {
            log::warn!(
                "device dropped inside a context (depth {})",
                self.tracker.depth()
            );
        }
        let mut leaked: Vec<_> = self.live.iter().filter(|(_, n)| **n > 0).collect();
        leaked.sort();
        for (kind, count) in leaked {
            log::warn!("device dropped with {count} live {kind} resource(s)");
        }
        log::debug!("device on adapter {} destroyed", self.adapter);
    }
}

/// Scoped entry into a device context. All device operations live here.
pub struct GraphicsContext<'d> {
    device: &'d mut Device,
}

impl Drop for GraphicsContext<'_> {
    fn drop(&mut self) {
        let _ = self.device.tracker.leave();
    }
}

impl GraphicsContext<'_> {
    /// Re-enters the same device; the nested guard must drop first.
    pub fn nested(&mut self) -> GraphicsResult<GraphicsContext<'_>> {
        self.device.enter_context()
    }

    pub fn depth(&self) -> usize {
        self.device.tracker.depth()
    }

    pub fn device_obj(&self) -> NativeObject {
        self.device.backend.device_obj()
    }

    pub fn adapter(&self) -> u32 {
        self.device.adapter
    }

    /// Runs the loss flow when `result` reports a lost device; the call
    /// that observed the loss then succeeds.
    fn recover_from_loss(&mut self, result: GraphicsResult<()>) -> GraphicsResult<()> {
        match result {
            Err(GraphicsError::DeviceLost) => {
                log::error!(
                    "graphics device lost; notifying {} subscriber(s)",
                    self.device.loss.len()
                );
                self.device.loss.notify_release();
                let object = self.device.backend.rebuild()?;
                self.device.loss.notify_rebuild(object);
                Ok(())
            }
            other => other,
        }
    }

    // -- swapchains --------------------------------------------------------

    pub fn swapchain_create(&mut self, desc: &SwapchainDesc) -> GraphicsResult<SwapchainId> {
        let id = self.device.backend.create_swapchain(desc)?;
        self.device.track(SwapchainId::KIND, 1);
        Ok(id)
    }

    pub fn swapchain_destroy(&mut self, swapchain: SwapchainId) -> GraphicsResult<()> {
        self.device.backend.destroy_swapchain(swapchain)?;
        self.device.track(SwapchainId::KIND, -1);
        if self.device.swapchain == Some(swapchain) {
            self.device.swapchain = None;
        }
        Ok(())
    }

    /// Makes `swapchain` the default render surface.
    pub fn load_swapchain(&mut self, swapchain: Option<SwapchainId>) -> GraphicsResult<()> {
        if let Some(id) = swapchain {
            let desc = self.device.backend.swapchain_desc(id)?;
            if self.device.state.target == RenderTarget::Swapchain {
                self.device.state.target_color_space =
                    self.device.backend.swapchain_color_space(id)?;
            }
            if self.device.state.viewport.is_empty() {
                self.device.state.viewport = Rect::new(0, 0, desc.width as i32, desc.height as i32);
            }
        }
        self.device.swapchain = swapchain;
        Ok(())
    }

    /// Re-targets the loaded swapchain to `width` x `height`.
    pub fn resize(&mut self, width: u32, height: u32) -> GraphicsResult<()> {
        let id = self
            .device
            .swapchain
            .ok_or_else(|| GraphicsError::InvalidDescriptor("no swapchain is loaded".into()))?;
        self.device.backend.resize_swapchain(id, width, height, None)?;
        log::debug!("swapchain {} resized to {width}x{height}", id.raw());
        self.update_color_space()
    }

    /// Size of the loaded swapchain, `(0, 0)` when none is loaded.
    pub fn size(&self) -> (u32, u32) {
        self.device
            .swapchain
            .and_then(|id| self.device.backend.swapchain_desc(id).ok())
            .map_or((0, 0), |desc| (desc.width, desc.height))
    }

    pub fn width(&self) -> u32 {
        self.size().0
    }

    pub fn height(&self) -> u32 {
        self.size().1
    }

    pub fn color_space(&self) -> ColorSpace {
        self.device.state.target_color_space
    }

    /// Re-reads the swapchain color space after a monitor or HDR change.
    pub fn update_color_space(&mut self) -> GraphicsResult<()> {
        if self.device.state.target == RenderTarget::Swapchain
            && let Some(id) = self.device.swapchain
        {
            self.device.state.target_color_space =
                self.device.backend.swapchain_color_space(id)?;
        }
        Ok(())
    }

    pub fn is_present_ready(&self) -> GraphicsResult<bool> {
        match self.device.swapchain {
            Some(id) => self.device.backend.is_present_ready(id),
            None => Ok(false),
        }
    }

    pub fn enable_framebuffer_srgb(&mut self, enable: bool) {
        self.device.state.framebuffer_srgb = enable;
    }

    pub fn framebuffer_srgb_enabled(&self) -> bool {
        self.device.state.framebuffer_srgb
    }

    // -- render targets ----------------------------------------------------

    pub fn render_target(&self) -> RenderTarget {
        self.device.state.target
    }

    pub fn zstencil_target(&self) -> Option<ZStencilId> {
        self.device.state.zstencil
    }

    /// `None` targets the loaded swapchain.
    pub fn set_render_target(
        &mut self,
        texture: Option<TextureId>,
        zstencil: Option<ZStencilId>,
    ) -> GraphicsResult<()> {
        let space = match texture {
            Some(_) => ColorSpace::Srgb,
            None => match self.device.swapchain {
                Some(id) => self.device.backend.swapchain_color_space(id)?,
                None => ColorSpace::Srgb,
            },
        };
        self.set_render_target_with_color_space(texture, zstencil, space)
    }

    pub fn set_render_target_with_color_space(
        &mut self,
        texture: Option<TextureId>,
        zstencil: Option<ZStencilId>,
        space: ColorSpace,
    ) -> GraphicsResult<()> {
        let target = match texture {
            Some(id) => {
                self.check_render_target(id, TextureType::Texture2D)?;
                RenderTarget::Texture(id)
            }
            None => RenderTarget::Swapchain,
        };
        self.bind_target(target, zstencil, space)
    }

    pub fn set_cube_render_target(
        &mut self,
        cube: TextureId,
        side: CubeSide,
        zstencil: Option<ZStencilId>,
    ) -> GraphicsResult<()> {
        self.check_render_target(cube, TextureType::Cube)?;
        self.bind_target(RenderTarget::CubeFace(cube, side), zstencil, ColorSpace::Srgb)
    }

    fn check_render_target(&self, texture: TextureId, expected: TextureType) -> GraphicsResult<()> {
        let info = self.device.backend.texture_info(texture)?;
        if !info.flags.contains(TextureFlags::RENDER_TARGET) {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "texture {} was not created as a render target",
                texture.raw()
            )));
        }
        if info.texture_type != expected {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "texture {} is {:?}, expected {expected:?}",
                texture.raw(),
                info.texture_type
            )));
        }
        Ok(())
    }

    fn bind_target(
        &mut self,
        target: RenderTarget,
        zstencil: Option<ZStencilId>,
        space: ColorSpace,
    ) -> GraphicsResult<()> {
        if let Some(id) = zstencil {
            self.device.backend.zstencil_info(id)?;
        }
        let state = &mut self.device.state;
        state.target = target;
        state.zstencil = zstencil;
        state.target_color_space = space;
        Ok(())
    }

    // -- frame -------------------------------------------------------------

    pub fn begin_frame(&mut self) -> GraphicsResult<()> {
        self.device.backend.begin_frame()
    }

    pub fn begin_scene(&mut self) -> GraphicsResult<()> {
        self.device.backend.begin_scene()
    }

    pub fn end_scene(&mut self) -> GraphicsResult<()> {
        self.device.backend.end_scene()
    }

    /// Draws `count` vertices (0 = all) from `start` with the bound
    /// pipeline. The current projection is published to the vertex
    /// shader's `ViewProj` parameter first.
    pub fn draw(&mut self, mode: DrawMode, start: u32, count: u32) -> GraphicsResult<()> {
        let view_proj = self.device.projection;
        self.device.state.view_proj = view_proj;
        if let Some(vs) = self.device.state.vertex_shader {
            let params = self.device.backend.shader_params_mut(vs)?;
            if let Some(index) = params.index_of(VIEW_PROJ_PARAM) {
                params.set(index, ShaderValue::Matrix4(view_proj))?;
            }
        }
        let device = &mut *self.device;
        device
            .backend
            .draw(&device.state, device.swapchain, mode, start, count)
    }

    pub fn clear(
        &mut self,
        flags: ClearFlags,
        color: Vec4,
        depth: f32,
        stencil: u8,
    ) -> GraphicsResult<()> {
        let request = ClearRequest {
            flags,
            color,
            depth,
            stencil,
        };
        let device = &mut *self.device;
        device.backend.clear(&device.state, device.swapchain, &request)
    }

    pub fn present(&mut self) -> GraphicsResult<()> {
        let result = self.device.backend.present(self.device.swapchain);
        self.recover_from_loss(result)
    }

    pub fn flush(&mut self) -> GraphicsResult<()> {
        let result = self.device.backend.flush();
        self.recover_from_loss(result)
    }

    pub fn debug_marker_begin(&mut self, name: &str, color: [f32; 4]) {
        self.device.backend.debug_marker_begin(name, color);
    }

    pub fn debug_marker_end(&mut self) {
        self.device.backend.debug_marker_end();
    }

    // -- immediate-mode state ----------------------------------------------

    pub fn enable_blending(&mut self, enable: bool) {
        self.device.state.blend.enabled = enable;
    }

    pub fn enable_depth_test(&mut self, enable: bool) {
        self.device.state.depth_stencil.depth_enabled = enable;
    }

    pub fn enable_stencil_test(&mut self, enable: bool) {
        self.device.state.depth_stencil.stencil_enabled = enable;
    }

    pub fn enable_stencil_write(&mut self, enable: bool) {
        self.device.state.depth_stencil.stencil_write = enable;
    }

    pub fn enable_color(&mut self, red: bool, green: bool, blue: bool, alpha: bool) {
        let mask = &mut self.device.state.color_mask;
        mask.red = red;
        mask.green = green;
        mask.blue = blue;
        mask.alpha = alpha;
    }

    pub fn set_cull_mode(&mut self, mode: CullMode) {
        self.device.state.cull_mode = mode;
    }

    pub fn cull_mode(&self) -> CullMode {
        self.device.state.cull_mode
    }

    pub fn blend_function(&mut self, src: BlendType, dest: BlendType) {
        self.blend_function_separate(src, dest, src, dest);
    }

    pub fn blend_function_separate(
        &mut self,
        src_color: BlendType,
        dest_color: BlendType,
        src_alpha: BlendType,
        dest_alpha: BlendType,
    ) {
        let blend = &mut self.device.state.blend;
        blend.src_color = src_color;
        blend.dest_color = dest_color;
        blend.src_alpha = src_alpha;
        blend.dest_alpha = dest_alpha;
    }

    pub fn blend_op(&mut self, op: BlendOp) {
        self.device.state.blend.op = op;
    }

    pub fn blend_state(&self) -> BlendState {
        self.device.state.blend
    }

    pub fn blend_state_push(&mut self) {
        let blend = self.device.state.blend;
        self.device.blends.push(blend);
    }

    pub fn blend_state_pop(&mut self) -> GraphicsResult<()> {
        self.device.state.blend = self.device.blends.pop()?;
        Ok(())
    }

    pub fn reset_blend_state(&mut self) {
        self.device.state.blend = BlendState::default();
    }

    pub fn depth_function(&mut self, test: DepthTest) {
        self.device.state.depth_stencil.depth_func = test;
    }

    pub fn stencil_function(&mut self, side: StencilSide, test: DepthTest) {
        self.device.state.depth_stencil.set_stencil_function(side, test);
    }

    pub fn stencil_op(
        &mut self,
        side: StencilSide,
        fail: StencilOpType,
        zfail: StencilOpType,
        zpass: StencilOpType,
    ) {
        self.device
            .state
            .depth_stencil
            .set_stencil_op(side, fail, zfail, zpass);
    }

    pub fn pipeline_state(&self) -> &PipelineState {
        &self.device.state
    }

    // -- viewport, scissor, projection ---------------------------------------

    pub fn set_viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.device.state.viewport = Rect::new(x, y, width, height);
    }

    pub fn viewport(&self) -> Rect {
        self.device.state.viewport
    }

    pub fn viewport_push(&mut self) {
        let viewport = self.device.state.viewport;
        self.device.viewports.push(viewport);
    }

    pub fn viewport_pop(&mut self) -> GraphicsResult<()> {
        self.device.state.viewport = self.device.viewports.pop()?;
        Ok(())
    }

    /// `None` disables scissoring.
    pub fn set_scissor_rect(&mut self, rect: Option<Rect>) {
        self.device.state.scissor = rect;
    }

    pub fn ortho(&mut self, left: f32, right: f32, top: f32, bottom: f32, near: f32, far: f32) {
        self.device.projection = Matrix4::ortho(left, right, top, bottom, near, far);
    }

    pub fn frustum(&mut self, left: f32, right: f32, top: f32, bottom: f32, near: f32, far: f32) {
        self.device.projection = Matrix4::frustum(left, right, top, bottom, near, far);
    }

    pub fn projection(&self) -> Matrix4 {
        self.device.projection
    }

    pub fn projection_push(&mut self) {
        let projection = self.device.projection;
        self.device.projections.push(projection);
    }

    pub fn projection_pop(&mut self) -> GraphicsResult<()> {
        self.device.projection = self.device.projections.pop()?;
        Ok(())
    }

    // -- pipeline bindings -------------------------------------------------

    pub fn load_vertexbuffer(&mut self, buffer: Option<VertexBufferId>) -> GraphicsResult<()> {
        if let Some(id) = buffer {
            self.device.backend.vertexbuffer_data(id)?;
        }
        self.device.state.vertex_buffer = buffer;
        Ok(())
    }

    pub fn load_indexbuffer(&mut self, buffer: Option<IndexBufferId>) -> GraphicsResult<()> {
        if let Some(id) = buffer {
            self.device.backend.indexbuffer_data(id)?;
        }
        self.device.state.index_buffer = buffer;
        Ok(())
    }

    pub fn load_texture(&mut self, texture: Option<TextureId>, unit: usize) -> GraphicsResult<()> {
        self.bind_texture(texture, unit, false)
    }

    /// Binds `texture` with an sRGB view.
    pub fn load_texture_srgb(
        &mut self,
        texture: Option<TextureId>,
        unit: usize,
    ) -> GraphicsResult<()> {
        self.bind_texture(texture, unit, true)
    }

    fn bind_texture(
        &mut self,
        texture: Option<TextureId>,
        unit: usize,
        srgb: bool,
    ) -> GraphicsResult<()> {
        check_unit(unit)?;
        if let Some(id) = texture {
            self.device.backend.texture_info(id)?;
        }
        self.device.state.textures[unit] = texture.map(|texture| BoundTexture { texture, srgb });
        Ok(())
    }

    pub fn load_samplerstate(
        &mut self,
        sampler: Option<SamplerId>,
        unit: usize,
    ) -> GraphicsResult<()> {
        check_unit(unit)?;
        self.device.state.samplers[unit] = sampler;
        Ok(())
    }

    /// Binds the device's linear clamp sampler, creating it on first use.
    pub fn load_default_samplerstate(&mut self, unit: usize) -> GraphicsResult<()> {
        check_unit(unit)?;
        let sampler = match self.device.default_sampler {
            Some(sampler) => sampler,
            None => {
                let sampler = self.device.backend.create_sampler(&SamplerInfo::default())?;
                self.device.track(SamplerId::KIND, 1);
                self.device.default_sampler = Some(sampler);
                sampler
            }
        };
        self.device.state.samplers[unit] = Some(sampler);
        Ok(())
    }

    pub fn load_vertexshader(&mut self, shader: Option<ShaderId>) -> GraphicsResult<()> {
        self.bind_shader(shader, ShaderType::Vertex)
    }

    pub fn load_pixelshader(&mut self, shader: Option<ShaderId>) -> GraphicsResult<()> {
        self.bind_shader(shader, ShaderType::Pixel)
    }

    fn bind_shader(&mut self, shader: Option<ShaderId>, expected: ShaderType) -> GraphicsResult<()> {
        if let Some(id) = shader {
            let actual = self.device.backend.shader_type(id)?;
            if actual != expected {
                return Err(GraphicsError::InvalidDescriptor(format!(
                    "shader {} is a {actual:?} shader, expected {expected:?}",
                    id.raw()
                )));
            }
        }
        match expected {
            ShaderType::Vertex => self.device.state.vertex_shader = shader,
            ShaderType::Pixel => self.device.state.pixel_shader = shader,
        }
        Ok(())
    }

    pub fn vertex_shader(&self) -> Option<ShaderId> {
        self.device.state.vertex_shader
    }

    pub fn pixel_shader(&self) -> Option<ShaderId> {
        self.device.state.pixel_shader
    }

    // -- capability queries --------------------------------------------------

    pub fn nv12_available(&self) -> bool {
        self.device.backend.planar_available(PlanarFormat::Nv12)
    }

    pub fn p010_available(&self) -> bool {
        self.device.backend.planar_available(PlanarFormat::P010)
    }

    pub fn is_monitor_hdr(&self, monitor: &MonitorId) -> bool {
        self.device.backend.is_monitor_hdr(monitor)
    }
}

fn check_unit(unit: usize) -> GraphicsResult<()> {
    if unit >= MAX_TEXTURE_UNITS {
        return Err(violation(GraphicsError::InvalidDescriptor(format!(
            "texture unit {unit} exceeds the {MAX_TEXTURE_UNITS} available"
        ))));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::desktop::DesktopSource;
    use crate::exports::{PlatformGroup, load_graphics_imports, load_graphics_imports_for};
    use crate::format::{ColorFormat, ZStencilFormat};
    use crate::math::Vec3;
    use crate::platform::headless::HeadlessDesktop;
    use crate::resource::{TextureDesc, VertexData};
    use crate::soft::SoftModule;
    use crate::window::WindowId;
    use std::sync::Arc;

    pub(crate) fn soft_device() -> GraphicsResult<(Arc<SoftModule>, Device)> {
        soft_device_on(Arc::new(HeadlessDesktop::new()), PlatformGroup::Win32)
    }

    pub(crate) fn soft_device_on(
        desktop: Arc<dyn DesktopSource>,
        group: PlatformGroup,
    ) -> GraphicsResult<(Arc<SoftModule>, Device)> {
        let module = Arc::new(SoftModule::with_desktop(desktop));
        let exports = GraphicsExports::from_module(module.clone(), group)?;
        let device = Device::create(&exports, 0)?;
        Ok((module, device))
    }

    fn swapchain_desc(width: u32, height: u32) -> SwapchainDesc {
        SwapchainDesc {
            window: WindowId::from_raw_handle(0x10),
            width,
            height,
            format: ColorFormat::Bgra,
            zstencil_format: ZStencilFormat::None,
            backbuffers: 2,
        }
    }

    #[test]
    fn unknown_backend_cannot_create_devices() {
        let exports = load_graphics_imports("vulkan");
        assert!(matches!(
            Device::create(&exports, 0),
            Err(GraphicsError::BackendNotFound(_))
        ));
    }

    #[test]
    fn soft_backend_creates_from_name() -> GraphicsResult<()> {
        let exports = load_graphics_imports_for("soft", PlatformGroup::DmaBuf);
        let device = Device::create(&exports, 0)?;
        assert_eq!(device.adapter(), 0);
        assert!(Device::create(&exports, 1).is_err());
        Ok(())
    }

    #[test]
    fn nested_contexts_unwind_to_zero() -> GraphicsResult<()> {
        let (_module, mut device) = soft_device()?;
        {
            let mut outer = device.enter_context()?;
            let mut inner = outer.nested()?;
            let deepest = inner.nested()?;
            assert_eq!(deepest.depth(), 3);
        }
        assert_eq!(device.context_depth(), 0);
        Ok(())
    }

    #[test]
    fn projection_pop_on_empty_stack_fails() -> GraphicsResult<()> {
        let (_module, mut device) = soft_device()?;
        let mut ctx = device.enter_context()?;
        ctx.ortho(0.0, 100.0, 0.0, 50.0, -100.0, 100.0);
        let ortho = ctx.projection();
        ctx.projection_push();
        ctx.frustum(-1.0, 1.0, -1.0, 1.0, 1.0, 10.0);
        ctx.projection_pop()?;
        assert_eq!(ctx.projection(), ortho);
        assert!(matches!(
            ctx.projection_pop(),
            Err(GraphicsError::ContextViolation(_))
        ));
        Ok(())
    }

    #[test]
    fn ortho_maps_box_corners_to_clip_corners() -> GraphicsResult<()> {
        let (_module, mut device) = soft_device()?;
        let mut ctx = device.enter_context()?;
        ctx.ortho(0.0, 1920.0, 0.0, 1080.0, -100.0, 100.0);
        let m = ctx.projection();
        let top_left = m.transform(Vec4::new(0.0, 0.0, -100.0, 1.0));
        let bottom_right = m.transform(Vec4::new(1920.0, 1080.0, 100.0, 1.0));
        let close = |v: Vec4, x: f32, y: f32, z: f32| {
            (v.x - x).abs() < 1e-5 && (v.y - y).abs() < 1e-5 && (v.z - z).abs() < 1e-5
        };
        assert!(close(top_left, -1.0, 1.0, 0.0));
        assert!(close(bottom_right, 1.0, -1.0, 1.0));
        Ok(())
    }

    #[test]
    fn draw_publishes_view_projection() -> GraphicsResult<()> {
        let (_module, mut device) = soft_device()?;
        let mut ctx = device.enter_context()?;
        let target = ctx.texture_create(
            &TextureDesc::texture_2d(4, 4, ColorFormat::Rgba).with_flags(TextureFlags::RENDER_TARGET),
            &[],
        )?;
        let vs = ctx.vertexshader_create("uniform float4x4 ViewProj;", "draw.vs")?;
        let ps = ctx.pixelshader_create("uniform float4 color;", "draw.ps")?;
        let vb = ctx.vertexbuffer_create(
            VertexData {
                points: vec![Default::default(); 3],
                ..VertexData::default()
            },
            false,
        )?;
        ctx.set_render_target(Some(target), None)?;
        ctx.load_vertexshader(Some(vs))?;
        ctx.load_pixelshader(Some(ps))?;
        ctx.load_vertexbuffer(Some(vb))?;
        ctx.ortho(0.0, 4.0, 0.0, 4.0, -1.0, 1.0);
        ctx.draw(DrawMode::Tris, 0, 0)?;

        let param = ctx.shader_param_by_name(vs, "ViewProj")?;
        assert_eq!(
            ctx.shader_param_value(param)?,
            ShaderValue::Matrix4(ctx.projection())
        );
        assert!(matches!(
            ctx.load_pixelshader(Some(vs)),
            Err(GraphicsError::InvalidDescriptor(_))
        ));
        Ok(())
    }

    #[test]
    fn quad_drawn_into_flat_render_target_reads_back() -> GraphicsResult<()> {
        let (_module, mut device) = soft_device()?;
        let mut ctx = device.enter_context()?;
        let rt = TextureFlags::RENDER_TARGET;
        let target = ctx.texture_create(&TextureDesc::texture_2d(4, 4, ColorFormat::Rgba).with_flags(rt), &[])?;
        let cube = ctx.texture_create(&TextureDesc::cube(4, ColorFormat::Rgba).with_flags(rt), &[])?;
        let plain = ctx.texture_create(&TextureDesc::texture_2d(4, 4, ColorFormat::Rgba), &[])?;
        assert!(matches!(
            ctx.set_render_target(Some(cube), None),
            Err(GraphicsError::InvalidDescriptor(_))
        ));
        assert!(ctx.set_render_target(Some(plain), None).is_err());
        ctx.set_render_target(Some(target), None)?;
        assert_eq!(ctx.render_target(), RenderTarget::Texture(target));

        ctx.set_viewport(0, 0, 4, 4);
        ctx.ortho(0.0, 4.0, 0.0, 4.0, -1.0, 1.0);
        ctx.clear(ClearFlags::COLOR, Vec4::new(0.0, 0.0, 0.0, 1.0), 1.0, 0)?;
        let vs = ctx.vertexshader_create("uniform float4x4 ViewProj;", "solid.vs")?;
        let ps = ctx.pixelshader_create("uniform float4 color;", "solid.ps")?;
        let color = ctx.shader_param_by_name(ps, "color")?;
        ctx.shader_set_vec4(color, Vec4::new(0.0, 0.0, 1.0, 1.0))?;
        let vb = ctx.vertexbuffer_create(
            VertexData {
                points: vec![
                    Vec3::new(0.0, 0.0, 0.0),
                    Vec3::new(4.0, 0.0, 0.0),
                    Vec3::new(0.0, 2.0, 0.0),
                    Vec3::new(4.0, 2.0, 0.0),
                ],
                ..VertexData::default()
            },
            false,
        )?;
        ctx.load_vertexshader(Some(vs))?;
        ctx.load_pixelshader(Some(ps))?;
        ctx.load_vertexbuffer(Some(vb))?;
        ctx.draw(DrawMode::TriStrip, 0, 0)?;

        let stage = ctx.stagesurface_create(4, 4, ColorFormat::Rgba)?;
        ctx.stage_texture(stage, target)?;
        let map = ctx.stagesurface_map(stage)?;
        let pixels = map.data()?;
        let (top, bottom) = pixels.split_at(pixels.len() / 2);
        assert!(top.chunks(4).all(|px| px == [0, 0, 255, 255]));
        assert!(bottom.chunks(4).all(|px| px == [0, 0, 0, 255]));
        Ok(())
    }

    #[test]
    fn swapchain_resize_and_clear() -> GraphicsResult<()> {
        let (_module, mut device) = soft_device()?;
        let mut ctx = device.enter_context()?;
        assert!(ctx.resize(10, 10).is_err());
        let chain = ctx.swapchain_create(&swapchain_desc(64, 32))?;
        ctx.load_swapchain(Some(chain))?;
        assert_eq!(ctx.size(), (64, 32));
        assert_eq!(ctx.viewport(), Rect::new(0, 0, 64, 32));
        ctx.resize(128, 16)?;
        assert_eq!((ctx.width(), ctx.height()), (128, 16));
        ctx.clear(ClearFlags::COLOR, Vec4::new(0.0, 0.0, 0.0, 1.0), 1.0, 0)?;
        ctx.present()?;
        ctx.swapchain_destroy(chain)?;
        assert_eq!(ctx.size(), (0, 0));
        Ok(())
    }

    #[test]
    fn state_toggles_feed_the_pipeline() -> GraphicsResult<()> {
        let (_module, mut device) = soft_device()?;
        let mut ctx = device.enter_context()?;
        ctx.blend_state_push();
        ctx.enable_blending(false);
        ctx.blend_function_separate(
            BlendType::One,
            BlendType::Zero,
            BlendType::SrcAlpha,
            BlendType::InvSrcAlpha,
        );
        ctx.blend_op(BlendOp::Max);
        ctx.set_cull_mode(CullMode::Back);
        ctx.enable_color(true, false, true, false);
        ctx.stencil_function(StencilSide::Front, DepthTest::Never);

        let state = ctx.pipeline_state();
        assert!(!state.blend.enabled);
        assert_eq!(state.blend.dest_alpha, BlendType::InvSrcAlpha);
        assert!(!state.color_mask.green);
        assert_eq!(state.depth_stencil.front.test, DepthTest::Never);
        assert_eq!(ctx.cull_mode(), CullMode::Back);

        ctx.blend_state_pop()?;
        assert!(ctx.blend_state().enabled);
        assert!(ctx.load_texture(None, MAX_TEXTURE_UNITS).is_err());
        Ok(())
    }

    #[test]
    fn default_sampler_is_created_once() -> GraphicsResult<()> {
        let (module, mut device) = soft_device()?;
        {
            let mut ctx = device.enter_context()?;
            ctx.load_default_samplerstate(0)?;
            ctx.load_default_samplerstate(1)?;
            let state = ctx.pipeline_state();
            assert_eq!(state.samplers[0], state.samplers[1]);
        }
        assert_eq!(module.live_allocations(), 1);
        drop(device);
        assert_eq!(module.live_allocations(), 0);
        Ok(())
    }
}
