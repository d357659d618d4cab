use crate::backend::DeviceBackend;
use crate::error::{GraphicsError, GraphicsResult, violation};
use crate::format::{ColorFormat, IndexType, PlanarFormat, TextureFlags, TextureType, ZStencilFormat};
use crate::resource::{
    IndexBufferId, IndexData, NativeObject, SamplerId, SamplerInfo, StageSurfaceId,
    StageSurfaceInfo, TextureDesc, TextureId, TextureInfo, TimerId, TimerRangeData, TimerRangeId,
    VertexBufferId, VertexData, ZStencilId, ZStencilInfo,
};

use super::GraphicsContext;

/// Write access to level 0 of a dynamic texture. Unmaps on drop.
pub struct TextureMap<'c> {
    backend: &'c mut dyn DeviceBackend,
    texture: TextureId,
    linesize: u32,
    unmapped: bool,
}

impl TextureMap<'_> {
    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn linesize(&self) -> u32 {
        self.linesize
    }

    pub fn data(&mut self) -> GraphicsResult<&mut [u8]> {
        self.backend.texture_mapped_data(self.texture)
    }

    pub fn unmap(mut self) -> GraphicsResult<()> {
        self.unmapped = true;
        self.backend.unmap_texture(self.texture)
    }
}

impl Drop for TextureMap<'_> {
    fn drop(&mut self) {
        if !self.unmapped
            && let Err(err) = self.backend.unmap_texture(self.texture)
        {
            log::warn!("failed to unmap texture {}: {err}", self.texture.raw());
        }
    }
}

/// Read access to a stage surface. Unmaps on drop.
pub struct StageMap<'c> {
    backend: &'c mut dyn DeviceBackend,
    surface: StageSurfaceId,
    linesize: u32,
}

impl StageMap<'_> {
    pub fn linesize(&self) -> u32 {
        self.linesize
    }

    pub fn data(&self) -> GraphicsResult<&[u8]> {
        self.backend.stagesurface_mapped_data(self.surface)
    }
}

impl Drop for StageMap<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.backend.unmap_stagesurface(self.surface) {
            log::warn!("failed to unmap stage surface {}: {err}", self.surface.raw());
        }
    }
}

impl GraphicsContext<'_> {
    // -- textures ----------------------------------------------------------

    /// Creates a 2D, cube or volume texture. `data` holds one slice per
    /// mip level, each with every face or slice of that level back to back.
    pub fn texture_create(&mut self, desc: &TextureDesc, data: &[&[u8]]) -> GraphicsResult<TextureId> {
        let id = self.device.backend.create_texture(desc, data)?;
        self.device.track(TextureId::KIND, 1);
        Ok(id)
    }

    /// Rejected while the texture is the bound render target.
    pub fn texture_destroy(&mut self, texture: TextureId) -> GraphicsResult<()> {
        if self.device.state.target.texture() == Some(texture) {
            return Err(violation(GraphicsError::ResourceBusy(format!(
                "texture {} is the bound render target",
                texture.raw()
            ))));
        }
        self.device.backend.destroy_texture(texture)?;
        self.unbind_texture(texture);
        self.device.track(TextureId::KIND, -1);
        Ok(())
    }

    /// Unbinds a texture that is going away from the texture units and
    /// from every shader parameter.
    pub(super) fn unbind_texture(&mut self, texture: TextureId) {
        for slot in &mut self.device.state.textures {
            if slot.is_some_and(|bound| bound.texture == texture) {
                *slot = None;
            }
        }
        self.device.backend.forget_texture_params(texture);
    }

    pub fn texture_info(&self, texture: TextureId) -> GraphicsResult<TextureInfo> {
        self.device.backend.texture_info(texture)
    }

    pub fn texture_type(&self, texture: TextureId) -> GraphicsResult<TextureType> {
        self.texture_info(texture).map(|info| info.texture_type)
    }

    /// Rectangle textures are never created by this layer.
    pub fn texture_is_rect(&self, texture: TextureId) -> GraphicsResult<bool> {
        self.texture_info(texture).map(|_| false)
    }

    pub fn texture_obj(&self, texture: TextureId) -> GraphicsResult<NativeObject> {
        self.device.backend.texture_obj(texture)
    }

    /// Edge length of a cube texture.
    pub fn cubetexture_size(&self, texture: TextureId) -> GraphicsResult<u32> {
        let info = self.texture_info(texture)?;
        if info.texture_type != TextureType::Cube {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "texture {} is not a cube map",
                texture.raw()
            )));
        }
        Ok(info.width)
    }

    pub fn voltexture_depth(&self, texture: TextureId) -> GraphicsResult<u32> {
        let info = self.texture_info(texture)?;
        if info.texture_type != TextureType::Texture3D {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "texture {} is not a volume texture",
                texture.raw()
            )));
        }
        Ok(info.depth)
    }

    /// Maps level 0 of a `DYNAMIC` texture for writing.
    pub fn texture_map(&mut self, texture: TextureId) -> GraphicsResult<TextureMap<'_>> {
        let linesize = self.device.backend.map_texture(texture)?;
        Ok(TextureMap {
            backend: self.device.backend.as_mut(),
            texture,
            linesize,
            unmapped: false,
        })
    }

    /// Replaces the contents of a dynamic texture with rows of `linesize`
    /// bytes, bottom-up when `invert` is set.
    pub fn texture_set_image(
        &mut self,
        texture: TextureId,
        data: &[u8],
        linesize: u32,
        invert: bool,
    ) -> GraphicsResult<()> {
        let info = self.texture_info(texture)?;
        let row = info.format.row_bytes(info.width)?;
        let rows = info.format.row_count(info.height);
        let src_pitch = linesize as usize;
        let needed = src_pitch
            .checked_mul(rows.saturating_sub(1))
            .and_then(|n| n.checked_add(row))
            .ok_or(GraphicsError::BufferOverflow)?;
        if src_pitch < row || data.len() < needed {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "image of {} bytes with linesize {linesize} does not cover a {}x{} {} texture",
                data.len(),
                info.width,
                info.height,
                info.format.as_str()
            )));
        }

        let mut map = self.texture_map(texture)?;
        let dst_pitch = map.linesize() as usize;
        let dst = map.data()?;
        for y in 0..rows {
            let src_y = if invert { rows - 1 - y } else { y };
            dst[y * dst_pitch..y * dst_pitch + row]
                .copy_from_slice(&data[src_y * src_pitch..src_y * src_pitch + row]);
        }
        map.unmap()
    }

    /// Creates the luma and chroma planes of an NV12 or P010 texture.
    pub fn texture_create_planar(
        &mut self,
        format: PlanarFormat,
        width: u32,
        height: u32,
        flags: TextureFlags,
    ) -> GraphicsResult<(TextureId, TextureId)> {
        let planes = self.device.backend.create_planar(format, width, height, flags)?;
        self.device.track(TextureId::KIND, 2);
        Ok(planes)
    }

    pub fn texture_create_nv12(
        &mut self,
        width: u32,
        height: u32,
        flags: TextureFlags,
    ) -> GraphicsResult<(TextureId, TextureId)> {
        self.texture_create_planar(PlanarFormat::Nv12, width, height, flags)
    }

    pub fn texture_create_p010(
        &mut self,
        width: u32,
        height: u32,
        flags: TextureFlags,
    ) -> GraphicsResult<(TextureId, TextureId)> {
        self.texture_create_planar(PlanarFormat::P010, width, height, flags)
    }

    // -- copies ------------------------------------------------------------

    /// Copies a `width` x `height` region (0 = to the source edge).
    #[allow(clippy::too_many_arguments)]
    pub fn copy_texture_region(
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
        self.device
            .backend
            .copy_texture_region(dst, dst_x, dst_y, src, src_x, src_y, width, height)
    }

    /// Whole-texture copy between textures of identical size and format.
    pub fn copy_texture(&mut self, dst: TextureId, src: TextureId) -> GraphicsResult<()> {
        let (d, s) = (self.texture_info(dst)?, self.texture_info(src)?);
        if (d.width, d.height, d.format) != (s.width, s.height, s.format) {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "copy_texture needs matching textures, got {}x{} {} and {}x{} {}",
                d.width,
                d.height,
                d.format.as_str(),
                s.width,
                s.height,
                s.format.as_str()
            )));
        }
        self.device
            .backend
            .copy_texture_region(dst, 0, 0, src, 0, 0, 0, 0)
    }

    /// Queues a copy of `src` into `dst`; its data is valid at the next map.
    pub fn stage_texture(&mut self, dst: StageSurfaceId, src: TextureId) -> GraphicsResult<()> {
        self.device.backend.stage_texture(dst, src)
    }

    // -- stage surfaces ----------------------------------------------------

    pub fn stagesurface_create(
        &mut self,
        width: u32,
        height: u32,
        format: ColorFormat,
    ) -> GraphicsResult<StageSurfaceId> {
        let id = self.device.backend.create_stagesurface(width, height, format)?;
        self.device.track(StageSurfaceId::KIND, 1);
        Ok(id)
    }

    pub fn stagesurface_destroy(&mut self, surface: StageSurfaceId) -> GraphicsResult<()> {
        self.device.backend.destroy_stagesurface(surface)?;
        self.device.track(StageSurfaceId::KIND, -1);
        Ok(())
    }

    pub fn stagesurface_info(&self, surface: StageSurfaceId) -> GraphicsResult<StageSurfaceInfo> {
        self.device.backend.stagesurface_info(surface)
    }

    pub fn stagesurface_map(&mut self, surface: StageSurfaceId) -> GraphicsResult<StageMap<'_>> {
        let linesize = self.device.backend.map_stagesurface(surface)?;
        Ok(StageMap {
            backend: self.device.backend.as_mut(),
            surface,
            linesize,
        })
    }

    // -- depth, samplers ---------------------------------------------------

    pub fn zstencil_create(
        &mut self,
        width: u32,
        height: u32,
        format: ZStencilFormat,
    ) -> GraphicsResult<ZStencilId> {
        let id = self.device.backend.create_zstencil(width, height, format)?;
        self.device.track(ZStencilId::KIND, 1);
        Ok(id)
    }

    pub fn zstencil_destroy(&mut self, zstencil: ZStencilId) -> GraphicsResult<()> {
        if self.device.state.zstencil == Some(zstencil) {
            return Err(violation(GraphicsError::ResourceBusy(format!(
                "z-stencil buffer {} is bound",
                zstencil.raw()
            ))));
        }
        self.device.backend.destroy_zstencil(zstencil)?;
        self.device.track(ZStencilId::KIND, -1);
        Ok(())
    }

    pub fn zstencil_info(&self, zstencil: ZStencilId) -> GraphicsResult<ZStencilInfo> {
        self.device.backend.zstencil_info(zstencil)
    }

    pub fn samplerstate_create(&mut self, info: &SamplerInfo) -> GraphicsResult<SamplerId> {
        let id = self.device.backend.create_sampler(info)?;
        self.device.track(SamplerId::KIND, 1);
        Ok(id)
    }

    pub fn samplerstate_destroy(&mut self, sampler: SamplerId) -> GraphicsResult<()> {
        if self.device.default_sampler == Some(sampler) {
            return Err(violation(GraphicsError::ResourceBusy(
                "the default sampler is owned by the device".into(),
            )));
        }
        self.device.backend.destroy_sampler(sampler)?;
        for slot in &mut self.device.state.samplers {
            if *slot == Some(sampler) {
                *slot = None;
            }
        }
        self.device.track(SamplerId::KIND, -1);
        Ok(())
    }

    // -- buffers -----------------------------------------------------------

    pub fn vertexbuffer_create(
        &mut self,
        data: VertexData,
        dynamic: bool,
    ) -> GraphicsResult<VertexBufferId> {
        let id = self.device.backend.create_vertexbuffer(data, dynamic)?;
        self.device.track(VertexBufferId::KIND, 1);
        Ok(id)
    }

    pub fn vertexbuffer_destroy(&mut self, buffer: VertexBufferId) -> GraphicsResult<()> {
        self.device.backend.destroy_vertexbuffer(buffer)?;
        if self.device.state.vertex_buffer == Some(buffer) {
            self.device.state.vertex_buffer = None;
        }
        self.device.track(VertexBufferId::KIND, -1);
        Ok(())
    }

    pub fn vertexbuffer_data(&self, buffer: VertexBufferId) -> GraphicsResult<&VertexData> {
        self.device.backend.vertexbuffer_data(buffer)
    }

    /// CPU copy of a dynamic buffer; upload it with
    /// [`Self::vertexbuffer_flush`].
    pub fn vertexbuffer_data_mut(
        &mut self,
        buffer: VertexBufferId,
    ) -> GraphicsResult<&mut VertexData> {
        self.device.backend.vertexbuffer_data_mut(buffer)
    }

    pub fn vertexbuffer_flush(&mut self, buffer: VertexBufferId) -> GraphicsResult<()> {
        self.device.backend.flush_vertexbuffer(buffer, None)
    }

    pub fn vertexbuffer_flush_direct(
        &mut self,
        buffer: VertexBufferId,
        data: &VertexData,
    ) -> GraphicsResult<()> {
        self.device.backend.flush_vertexbuffer(buffer, Some(data))
    }

    pub fn indexbuffer_create(
        &mut self,
        data: IndexData,
        dynamic: bool,
    ) -> GraphicsResult<IndexBufferId> {
        let id = self.device.backend.create_indexbuffer(data, dynamic)?;
        self.device.track(IndexBufferId::KIND, 1);
        Ok(id)
    }

    pub fn indexbuffer_destroy(&mut self, buffer: IndexBufferId) -> GraphicsResult<()> {
        self.device.backend.destroy_indexbuffer(buffer)?;
        if self.device.state.index_buffer == Some(buffer) {
            self.device.state.index_buffer = None;
        }
        self.device.track(IndexBufferId::KIND, -1);
        Ok(())
    }

    pub fn indexbuffer_data(&self, buffer: IndexBufferId) -> GraphicsResult<&IndexData> {
        self.device.backend.indexbuffer_data(buffer)
    }

    pub fn indexbuffer_data_mut(&mut self, buffer: IndexBufferId) -> GraphicsResult<&mut IndexData> {
        self.device.backend.indexbuffer_data_mut(buffer)
    }

    pub fn indexbuffer_num_indices(&self, buffer: IndexBufferId) -> GraphicsResult<usize> {
        self.indexbuffer_data(buffer).map(IndexData::len)
    }

    pub fn indexbuffer_type(&self, buffer: IndexBufferId) -> GraphicsResult<IndexType> {
        self.indexbuffer_data(buffer).map(IndexData::index_type)
    }

    pub fn indexbuffer_flush(&mut self, buffer: IndexBufferId) -> GraphicsResult<()> {
        self.device.backend.flush_indexbuffer(buffer, None)
    }

    pub fn indexbuffer_flush_direct(
        &mut self,
        buffer: IndexBufferId,
        data: &IndexData,
    ) -> GraphicsResult<()> {
        self.device.backend.flush_indexbuffer(buffer, Some(data))
    }

    // -- timers ------------------------------------------------------------

    pub fn timer_create(&mut self) -> GraphicsResult<TimerId> {
        let id = self.device.backend.create_timer()?;
        self.device.track(TimerId::KIND, 1);
        Ok(id)
    }

    pub fn timer_destroy(&mut self, timer: TimerId) -> GraphicsResult<()> {
        self.device.backend.destroy_timer(timer)?;
        self.device.track(TimerId::KIND, -1);
        Ok(())
    }

    pub fn timer_begin(&mut self, timer: TimerId) -> GraphicsResult<()> {
        self.device.backend.timer_begin(timer)
    }

    pub fn timer_end(&mut self, timer: TimerId) -> GraphicsResult<()> {
        self.device.backend.timer_end(timer)
    }

    /// Elapsed ticks, `None` until the query resolves.
    pub fn timer_data(&mut self, timer: TimerId) -> GraphicsResult<Option<u64>> {
        self.device.backend.timer_data(timer)
    }

    pub fn timer_range_create(&mut self) -> GraphicsResult<TimerRangeId> {
        let id = self.device.backend.create_timer_range()?;
        self.device.track(TimerRangeId::KIND, 1);
        Ok(id)
    }

    pub fn timer_range_destroy(&mut self, range: TimerRangeId) -> GraphicsResult<()> {
        self.device.backend.destroy_timer_range(range)?;
        self.device.track(TimerRangeId::KIND, -1);
        Ok(())
    }

    pub fn timer_range_begin(&mut self, range: TimerRangeId) -> GraphicsResult<()> {
        self.device.backend.timer_range_begin(range)
    }

    pub fn timer_range_end(&mut self, range: TimerRangeId) -> GraphicsResult<()> {
        self.device.backend.timer_range_end(range)
    }

    pub fn timer_range_data(
        &mut self,
        range: TimerRangeId,
    ) -> GraphicsResult<Option<TimerRangeData>> {
        self.device.backend.timer_range_data(range)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::soft_device;
    use super::*;

    #[test]
    fn texture_churn_leaves_no_allocations() -> GraphicsResult<()> {
        let (module, mut device) = soft_device()?;
        {
            let mut ctx = device.enter_context()?;
            let ids = (1..=32)
                .map(|n| ctx.texture_create(&TextureDesc::texture_2d(n, n, ColorFormat::Rgba), &[]))
                .collect::<GraphicsResult<Vec<_>>>()?;
            assert_eq!(module.live_allocations(), 32);
            for id in ids {
                ctx.texture_destroy(id)?;
            }
        }
        assert_eq!(module.live_allocations(), 0);
        assert_eq!(device.live_resources(), 0);
        Ok(())
    }

    #[test]
    fn bound_render_target_cannot_be_destroyed() -> GraphicsResult<()> {
        let (_module, mut device) = soft_device()?;
        let mut ctx = device.enter_context()?;
        let target = ctx.texture_create(
            &TextureDesc::texture_2d(8, 8, ColorFormat::Bgra).with_flags(TextureFlags::RENDER_TARGET),
            &[],
        )?;
        ctx.set_render_target(Some(target), None)?;
        assert!(matches!(
            ctx.texture_destroy(target),
            Err(GraphicsError::ResourceBusy(_))
        ));
        ctx.set_render_target(None, None)?;
        ctx.texture_destroy(target)
    }

    #[test]
    fn set_image_inverts_rows_and_stages_back() -> GraphicsResult<()> {
        let (_module, mut device) = soft_device()?;
        let mut ctx = device.enter_context()?;
        let tex = ctx.texture_create(
            &TextureDesc::texture_2d(1, 2, ColorFormat::R8).with_flags(TextureFlags::DYNAMIC),
            &[],
        )?;
        ctx.texture_set_image(tex, &[1, 0, 0, 0, 2], 4, true)?;
        assert!(ctx.texture_set_image(tex, &[1], 4, false).is_err());

        let stage = ctx.stagesurface_create(1, 2, ColorFormat::R8)?;
        ctx.stage_texture(stage, tex)?;
        {
            let map = ctx.stagesurface_map(stage)?;
            assert_eq!(map.data()?, &[2, 1]);
        }
        ctx.stagesurface_destroy(stage)?;
        ctx.texture_destroy(tex)
    }

    #[test]
    fn dropped_map_guard_unmaps() -> GraphicsResult<()> {
        let (_module, mut device) = soft_device()?;
        let mut ctx = device.enter_context()?;
        let tex = ctx.texture_create(
            &TextureDesc::texture_2d(2, 2, ColorFormat::Rgba).with_flags(TextureFlags::DYNAMIC),
            &[],
        )?;
        {
            let mut map = ctx.texture_map(tex)?;
            assert_eq!(map.linesize(), 8);
            map.data()?.fill(7);
        }
        let again = ctx.texture_map(tex)?;
        again.unmap()?;
        ctx.texture_destroy(tex)
    }

    #[test]
    fn copy_texture_requires_identical_textures() -> GraphicsResult<()> {
        let (_module, mut device) = soft_device()?;
        let mut ctx = device.enter_context()?;
        let pixels = [9u8; 16];
        let src = ctx.texture_create(&TextureDesc::texture_2d(2, 2, ColorFormat::Rgba), &[&pixels])?;
        let dst = ctx.texture_create(&TextureDesc::texture_2d(2, 2, ColorFormat::Rgba), &[])?;
        let small = ctx.texture_create(&TextureDesc::texture_2d(1, 1, ColorFormat::Rgba), &[])?;
        ctx.copy_texture(dst, src)?;
        assert!(ctx.copy_texture(small, src).is_err());
        ctx.copy_texture_region(small, 0, 0, src, 1, 1, 1, 1)?;
        assert!(!ctx.texture_is_rect(dst)?);
        assert!(ctx.cubetexture_size(dst).is_err());
        Ok(())
    }

    #[test]
    fn cube_and_volume_getters() -> GraphicsResult<()> {
        let (_module, mut device) = soft_device()?;
        let mut ctx = device.enter_context()?;
        let cube = ctx.texture_create(&TextureDesc::cube(4, ColorFormat::Rgba), &[])?;
        let volume = ctx.texture_create(&TextureDesc::volume(4, 4, 3, ColorFormat::R8), &[])?;
        assert_eq!(ctx.cubetexture_size(cube)?, 4);
        assert_eq!(ctx.texture_type(cube)?, TextureType::Cube);
        assert_eq!(ctx.voltexture_depth(volume)?, 3);
        Ok(())
    }

    #[test]
    fn index_buffer_getters_and_flush() -> GraphicsResult<()> {
        let (_module, mut device) = soft_device()?;
        let mut ctx = device.enter_context()?;
        let ib = ctx.indexbuffer_create(IndexData::U16(vec![0, 1, 2, 2, 1, 3]), true)?;
        assert_eq!(ctx.indexbuffer_num_indices(ib)?, 6);
        assert_eq!(ctx.indexbuffer_type(ib)?, IndexType::U16);
        ctx.indexbuffer_flush_direct(ib, &IndexData::U16(vec![3, 2, 1, 0, 1, 2]))?;
        ctx.load_indexbuffer(Some(ib))?;
        ctx.indexbuffer_destroy(ib)?;
        assert_eq!(ctx.pipeline_state().index_buffer, None);
        Ok(())
    }

    #[test]
    fn timers_report_after_resolution() -> GraphicsResult<()> {
        let (_module, mut device) = soft_device()?;
        let mut ctx = device.enter_context()?;
        let timer = ctx.timer_create()?;
        ctx.timer_begin(timer)?;
        ctx.timer_end(timer)?;
        assert!(ctx.timer_data(timer)?.is_some());
        ctx.timer_destroy(timer)?;

        let range = ctx.timer_range_create()?;
        ctx.timer_range_begin(range)?;
        ctx.timer_range_end(range)?;
        assert!(ctx.timer_range_data(range)?.is_some_and(|d| !d.disjoint));
        ctx.timer_range_destroy(range)
    }
}
