use std::sync::Arc;
use std::time::Duration;

use crate::backend::{DmaBufInterop, IoSurfaceInterop, Win32Interop};
use crate::duplicator::DuplicatorCore;
use crate::error::{GraphicsError, GraphicsResult, violation};
use crate::format::{ColorFormat, ColorSpace, PlanarFormat, TextureFlags};
use crate::frame::CapturedFrame;
use crate::monitor::{MonitorId, MonitorInfo};
use crate::resource::{
    DmaBufCapabilities, DmaBufImport, DuplicatorId, GdiDc, IoSurfaceRef, NativeObject,
    PixmapImport, StageSurfaceId, StageSurfaceInfo, TextureDesc, TextureId,
};
use crate::sync::SyncStatus;

use super::device::SoftDevice;
use super::shared::SharedSurface;
use super::texture::SoftTexture;

const DRM_FORMAT_MOD_LINEAR: u64 = 0;
const MAX_DMABUF_PLANES: usize = 4;

pub(crate) struct SoftDuplicator {
    core: DuplicatorCore,
    pub(crate) texture: Option<TextureId>,
}

impl SoftDevice {
    fn open_shared_texture(&mut self, handle: u32) -> GraphicsResult<TextureId> {
        let surface = SharedSurface::open(handle).ok_or(GraphicsError::InvalidHandle("shared handle"))?;
        let texture = SoftTexture::open_shared(surface, self.token());
        log::debug!("opened shared surface {handle:#x}");
        Ok(self.insert_texture(texture))
    }

    fn shared_of(&self, texture: TextureId) -> GraphicsResult<Arc<SharedSurface>> {
        self.texture(texture)?.shared_surface().cloned().ok_or_else(|| {
            GraphicsError::InvalidDescriptor(format!(
                "texture {} was not created shared",
                texture.raw()
            ))
        })
    }

    fn create_imported(&mut self, desc: TextureDesc) -> GraphicsResult<TextureId> {
        desc.validate()?;
        let texture = SoftTexture::new(desc, &[], self.token())?;
        Ok(self.insert_texture(texture))
    }

    fn duplicator(&self, id: DuplicatorId) -> GraphicsResult<&SoftDuplicator> {
        self.duplicators
            .get(&id)
            .ok_or(GraphicsError::InvalidHandle(DuplicatorId::KIND))
    }

    /// Uploads `frame` into the duplicator texture, recreating it when the
    /// desktop size or format changed.
    fn publish_duplicated(&mut self, id: DuplicatorId, frame: &CapturedFrame) -> GraphicsResult<()> {
        let current = self.duplicator(id)?.texture;
        let reusable = current.filter(|tex| {
            self.texture(*tex).is_ok_and(|t| {
                let (w, h, _) = t.desc.kind.extent();
                (w, h) == frame.dimensions() && t.desc.format == frame.format()
            })
        });
        let texture = match reusable {
            Some(texture) => texture,
            None => {
                if let Some(stale) = current {
                    self.textures.remove(&stale);
                }
                let desc = TextureDesc::texture_2d(frame.width(), frame.height(), frame.format());
                let texture = self.create_imported(desc)?;
                if let Some(dup) = self.duplicators.get_mut(&id) {
                    dup.texture = Some(texture);
                }
                texture
            }
        };
        let entry = self.texture_mut(texture)?;
        let pitch = entry.linesize()?;
        entry.with_level_mut(0, |dst| frame.copy_rows_into(dst, pitch))?
    }
}

impl Win32Interop for SoftDevice {
    fn gdi_texture_available(&self) -> bool {
        true
    }

    fn shared_texture_available(&self) -> bool {
        true
    }

    fn can_adapter_fast_clear(&self) -> bool {
        true
    }

    fn texture_create_gdi(&mut self, width: u32, height: u32) -> GraphicsResult<TextureId> {
        let desc = TextureDesc::texture_2d(width, height, ColorFormat::Bgra)
            .with_flags(TextureFlags::RENDER_TARGET);
        let id = self.create_imported(desc)?;
        self.texture_mut(id)?.gdi = true;
        Ok(id)
    }

    fn texture_get_dc(&mut self, texture: TextureId) -> GraphicsResult<GdiDc> {
        let entry = self.texture_mut(texture)?;
        if !entry.gdi {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "texture {} is not GDI compatible",
                texture.raw()
            )));
        }
        if entry.dc_held {
            return Err(violation(GraphicsError::ResourceBusy(format!(
                "texture {} already holds its DC",
                texture.raw()
            ))));
        }
        entry.dc_held = true;
        Ok(GdiDc(entry.object.0))
    }

    fn texture_release_dc(&mut self, texture: TextureId) -> GraphicsResult<()> {
        let entry = self.texture_mut(texture)?;
        if !std::mem::take(&mut entry.dc_held) {
            return Err(violation(GraphicsError::ContextViolation(format!(
                "DC of texture {} released without get_dc",
                texture.raw()
            ))));
        }
        Ok(())
    }

    fn texture_open_shared(&mut self, handle: u32) -> GraphicsResult<TextureId> {
        self.open_shared_texture(handle)
    }

    fn texture_open_nt_shared(&mut self, handle: u32) -> GraphicsResult<TextureId> {
        self.open_shared_texture(handle)
    }

    fn texture_get_shared_handle(&self, texture: TextureId) -> GraphicsResult<u32> {
        self.shared_of(texture).map(|surface| surface.handle())
    }

    fn texture_wrap_obj(&mut self, object: NativeObject) -> GraphicsResult<TextureId> {
        let handle = u32::try_from(object.0).map_err(|_| {
            GraphicsError::Unsupported("only shared soft textures can be wrapped".into())
        })?;
        self.open_shared_texture(handle)
    }

    fn texture_acquire_sync(
        &mut self,
        texture: TextureId,
        key: u64,
        timeout: Duration,
    ) -> GraphicsResult<SyncStatus> {
        let surface = self.shared_of(texture)?;
        let mutex = surface.keyed_mutex.as_ref().ok_or_else(|| {
            GraphicsError::InvalidDescriptor(format!(
                "texture {} has no keyed mutex",
                texture.raw()
            ))
        })?;
        if let Some(held) = self.texture(texture)?.held_key {
            return Err(violation(GraphicsError::SyncViolation(format!(
                "texture {} already holds its keyed mutex with key {held}",
                texture.raw()
            ))));
        }
        let status = mutex.acquire(key, timeout);
        if status == SyncStatus::Acquired {
            self.texture_mut(texture)?.held_key = Some(key);
        }
        Ok(status)
    }

    fn texture_release_sync(&mut self, texture: TextureId, key: u64) -> GraphicsResult<()> {
        let surface = self.shared_of(texture)?;
        let held = self.texture(texture)?.held_key;
        if held != Some(key) {
            return Err(violation(GraphicsError::SyncViolation(format!(
                "texture {} released key {key} without acquiring it",
                texture.raw()
            ))));
        }
        if let Some(mutex) = surface.keyed_mutex.as_ref() {
            mutex.release(key).map_err(violation)?;
        }
        self.texture_mut(texture)?.held_key = None;
        Ok(())
    }

    fn stagesurface_create_planar(
        &mut self,
        format: PlanarFormat,
        width: u32,
        height: u32,
    ) -> GraphicsResult<StageSurfaceId> {
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "{format:?} stage surfaces need even non-zero dimensions, got {width}x{height}"
            )));
        }
        let (luma, _) = format.plane_formats();
        let info = StageSurfaceInfo {
            width,
            height,
            format: luma,
            planar: Some(format),
        };
        let bytes = format.frame_bytes(width, height)?;
        let linesize = luma.row_bytes(width)?;
        Ok(self.insert_stagesurface(info, bytes, linesize))
    }

    fn duplicator_monitor_info(&self, index: usize) -> GraphicsResult<Option<MonitorInfo>> {
        Ok(self
            .desktop
            .monitors()?
            .into_iter()
            .find(|info| info.index == index))
    }

    fn duplicator_monitor_index(&self, monitor: &MonitorId) -> GraphicsResult<Option<usize>> {
        self.desktop.monitor_index(monitor)
    }

    fn duplicator_create(&mut self, monitor_index: usize) -> GraphicsResult<DuplicatorId> {
        let core = DuplicatorCore::open(
            Arc::clone(&self.desktop),
            monitor_index,
            self.duplicator_timeout,
        )?;
        let id = DuplicatorId::from_raw(self.alloc_id());
        self.duplicators.insert(id, SoftDuplicator { core, texture: None });
        Ok(id)
    }

    fn duplicator_destroy(&mut self, duplicator: DuplicatorId) -> GraphicsResult<()> {
        let entry = self
            .duplicators
            .remove(&duplicator)
            .ok_or(GraphicsError::InvalidHandle(DuplicatorId::KIND))?;
        if let Some(texture) = entry.texture {
            self.textures.remove(&texture);
        }
        Ok(())
    }

    fn duplicator_update_frame(&mut self, duplicator: DuplicatorId) -> GraphicsResult<bool> {
        let frame = self
            .duplicators
            .get_mut(&duplicator)
            .ok_or(GraphicsError::InvalidHandle(DuplicatorId::KIND))?
            .core
            .poll()?;
        match frame {
            Some(frame) => {
                self.publish_duplicated(duplicator, &frame)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn duplicator_texture(&self, duplicator: DuplicatorId) -> GraphicsResult<Option<TextureId>> {
        self.duplicator(duplicator).map(|d| d.texture)
    }

    fn duplicator_color_space(&self, duplicator: DuplicatorId) -> GraphicsResult<ColorSpace> {
        self.duplicator(duplicator).map(|d| d.core.color_space())
    }

    fn duplicator_sdr_white_level(&self, duplicator: DuplicatorId) -> GraphicsResult<f32> {
        self.duplicator(duplicator).map(|d| d.core.sdr_white_level())
    }
}

impl IoSurfaceInterop for SoftDevice {
    fn texture_create_from_iosurface(
        &mut self,
        surface: &IoSurfaceRef,
    ) -> GraphicsResult<TextureId> {
        if surface.surface.0 == 0 {
            return Err(GraphicsError::InvalidHandle("iosurface"));
        }
        let desc = TextureDesc::texture_2d(surface.width, surface.height, surface.format);
        let id = self.create_imported(desc)?;
        self.texture_mut(id)?.iosurface = Some(*surface);
        Ok(id)
    }

    fn texture_rebind_iosurface(
        &mut self,
        texture: TextureId,
        surface: &IoSurfaceRef,
    ) -> GraphicsResult<()> {
        if self.texture(texture)?.iosurface.is_none() {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "texture {} was not created from an iosurface",
                texture.raw()
            )));
        }
        let desc = TextureDesc::texture_2d(surface.width, surface.height, surface.format);
        desc.validate()?;
        let mut rebound = SoftTexture::new(desc, &[], self.token())?;
        rebound.iosurface = Some(*surface);
        *self.texture_mut(texture)? = rebound;
        Ok(())
    }

    fn texture_open_shared(&mut self, handle: u32) -> GraphicsResult<TextureId> {
        self.open_shared_texture(handle)
    }
}

impl DmaBufInterop for SoftDevice {
    fn texture_create_from_dmabuf(&mut self, import: &DmaBufImport) -> GraphicsResult<TextureId> {
        if import.planes.is_empty() || import.planes.len() > MAX_DMABUF_PLANES {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "dma-buf import needs 1..={MAX_DMABUF_PLANES} planes, got {}",
                import.planes.len()
            )));
        }
        if ColorFormat::from_drm_fourcc(import.drm_format)
            .is_some_and(|f| f.linear_twin() != import.color_format.linear_twin())
        {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "drm format {:#010x} does not match {}",
                import.drm_format,
                import.color_format.as_str()
            )));
        }
        let row = import.color_format.row_bytes(import.width)?;
        if let Some(plane) = import.planes.iter().find(|p| p.fd < 0) {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "dma-buf plane has invalid fd {}",
                plane.fd
            )));
        }
        if (import.planes[0].stride as usize) < row {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "dma-buf stride {} is shorter than a row ({row} bytes)",
                import.planes[0].stride
            )));
        }
        self.create_imported(TextureDesc::texture_2d(
            import.width,
            import.height,
            import.color_format,
        ))
    }

    fn query_dmabuf_capabilities(&self) -> DmaBufCapabilities {
        DmaBufCapabilities {
            implicit_modifiers_support: true,
        }
    }

    fn query_dmabuf_modifiers_for_format(&self, drm_format: u32) -> GraphicsResult<Vec<u64>> {
        ColorFormat::from_drm_fourcc(drm_format)
            .map(|_| vec![DRM_FORMAT_MOD_LINEAR])
            .ok_or_else(|| {
                GraphicsError::Unsupported(format!("drm format {drm_format:#010x}"))
            })
    }

    fn texture_create_from_pixmap(&mut self, import: &PixmapImport) -> GraphicsResult<TextureId> {
        if import.pixmap.0 == 0 {
            return Err(GraphicsError::InvalidHandle("pixmap"));
        }
        self.create_imported(TextureDesc::texture_2d(
            import.width,
            import.height,
            import.format,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DeviceBackend;
    use crate::desktop::DuplicationPoll;
    use crate::duplicator::tests::scripted_desktop;
    use crate::exports::PlatformGroup;
    use crate::math::Vec4;
    use crate::resource::DmaBufPlane;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    fn device_with(desktop: Arc<dyn crate::desktop::DesktopSource>) -> SoftDevice {
        SoftDevice::new(
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicBool::new(false)),
            desktop,
            Some(PlatformGroup::Win32),
        )
    }

    fn device() -> SoftDevice {
        device_with(Arc::new(scripted_desktop()))
    }

    #[test]
    fn keyed_mutex_is_shared_across_devices() -> GraphicsResult<()> {
        let mut producer = device();
        let mut consumer = device();
        let desc = TextureDesc::texture_2d(4, 4, ColorFormat::Bgra)
            .with_flags(TextureFlags::SHARED_KM_TEX);
        let tex = producer.create_texture(&desc, &[])?;
        let handle = producer.texture_get_shared_handle(tex)?;
        let opened = consumer.texture_open_nt_shared(handle)?;

        assert_eq!(
            producer.texture_acquire_sync(tex, 0, Duration::ZERO)?,
            SyncStatus::Acquired
        );
        assert_eq!(
            consumer.texture_acquire_sync(opened, 1, Duration::from_millis(5))?,
            SyncStatus::Timeout
        );
        producer.texture_release_sync(tex, 0)?;
        assert_eq!(
            consumer.texture_acquire_sync(opened, 1, Duration::ZERO)?,
            SyncStatus::Acquired
        );
        assert!(matches!(
            consumer.texture_release_sync(opened, 0),
            Err(GraphicsError::SyncViolation(_))
        ));
        consumer.texture_release_sync(opened, 1)
    }

    #[test]
    fn destroying_holder_abandons_mutex() -> GraphicsResult<()> {
        let mut a = device();
        let mut b = device();
        let desc = TextureDesc::texture_2d(2, 2, ColorFormat::Bgra)
            .with_flags(TextureFlags::SHARED_KM_TEX);
        let tex = a.create_texture(&desc, &[])?;
        let handle = a.texture_get_shared_handle(tex)?;
        let opened = Win32Interop::texture_open_shared(&mut b, handle)?;
        a.texture_acquire_sync(tex, 7, Duration::ZERO)?;
        a.destroy_texture(tex)?;
        assert_eq!(
            b.texture_acquire_sync(opened, 7, Duration::ZERO)?,
            SyncStatus::Abandoned
        );
        Ok(())
    }

    #[test]
    fn gdi_dc_blocks_destroy_until_released() -> GraphicsResult<()> {
        let mut dev = device();
        let tex = dev.texture_create_gdi(8, 8)?;
        dev.texture_get_dc(tex)?;
        assert!(matches!(
            dev.destroy_texture(tex),
            Err(GraphicsError::ResourceBusy(_))
        ));
        dev.texture_release_dc(tex)?;
        assert!(dev.texture_release_dc(tex).is_err());
        dev.destroy_texture(tex)
    }

    #[test]
    fn unchanged_desktop_keeps_duplicator_texture() -> GraphicsResult<()> {
        let desktop = scripted_desktop();
        let script = Arc::clone(&desktop.script);
        let mut dev = device_with(Arc::new(desktop));
        let dup = dev.duplicator_create(0)?;
        assert!(!dev.duplicator_update_frame(dup)?);
        assert_eq!(dev.duplicator_texture(dup)?, None);

        if let Ok(mut script) = script.lock() {
            script.push_back(DuplicationPoll::Frame(CapturedFrame::solid(
                4,
                2,
                ColorFormat::Bgra,
                Vec4::new(0.0, 0.0, 1.0, 1.0),
            )?));
        }
        assert!(dev.duplicator_update_frame(dup)?);
        let texture = dev.duplicator_texture(dup)?;
        assert!(texture.is_some());

        assert!(!dev.duplicator_update_frame(dup)?);
        assert_eq!(dev.duplicator_texture(dup)?, texture);
        if let Some(texture) = texture {
            let first = dev.texture(texture)?.with_level(0, |b| b[..4].to_vec())?;
            assert_eq!(first, [255, 0, 0, 255]);
        }
        dev.duplicator_destroy(dup)?;
        assert!(dev.duplicator_texture(dup).is_err());
        Ok(())
    }

    #[test]
    fn planar_stage_surface_holds_both_planes() -> GraphicsResult<()> {
        let mut dev = device();
        let (luma, _chroma) =
            dev.create_planar(PlanarFormat::Nv12, 4, 4, TextureFlags::RENDER_TARGET)?;
        let stage = dev.stagesurface_create_planar(PlanarFormat::Nv12, 4, 4)?;
        dev.stage_texture(stage, luma)?;
        dev.map_stagesurface(stage)?;
        assert_eq!(dev.stagesurface_mapped_data(stage)?.len(), 16 + 8);
        dev.unmap_stagesurface(stage)
    }

    #[test]
    fn dmabuf_import_validates_planes() -> GraphicsResult<()> {
        let mut dev = device();
        let plane = DmaBufPlane {
            fd: 3,
            offset: 0,
            stride: 64,
            modifier: DRM_FORMAT_MOD_LINEAR,
        };
        let import = DmaBufImport {
            width: 16,
            height: 4,
            drm_format: u32::from_le_bytes(*b"AR24"),
            color_format: ColorFormat::Bgra,
            planes: vec![plane],
        };
        dev.texture_create_from_dmabuf(&import)?;

        let narrow = DmaBufImport {
            planes: vec![DmaBufPlane { stride: 32, ..plane }],
            ..import.clone()
        };
        assert!(dev.texture_create_from_dmabuf(&narrow).is_err());
        assert_eq!(
            dev.query_dmabuf_modifiers_for_format(import.drm_format)?,
            vec![DRM_FORMAT_MOD_LINEAR]
        );
        assert!(dev.query_dmabuf_modifiers_for_format(0).is_err());
        Ok(())
    }
}
