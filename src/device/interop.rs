//! Platform interop groups and device-loss registration.
//!
//! Each group is optional: calling into a group the backend did not
//! export fails with [`GraphicsError::Unsupported`] instead of panicking.

use std::time::Duration;

use crate::backend::{DmaBufInterop, IoSurfaceInterop, Win32Interop};
use crate::error::{GraphicsError, GraphicsResult};
use crate::exports::Capability;
use crate::format::{ColorSpace, PlanarFormat};
use crate::monitor::{MonitorId, MonitorInfo};
use crate::resource::{
    DmaBufCapabilities, DmaBufImport, DuplicatorId, GdiDc, IoSurfaceRef, NativeObject,
    PixmapImport, StageSurfaceId, TextureId,
};
use crate::sync::{DeviceLossCallbacks, LossIdentity, SyncStatus};

use super::GraphicsContext;

/// Timeout value that waits until the keyed mutex is released.
pub const SYNC_INFINITE: u32 = u32::MAX;

fn sync_timeout(timeout_ms: u32) -> Duration {
    if timeout_ms == SYNC_INFINITE {
        Duration::MAX
    } else {
        Duration::from_millis(u64::from(timeout_ms))
    }
}

impl GraphicsContext<'_> {
    fn win32(&mut self) -> GraphicsResult<&mut dyn Win32Interop> {
        self.device
            .backend
            .win32()
            .ok_or_else(|| GraphicsError::Unsupported("win32 interop".into()))
    }

    fn iosurface(&mut self) -> GraphicsResult<&mut dyn IoSurfaceInterop> {
        self.device
            .backend
            .iosurface()
            .ok_or_else(|| GraphicsError::Unsupported("iosurface interop".into()))
    }

    fn dmabuf(&mut self) -> GraphicsResult<&mut dyn DmaBufInterop> {
        self.device
            .backend
            .dmabuf()
            .ok_or_else(|| GraphicsError::Unsupported("dma-buf interop".into()))
    }

    fn imported(&mut self, texture: GraphicsResult<TextureId>) -> GraphicsResult<TextureId> {
        let texture = texture?;
        self.device.track(TextureId::KIND, 1);
        Ok(texture)
    }

    // -- win32 -------------------------------------------------------------

    pub fn gdi_texture_available(&mut self) -> bool {
        self.win32().is_ok_and(|w| w.gdi_texture_available())
    }

    pub fn shared_texture_available(&mut self) -> bool {
        self.win32().is_ok_and(|w| w.shared_texture_available())
    }

    pub fn can_adapter_fast_clear(&mut self) -> bool {
        self.win32().is_ok_and(|w| w.can_adapter_fast_clear())
    }

    pub fn texture_create_gdi(&mut self, width: u32, height: u32) -> GraphicsResult<TextureId> {
        let texture = self.win32()?.texture_create_gdi(width, height);
        self.imported(texture)
    }

    /// At most one DC per texture; release it before the next get.
    pub fn texture_get_dc(&mut self, texture: TextureId) -> GraphicsResult<GdiDc> {
        self.win32()?.texture_get_dc(texture)
    }

    pub fn texture_release_dc(&mut self, texture: TextureId) -> GraphicsResult<()> {
        self.win32()?.texture_release_dc(texture)
    }

    pub fn texture_open_shared(&mut self, handle: u32) -> GraphicsResult<TextureId> {
        let texture = Win32Interop::texture_open_shared(self.win32()?, handle);
        self.imported(texture)
    }

    pub fn texture_open_nt_shared(&mut self, handle: u32) -> GraphicsResult<TextureId> {
        let texture = self.win32()?.texture_open_nt_shared(handle);
        self.imported(texture)
    }

    pub fn texture_get_shared_handle(&mut self, texture: TextureId) -> GraphicsResult<u32> {
        self.win32()?.texture_get_shared_handle(texture)
    }

    pub fn texture_wrap_obj(&mut self, object: NativeObject) -> GraphicsResult<TextureId> {
        let texture = self.win32()?.texture_wrap_obj(object);
        self.imported(texture)
    }

    /// Waits up to `timeout_ms` ([`SYNC_INFINITE`] for no limit) for the
    /// texture's keyed mutex.
    pub fn texture_acquire_sync(
        &mut self,
        texture: TextureId,
        key: u64,
        timeout_ms: u32,
    ) -> GraphicsResult<SyncStatus> {
        let status = self
            .win32()?
            .texture_acquire_sync(texture, key, sync_timeout(timeout_ms))?;
        if status != SyncStatus::Acquired {
            log::debug!(
                "keyed mutex of texture {} with key {key}: {status:?}",
                texture.raw()
            );
        }
        Ok(status)
    }

    pub fn texture_release_sync(&mut self, texture: TextureId, key: u64) -> GraphicsResult<()> {
        self.win32()?.texture_release_sync(texture, key)
    }

    /// Stage surface holding both planes of an NV12 or P010 frame.
    pub fn stagesurface_create_planar(
        &mut self,
        format: PlanarFormat,
        width: u32,
        height: u32,
    ) -> GraphicsResult<StageSurfaceId> {
        let surface = self
            .win32()?
            .stagesurface_create_planar(format, width, height)?;
        self.device.track(StageSurfaceId::KIND, 1);
        Ok(surface)
    }

    pub fn stagesurface_create_nv12(&mut self, width: u32, height: u32) -> GraphicsResult<StageSurfaceId> {
        self.stagesurface_create_planar(PlanarFormat::Nv12, width, height)
    }

    pub fn stagesurface_create_p010(&mut self, width: u32, height: u32) -> GraphicsResult<StageSurfaceId> {
        self.stagesurface_create_planar(PlanarFormat::P010, width, height)
    }

    // -- desktop duplication ----------------------------------------------

    pub fn duplicator_monitor_info(&mut self, index: usize) -> GraphicsResult<Option<MonitorInfo>> {
        self.win32()?.duplicator_monitor_info(index)
    }

    pub fn duplicator_monitor_index(&mut self, monitor: &MonitorId) -> GraphicsResult<Option<usize>> {
        self.win32()?.duplicator_monitor_index(monitor)
    }

    pub fn duplicator_create(&mut self, monitor_index: usize) -> GraphicsResult<DuplicatorId> {
        let duplicator = self.win32()?.duplicator_create(monitor_index)?;
        self.device.track(DuplicatorId::KIND, 1);
        log::debug!("duplicator {} opened on monitor {monitor_index}", duplicator.raw());
        Ok(duplicator)
    }

    /// Also releases the duplicator's texture.
    pub fn duplicator_destroy(&mut self, duplicator: DuplicatorId) -> GraphicsResult<()> {
        if let Some(texture) = self.win32()?.duplicator_texture(duplicator)? {
            self.unbind_texture(texture);
        }
        self.win32()?.duplicator_destroy(duplicator)?;
        self.device.track(DuplicatorId::KIND, -1);
        Ok(())
    }

    /// `Ok(false)` when the desktop did not change; the previous texture
    /// stays valid.
    pub fn duplicator_update_frame(&mut self, duplicator: DuplicatorId) -> GraphicsResult<bool> {
        let before = self.win32()?.duplicator_texture(duplicator)?;
        let updated = self.win32()?.duplicator_update_frame(duplicator)?;
        if updated {
            let after = self.win32()?.duplicator_texture(duplicator)?;
            if let Some(stale) = before.filter(|&before| Some(before) != after) {
                self.unbind_texture(stale);
            }
        }
        Ok(updated)
    }

    /// The duplicator owns this texture; do not destroy it.
    pub fn duplicator_texture(&mut self, duplicator: DuplicatorId) -> GraphicsResult<Option<TextureId>> {
        self.win32()?.duplicator_texture(duplicator)
    }

    pub fn duplicator_color_space(&mut self, duplicator: DuplicatorId) -> GraphicsResult<ColorSpace> {
        self.win32()?.duplicator_color_space(duplicator)
    }

    pub fn duplicator_sdr_white_level(&mut self, duplicator: DuplicatorId) -> GraphicsResult<f32> {
        self.win32()?.duplicator_sdr_white_level(duplicator)
    }

    // -- device loss ---------------------------------------------------------

    /// Callbacks run in registration order around a device rebuild.
    pub fn register_loss_callbacks(&mut self, callbacks: DeviceLossCallbacks) -> GraphicsResult<()> {
        if !self.device.exports.supports(Capability::DeviceLossCallbacks) {
            return Err(GraphicsError::Unsupported(
                "device loss callbacks need the win32 group".into(),
            ));
        }
        self.device.loss.register(callbacks);
        Ok(())
    }

    /// Unknown identities are ignored.
    pub fn unregister_loss_callbacks(&mut self, identity: LossIdentity) {
        if self.device.loss.unregister(identity) == 0 {
            log::debug!("no device loss callbacks registered as {identity:?}");
        }
    }

    // -- iosurface -----------------------------------------------------------

    pub fn texture_create_from_iosurface(&mut self, surface: &IoSurfaceRef) -> GraphicsResult<TextureId> {
        let texture = self.iosurface()?.texture_create_from_iosurface(surface);
        self.imported(texture)
    }

    pub fn texture_rebind_iosurface(
        &mut self,
        texture: TextureId,
        surface: &IoSurfaceRef,
    ) -> GraphicsResult<()> {
        self.iosurface()?.texture_rebind_iosurface(texture, surface)
    }

    pub fn texture_open_iosurface_shared(&mut self, handle: u32) -> GraphicsResult<TextureId> {
        let texture = IoSurfaceInterop::texture_open_shared(self.iosurface()?, handle);
        self.imported(texture)
    }

    // -- dma-buf -------------------------------------------------------------

    pub fn texture_create_from_dmabuf(&mut self, import: &DmaBufImport) -> GraphicsResult<TextureId> {
        let texture = self.dmabuf()?.texture_create_from_dmabuf(import);
        self.imported(texture)
    }

    pub fn query_dmabuf_capabilities(&mut self) -> GraphicsResult<DmaBufCapabilities> {
        Ok(self.dmabuf()?.query_dmabuf_capabilities())
    }

    pub fn query_dmabuf_modifiers_for_format(&mut self, drm_format: u32) -> GraphicsResult<Vec<u64>> {
        self.dmabuf()?.query_dmabuf_modifiers_for_format(drm_format)
    }

    pub fn texture_create_from_pixmap(&mut self, import: &PixmapImport) -> GraphicsResult<TextureId> {
        let texture = self.dmabuf()?.texture_create_from_pixmap(import);
        self.imported(texture)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{soft_device, soft_device_on};
    use super::*;
    use crate::exports::PlatformGroup;
    use crate::format::{ColorFormat, TextureFlags};
    use crate::frame::CapturedFrame;
    use crate::math::Vec4;
    use crate::platform::headless::HeadlessDesktop;
    use crate::resource::TextureDesc;
    use std::sync::{Arc, Mutex};

    fn desktop_with_monitor() -> HeadlessDesktop {
        let desktop = HeadlessDesktop::new();
        desktop.add_monitor(MonitorInfo::new(
            0,
            MonitorId::from_name(1, r"\\.\DISPLAY1", true),
            0,
            0,
            4,
            2,
        ));
        desktop
    }

    #[test]
    fn loss_callbacks_run_in_order_and_present_recovers() -> GraphicsResult<()> {
        let (module, mut device) = soft_device()?;
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = device.enter_context()?;
        for id in 1..=2 {
            let release_log = Arc::clone(&log);
            let rebuild_log = Arc::clone(&log);
            ctx.register_loss_callbacks(DeviceLossCallbacks::new(
                LossIdentity(id),
                move || {
                    if let Ok(mut log) = release_log.lock() {
                        log.push(format!("release {id}"));
                    }
                },
                move |_device| {
                    if let Ok(mut log) = rebuild_log.lock() {
                        log.push(format!("rebuild {id}"));
                    }
                },
            ))?;
        }

        let before = ctx.device_obj();
        module.simulate_device_removed();
        ctx.present()?;
        assert_ne!(ctx.device_obj(), before);
        let seen = log.lock().map(|l| l.clone()).unwrap_or_default();
        assert_eq!(seen, ["release 1", "release 2", "rebuild 1", "rebuild 2"]);

        ctx.unregister_loss_callbacks(LossIdentity(1));
        ctx.unregister_loss_callbacks(LossIdentity(42));
        module.simulate_device_removed();
        ctx.flush()?;
        let seen = log.lock().map(|l| l.len()).unwrap_or_default();
        assert_eq!(seen, 6);
        Ok(())
    }

    #[test]
    fn loss_callbacks_need_the_win32_group() -> GraphicsResult<()> {
        let (_module, mut device) =
            soft_device_on(Arc::new(HeadlessDesktop::new()), PlatformGroup::DmaBuf)?;
        let mut ctx = device.enter_context()?;
        let callbacks = DeviceLossCallbacks::new(LossIdentity(1), || {}, |_| {});
        assert!(matches!(
            ctx.register_loss_callbacks(callbacks),
            Err(GraphicsError::Unsupported(_))
        ));
        assert!(matches!(
            ctx.texture_create_gdi(4, 4),
            Err(GraphicsError::Unsupported(_))
        ));
        assert!(!ctx.gdi_texture_available());
        assert_eq!(ctx.query_dmabuf_modifiers_for_format(0x3432_5241)?, [0]);
        Ok(())
    }

    #[test]
    fn keyed_mutex_between_two_devices() -> GraphicsResult<()> {
        let (_module, mut producer) = soft_device()?;
        let (_other, mut consumer) = soft_device()?;
        let mut p = producer.enter_context()?;
        let mut c = consumer.enter_context()?;

        let tex = p.texture_create(
            &TextureDesc::texture_2d(4, 4, ColorFormat::Bgra).with_flags(TextureFlags::SHARED_KM_TEX),
            &[],
        )?;
        let handle = p.texture_get_shared_handle(tex)?;
        let opened = c.texture_open_nt_shared(handle)?;

        assert_eq!(p.texture_acquire_sync(tex, 0, 0)?, SyncStatus::Acquired);
        assert_eq!(c.texture_acquire_sync(opened, 1, 5)?, SyncStatus::Timeout);
        p.texture_release_sync(tex, 0)?;
        assert_eq!(
            c.texture_acquire_sync(opened, 1, SYNC_INFINITE)?,
            SyncStatus::Acquired
        );
        c.texture_release_sync(opened, 1)?;
        c.texture_destroy(opened)?;
        p.texture_destroy(tex)
    }

    #[test]
    fn duplicator_keeps_texture_when_desktop_is_unchanged() -> GraphicsResult<()> {
        let desktop = desktop_with_monitor();
        let (_module, mut device) =
            soft_device_on(Arc::new(desktop.clone()), PlatformGroup::Win32)?;
        let mut ctx = device.enter_context()?;

        let info = ctx.duplicator_monitor_info(0)?;
        assert_eq!(info.map(|i| (i.cx, i.cy)), Some((4, 2)));
        let dup = ctx.duplicator_create(0)?;
        assert!(!ctx.duplicator_update_frame(dup)?);
        assert_eq!(ctx.duplicator_texture(dup)?, None);

        desktop.present_monitor(
            0,
            CapturedFrame::solid(4, 2, ColorFormat::Bgra, Vec4::new(1.0, 0.0, 0.0, 1.0))?,
        )?;
        assert!(ctx.duplicator_update_frame(dup)?);
        let texture = ctx.duplicator_texture(dup)?;
        assert!(texture.is_some());
        assert!(!ctx.duplicator_update_frame(dup)?);
        assert_eq!(ctx.duplicator_texture(dup)?, texture);
        assert_eq!(ctx.duplicator_color_space(dup)?, ColorSpace::Srgb);

        ctx.duplicator_destroy(dup)?;
        assert!(ctx.duplicator_texture(dup).is_err());
        Ok(())
    }

    #[test]
    fn planar_stage_surfaces_are_tracked() -> GraphicsResult<()> {
        let (module, mut device) = soft_device()?;
        {
            let mut ctx = device.enter_context()?;
            let nv12 = ctx.stagesurface_create_nv12(4, 4)?;
            assert_eq!(ctx.stagesurface_info(nv12)?.planar, Some(PlanarFormat::Nv12));
            assert!(ctx.stagesurface_create_p010(3, 4).is_err());
            ctx.stagesurface_destroy(nv12)?;
        }
        assert_eq!(module.live_allocations(), 0);
        assert_eq!(device.live_resources(), 0);
        Ok(())
    }
}
