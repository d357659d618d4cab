//! Window and monitor capture.
//!
//! A [`CaptureService`] owns one provider, the sessions opened through it
//! and a reference-counted background thread that polls them. Each poll
//! posts the newest frame to the session's single-slot mailbox, which the
//! render thread drains in [`CaptureSession::render`].

pub mod provider;
mod session;
mod thread;

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::config::GraphicsConfig;
use crate::error::{GraphicsError, GraphicsResult};
use crate::monitor::MonitorId;
use crate::window::WindowId;

pub use provider::{
    CaptureItem, CapturePoll, CaptureProvider, CaptureTarget, ThreadAttachment,
    UnsupportedProvider,
};
pub use session::{CaptureSession, SessionState};

use session::{SessionRegistry, SessionShared};
use thread::{CaptureThread, ThreadWork};

struct ServiceInner {
    provider: Arc<dyn CaptureProvider>,
    sessions: Arc<SessionRegistry>,
}

impl ThreadWork for ServiceInner {
    fn attach(&self) -> GraphicsResult<ThreadAttachment> {
        self.provider.attach_thread()
    }

    fn sweep(&self) -> bool {
        self.sessions
            .snapshot()
            .iter()
            .fold(false, |any, session| session.poll_once() || any)
    }
}

pub struct CaptureService {
    inner: Arc<ServiceInner>,
    thread: CaptureThread,
}

impl CaptureService {
    pub fn new(provider: Arc<dyn CaptureProvider>, poll_interval: Duration) -> Self {
        log::debug!(
            "capture service using the {} provider (poll every {poll_interval:?})",
            provider.name()
        );
        Self {
            inner: Arc::new(ServiceInner {
                provider,
                sessions: Arc::new(SessionRegistry::default()),
            }),
            thread: CaptureThread::new(poll_interval),
        }
    }

    /// Process-wide service over the platform's native capture API.
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<CaptureService> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            Self::new(
                crate::platform::native_capture_provider(),
                GraphicsConfig::from_env().capture_poll_interval,
            )
        })
    }

    pub fn provider_name(&self) -> &'static str {
        self.inner.provider.name()
    }

    pub fn supported(&self) -> bool {
        self.inner.provider.supported()
    }

    pub fn cursor_toggle_supported(&self) -> bool {
        self.inner.provider.cursor_toggle_supported()
    }

    pub fn init_window(
        &self,
        cursor: bool,
        window: WindowId,
        client_area: bool,
        force_sdr: bool,
    ) -> GraphicsResult<CaptureSession> {
        if window.is_null() {
            return Err(GraphicsError::InvalidDescriptor(
                "cannot capture a null window".into(),
            ));
        }
        self.open(
            CaptureTarget::Window {
                window,
                client_area,
            },
            cursor,
            force_sdr,
        )
    }

    pub fn init_monitor(
        &self,
        cursor: bool,
        monitor: MonitorId,
        force_sdr: bool,
    ) -> GraphicsResult<CaptureSession> {
        self.open(CaptureTarget::Monitor(monitor), cursor, force_sdr)
    }

    fn open(
        &self,
        target: CaptureTarget,
        cursor: bool,
        force_sdr: bool,
    ) -> GraphicsResult<CaptureSession> {
        if !self.supported() {
            return Err(GraphicsError::Unsupported(format!(
                "{} capture is not supported",
                self.provider_name()
            )));
        }
        let item = self.inner.provider.open(&target, cursor)?;
        let hdr = item.source_hdr();
        let shared = Arc::new(SessionShared::new(target, cursor));
        shared.activate(item);
        self.inner.sessions.insert(Arc::clone(&shared));
        log::debug!(
            "capture session opened ({} live)",
            self.inner.sessions.len()
        );
        Ok(CaptureSession::new(
            shared,
            Arc::clone(&self.inner.sessions),
            force_sdr,
            hdr,
        ))
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Starts the polling thread, or adds a reference when it runs.
    pub fn thread_start(&self) -> GraphicsResult<()> {
        let work: Arc<dyn ThreadWork> = self.inner.clone();
        self.thread.start(work)
    }

    /// Drops a reference; the thread exits with the last one.
    pub fn thread_stop(&self) -> GraphicsResult<()> {
        self.thread.stop()
    }

    pub fn thread_running(&self) -> bool {
        self.thread.is_running()
    }

    /// Polls every session once on the calling thread.
    pub fn poll_now(&self) -> bool {
        self.inner.sweep()
    }
}

pub fn capture_supported() -> bool {
    CaptureService::global().supported()
}

pub fn capture_cursor_toggle_supported() -> bool {
    CaptureService::global().cursor_toggle_supported()
}

pub fn init_window(
    cursor: bool,
    window: WindowId,
    client_area: bool,
    force_sdr: bool,
) -> GraphicsResult<CaptureSession> {
    CaptureService::global().init_window(cursor, window, client_area, force_sdr)
}

pub fn init_monitor(cursor: bool, monitor: MonitorId, force_sdr: bool) -> GraphicsResult<CaptureSession> {
    CaptureService::global().init_monitor(cursor, monitor, force_sdr)
}

pub fn thread_start() -> GraphicsResult<()> {
    CaptureService::global().thread_start()
}

pub fn thread_stop() -> GraphicsResult<()> {
    CaptureService::global().thread_stop()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::soft_device;
    use crate::format::{ColorFormat, ColorSpace};
    use crate::frame::CapturedFrame;
    use crate::math::Vec4;
    use crate::monitor::MonitorInfo;
    use crate::platform::headless::HeadlessDesktop;
    use std::time::Instant;

    fn hdr_desktop() -> (HeadlessDesktop, MonitorId) {
        let desktop = HeadlessDesktop::new();
        let id = MonitorId::from_name(5, r"\\.\DISPLAY1", true);
        desktop.add_monitor(MonitorInfo::new(0, id.clone(), 0, 0, 4, 2).with_hdr(200.0));
        (desktop, id)
    }

    fn service(desktop: &HeadlessDesktop) -> CaptureService {
        CaptureService::new(Arc::new(desktop.clone()), Duration::from_millis(1))
    }

    fn hdr_frame() -> GraphicsResult<CapturedFrame> {
        CapturedFrame::solid(4, 2, ColorFormat::Rgba16F, Vec4::new(2.0, 1.0, 0.5, 1.0))
    }

    #[test]
    fn hdr_monitor_reports_scrgb_unless_forced_sdr() -> GraphicsResult<()> {
        let (desktop, id) = hdr_desktop();
        let service = service(&desktop);
        let hdr = service.init_monitor(true, id.clone(), false)?;
        let sdr = service.init_monitor(true, id, true)?;
        assert_eq!(hdr.color_space(), ColorSpace::Rec709ScRgb);
        assert_eq!(sdr.color_space(), ColorSpace::Srgb);

        let sdr_monitor = MonitorId::from_name(6, r"\\.\DISPLAY2", true);
        desktop.add_monitor(MonitorInfo::new(1, sdr_monitor.clone(), 4, 0, 4, 2));
        let plain = service.init_monitor(true, sdr_monitor, false)?;
        assert_eq!(plain.color_space(), ColorSpace::Srgb);
        Ok(())
    }

    #[test]
    fn color_space_follows_the_uploaded_frame() -> GraphicsResult<()> {
        let (desktop, id) = hdr_desktop();
        let service = service(&desktop);
        let (_module, mut device) = soft_device()?;
        let mut ctx = device.enter_context()?;
        let mut session = service.init_monitor(true, id, false)?;

        let sdr_frame = CapturedFrame::solid(4, 2, ColorFormat::Bgra, Vec4::new(1.0, 1.0, 1.0, 1.0))?;
        desktop.present_monitor(0, sdr_frame)?;
        assert!(service.poll_now());
        assert_eq!(session.color_space(), ColorSpace::Rec709ScRgb);
        session.render(&mut ctx)?;
        assert_eq!(session.color_space(), ColorSpace::Srgb);

        desktop.present_monitor(0, hdr_frame()?)?;
        assert!(service.poll_now());
        assert_eq!(session.color_space(), ColorSpace::Srgb);
        session.render(&mut ctx)?;
        assert_eq!(session.color_space(), ColorSpace::Rec709ScRgb);
        session.free(&mut ctx)
    }

    #[test]
    fn render_uploads_latest_frame_and_free_releases_texture() -> GraphicsResult<()> {
        let (desktop, id) = hdr_desktop();
        let service = service(&desktop);
        let (module, mut device) = soft_device()?;
        let mut ctx = device.enter_context()?;
        let mut session = service.init_monitor(false, id, true)?;

        session.render(&mut ctx)?;
        assert_eq!(session.texture(), None);

        desktop.present_monitor(0, hdr_frame()?)?;
        service.poll_now();
        session.render(&mut ctx)?;
        let texture = session.texture();
        assert!(texture.is_some());
        assert_eq!((session.width(), session.height()), (4, 2));
        assert_ne!(
            texture.map(|t| ctx.texture_info(t)).transpose()?.map(|i| i.format),
            Some(ColorFormat::Rgba16F)
        );

        session.render(&mut ctx)?;
        assert_eq!(session.texture(), texture);

        session.free(&mut ctx)?;
        assert_eq!(service.session_count(), 0);
        drop(ctx);
        assert_eq!(module.live_allocations(), 0);
        Ok(())
    }

    #[test]
    fn lost_source_deactivates_session() -> GraphicsResult<()> {
        let desktop = HeadlessDesktop::new();
        let window = WindowId::from_raw_handle(0x99);
        desktop.add_window(window);
        let service = service(&desktop);
        let session = service.init_window(true, window, false, false)?;
        assert!(session.active());
        assert!(session.show_cursor(false));
        assert!(!session.cursor_visible());

        desktop.remove_window(&window);
        assert!(!service.poll_now());
        assert_eq!(session.state(), SessionState::Inactive);
        assert!(
            service
                .init_window(true, WindowId::from_raw_handle(0), false, false)
                .is_err()
        );
        drop(session);
        assert_eq!(service.session_count(), 0);
        Ok(())
    }

    #[test]
    fn unsupported_provider_rejects_sessions() {
        let service = CaptureService::new(Arc::new(UnsupportedProvider), Duration::from_millis(1));
        assert!(!service.supported());
        assert!(matches!(
            service.init_monitor(true, MonitorId::from_name(1, "A", true), false),
            Err(GraphicsError::Unsupported(_))
        ));
    }

    #[test]
    fn background_thread_polls_and_stops_with_last_reference() -> GraphicsResult<()> {
        let (desktop, id) = hdr_desktop();
        let service = service(&desktop);
        let (_module, mut device) = soft_device()?;
        let mut ctx = device.enter_context()?;
        let mut session = service.init_monitor(true, id, false)?;

        for _ in 0..3 {
            service.thread_start()?;
        }
        service.thread_stop()?;
        service.thread_stop()?;
        assert!(service.thread_running());

        desktop.present_monitor(0, hdr_frame()?)?;
        let deadline = Instant::now() + Duration::from_secs(5);
        while session.texture().is_none() && Instant::now() < deadline {
            session.render(&mut ctx)?;
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(session.texture().is_some());

        service.thread_stop()?;
        assert!(!service.thread_running());
        session.free(&mut ctx)
    }
}
