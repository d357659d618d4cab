use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use crate::device::GraphicsContext;
use crate::error::{GraphicsError, GraphicsResult};
use crate::format::{ColorFormat, ColorSpace, TextureFlags};
use crate::frame::CapturedFrame;
use crate::resource::{TextureDesc, TextureId};

use super::provider::{CaptureItem, CapturePoll, CaptureTarget};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Active,
    /// The source went away; the last frame stays in the texture.
    Inactive,
    Destroyed,
}

/// Half of a session shared with the capture thread.
pub(crate) struct SessionShared {
    target: CaptureTarget,
    item: Mutex<Option<Box<dyn CaptureItem>>>,
    /// Latest undelivered frame. Older frames are overwritten.
    mailbox: Mutex<Option<CapturedFrame>>,
    state: Mutex<SessionState>,
    cursor: AtomicBool,
}

impl SessionShared {
    pub(crate) fn new(target: CaptureTarget, cursor: bool) -> Self {
        Self {
            target,
            item: Mutex::new(None),
            mailbox: Mutex::new(None),
            state: Mutex::new(SessionState::Uninitialized),
            cursor: AtomicBool::new(cursor),
        }
    }

    pub(crate) fn activate(&self, item: Box<dyn CaptureItem>) {
        *lock(&self.item) = Some(item);
        *lock(&self.state) = SessionState::Active;
    }

    pub(crate) fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    fn set_state(&self, state: SessionState) {
        *lock(&self.state) = state;
    }

    /// Polls the item once from the capture thread; true when a frame was
    /// posted to the mailbox.
    pub(crate) fn poll_once(&self) -> bool {
        let mut item = lock(&self.item);
        let Some(capture) = item.as_mut() else {
            return false;
        };
        if self.state() != SessionState::Active {
            return false;
        }
        match capture.poll() {
            Ok(CapturePoll::Frame(frame)) => {
                *lock(&self.mailbox) = Some(frame);
                true
            }
            Ok(CapturePoll::NoChange) => false,
            Ok(CapturePoll::SourceLost) | Err(GraphicsError::SourceLost) => {
                log::info!("capture source lost: {}", self.target.describe());
                self.set_state(SessionState::Inactive);
                false
            }
            Err(err) => {
                log::warn!("capture of {} failed to poll: {err}", self.target.describe());
                false
            }
        }
    }

    /// Drops the item once no poll is in flight.
    fn shut_down(&self) {
        let item = lock(&self.item).take();
        drop(item);
        lock(&self.mailbox).take();
        self.set_state(SessionState::Destroyed);
    }
}

/// Sessions the capture thread sweeps.
#[derive(Default)]
pub(crate) struct SessionRegistry {
    sessions: Mutex<Vec<Arc<SessionShared>>>,
}

impl SessionRegistry {
    pub(crate) fn insert(&self, session: Arc<SessionShared>) {
        lock(&self.sessions).push(session);
    }

    fn remove(&self, session: &Arc<SessionShared>) {
        lock(&self.sessions).retain(|s| !Arc::ptr_eq(s, session));
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<SessionShared>> {
        lock(&self.sessions).clone()
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.sessions).len()
    }
}

/// Capture of one window or monitor, consumed on the render thread.
pub struct CaptureSession {
    shared: Arc<SessionShared>,
    registry: Arc<SessionRegistry>,
    force_sdr: bool,
    /// HDR state of the content in `texture`; seeded from the source.
    hdr: bool,
    texture: Option<TextureId>,
    extent: (u32, u32, ColorFormat),
    freed: bool,
}

impl CaptureSession {
    pub(crate) fn new(
        shared: Arc<SessionShared>,
        registry: Arc<SessionRegistry>,
        force_sdr: bool,
        hdr: bool,
    ) -> Self {
        Self {
            shared,
            registry,
            force_sdr,
            hdr,
            texture: None,
            extent: (0, 0, ColorFormat::Unknown),
            freed: false,
        }
    }

    pub fn target(&self) -> &CaptureTarget {
        &self.shared.target
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Returns false when the platform cannot toggle the cursor.
    pub fn show_cursor(&self, visible: bool) -> bool {
        let mut item = lock(&self.shared.item);
        let applied = item
            .as_mut()
            .is_some_and(|capture| capture.set_cursor_visible(visible));
        if applied {
            self.shared.cursor.store(visible, Ordering::Relaxed);
        }
        applied
    }

    pub fn cursor_visible(&self) -> bool {
        self.shared.cursor.load(Ordering::Relaxed)
    }

    pub fn color_space(&self) -> ColorSpace {
        if self.hdr && !self.force_sdr {
            ColorSpace::Rec709ScRgb
        } else {
            ColorSpace::Srgb
        }
    }

    /// Uploads the newest captured frame. Without a new frame, or while
    /// the capture thread holds the mailbox, the texture is left as is.
    /// [`Self::color_space`] follows the uploaded frame.
    pub fn render(&mut self, ctx: &mut GraphicsContext<'_>) -> GraphicsResult<()> {
        let frame = match self.shared.mailbox.try_lock() {
            Ok(mut slot) => slot.take(),
            Err(TryLockError::WouldBlock) => return Ok(()),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().take(),
        };
        let Some(frame) = frame else {
            return Ok(());
        };
        let hdr = frame.is_hdr();
        let frame = if self.force_sdr && hdr {
            frame.into_sdr()?
        } else {
            frame
        };

        let extent = (frame.width(), frame.height(), frame.format());
        let texture = match self.texture {
            Some(texture) if extent == self.extent => texture,
            stale => {
                if let Some(old) = stale {
                    ctx.texture_destroy(old)?;
                    self.texture = None;
                }
                let desc = TextureDesc::texture_2d(extent.0, extent.1, extent.2)
                    .with_flags(TextureFlags::DYNAMIC);
                let texture = ctx.texture_create(&desc, &[])?;
                log::debug!(
                    "capture texture for {} is {}x{} {}",
                    self.shared.target.describe(),
                    extent.0,
                    extent.1,
                    extent.2.as_str()
                );
                self.texture = Some(texture);
                self.extent = extent;
                texture
            }
        };
        let linesize = u32::try_from(frame.linesize()).map_err(|_| GraphicsError::BufferOverflow)?;
        ctx.texture_set_image(texture, frame.as_bytes(), linesize, false)?;
        self.hdr = hdr;
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.texture.map_or(0, |_| self.extent.0)
    }

    pub fn height(&self) -> u32 {
        self.texture.map_or(0, |_| self.extent.1)
    }

    pub fn texture(&self) -> Option<TextureId> {
        self.texture
    }

    /// Destroys the texture and stops capturing; returns after any poll
    /// in flight on the capture thread has finished.
    pub fn free(mut self, ctx: &mut GraphicsContext<'_>) -> GraphicsResult<()> {
        self.freed = true;
        self.registry.remove(&self.shared);
        self.shared.shut_down();
        match self.texture.take() {
            Some(texture) => ctx.texture_destroy(texture),
            None => Ok(()),
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if self.freed {
            return;
        }
        if self.texture.is_some() {
            log::warn!(
                "capture session for {} dropped without free; its texture leaks",
                self.shared.target.describe()
            );
        }
        self.registry.remove(&self.shared);
        self.shared.shut_down();
    }
}
