//! In-process desktop with no display server behind it.
//!
//! Monitors and windows are registered by the caller and frames are
//! presented into them explicitly. Duplication sessions and capture
//! items observe every presented frame once, the same way a native
//! source reports only changed desktop images.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::capture::provider::{CaptureItem, CapturePoll, CaptureProvider, CaptureTarget};
use crate::desktop::{DesktopSource, DuplicationPoll, OutputDuplication};
use crate::error::{GraphicsError, GraphicsResult};
use crate::frame::CapturedFrame;
use crate::monitor::{MonitorInfo, monitor_index};
use crate::window::WindowId;

#[derive(Default)]
struct Presented {
    frame: Option<CapturedFrame>,
    serial: u64,
}

impl Presented {
    fn present(&mut self, mut frame: CapturedFrame) {
        self.serial += 1;
        frame.metadata.sequence = self.serial;
        frame.metadata.capture_time.get_or_insert_with(Instant::now);
        self.frame = Some(frame);
    }

    fn newer_than(&self, seen: u64) -> Option<&CapturedFrame> {
        (self.serial > seen).then_some(self.frame.as_ref()).flatten()
    }
}

#[derive(Default)]
struct HeadlessState {
    monitors: Vec<MonitorInfo>,
    monitor_frames: FxHashMap<usize, Presented>,
    windows: FxHashMap<WindowId, Presented>,
    /// Bumped whenever the monitor layout changes; open duplications of
    /// an older layout report access loss once.
    layout: u64,
}

/// Shared handle to a headless desktop. Clones see the same monitors,
/// windows and frames.
#[derive(Clone, Default)]
pub struct HeadlessDesktop {
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessDesktop {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HeadlessState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Adds or replaces the monitor at `info.index`.
    pub fn add_monitor(&self, info: MonitorInfo) {
        let mut state = self.lock();
        state.monitors.retain(|m| m.index != info.index);
        state.monitor_frames.entry(info.index).or_default();
        state.monitors.push(info);
        state.monitors.sort_by_key(|m| m.index);
        state.layout += 1;
    }

    pub fn remove_monitor(&self, index: usize) -> bool {
        let mut state = self.lock();
        let before = state.monitors.len();
        state.monitors.retain(|m| m.index != index);
        state.monitor_frames.remove(&index);
        state.layout += 1;
        state.monitors.len() != before
    }

    pub fn add_window(&self, window: WindowId) {
        self.lock().windows.entry(window).or_default();
    }

    pub fn remove_window(&self, window: &WindowId) -> bool {
        self.lock().windows.remove(window).is_some()
    }

    pub fn present_monitor(&self, index: usize, frame: CapturedFrame) -> GraphicsResult<()> {
        let mut state = self.lock();
        let slot = state
            .monitor_frames
            .get_mut(&index)
            .ok_or_else(|| GraphicsError::InvalidDescriptor(format!("no monitor {index}")))?;
        slot.present(frame);
        Ok(())
    }

    pub fn present_window(&self, window: &WindowId, frame: CapturedFrame) -> GraphicsResult<()> {
        let mut state = self.lock();
        let slot = state.windows.get_mut(window).ok_or_else(|| {
            GraphicsError::InvalidDescriptor(format!("no window {}", window.stable_id()))
        })?;
        slot.present(frame);
        Ok(())
    }
}

impl DesktopSource for HeadlessDesktop {
    fn monitors(&self) -> GraphicsResult<Vec<MonitorInfo>> {
        Ok(self.lock().monitors.clone())
    }

    fn duplicate_output(&self, index: usize) -> GraphicsResult<Box<dyn OutputDuplication>> {
        let state = self.lock();
        if !state.monitor_frames.contains_key(&index) {
            return Err(GraphicsError::InvalidDescriptor(format!(
                "no monitor {index} to duplicate"
            )));
        }
        Ok(Box::new(HeadlessOutput {
            desktop: self.clone(),
            index,
            layout: state.layout,
            seen: state.monitor_frames.get(&index).map_or(0, |p| p.serial),
        }))
    }
}

struct HeadlessOutput {
    desktop: HeadlessDesktop,
    index: usize,
    layout: u64,
    seen: u64,
}

impl OutputDuplication for HeadlessOutput {
    fn acquire_next_frame(&mut self, _timeout: Duration) -> GraphicsResult<DuplicationPoll> {
        let state = self.desktop.lock();
        if state.layout != self.layout {
            return Ok(DuplicationPoll::AccessLost);
        }
        let Some(presented) = state.monitor_frames.get(&self.index) else {
            return Ok(DuplicationPoll::AccessLost);
        };
        Ok(match presented.newer_than(self.seen) {
            Some(frame) => {
                self.seen = presented.serial;
                DuplicationPoll::Frame(frame.clone())
            }
            None => DuplicationPoll::NoChange,
        })
    }
}

enum Source {
    Monitor(usize),
    Window(WindowId),
}

struct HeadlessItem {
    desktop: HeadlessDesktop,
    source: Source,
    hdr: bool,
    seen: u64,
}

impl CaptureItem for HeadlessItem {
    fn poll(&mut self) -> GraphicsResult<CapturePoll> {
        let state = self.desktop.lock();
        let presented = match &self.source {
            Source::Monitor(index) => state.monitor_frames.get(index),
            Source::Window(window) => state.windows.get(window),
        };
        let Some(presented) = presented else {
            return Ok(CapturePoll::SourceLost);
        };
        Ok(match presented.newer_than(self.seen) {
            Some(frame) => {
                self.seen = presented.serial;
                CapturePoll::Frame(frame.clone())
            }
            None => CapturePoll::NoChange,
        })
    }

    fn source_hdr(&self) -> bool {
        self.hdr
    }

    fn set_cursor_visible(&mut self, _visible: bool) -> bool {
        true
    }
}

impl CaptureProvider for HeadlessDesktop {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn supported(&self) -> bool {
        true
    }

    fn cursor_toggle_supported(&self) -> bool {
        true
    }

    fn open(&self, target: &CaptureTarget, _cursor: bool) -> GraphicsResult<Box<dyn CaptureItem>> {
        let state = self.lock();
        let source = match target {
            CaptureTarget::Monitor(monitor) => monitor_index(&state.monitors, monitor)
                .map(Source::Monitor)
                .ok_or_else(|| GraphicsError::InvalidDescriptor(format!("unknown {monitor}")))?,
            CaptureTarget::Window { window, .. } if state.windows.contains_key(window) => {
                Source::Window(*window)
            }
            CaptureTarget::Window { .. } => {
                return Err(GraphicsError::InvalidDescriptor(format!(
                    "unknown {}",
                    target.describe()
                )));
            }
        };
        let hdr = match source {
            Source::Monitor(index) => state.monitors.iter().any(|m| m.index == index && m.hdr),
            Source::Window(_) => false,
        };
        drop(state);
        log::debug!("headless capture of {} opened", target.describe());
        Ok(Box::new(HeadlessItem {
            desktop: self.clone(),
            source,
            hdr,
            seen: 0,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ColorFormat;
    use crate::math::Vec4;
    use crate::monitor::MonitorId;

    fn frame() -> GraphicsResult<CapturedFrame> {
        CapturedFrame::solid(2, 2, ColorFormat::Bgra, Vec4::new(0.0, 0.0, 1.0, 1.0))
    }

    #[test]
    fn duplication_sees_each_frame_once() -> GraphicsResult<()> {
        let desktop = HeadlessDesktop::new();
        desktop.add_monitor(MonitorInfo::new(0, MonitorId::from_name(1, "A", true), 0, 0, 2, 2));
        let mut output = desktop.duplicate_output(0)?;
        assert!(matches!(
            output.acquire_next_frame(Duration::ZERO)?,
            DuplicationPoll::NoChange
        ));
        desktop.present_monitor(0, frame()?)?;
        assert!(matches!(
            output.acquire_next_frame(Duration::ZERO)?,
            DuplicationPoll::Frame(f) if f.metadata.sequence == 1
        ));
        assert!(matches!(
            output.acquire_next_frame(Duration::ZERO)?,
            DuplicationPoll::NoChange
        ));
        Ok(())
    }

    #[test]
    fn layout_change_invalidates_duplication() -> GraphicsResult<()> {
        let desktop = HeadlessDesktop::new();
        desktop.add_monitor(MonitorInfo::new(0, MonitorId::from_name(1, "A", true), 0, 0, 2, 2));
        let mut output = desktop.duplicate_output(0)?;
        desktop.add_monitor(MonitorInfo::new(1, MonitorId::from_name(2, "B", false), 2, 0, 2, 2));
        assert!(matches!(
            output.acquire_next_frame(Duration::ZERO)?,
            DuplicationPoll::AccessLost
        ));
        assert!(desktop.duplicate_output(7).is_err());
        Ok(())
    }

    #[test]
    fn closed_window_is_reported_lost() -> GraphicsResult<()> {
        let desktop = HeadlessDesktop::new();
        let window = WindowId::from_raw_handle(0x42);
        desktop.add_window(window);
        let target = CaptureTarget::Window {
            window,
            client_area: true,
        };
        let mut item = desktop.open(&target, false)?;
        desktop.present_window(&window, frame()?)?;
        assert!(matches!(item.poll()?, CapturePoll::Frame(_)));
        assert!(matches!(item.poll()?, CapturePoll::NoChange));
        assert!(desktop.remove_window(&window));
        assert!(matches!(item.poll()?, CapturePoll::SourceLost));
        assert!(desktop.open(&target, false).is_err());
        Ok(())
    }
}
