//! Per-monitor desktop duplication state shared by backends.

use std::sync::Arc;
use std::time::Duration;

use crate::desktop::{DesktopSource, DuplicationPoll, OutputDuplication};
use crate::error::{GraphicsError, GraphicsResult};
use crate::format::ColorSpace;
use crate::frame::CapturedFrame;
use crate::monitor::{DEFAULT_SDR_WHITE_LEVEL_NITS, MonitorInfo};

/// Owns the duplication session of one output and recreates it after
/// access loss. Backends turn the frames it yields into textures.
pub struct DuplicatorCore {
    source: Arc<dyn DesktopSource>,
    info: MonitorInfo,
    duplication: Option<Box<dyn OutputDuplication>>,
    timeout: Duration,
    color_space: ColorSpace,
    sdr_white_level: f32,
    frames: u64,
}

impl DuplicatorCore {
    pub fn open(
        source: Arc<dyn DesktopSource>,
        monitor_index: usize,
        timeout: Duration,
    ) -> GraphicsResult<Self> {
        let info = source
            .monitors()?
            .into_iter()
            .find(|info| info.index == monitor_index)
            .ok_or_else(|| {
                GraphicsError::InvalidDescriptor(format!("no monitor at index {monitor_index}"))
            })?;
        let duplication = source.duplicate_output(monitor_index)?;
        log::debug!(
            "duplicating monitor {monitor_index} ({}) {}x{}",
            info.id,
            info.cx,
            info.cy
        );
        Ok(Self {
            source,
            color_space: if info.hdr {
                ColorSpace::Rec709ScRgb
            } else {
                ColorSpace::Srgb
            },
            sdr_white_level: info.sdr_white_level_nits,
            info,
            duplication: Some(duplication),
            timeout,
            frames: 0,
        })
    }

    pub fn monitor_info(&self) -> &MonitorInfo {
        &self.info
    }

    pub fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    pub fn sdr_white_level(&self) -> f32 {
        self.sdr_white_level
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames
    }

    /// Next desktop image, or `None` when the screen did not change or
    /// the session had to be recreated.
    pub fn poll(&mut self) -> GraphicsResult<Option<CapturedFrame>> {
        let Some(duplication) = self.duplication.as_mut() else {
            self.reopen();
            return Ok(None);
        };

        match duplication.acquire_next_frame(self.timeout)? {
            DuplicationPoll::Frame(frame) => {
                self.color_space = frame.metadata.color_space;
                self.sdr_white_level = if frame.metadata.sdr_white_level_nits > 0.0 {
                    frame.metadata.sdr_white_level_nits
                } else {
                    DEFAULT_SDR_WHITE_LEVEL_NITS
                };
                self.frames += 1;
                Ok(Some(frame))
            }
            DuplicationPoll::NoChange => Ok(None),
            DuplicationPoll::AccessLost => {
                log::info!("duplication of monitor {} lost access", self.info.index);
                self.duplication = None;
                self.reopen();
                Ok(None)
            }
        }
    }

    fn reopen(&mut self) {
        match self.source.duplicate_output(self.info.index) {
            Ok(duplication) => self.duplication = Some(duplication),
            Err(err) => log::debug!(
                "duplication of monitor {} not yet recreated: {err}",
                self.info.index
            ),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::format::ColorFormat;
    use crate::math::Vec4;
    use crate::monitor::MonitorId;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Desktop whose outputs replay scripted polls.
    #[derive(Default)]
    pub(crate) struct ScriptedDesktop {
        pub(crate) monitors: Vec<MonitorInfo>,
        pub(crate) script: Arc<Mutex<VecDeque<DuplicationPoll>>>,
        pub(crate) opened: Arc<Mutex<usize>>,
    }

    struct ScriptedOutput {
        script: Arc<Mutex<VecDeque<DuplicationPoll>>>,
    }

    impl OutputDuplication for ScriptedOutput {
        fn acquire_next_frame(&mut self, _timeout: Duration) -> GraphicsResult<DuplicationPoll> {
            Ok(self
                .script
                .lock()
                .ok()
                .and_then(|mut script| script.pop_front())
                .unwrap_or(DuplicationPoll::NoChange))
        }
    }

    impl DesktopSource for ScriptedDesktop {
        fn monitors(&self) -> GraphicsResult<Vec<MonitorInfo>> {
            Ok(self.monitors.clone())
        }

        fn duplicate_output(&self, index: usize) -> GraphicsResult<Box<dyn OutputDuplication>> {
            if index >= self.monitors.len() {
                return Err(GraphicsError::InvalidDescriptor("no such output".into()));
            }
            if let Ok(mut opened) = self.opened.lock() {
                *opened += 1;
            }
            Ok(Box::new(ScriptedOutput {
                script: Arc::clone(&self.script),
            }))
        }
    }

    pub(crate) fn scripted_desktop() -> ScriptedDesktop {
        ScriptedDesktop {
            monitors: vec![MonitorInfo::new(
                0,
                MonitorId::from_name(1, r"\\.\DISPLAY1", true),
                0,
                0,
                4,
                2,
            )],
            ..ScriptedDesktop::default()
        }
    }

    #[test]
    fn access_loss_recreates_duplication_without_a_frame() -> GraphicsResult<()> {
        let desktop = scripted_desktop();
        let script = Arc::clone(&desktop.script);
        let opened = Arc::clone(&desktop.opened);
        let mut core = DuplicatorCore::open(Arc::new(desktop), 0, Duration::ZERO)?;

        if let Ok(mut script) = script.lock() {
            script.push_back(DuplicationPoll::AccessLost);
            script.push_back(DuplicationPoll::Frame(CapturedFrame::solid(
                4,
                2,
                ColorFormat::Bgra,
                Vec4::new(0.0, 1.0, 0.0, 1.0),
            )?));
        }

        assert!(core.poll()?.is_none());
        assert_eq!(opened.lock().map(|n| *n).unwrap_or_default(), 2);
        assert!(core.poll()?.is_some());
        assert!(core.poll()?.is_none());
        assert_eq!(core.frames_delivered(), 1);
        Ok(())
    }

    #[test]
    fn hdr_frame_updates_color_space() -> GraphicsResult<()> {
        let desktop = scripted_desktop();
        let script = Arc::clone(&desktop.script);
        let mut core = DuplicatorCore::open(Arc::new(desktop), 0, Duration::ZERO)?;
        assert_eq!(core.color_space(), ColorSpace::Srgb);

        let mut frame =
            CapturedFrame::solid(4, 2, ColorFormat::Rgba16F, Vec4::new(1.0, 1.0, 1.0, 1.0))?;
        frame.metadata.sdr_white_level_nits = 240.0;
        if let Ok(mut script) = script.lock() {
            script.push_back(DuplicationPoll::Frame(frame));
        }
        core.poll()?;
        assert_eq!(core.color_space(), ColorSpace::Rec709ScRgb);
        assert_eq!(core.sdr_white_level(), 240.0);
        Ok(())
    }

    #[test]
    fn unknown_monitor_index_is_rejected() {
        let desktop = scripted_desktop();
        assert!(DuplicatorCore::open(Arc::new(desktop), 3, Duration::ZERO).is_err());
    }
}
