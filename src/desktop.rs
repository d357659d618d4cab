//! Desktop image sources feeding desktop duplication.

use std::time::Duration;

use crate::error::GraphicsResult;
use crate::frame::CapturedFrame;
use crate::monitor::{MonitorId, MonitorInfo, monitor_index};

/// Result of waiting for the next desktop image.
#[derive(Debug)]
pub enum DuplicationPoll {
    Frame(CapturedFrame),
    /// Nothing changed within the timeout.
    NoChange,
    /// The duplication was invalidated (mode change, secure desktop) and
    /// must be recreated.
    AccessLost,
}

/// One output's duplication session.
pub trait OutputDuplication: Send {
    fn acquire_next_frame(&mut self, timeout: Duration) -> GraphicsResult<DuplicationPoll>;
}

/// Enumerates outputs and opens duplication sessions on them.
pub trait DesktopSource: Send + Sync {
    fn monitors(&self) -> GraphicsResult<Vec<MonitorInfo>>;

    fn duplicate_output(&self, index: usize) -> GraphicsResult<Box<dyn OutputDuplication>>;

    fn monitor_index(&self, monitor: &MonitorId) -> GraphicsResult<Option<usize>> {
        Ok(monitor_index(&self.monitors()?, monitor))
    }

    fn is_monitor_hdr(&self, monitor: &MonitorId) -> bool {
        self.monitors()
            .ok()
            .and_then(|monitors| {
                monitor_index(&monitors, monitor)
                    .and_then(|index| monitors.into_iter().find(|m| m.index == index))
            })
            .is_some_and(|info| info.hdr)
    }
}
