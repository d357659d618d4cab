//! Native Windows desktop: DXGI desktop duplication and
//! Windows.Graphics.Capture on Direct3D 11.

pub(crate) mod device;
pub(crate) mod duplication;
pub(crate) mod monitor;
pub(crate) mod surface;
pub(crate) mod wgc;

use crate::desktop::{DesktopSource, OutputDuplication};
use crate::error::{GraphicsError, GraphicsResult};
use crate::monitor::MonitorInfo;

/// Enumerates DXGI outputs on every call so indices track the live layout.
#[derive(Debug, Default)]
pub(crate) struct WindowsDesktop;

impl WindowsDesktop {
    pub(crate) fn new() -> Self {
        Self
    }
}

impl DesktopSource for WindowsDesktop {
    fn monitors(&self) -> GraphicsResult<Vec<MonitorInfo>> {
        Ok(monitor::enumerate_resolved()?
            .into_iter()
            .map(|resolved| resolved.info)
            .collect())
    }

    fn duplicate_output(&self, index: usize) -> GraphicsResult<Box<dyn OutputDuplication>> {
        let resolved = monitor::enumerate_resolved()?
            .into_iter()
            .find(|m| m.info.index == index)
            .ok_or_else(|| {
                GraphicsError::InvalidDescriptor(format!("no monitor {index} to duplicate"))
            })?;
        Ok(Box::new(duplication::DxgiDuplication::open(&resolved)?))
    }
}
