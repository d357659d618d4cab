use std::thread::ThreadId;

use crate::error::{GraphicsError, GraphicsResult, violation};

/// Enter/leave bookkeeping of one device. Entries nest on the owning
/// thread; the owner is released when the depth returns to zero.
#[derive(Debug, Default)]
pub struct ContextTracker {
    owner: Option<ThreadId>,
    depth: usize,
}

impl ContextTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the depth after entering.
    pub fn enter(&mut self) -> GraphicsResult<usize> {
        let current = std::thread::current().id();
        match self.owner {
            Some(owner) if owner != current => {
                return Err(violation(GraphicsError::ContextViolation(format!(
                    "context entered from {current:?} while held by {owner:?}"
                ))));
            }
            _ => self.owner = Some(current),
        }
        self.depth += 1;
        Ok(self.depth)
    }

    /// Returns the depth after leaving.
    pub fn leave(&mut self) -> GraphicsResult<usize> {
        if self.depth == 0 {
            return Err(violation(GraphicsError::ContextViolation(
                "context left without a matching enter".into(),
            )));
        }
        let current = std::thread::current().id();
        if self.owner != Some(current) {
            return Err(violation(GraphicsError::ContextViolation(format!(
                "context left from {current:?} but entered on {:?}",
                self.owner
            ))));
        }
        self.depth -= 1;
        if self.depth == 0 {
            self.owner = None;
        }
        Ok(self.depth)
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn owner(&self) -> Option<ThreadId> {
        self.owner
    }
}
