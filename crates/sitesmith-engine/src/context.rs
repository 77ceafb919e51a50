use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use crate::error::EngineError;

/// Passed to every collaborator call. Carries the session epoch the call was
/// issued under and a shared cancellation flag that flips when the session
/// abandons that epoch.
#[derive(Debug, Clone)]
pub struct CallContext {
    epoch: u64,
    cancelled: Arc<AtomicBool>,
}

impl CallContext {
    pub fn new(epoch: u64) -> Self {
        Self {
            epoch,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A context nothing will ever cancel.
    pub fn detached() -> Self {
        Self::new(0)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn ensure_active(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled.into());
        }
        Ok(())
    }
}

/// Coarse progress indicator: `Some(stage)` while work is running, `None`
/// when idle.
pub trait StatusSink: Send + Sync {
    fn set_stage(&self, stage: Option<&str>);
}

impl<F> StatusSink for F
where
    F: Fn(Option<&str>) + Send + Sync,
{
    fn set_stage(&self, stage: Option<&str>) {
        self(stage)
    }
}

pub struct NoStatus;

impl StatusSink for NoStatus {
    fn set_stage(&self, _stage: Option<&str>) {}
}
