use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{GroupSortError, Phase, Result};

/// Cooperative cancellation flag shared between the caller and a running pipeline.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn check(&self, phase: Phase) -> Result<()> {
        if self.is_requested() {
            Err(GroupSortError::Cancelled { phase })
        } else {
            Ok(())
        }
    }
}
