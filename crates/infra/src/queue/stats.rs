//! Poller counters.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

/// Running totals for one poller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollerStats {
    pub dequeued: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub released: u64,
    pub poisoned: u64,
    /// Disposals rejected because the claim had already moved on.
    pub disposal_conflicts: u64,
}

/// Shared view of a poller's counters. Clones observe the same totals.
#[derive(Debug, Clone, Default)]
pub struct PollerStatsHandle {
    inner: Arc<Mutex<PollerStats>>,
}

impl PollerStatsHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> PollerStats {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn record(&self, update: impl FnOnce(&mut PollerStats)) {
        let mut stats = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut stats);
    }
}
