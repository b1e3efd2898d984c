//! Adaptive queue polling with visibility renewal and poison handling.

pub mod client;
pub mod memory;
pub mod poison;
pub mod poller;
pub mod renewal;
pub mod stats;

use std::time::Duration;

use chrono::{DateTime, Utc};

pub use client::QueueClient;
pub use memory::{InMemoryQueue, QueueOp};
pub use poison::{poison_queue_name, Disposition, PoisonPolicy};
pub use poller::{MessageExecutor, PollerCommand, QueuePoller};
pub use renewal::{ClaimedMessage, VisibilityRenewal};
pub use stats::{PollerStats, PollerStatsHandle};

/// Wall-clock time `visibility` from now, saturating.
pub(crate) fn wall_clock_after(visibility: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::from_std(visibility)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
