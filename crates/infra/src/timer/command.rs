//! The contract an [`AdaptiveTimer`](super::AdaptiveTimer) drives.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use triggerhost_core::StorageError;

/// One step of periodic work plus the wait it wants before the next step.
///
/// The timer calls [`execute`](TimerCommand::execute), then reads
/// [`next_interval`](TimerCommand::next_interval) to decide how long to
/// sleep. A command speeds itself up or slows itself down simply by
/// reporting a different interval.
#[async_trait]
pub trait TimerCommand: Send + 'static {
    /// Wait before the next step. Read once before the first step (unless
    /// the timer executes immediately) and after every step.
    fn next_interval(&self) -> Duration;

    /// Perform one step.
    ///
    /// Errors are logged by the timer and never stop it; the command must
    /// leave itself in a state where the next step can run.
    async fn execute(&mut self, cancel: &CancellationToken) -> Result<(), StorageError>;
}
