//! Adaptive timers: run a step, wait however long the step asks for, repeat.
//!
//! - [`TimerCommand`]: one step plus the interval it wants next
//! - [`AdaptiveTimer`]: the background loop driving a command
//! - [`ExponentialBackoff`] / [`LinearSpeedup`]: interval policies
//! - [`StrategyCommand`]: glue between a [`TimerStep`] and a policy

pub mod adaptive;
pub mod command;
pub mod policy;
pub mod step;

use std::time::Duration;

use tokio::time::Instant;

pub use adaptive::{AdaptiveTimer, TimerError};
pub use command::TimerCommand;
pub use policy::{DelayStrategy, ExponentialBackoff, LinearSpeedup};
pub use step::{BackoffCommand, SpeedupCommand, StrategyCommand, TimerStep};

/// Roughly thirty years; deadlines past this are treated as never.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + after` on tokio's clock, saturating instead of overflowing.
pub(crate) fn deadline_after(now: Instant, after: Duration) -> Instant {
    now.checked_add(after.min(FAR_FUTURE))
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn deadlines_saturate_instead_of_overflowing() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, Duration::from_secs(5)), now + Duration::from_secs(5));
        assert_eq!(deadline_after(now, Duration::MAX), now + FAR_FUTURE);
        assert_eq!(deadline_after(now, Duration::from_secs(u64::MAX)), now + FAR_FUTURE);
    }
}
