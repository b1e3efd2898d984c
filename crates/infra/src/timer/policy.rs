//! Interval policies: how long to wait after a step, given its outcome.

use std::time::Duration;

/// Chooses the next wait from the outcome of the step that just ran.
pub trait DelayStrategy: Send + 'static {
    /// Interval to report before any step has run.
    fn current(&self) -> Duration;

    /// Record the outcome of a step and return the next wait.
    fn next_delay(&mut self, succeeded: bool) -> Duration;
}

/// Bounded exponential backoff for idle polling.
///
/// A successful step (work found) resets to `min`; every idle step doubles
/// the interval, capped at `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl ExponentialBackoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
        }
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}

impl DelayStrategy for ExponentialBackoff {
    fn current(&self) -> Duration {
        self.current
    }

    fn next_delay(&mut self, succeeded: bool) -> Duration {
        self.current = if succeeded {
            self.min
        } else {
            self.current
                .checked_mul(2)
                .unwrap_or(self.max)
                .max(self.min)
                .min(self.max)
        };
        self.current
    }
}

/// Renew-before-deadline policy.
///
/// Ticks at `normal` while attempts succeed. After `n` consecutive failures
/// the interval is `normal / (n + 1)`, never below `min`.
#[derive(Debug, Clone)]
pub struct LinearSpeedup {
    normal: Duration,
    min: Duration,
    failures: u32,
}

impl LinearSpeedup {
    pub fn new(normal: Duration, min: Duration) -> Self {
        Self {
            normal,
            min: min.min(normal),
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    fn interval(&self) -> Duration {
        (self.normal / self.failures.saturating_add(1)).max(self.min)
    }
}

impl DelayStrategy for LinearSpeedup {
    fn current(&self) -> Duration {
        self.interval()
    }

    fn next_delay(&mut self, succeeded: bool) -> Duration {
        if succeeded {
            self.failures = 0;
        } else {
            self.failures = self.failures.saturating_add(1);
        }
        self.interval()
    }
}
