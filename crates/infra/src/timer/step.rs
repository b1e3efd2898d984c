//! Adapter that lets a [`DelayStrategy`] pick the interval of a command.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use triggerhost_core::StorageError;

use super::command::TimerCommand;
use super::policy::{DelayStrategy, ExponentialBackoff, LinearSpeedup};

/// A single attempt whose outcome steers the interval policy.
#[async_trait]
pub trait TimerStep: Send + 'static {
    /// `Ok(true)` when the attempt succeeded (work found, renewal accepted).
    ///
    /// An `Err` counts as a failed attempt and is handed back to the timer
    /// for logging.
    async fn try_execute(&mut self, cancel: &CancellationToken) -> Result<bool, StorageError>;
}

/// [`TimerCommand`] built from a step and an interval policy.
#[derive(Debug)]
pub struct StrategyCommand<S, D> {
    step: S,
    strategy: D,
    next: Duration,
}

/// Idle polling: slow down while nothing is found.
pub type BackoffCommand<S> = StrategyCommand<S, ExponentialBackoff>;

/// Deadline renewal: hurry up while attempts fail.
pub type SpeedupCommand<S> = StrategyCommand<S, LinearSpeedup>;

impl<S: TimerStep, D: DelayStrategy> StrategyCommand<S, D> {
    pub fn new(step: S, strategy: D) -> Self {
        let next = strategy.current();
        Self {
            step,
            strategy,
            next,
        }
    }

    pub fn step(&self) -> &S {
        &self.step
    }

    pub fn into_step(self) -> S {
        self.step
    }
}

#[async_trait]
impl<S: TimerStep, D: DelayStrategy> TimerCommand for StrategyCommand<S, D> {
    fn next_interval(&self) -> Duration {
        self.next
    }

    async fn execute(&mut self, cancel: &CancellationToken) -> Result<(), StorageError> {
        match self.step.try_execute(cancel).await {
            Ok(succeeded) => {
                self.next = self.strategy.next_delay(succeeded);
                Ok(())
            }
            Err(err) => {
                self.next = self.strategy.next_delay(false);
                Err(err)
            }
        }
    }
}
