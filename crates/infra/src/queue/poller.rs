//! Queue listener step: drain the queue, keep each message claimed while
//! its execution runs, then delete, release or quarantine it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use triggerhost_core::{ErrorClass, QueueMessage, StorageError, StorageResult};

use super::client::QueueClient;
use super::poison::{Disposition, PoisonPolicy};
use super::renewal::{ClaimedMessage, VisibilityRenewal};
use super::stats::PollerStatsHandle;
use crate::config::{ConfigError, QueuePollerConfig};
use crate::timer::{
    AdaptiveTimer, BackoffCommand, ExponentialBackoff, LinearSpeedup, SpeedupCommand, TimerStep,
};

/// User function invoked once per dequeued message.
///
/// Returns whether processing succeeded. The token is cancelled when the
/// poller is being stopped.
#[async_trait]
pub trait MessageExecutor: Send + Sync + 'static {
    async fn execute(&self, message: &QueueMessage, cancel: CancellationToken) -> bool;
}

#[async_trait]
impl<F, Fut> MessageExecutor for F
where
    F: Fn(QueueMessage, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send,
{
    async fn execute(&self, message: &QueueMessage, cancel: CancellationToken) -> bool {
        (self)(message.clone(), cancel).await
    }
}

/// Timer command type of a running poller.
pub type PollerCommand = BackoffCommand<QueuePoller>;

/// Polls one queue and dispatches its messages to a [`MessageExecutor`].
///
/// Each tick drains the queue one message at a time. Idle ticks back off
/// exponentially; finding work resets the interval to the minimum.
pub struct QueuePoller {
    queue: Arc<dyn QueueClient>,
    poison_queue: Option<Arc<dyn QueueClient>>,
    executor: Arc<dyn MessageExecutor>,
    config: QueuePollerConfig,
    policy: PoisonPolicy,
    stats: PollerStatsHandle,
}

impl QueuePoller {
    pub fn new<E: MessageExecutor>(
        queue: Arc<dyn QueueClient>,
        executor: E,
        config: QueuePollerConfig,
    ) -> Result<Self, ConfigError> {
        Self::with_shared_executor(queue, Arc::new(executor), config)
    }

    /// Like [`new`](Self::new), for an executor shared with other pollers.
    pub fn with_shared_executor(
        queue: Arc<dyn QueueClient>,
        executor: Arc<dyn MessageExecutor>,
        config: QueuePollerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            queue,
            poison_queue: None,
            executor,
            policy: PoisonPolicy::new(config.max_dequeue_count),
            config,
            stats: PollerStatsHandle::new(),
        })
    }

    /// Quarantine messages that keep failing into `poison_queue`.
    pub fn with_poison_queue(mut self, poison_queue: Arc<dyn QueueClient>) -> Self {
        self.poison_queue = Some(poison_queue);
        self
    }

    /// Report into an existing counter set instead of a fresh one.
    pub fn with_stats(mut self, stats: PollerStatsHandle) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> PollerStatsHandle {
        self.stats.clone()
    }

    pub fn queue_name(&self) -> &str {
        self.queue.name()
    }

    pub fn config(&self) -> &QueuePollerConfig {
        &self.config
    }

    /// Wrap the poller in its idle-backoff policy.
    pub fn into_command(self) -> PollerCommand {
        let backoff = ExponentialBackoff::new(
            self.config.min_polling_interval,
            self.config.max_polling_interval,
        );
        BackoffCommand::new(self, backoff)
    }

    /// A stopped timer that drives this poller.
    pub fn into_timer(self) -> AdaptiveTimer<PollerCommand> {
        let name = format!("queue:{}", self.queue.name());
        AdaptiveTimer::new(name, self.into_command())
    }

    async fn process(&self, message: QueueMessage, cancel: &CancellationToken) -> StorageResult<()> {
        self.stats.record(|stats| stats.dequeued += 1);
        debug!(
            queue = %self.queue.name(),
            message_id = %message.id,
            dequeue_count = message.dequeue_count,
            "message dequeued"
        );

        let claim = ClaimedMessage::new(message.clone());
        let renewal = VisibilityRenewal::new(
            self.queue.clone(),
            claim.clone(),
            self.config.visibility_timeout,
        );
        let speedup = LinearSpeedup::new(
            self.config.renewal_interval(),
            self.config.min_renewal_interval,
        );
        let mut renewal_timer = AdaptiveTimer::new(
            format!("visibility:{}:{}", self.queue.name(), message.id),
            SpeedupCommand::new(renewal, speedup),
        );
        if let Err(err) = renewal_timer.start(false) {
            warn!(queue = %self.queue.name(), message_id = %message.id, error = %err, "visibility renewal not started");
        }

        let succeeded = self.executor.execute(&message, cancel.child_token()).await;

        if let Err(err) = renewal_timer.stop(self.config.stop_timeout).await {
            warn!(queue = %self.queue.name(), message_id = %message.id, error = %err, "visibility renewal did not stop cleanly");
        }

        self.stats.record(|stats| {
            if succeeded {
                stats.succeeded += 1;
            } else {
                stats.failed += 1;
            }
        });
        if claim.is_lost() {
            debug!(queue = %self.queue.name(), message_id = %message.id, "claim was lost during execution");
        }

        self.dispose(&claim.current(), succeeded).await
    }

    async fn dispose(&self, message: &QueueMessage, succeeded: bool) -> StorageResult<()> {
        let disposition =
            self.policy
                .disposition(succeeded, message.dequeue_count, self.poison_queue.is_some());

        match (disposition, &self.poison_queue) {
            (Disposition::Delete, _) => {
                let outcome = self.queue.delete(message).await;
                self.absorb(outcome, message, "delete")?;
            }
            (Disposition::Release, _) => {
                let outcome = self
                    .queue
                    .update_visibility(message, Duration::ZERO)
                    .await
                    .map(|_| ());
                if self.absorb(outcome, message, "release")? {
                    self.stats.record(|stats| stats.released += 1);
                }
            }
            (Disposition::Quarantine, Some(poison)) => self.quarantine(poison.as_ref(), message).await?,
            (Disposition::Quarantine, None) | (Disposition::Leave, _) => {
                debug!(
                    queue = %self.queue.name(),
                    message_id = %message.id,
                    "message failed; leaving it for its claim to lapse"
                );
            }
        }
        Ok(())
    }

    /// Copy the body to the poison queue, then delete the original. The
    /// original stays put if the copy could not be written.
    async fn quarantine(&self, poison: &dyn QueueClient, message: &QueueMessage) -> StorageResult<()> {
        let copied = match poison.create_if_not_exists().await {
            Ok(()) => poison.enqueue(message.body.clone()).await,
            Err(err) => Err(err),
        };

        match copied {
            Ok(poison_id) => {
                info!(
                    queue = %self.queue.name(),
                    poison_queue = %poison.name(),
                    message_id = %message.id,
                    poison_message_id = %poison_id,
                    dequeue_count = message.dequeue_count,
                    "message moved to poison queue"
                );
                self.stats.record(|stats| stats.poisoned += 1);
                let outcome = self.queue.delete(message).await;
                self.absorb(outcome, message, "delete")?;
                Ok(())
            }
            Err(err) if err.class() == ErrorClass::Fatal => Err(err),
            Err(err) => {
                warn!(
                    queue = %self.queue.name(),
                    poison_queue = %poison.name(),
                    message_id = %message.id,
                    error = %err,
                    "could not copy message to poison queue; leaving it in place"
                );
                Ok(())
            }
        }
    }

    /// Disposal failures other than fatal ones are expected races: another
    /// consumer already owns or removed the message, or the service is
    /// briefly unavailable and the claim will lapse on its own.
    fn absorb(&self, outcome: StorageResult<()>, message: &QueueMessage, action: &str) -> StorageResult<bool> {
        let Err(err) = outcome else {
            return Ok(true);
        };
        match err.class() {
            ErrorClass::Conflict | ErrorClass::NotFound => {
                self.stats.record(|stats| stats.disposal_conflicts += 1);
                debug!(
                    queue = %self.queue.name(),
                    message_id = %message.id,
                    action,
                    error = %err,
                    "message claim already gone"
                );
                Ok(false)
            }
            ErrorClass::Transient => {
                warn!(
                    queue = %self.queue.name(),
                    message_id = %message.id,
                    action,
                    error = %err,
                    "message disposal failed"
                );
                Ok(false)
            }
            ErrorClass::Fatal => Err(err),
        }
    }
}

#[async_trait]
impl TimerStep for QueuePoller {
    async fn try_execute(&mut self, cancel: &CancellationToken) -> Result<bool, StorageError> {
        match self.queue.exists().await {
            Ok(true) => {}
            Ok(false) => {
                debug!(queue = %self.queue.name(), "queue does not exist");
                return Ok(false);
            }
            Err(err) if err.class() == ErrorClass::Fatal => return Err(err),
            Err(err) => {
                warn!(queue = %self.queue.name(), error = %err, "queue existence check failed");
                return Ok(false);
            }
        }

        let mut found = false;
        while !cancel.is_cancelled() {
            let message = match self.queue.dequeue(self.config.visibility_timeout).await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(err) if err.class() == ErrorClass::Fatal => return Err(err),
                Err(err) => {
                    warn!(queue = %self.queue.name(), error = %err, "dequeue failed");
                    return Ok(false);
                }
            };
            found = true;
            self.process(message, cancel).await?;
        }

        Ok(found)
    }
}
