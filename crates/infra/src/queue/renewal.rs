//! Keeps a message claimed while its execution runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use triggerhost_core::{ErrorClass, QueueMessage, StorageError};

use super::client::QueueClient;
use super::wall_clock_after;
use crate::timer::TimerStep;

/// The message being processed, shared between the poller and the renewal
/// step so disposal always presents the latest pop receipt.
#[derive(Debug, Clone)]
pub struct ClaimedMessage {
    message: Arc<Mutex<QueueMessage>>,
    lost: Arc<AtomicBool>,
}

impl ClaimedMessage {
    pub fn new(message: QueueMessage) -> Self {
        Self {
            message: Arc::new(Mutex::new(message)),
            lost: Arc::new(AtomicBool::new(false)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueMessage> {
        self.message.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the message carrying the current receipt.
    pub fn current(&self) -> QueueMessage {
        self.lock().clone()
    }

    /// True once a renewal found the claim gone.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }
}

/// [`TimerStep`] that extends the visibility window of one message.
///
/// Succeeds when the window was moved. Transient failures count as failed
/// attempts so the surrounding speedup policy retries sooner. Once the
/// claim is gone (receipt rejected or message deleted) every later tick is
/// a no-op.
pub struct VisibilityRenewal {
    queue: Arc<dyn QueueClient>,
    claim: ClaimedMessage,
    visibility: Duration,
}

impl VisibilityRenewal {
    pub fn new(queue: Arc<dyn QueueClient>, claim: ClaimedMessage, visibility: Duration) -> Self {
        Self {
            queue,
            claim,
            visibility,
        }
    }
}

#[async_trait]
impl TimerStep for VisibilityRenewal {
    async fn try_execute(&mut self, _cancel: &CancellationToken) -> Result<bool, StorageError> {
        if self.claim.is_lost() {
            return Ok(true);
        }

        let message = self.claim.current();
        match self.queue.update_visibility(&message, self.visibility).await {
            Ok(receipt) => {
                let mut current = self.claim.lock();
                current.pop_receipt = receipt;
                current.next_visible_at = wall_clock_after(self.visibility);
                debug!(queue = %self.queue.name(), message_id = %message.id, "message visibility renewed");
                Ok(true)
            }
            Err(err) => match err.class() {
                ErrorClass::Conflict | ErrorClass::NotFound => {
                    self.claim.lost.store(true, Ordering::Release);
                    info!(
                        queue = %self.queue.name(),
                        message_id = %message.id,
                        error = %err,
                        "message claim lost; renewal stopped"
                    );
                    Ok(true)
                }
                ErrorClass::Transient => {
                    warn!(
                        queue = %self.queue.name(),
                        message_id = %message.id,
                        error = %err,
                        "message visibility renewal failed; retrying sooner"
                    );
                    Ok(false)
                }
                ErrorClass::Fatal => Err(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::memory::{InMemoryQueue, QueueOp};

    const WINDOW: Duration = Duration::from_secs(10);

    async fn claimed(queue: &InMemoryQueue) -> ClaimedMessage {
        queue.enqueue(b"job".to_vec()).await.unwrap();
        ClaimedMessage::new(queue.dequeue(WINDOW).await.unwrap().unwrap())
    }

    #[tokio::test]
    async fn renewal_rotates_the_shared_receipt() {
        let queue = InMemoryQueue::new("orders");
        let claim = claimed(&queue).await;
        let before = claim.current().pop_receipt;
        let mut step = VisibilityRenewal::new(Arc::new(queue.clone()), claim.clone(), WINDOW);

        assert!(step.try_execute(&CancellationToken::new()).await.unwrap());

        assert_ne!(claim.current().pop_receipt, before);
        queue.delete(&claim.current()).await.unwrap();
    }

    #[tokio::test]
    async fn a_deleted_message_marks_the_claim_lost() {
        let queue = InMemoryQueue::new("orders");
        let claim = claimed(&queue).await;
        queue.delete(&claim.current()).await.unwrap();
        let mut step = VisibilityRenewal::new(Arc::new(queue), claim.clone(), WINDOW);

        assert!(step.try_execute(&CancellationToken::new()).await.unwrap());
        assert!(claim.is_lost());
    }

    #[tokio::test]
    async fn transient_failures_count_as_failed_attempts() {
        let queue = InMemoryQueue::new("orders");
        let claim = claimed(&queue).await;
        queue.inject_fault(QueueOp::UpdateVisibility, StorageError::server_busy());
        let mut step = VisibilityRenewal::new(Arc::new(queue), claim.clone(), WINDOW);

        assert!(!step.try_execute(&CancellationToken::new()).await.unwrap());
        assert!(!claim.is_lost());
    }
}
