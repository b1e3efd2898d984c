//! Queue contract used by the poller.

use std::time::Duration;

use async_trait::async_trait;

use triggerhost_core::{MessageId, PopReceipt, QueueMessage, StorageResult};

/// A message queue with visibility-window claims.
///
/// A dequeued message is hidden from other consumers until its window
/// elapses. Updating the visibility or deleting the message requires the
/// pop receipt of the current claim.
#[async_trait]
pub trait QueueClient: Send + Sync {
    fn name(&self) -> &str;

    async fn exists(&self) -> StorageResult<bool>;

    async fn create_if_not_exists(&self) -> StorageResult<()>;

    async fn enqueue(&self, body: Vec<u8>) -> StorageResult<MessageId>;

    /// Claim the oldest visible message for `visibility`, if any.
    async fn dequeue(&self, visibility: Duration) -> StorageResult<Option<QueueMessage>>;

    /// Move the claim window to `visibility` from now. A zero window makes
    /// the message visible again immediately. Returns the new receipt.
    async fn update_visibility(
        &self,
        message: &QueueMessage,
        visibility: Duration,
    ) -> StorageResult<PopReceipt>;

    async fn delete(&self, message: &QueueMessage) -> StorageResult<()>;
}
