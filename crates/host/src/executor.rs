//! Default message executor for the `triggerhost` binary.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use triggerhost_core::QueueMessage;
use triggerhost_infra::MessageExecutor;

/// Logs each trigger message and reports success.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingExecutor;

#[async_trait]
impl MessageExecutor for LoggingExecutor {
    async fn execute(&self, message: &QueueMessage, _cancel: CancellationToken) -> bool {
        match message.body_str() {
            Some(body) => info!(
                message_id = %message.id,
                dequeue_count = message.dequeue_count,
                body,
                "trigger received"
            ),
            None => info!(
                message_id = %message.id,
                dequeue_count = message.dequeue_count,
                bytes = message.body.len(),
                "trigger received (binary body)"
            ),
        }
        true
    }
}
