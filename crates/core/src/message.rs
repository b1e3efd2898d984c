//! Queue message as seen by a consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{MessageId, PopReceipt};

/// A message returned by a dequeue.
///
/// The claim it represents lasts until `next_visible_at`; any renewal or
/// disposal must present `pop_receipt`, which changes every time the
/// visibility is updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: MessageId,
    pub pop_receipt: PopReceipt,
    /// How many times the message has been dequeued, this dequeue included.
    pub dequeue_count: u32,
    pub body: Vec<u8>,
    pub inserted_at: DateTime<Utc>,
    pub next_visible_at: DateTime<Utc>,
}

impl QueueMessage {
    /// Body as UTF-8, if it is valid UTF-8.
    pub fn body_str(&self) -> Option<&str> {
        core::str::from_utf8(&self.body).ok()
    }
}
