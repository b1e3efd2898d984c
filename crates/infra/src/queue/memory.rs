//! In-process queue with visibility-window semantics.
//!
//! Messages are served oldest first. Every dequeue and visibility update
//! issues a fresh pop receipt, and a claim is only honoured until its
//! window elapses: after that the old receipt is rejected even if nobody
//! has dequeued the message again.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

use triggerhost_core::{MessageId, PopReceipt, QueueMessage, StorageError, StorageResult};

use super::client::QueueClient;
use super::wall_clock_after;
use crate::timer::deadline_after;

/// Operation that an injected fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOp {
    Enqueue,
    Dequeue,
    UpdateVisibility,
    Delete,
}

#[derive(Debug)]
struct StoredMessage {
    id: MessageId,
    body: Vec<u8>,
    dequeue_count: u32,
    inserted_at: DateTime<Utc>,
    visible_at: Instant,
    receipt: Option<PopReceipt>,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.visible_at <= now
    }

    /// Whether `receipt` proves the claim that is live right now.
    fn claimed_by(&self, receipt: PopReceipt, now: Instant) -> bool {
        self.receipt == Some(receipt) && !self.is_visible(now)
    }

    fn to_message(&self, receipt: PopReceipt, visibility: Duration) -> QueueMessage {
        QueueMessage {
            id: self.id,
            pop_receipt: receipt,
            dequeue_count: self.dequeue_count,
            body: self.body.clone(),
            inserted_at: self.inserted_at,
            next_visible_at: wall_clock_after(visibility),
        }
    }
}

#[derive(Debug)]
struct QueueState {
    exists: bool,
    messages: VecDeque<StoredMessage>,
    faults: VecDeque<(QueueOp, StorageError)>,
}

/// Cloneable handle to an in-memory queue; clones share the same messages.
#[derive(Debug, Clone)]
pub struct InMemoryQueue {
    name: String,
    state: Arc<Mutex<QueueState>>,
}

impl InMemoryQueue {
    /// An existing, empty queue.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_existence(name.into(), true)
    }

    /// A queue that has not been created yet.
    pub fn missing(name: impl Into<String>) -> Self {
        Self::with_existence(name.into(), false)
    }

    fn with_existence(name: String, exists: bool) -> Self {
        Self {
            name,
            state: Arc::new(Mutex::new(QueueState {
                exists,
                messages: VecDeque::new(),
                faults: VecDeque::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admin operation: drop the queue and everything in it.
    pub fn delete_queue(&self) {
        let mut state = self.lock();
        state.exists = false;
        state.messages.clear();
    }

    /// Add a message that has already been dequeued `dequeue_count` times.
    pub fn push_with_dequeue_count(&self, body: impl Into<Vec<u8>>, dequeue_count: u32) -> MessageId {
        let id = MessageId::new();
        let mut state = self.lock();
        state.exists = true;
        state.messages.push_back(StoredMessage {
            id,
            body: body.into(),
            dequeue_count,
            inserted_at: Utc::now(),
            visible_at: Instant::now(),
            receipt: None,
        });
        id
    }

    /// Make the next `op` fail with `error` instead of touching the queue.
    pub fn inject_fault(&self, op: QueueOp, error: StorageError) {
        self.lock().faults.push_back((op, error));
    }

    /// Total messages, visible or not.
    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn visible_count(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .messages
            .iter()
            .filter(|message| message.is_visible(now))
            .count()
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.lock().messages.iter().any(|message| message.id == id)
    }

    /// Bodies of every message in queue order.
    pub fn bodies(&self) -> Vec<Vec<u8>> {
        self.lock()
            .messages
            .iter()
            .map(|message| message.body.clone())
            .collect()
    }

    pub fn dequeue_count(&self, id: MessageId) -> Option<u32> {
        self.lock()
            .messages
            .iter()
            .find(|message| message.id == id)
            .map(|message| message.dequeue_count)
    }

    /// Locks the state after consuming a matching injected fault.
    fn begin(&self, op: QueueOp) -> StorageResult<MutexGuard<'_, QueueState>> {
        let mut state = self.lock();
        if let Some(index) = state.faults.iter().position(|(faulted, _)| *faulted == op) {
            if let Some((_, error)) = state.faults.remove(index) {
                return Err(error);
            }
        }
        if !state.exists {
            return Err(StorageError::queue_not_found(&self.name));
        }
        Ok(state)
    }
}

fn claimed_message<'a>(
    state: &'a mut QueueState,
    message: &QueueMessage,
    now: Instant,
) -> StorageResult<(usize, &'a mut StoredMessage)> {
    let (index, stored) = state
        .messages
        .iter_mut()
        .enumerate()
        .find(|(_, stored)| stored.id == message.id)
        .ok_or_else(|| StorageError::message_not_found(message.id))?;

    if !stored.claimed_by(message.pop_receipt, now) {
        return Err(StorageError::pop_receipt_mismatch(message.id));
    }
    Ok((index, stored))
}

#[async_trait]
impl QueueClient for InMemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self) -> StorageResult<bool> {
        Ok(self.lock().exists)
    }

    async fn create_if_not_exists(&self) -> StorageResult<()> {
        self.lock().exists = true;
        Ok(())
    }

    async fn enqueue(&self, body: Vec<u8>) -> StorageResult<MessageId> {
        let mut state = self.begin(QueueOp::Enqueue)?;
        let id = MessageId::new();
        state.messages.push_back(StoredMessage {
            id,
            body,
            dequeue_count: 0,
            inserted_at: Utc::now(),
            visible_at: Instant::now(),
            receipt: None,
        });
        Ok(id)
    }

    async fn dequeue(&self, visibility: Duration) -> StorageResult<Option<QueueMessage>> {
        let mut state = self.begin(QueueOp::Dequeue)?;
        let now = Instant::now();

        let Some(stored) = state.messages.iter_mut().find(|m| m.is_visible(now)) else {
            return Ok(None);
        };

        let receipt = PopReceipt::new();
        stored.dequeue_count = stored.dequeue_count.saturating_add(1);
        stored.visible_at = deadline_after(now, visibility);
        stored.receipt = Some(receipt);
        Ok(Some(stored.to_message(receipt, visibility)))
    }

    async fn update_visibility(
        &self,
        message: &QueueMessage,
        visibility: Duration,
    ) -> StorageResult<PopReceipt> {
        let mut state = self.begin(QueueOp::UpdateVisibility)?;
        let now = Instant::now();
        let (_, stored) = claimed_message(&mut state, message, now)?;

        let receipt = PopReceipt::new();
        stored.visible_at = deadline_after(now, visibility);
        stored.receipt = Some(receipt);
        Ok(receipt)
    }

    async fn delete(&self, message: &QueueMessage) -> StorageResult<()> {
        let mut state = self.begin(QueueOp::Delete)?;
        let now = Instant::now();
        let (index, _) = claimed_message(&mut state, message, now)?;
        state.messages.remove(index);
        Ok(())
    }
}
