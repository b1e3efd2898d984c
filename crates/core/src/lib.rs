//! Shared building blocks for `triggerhost`.
//!
//! Identifiers, the queue message shape and the storage error taxonomy used
//! by every coordination component. No I/O lives here.

pub mod error;
pub mod id;
pub mod message;

pub use error::{classify_status, codes, ErrorClass, StorageError, StorageResult};
pub use id::{InvalidId, LeaseId, MessageId, PopReceipt};
pub use message::QueueMessage;
