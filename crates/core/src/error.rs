//! Storage error model.
//!
//! Every failure coming back from a lease object or a queue is a
//! [`StorageError`]. Callers never inspect status codes themselves; they ask
//! for the [`ErrorClass`] via [`StorageError::class`] and branch on that.

use thiserror::Error;

/// Result type used by every storage contract.
pub type StorageResult<T> = Result<T, StorageError>;

/// Well-known service error codes.
pub mod codes {
    pub const LEASE_ALREADY_PRESENT: &str = "LeaseAlreadyPresent";
    pub const LEASE_ID_MISMATCH: &str = "LeaseIdMismatchWithLeaseOperation";
    pub const LEASE_NOT_PRESENT: &str = "LeaseNotPresentWithLeaseOperation";
    pub const LEASE_LOST: &str = "LeaseLost";
    pub const BLOB_NOT_FOUND: &str = "BlobNotFound";
    pub const CONTAINER_NOT_FOUND: &str = "ContainerNotFound";
    pub const CONTAINER_BEING_DELETED: &str = "ContainerBeingDeleted";
    pub const QUEUE_NOT_FOUND: &str = "QueueNotFound";
    pub const QUEUE_BEING_DELETED: &str = "QueueBeingDeleted";
    pub const MESSAGE_NOT_FOUND: &str = "MessageNotFound";
    pub const POP_RECEIPT_MISMATCH: &str = "PopReceiptMismatch";
    pub const SERVER_BUSY: &str = "ServerBusy";
    pub const INTERNAL_ERROR: &str = "InternalError";
}

/// Closed taxonomy of storage failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Server-side or network trouble. Retry on the next tick, change nothing.
    Transient,
    /// Lease id or claim token mismatch. A legitimate state transition.
    Conflict,
    /// The blob, container, queue or message does not exist.
    NotFound,
    /// Anything else. Surfaced to the caller.
    Fatal,
}

/// Error returned by a storage backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The service answered with an error status.
    #[error("storage request failed with status {status} ({code}): {message}")]
    Status {
        status: u16,
        code: String,
        message: String,
    },

    /// The request did not complete in time.
    #[error("storage request timed out: {0}")]
    Timeout(String),

    /// The backend could not be reached.
    #[error("storage connection failed: {0}")]
    Connection(String),

    /// A failure that carries no status (serialization, protocol, ...).
    #[error("storage error: {0}")]
    Other(String),
}

impl StorageError {
    pub fn status(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn lease_already_present(object: &str) -> Self {
        Self::status(
            409,
            codes::LEASE_ALREADY_PRESENT,
            format!("there is already a lease present on '{object}'"),
        )
    }

    pub fn lease_id_mismatch(object: &str) -> Self {
        Self::status(
            409,
            codes::LEASE_ID_MISMATCH,
            format!("the lease id specified did not match the lease on '{object}'"),
        )
    }

    pub fn lease_not_present(object: &str) -> Self {
        Self::status(
            409,
            codes::LEASE_NOT_PRESENT,
            format!("there is currently no lease on '{object}'"),
        )
    }

    pub fn blob_not_found(object: &str) -> Self {
        Self::status(404, codes::BLOB_NOT_FOUND, format!("blob '{object}' does not exist"))
    }

    pub fn queue_not_found(queue: &str) -> Self {
        Self::status(404, codes::QUEUE_NOT_FOUND, format!("queue '{queue}' does not exist"))
    }

    pub fn queue_being_deleted(queue: &str) -> Self {
        Self::status(
            409,
            codes::QUEUE_BEING_DELETED,
            format!("queue '{queue}' is being deleted"),
        )
    }

    pub fn message_not_found(message: impl core::fmt::Display) -> Self {
        Self::status(
            404,
            codes::MESSAGE_NOT_FOUND,
            format!("message '{message}' does not exist"),
        )
    }

    pub fn pop_receipt_mismatch(message: impl core::fmt::Display) -> Self {
        Self::status(
            400,
            codes::POP_RECEIPT_MISMATCH,
            format!("pop receipt does not match the current claim on message '{message}'"),
        )
    }

    pub fn server_busy() -> Self {
        Self::status(503, codes::SERVER_BUSY, "the server is busy")
    }

    /// Service error code, when the service sent one.
    pub fn code(&self) -> Option<&str> {
        match self {
            StorageError::Status { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    /// Map this error onto the closed [`ErrorClass`] taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            StorageError::Status { status, code, .. } => classify_status(*status, code),
            StorageError::Timeout(_) | StorageError::Connection(_) => ErrorClass::Transient,
            StorageError::Other(_) => ErrorClass::Fatal,
        }
    }
}

/// Classify a raw status code and service error code.
///
/// "Being deleted" answers come back as 409 but describe a resource in
/// flux, so they are checked before the generic conflict arm.
pub fn classify_status(status: u16, code: &str) -> ErrorClass {
    match (status, code) {
        (_, codes::QUEUE_BEING_DELETED | codes::CONTAINER_BEING_DELETED) => ErrorClass::Transient,
        (400, codes::POP_RECEIPT_MISMATCH) => ErrorClass::Conflict,
        (404, _) => ErrorClass::NotFound,
        (409 | 412, _) => ErrorClass::Conflict,
        (408, _) | (500..=599, _) => ErrorClass::Transient,
        _ => ErrorClass::Fatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_errors_classify_as_conflict() {
        assert_eq!(StorageError::lease_already_present("lock").class(), ErrorClass::Conflict);
        assert_eq!(StorageError::lease_id_mismatch("lock").class(), ErrorClass::Conflict);
        assert_eq!(StorageError::lease_not_present("lock").class(), ErrorClass::Conflict);
        assert_eq!(classify_status(412, "ConditionNotMet"), ErrorClass::Conflict);
    }

    #[test]
    fn missing_objects_classify_as_not_found() {
        assert_eq!(StorageError::blob_not_found("lock").class(), ErrorClass::NotFound);
        assert_eq!(StorageError::queue_not_found("q").class(), ErrorClass::NotFound);
        assert_eq!(StorageError::message_not_found("m").class(), ErrorClass::NotFound);
        assert_eq!(classify_status(404, codes::CONTAINER_NOT_FOUND), ErrorClass::NotFound);
    }

    #[test]
    fn being_deleted_is_transient_despite_409() {
        assert_eq!(StorageError::queue_being_deleted("q").class(), ErrorClass::Transient);
        assert_eq!(
            classify_status(409, codes::CONTAINER_BEING_DELETED),
            ErrorClass::Transient
        );
    }

    #[test]
    fn stale_pop_receipt_is_a_conflict() {
        assert_eq!(StorageError::pop_receipt_mismatch("m").class(), ErrorClass::Conflict);
        // Other 400s are caller bugs.
        assert_eq!(classify_status(400, "InvalidQueryParameterValue"), ErrorClass::Fatal);
    }

    #[test]
    fn server_side_and_network_failures_are_transient() {
        assert_eq!(StorageError::server_busy().class(), ErrorClass::Transient);
        assert_eq!(classify_status(500, codes::INTERNAL_ERROR), ErrorClass::Transient);
        assert_eq!(classify_status(408, "OperationTimedOut"), ErrorClass::Transient);
        assert_eq!(StorageError::Timeout("read".into()).class(), ErrorClass::Transient);
        assert_eq!(StorageError::Connection("refused".into()).class(), ErrorClass::Transient);
    }

    #[test]
    fn everything_else_is_fatal() {
        assert_eq!(classify_status(403, "AuthorizationFailure"), ErrorClass::Fatal);
        assert_eq!(StorageError::Other("bad frame".into()).class(), ErrorClass::Fatal);
    }

    #[test]
    fn code_is_exposed_for_status_errors_only() {
        assert_eq!(StorageError::server_busy().code(), Some(codes::SERVER_BUSY));
        assert_eq!(StorageError::Timeout("x".into()).code(), None);
    }
}
