//! Storage contract for the object a lease is taken on.

use std::time::Duration;

use async_trait::async_trait;

use triggerhost_core::{LeaseId, StorageResult};

/// One leasable storage object (a blob, a key).
///
/// Errors follow the shared taxonomy: a lease held by someone else or a
/// mismatched lease id is a `Conflict`, a missing object or container is
/// `NotFound`.
#[async_trait]
pub trait LeaseBlob: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Claim the object for `duration` under `proposed`.
    ///
    /// Succeeds when the object is unleased, the previous lease expired, or
    /// the object is already leased under `proposed`.
    async fn acquire_lease(&self, duration: Duration, proposed: LeaseId) -> StorageResult<LeaseId>;

    /// Extend a lease held under `lease` by its original duration.
    async fn renew_lease(&self, lease: LeaseId) -> StorageResult<()>;

    /// Give up a lease held under `lease`.
    async fn release_lease(&self, lease: LeaseId) -> StorageResult<()>;

    /// Create the object (and its container) if missing. Idempotent.
    async fn ensure_exists(&self) -> StorageResult<()>;
}
