//! In-memory lease objects for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use triggerhost_core::{LeaseId, StorageError, StorageResult};

use super::blob::LeaseBlob;
use crate::timer::deadline_after;

#[derive(Debug, Clone, Copy)]
struct ActiveLease {
    id: LeaseId,
    duration: Duration,
    expires_at: Instant,
}

impl ActiveLease {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Default)]
struct BlobEntry {
    lease: Option<ActiveLease>,
}

type Blobs = Arc<Mutex<HashMap<String, BlobEntry>>>;

fn lock(blobs: &Blobs) -> MutexGuard<'_, HashMap<String, BlobEntry>> {
    blobs.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A set of named lease objects sharing one backing map.
///
/// Expiry uses tokio's clock, so tests running with paused time control
/// when leases lapse.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLeaseContainer {
    blobs: Blobs,
}

impl InMemoryLeaseContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the object called `name`. The object itself is only
    /// created by [`LeaseBlob::ensure_exists`].
    pub fn blob(&self, name: impl Into<String>) -> InMemoryLeaseBlob {
        InMemoryLeaseBlob {
            name: name.into(),
            blobs: self.blobs.clone(),
        }
    }

    pub fn exists(&self, name: &str) -> bool {
        lock(&self.blobs).contains_key(name)
    }

    /// Delete the object out from under any lease (administrative action).
    pub fn delete(&self, name: &str) -> bool {
        lock(&self.blobs).remove(name).is_some()
    }

    /// Holder of the current, unexpired lease on `name`.
    pub fn holder(&self, name: &str) -> Option<LeaseId> {
        let now = Instant::now();
        lock(&self.blobs)
            .get(name)
            .and_then(|entry| entry.lease)
            .filter(|lease| !lease.is_expired(now))
            .map(|lease| lease.id)
    }
}

/// One object inside an [`InMemoryLeaseContainer`].
#[derive(Debug, Clone)]
pub struct InMemoryLeaseBlob {
    name: String,
    blobs: Blobs,
}

impl InMemoryLeaseBlob {
    fn with_entry<T>(
        &self,
        f: impl FnOnce(&mut BlobEntry, Instant) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut blobs = lock(&self.blobs);
        let entry = blobs
            .get_mut(&self.name)
            .ok_or_else(|| StorageError::blob_not_found(&self.name))?;
        f(entry, Instant::now())
    }
}

#[async_trait]
impl LeaseBlob for InMemoryLeaseBlob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire_lease(&self, duration: Duration, proposed: LeaseId) -> StorageResult<LeaseId> {
        self.with_entry(|entry, now| match entry.lease {
            Some(lease) if !lease.is_expired(now) && lease.id != proposed => {
                Err(StorageError::lease_already_present(&self.name))
            }
            _ => {
                entry.lease = Some(ActiveLease {
                    id: proposed,
                    duration,
                    expires_at: deadline_after(now, duration),
                });
                Ok(proposed)
            }
        })
    }

    async fn renew_lease(&self, lease: LeaseId) -> StorageResult<()> {
        // An expired lease can still be renewed as long as nobody else
        // acquired the object in the meantime.
        self.with_entry(|entry, now| match entry.lease.as_mut() {
            Some(active) if active.id == lease => {
                active.expires_at = deadline_after(now, active.duration);
                Ok(())
            }
            Some(_) => Err(StorageError::lease_id_mismatch(&self.name)),
            None => Err(StorageError::lease_not_present(&self.name)),
        })
    }

    async fn release_lease(&self, lease: LeaseId) -> StorageResult<()> {
        self.with_entry(|entry, _| match entry.lease {
            Some(active) if active.id == lease => {
                entry.lease = None;
                Ok(())
            }
            Some(_) => Err(StorageError::lease_id_mismatch(&self.name)),
            None => Err(StorageError::lease_not_present(&self.name)),
        })
    }

    async fn ensure_exists(&self) -> StorageResult<()> {
        lock(&self.blobs).entry(self.name.clone()).or_default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use triggerhost_core::ErrorClass;

    const LEASE: Duration = Duration::from_secs(15);

    #[tokio::test]
    async fn operations_on_a_missing_object_are_not_found() {
        let container = InMemoryLeaseContainer::new();
        let blob = container.blob("host-lock");

        let err = blob.acquire_lease(LEASE, LeaseId::new()).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::NotFound);

        blob.ensure_exists().await.unwrap();
        assert!(container.exists("host-lock"));
        assert!(blob.acquire_lease(LEASE, LeaseId::new()).await.is_ok());
    }

    #[tokio::test]
    async fn second_holder_conflicts_until_the_first_releases() {
        let container = InMemoryLeaseContainer::new();
        let blob = container.blob("host-lock");
        blob.ensure_exists().await.unwrap();

        let (a, b) = (LeaseId::new(), LeaseId::new());
        assert_eq!(blob.acquire_lease(LEASE, a).await.unwrap(), a);

        let err = blob.acquire_lease(LEASE, b).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Conflict);
        assert_eq!(blob.renew_lease(b).await.unwrap_err().class(), ErrorClass::Conflict);

        // Re-acquiring under the same id is allowed.
        assert_eq!(blob.acquire_lease(LEASE, a).await.unwrap(), a);

        blob.release_lease(a).await.unwrap();
        assert_eq!(container.holder("host-lock"), None);
        assert_eq!(blob.acquire_lease(LEASE, b).await.unwrap(), b);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_leases_can_be_taken_over() {
        let container = InMemoryLeaseContainer::new();
        let blob = container.blob("host-lock");
        blob.ensure_exists().await.unwrap();

        let (a, b) = (LeaseId::new(), LeaseId::new());
        blob.acquire_lease(LEASE, a).await.unwrap();

        tokio::time::advance(LEASE + Duration::from_millis(1)).await;
        assert_eq!(container.holder("host-lock"), None);

        blob.acquire_lease(LEASE, b).await.unwrap();
        assert_eq!(container.holder("host-lock"), Some(b));
        assert_eq!(blob.renew_lease(a).await.unwrap_err().class(), ErrorClass::Conflict);
    }

    #[tokio::test(start_paused = true)]
    async fn renew_extends_the_lease() {
        let container = InMemoryLeaseContainer::new();
        let blob = container.blob("host-lock");
        blob.ensure_exists().await.unwrap();

        let a = LeaseId::new();
        blob.acquire_lease(LEASE, a).await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        blob.renew_lease(a).await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;

        assert_eq!(container.holder("host-lock"), Some(a));
    }

    #[tokio::test]
    async fn deleting_the_object_drops_the_lease() {
        let container = InMemoryLeaseContainer::new();
        let blob = container.blob("host-lock");
        blob.ensure_exists().await.unwrap();
        let a = LeaseId::new();
        blob.acquire_lease(LEASE, a).await.unwrap();

        assert!(container.delete("host-lock"));
        assert_eq!(blob.renew_lease(a).await.unwrap_err().class(), ErrorClass::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_lease_durations_hold_instead_of_overflowing() {
        let container = InMemoryLeaseContainer::new();
        let blob = container.blob("host-lock");
        blob.ensure_exists().await.unwrap();

        let (a, b) = (LeaseId::new(), LeaseId::new());
        blob.acquire_lease(Duration::from_secs(u64::MAX), a).await.unwrap();
        blob.renew_lease(a).await.unwrap();
        tokio::time::advance(Duration::from_secs(86_400 * 365)).await;

        assert_eq!(container.holder("host-lock"), Some(a));
        let err = blob.acquire_lease(LEASE, b).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Conflict);
    }
}
