//! Leader election over a single lease object.
//!
//! A [`LeaseCoordinator`] repeatedly tries to acquire the lease while it
//! does not hold it and renews it while it does. The storage object is the
//! only arbiter: every decision is re-derived from the latest server answer.
//!
//! ## States
//!
//! ```text
//! Unheld --acquire ok--> Held --renew ok--> Held
//!   ^                     |
//!   +------ conflict -----+   (lost to another holder)
//! ```
//!
//! - Acquire conflicts are the steady state of a follower and only logged
//!   at debug level.
//! - A renewal that finds the object deleted recreates it and re-claims it
//!   under the same holder id without giving up leadership.
//! - Transient renewal failures keep the lease (it cannot have expired
//!   yet) and shorten the renewal interval; once a full lease duration has
//!   passed without a successful renewal the lease is considered lost.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use triggerhost_core::{ErrorClass, LeaseId, StorageError};

use super::blob::LeaseBlob;
use crate::config::{ConfigError, LeaseConfig};
use crate::timer::{AdaptiveTimer, DelayStrategy, LinearSpeedup, TimerCommand, TimerError};

/// Lease state shared between the coordinator and its timer command.
///
/// The watch value is `Some(lease id)` while held. Subscribers are only
/// notified on Unheld <-> Held transitions.
#[derive(Debug)]
struct LeaseShared {
    status: watch::Sender<Option<LeaseId>>,
}

impl LeaseShared {
    fn new() -> Self {
        let (status, _) = watch::channel(None);
        Self { status }
    }

    fn current(&self) -> Option<LeaseId> {
        *self.status.borrow()
    }

    /// Record the latest state; true if held-ness changed.
    fn set(&self, lease: Option<LeaseId>) -> bool {
        self.status.send_if_modified(|current| {
            let changed = current.is_some() != lease.is_some();
            *current = lease;
            changed
        })
    }
}

/// Distributed singleton lock driven by an [`AdaptiveTimer`].
pub struct LeaseCoordinator {
    timer: AdaptiveTimer<LeaseCommand>,
    blob: Arc<dyn LeaseBlob>,
    config: LeaseConfig,
    shared: Arc<LeaseShared>,
}

impl LeaseCoordinator {
    /// Build a coordinator; nothing happens until [`start`](Self::start).
    pub fn new(blob: Arc<dyn LeaseBlob>, config: LeaseConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let shared = Arc::new(LeaseShared::new());
        let command = LeaseCommand::new(blob.clone(), &config, shared.clone());
        let timer = AdaptiveTimer::new(format!("lease:{}", blob.name()), command);

        Ok(Self {
            timer,
            blob,
            config,
            shared,
        })
    }

    /// Start acquiring; the first attempt runs immediately.
    pub fn start(&mut self) -> Result<(), TimerError> {
        info!(
            lease = %self.blob.name(),
            holder_id = %self.config.holder_id,
            "lease coordinator started"
        );
        self.timer.start(true)
    }

    /// Whether this instance currently holds the lease.
    pub fn has_lease(&self) -> bool {
        self.shared.current().is_some()
    }

    /// Identity this instance acquires the lease under.
    pub fn holder_id(&self) -> LeaseId {
        self.config.holder_id
    }

    /// Change notifications: the value is `Some(lease id)` while held and
    /// changes only on Unheld <-> Held transitions.
    pub fn subscribe(&self) -> watch::Receiver<Option<LeaseId>> {
        self.shared.status.subscribe()
    }

    /// Stop the timer (waiting for an in-flight step), then release the
    /// lease if held. Release failures are ignored: the lease may already
    /// be gone.
    pub async fn shutdown(mut self) -> Result<(), TimerError> {
        let stopped = self.timer.stop(self.config.stop_timeout).await;

        if let Some(lease) = self.shared.current() {
            match self.blob.release_lease(lease).await {
                Ok(()) => info!(lease = %self.blob.name(), holder_id = %lease, "lease released"),
                Err(err) => debug!(
                    lease = %self.blob.name(),
                    error = %err,
                    "ignoring lease release failure"
                ),
            }
            self.shared.set(None);
        }

        stopped
    }
}

/// The acquire/renew step.
struct LeaseCommand {
    blob: Arc<dyn LeaseBlob>,
    holder_id: LeaseId,
    lease_duration: Duration,
    acquire_interval: Duration,
    renewal: LinearSpeedup,
    last_renewal: Option<Instant>,
    shared: Arc<LeaseShared>,
}

impl LeaseCommand {
    fn new(blob: Arc<dyn LeaseBlob>, config: &LeaseConfig, shared: Arc<LeaseShared>) -> Self {
        Self {
            blob,
            holder_id: config.holder_id,
            lease_duration: config.lease_duration,
            acquire_interval: config.renewal_interval,
            renewal: LinearSpeedup::new(config.renewal_interval, config.min_retry_interval),
            last_renewal: None,
            shared,
        }
    }

    fn name(&self) -> &str {
        self.blob.name()
    }

    fn mark_held(&mut self, lease: LeaseId) {
        self.last_renewal = Some(Instant::now());
        self.renewal.next_delay(true);
        if self.shared.set(Some(lease)) {
            info!(lease = %self.name(), holder_id = %lease, "lease acquired");
        }
    }

    fn mark_lost(&mut self, reason: &str) {
        self.last_renewal = None;
        self.renewal.next_delay(true);
        if self.shared.set(None) {
            info!(lease = %self.name(), holder_id = %self.holder_id, reason, "lease lost");
        }
    }

    async fn acquire(&mut self) -> Result<(), StorageError> {
        match self
            .blob
            .acquire_lease(self.lease_duration, self.holder_id)
            .await
        {
            Ok(lease) => {
                self.mark_held(lease);
                Ok(())
            }
            Err(err) => match err.class() {
                ErrorClass::Conflict => {
                    debug!(lease = %self.name(), "lease is held by another instance");
                    Ok(())
                }
                ErrorClass::Transient => {
                    warn!(lease = %self.name(), error = %err, "lease acquisition failed; will retry");
                    Ok(())
                }
                ErrorClass::NotFound => {
                    info!(lease = %self.name(), "lease object missing; creating it");
                    self.ensure_exists().await
                }
                ErrorClass::Fatal => Err(err),
            },
        }
    }

    async fn renew(&mut self, lease: LeaseId) -> Result<(), StorageError> {
        match self.blob.renew_lease(lease).await {
            Ok(()) => {
                self.last_renewal = Some(Instant::now());
                self.renewal.next_delay(true);
                trace!(lease = %self.name(), holder_id = %lease, "lease renewed");
                Ok(())
            }
            Err(err) => match err.class() {
                ErrorClass::Conflict => {
                    self.mark_lost("another instance holds the lease");
                    Ok(())
                }
                ErrorClass::NotFound => self.recreate(lease).await,
                ErrorClass::Transient => {
                    self.renewal.next_delay(false);
                    let expired = self
                        .last_renewal
                        .is_none_or(|at| at.elapsed() >= self.lease_duration);
                    if expired {
                        self.mark_lost("lease expired before it could be renewed");
                    } else {
                        warn!(
                            lease = %self.name(),
                            error = %err,
                            retry_in = ?self.renewal.current(),
                            "lease renewal failed; retrying sooner"
                        );
                    }
                    Ok(())
                }
                ErrorClass::Fatal => Err(err),
            },
        }
    }

    /// The object vanished under a held lease: recreate it and claim it
    /// again under the same id. Leadership survives unless that fails.
    async fn recreate(&mut self, lease: LeaseId) -> Result<(), StorageError> {
        info!(lease = %self.name(), holder_id = %lease, "lease object was deleted; recreating it");

        let reclaimed = match self.blob.ensure_exists().await {
            Ok(()) => self.blob.acquire_lease(self.lease_duration, lease).await,
            Err(err) => Err(err),
        };

        match reclaimed {
            Ok(lease) => {
                self.mark_held(lease);
                info!(lease = %self.name(), holder_id = %lease, "lease object recreated; lease retained");
                Ok(())
            }
            Err(err) => {
                self.mark_lost("lease object could not be recreated");
                match err.class() {
                    ErrorClass::Fatal => Err(err),
                    _ => Ok(()),
                }
            }
        }
    }

    async fn ensure_exists(&self) -> Result<(), StorageError> {
        match self.blob.ensure_exists().await {
            Ok(()) => Ok(()),
            Err(err) if err.class() == ErrorClass::Fatal => Err(err),
            Err(err) => {
                warn!(lease = %self.name(), error = %err, "could not create lease object");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl TimerCommand for LeaseCommand {
    fn next_interval(&self) -> Duration {
        if self.shared.current().is_some() {
            self.renewal.current()
        } else {
            self.acquire_interval
        }
    }

    async fn execute(&mut self, cancel: &CancellationToken) -> Result<(), StorageError> {
        if cancel.is_cancelled() {
            return Ok(());
        }
        match self.shared.current() {
            Some(lease) => self.renew(lease).await,
            None => self.acquire().await,
        }
    }
}
