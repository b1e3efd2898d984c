//! Host runtime: one lease coordinator gating one queue listener.
//!
//! In singleton mode a supervisor task follows the coordinator's change
//! channel and runs a fresh poller timer for as long as the lease is held.
//! Without singleton mode the listener simply runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use triggerhost_core::{LeaseId, StorageError};
use triggerhost_infra::queue::PollerCommand;
use triggerhost_infra::{
    AdaptiveTimer, ConfigError, LeaseBlob, LeaseCoordinator, MessageExecutor, PollerStatsHandle,
    QueueClient, QueuePoller, QueuePollerConfig, TimerError,
};

use crate::config::HostConfig;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Timer(#[from] TimerError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("listener supervisor failed: {0}")]
    Supervisor(String),
}

/// Storage the host runs against.
pub struct HostStorage {
    pub lease: Arc<dyn LeaseBlob>,
    pub queue: Arc<dyn QueueClient>,
    pub poison_queue: Option<Arc<dyn QueueClient>>,
}

/// Builds, starts and stops poller timers for one queue.
struct Listener {
    queue: Arc<dyn QueueClient>,
    poison_queue: Option<Arc<dyn QueueClient>>,
    executor: Arc<dyn MessageExecutor>,
    config: QueuePollerConfig,
    stats: PollerStatsHandle,
    listening: Arc<AtomicBool>,
    timer: Option<AdaptiveTimer<PollerCommand>>,
}

impl Listener {
    fn start(&mut self) -> Result<(), HostError> {
        if self.timer.is_some() {
            return Ok(());
        }

        let mut poller = QueuePoller::with_shared_executor(
            self.queue.clone(),
            self.executor.clone(),
            self.config.clone(),
        )?
        .with_stats(self.stats.clone());
        if let Some(poison) = &self.poison_queue {
            poller = poller.with_poison_queue(poison.clone());
        }

        let mut timer = poller.into_timer();
        timer.start(true)?;
        self.timer = Some(timer);
        self.listening.store(true, Ordering::Release);
        info!(queue = %self.queue.name(), "queue listener started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), HostError> {
        let Some(mut timer) = self.timer.take() else {
            return Ok(());
        };
        self.listening.store(false, Ordering::Release);
        let stopped = timer.stop(self.config.stop_timeout).await;
        info!(queue = %self.queue.name(), "queue listener stopped");
        stopped.map_err(HostError::from)
    }

    async fn follow(&mut self, held: bool) {
        let outcome = if held {
            self.start()
        } else {
            self.stop().await
        };
        if let Err(err) = outcome {
            error!(queue = %self.queue.name(), error = %err, held, "could not follow lease change");
        }
    }
}

enum Mode {
    Singleton {
        coordinator: LeaseCoordinator,
        cancel: CancellationToken,
        supervisor: JoinHandle<Result<(), HostError>>,
    },
    Always {
        listener: Listener,
    },
}

/// A running host. Must be created inside a tokio runtime.
pub struct Host {
    mode: Mode,
    stats: PollerStatsHandle,
    listening: Arc<AtomicBool>,
}

impl Host {
    pub fn start<E: MessageExecutor>(
        config: HostConfig,
        storage: HostStorage,
        executor: E,
    ) -> Result<Self, HostError> {
        config.validate()?;

        let stats = PollerStatsHandle::new();
        let listening = Arc::new(AtomicBool::new(false));
        let mut listener = Listener {
            queue: storage.queue,
            poison_queue: storage.poison_queue,
            executor: Arc::new(executor),
            config: config.poller,
            stats: stats.clone(),
            listening: listening.clone(),
            timer: None,
        };

        let mode = if config.singleton {
            let mut coordinator = LeaseCoordinator::new(storage.lease, config.lease)?;
            let changes = coordinator.subscribe();
            coordinator.start()?;

            let cancel = CancellationToken::new();
            let supervisor = tokio::spawn(supervise(listener, changes, cancel.clone()));
            Mode::Singleton {
                coordinator,
                cancel,
                supervisor,
            }
        } else {
            listener.start()?;
            Mode::Always { listener }
        };

        info!(
            queue = %config.queue_name,
            lease = %config.lease_name,
            singleton = config.singleton,
            "host started"
        );
        Ok(Self {
            mode,
            stats,
            listening,
        })
    }

    /// Whether a poller timer is currently running.
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    /// Whether this host holds the singleton lease. Always false without
    /// singleton mode.
    pub fn has_lease(&self) -> bool {
        match &self.mode {
            Mode::Singleton { coordinator, .. } => coordinator.has_lease(),
            Mode::Always { .. } => false,
        }
    }

    /// Counters across every poller this host has run.
    pub fn stats(&self) -> PollerStatsHandle {
        self.stats.clone()
    }

    /// Stop listening, then release the lease.
    pub async fn shutdown(self) -> Result<(), HostError> {
        let result = match self.mode {
            Mode::Singleton {
                coordinator,
                cancel,
                supervisor,
            } => {
                cancel.cancel();
                let supervised = match supervisor.await {
                    Ok(result) => result,
                    Err(join_err) => Err(HostError::Supervisor(join_err.to_string())),
                };
                let released = coordinator.shutdown().await.map_err(HostError::from);
                supervised.and(released)
            }
            Mode::Always { mut listener } => listener.stop().await,
        };
        info!("host stopped");
        result
    }
}

/// Run the listener exactly while the lease is held.
async fn supervise(
    mut listener: Listener,
    mut changes: watch::Receiver<Option<LeaseId>>,
    cancel: CancellationToken,
) -> Result<(), HostError> {
    loop {
        let held = changes.borrow_and_update().is_some();
        listener.follow(held).await;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    listener.stop().await
}
