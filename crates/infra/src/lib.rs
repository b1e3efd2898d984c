//! Lease coordination and adaptive queue polling.
//!
//! - [`timer`]: background loops whose interval adapts to each step's outcome
//! - [`lease`]: singleton election over a renewable lease object
//! - [`queue`]: queue listener with visibility renewal and poison handling
//! - [`config`]: settings for coordinators and pollers

pub mod config;
pub mod lease;
pub mod queue;
pub mod timer;

pub use config::{ConfigError, LeaseConfig, QueuePollerConfig};
pub use lease::{InMemoryLeaseBlob, InMemoryLeaseContainer, LeaseBlob, LeaseCoordinator};
pub use queue::{
    InMemoryQueue, MessageExecutor, PollerStats, PollerStatsHandle, QueueClient, QueuePoller,
};
pub use timer::{AdaptiveTimer, TimerCommand, TimerError};
