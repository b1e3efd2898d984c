//! Trigger host: a singleton-gated queue listener.

pub mod config;
pub mod executor;
pub mod host;

pub use config::HostConfig;
pub use executor::LoggingExecutor;
pub use host::{Host, HostError, HostStorage};
