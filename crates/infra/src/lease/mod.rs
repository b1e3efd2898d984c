//! Singleton lease coordination.

pub mod blob;
pub mod coordinator;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use blob::LeaseBlob;
pub use coordinator::LeaseCoordinator;
pub use memory::{InMemoryLeaseBlob, InMemoryLeaseContainer};
#[cfg(feature = "redis")]
pub use self::redis::RedisLeaseBlob;
