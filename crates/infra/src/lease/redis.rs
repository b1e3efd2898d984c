//! Redis-backed lease object.
//!
//! Each lease object is a hash at `{prefix}:{name}` with the fields
//! `holder`, `expires` (unix millis) and `duration` (millis). An empty
//! holder means unleased. All transitions run as Lua scripts so the
//! check-and-set is atomic, and expiry is judged against the server clock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::{RedisError, Script};
use tracing::instrument;

use triggerhost_core::{LeaseId, StorageError, StorageResult};

use super::blob::LeaseBlob;

/// Default key prefix for lease objects.
pub const DEFAULT_KEY_PREFIX: &str = "triggerhost:lease";

const ACQUIRE: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return -1 end
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
local holder = redis.call('HGET', KEYS[1], 'holder') or ''
local expires = tonumber(redis.call('HGET', KEYS[1], 'expires') or '0')
if holder ~= '' and holder ~= ARGV[1] and expires > now then return 0 end
redis.call('HSET', KEYS[1], 'holder', ARGV[1], 'expires', now + tonumber(ARGV[2]), 'duration', ARGV[2])
return 1
"#;

const RENEW: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return -1 end
local holder = redis.call('HGET', KEYS[1], 'holder') or ''
if holder == '' then return -2 end
if holder ~= ARGV[1] then return 0 end
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
local duration = tonumber(redis.call('HGET', KEYS[1], 'duration') or '0')
redis.call('HSET', KEYS[1], 'expires', now + duration)
return 1
"#;

const RELEASE: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return -1 end
local holder = redis.call('HGET', KEYS[1], 'holder') or ''
if holder == '' then return -2 end
if holder ~= ARGV[1] then return 0 end
redis.call('HSET', KEYS[1], 'holder', '', 'expires', 0)
return 1
"#;

/// Lease object stored in Redis.
#[derive(Clone)]
pub struct RedisLeaseBlob {
    client: Arc<redis::Client>,
    name: String,
    key: String,
    acquire: Arc<Script>,
    renew: Arc<Script>,
    release: Arc<Script>,
}

impl std::fmt::Debug for RedisLeaseBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLeaseBlob")
            .field("name", &self.name)
            .field("key", &self.key)
            .finish()
    }
}

impl RedisLeaseBlob {
    /// Open a lease object on the server at `redis_url`.
    ///
    /// No connection is made until the first operation.
    pub fn new(
        redis_url: impl AsRef<str>,
        name: impl Into<String>,
        key_prefix: Option<&str>,
    ) -> StorageResult<Self> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(map_redis_error)?;
        let name = name.into();
        let key = lease_key(key_prefix.unwrap_or(DEFAULT_KEY_PREFIX), &name);

        Ok(Self {
            client: Arc::new(client),
            name,
            key,
            acquire: Arc::new(Script::new(ACQUIRE)),
            renew: Arc::new(Script::new(RENEW)),
            release: Arc::new(Script::new(RELEASE)),
        })
    }

    /// Redis key holding this lease object.
    pub fn key(&self) -> &str {
        &self.key
    }

    async fn connection(&self) -> StorageResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(map_redis_error)
    }

    async fn run(&self, script: &Script, lease: LeaseId, millis: Option<u64>) -> StorageResult<i64> {
        let mut conn = self.connection().await?;
        let mut invocation = script.key(&self.key);
        invocation.arg(lease.to_string());
        if let Some(millis) = millis {
            invocation.arg(millis);
        }
        invocation.invoke_async(&mut conn).await.map_err(map_redis_error)
    }

    fn interpret(&self, outcome: i64, on_conflict: fn(&str) -> StorageError) -> StorageResult<()> {
        match outcome {
            1 => Ok(()),
            0 => Err(on_conflict(&self.name)),
            -1 => Err(StorageError::blob_not_found(&self.name)),
            -2 => Err(StorageError::lease_not_present(&self.name)),
            other => Err(StorageError::Other(format!(
                "unexpected lease script result {other} for '{}'",
                self.name
            ))),
        }
    }
}

#[async_trait]
impl LeaseBlob for RedisLeaseBlob {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(level = "debug", skip(self), fields(key = %self.key), err(level = "debug"))]
    async fn acquire_lease(&self, duration: Duration, proposed: LeaseId) -> StorageResult<LeaseId> {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let outcome = self.run(&self.acquire, proposed, Some(millis)).await?;
        self.interpret(outcome, StorageError::lease_already_present)?;
        Ok(proposed)
    }

    #[instrument(level = "debug", skip(self), fields(key = %self.key), err(level = "debug"))]
    async fn renew_lease(&self, lease: LeaseId) -> StorageResult<()> {
        let outcome = self.run(&self.renew, lease, None).await?;
        self.interpret(outcome, StorageError::lease_id_mismatch)
    }

    #[instrument(level = "debug", skip(self), fields(key = %self.key), err(level = "debug"))]
    async fn release_lease(&self, lease: LeaseId) -> StorageResult<()> {
        let outcome = self.run(&self.release, lease, None).await?;
        self.interpret(outcome, StorageError::lease_id_mismatch)
    }

    #[instrument(level = "debug", skip(self), fields(key = %self.key), err(level = "debug"))]
    async fn ensure_exists(&self) -> StorageResult<()> {
        let mut conn = self.connection().await?;
        let _: i64 = redis::cmd("HSETNX")
            .arg(&self.key)
            .arg("holder")
            .arg("")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }
}

fn lease_key(prefix: &str, name: &str) -> String {
    format!("{prefix}:{name}")
}

/// Network trouble is transient; anything else the server rejected is not
/// something a retry will fix.
fn map_redis_error(err: RedisError) -> StorageError {
    if err.is_timeout() {
        StorageError::Timeout(err.to_string())
    } else if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() {
        StorageError::Connection(err.to_string())
    } else {
        StorageError::Other(err.to_string())
    }
}
