//! Development host.
//!
//! Runs one listener over an in-process queue, so only messages seeded
//! through `TRIGGERHOST_SEED_MESSAGES` are ever processed. Leases live in
//! process too unless `REDIS_URL` is set on a build with the `redis`
//! feature. Production hosts embed [`triggerhost::Host`] with their own
//! [`triggerhost_infra::QueueClient`].

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use triggerhost::{Host, HostConfig, HostStorage, LoggingExecutor};
use triggerhost_infra::queue::poison_queue_name;
use triggerhost_infra::{InMemoryLeaseContainer, InMemoryQueue, LeaseBlob, QueueClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    triggerhost_observability::init();

    let config = HostConfig::from_env();
    let queue = InMemoryQueue::new(config.queue_name.clone());
    for body in &config.seed_messages {
        queue
            .enqueue(body.clone().into_bytes())
            .await
            .context("failed to seed the queue")?;
    }
    if config.seed_messages.is_empty() {
        warn!(queue = %config.queue_name, "in-process queue has no seed messages; nothing will be processed");
    } else {
        info!(queue = %config.queue_name, seeded = config.seed_messages.len(), "seeded in-process queue");
    }

    let storage = HostStorage {
        lease: lease_storage(&config)?,
        queue: Arc::new(queue),
        poison_queue: config.poison_queue.then(|| {
            Arc::new(InMemoryQueue::missing(poison_queue_name(&config.queue_name)))
                as Arc<dyn QueueClient>
        }),
    };

    let host = Host::start(config, storage, LoggingExecutor).context("failed to start host")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested");

    host.shutdown().await.context("host did not shut down cleanly")?;
    Ok(())
}

#[cfg(feature = "redis")]
fn lease_storage(config: &HostConfig) -> anyhow::Result<Arc<dyn LeaseBlob>> {
    use triggerhost_infra::lease::RedisLeaseBlob;

    match &config.redis_url {
        Some(url) => {
            let blob = RedisLeaseBlob::new(url, config.lease_name.clone(), None)
                .context("invalid REDIS_URL")?;
            info!(lease = %config.lease_name, key = %blob.key(), "using redis lease storage");
            Ok(Arc::new(blob))
        }
        None => Ok(in_memory_lease(config)),
    }
}

#[cfg(not(feature = "redis"))]
fn lease_storage(config: &HostConfig) -> anyhow::Result<Arc<dyn LeaseBlob>> {
    if config.redis_url.is_some() {
        warn!("REDIS_URL is set but this build has no redis support; using in-memory leases");
    }
    Ok(in_memory_lease(config))
}

fn in_memory_lease(config: &HostConfig) -> Arc<dyn LeaseBlob> {
    warn!(lease = %config.lease_name, "using in-process lease storage; only this process competes for the lease");
    Arc::new(InMemoryLeaseContainer::new().blob(config.lease_name.clone()))
}
