//! Hosts sharing one lease object and one queue, on paused time.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use triggerhost::{Host, HostConfig, HostStorage};
use triggerhost_core::QueueMessage;
use triggerhost_infra::{InMemoryLeaseContainer, InMemoryQueue, LeaseBlob, LeaseConfig, QueueClient};

const LOCK: &str = "triggerhost-singleton";

struct Cluster {
    leases: InMemoryLeaseContainer,
    queue: InMemoryQueue,
    processed: Arc<AtomicU32>,
}

impl Cluster {
    async fn new() -> Self {
        let leases = InMemoryLeaseContainer::new();
        leases.blob(LOCK).ensure_exists().await.unwrap();
        Self {
            leases,
            queue: InMemoryQueue::new("triggers"),
            processed: Arc::new(AtomicU32::new(0)),
        }
    }

    fn host(&self, singleton: bool) -> Host {
        let config = HostConfig {
            singleton,
            lease: LeaseConfig::default(),
            ..HostConfig::default()
        };
        let storage = HostStorage {
            lease: Arc::new(self.leases.blob(LOCK)),
            queue: Arc::new(self.queue.clone()),
            poison_queue: None,
        };
        let processed = self.processed.clone();
        let executor = move |_message: QueueMessage, _cancel: CancellationToken| {
            processed.fetch_add(1, Ordering::SeqCst);
            std::future::ready(true)
        };
        Host::start(config, storage, executor).unwrap()
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test(start_paused = true)]
async fn only_the_lease_holder_listens() {
    let cluster = Cluster::new().await;
    let leader = cluster.host(true);
    settle().await;
    let follower = cluster.host(true);
    settle().await;

    assert!(leader.has_lease());
    assert!(leader.is_listening());
    assert!(!follower.has_lease());
    assert!(!follower.is_listening());

    for i in 0..3u8 {
        cluster.queue.enqueue(vec![i]).await.unwrap();
    }
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(cluster.queue.is_empty());
    assert_eq!(cluster.processed.load(Ordering::SeqCst), 3);
    assert_eq!(leader.stats().snapshot().succeeded, 3);
    assert_eq!(follower.stats().snapshot().dequeued, 0);

    follower.shutdown().await.unwrap();
    leader.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn the_follower_takes_over_after_the_leader_shuts_down() {
    let cluster = Cluster::new().await;
    let leader = cluster.host(true);
    settle().await;
    let follower = cluster.host(true);
    settle().await;

    leader.shutdown().await.unwrap();
    assert_eq!(cluster.leases.holder(LOCK), None);

    tokio::time::sleep(LeaseConfig::default().renewal_interval).await;
    settle().await;
    assert!(follower.has_lease());
    assert!(follower.is_listening());

    cluster.queue.enqueue(b"after failover".to_vec()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(cluster.queue.is_empty());
    assert_eq!(follower.stats().snapshot().succeeded, 1);

    follower.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn losing_the_lease_stops_the_listener() {
    let cluster = Cluster::new().await;
    let leader = cluster.host(true);
    settle().await;
    assert!(leader.is_listening());

    // Another party takes the lease object over.
    cluster.leases.delete(LOCK);
    let usurper = cluster.leases.blob(LOCK);
    usurper.ensure_exists().await.unwrap();
    usurper
        .acquire_lease(Duration::from_secs(60), triggerhost_core::LeaseId::new())
        .await
        .unwrap();

    tokio::time::sleep(LeaseConfig::default().renewal_interval).await;
    settle().await;
    assert!(!leader.has_lease());
    assert!(!leader.is_listening());

    leader.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn without_singleton_mode_every_host_listens() {
    let cluster = Cluster::new().await;
    let first = cluster.host(false);
    let second = cluster.host(false);
    settle().await;

    assert!(first.is_listening());
    assert!(second.is_listening());
    assert!(!first.has_lease());
    assert_eq!(cluster.leases.holder(LOCK), None);

    cluster.queue.enqueue(b"work".to_vec()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(cluster.queue.is_empty());
    assert_eq!(cluster.processed.load(Ordering::SeqCst), 1);

    first.shutdown().await.unwrap();
    second.shutdown().await.unwrap();
}

#[tokio::test]
async fn invalid_configuration_is_rejected_at_start() {
    let cluster = Cluster::new().await;
    let config = HostConfig {
        lease: LeaseConfig::default()
            .with_lease_duration(Duration::from_secs(4))
            .with_renewal_interval(Duration::from_secs(2)),
        ..HostConfig::default()
    };
    let storage = HostStorage {
        lease: Arc::new(cluster.leases.blob(LOCK)),
        queue: Arc::new(cluster.queue.clone()) as Arc<dyn QueueClient>,
        poison_queue: None,
    };
    let executor = |_message: QueueMessage, _cancel: CancellationToken| std::future::ready(true);

    assert!(Host::start(config, storage, executor).is_err());
}
