//! # Bootstrap Tests
//!
//! Hosts starting together must seed the lease store exactly once:
//!
//! - **Single seeding**: only the lock holder reads the partition key ranges
//!   and creates leases; the others wait for the initialized marker.
//! - **Crashed holder**: a lock left behind by a dead host lapses after its TTL.
//! - **Timeout**: a host gives up when the store never gets initialized.

mod common;

use std::sync::Arc;
use std::time::Duration;

use changefeed_core::feed::InMemoryChangeFeed;
use changefeed_core::store::MemoryStore;
use changefeed_lease_store::{
    DocumentLeaseStoreManager, LeaseStore, LeaseStoreManager, LeaseStoreManagerSettings,
    SinglePartitionRequestOptionsFactory,
};
use changefeed_processor::{
    Bootstrapper, PartitionKeyRangeCache, PartitionSynchronizer, ProcessorError,
};

fn lease_store(store: &MemoryStore, host: &str) -> Arc<dyn LeaseStoreManager> {
    Arc::new(DocumentLeaseStoreManager::new(
        LeaseStoreManagerSettings::new(common::PREFIX, host),
        Arc::new(store.clone()),
        Arc::new(SinglePartitionRequestOptionsFactory),
    ))
}

fn bootstrapper(
    feed: &InMemoryChangeFeed,
    store: &MemoryStore,
    host: &str,
    timeout: Duration,
) -> Bootstrapper {
    let leases = lease_store(store, host);
    let key_ranges = Arc::new(PartitionKeyRangeCache::new(Arc::new(feed.clone())));
    let synchronizer = Arc::new(PartitionSynchronizer::new(leases.clone(), key_ranges));
    Bootstrapper::new(
        synchronizer,
        leases,
        Duration::from_millis(150),
        Duration::from_millis(20),
        timeout,
    )
}

/// **What**: Three hosts bootstrap the same store concurrently.
///
/// **Checks**:
/// - All three return `Ok`
/// - One lease per range exists
/// - The partition key ranges were read (with a forced refresh) only once
#[tokio::test]
async fn concurrent_bootstrap_seeds_once() {
    let feed = InMemoryChangeFeed::with_ranges(3);
    let store = MemoryStore::new();
    let a = bootstrapper(&feed, &store, "host-a", Duration::from_secs(5));
    let b = bootstrapper(&feed, &store, "host-b", Duration::from_secs(5));
    let c = bootstrapper(&feed, &store, "host-c", Duration::from_secs(5));

    let (ra, rb, rc) = tokio::join!(a.initialize(), b.initialize(), c.initialize());
    ra.unwrap();
    rb.unwrap();
    rc.unwrap();

    let leases = common::leases(&store).await;
    assert_eq!(leases.len(), 3);
    assert!(leases.values().all(|lease| !lease.is_owned()));
    assert_eq!(feed.range_reads(), (1, 1));
}

/// **What**: Bootstrap an already initialized store.
///
/// **Checks**: Nothing is read from the feed and no lease is added, even for
/// ranges that appeared since.
#[tokio::test]
async fn initialized_store_is_left_alone() {
    let feed = InMemoryChangeFeed::with_ranges(2);
    let store = MemoryStore::new();
    bootstrapper(&feed, &store, "host-a", Duration::from_secs(5))
        .initialize()
        .await
        .unwrap();
    assert_eq!(feed.range_reads(), (1, 1));

    feed.split_range("1", &["2", "3"]).await.unwrap();
    bootstrapper(&feed, &store, "host-b", Duration::from_secs(5))
        .initialize()
        .await
        .unwrap();

    assert_eq!(feed.range_reads(), (1, 1));
    assert_eq!(common::leases(&store).await.len(), 2);
}

/// **What**: A host took the initialization lock and died before seeding.
///
/// **Why**: The lock carries a TTL precisely so that a crashed holder cannot
/// block every other host forever.
///
/// **Checks**: Bootstrap succeeds once the abandoned lock lapses.
#[tokio::test]
async fn abandoned_lock_lapses() {
    let feed = InMemoryChangeFeed::with_ranges(2);
    let store = MemoryStore::new();

    let crashed = lease_store(&store, "host-crashed");
    assert!(crashed
        .acquire_initialization_lock(Duration::from_millis(150))
        .await
        .unwrap());

    bootstrapper(&feed, &store, "host-a", Duration::from_secs(5))
        .initialize()
        .await
        .unwrap();

    assert_eq!(common::leases(&store).await.len(), 2);
    assert!(crashed.is_initialized().await.unwrap());
}

/// **What**: The store is never initialized within the bootstrap timeout.
///
/// **Checks**: `initialize` fails with `ProcessorError::BootstrapTimeout`.
#[tokio::test]
async fn bootstrap_times_out() {
    let feed = InMemoryChangeFeed::with_ranges(1);
    let store = MemoryStore::new();

    let holder = lease_store(&store, "host-slow");
    assert!(holder
        .acquire_initialization_lock(Duration::from_secs(30))
        .await
        .unwrap());

    let result = bootstrapper(&feed, &store, "host-a", Duration::from_millis(200))
        .initialize()
        .await;
    assert!(matches!(result, Err(ProcessorError::BootstrapTimeout(_))));
    assert!(common::leases(&store).await.is_empty());
}
