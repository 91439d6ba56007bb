//! # Partition Controller Tests
//!
//! The controller is driven directly, without a balancing loop, to pin down
//! what happens when a lease arrives for a partition already running here:
//!
//! - **No restart**: the running supervisor and its observer are kept.
//! - **Merge**: the new lease properties are written to the stored lease.
//! - **Lost write**: a rejected property write ends the partition as lost.

mod common;

use std::sync::Arc;
use std::time::Duration;

use changefeed_core::feed::{ChangeFeedClient, InMemoryChangeFeed};
use changefeed_core::store::MemoryStore;
use changefeed_lease_store::{LeaseManager, LeaseStoreManager};
use changefeed_processor::{
    CloseReason, PartitionController, PartitionKeyRangeCache, PartitionSynchronizer,
    ProcessorError, TraceHealthMonitor,
};
use common::{RecordingObserverFactory, ScriptedLeaseStore};

fn controller(
    feed: &InMemoryChangeFeed,
    lease_store: &ScriptedLeaseStore,
    observers: &RecordingObserverFactory,
) -> PartitionController {
    let lease_manager: Arc<dyn LeaseStoreManager> = Arc::new(lease_store.clone());
    let feed: Arc<dyn ChangeFeedClient> = Arc::new(feed.clone());
    let key_ranges = Arc::new(PartitionKeyRangeCache::new(feed.clone()));
    let synchronizer = Arc::new(PartitionSynchronizer::new(lease_manager.clone(), key_ranges));

    PartitionController::new(
        lease_manager,
        feed,
        Arc::new(observers.clone()),
        synchronizer,
        Arc::new(TraceHealthMonitor),
        Arc::new(common::fast_options("host-a")),
    )
}

/// **What**: The same lease is handed to the controller three times: to start
/// it, with a new property, and with another property the store rejects.
///
/// **Why**: The balancing loop hands over every lease it selects on each pass,
/// including the ones this host already processes, carrying the properties
/// the strategy stamped on them.
///
/// **Checks**:
/// - The second call keeps the same supervisor and opens no new observer
/// - The merged property is persisted and the host still owns the lease
/// - A `LeaseLost` answer to the property write closes the observer with
///   `CloseReason::LeaseLost`, leaves the lease unreleased and is reported
///   as the partition's last failure
#[tokio::test]
async fn running_lease_update_merges_properties() {
    let feed = InMemoryChangeFeed::with_ranges(1);
    let store = MemoryStore::new();
    let observers = RecordingObserverFactory::new();
    let lease_store = ScriptedLeaseStore::new(&store, "host-a");
    let controller = controller(&feed, &lease_store, &observers);

    let lease = lease_store.create_lease_if_not_exist("0", None).await.unwrap();
    controller.add_or_update_lease(lease.clone()).await.unwrap();
    assert_eq!(controller.active_lease_tokens().await, vec!["0"]);
    assert!(
        common::wait_until(Duration::from_secs(5), || async { observers.opened("0") == 1 })
            .await
    );
    let running = controller.supervisor("0").await.unwrap();

    let mut stamped = lease.clone();
    stamped
        .properties
        .insert("zone".to_owned(), "west".to_owned());
    controller.add_or_update_lease(stamped).await.unwrap();

    let current = controller.supervisor("0").await.unwrap();
    assert!(Arc::ptr_eq(&running, &current));
    assert_eq!(observers.opened("0"), 1);
    assert!(observers.close_reasons("0").is_empty());
    assert_eq!(
        running.lease().await.properties.get("zone").map(String::as_str),
        Some("west")
    );
    let stored = common::leases(&store).await;
    assert_eq!(
        stored["0"].properties.get("zone").map(String::as_str),
        Some("west")
    );
    assert!(stored["0"].is_owned_by("host-a"));

    lease_store.reject_property_updates();
    let mut restamped = lease;
    restamped
        .properties
        .insert("zone".to_owned(), "east".to_owned());
    controller.add_or_update_lease(restamped).await.unwrap();

    assert!(
        common::wait_until(Duration::from_secs(5), || async {
            observers.close_reasons("0") == vec![CloseReason::LeaseLost]
        })
        .await
    );
    assert!(
        common::wait_until(Duration::from_secs(5), || async {
            controller.last_failure("0").is_some()
        })
        .await
    );
    assert!(controller.active_lease_tokens().await.is_empty());
    let failure = controller.last_failure("0").unwrap();
    assert!(matches!(failure.as_ref(), ProcessorError::LeaseLost(_)));

    let stored = common::leases(&store).await;
    assert!(stored["0"].is_owned_by("host-a"));
    assert_eq!(
        stored["0"].properties.get("zone").map(String::as_str),
        Some("west")
    );

    controller.shutdown().await;
    assert_eq!(observers.opened("0"), 1);
}
