//! Shared helpers for `changefeed-lease-store` integration tests.
//!
//! Every host in a test shares one `MemoryStore`, which is how several processor
//! instances share one lease container in a real deployment.

#![allow(dead_code)]

use std::sync::Arc;

use changefeed_core::store::MemoryStore;
use changefeed_lease_store::{
    DocumentLeaseStoreManager, LeaseStoreManagerSettings, PartitionedByIdRequestOptionsFactory,
    SinglePartitionRequestOptionsFactory,
};

pub const PREFIX: &str = "/changefeed/test-processor";

/// Lease store manager acting for `host` on top of `store`.
pub fn manager(store: &MemoryStore, host: &str) -> DocumentLeaseStoreManager {
    DocumentLeaseStoreManager::new(
        LeaseStoreManagerSettings::new(PREFIX, host),
        Arc::new(store.clone()),
        Arc::new(SinglePartitionRequestOptionsFactory),
    )
}

/// Same as [`manager`] but routing every document on its own id.
pub fn partitioned_manager(store: &MemoryStore, host: &str) -> DocumentLeaseStoreManager {
    DocumentLeaseStoreManager::new(
        LeaseStoreManagerSettings::new(PREFIX, host),
        Arc::new(store.clone()),
        Arc::new(PartitionedByIdRequestOptionsFactory),
    )
}
