use changefeed_core::Lease;
use changefeed_lease_store::LeaseStoreManager;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

use crate::errors::{ProcessorError, Result};
use crate::key_range_cache::PartitionKeyRangeCache;

/// Keeps the set of leases in line with the partition key ranges of the feed.
pub struct PartitionSynchronizer {
    lease_manager: Arc<dyn LeaseStoreManager>,
    key_ranges: Arc<PartitionKeyRangeCache>,
}

impl PartitionSynchronizer {
    pub fn new(
        lease_manager: Arc<dyn LeaseStoreManager>,
        key_ranges: Arc<PartitionKeyRangeCache>,
    ) -> Self {
        PartitionSynchronizer {
            lease_manager,
            key_ranges,
        }
    }

    /// Create a lease for every current range that has none. Returns how many were created.
    pub async fn create_missing_leases(&self) -> Result<usize> {
        let ranges = self.key_ranges.get_ranges(true).await?;
        let existing: HashSet<String> = self
            .lease_manager
            .get_all_leases()
            .await?
            .collect_leases()
            .await?
            .into_iter()
            .map(|lease| lease.lease_token)
            .collect();

        let mut created = 0;
        for range in ranges.iter().filter(|range| !existing.contains(&range.id)) {
            self.lease_manager
                .create_lease_if_not_exist(&range.id, None)
                .await?;
            created += 1;
        }

        info!(
            ranges = ranges.len(),
            existing = existing.len(),
            created,
            "synchronized leases with partition key ranges"
        );
        Ok(created)
    }

    /// Create the leases of the ranges that replaced the range of `lease`.
    /// Every child starts from the parent's continuation.
    pub async fn split_partition(&self, lease: &Lease) -> Result<Vec<Lease>> {
        let ranges = self.key_ranges.get_ranges(true).await?;
        let children: Vec<&str> = ranges
            .iter()
            .filter(|range| range.parents.iter().any(|p| p == &lease.lease_token))
            .map(|range| range.id.as_str())
            .collect();

        if children.is_empty() {
            return Err(ProcessorError::SplitUnresolved(lease.lease_token.clone()));
        }

        let mut leases = Vec::with_capacity(children.len());
        for child in &children {
            let child_lease = self
                .lease_manager
                .create_lease_if_not_exist(child, lease.continuation_token.clone())
                .await?;
            leases.push(child_lease);
        }

        info!(
            lease_token = %lease.lease_token,
            children = ?children,
            "partition split into child leases"
        );
        Ok(leases)
    }
}
