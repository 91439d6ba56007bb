use changefeed_core::feed::ChangeFeedClient;
use changefeed_lease_store::LeaseStoreManager;
use metrics::gauge;
use std::sync::Arc;
use tracing::debug;

use crate::errors::Result;
use crate::processor_metrics::REMAINING_WORK_ESTIMATE;

/// Estimated backlog of one lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemainingPartitionWork {
    pub lease_token: String,
    pub remaining_work: u64,
}

/// Estimates how far behind the partitions are, for monitoring only.
pub struct RemainingWorkEstimator {
    lease_store: Arc<dyn LeaseStoreManager>,
    feed: Arc<dyn ChangeFeedClient>,
}

impl RemainingWorkEstimator {
    pub fn new(lease_store: Arc<dyn LeaseStoreManager>, feed: Arc<dyn ChangeFeedClient>) -> Self {
        RemainingWorkEstimator { lease_store, feed }
    }

    /// Sum of the estimates of every lease.
    pub async fn estimated_remaining_work(&self) -> Result<u64> {
        let total: u64 = self
            .estimated_remaining_work_per_partition()
            .await?
            .iter()
            .map(|partition| partition.remaining_work)
            .sum();

        gauge!(REMAINING_WORK_ESTIMATE.name, "host" => self.lease_store.host_name().to_owned())
            .set(total as f64);
        Ok(total)
    }

    /// Per-lease estimates, in lease store order. Partitions that no longer
    /// exist or are not readable yet count as no work.
    pub async fn estimated_remaining_work_per_partition(&self) -> Result<Vec<RemainingPartitionWork>> {
        let leases = self
            .lease_store
            .get_all_leases()
            .await?
            .collect_leases()
            .await?;

        let mut estimates = Vec::with_capacity(leases.len());
        for lease in leases {
            let remaining_work = match self
                .feed
                .read_feed_position(&lease.lease_token, lease.continuation_token.as_deref())
                .await
            {
                Ok(position) => position.remaining(),
                Err(e) if e.is_not_found() || e.is_gone() => {
                    debug!(lease_token = %lease.lease_token, error = %e, "no feed position for lease");
                    0
                }
                Err(e) => return Err(e.into()),
            };
            estimates.push(RemainingPartitionWork {
                lease_token: lease.lease_token,
                remaining_work,
            });
        }
        Ok(estimates)
    }
}
