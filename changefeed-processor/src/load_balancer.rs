use changefeed_load_balancer::PartitionLoadBalancingStrategy;
use changefeed_lease_store::LeaseStoreManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::partition_controller::PartitionController;

/// Periodically asks the strategy which leases to take and hands them to the controller.
pub struct PartitionLoadBalancer {
    controller: PartitionController,
    lease_store: Arc<dyn LeaseStoreManager>,
    strategy: Arc<dyn PartitionLoadBalancingStrategy>,
    acquire_interval: Duration,
}

impl PartitionLoadBalancer {
    pub fn new(
        controller: PartitionController,
        lease_store: Arc<dyn LeaseStoreManager>,
        strategy: Arc<dyn PartitionLoadBalancingStrategy>,
        acquire_interval: Duration,
    ) -> Self {
        PartitionLoadBalancer {
            controller,
            lease_store,
            strategy,
            acquire_interval,
        }
    }

    /// Spawn the balancing loop. The first pass runs immediately; a failed pass
    /// is logged and the loop carries on until `cancel` fires.
    pub fn start_with_cancel(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                host = %self.lease_store.host_name(),
                interval = ?self.acquire_interval,
                "partition load balancer started"
            );

            let mut ticker = tokio::time::interval(self.acquire_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!(host = %self.lease_store.host_name(), "partition load balancer stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            warn!(
                                host = %self.lease_store.host_name(),
                                error = %e,
                                "load balancing pass failed"
                            );
                        }
                    }
                }
            }
        })
    }

    /// One balancing pass. Returns how many leases the strategy selected.
    pub async fn run_once(&self) -> Result<usize> {
        let all_leases = self
            .lease_store
            .get_all_leases()
            .await?
            .collect_leases()
            .await?;
        let selected = self.strategy.select_leases_to_take(&all_leases);
        let count = selected.len();

        debug!(
            host = %self.lease_store.host_name(),
            leases = all_leases.len(),
            selected = count,
            "load balancing pass"
        );

        for lease in selected {
            let lease_token = lease.lease_token.clone();
            if let Err(e) = self.controller.add_or_update_lease(lease).await {
                warn!(lease_token = %lease_token, error = %e, "failed to take lease");
            }
        }
        Ok(count)
    }
}
