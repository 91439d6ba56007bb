use changefeed_lease_store::LeaseStoreManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::errors::{ProcessorError, Result};
use crate::partition_synchronizer::PartitionSynchronizer;

/// Seeds the lease store once per deployment.
///
/// Every host calls `initialize` on start. The host that wins the
/// initialization lock creates the missing leases and marks the store
/// initialized; the others wait for the marker.
pub struct Bootstrapper {
    synchronizer: Arc<PartitionSynchronizer>,
    lease_store: Arc<dyn LeaseStoreManager>,
    lock_ttl: Duration,
    retry_delay: Duration,
    timeout: Duration,
}

impl Bootstrapper {
    pub fn new(
        synchronizer: Arc<PartitionSynchronizer>,
        lease_store: Arc<dyn LeaseStoreManager>,
        lock_ttl: Duration,
        retry_delay: Duration,
        timeout: Duration,
    ) -> Self {
        Bootstrapper {
            synchronizer,
            lease_store,
            lock_ttl,
            retry_delay,
            timeout,
        }
    }

    pub async fn initialize(&self) -> Result<()> {
        let deadline = Instant::now() + self.timeout;

        loop {
            if self.lease_store.is_initialized().await? {
                return Ok(());
            }

            if self
                .lease_store
                .acquire_initialization_lock(self.lock_ttl)
                .await?
            {
                let seeded = self.seed().await;
                if let Err(e) = self.lease_store.release_initialization_lock().await {
                    warn!(error = %e, "failed to release the initialization lock");
                }
                return seeded;
            }

            if Instant::now() >= deadline {
                return Err(ProcessorError::BootstrapTimeout(self.timeout));
            }

            info!(
                host = %self.lease_store.host_name(),
                "another host is initializing the lease store, waiting"
            );
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    async fn seed(&self) -> Result<()> {
        if self.lease_store.is_initialized().await? {
            return Ok(());
        }

        let created = self.synchronizer.create_missing_leases().await?;
        self.lease_store.mark_initialized().await?;
        info!(
            host = %self.lease_store.host_name(),
            created,
            "lease store initialized"
        );
        Ok(())
    }
}
