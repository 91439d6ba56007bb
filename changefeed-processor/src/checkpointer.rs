use changefeed_lease_store::LeaseStoreManager;
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::{ProcessorError, Result};
use crate::lease_state::LeaseState;
use crate::processor_metrics::CHECKPOINTS_TOTAL;

/// Writes partition progress into the lease.
pub struct PartitionCheckpointer {
    lease_manager: Arc<dyn LeaseStoreManager>,
    state: Arc<LeaseState>,
}

impl PartitionCheckpointer {
    pub(crate) fn new(lease_manager: Arc<dyn LeaseStoreManager>, state: Arc<LeaseState>) -> Self {
        PartitionCheckpointer {
            lease_manager,
            state,
        }
    }

    pub async fn checkpoint_partition(&self, continuation_token: &str) -> Result<()> {
        let mut lease = self.state.lock().await;

        match self.lease_manager.checkpoint(&lease, continuation_token).await {
            Ok(updated) => {
                debug!(
                    lease_token = %updated.lease_token,
                    continuation = %continuation_token,
                    "partition checkpointed"
                );
                *lease = updated;
                counter!(CHECKPOINTS_TOTAL.name, "host" => self.lease_manager.host_name().to_owned())
                    .increment(1);
                Ok(())
            }
            Err(e) => {
                let error = ProcessorError::from(e);
                if error.is_lease_lost() {
                    self.state.mark_lost();
                } else {
                    warn!(lease_token = %lease.lease_token, error = %error, "checkpoint failed");
                }
                Err(error)
            }
        }
    }
}
