use changefeed_lease_store::LeaseStoreManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::errors::{ProcessorError, Result};
use crate::lease_state::LeaseState;

/// Keeps an owned lease alive by renewing it every `renew_interval`.
pub(crate) struct LeaseRenewer {
    lease_manager: Arc<dyn LeaseStoreManager>,
    state: Arc<LeaseState>,
    renew_interval: Duration,
}

impl LeaseRenewer {
    pub(crate) fn new(
        lease_manager: Arc<dyn LeaseStoreManager>,
        state: Arc<LeaseState>,
        renew_interval: Duration,
    ) -> Self {
        LeaseRenewer {
            lease_manager,
            state,
            renew_interval,
        }
    }

    /// Runs until the partition stops. Returns `LeaseLost` once a renewal is
    /// rejected; any other renewal failure is retried on the next tick.
    pub(crate) async fn run(&self) -> Result<()> {
        let stop = self.state.stop_token().clone();
        let mut ticker = interval_at(Instant::now() + self.renew_interval, self.renew_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    match self.renew().await {
                        Ok(()) => {}
                        Err(e) if e.is_lease_lost() => {
                            self.state.mark_lost();
                            return Err(e);
                        }
                        Err(e) => {
                            warn!(error = %e, "lease renewal failed, retrying on next tick");
                        }
                    }
                }
            }
        }
    }

    async fn renew(&self) -> Result<()> {
        let mut lease = self.state.lock().await;
        let renewed = self
            .lease_manager
            .renew(&lease)
            .await
            .map_err(ProcessorError::from)?;
        debug!(lease_token = %renewed.lease_token, timestamp = renewed.timestamp, "lease renewed");
        *lease = renewed;
        Ok(())
    }
}
