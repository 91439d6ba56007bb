mod feed_reader;
mod lease_renewer;

use changefeed_core::feed::ChangeFeedClient;
use changefeed_core::Lease;
use changefeed_lease_store::LeaseStoreManager;
use futures::FutureExt;
use metrics::counter;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checkpointer::PartitionCheckpointer;
use crate::errors::{ProcessorError, Result};
use crate::lease_state::LeaseState;
use crate::observer::{ChangeFeedObserver, CloseReason, ObserverContext};
use crate::options::ProcessorOptions;
use crate::processor_metrics::{LEASES_LOST_TOTAL, OBSERVER_ERRORS_TOTAL};

use feed_reader::{panic_message, FeedReader};
use lease_renewer::LeaseRenewer;

/// PartitionSupervisor drives one owned partition: it keeps the lease renewed,
/// reads the partition's change feed into the observer and checkpoints progress.
///
/// The renewer and the reader run side by side until one of them ends the
/// partition, or until the `shutdown` token given at construction is cancelled.
/// Whatever ends the partition decides the [`CloseReason`] handed to the observer.
pub struct PartitionSupervisor {
    lease_token: String,
    host_name: String,
    shutdown: CancellationToken,
    state: Arc<LeaseState>,
    lease_manager: Arc<dyn LeaseStoreManager>,
    checkpointer: Arc<PartitionCheckpointer>,
    renewer: LeaseRenewer,
    reader: FeedReader,
    observer: Mutex<Option<Box<dyn ChangeFeedObserver>>>,
    result: OnceLock<Arc<ProcessorError>>,
}

impl PartitionSupervisor {
    pub fn new(
        lease: Lease,
        lease_manager: Arc<dyn LeaseStoreManager>,
        feed: Arc<dyn ChangeFeedClient>,
        observer: Box<dyn ChangeFeedObserver>,
        options: Arc<ProcessorOptions>,
        shutdown: CancellationToken,
    ) -> Self {
        let lease_token = lease.lease_token.clone();
        let state = Arc::new(LeaseState::new(lease, shutdown.child_token()));
        let checkpointer = Arc::new(PartitionCheckpointer::new(
            lease_manager.clone(),
            state.clone(),
        ));
        let renewer = LeaseRenewer::new(
            lease_manager.clone(),
            state.clone(),
            options.lease_renew_interval,
        );
        let reader = FeedReader::new(
            &lease_token,
            feed,
            state.clone(),
            checkpointer.clone(),
            options.clone(),
        );

        PartitionSupervisor {
            lease_token,
            host_name: options.host_name.clone(),
            shutdown,
            state,
            lease_manager,
            checkpointer,
            renewer,
            reader,
            observer: Mutex::new(Some(observer)),
            result: OnceLock::new(),
        }
    }

    pub fn lease_token(&self) -> &str {
        &self.lease_token
    }

    /// The latest known copy of the lease.
    pub async fn lease(&self) -> Lease {
        self.state.snapshot().await
    }

    /// The failure that ended the partition, if any.
    pub fn result_exception(&self) -> Option<Arc<ProcessorError>> {
        self.result.get().cloned()
    }

    /// Merge the properties of `lease` into the live lease and persist them.
    /// Nothing is written when the live lease already carries them.
    pub async fn update_lease(&self, lease: &Lease) -> Result<()> {
        let mut current = self.state.lock().await;
        let unchanged = lease
            .properties
            .iter()
            .all(|(key, value)| current.properties.get(key) == Some(value));
        if unchanged {
            return Ok(());
        }

        let mut updated = current.clone();
        updated
            .properties
            .extend(lease.properties.iter().map(|(k, v)| (k.clone(), v.clone())));

        match self.lease_manager.update_properties(&updated).await {
            Ok(persisted) => {
                *current = persisted;
                Ok(())
            }
            Err(e) => {
                let error = ProcessorError::from(e);
                if error.is_lease_lost() {
                    self.state.mark_lost();
                }
                Err(error)
            }
        }
    }

    /// Process the partition until it ends and return why it ended.
    /// The observer is consumed, so a supervisor runs at most once.
    pub async fn run(&self) -> CloseReason {
        let Some(mut observer) = self.observer.lock().await.take() else {
            warn!(lease_token = %self.lease_token, "partition supervisor already ran");
            return CloseReason::Unknown;
        };

        info!(lease_token = %self.lease_token, host = %self.host_name, "partition processing started");

        let open_context = self.context();
        let opened = match AssertUnwindSafe(observer.open(&open_context))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ProcessorError::Observer(e)),
            Err(panic) => Err(ProcessorError::Observer(anyhow::anyhow!(
                "observer panicked on open: {}",
                panic_message(panic.as_ref())
            ))),
        };

        let reason = match opened {
            Ok(()) => {
                let (renewed, read) =
                    tokio::join!(self.renewer.run(), self.reader.run(&mut observer));
                self.conclude(renewed, read)
            }
            Err(e) => {
                self.state.stop_token().cancel();
                self.conclude(Ok(()), Err(e))
            }
        };

        match reason {
            CloseReason::LeaseLost => {
                counter!(LEASES_LOST_TOTAL.name, "host" => self.host_name.clone()).increment(1);
            }
            CloseReason::ObserverError => {
                counter!(OBSERVER_ERRORS_TOTAL.name, "host" => self.host_name.clone()).increment(1);
            }
            _ => {}
        }

        let close_context = self.context();
        match AssertUnwindSafe(observer.close(&close_context, reason))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(lease_token = %self.lease_token, error = %e, "observer failed to close");
            }
            Err(panic) => {
                warn!(
                    lease_token = %self.lease_token,
                    panic = %panic_message(panic.as_ref()),
                    "observer panicked on close"
                );
            }
        }

        info!(
            lease_token = %self.lease_token,
            host = %self.host_name,
            reason = %reason,
            "partition processing stopped"
        );
        reason
    }

    fn context(&self) -> ObserverContext {
        ObserverContext::new(
            &self.lease_token,
            &self.host_name,
            None,
            self.checkpointer.clone(),
        )
    }

    /// Decide the close reason from the outcome of both loops and keep the failure.
    fn conclude(&self, renewed: Result<()>, read: Result<()>) -> CloseReason {
        let failure = match (read, renewed) {
            (Err(e), _) | (Ok(()), Err(e)) => Some(e),
            (Ok(()), Ok(())) => None,
        };

        let reason = match &failure {
            _ if self.state.is_lost() => CloseReason::LeaseLost,
            Some(ProcessorError::LeaseLost(_)) => CloseReason::LeaseLost,
            Some(ProcessorError::Observer(_)) => CloseReason::ObserverError,
            Some(ProcessorError::PartitionGone(_)) => CloseReason::ResourceGone,
            Some(_) => CloseReason::Unknown,
            None if self.shutdown.is_cancelled() => CloseReason::Shutdown,
            None => CloseReason::Unknown,
        };

        if let Some(error) = failure {
            debug!(lease_token = %self.lease_token, error = %error, "partition ended with error");
            let _ = self.result.set(Arc::new(error));
        } else if reason == CloseReason::LeaseLost {
            let _ = self
                .result
                .set(Arc::new(ProcessorError::LeaseLost(self.lease_token.clone())));
        }
        reason
    }
}
