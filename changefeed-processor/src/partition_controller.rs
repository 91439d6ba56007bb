use changefeed_core::feed::ChangeFeedClient;
use changefeed_core::Lease;
use changefeed_lease_store::LeaseStoreManager;
use dashmap::DashMap;
use metrics::{counter, gauge};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::errors::{ProcessorError, Result};
use crate::health_monitor::{
    HealthMonitor, HealthMonitoringRecord, HealthSeverity, MonitoredOperation,
};
use crate::observer::{ChangeFeedObserverFactory, CloseReason};
use crate::options::ProcessorOptions;
use crate::partition_supervisor::PartitionSupervisor;
use crate::partition_synchronizer::PartitionSynchronizer;
use crate::processor_metrics::{
    LEASES_ACQUIRED_TOTAL, LEASE_ACQUIRE_FAILURES_TOTAL, PARTITIONS_OWNED,
};

struct PartitionSlot {
    generation: u64,
    supervisor: Arc<PartitionSupervisor>,
}

struct ControllerInner {
    lease_manager: Arc<dyn LeaseStoreManager>,
    feed: Arc<dyn ChangeFeedClient>,
    observer_factory: Arc<dyn ChangeFeedObserverFactory>,
    synchronizer: Arc<PartitionSynchronizer>,
    health_monitor: Arc<dyn HealthMonitor>,
    options: Arc<ProcessorOptions>,
    supervisors: Mutex<HashMap<String, PartitionSlot>>,
    generation: AtomicU64,
    shutdown: CancellationToken,
    // a supervisor task ends only after the follow-up of its close reason
    tasks: TaskTracker,
    failures: DashMap<String, Arc<ProcessorError>>,
}

/// PartitionController owns the partition supervisors running on this host,
/// at most one per lease token.
///
/// Supervisors are started when a lease is acquired and cleaned up when they
/// stop, with a follow-up that depends on why they stopped:
/// - shutdown, observer error, unknown: the lease is released for any host to retry
/// - resource gone: the child leases are created and taken, the parent lease deleted
/// - lease lost: nothing, the lease belongs to another host
#[derive(Clone)]
pub struct PartitionController {
    inner: Arc<ControllerInner>,
}

impl PartitionController {
    pub fn new(
        lease_manager: Arc<dyn LeaseStoreManager>,
        feed: Arc<dyn ChangeFeedClient>,
        observer_factory: Arc<dyn ChangeFeedObserverFactory>,
        synchronizer: Arc<PartitionSynchronizer>,
        health_monitor: Arc<dyn HealthMonitor>,
        options: Arc<ProcessorOptions>,
    ) -> Self {
        PartitionController {
            inner: Arc::new(ControllerInner {
                lease_manager,
                feed,
                observer_factory,
                synchronizer,
                health_monitor,
                options,
                supervisors: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
                failures: DashMap::new(),
            }),
        }
    }

    /// Take back the leases this host still owns from a previous run.
    pub async fn initialize(&self) -> Result<()> {
        let owned = self
            .inner
            .lease_manager
            .get_owned_leases()
            .await?
            .collect_leases()
            .await?;

        if !owned.is_empty() {
            info!(
                host = %self.inner.options.host_name,
                leases = owned.len(),
                "resuming leases owned before restart"
            );
        }
        for lease in owned {
            if let Err(e) = self.add_or_update_lease(lease).await {
                warn!(error = %e, "failed to resume owned lease");
            }
        }
        Ok(())
    }

    /// Start processing `lease` unless this host already does.
    ///
    /// For a partition already running here only the lease properties are merged
    /// into the live lease. Losing the acquisition race is not an error.
    pub async fn add_or_update_lease(&self, lease: Lease) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Ok(());
        }

        let mut supervisors = self.inner.supervisors.lock().await;
        if self.inner.shutdown.is_cancelled() {
            return Ok(());
        }

        if let Some(slot) = supervisors.get(&lease.lease_token) {
            let supervisor = slot.supervisor.clone();
            drop(supervisors);
            return match supervisor.update_lease(&lease).await {
                Err(e) if e.is_lease_lost() => {
                    debug!(lease_token = %lease.lease_token, "lease lost while updating properties");
                    Ok(())
                }
                other => other,
            };
        }

        let acquired = match self.inner.lease_manager.acquire(&lease).await {
            Ok(acquired) => acquired,
            Err(e) if e.is_lease_lost() => {
                debug!(
                    lease_token = %lease.lease_token,
                    host = %self.inner.options.host_name,
                    "lease taken by another host first"
                );
                return Ok(());
            }
            Err(e) => {
                drop(supervisors);
                let cause = Arc::new(e);
                counter!(LEASE_ACQUIRE_FAILURES_TOTAL.name, "host" => self.inner.options.host_name.clone())
                    .increment(1);
                self.inner
                    .health_monitor
                    .inspect(HealthMonitoringRecord {
                        severity: HealthSeverity::Error,
                        operation: MonitoredOperation::AcquireLease,
                        lease: lease.clone(),
                        cause: cause.clone(),
                    })
                    .await;
                return Err(ProcessorError::AcquireFailed {
                    lease_token: lease.lease_token,
                    source: cause,
                });
            }
        };

        counter!(LEASES_ACQUIRED_TOTAL.name, "host" => self.inner.options.host_name.clone())
            .increment(1);
        self.start_supervisor(&mut supervisors, acquired);
        Ok(())
    }

    fn start_supervisor(&self, supervisors: &mut HashMap<String, PartitionSlot>, lease: Lease) {
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let lease_token = lease.lease_token.clone();

        let supervisor = Arc::new(PartitionSupervisor::new(
            lease,
            self.inner.lease_manager.clone(),
            self.inner.feed.clone(),
            self.inner.observer_factory.create_observer(),
            self.inner.options.clone(),
            self.inner.shutdown.child_token(),
        ));

        let controller = self.clone();
        let running = supervisor.clone();
        let token = lease_token.clone();
        self.inner.tasks.spawn(async move {
            let reason = running.run().await;
            controller
                .on_supervisor_stopped(&token, generation, &running, reason)
                .await;
        });

        gauge!(PARTITIONS_OWNED.name, "host" => self.inner.options.host_name.clone()).increment(1.0);
        supervisors.insert(
            lease_token,
            PartitionSlot {
                generation,
                supervisor,
            },
        );
    }

    async fn on_supervisor_stopped(
        &self,
        lease_token: &str,
        generation: u64,
        supervisor: &PartitionSupervisor,
        reason: CloseReason,
    ) {
        {
            let mut supervisors = self.inner.supervisors.lock().await;
            if supervisors
                .get(lease_token)
                .is_some_and(|slot| slot.generation == generation)
            {
                supervisors.remove(lease_token);
            }
        }
        gauge!(PARTITIONS_OWNED.name, "host" => self.inner.options.host_name.clone()).decrement(1.0);

        if let Some(failure) = supervisor.result_exception() {
            match reason {
                CloseReason::Shutdown => {}
                CloseReason::ObserverError | CloseReason::Unknown => error!(
                    lease_token = %lease_token,
                    host = %self.inner.options.host_name,
                    reason = %reason,
                    error = %failure,
                    "partition failed"
                ),
                CloseReason::LeaseLost | CloseReason::ResourceGone => warn!(
                    lease_token = %lease_token,
                    host = %self.inner.options.host_name,
                    reason = %reason,
                    error = %failure,
                    "partition stopped"
                ),
            }
            self.inner.failures.insert(lease_token.to_owned(), failure);
        }

        let lease = supervisor.lease().await;
        match reason {
            CloseReason::LeaseLost => {
                debug!(lease_token = %lease_token, "partition stopped after losing its lease");
            }
            CloseReason::ResourceGone => self.handle_split(lease).await,
            CloseReason::Shutdown | CloseReason::ObserverError | CloseReason::Unknown => {
                self.release(&lease).await
            }
        }
    }

    async fn release(&self, lease: &Lease) {
        match self.inner.lease_manager.release(lease).await {
            Ok(()) => {}
            Err(e) if e.is_lease_lost() => {
                debug!(lease_token = %lease.lease_token, "lease already taken over, nothing to release");
            }
            Err(e) => {
                warn!(lease_token = %lease.lease_token, error = %e, "failed to release lease");
            }
        }
    }

    async fn handle_split(&self, lease: Lease) {
        let children = match self.inner.synchronizer.split_partition(&lease).await {
            Ok(children) => children,
            Err(e) => {
                error!(
                    lease_token = %lease.lease_token,
                    error = %e,
                    "unable to resolve partition split, releasing lease"
                );
                self.release(&lease).await;
                return;
            }
        };

        for child in children {
            let child_token = child.lease_token.clone();
            if let Err(e) = self.add_or_update_lease(child).await {
                warn!(lease_token = %child_token, error = %e, "failed to take child lease");
            }
        }

        if let Err(e) = self.inner.lease_manager.delete(&lease).await {
            warn!(lease_token = %lease.lease_token, error = %e, "failed to delete split parent lease");
        }
    }

    /// Lease tokens of the partitions currently processed by this host.
    pub async fn active_lease_tokens(&self) -> Vec<String> {
        let supervisors = self.inner.supervisors.lock().await;
        let mut tokens: Vec<String> = supervisors.keys().cloned().collect();
        tokens.sort();
        tokens
    }

    pub async fn supervisor(&self, lease_token: &str) -> Option<Arc<PartitionSupervisor>> {
        let supervisors = self.inner.supervisors.lock().await;
        supervisors
            .get(lease_token)
            .map(|slot| slot.supervisor.clone())
    }

    /// The failure that ended the latest failed run of `lease_token` on this host.
    /// Kept after the partition restarts, until a later run fails again.
    pub fn last_failure(&self, lease_token: &str) -> Option<Arc<ProcessorError>> {
        self.inner
            .failures
            .get(lease_token)
            .map(|failure| failure.value().clone())
    }

    /// Stop every supervisor and wait until each one finished releasing,
    /// deleting or splitting its lease, including supervisors that had
    /// already stopped on their own.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        // an acquisition holding the lock either started its supervisor or
        // sees the cancellation
        let partitions = self.inner.supervisors.lock().await.len();

        info!(
            host = %self.inner.options.host_name,
            partitions,
            "stopping partition supervisors"
        );
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }
}
