use changefeed_core::feed::ChangeFeedClient;
use changefeed_core::store::DocumentStore;
use changefeed_lease_store::{
    DocumentLeaseStoreManager, LeaseStoreManager, LeaseStoreManagerSettings,
    RequestOptionsFactory, SinglePartitionRequestOptionsFactory,
};
use changefeed_load_balancer::{
    EqualPartitionsBalancingStrategy, EqualPartitionsConfig, PartitionLoadBalancingStrategy,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::bootstrapper::Bootstrapper;
use crate::errors::{ProcessorError, Result};
use crate::health_monitor::{HealthMonitor, TraceHealthMonitor};
use crate::key_range_cache::PartitionKeyRangeCache;
use crate::load_balancer::PartitionLoadBalancer;
use crate::observer::ChangeFeedObserverFactory;
use crate::options::ProcessorOptions;
use crate::partition_controller::PartitionController;
use crate::partition_synchronizer::PartitionSynchronizer;
use crate::remaining_work::RemainingWorkEstimator;

enum RunState {
    Created,
    Running {
        cancel: CancellationToken,
        balancer: JoinHandle<()>,
    },
    Stopped,
}

/// PartitionManager is one change feed processor host.
///
/// `start` bootstraps the lease store, resumes the leases this host still owns
/// and starts the balancing loop. `stop` ends the loop and every partition,
/// releasing their leases. A stopped manager cannot be started again.
pub struct PartitionManager {
    options: Arc<ProcessorOptions>,
    bootstrapper: Bootstrapper,
    controller: PartitionController,
    load_balancer: Arc<PartitionLoadBalancer>,
    estimator: RemainingWorkEstimator,
    state: Mutex<RunState>,
}

impl PartitionManager {
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        match *state {
            RunState::Created => {}
            RunState::Running { .. } => {
                return Err(ProcessorError::InvalidState("processor already started".into()))
            }
            RunState::Stopped => {
                return Err(ProcessorError::InvalidState("processor was stopped".into()))
            }
        }

        info!(host = %self.options.host_name, prefix = %self.options.lease_prefix, "starting change feed processor");
        self.bootstrapper.initialize().await?;
        self.controller.initialize().await?;

        let cancel = CancellationToken::new();
        let balancer = self.load_balancer.clone().start_with_cancel(cancel.clone());
        *state = RunState::Running { cancel, balancer };
        Ok(())
    }

    pub async fn stop(&self) {
        let previous = {
            let mut state = self.state.lock().await;
            std::mem::replace(&mut *state, RunState::Stopped)
        };

        if let RunState::Running { cancel, balancer } = previous {
            cancel.cancel();
            if let Err(e) = balancer.await {
                error!(error = %e, "load balancer task failed");
            }
        }
        self.controller.shutdown().await;
        info!(host = %self.options.host_name, "change feed processor stopped");
    }

    pub fn host_name(&self) -> &str {
        &self.options.host_name
    }

    pub fn controller(&self) -> &PartitionController {
        &self.controller
    }

    pub fn load_balancer(&self) -> &PartitionLoadBalancer {
        &self.load_balancer
    }

    pub fn remaining_work_estimator(&self) -> &RemainingWorkEstimator {
        &self.estimator
    }
}

/// Wires a [`PartitionManager`] from options and extension points.
///
/// A feed client and an observer factory are required, and so is either a lease
/// document store or a ready-made lease store manager.
#[derive(Default)]
pub struct ChangeFeedProcessorBuilder {
    options: ProcessorOptions,
    feed: Option<Arc<dyn ChangeFeedClient>>,
    lease_documents: Option<Arc<dyn DocumentStore>>,
    lease_store_manager: Option<Arc<dyn LeaseStoreManager>>,
    request_options_factory: Option<Arc<dyn RequestOptionsFactory>>,
    observer_factory: Option<Arc<dyn ChangeFeedObserverFactory>>,
    strategy: Option<Arc<dyn PartitionLoadBalancingStrategy>>,
    health_monitor: Option<Arc<dyn HealthMonitor>>,
}

impl ChangeFeedProcessorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(mut self, options: ProcessorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_host_name(mut self, host_name: &str) -> Self {
        self.options.host_name = host_name.to_owned();
        self
    }

    pub fn with_feed_client(mut self, feed: Arc<dyn ChangeFeedClient>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Keep leases as documents in `store`.
    pub fn with_lease_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.lease_documents = Some(store);
        self
    }

    /// Use a custom lease store manager instead of the document-backed one.
    pub fn with_lease_store_manager(mut self, manager: Arc<dyn LeaseStoreManager>) -> Self {
        self.lease_store_manager = Some(manager);
        self
    }

    pub fn with_request_options_factory(mut self, factory: Arc<dyn RequestOptionsFactory>) -> Self {
        self.request_options_factory = Some(factory);
        self
    }

    pub fn with_observer_factory(mut self, factory: Arc<dyn ChangeFeedObserverFactory>) -> Self {
        self.observer_factory = Some(factory);
        self
    }

    pub fn with_load_balancing_strategy(
        mut self,
        strategy: Arc<dyn PartitionLoadBalancingStrategy>,
    ) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_health_monitor(mut self, monitor: Arc<dyn HealthMonitor>) -> Self {
        self.health_monitor = Some(monitor);
        self
    }

    pub fn build(self) -> Result<PartitionManager> {
        self.options.validate()?;
        let options = Arc::new(self.options);

        let feed = self
            .feed
            .ok_or_else(|| missing("a change feed client"))?;
        let observer_factory = self
            .observer_factory
            .ok_or_else(|| missing("an observer factory"))?;

        let lease_store: Arc<dyn LeaseStoreManager> = match (self.lease_store_manager, self.lease_documents) {
            (Some(manager), _) => {
                if manager.host_name() != options.host_name {
                    return Err(ProcessorError::InvalidConfiguration(format!(
                        "lease store manager acts for host {:?}, processor host is {:?}",
                        manager.host_name(),
                        options.host_name
                    )));
                }
                manager
            }
            (None, Some(documents)) => Arc::new(DocumentLeaseStoreManager::new(
                LeaseStoreManagerSettings::new(&options.lease_prefix, &options.host_name),
                documents,
                self.request_options_factory
                    .unwrap_or_else(|| Arc::new(SinglePartitionRequestOptionsFactory)),
            )),
            (None, None) => return Err(missing("a lease store")),
        };

        let strategy = self.strategy.unwrap_or_else(|| {
            Arc::new(EqualPartitionsBalancingStrategy::new(
                EqualPartitionsConfig::new(&options.host_name, options.lease_expiration_interval)
                    .with_partition_bounds(options.min_partition_count, options.max_partition_count),
            ))
        });
        let health_monitor = self
            .health_monitor
            .unwrap_or_else(|| Arc::new(TraceHealthMonitor));

        let key_ranges = Arc::new(PartitionKeyRangeCache::new(feed.clone()));
        let synchronizer = Arc::new(PartitionSynchronizer::new(lease_store.clone(), key_ranges));
        let bootstrapper = Bootstrapper::new(
            synchronizer.clone(),
            lease_store.clone(),
            options.initialization_lock_ttl,
            options.bootstrap_retry_delay,
            options.bootstrap_timeout,
        );
        let controller = PartitionController::new(
            lease_store.clone(),
            feed.clone(),
            observer_factory,
            synchronizer,
            health_monitor,
            options.clone(),
        );
        let load_balancer = Arc::new(PartitionLoadBalancer::new(
            controller.clone(),
            lease_store.clone(),
            strategy,
            options.lease_acquire_interval,
        ));
        let estimator = RemainingWorkEstimator::new(lease_store, feed);

        Ok(PartitionManager {
            options,
            bootstrapper,
            controller,
            load_balancer,
            estimator,
            state: Mutex::new(RunState::Created),
        })
    }
}

fn missing(what: &str) -> ProcessorError {
    ProcessorError::InvalidConfiguration(format!("{} is required", what))
}
