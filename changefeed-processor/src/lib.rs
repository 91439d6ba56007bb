//! # Change Feed Processor
//!
//! Lets any number of hosts share the partitions of a change feed. Ownership of
//! each partition is a lease document; hosts take, renew and checkpoint leases
//! with conditional writes, so the lease store alone decides who owns what.
//!
//! - [`Bootstrapper`] seeds one lease per partition key range, once per deployment
//! - [`PartitionLoadBalancer`] periodically selects leases to take through a
//!   [`PartitionLoadBalancingStrategy`](changefeed_load_balancer::PartitionLoadBalancingStrategy)
//! - [`PartitionController`] acquires them and runs one [`PartitionSupervisor`] each
//! - a supervisor renews its lease, feeds changes to a [`ChangeFeedObserver`] and
//!   checkpoints progress

mod errors;
pub use errors::{ProcessorError, Result};

mod options;
pub use options::{CheckpointMode, ProcessorConfiguration, ProcessorOptions};

pub mod processor_metrics;

mod observer;
pub use observer::{ChangeFeedObserver, ChangeFeedObserverFactory, CloseReason, ObserverContext};

mod lease_state;

mod checkpointer;
pub use checkpointer::PartitionCheckpointer;

mod partition_supervisor;
pub use partition_supervisor::PartitionSupervisor;

mod key_range_cache;
pub use key_range_cache::PartitionKeyRangeCache;

mod partition_synchronizer;
pub use partition_synchronizer::PartitionSynchronizer;

mod bootstrapper;
pub use bootstrapper::Bootstrapper;

mod health_monitor;
pub use health_monitor::{
    HealthMonitor, HealthMonitoringRecord, HealthSeverity, MonitoredOperation, TraceHealthMonitor,
};

mod partition_controller;
pub use partition_controller::PartitionController;

mod load_balancer;
pub use load_balancer::PartitionLoadBalancer;

mod remaining_work;
pub use remaining_work::{RemainingPartitionWork, RemainingWorkEstimator};

mod partition_manager;
pub use partition_manager::{ChangeFeedProcessorBuilder, PartitionManager};
