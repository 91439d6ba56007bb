//! # Change Feed Load Balancer
//!
//! Decides which leases a host should try to take on each balancing pass.
//! The decision is advisory: the lease store's conditional writes settle every race.

mod strategy;
pub use strategy::PartitionLoadBalancingStrategy;

mod equal_partitions;
pub use equal_partitions::{EqualPartitionsBalancingStrategy, EqualPartitionsConfig};
