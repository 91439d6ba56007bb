use changefeed_core::Lease;

/// Chooses, from a snapshot of every lease, the ones this host should try to acquire.
///
/// Implementations should bound how many leases one pass returns and must not
/// assume a returned lease is still acquirable. They may rewrite `properties`
/// on the returned copies.
pub trait PartitionLoadBalancingStrategy: Send + Sync {
    fn select_leases_to_take(&self, all_leases: &[Lease]) -> Vec<Lease>;
}
