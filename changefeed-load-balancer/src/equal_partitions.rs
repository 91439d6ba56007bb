use changefeed_core::utils::now_ms;
use changefeed_core::Lease;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::strategy::PartitionLoadBalancingStrategy;

/// Configuration for [`EqualPartitionsBalancingStrategy`].
#[derive(Debug, Clone)]
pub struct EqualPartitionsConfig {
    /// Host the strategy decides for
    pub host_name: String,
    /// Lower bound on the per-host target, ignored when 0
    pub min_partition_count: usize,
    /// Upper bound on the per-host target, ignored when 0
    pub max_partition_count: usize,
    /// A lease not renewed for longer than this is up for grabs
    pub lease_expiration_interval: Duration,
    /// Stamped onto every lease this host selects
    pub host_properties: HashMap<String, String>,
}

impl EqualPartitionsConfig {
    pub fn new(host_name: &str, lease_expiration_interval: Duration) -> Self {
        EqualPartitionsConfig {
            host_name: host_name.to_owned(),
            min_partition_count: 0,
            max_partition_count: 0,
            lease_expiration_interval,
            host_properties: HashMap::new(),
        }
    }

    pub fn with_partition_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_partition_count = min;
        self.max_partition_count = max;
        self
    }

    pub fn with_host_property(mut self, key: &str, value: &str) -> Self {
        self.host_properties.insert(key.to_owned(), value.to_owned());
        self
    }
}

/// Spreads leases evenly across the hosts that currently hold live leases.
///
/// Free leases (unowned or expired) are taken first, up to this host's share.
/// When none are free, a host below its share steals a single lease per pass
/// from the most loaded peer, which keeps ownership from oscillating.
#[derive(Debug, Clone)]
pub struct EqualPartitionsBalancingStrategy {
    config: EqualPartitionsConfig,
}

impl EqualPartitionsBalancingStrategy {
    pub fn new(config: EqualPartitionsConfig) -> Self {
        EqualPartitionsBalancingStrategy { config }
    }

    /// Same as `select_leases_to_take`, evaluated at `now_ms`.
    pub fn select_leases_at(&self, all_leases: &[Lease], now_ms: u64) -> Vec<Lease> {
        let host = self.config.host_name.as_str();
        let expiration = self.config.lease_expiration_interval;

        let mut workers: HashMap<&str, Vec<&Lease>> = HashMap::new();
        workers.insert(host, Vec::new());
        let mut free: Vec<&Lease> = Vec::new();

        for lease in all_leases {
            match lease.owner() {
                Some(owner) if !lease.is_expired(now_ms, expiration) => {
                    workers.entry(owner).or_default().push(lease);
                }
                _ => free.push(lease),
            }
        }

        let target = self.target_count(all_leases.len(), workers.len());
        let owned = workers.get(host).map(Vec::len).unwrap_or(0);
        if owned >= target {
            return Vec::new();
        }
        let needed = target - owned;

        let mut rng = rand::thread_rng();
        let selected: Vec<Lease> = if !free.is_empty() {
            free.shuffle(&mut rng);
            free.into_iter().take(needed).cloned().collect()
        } else {
            let busiest = workers
                .iter()
                .filter(|(owner, _)| **owner != host)
                .max_by_key(|(_, leases)| leases.len());

            match busiest {
                Some((peer, leases))
                    if leases.len() > target || (needed > 1 && leases.len() >= target) =>
                {
                    let stolen = leases.choose(&mut rng).map(|lease| (*lease).clone());
                    if let Some(lease) = &stolen {
                        info!(
                            lease_token = %lease.lease_token,
                            host = %host,
                            peer = %peer,
                            peer_leases = leases.len(),
                            target,
                            "stealing lease from overloaded peer"
                        );
                    }
                    stolen.into_iter().collect()
                }
                _ => Vec::new(),
            }
        };

        debug!(
            host = %host,
            leases = all_leases.len(),
            workers = workers.len(),
            target,
            owned,
            selected = selected.len(),
            "balancing pass"
        );

        selected
            .into_iter()
            .map(|mut lease| {
                lease.properties.extend(
                    self.config
                        .host_properties
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone())),
                );
                lease
            })
            .collect()
    }

    fn target_count(&self, lease_count: usize, worker_count: usize) -> usize {
        let mut target = lease_count.div_ceil(worker_count.max(1));
        if self.config.min_partition_count > 0 {
            target = target.max(self.config.min_partition_count);
        }
        if self.config.max_partition_count > 0 {
            target = target.min(self.config.max_partition_count);
        }
        target
    }
}

impl PartitionLoadBalancingStrategy for EqualPartitionsBalancingStrategy {
    fn select_leases_to_take(&self, all_leases: &[Lease]) -> Vec<Lease> {
        self.select_leases_at(all_leases, now_ms())
    }
}
