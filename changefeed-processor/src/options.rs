use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{ProcessorError, Result};

/// When progress is written back into the lease.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointMode {
    /// Checkpoint after every page the observer processed successfully
    #[default]
    Automatic,
    /// Checkpoint only when the observer calls `ObserverContext::checkpoint`
    Manual,
}

/// Runtime options of a change feed processor host.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorOptions {
    /// Unique name of this host among the hosts sharing the lease store
    pub host_name: String,
    /// Path prefix of every lease store document of this processor
    pub lease_prefix: String,
    /// How often an owned lease is renewed
    pub lease_renew_interval: Duration,
    /// How often the load balancer looks for leases to take
    pub lease_acquire_interval: Duration,
    /// A lease not renewed for this long is considered abandoned
    pub lease_expiration_interval: Duration,
    /// Delay between two change feed queries once a partition is drained
    pub feed_poll_delay: Duration,
    pub max_items_per_page: usize,
    /// Start partitions without a continuation from the beginning instead of now
    pub start_from_beginning: bool,
    pub checkpoint_mode: CheckpointMode,
    /// Lower bound on leases per host for the default strategy, 0 disables it
    pub min_partition_count: usize,
    /// Upper bound on leases per host for the default strategy, 0 disables it
    pub max_partition_count: usize,
    pub initialization_lock_ttl: Duration,
    /// Wait between two checks while another host bootstraps the store
    pub bootstrap_retry_delay: Duration,
    /// Give up on bootstrap after this long
    pub bootstrap_timeout: Duration,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        ProcessorOptions {
            host_name: String::new(),
            lease_prefix: "/changefeed".to_owned(),
            lease_renew_interval: Duration::from_secs(17),
            lease_acquire_interval: Duration::from_secs(13),
            lease_expiration_interval: Duration::from_secs(60),
            feed_poll_delay: Duration::from_secs(5),
            max_items_per_page: 100,
            start_from_beginning: false,
            checkpoint_mode: CheckpointMode::Automatic,
            min_partition_count: 0,
            max_partition_count: 0,
            initialization_lock_ttl: Duration::from_secs(30),
            bootstrap_retry_delay: Duration::from_secs(1),
            bootstrap_timeout: Duration::from_secs(300),
        }
    }
}

impl ProcessorOptions {
    pub fn validate(&self) -> Result<()> {
        if self.host_name.trim().is_empty() {
            return Err(invalid("host_name must not be empty"));
        }
        if self.lease_prefix.trim_matches('/').is_empty() {
            return Err(invalid("lease_prefix must not be empty"));
        }

        let intervals = [
            ("lease_renew_interval", self.lease_renew_interval),
            ("lease_acquire_interval", self.lease_acquire_interval),
            ("lease_expiration_interval", self.lease_expiration_interval),
            ("feed_poll_delay", self.feed_poll_delay),
            ("initialization_lock_ttl", self.initialization_lock_ttl),
            ("bootstrap_retry_delay", self.bootstrap_retry_delay),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| value.is_zero()) {
            return Err(invalid(&format!("{} must be greater than zero", name)));
        }

        if self.lease_renew_interval >= self.lease_expiration_interval {
            return Err(invalid(
                "lease_renew_interval must be shorter than lease_expiration_interval",
            ));
        }
        if self.max_items_per_page == 0 {
            return Err(invalid("max_items_per_page must be greater than zero"));
        }
        if self.min_partition_count > 0
            && self.max_partition_count > 0
            && self.min_partition_count > self.max_partition_count
        {
            return Err(invalid(
                "min_partition_count must not exceed max_partition_count",
            ));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ProcessorError {
    ProcessorError::InvalidConfiguration(message.to_owned())
}

/// Processor settings as read from a configuration file. Intervals are in milliseconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessorConfiguration {
    pub host_name: String,
    pub lease_prefix: String,
    pub lease_renew_interval_ms: Option<u64>,
    pub lease_acquire_interval_ms: Option<u64>,
    pub lease_expiration_interval_ms: Option<u64>,
    pub feed_poll_delay_ms: Option<u64>,
    pub max_items_per_page: Option<usize>,
    #[serde(default)]
    pub start_from_beginning: bool,
    #[serde(default)]
    pub checkpoint_mode: CheckpointMode,
    pub min_partition_count: Option<usize>,
    pub max_partition_count: Option<usize>,
    pub initialization_lock_ttl_ms: Option<u64>,
    pub bootstrap_retry_delay_ms: Option<u64>,
    pub bootstrap_timeout_ms: Option<u64>,
}

impl TryFrom<ProcessorConfiguration> for ProcessorOptions {
    type Error = ProcessorError;

    fn try_from(config: ProcessorConfiguration) -> Result<Self> {
        let defaults = ProcessorOptions::default();
        let millis = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_millis).unwrap_or(default)
        };

        let options = ProcessorOptions {
            host_name: config.host_name,
            lease_prefix: config.lease_prefix,
            lease_renew_interval: millis(
                config.lease_renew_interval_ms,
                defaults.lease_renew_interval,
            ),
            lease_acquire_interval: millis(
                config.lease_acquire_interval_ms,
                defaults.lease_acquire_interval,
            ),
            lease_expiration_interval: millis(
                config.lease_expiration_interval_ms,
                defaults.lease_expiration_interval,
            ),
            feed_poll_delay: millis(config.feed_poll_delay_ms, defaults.feed_poll_delay),
            max_items_per_page: config
                .max_items_per_page
                .unwrap_or(defaults.max_items_per_page),
            start_from_beginning: config.start_from_beginning,
            checkpoint_mode: config.checkpoint_mode,
            min_partition_count: config.min_partition_count.unwrap_or(0),
            max_partition_count: config.max_partition_count.unwrap_or(0),
            initialization_lock_ttl: millis(
                config.initialization_lock_ttl_ms,
                defaults.initialization_lock_ttl,
            ),
            bootstrap_retry_delay: millis(
                config.bootstrap_retry_delay_ms,
                defaults.bootstrap_retry_delay,
            ),
            bootstrap_timeout: millis(config.bootstrap_timeout_ms, defaults.bootstrap_timeout),
        };

        options.validate()?;
        Ok(options)
    }
}
