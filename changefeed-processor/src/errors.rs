use changefeed_core::feed::FeedError;
use changefeed_lease_store::LeaseStoreError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProcessorError>;

#[derive(Error, Debug)]
pub enum ProcessorError {
    /// Ownership of the lease moved to another host.
    #[error("Lease lost: {0}")]
    LeaseLost(String),

    #[error("Lease store error: {0}")]
    LeaseStore(LeaseStoreError),

    #[error("Failed to acquire lease {lease_token}: {source}")]
    AcquireFailed {
        lease_token: String,
        #[source]
        source: Arc<LeaseStoreError>,
    },

    #[error("Change feed error: {0}")]
    Feed(#[from] FeedError),

    /// The partition key range behind the lease was split or merged away.
    #[error("Partition gone: {0}")]
    PartitionGone(String),

    #[error("Observer error: {0}")]
    Observer(anyhow::Error),

    #[error("Lease store was not initialized within {0:?}")]
    BootstrapTimeout(Duration),

    #[error("Unable to resolve the ranges replacing partition {0}")]
    SplitUnresolved(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl From<LeaseStoreError> for ProcessorError {
    fn from(error: LeaseStoreError) -> Self {
        match error {
            LeaseStoreError::LeaseLost(lease_token) => ProcessorError::LeaseLost(lease_token),
            other => ProcessorError::LeaseStore(other),
        }
    }
}

impl ProcessorError {
    pub fn is_lease_lost(&self) -> bool {
        matches!(self, ProcessorError::LeaseLost(_))
    }
}
