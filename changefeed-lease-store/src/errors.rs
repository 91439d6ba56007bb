use changefeed_core::store::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LeaseStoreError>;

#[derive(Error, Debug)]
pub enum LeaseStoreError {
    /// Another host mutated the lease first, or this host is no longer its owner.
    #[error("Lease lost: {0}")]
    LeaseLost(String),

    #[error("Invalid lease: {0}")]
    InvalidLease(String),

    #[error("Lease store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LeaseStoreError {
    pub fn is_lease_lost(&self) -> bool {
        matches!(self, LeaseStoreError::LeaseLost(_))
    }
}
