use thiserror::Error;

pub type Result<T> = std::result::Result<T, FeedError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// The partition or routing information is not available (yet).
    #[error("Not found: {0}")]
    NotFound(String),

    /// The partition key range was retired by a split or merge.
    #[error("Partition key range gone: {0}")]
    Gone(String),

    #[error("Change feed service error: {0}")]
    Service(String),
}

impl FeedError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FeedError::NotFound(_))
    }

    pub fn is_gone(&self) -> bool {
        matches!(self, FeedError::Gone(_))
    }
}
