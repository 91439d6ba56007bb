use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Document already exists: {0}")]
    Conflict(String),

    #[error("Precondition failed, etag mismatch for: {0}")]
    PreconditionFailed(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Storage backend error: {0}")]
    Backend(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error occurred: {0}")]
    Unknown(String),
}
