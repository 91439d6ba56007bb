use async_trait::async_trait;
use futures::stream::Stream;
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use super::errors::Result;

/// A document together with the etag the store assigned to its current version.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedDocument {
    pub key: String,
    pub value: Value,
    pub etag: String,
}

/// Backend-agnostic options attached to every store request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Partition key the document is routed to, for partitioned backends.
    pub partition_key: Option<String>,
    /// Time-to-live of a created document. The document reads as absent once it elapses.
    pub ttl: Option<Duration>,
}

impl RequestOptions {
    pub fn with_partition_key(mut self, partition_key: impl Into<String>) -> Self {
        self.partition_key = Some(partition_key.into());
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// The contract the coordinator needs from the lease store: reads and conditional
/// writes keyed by an opaque etag. Every successful write produces a new etag.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Read one document, `None` when absent.
    async fn read(&self, key: &str, options: &RequestOptions) -> Result<Option<VersionedDocument>>;

    /// Stream every document whose key starts with `prefix`.
    /// Each call starts a fresh query over the current contents.
    async fn query_prefix(&self, prefix: &str, options: &RequestOptions) -> Result<DocumentStream>;

    /// Create a document. Fails with `StoreError::Conflict` if it already exists.
    async fn create(
        &self,
        key: &str,
        value: Value,
        options: &RequestOptions,
    ) -> Result<VersionedDocument>;

    /// Replace a document only if its current etag equals `if_match`.
    /// Fails with `StoreError::PreconditionFailed` on mismatch and
    /// `StoreError::NotFound` when the document is absent.
    async fn replace(
        &self,
        key: &str,
        value: Value,
        if_match: &str,
        options: &RequestOptions,
    ) -> Result<VersionedDocument>;

    /// Delete a document, conditionally on `if_match` when provided.
    async fn delete(&self, key: &str, if_match: Option<&str>, options: &RequestOptions)
        -> Result<()>;
}

/// Finite stream of documents produced by a prefix query.
pub struct DocumentStream {
    inner: Pin<Box<dyn Stream<Item = Result<VersionedDocument>> + Send>>,
}

impl Stream for DocumentStream {
    type Item = Result<VersionedDocument>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl DocumentStream {
    pub fn new(stream: impl Stream<Item = Result<VersionedDocument>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// Stream over an already materialized page of documents.
    pub fn from_documents(documents: Vec<VersionedDocument>) -> Self {
        Self::new(futures::stream::iter(documents.into_iter().map(Ok)))
    }
}

impl std::fmt::Debug for DocumentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStream").finish_non_exhaustive()
    }
}
