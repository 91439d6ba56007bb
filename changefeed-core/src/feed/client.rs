use async_trait::async_trait;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::errors::Result;

/// A sub-range of the monitored collection's key space, the unit of change feed parallelism.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionKeyRange {
    pub id: String,
    pub min_inclusive: String,
    pub max_exclusive: String,
    /// Ids of the ranges this one was split (or merged) from
    #[serde(default)]
    pub parents: Vec<String>,
}

impl PartitionKeyRange {
    pub fn new(id: &str, min_inclusive: &str, max_exclusive: &str) -> Self {
        PartitionKeyRange {
            id: id.to_owned(),
            min_inclusive: min_inclusive.to_owned(),
            max_exclusive: max_exclusive.to_owned(),
            parents: Vec::new(),
        }
    }
}

/// Query for the changes of one partition, starting after `continuation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFeedRequest {
    pub lease_token: String,
    pub continuation: Option<String>,
    /// Only consulted when `continuation` is `None`: read from the beginning of
    /// the partition instead of from now.
    pub start_from_beginning: bool,
    pub max_item_count: usize,
}

/// One page of changes and the continuation that resumes right after it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeFeedPage {
    pub documents: Vec<Value>,
    pub continuation: String,
}

/// High-watermark of a partition relative to a continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedPosition {
    /// Latest sequence number written to the partition
    pub latest_lsn: u64,
    /// First sequence number after the continuation not consumed yet, if any
    pub first_pending_lsn: Option<u64>,
}

impl FeedPosition {
    pub fn remaining(&self) -> u64 {
        match self.first_pending_lsn {
            Some(first) if first <= self.latest_lsn => self.latest_lsn - first + 1,
            _ => 0,
        }
    }
}

/// The change feed collaborator. Transient failures are expected to be retried
/// inside the implementation; what surfaces here is final.
#[async_trait]
pub trait ChangeFeedClient: Send + Sync + 'static {
    /// Enumerate the current partition key ranges of the monitored collection.
    /// `force_refresh` bypasses any routing cache the client keeps.
    async fn read_partition_key_ranges(&self, force_refresh: bool)
        -> Result<Vec<PartitionKeyRange>>;

    /// Open a change feed query. The returned stream is finite: it ends once the
    /// partition is drained. Issue a new query with the last continuation to resume.
    fn query_change_feed(&self, request: ChangeFeedRequest) -> ChangeFeedPages;

    /// Read the partition's high-watermark relative to `continuation`.
    async fn read_feed_position(
        &self,
        lease_token: &str,
        continuation: Option<&str>,
    ) -> Result<FeedPosition>;
}

/// Finite stream of change feed pages.
pub struct ChangeFeedPages {
    inner: Pin<Box<dyn Stream<Item = Result<ChangeFeedPage>> + Send>>,
}

impl Stream for ChangeFeedPages {
    type Item = Result<ChangeFeedPage>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl ChangeFeedPages {
    pub fn new(stream: impl Stream<Item = Result<ChangeFeedPage>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(stream),
        }
    }
}

impl std::fmt::Debug for ChangeFeedPages {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeedPages").finish_non_exhaustive()
    }
}
