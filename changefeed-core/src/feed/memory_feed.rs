use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    client::{
        ChangeFeedClient, ChangeFeedPage, ChangeFeedPages, ChangeFeedRequest, FeedPosition,
        PartitionKeyRange,
    },
    errors::{FeedError, Result},
};

#[derive(Debug)]
struct RangeFeed {
    range: PartitionKeyRange,
    /// (lsn, document), ascending by lsn
    changes: Vec<(u64, Value)>,
    retired: bool,
}

#[derive(Debug, Default)]
struct FeedState {
    ranges: BTreeMap<String, RangeFeed>,
    last_lsn: u64,
}

/// InMemoryChangeFeed is a partitioned change log implementing ChangeFeedClient.
///
/// Sequence numbers are global across ranges and continuations are the decimal
/// lsn of the last consumed change, so a child range seeded with its parent's
/// continuation resumes exactly where the parent stopped.
/// SHOULD BE USED ONLY FOR TESTING AND SIMULATION PURPOSES
#[derive(Debug, Clone, Default)]
pub struct InMemoryChangeFeed {
    state: Arc<RwLock<FeedState>>,
    range_reads: Arc<AtomicUsize>,
    forced_range_reads: Arc<AtomicUsize>,
}

impl InMemoryChangeFeed {
    /// A feed with `count` ranges named `"0"`, `"1"`, ... splitting the key space evenly.
    pub fn with_ranges(count: usize) -> Self {
        let mut state = FeedState::default();
        let step = 256 / count.max(1);
        for i in 0..count {
            let min = if i == 0 {
                String::new()
            } else {
                format!("{:02X}", i * step)
            };
            let max = if i + 1 == count {
                "FF".to_owned()
            } else {
                format!("{:02X}", (i + 1) * step)
            };
            let id = i.to_string();
            state.ranges.insert(
                id.clone(),
                RangeFeed {
                    range: PartitionKeyRange::new(&id, &min, &max),
                    changes: Vec::new(),
                    retired: false,
                },
            );
        }

        InMemoryChangeFeed {
            state: Arc::new(RwLock::new(state)),
            ..Default::default()
        }
    }

    /// Append a document to a range, returning the lsn assigned to it.
    pub async fn append(&self, range_id: &str, document: Value) -> Result<u64> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let feed = state
            .ranges
            .get_mut(range_id)
            .ok_or_else(|| FeedError::NotFound(range_id.to_owned()))?;
        if feed.retired {
            return Err(FeedError::Gone(range_id.to_owned()));
        }
        state.last_lsn += 1;
        feed.changes.push((state.last_lsn, document));
        Ok(state.last_lsn)
    }

    /// Retire `parent_id` and replace it with one child range per id in `child_ids`.
    /// Changes already written to the parent are carried over to the first child.
    pub async fn split_range(
        &self,
        parent_id: &str,
        child_ids: &[&str],
    ) -> Result<Vec<PartitionKeyRange>> {
        if child_ids.is_empty() {
            return Err(FeedError::Service(format!(
                "split of {} needs at least one child",
                parent_id
            )));
        }

        let mut state = self.state.write().await;
        let parent = state
            .ranges
            .get_mut(parent_id)
            .ok_or_else(|| FeedError::NotFound(parent_id.to_owned()))?;
        if parent.retired {
            return Err(FeedError::Gone(parent_id.to_owned()));
        }
        parent.retired = true;

        let parent_range = parent.range.clone();
        let carried = parent.changes.clone();
        let mut lineage = parent_range.parents.clone();
        lineage.push(parent_id.to_owned());

        let mut children = Vec::with_capacity(child_ids.len());
        for (i, child_id) in child_ids.iter().enumerate() {
            let min = if i == 0 {
                parent_range.min_inclusive.clone()
            } else {
                format!("{}{}", parent_range.min_inclusive, i)
            };
            let max = if i + 1 == child_ids.len() {
                parent_range.max_exclusive.clone()
            } else {
                format!("{}{}", parent_range.min_inclusive, i + 1)
            };
            let mut range = PartitionKeyRange::new(child_id, &min, &max);
            range.parents = lineage.clone();

            let changes = if i == 0 { carried.clone() } else { Vec::new() };
            state.ranges.insert(
                child_id.to_string(),
                RangeFeed {
                    range: range.clone(),
                    changes,
                    retired: false,
                },
            );
            children.push(range);
        }

        debug!(parent = %parent_id, children = ?child_ids, "partition key range split");
        Ok(children)
    }

    /// Ids of the ranges that are currently readable.
    pub async fn active_range_ids(&self) -> Vec<String> {
        let state = self.state.read().await;
        state
            .ranges
            .values()
            .filter(|feed| !feed.retired)
            .map(|feed| feed.range.id.clone())
            .collect()
    }

    /// How many times the range list was read, and how many of those were forced refreshes.
    pub fn range_reads(&self) -> (usize, usize) {
        (
            self.range_reads.load(Ordering::Acquire),
            self.forced_range_reads.load(Ordering::Acquire),
        )
    }

    /// Read the next page after `cursor`. `None` once the range is drained.
    async fn next_page(
        &self,
        lease_token: &str,
        cursor: u64,
        max_item_count: usize,
    ) -> Result<Option<ChangeFeedPage>> {
        let state = self.state.read().await;
        let feed = state
            .ranges
            .get(lease_token)
            .ok_or_else(|| FeedError::NotFound(lease_token.to_owned()))?;
        if feed.retired {
            return Err(FeedError::Gone(lease_token.to_owned()));
        }

        let page: Vec<&(u64, Value)> = feed
            .changes
            .iter()
            .filter(|(lsn, _)| *lsn > cursor)
            .take(max_item_count.max(1))
            .collect();

        match page.last() {
            Some((last_lsn, _)) => Ok(Some(ChangeFeedPage {
                documents: page.iter().map(|(_, doc)| doc.clone()).collect(),
                continuation: last_lsn.to_string(),
            })),
            None => Ok(None),
        }
    }
}

fn parse_continuation(continuation: &str) -> Result<u64> {
    continuation
        .parse::<u64>()
        .map_err(|_| FeedError::Service(format!("malformed continuation: {:?}", continuation)))
}

enum QueryState {
    Start(ChangeFeedRequest),
    Reading {
        request: ChangeFeedRequest,
        cursor: u64,
    },
    Done,
}

#[async_trait]
impl ChangeFeedClient for InMemoryChangeFeed {
    async fn read_partition_key_ranges(
        &self,
        force_refresh: bool,
    ) -> Result<Vec<PartitionKeyRange>> {
        self.range_reads.fetch_add(1, Ordering::AcqRel);
        if force_refresh {
            self.forced_range_reads.fetch_add(1, Ordering::AcqRel);
        }

        let state = self.state.read().await;
        Ok(state
            .ranges
            .values()
            .filter(|feed| !feed.retired)
            .map(|feed| feed.range.clone())
            .collect())
    }

    fn query_change_feed(&self, request: ChangeFeedRequest) -> ChangeFeedPages {
        let feed = self.clone();
        let stream = futures::stream::unfold(QueryState::Start(request), move |query| {
            let feed = feed.clone();
            async move {
                let (request, cursor) = match query {
                    QueryState::Done => return None,
                    QueryState::Reading { request, cursor } => (request, cursor),
                    QueryState::Start(request) => match request.continuation.as_deref() {
                        Some(continuation) => match parse_continuation(continuation) {
                            Ok(cursor) => (request, cursor),
                            Err(e) => return Some((Err(e), QueryState::Done)),
                        },
                        None if request.start_from_beginning => (request, 0),
                        None => {
                            // Starting from now: hand back the current position so the
                            // caller has a continuation to resume from.
                            let now = feed.state.read().await.last_lsn;
                            let page = ChangeFeedPage {
                                documents: Vec::new(),
                                continuation: now.to_string(),
                            };
                            return Some((Ok(page), QueryState::Done));
                        }
                    },
                };

                match feed
                    .next_page(&request.lease_token, cursor, request.max_item_count)
                    .await
                {
                    Ok(Some(page)) => {
                        let next_cursor = page.continuation.parse::<u64>().unwrap_or(cursor);
                        Some((
                            Ok(page),
                            QueryState::Reading {
                                request,
                                cursor: next_cursor,
                            },
                        ))
                    }
                    Ok(None) => None,
                    Err(e) => Some((Err(e), QueryState::Done)),
                }
            }
        });

        ChangeFeedPages::new(stream)
    }

    async fn read_feed_position(
        &self,
        lease_token: &str,
        continuation: Option<&str>,
    ) -> Result<FeedPosition> {
        let cursor = continuation.map(parse_continuation).transpose()?.unwrap_or(0);

        let state = self.state.read().await;
        let feed = state
            .ranges
            .get(lease_token)
            .ok_or_else(|| FeedError::NotFound(lease_token.to_owned()))?;
        if feed.retired {
            return Err(FeedError::Gone(lease_token.to_owned()));
        }

        Ok(FeedPosition {
            latest_lsn: feed.changes.last().map(|(lsn, _)| *lsn).unwrap_or(0),
            first_pending_lsn: feed
                .changes
                .iter()
                .find(|(lsn, _)| *lsn > cursor)
                .map(|(lsn, _)| *lsn),
        })
    }
}
