use changefeed_core::feed::{ChangeFeedClient, PartitionKeyRange};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::errors::Result;

/// Caches the partition key ranges of the monitored collection.
///
/// A forced refresh always refetches the complete list and replaces the cache;
/// the previous list is never merged into the new one.
pub struct PartitionKeyRangeCache {
    feed: Arc<dyn ChangeFeedClient>,
    ranges: RwLock<Option<Arc<Vec<PartitionKeyRange>>>>,
}

impl PartitionKeyRangeCache {
    pub fn new(feed: Arc<dyn ChangeFeedClient>) -> Self {
        PartitionKeyRangeCache {
            feed,
            ranges: RwLock::new(None),
        }
    }

    pub async fn get_ranges(&self, force_refresh: bool) -> Result<Arc<Vec<PartitionKeyRange>>> {
        if !force_refresh {
            if let Some(ranges) = self.ranges.read().await.as_ref() {
                return Ok(ranges.clone());
            }
        }

        let mut cached = self.ranges.write().await;
        let fresh = Arc::new(self.feed.read_partition_key_ranges(force_refresh).await?);
        debug!(ranges = fresh.len(), force_refresh, "partition key ranges refreshed");
        *cached = Some(fresh.clone());
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use changefeed_core::feed::InMemoryChangeFeed;

    #[tokio::test]
    async fn serves_cached_ranges_until_forced() {
        let feed = InMemoryChangeFeed::with_ranges(2);
        let cache = PartitionKeyRangeCache::new(Arc::new(feed.clone()));

        assert_eq!(cache.get_ranges(false).await.unwrap().len(), 2);
        assert_eq!(cache.get_ranges(false).await.unwrap().len(), 2);
        assert_eq!(feed.range_reads(), (1, 0));

        feed.split_range("1", &["2", "3"]).await.unwrap();
        assert_eq!(cache.get_ranges(false).await.unwrap().len(), 2);

        let ranges = cache.get_ranges(true).await.unwrap();
        let ids: Vec<&str> = ranges.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["0", "2", "3"]);
        assert_eq!(feed.range_reads(), (2, 1));

        // The refreshed list replaced the cache wholesale.
        assert_eq!(cache.get_ranges(false).await.unwrap().len(), 3);
        assert_eq!(feed.range_reads(), (2, 1));
    }
}
