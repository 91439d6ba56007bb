mod errors;
pub use errors::{FeedError, Result};

mod client;
pub use client::{
    ChangeFeedClient, ChangeFeedPage, ChangeFeedPages, ChangeFeedRequest, FeedPosition,
    PartitionKeyRange,
};

mod memory_feed;
pub use memory_feed::InMemoryChangeFeed;
