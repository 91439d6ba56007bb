use changefeed_core::feed::InMemoryChangeFeed;
use rand::seq::SliceRandom;
use serde_json::json;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Appends documents to random partitions until cancelled. The task returns
/// how many documents were written.
pub(crate) fn start_producer(
    feed: InMemoryChangeFeed,
    documents_per_second: u64,
    cancel: CancellationToken,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        if documents_per_second == 0 {
            cancel.cancelled().await;
            return 0;
        }

        let mut ticker =
            tokio::time::interval(Duration::from_micros(1_000_000 / documents_per_second));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut written = 0u64;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let ranges = feed.active_range_ids().await;
                    let target = ranges.choose(&mut rand::thread_rng()).cloned();
                    let Some(range) = target else { continue };

                    let document = json!({ "id": written, "range": range });
                    match feed.append(&range, document).await {
                        Ok(_) => written += 1,
                        // the range was split since it was listed
                        Err(e) => debug!(range = %range, error = %e, "append skipped"),
                    }
                }
            }
        }

        info!(written, "producer stopped");
        written
    })
}
