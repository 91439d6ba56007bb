use anyhow::anyhow;
use changefeed_core::feed::{ChangeFeedClient, ChangeFeedRequest, FeedError};
use futures::{FutureExt, StreamExt};
use metrics::counter;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::checkpointer::PartitionCheckpointer;
use crate::errors::{ProcessorError, Result};
use crate::lease_state::LeaseState;
use crate::observer::{ChangeFeedObserver, ObserverContext};
use crate::options::{CheckpointMode, ProcessorOptions};
use crate::processor_metrics::DOCUMENTS_PROCESSED_TOTAL;

/// Pulls the partition's change feed and hands every page to the observer.
pub(crate) struct FeedReader {
    lease_token: String,
    feed: Arc<dyn ChangeFeedClient>,
    state: Arc<LeaseState>,
    checkpointer: Arc<PartitionCheckpointer>,
    options: Arc<ProcessorOptions>,
}

impl FeedReader {
    pub(crate) fn new(
        lease_token: &str,
        feed: Arc<dyn ChangeFeedClient>,
        state: Arc<LeaseState>,
        checkpointer: Arc<PartitionCheckpointer>,
        options: Arc<ProcessorOptions>,
    ) -> Self {
        FeedReader {
            lease_token: lease_token.to_owned(),
            feed,
            state,
            checkpointer,
            options,
        }
    }

    /// Runs until the partition stops. Returns an error for every condition
    /// that ends the partition: a gone range, a feed failure, an observer
    /// failure or a lost lease.
    pub(crate) async fn run(&self, observer: &mut Box<dyn ChangeFeedObserver>) -> Result<()> {
        let stop = self.state.stop_token().clone();
        let mut continuation = self.state.snapshot().await.continuation_token;

        loop {
            if stop.is_cancelled() {
                return Ok(());
            }

            match self.drain(observer, &mut continuation).await {
                Ok(()) => {}
                Err(ProcessorError::Feed(e)) if e.is_not_found() => {
                    debug!(lease_token = %self.lease_token, error = %e, "no changes available yet");
                }
                Err(e) => {
                    stop.cancel();
                    return Err(e);
                }
            }

            tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.options.feed_poll_delay) => {}
            }
        }
    }

    /// Reads every page available after `continuation`, advancing it page by page.
    async fn drain(
        &self,
        observer: &mut Box<dyn ChangeFeedObserver>,
        continuation: &mut Option<String>,
    ) -> Result<()> {
        let stop = self.state.stop_token().clone();
        let mut pages = self.feed.query_change_feed(ChangeFeedRequest {
            lease_token: self.lease_token.clone(),
            continuation: continuation.clone(),
            start_from_beginning: self.options.start_from_beginning,
            max_item_count: self.options.max_items_per_page,
        });

        loop {
            let page = tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                page = pages.next() => page,
            };
            let page = match page {
                Some(Ok(page)) => page,
                Some(Err(FeedError::Gone(_))) => {
                    return Err(ProcessorError::PartitionGone(self.lease_token.clone()))
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(()),
            };

            if page.documents.is_empty() {
                trace!(lease_token = %self.lease_token, "empty page");
                *continuation = Some(page.continuation);
                continue;
            }

            let count = page.documents.len() as u64;
            let context = ObserverContext::new(
                &self.lease_token,
                &self.options.host_name,
                Some(page.continuation.clone()),
                self.checkpointer.clone(),
            );

            match AssertUnwindSafe(observer.process_changes(&context, page.documents))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {
                    counter!(DOCUMENTS_PROCESSED_TOTAL.name, "host" => self.options.host_name.clone())
                        .increment(count);
                }
                Ok(Err(e)) => return Err(ProcessorError::Observer(e)),
                Err(panic) => {
                    return Err(ProcessorError::Observer(anyhow!(
                        "observer panicked: {}",
                        panic_message(panic.as_ref())
                    )))
                }
            }

            if self.state.is_lost() {
                return Err(ProcessorError::LeaseLost(self.lease_token.clone()));
            }

            if self.options.checkpoint_mode == CheckpointMode::Automatic {
                self.checkpointer
                    .checkpoint_partition(&page.continuation)
                    .await?;
            }
            *continuation = Some(page.continuation);
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
