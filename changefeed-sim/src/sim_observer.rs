use async_trait::async_trait;
use changefeed_processor::{
    ChangeFeedObserver, ChangeFeedObserverFactory, CloseReason, ObserverContext,
};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Creates observers that count what their host processed.
#[derive(Clone, Default)]
pub(crate) struct CountingObserverFactory {
    processed: Arc<AtomicU64>,
}

impl CountingObserverFactory {
    pub(crate) fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }
}

impl ChangeFeedObserverFactory for CountingObserverFactory {
    fn create_observer(&self) -> Box<dyn ChangeFeedObserver> {
        Box::new(CountingObserver {
            processed: self.processed.clone(),
        })
    }
}

struct CountingObserver {
    processed: Arc<AtomicU64>,
}

#[async_trait]
impl ChangeFeedObserver for CountingObserver {
    async fn open(&mut self, context: &ObserverContext) -> anyhow::Result<()> {
        info!(
            host = %context.host_name(),
            lease_token = %context.lease_token(),
            "observer opened"
        );
        Ok(())
    }

    async fn process_changes(
        &mut self,
        context: &ObserverContext,
        documents: Vec<Value>,
    ) -> anyhow::Result<()> {
        debug!(
            host = %context.host_name(),
            lease_token = %context.lease_token(),
            documents = documents.len(),
            continuation = ?context.continuation_token(),
            "processing changes"
        );
        self.processed
            .fetch_add(documents.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&mut self, context: &ObserverContext, reason: CloseReason) -> anyhow::Result<()> {
        info!(
            host = %context.host_name(),
            lease_token = %context.lease_token(),
            reason = %reason,
            "observer closed"
        );
        Ok(())
    }
}
