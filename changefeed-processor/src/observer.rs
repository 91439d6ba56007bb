use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::checkpointer::PartitionCheckpointer;
use crate::errors::Result;

/// Why a partition supervisor stopped and closed its observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The host is shutting down
    Shutdown,
    /// The partition key range was split or merged
    ResourceGone,
    /// Another host took over the lease
    LeaseLost,
    /// The observer failed while processing changes
    ObserverError,
    Unknown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            CloseReason::Shutdown => "shutdown",
            CloseReason::ResourceGone => "resource_gone",
            CloseReason::LeaseLost => "lease_lost",
            CloseReason::ObserverError => "observer_error",
            CloseReason::Unknown => "unknown",
        };
        f.write_str(reason)
    }
}

/// Context handed to every observer call.
#[derive(Clone)]
pub struct ObserverContext {
    lease_token: String,
    host_name: String,
    continuation: Option<String>,
    checkpointer: Arc<PartitionCheckpointer>,
}

impl ObserverContext {
    pub(crate) fn new(
        lease_token: &str,
        host_name: &str,
        continuation: Option<String>,
        checkpointer: Arc<PartitionCheckpointer>,
    ) -> Self {
        ObserverContext {
            lease_token: lease_token.to_owned(),
            host_name: host_name.to_owned(),
            continuation,
            checkpointer,
        }
    }

    pub fn lease_token(&self) -> &str {
        &self.lease_token
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// Continuation right after the page being processed, `None` outside `process_changes`.
    pub fn continuation_token(&self) -> Option<&str> {
        self.continuation.as_deref()
    }

    /// Persist the continuation of the page being processed into the lease.
    ///
    /// A `LeaseLost` error means another host owns the partition now; the
    /// supervisor stops once the current call returns.
    pub async fn checkpoint(&self) -> Result<()> {
        match &self.continuation {
            Some(continuation) => self.checkpointer.checkpoint_partition(continuation).await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ObserverContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverContext")
            .field("lease_token", &self.lease_token)
            .field("host_name", &self.host_name)
            .field("continuation", &self.continuation)
            .finish()
    }
}

/// User code consuming the changes of one partition.
///
/// One observer instance is created per partition each time this host starts
/// processing it. Returning an error (or panicking) from any method stops the
/// partition with [`CloseReason::ObserverError`].
#[async_trait]
pub trait ChangeFeedObserver: Send {
    async fn open(&mut self, _context: &ObserverContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn process_changes(
        &mut self,
        context: &ObserverContext,
        documents: Vec<Value>,
    ) -> anyhow::Result<()>;

    async fn close(&mut self, _context: &ObserverContext, _reason: CloseReason) -> anyhow::Result<()> {
        Ok(())
    }
}

pub trait ChangeFeedObserverFactory: Send + Sync {
    fn create_observer(&self) -> Box<dyn ChangeFeedObserver>;
}

impl<F> ChangeFeedObserverFactory for F
where
    F: Fn() -> Box<dyn ChangeFeedObserver> + Send + Sync,
{
    fn create_observer(&self) -> Box<dyn ChangeFeedObserver> {
        self()
    }
}
