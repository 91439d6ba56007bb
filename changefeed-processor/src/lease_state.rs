use changefeed_core::Lease;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// The in-memory copy of an owned lease, shared by the renewer, the reader and
/// the checkpointer of one partition.
///
/// Writers hold the lock across the store call so each write uses the etag the
/// previous write on this host produced.
pub(crate) struct LeaseState {
    lease: Mutex<Lease>,
    lost: AtomicBool,
    stop: CancellationToken,
}

impl LeaseState {
    pub(crate) fn new(lease: Lease, stop: CancellationToken) -> Self {
        LeaseState {
            lease: Mutex::new(lease),
            lost: AtomicBool::new(false),
            stop,
        }
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Lease> {
        self.lease.lock().await
    }

    pub(crate) async fn snapshot(&self) -> Lease {
        self.lease.lock().await.clone()
    }

    /// Record that ownership moved to another host and stop the partition.
    pub(crate) fn mark_lost(&self) {
        self.lost.store(true, Ordering::Release);
        self.stop.cancel();
    }

    pub(crate) fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    pub(crate) fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }
}
