use async_trait::async_trait;
use changefeed_core::Lease;
use futures::stream::{Stream, TryStreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::errors::Result;

/// Read access to the lease documents.
#[async_trait]
pub trait LeaseContainer: Send + Sync {
    /// Snapshot of every lease. Each call starts a fresh query.
    async fn get_all_leases(&self) -> Result<LeaseStream>;

    /// The subset of leases owned by this host.
    async fn get_owned_leases(&self) -> Result<LeaseStream>;
}

/// Lease mutations. Every write is conditional on the caller's `concurrency_token`
/// and fails with `LeaseStoreError::LeaseLost` when the store moved on.
#[async_trait]
pub trait LeaseManager: Send + Sync {
    /// Create the lease for `lease_token`, or return the existing record unchanged.
    async fn create_lease_if_not_exist(
        &self,
        lease_token: &str,
        continuation_token: Option<String>,
    ) -> Result<Lease>;

    /// Take ownership for this host and refresh the timestamp.
    async fn acquire(&self, lease: &Lease) -> Result<Lease>;

    /// Clear the owner.
    async fn release(&self, lease: &Lease) -> Result<()>;

    /// Advance the timestamp, leaving owner and continuation untouched.
    async fn renew(&self, lease: &Lease) -> Result<Lease>;

    /// Persist the lease properties.
    async fn update_properties(&self, lease: &Lease) -> Result<Lease>;

    /// Remove the lease document. Removing an absent lease succeeds.
    async fn delete(&self, lease: &Lease) -> Result<()>;
}

/// Progress persistence for a lease.
#[async_trait]
pub trait LeaseCheckpointer: Send + Sync {
    async fn checkpoint(&self, lease: &Lease, continuation_token: &str) -> Result<Lease>;
}

/// Bootstrap coordination: a TTL-bound lock plus an "initialized" marker.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    async fn is_initialized(&self) -> Result<bool>;

    async fn mark_initialized(&self) -> Result<()>;

    /// Returns `true` if this host now holds the initialization lock.
    /// The lock lapses on its own after `ttl`.
    async fn acquire_initialization_lock(&self, ttl: Duration) -> Result<bool>;

    /// Returns `true` if the lock held by this host was released.
    async fn release_initialization_lock(&self) -> Result<bool>;
}

/// Everything the processor needs from lease persistence.
pub trait LeaseStoreManager: LeaseContainer + LeaseManager + LeaseCheckpointer + LeaseStore {
    /// Name of the host this manager acts for.
    fn host_name(&self) -> &str;
}

/// Finite stream of leases.
pub struct LeaseStream {
    inner: Pin<Box<dyn Stream<Item = Result<Lease>> + Send>>,
}

impl Stream for LeaseStream {
    type Item = Result<Lease>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl LeaseStream {
    pub fn new(stream: impl Stream<Item = Result<Lease>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// Drain the stream, failing on the first error.
    pub async fn collect_leases(self) -> Result<Vec<Lease>> {
        self.try_collect().await
    }
}

impl std::fmt::Debug for LeaseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseStream").finish_non_exhaustive()
    }
}
