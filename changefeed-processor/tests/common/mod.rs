//! Shared helpers for `changefeed-processor` integration tests.
//!
//! Hosts in one test share an `InMemoryChangeFeed` and a `MemoryStore`, which is
//! how several processor instances share one monitored collection and one lease
//! container in a real deployment. Intervals are shortened so ownership changes
//! settle within a few hundred milliseconds.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use changefeed_core::feed::InMemoryChangeFeed;
use changefeed_core::store::{MemoryStore, StoreError};
use changefeed_core::Lease;
use changefeed_lease_store::{
    DocumentLeaseStoreManager, LeaseCheckpointer, LeaseContainer, LeaseManager, LeaseStore,
    LeaseStoreError, LeaseStoreManager, LeaseStoreManagerSettings, LeaseStream,
    SinglePartitionRequestOptionsFactory,
};
use changefeed_processor::{
    ChangeFeedObserver, ChangeFeedObserverFactory, ChangeFeedProcessorBuilder, CloseReason,
    ObserverContext, PartitionManager, ProcessorOptions,
};
use serde_json::Value;

pub const PREFIX: &str = "/changefeed/test";

/// Options with intervals short enough for tests.
pub fn fast_options(host: &str) -> ProcessorOptions {
    ProcessorOptions {
        host_name: host.to_owned(),
        lease_prefix: PREFIX.to_owned(),
        lease_renew_interval: Duration::from_millis(100),
        lease_acquire_interval: Duration::from_millis(100),
        lease_expiration_interval: Duration::from_secs(2),
        feed_poll_delay: Duration::from_millis(20),
        max_items_per_page: 10,
        start_from_beginning: true,
        initialization_lock_ttl: Duration::from_secs(2),
        bootstrap_retry_delay: Duration::from_millis(20),
        bootstrap_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

/// A processor host on top of the shared feed and lease store.
pub fn host(
    options: ProcessorOptions,
    feed: &InMemoryChangeFeed,
    store: &MemoryStore,
    observers: &RecordingObserverFactory,
) -> PartitionManager {
    ChangeFeedProcessorBuilder::new()
        .with_options(options)
        .with_feed_client(Arc::new(feed.clone()))
        .with_lease_store(Arc::new(store.clone()))
        .with_observer_factory(Arc::new(observers.clone()))
        .build()
        .unwrap()
}

/// Lease store manager used by tests to inspect the leases directly.
pub fn inspector(store: &MemoryStore) -> DocumentLeaseStoreManager {
    DocumentLeaseStoreManager::new(
        LeaseStoreManagerSettings::new(PREFIX, "inspector"),
        Arc::new(store.clone()),
        Arc::new(SinglePartitionRequestOptionsFactory),
    )
}

/// Every lease in the store, keyed by lease token.
pub async fn leases(store: &MemoryStore) -> HashMap<String, Lease> {
    inspector(store)
        .get_all_leases()
        .await
        .unwrap()
        .collect_leases()
        .await
        .unwrap()
        .into_iter()
        .map(|lease| (lease.lease_token.clone(), lease))
        .collect()
}

/// Poll `condition` until it holds or `timeout` elapses. Returns whether it held.
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Wait until `host` processes exactly the partitions in `expected`.
pub async fn wait_for_partitions(host: &PartitionManager, expected: &[&str]) -> bool {
    let controller = host.controller();
    let expected: Vec<String> = expected.iter().map(|token| token.to_string()).collect();
    wait_until(Duration::from_secs(5), || {
        let expected = expected.clone();
        async move { controller.active_lease_tokens().await == expected }
    })
    .await
}

/// Document-backed lease store whose behaviour tests can script per call:
/// `acquire` failing with a backend error for chosen leases, a slow `release`,
/// or `update_properties` rejected as if another host won the write.
#[derive(Clone)]
pub struct ScriptedLeaseStore {
    inner: Arc<DocumentLeaseStoreManager>,
    broken_acquire: Arc<HashSet<String>>,
    release_delay: Duration,
    reject_property_updates: Arc<AtomicBool>,
}

impl ScriptedLeaseStore {
    pub fn new(store: &MemoryStore, host: &str) -> Self {
        ScriptedLeaseStore {
            inner: Arc::new(DocumentLeaseStoreManager::new(
                LeaseStoreManagerSettings::new(PREFIX, host),
                Arc::new(store.clone()),
                Arc::new(SinglePartitionRequestOptionsFactory),
            )),
            broken_acquire: Arc::new(HashSet::new()),
            release_delay: Duration::ZERO,
            reject_property_updates: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn failing_acquire_on(mut self, lease_token: &str) -> Self {
        let mut broken = (*self.broken_acquire).clone();
        broken.insert(lease_token.to_owned());
        self.broken_acquire = Arc::new(broken);
        self
    }

    pub fn with_release_delay(mut self, delay: Duration) -> Self {
        self.release_delay = delay;
        self
    }

    /// From now on every `update_properties` fails with `LeaseLost`.
    pub fn reject_property_updates(&self) {
        self.reject_property_updates.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl LeaseContainer for ScriptedLeaseStore {
    async fn get_all_leases(&self) -> changefeed_lease_store::Result<LeaseStream> {
        self.inner.get_all_leases().await
    }

    async fn get_owned_leases(&self) -> changefeed_lease_store::Result<LeaseStream> {
        self.inner.get_owned_leases().await
    }
}

#[async_trait]
impl LeaseManager for ScriptedLeaseStore {
    async fn create_lease_if_not_exist(
        &self,
        lease_token: &str,
        continuation_token: Option<String>,
    ) -> changefeed_lease_store::Result<Lease> {
        self.inner
            .create_lease_if_not_exist(lease_token, continuation_token)
            .await
    }

    async fn acquire(&self, lease: &Lease) -> changefeed_lease_store::Result<Lease> {
        if self.broken_acquire.contains(&lease.lease_token) {
            return Err(LeaseStoreError::Store(StoreError::Unknown(
                "lease container unavailable".into(),
            )));
        }
        self.inner.acquire(lease).await
    }

    async fn release(&self, lease: &Lease) -> changefeed_lease_store::Result<()> {
        if !self.release_delay.is_zero() {
            tokio::time::sleep(self.release_delay).await;
        }
        self.inner.release(lease).await
    }

    async fn renew(&self, lease: &Lease) -> changefeed_lease_store::Result<Lease> {
        self.inner.renew(lease).await
    }

    async fn update_properties(&self, lease: &Lease) -> changefeed_lease_store::Result<Lease> {
        if self.reject_property_updates.load(Ordering::SeqCst) {
            return Err(LeaseStoreError::LeaseLost(lease.lease_token.clone()));
        }
        self.inner.update_properties(lease).await
    }

    async fn delete(&self, lease: &Lease) -> changefeed_lease_store::Result<()> {
        self.inner.delete(lease).await
    }
}

#[async_trait]
impl LeaseCheckpointer for ScriptedLeaseStore {
    async fn checkpoint(
        &self,
        lease: &Lease,
        continuation_token: &str,
    ) -> changefeed_lease_store::Result<Lease> {
        self.inner.checkpoint(lease, continuation_token).await
    }
}

#[async_trait]
impl LeaseStore for ScriptedLeaseStore {
    async fn is_initialized(&self) -> changefeed_lease_store::Result<bool> {
        self.inner.is_initialized().await
    }

    async fn mark_initialized(&self) -> changefeed_lease_store::Result<()> {
        self.inner.mark_initialized().await
    }

    async fn acquire_initialization_lock(
        &self,
        ttl: Duration,
    ) -> changefeed_lease_store::Result<bool> {
        self.inner.acquire_initialization_lock(ttl).await
    }

    async fn release_initialization_lock(&self) -> changefeed_lease_store::Result<bool> {
        self.inner.release_initialization_lock().await
    }
}

impl LeaseStoreManager for ScriptedLeaseStore {
    fn host_name(&self) -> &str {
        self.inner.host_name()
    }
}

#[derive(Debug, Default)]
struct Recorded {
    opened: Vec<String>,
    closed: Vec<(String, CloseReason)>,
    documents: HashMap<String, Vec<Value>>,
}

/// Observer factory recording everything its observers see.
///
/// Behaviour is chosen per lease token: fail or panic while processing, or
/// checkpoint explicitly after every page.
#[derive(Clone, Default)]
pub struct RecordingObserverFactory {
    recorded: Arc<Mutex<Recorded>>,
    fail_on: Option<String>,
    panic_on: Option<String>,
    checkpoint_manually: bool,
}

impl RecordingObserverFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, lease_token: &str) -> Self {
        self.fail_on = Some(lease_token.to_owned());
        self
    }

    pub fn panicking_on(mut self, lease_token: &str) -> Self {
        self.panic_on = Some(lease_token.to_owned());
        self
    }

    pub fn checkpointing_manually(mut self) -> Self {
        self.checkpoint_manually = true;
        self
    }

    pub fn opened(&self, lease_token: &str) -> usize {
        let recorded = self.recorded.lock().unwrap();
        recorded
            .opened
            .iter()
            .filter(|token| token.as_str() == lease_token)
            .count()
    }

    pub fn close_reasons(&self, lease_token: &str) -> Vec<CloseReason> {
        let recorded = self.recorded.lock().unwrap();
        recorded
            .closed
            .iter()
            .filter(|(token, _)| token == lease_token)
            .map(|(_, reason)| *reason)
            .collect()
    }

    pub fn documents(&self, lease_token: &str) -> Vec<Value> {
        let recorded = self.recorded.lock().unwrap();
        recorded
            .documents
            .get(lease_token)
            .cloned()
            .unwrap_or_default()
    }

    pub fn document_count(&self) -> usize {
        let recorded = self.recorded.lock().unwrap();
        recorded.documents.values().map(Vec::len).sum()
    }
}

impl ChangeFeedObserverFactory for RecordingObserverFactory {
    fn create_observer(&self) -> Box<dyn ChangeFeedObserver> {
        Box::new(RecordingObserver {
            factory: self.clone(),
        })
    }
}

struct RecordingObserver {
    factory: RecordingObserverFactory,
}

#[async_trait]
impl ChangeFeedObserver for RecordingObserver {
    async fn open(&mut self, context: &ObserverContext) -> anyhow::Result<()> {
        let mut recorded = self.factory.recorded.lock().unwrap();
        recorded.opened.push(context.lease_token().to_owned());
        Ok(())
    }

    async fn process_changes(
        &mut self,
        context: &ObserverContext,
        documents: Vec<Value>,
    ) -> anyhow::Result<()> {
        let lease_token = context.lease_token();
        if self.factory.panic_on.as_deref() == Some(lease_token) {
            panic!("observer for {} gave up", lease_token);
        }
        if self.factory.fail_on.as_deref() == Some(lease_token) {
            anyhow::bail!("observer for {} rejected {} documents", lease_token, documents.len());
        }

        {
            let mut recorded = self.factory.recorded.lock().unwrap();
            recorded
                .documents
                .entry(lease_token.to_owned())
                .or_default()
                .extend(documents);
        }

        if self.factory.checkpoint_manually {
            context.checkpoint().await?;
        }
        Ok(())
    }

    async fn close(&mut self, context: &ObserverContext, reason: CloseReason) -> anyhow::Result<()> {
        let mut recorded = self.factory.recorded.lock().unwrap();
        recorded
            .closed
            .push((context.lease_token().to_owned(), reason));
        Ok(())
    }
}
