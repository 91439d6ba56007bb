use async_trait::async_trait;
use changefeed_core::store::{DocumentStore, StoreError};
use changefeed_core::utils::{join_path, now_ms};
use changefeed_core::Lease;
use futures::{future, StreamExt, TryStreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::{LeaseStoreError, Result};
use crate::request_options::RequestOptionsFactory;
use crate::traits::{
    LeaseCheckpointer, LeaseContainer, LeaseManager, LeaseStore, LeaseStoreManager, LeaseStream,
};

/// Settings for a document-backed lease store manager.
#[derive(Debug, Clone)]
pub struct LeaseStoreManagerSettings {
    /// Path prefix under which every document of this processor lives,
    /// e.g. `/changefeed/orders-processor`
    pub lease_prefix: String,
    /// Name of the host the manager acts for
    pub host_name: String,
}

impl LeaseStoreManagerSettings {
    pub fn new(lease_prefix: &str, host_name: &str) -> Self {
        LeaseStoreManagerSettings {
            lease_prefix: lease_prefix.to_owned(),
            host_name: host_name.to_owned(),
        }
    }
}

/// DocumentLeaseStoreManager keeps one document per lease in a `DocumentStore`.
///
/// ## Layout
/// - `{prefix}/leases/{lease_token}`: the lease documents
/// - `{prefix}/store/initialized`: marker written once bootstrap completed
/// - `{prefix}/store/lock`: TTL-bound initialization lock
///
/// Every mutation is a conditional replace against the etag carried by the caller's
/// lease. A rejected write is reported as `LeaseLost` and never retried here.
#[derive(Clone)]
pub struct DocumentLeaseStoreManager {
    settings: LeaseStoreManagerSettings,
    store: Arc<dyn DocumentStore>,
    options_factory: Arc<dyn RequestOptionsFactory>,
    /// Etag of the initialization lock while this host holds it
    lock_etag: Arc<Mutex<Option<String>>>,
}

impl std::fmt::Debug for DocumentLeaseStoreManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentLeaseStoreManager")
            .field("settings", &self.settings)
            .finish()
    }
}

impl DocumentLeaseStoreManager {
    pub fn new(
        settings: LeaseStoreManagerSettings,
        store: Arc<dyn DocumentStore>,
        options_factory: Arc<dyn RequestOptionsFactory>,
    ) -> Self {
        DocumentLeaseStoreManager {
            settings,
            store,
            options_factory,
            lock_etag: Arc::new(Mutex::new(None)),
        }
    }

    fn leases_prefix(&self) -> String {
        format!("{}/", join_path(&[&self.settings.lease_prefix, "leases"]))
    }

    fn lease_key(&self, lease_token: &str) -> String {
        join_path(&[&self.settings.lease_prefix, "leases", lease_token])
    }

    fn initialized_key(&self) -> String {
        join_path(&[&self.settings.lease_prefix, "store", "initialized"])
    }

    fn lock_key(&self) -> String {
        join_path(&[&self.settings.lease_prefix, "store", "lock"])
    }

    fn concurrency_token<'a>(&self, lease: &'a Lease) -> Result<&'a str> {
        lease.concurrency_token.as_deref().ok_or_else(|| {
            LeaseStoreError::InvalidLease(format!(
                "lease {} carries no concurrency token",
                lease.lease_token
            ))
        })
    }

    fn ensure_owned(&self, lease: &Lease) -> Result<()> {
        if lease.is_owned_by(&self.settings.host_name) {
            return Ok(());
        }
        debug!(
            lease_token = %lease.lease_token,
            owner = lease.owner().unwrap_or("<none>"),
            host = %self.settings.host_name,
            "lease is not owned by this host"
        );
        Err(LeaseStoreError::LeaseLost(lease.lease_token.clone()))
    }

    /// Conditionally replace the lease document with `updated`, expecting `etag`.
    async fn replace_lease(&self, updated: Lease, etag: &str) -> Result<Lease> {
        let key = self.lease_key(&updated.lease_token);
        let options = self.options_factory.create_request_options(&key);

        match self
            .store
            .replace(&key, updated.to_document()?, etag, &options)
            .await
        {
            Ok(document) => Ok(Lease::from_document(document)?),
            Err(StoreError::PreconditionFailed(_)) | Err(StoreError::NotFound(_)) => {
                debug!(
                    lease_token = %updated.lease_token,
                    host = %self.settings.host_name,
                    "conditional lease write rejected"
                );
                Err(LeaseStoreError::LeaseLost(updated.lease_token))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn query_leases(&self) -> Result<LeaseStream> {
        let prefix = self.leases_prefix();
        let options = self.options_factory.create_request_options(&prefix);
        let documents = self.store.query_prefix(&prefix, &options).await?;

        Ok(LeaseStream::new(documents.map(|document| -> Result<Lease> {
            let document = document?;
            Ok(Lease::from_document(document)?)
        })))
    }
}

#[async_trait]
impl LeaseContainer for DocumentLeaseStoreManager {
    async fn get_all_leases(&self) -> Result<LeaseStream> {
        self.query_leases().await
    }

    async fn get_owned_leases(&self) -> Result<LeaseStream> {
        let host = self.settings.host_name.clone();
        let leases = self.query_leases().await?;
        Ok(LeaseStream::new(
            leases.try_filter(move |lease| future::ready(lease.is_owned_by(&host))),
        ))
    }
}

#[async_trait]
impl LeaseManager for DocumentLeaseStoreManager {
    async fn create_lease_if_not_exist(
        &self,
        lease_token: &str,
        continuation_token: Option<String>,
    ) -> Result<Lease> {
        let key = self.lease_key(lease_token);
        let options = self.options_factory.create_request_options(&key);
        let lease = Lease::new(&key, lease_token, continuation_token);

        match self.store.create(&key, lease.to_document()?, &options).await {
            Ok(document) => {
                info!(lease_token = %lease_token, "created lease");
                Ok(Lease::from_document(document)?)
            }
            Err(StoreError::Conflict(_)) => {
                debug!(lease_token = %lease_token, "lease already exists");
                match self.store.read(&key, &options).await? {
                    Some(document) => Ok(Lease::from_document(document)?),
                    None => Err(StoreError::NotFound(key).into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn acquire(&self, lease: &Lease) -> Result<Lease> {
        let etag = self.concurrency_token(lease)?;

        let mut updated = lease.clone();
        updated.owner = Some(self.settings.host_name.clone());
        updated.timestamp = now_ms().max(lease.timestamp + 1);

        let acquired = self.replace_lease(updated, etag).await?;
        info!(
            lease_token = %acquired.lease_token,
            host = %self.settings.host_name,
            previous_owner = lease.owner().unwrap_or("<none>"),
            "acquired lease"
        );
        Ok(acquired)
    }

    async fn release(&self, lease: &Lease) -> Result<()> {
        self.ensure_owned(lease)?;
        let etag = self.concurrency_token(lease)?;

        let mut updated = lease.clone();
        updated.owner = None;

        self.replace_lease(updated, etag).await?;
        info!(
            lease_token = %lease.lease_token,
            host = %self.settings.host_name,
            "released lease"
        );
        Ok(())
    }

    async fn renew(&self, lease: &Lease) -> Result<Lease> {
        self.ensure_owned(lease)?;
        let etag = self.concurrency_token(lease)?;

        let mut updated = lease.clone();
        updated.timestamp = now_ms().max(lease.timestamp + 1);

        let renewed = self.replace_lease(updated, etag).await?;
        debug!(lease_token = %renewed.lease_token, timestamp = renewed.timestamp, "renewed lease");
        Ok(renewed)
    }

    async fn update_properties(&self, lease: &Lease) -> Result<Lease> {
        self.ensure_owned(lease)?;
        let etag = self.concurrency_token(lease)?;
        self.replace_lease(lease.clone(), etag).await
    }

    async fn delete(&self, lease: &Lease) -> Result<()> {
        let key = self.lease_key(&lease.lease_token);
        let options = self.options_factory.create_request_options(&key);

        match self.store.delete(&key, None, &options).await {
            Ok(()) => {
                info!(lease_token = %lease.lease_token, "deleted lease");
                Ok(())
            }
            Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl LeaseCheckpointer for DocumentLeaseStoreManager {
    async fn checkpoint(&self, lease: &Lease, continuation_token: &str) -> Result<Lease> {
        self.ensure_owned(lease)?;
        let etag = self.concurrency_token(lease)?;

        let mut updated = lease.clone();
        updated.continuation_token = Some(continuation_token.to_owned());

        let checkpointed = self.replace_lease(updated, etag).await?;
        debug!(
            lease_token = %checkpointed.lease_token,
            continuation = %continuation_token,
            "checkpointed lease"
        );
        Ok(checkpointed)
    }
}

#[async_trait]
impl LeaseStore for DocumentLeaseStoreManager {
    async fn is_initialized(&self) -> Result<bool> {
        let key = self.initialized_key();
        let options = self.options_factory.create_request_options(&key);
        Ok(self.store.read(&key, &options).await?.is_some())
    }

    async fn mark_initialized(&self) -> Result<()> {
        let key = self.initialized_key();
        let options = self.options_factory.create_request_options(&key);
        let marker = json!({
            "id": key,
            "initializedBy": self.settings.host_name,
            "timestamp": now_ms(),
        });

        match self.store.create(&key, marker, &options).await {
            Ok(_) | Err(StoreError::Conflict(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn acquire_initialization_lock(&self, ttl: Duration) -> Result<bool> {
        let key = self.lock_key();
        let options = self
            .options_factory
            .create_request_options(&key)
            .with_ttl(ttl);
        let lock = json!({
            "id": key,
            "owner": self.settings.host_name,
            "timestamp": now_ms(),
        });

        match self.store.create(&key, lock, &options).await {
            Ok(document) => {
                *self.lock_etag.lock().await = Some(document.etag);
                info!(host = %self.settings.host_name, ttl = ?ttl, "acquired initialization lock");
                Ok(true)
            }
            Err(StoreError::Conflict(_)) => {
                debug!(host = %self.settings.host_name, "initialization lock held by another host");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn release_initialization_lock(&self) -> Result<bool> {
        let etag = match self.lock_etag.lock().await.take() {
            Some(etag) => etag,
            None => return Ok(false),
        };
        let key = self.lock_key();
        let options = self.options_factory.create_request_options(&key);

        match self.store.delete(&key, Some(&etag), &options).await {
            Ok(()) => {
                info!(host = %self.settings.host_name, "released initialization lock");
                Ok(true)
            }
            Err(StoreError::NotFound(_)) | Err(StoreError::PreconditionFailed(_)) => {
                warn!(
                    host = %self.settings.host_name,
                    "initialization lock expired before it was released"
                );
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl LeaseStoreManager for DocumentLeaseStoreManager {
    fn host_name(&self) -> &str {
        &self.settings.host_name
    }
}
