use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use super::{
    document_store::{DocumentStore, DocumentStream, RequestOptions, VersionedDocument},
    errors::{Result, StoreError},
};
use crate::utils::now_ms;

/// Expiry instant of a document written at `now` with `ttl`, capped at `u64::MAX`.
fn expiry(now: u64, ttl: Duration) -> u64 {
    now.saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
}

#[derive(Debug, Clone)]
struct StoredDocument {
    value: Value,
    etag: String,
    expires_at_ms: Option<u64>,
}

impl StoredDocument {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at_ms.map(|at| at <= now).unwrap_or(false)
    }

    fn to_versioned(&self, key: &str) -> VersionedDocument {
        VersionedDocument {
            key: key.to_owned(),
            value: self.value.clone(),
            etag: self.etag.clone(),
        }
    }
}

/// MemoryStore is an in-memory document store implementing the DocumentStore trait.
/// Per-key atomicity comes from the DashMap shard locks, which is what makes the
/// conditional writes safe under concurrent callers.
/// SHOULD BE USED ONLY FOR TESTING AND SIMULATION PURPOSES
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<DashMap<String, StoredDocument>>,
    revision: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    fn next_etag(&self) -> String {
        let rev = self.revision.fetch_add(1, Ordering::AcqRel) + 1;
        format!("{:016x}", rev)
    }

    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() || !key.starts_with('/') {
            return Err(StoreError::InvalidArguments(format!(
                "Key must be an absolute path: {:?}",
                key
            )));
        }
        Ok(())
    }

    /// Number of live documents, expired ones excluded.
    pub fn len(&self) -> usize {
        let now = now_ms();
        self.inner.iter().filter(|e| !e.value().is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn read(&self, key: &str, _options: &RequestOptions) -> Result<Option<VersionedDocument>> {
        Self::validate_key(key)?;
        let now = now_ms();

        let stored = self.inner.get(key).map(|entry| entry.value().clone());
        match stored {
            Some(doc) if doc.is_expired(now) => {
                self.inner.remove_if(key, |_, d| d.is_expired(now));
                Ok(None)
            }
            Some(doc) => Ok(Some(doc.to_versioned(key))),
            None => Ok(None),
        }
    }

    async fn query_prefix(&self, prefix: &str, _options: &RequestOptions) -> Result<DocumentStream> {
        Self::validate_key(prefix)?;
        let now = now_ms();

        let mut documents: Vec<VersionedDocument> = self
            .inner
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && !entry.value().is_expired(now))
            .map(|entry| entry.value().to_versioned(entry.key()))
            .collect();
        documents.sort_by(|a, b| a.key.cmp(&b.key));

        Ok(DocumentStream::from_documents(documents))
    }

    async fn create(
        &self,
        key: &str,
        value: Value,
        options: &RequestOptions,
    ) -> Result<VersionedDocument> {
        Self::validate_key(key)?;
        let now = now_ms();
        let document = StoredDocument {
            value,
            etag: self.next_etag(),
            expires_at_ms: options.ttl.map(|ttl| expiry(now, ttl)),
        };

        match self.inner.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_expired(now) {
                    return Err(StoreError::Conflict(key.to_owned()));
                }
                trace!(key = %key, "replacing expired document on create");
                occupied.insert(document.clone());
            }
            Entry::Vacant(vacant) => {
                vacant.insert(document.clone());
            }
        }

        Ok(document.to_versioned(key))
    }

    async fn replace(
        &self,
        key: &str,
        value: Value,
        if_match: &str,
        options: &RequestOptions,
    ) -> Result<VersionedDocument> {
        Self::validate_key(key)?;
        let now = now_ms();

        let mut entry = match self.inner.get_mut(key) {
            Some(entry) if !entry.value().is_expired(now) => entry,
            _ => return Err(StoreError::NotFound(key.to_owned())),
        };

        let stored = entry.value_mut();
        if stored.etag != if_match {
            return Err(StoreError::PreconditionFailed(key.to_owned()));
        }

        stored.value = value;
        stored.etag = self.next_etag();
        if let Some(ttl) = options.ttl {
            stored.expires_at_ms = Some(expiry(now, ttl));
        }

        Ok(stored.to_versioned(key))
    }

    async fn delete(
        &self,
        key: &str,
        if_match: Option<&str>,
        _options: &RequestOptions,
    ) -> Result<()> {
        Self::validate_key(key)?;
        let now = now_ms();

        let removed = self.inner.remove_if(key, |_, doc| {
            !doc.is_expired(now) && if_match.map(|etag| doc.etag == etag).unwrap_or(true)
        });
        if removed.is_some() {
            return Ok(());
        }

        match self.inner.get(key) {
            Some(doc) if !doc.value().is_expired(now) => {
                Err(StoreError::PreconditionFailed(key.to_owned()))
            }
            _ => Err(StoreError::NotFound(key.to_owned())),
        }
    }
}
