use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::store::VersionedDocument;

/// Lease is the unit of ownership: it binds one partition key range to the host
/// currently consuming its change feed.
///
/// The persisted document carries everything except `concurrency_token`, which is
/// the store-managed etag of the document. It is filled in from the store on every
/// read or write and is what every conditional write is checked against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    /// Document id of the lease in the store
    pub id: String,
    /// Identifier of the partition key range this lease represents
    pub lease_token: String,
    /// Host currently holding the lease
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Last time ownership was asserted, in milliseconds since the Unix epoch
    #[serde(default)]
    pub timestamp: u64,
    /// Opaque cursor of the last consumed position in the partition's feed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
    /// Etag of the document as last seen by this host
    #[serde(skip)]
    pub concurrency_token: Option<String>,
    /// Free-form metadata for pluggable balancing strategies
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl Lease {
    pub fn new(id: &str, lease_token: &str, continuation_token: Option<String>) -> Self {
        Lease {
            id: id.to_owned(),
            lease_token: lease_token.to_owned(),
            owner: None,
            timestamp: 0,
            continuation_token,
            concurrency_token: None,
            properties: HashMap::new(),
        }
    }

    /// Returns the owner, treating an empty owner the same as no owner.
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref().filter(|owner| !owner.is_empty())
    }

    pub fn is_owned(&self) -> bool {
        self.owner().is_some()
    }

    pub fn is_owned_by(&self, host_name: &str) -> bool {
        self.owner() == Some(host_name)
    }

    /// A lease is expired once its owner has not asserted ownership for longer
    /// than `expiration_interval`.
    pub fn is_expired(&self, now_ms: u64, expiration_interval: Duration) -> bool {
        now_ms.saturating_sub(self.timestamp) > expiration_interval.as_millis() as u64
    }

    pub fn to_document(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    /// Rebuilds a lease from a stored document, taking the etag as concurrency token.
    pub fn from_document(document: VersionedDocument) -> serde_json::Result<Self> {
        let mut lease: Lease = serde_json::from_value(document.value)?;
        lease.concurrency_token = Some(document.etag);
        Ok(lease)
    }
}

impl std::fmt::Display for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Lease(token: {}, owner: {}, timestamp: {})",
            self.lease_token,
            self.owner().unwrap_or("<none>"),
            self.timestamp
        )
    }
}
