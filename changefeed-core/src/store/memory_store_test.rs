use super::{DocumentStore, MemoryStore, RequestOptions, StoreError};
use futures::TryStreamExt;
use serde_json::json;
use std::time::Duration;

fn opts() -> RequestOptions {
    RequestOptions::default()
}

/// **What**: create → read → replace → delete on a single key.
///
/// **Checks**: every successful write hands back a fresh etag and reads observe it.
#[tokio::test]
async fn create_read_replace_delete() {
    let store = MemoryStore::new();

    assert!(store.read("/cf/leases/0", &opts()).await.unwrap().is_none());

    let created = store
        .create("/cf/leases/0", json!({"owner": null}), &opts())
        .await
        .unwrap();
    let read = store.read("/cf/leases/0", &opts()).await.unwrap().unwrap();
    assert_eq!(read, created);

    let replaced = store
        .replace("/cf/leases/0", json!({"owner": "a"}), &created.etag, &opts())
        .await
        .unwrap();
    assert_ne!(replaced.etag, created.etag);
    assert_eq!(replaced.value, json!({"owner": "a"}));

    store
        .delete("/cf/leases/0", Some(&replaced.etag), &opts())
        .await
        .unwrap();
    assert!(store.read("/cf/leases/0", &opts()).await.unwrap().is_none());
}

/// **What**: create on an existing key.
///
/// **Checks**: fails with `Conflict` and leaves the original document untouched.
#[tokio::test]
async fn create_existing_key_conflicts() {
    let store = MemoryStore::new();
    let first = store.create("/cf/a", json!(1), &opts()).await.unwrap();

    let err = store.create("/cf/a", json!(2), &opts()).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    let current = store.read("/cf/a", &opts()).await.unwrap().unwrap();
    assert_eq!(current, first);
}

/// **What**: replace with a stale etag.
///
/// **Checks**: `PreconditionFailed`, and the store keeps the newer write.
#[tokio::test]
async fn replace_with_stale_etag_fails() {
    let store = MemoryStore::new();
    let v1 = store.create("/cf/a", json!("v1"), &opts()).await.unwrap();
    let v2 = store
        .replace("/cf/a", json!("v2"), &v1.etag, &opts())
        .await
        .unwrap();

    let err = store
        .replace("/cf/a", json!("v3"), &v1.etag, &opts())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::PreconditionFailed(_)));

    let current = store.read("/cf/a", &opts()).await.unwrap().unwrap();
    assert_eq!(current, v2);
}

#[tokio::test]
async fn replace_missing_key_is_not_found() {
    let store = MemoryStore::new();
    let err = store
        .replace("/cf/missing", json!(1), "0", &opts())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

/// **What**: conditional and unconditional deletes.
///
/// **Checks**: a mismatched etag is rejected, a missing key reports `NotFound`.
#[tokio::test]
async fn delete_respects_if_match() {
    let store = MemoryStore::new();
    let doc = store.create("/cf/a", json!(1), &opts()).await.unwrap();

    let err = store.delete("/cf/a", Some("nope"), &opts()).await.unwrap_err();
    assert!(matches!(err, StoreError::PreconditionFailed(_)));

    store.delete("/cf/a", Some(&doc.etag), &opts()).await.unwrap();

    let err = store.delete("/cf/a", None, &opts()).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

/// **What**: documents created with a TTL.
///
/// **Checks**: once expired they read as absent and the key can be created again.
#[tokio::test]
async fn ttl_documents_expire() {
    let store = MemoryStore::new();
    let ttl_opts = RequestOptions::default().with_ttl(Duration::from_millis(50));

    store.create("/cf/lock", json!("a"), &ttl_opts).await.unwrap();
    let err = store.create("/cf/lock", json!("b"), &ttl_opts).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    tokio::time::sleep(Duration::from_millis(80)).await;

    assert!(store.read("/cf/lock", &opts()).await.unwrap().is_none());
    let recreated = store.create("/cf/lock", json!("b"), &ttl_opts).await.unwrap();
    assert_eq!(recreated.value, json!("b"));
}

/// **What**: a TTL far beyond any representable instant, as a config file may give.
///
/// **Checks**: create and replace succeed and the document never reads as expired.
#[tokio::test]
async fn huge_ttl_never_expires() {
    let store = MemoryStore::new();
    let huge = RequestOptions::default().with_ttl(Duration::from_millis(u64::MAX));

    let created = store.create("/cf/lock", json!("a"), &huge).await.unwrap();
    let replaced = store
        .replace("/cf/lock", json!("b"), &created.etag, &huge)
        .await
        .unwrap();

    let read = store.read("/cf/lock", &opts()).await.unwrap().unwrap();
    assert_eq!(read, replaced);
    let err = store.create("/cf/lock", json!("c"), &huge).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}

/// **What**: prefix query.
///
/// **Checks**: only matching keys are returned, in key order; a second query restarts.
#[tokio::test]
async fn query_prefix_is_restartable() {
    let store = MemoryStore::new();
    for token in ["2", "0", "1"] {
        store
            .create(&format!("/cf/leases/{}", token), json!(token), &opts())
            .await
            .unwrap();
    }
    store.create("/cf/store/lock", json!("x"), &opts()).await.unwrap();

    let keys: Vec<String> = store
        .query_prefix("/cf/leases/", &opts())
        .await
        .unwrap()
        .map_ok(|doc| doc.key)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(keys, vec!["/cf/leases/0", "/cf/leases/1", "/cf/leases/2"]);

    let again: Vec<_> = store
        .query_prefix("/cf/leases/", &opts())
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(again.len(), 3);
}

#[tokio::test]
async fn relative_keys_are_rejected() {
    let store = MemoryStore::new();
    let err = store.create("cf/a", json!(1), &opts()).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidArguments(_)));
}

/// **What**: many concurrent replaces racing on one etag.
///
/// **Checks**: exactly one wins.
#[tokio::test]
async fn concurrent_replaces_single_winner() {
    let store = MemoryStore::new();
    let doc = store.create("/cf/a", json!(0), &opts()).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        let etag = doc.etag.clone();
        handles.push(tokio::spawn(async move {
            store
                .replace("/cf/a", json!(i), &etag, &RequestOptions::default())
                .await
                .is_ok()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}
