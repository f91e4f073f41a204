//! In-memory blob store.
//!
//! Keeps objects in a sorted map. Used by tests and for running the server
//! without a blob directory; it can inject latency and outages.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use super::{validate_key, BlobObject, BlobStore};
use crate::error::{Result, VaultError};

#[derive(Debug, Clone)]
struct StoredBlob {
    content: Bytes,
    modified: DateTime<Utc>,
}

/// In-process blob store for tests and local development.
///
/// Counts every call so callers can assert that nothing reached the store,
/// and can simulate an outage or a slow backend.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, StoredBlob>>,
    calls: AtomicUsize,
    unavailable: AtomicBool,
    latency: Option<Duration>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Number of list/put/delete calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.blobs.read().await.get(key).map(|b| b.content.clone())
    }

    async fn enter(&self, operation: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(VaultError::store(operation, "memory store marked unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn list(&self, prefix: &str) -> Result<Vec<BlobObject>> {
        self.enter("list").await?;
        let blobs = self.blobs.read().await;
        Ok(blobs
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, blob)| BlobObject {
                key: key.clone(),
                size: blob.content.len() as u64,
                last_modified: Some(blob.modified),
            })
            .collect())
    }

    async fn put(&self, key: &str, content: Bytes) -> Result<()> {
        validate_key(key)?;
        self.enter("put").await?;
        self.blobs.write().await.insert(
            key.to_string(),
            StoredBlob {
                content,
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.enter("delete").await?;
        self.blobs.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_by_prefix_in_key_order() {
        let store = MemoryBlobStore::new();
        store.put("bob/2", Bytes::from_static(b"b2")).await.unwrap();
        store.put("alice/2", Bytes::from_static(b"a2")).await.unwrap();
        store.put("alice/1", Bytes::from_static(b"a1")).await.unwrap();
        store.put("alice2/1", Bytes::from_static(b"x")).await.unwrap();

        let keys: Vec<String> = store
            .list("alice/")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["alice/1", "alice/2"]);
        assert!(store.list("carol/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let store = MemoryBlobStore::new();
        store.delete("nobody/none").await.unwrap();
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = MemoryBlobStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.list("a/").await,
            Err(VaultError::StoreUnavailable { .. })
        ));
        store.set_unavailable(false);
        assert!(store.list("a/").await.is_ok());
    }
}
