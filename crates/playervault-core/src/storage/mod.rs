//! Blob store abstraction.
//!
//! The gateway talks to object storage through [`BlobStore`]: keys are
//! `/`-separated strings, values are opaque bytes. Listing may be eventually
//! consistent with respect to puts and deletes.

mod local;
mod memory;

pub use local::LocalBlobStore;
pub use memory::MemoryBlobStore;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Result, VaultError};

/// One object returned by [`BlobStore::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlobObject {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Minimal object storage interface.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// All objects whose key starts with `prefix`, in key order.
    async fn list(&self, prefix: &str) -> Result<Vec<BlobObject>>;

    /// Store `content` under `key`, replacing any existing object.
    async fn put(&self, key: &str, content: Bytes) -> Result<()>;

    /// Remove `key`. Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Reject keys that are empty or could escape a directory-backed store.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key
            .split('/')
            .any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(VaultError::Validation {
            field: "key".to_string(),
            message: format!("invalid object key {:?}", key),
        });
    }
    Ok(())
}
