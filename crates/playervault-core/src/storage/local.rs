//! Directory-backed blob store.
//!
//! Key `a/b` lives at `root/a/b`. Writes are atomic:
//! 1. Write to a temp file in the target directory
//! 2. fsync
//! 3. Rename over the target path

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;
use walkdir::WalkDir;

use super::{validate_key, BlobObject, BlobStore};
use crate::error::{Result, VaultError};

/// Prefix of in-flight temp files, skipped by listing.
const TEMP_PREFIX: &str = ".tmp";

/// Blob store that keeps objects as files under a root directory.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Use `root` as the store directory, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| VaultError::io_with_path(e, &root))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> PathBuf {
        key.split('/').fold(self.root.clone(), |path, seg| path.join(seg))
    }

    fn list_blocking(root: &Path, prefix: &str) -> Result<Vec<BlobObject>> {
        let mut objects = Vec::new();
        for entry in WalkDir::new(root).min_depth(1).into_iter() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.io_error().map(|io| io.kind()) == Some(ErrorKind::NotFound) => {
                    // Removed while walking.
                    continue;
                }
                Err(e) => return Err(VaultError::store("list", e.to_string())),
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if !key.starts_with(prefix) {
                continue;
            }
            let metadata = entry
                .metadata()
                .map_err(|e| VaultError::store("list", e.to_string()))?;
            objects.push(BlobObject {
                key,
                size: metadata.len(),
                last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    fn put_blocking(path: &Path, content: &[u8]) -> std::io::Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidInput, "key has no parent"))?;
        std::fs::create_dir_all(parent)?;

        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(parent)?;
        temp.write_all(content)?;
        temp.as_file().sync_all()?;
        persist(temp, path)
    }

    /// Subject directories are left in place once created, so a concurrent
    /// put never sees its parent vanish.
    fn delete_blocking(path: &Path) -> std::io::Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn persist(temp: NamedTempFile, path: &Path) -> std::io::Result<()> {
    temp.persist(path).map(|_| ()).map_err(|e| e.error)
}

async fn blocking<T, F>(operation: &'static str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VaultError::store(operation, format!("task failed: {}", e)))?
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn list(&self, prefix: &str) -> Result<Vec<BlobObject>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        blocking("list", move || Self::list_blocking(&root, &prefix)).await
    }

    async fn put(&self, key: &str, content: Bytes) -> Result<()> {
        validate_key(key)?;
        let path = self.key_path(key);
        debug!("Writing {} bytes to {:?}", content.len(), path);
        blocking("put", move || {
            Self::put_blocking(&path, &content).map_err(|e| VaultError::store("put", e.to_string()))
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let path = self.key_path(key);
        blocking("delete", move || {
            Self::delete_blocking(&path).map_err(|e| VaultError::store("delete", e.to_string()))
        })
        .await
    }
}
