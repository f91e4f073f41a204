//! PlayerVault Core - player registry and per-player image storage.
//!
//! Builds a live set of known players from game world directories and uses
//! it to gate an image store. It can be used programmatically without any
//! HTTP layer.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use playervault_core::{ImageGateway, MemoryBlobStore, RegistryAuth, RegistryManager};
//!
//! #[tokio::main]
//! async fn main() -> playervault_core::Result<()> {
//!     let registry = RegistryManager::initialize("/srv/minecraft").await?;
//!     let gateway = ImageGateway::new(
//!         Arc::new(RegistryAuth::new(registry.store())),
//!         Arc::new(MemoryBlobStore::new()),
//!     );
//!
//!     let images = gateway.list_images("Steve").await?;
//!     println!("Steve has {} images", images.len());
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod registry;
pub mod storage;

// Re-export commonly used types
pub use auth::{AuthSettings, AuthSource, RegistryAuth, RemoteAuth, SqliteAuth};
pub use config::{AuthBackend, RegistryOptions};
pub use error::{DecodeError, Result, VaultError};
pub use gateway::{GatewayOptions, ImageGateway, ImageRef, ImageUrlScheme};
pub use registry::{
    Identity, NbtRecordDecoder, RecordDecoder, RegistryManager, RegistryStatus, RegistryStore,
    WatcherState, WorldDirectory, WorldScanner, WorldWatcher,
};
pub use storage::{BlobObject, BlobStore, LocalBlobStore, MemoryBlobStore};
