//! Authorization sources for the image gateway.
//!
//! The gateway only asks one question, "is this subject known?", and does
//! not care who answers it. Three answers are available:
//!
//! - [`RegistryAuth`]: membership in the registry built from world directories
//! - [`SqliteAuth`]: existence of a row in a users table
//! - [`RemoteAuth`]: lookup against a remote auth service
//!
//! [`AuthSettings::build`] picks one according to configuration.

mod registry;
mod remote;
mod sqlite;

pub use registry::RegistryAuth;
pub use remote::RemoteAuth;
pub use sqlite::SqliteAuth;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AuthBackend, StoreConfig};
use crate::error::{Result, VaultError};
use crate::registry::RegistryStore;

/// Decides whether a subject may use the image gateway.
#[async_trait]
pub trait AuthSource: Send + Sync {
    /// Whether `subject` is a known user.
    ///
    /// `Ok(false)` is a definite no. Errors mean the source could not answer.
    async fn is_known(&self, subject: &str) -> Result<bool>;

    /// Short name for logs and status output.
    fn name(&self) -> &'static str;
}

/// Configuration for building an [`AuthSource`].
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub backend: AuthBackend,
    /// SQLite database for [`AuthBackend::Database`].
    pub database_path: Option<PathBuf>,
    /// Base URL for [`AuthBackend::Remote`].
    pub remote_url: Option<String>,
    pub remote_timeout: Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            backend: AuthBackend::default(),
            database_path: None,
            remote_url: None,
            remote_timeout: StoreConfig::AUTH_REQUEST_TIMEOUT,
        }
    }
}

impl AuthSettings {
    /// Build the configured source.
    ///
    /// `registry` is required for [`AuthBackend::Registry`] and ignored otherwise.
    pub fn build(&self, registry: Option<Arc<RegistryStore>>) -> Result<Arc<dyn AuthSource>> {
        match self.backend {
            AuthBackend::Registry => {
                let store = registry.ok_or_else(|| VaultError::Config {
                    message: "registry auth requires a world root".to_string(),
                })?;
                Ok(Arc::new(RegistryAuth::new(store)))
            }
            AuthBackend::Database => {
                let path = self.database_path.as_ref().ok_or_else(|| VaultError::Config {
                    message: "database auth requires a database path".to_string(),
                })?;
                Ok(Arc::new(SqliteAuth::open_at(path)?))
            }
            AuthBackend::Remote => {
                let url = self.remote_url.as_deref().ok_or_else(|| VaultError::Config {
                    message: "remote auth requires a service URL".to_string(),
                })?;
                Ok(Arc::new(RemoteAuth::with_timeout(url, self.remote_timeout)?))
            }
        }
    }
}
