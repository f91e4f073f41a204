//! Centralized configuration for PlayerVault.
//!
//! Compile-time defaults live as associated constants; runtime options are
//! plain structs with `Default` impls built from those constants.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// World discovery and record layout.
pub struct RegistryConfig;

impl RegistryConfig {
    /// World directories are immediate children of the root starting with this.
    pub const WORLD_PREFIX: &'static str = "world";
    pub const RECORD_DIR_NAME: &'static str = "playerdata";
    pub const RECORD_EXTENSION: &'static str = "dat";
    /// Compound that holds the player's name inside a record.
    pub const NAME_COMPOUND: &'static str = "bukkit";
    pub const NAME_FIELD: &'static str = "lastKnownName";
}

/// Blob store and authorization backend settings.
pub struct StoreConfig;

impl StoreConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const AUTH_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DB_BUSY_TIMEOUT_MS: u64 = 5_000;
    pub const USER_AGENT: &'static str = "PlayerVault/0.1";
}

/// Public URL convention for stored images.
pub struct UrlConfig;

impl UrlConfig {
    pub const DEFAULT_BUCKET: &'static str = "playervault";
    pub const DEFAULT_REGION: &'static str = "ap-shanghai";
    pub const URL_TEMPLATE: &'static str = "https://{bucket}.cos.{region}.myqcloud.com/{key}";
}

/// Runtime options for world discovery and scanning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryOptions {
    pub world_prefix: String,
    pub record_dir_name: String,
    pub record_extension: String,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            world_prefix: RegistryConfig::WORLD_PREFIX.to_string(),
            record_dir_name: RegistryConfig::RECORD_DIR_NAME.to_string(),
            record_extension: RegistryConfig::RECORD_EXTENSION.to_string(),
        }
    }
}

/// Which authorization source gates the image gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthBackend {
    /// Membership in the registry built from world directories.
    #[default]
    Registry,
    /// Existence check against a users table.
    Database,
    /// Lookup against a remote auth service.
    Remote,
}

impl AuthBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthBackend::Registry => "registry",
            AuthBackend::Database => "database",
            AuthBackend::Remote => "remote",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "registry" => Some(AuthBackend::Registry),
            "database" | "db" => Some(AuthBackend::Database),
            "remote" => Some(AuthBackend::Remote),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuthBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
