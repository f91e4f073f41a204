//! Error types for PlayerVault.
//!
//! Per-record decode failures have their own type ([`DecodeError`]) because
//! they are absorbed by the scanner. Everything that reaches a caller is a
//! [`VaultError`].

use std::path::PathBuf;
use thiserror::Error;

pub use crate::registry::record::DecodeError;

/// Main error type for PlayerVault.
#[derive(Debug, Error)]
pub enum VaultError {
    // Registry errors
    #[error("Failed to decode record {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },

    #[error("Failed to scan {path:?}: {message}")]
    Scan {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Failed to watch {path:?}: {message}")]
    WatchSetup {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<notify::Error>,
    },

    // Gateway errors
    #[error("Unknown subject: {subject}")]
    Unauthorized { subject: String },

    #[error("Blob store unavailable during {operation}: {message}")]
    StoreUnavailable { operation: String, message: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Authorization source errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for PlayerVault operations.
pub type Result<T> = std::result::Result<T, VaultError>;

impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        VaultError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for VaultError {
    fn from(err: rusqlite::Error) -> Self {
        VaultError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for VaultError {
    fn from(err: reqwest::Error) -> Self {
        VaultError::Network {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl VaultError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        VaultError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a scan error for an unreadable record directory.
    pub fn scan(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        VaultError::Scan {
            path: path.into(),
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Create a store error for a failed blob-store call.
    pub fn store(operation: &str, message: impl Into<String>) -> Self {
        VaultError::StoreUnavailable {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Map to the HTTP status code the service layer should answer with.
    ///
    /// Unknown subjects answer 404, matching the behavior clients of the
    /// image service already rely on.
    pub fn http_status(&self) -> u16 {
        match self {
            VaultError::Unauthorized { .. } => 404,
            VaultError::Validation { .. } => 400,
            VaultError::StoreUnavailable { .. } => 503,
            VaultError::Network { .. } => 502,
            _ => 500,
        }
    }

    /// Whether the caller may reasonably retry the operation later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            VaultError::StoreUnavailable { .. }
                | VaultError::Network { .. }
                | VaultError::WatchSetup { .. }
        )
    }
}
