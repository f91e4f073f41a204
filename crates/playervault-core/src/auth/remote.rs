//! Remote auth service lookup.
//!
//! The service answers `GET {base}/{code}` with the display name bound to an
//! opaque code. A 404 means the code is unknown.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::AuthSource;
use crate::config::StoreConfig;
use crate::error::{Result, VaultError};

/// Subjects are known when the remote service resolves them to a name.
pub struct RemoteAuth {
    client: Client,
    base: Url,
}

impl RemoteAuth {
    /// Create a client with the default request timeout.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, StoreConfig::AUTH_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url).map_err(|e| VaultError::Config {
            message: format!("Invalid auth service URL {}: {}", base_url, e),
        })?;
        if base.cannot_be_a_base() {
            return Err(VaultError::Config {
                message: format!("Auth service URL cannot be a base: {}", base_url),
            });
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(StoreConfig::USER_AGENT)
            .build()
            .map_err(|e| VaultError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(e),
            })?;

        Ok(Self { client, base })
    }

    fn lookup_url(&self, code: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(code);
        }
        url
    }

    /// Resolve `code` to its display name, or `None` if the service does
    /// not know it.
    pub async fn display_name(&self, code: &str) -> Result<Option<String>> {
        let url = self.lookup_url(code);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| VaultError::Network {
                message: format!("GET {} failed: {}", url, e),
                source: Some(e),
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!("Auth service does not know {}", code);
                Ok(None)
            }
            status if status.is_success() => {
                let body: Value = response.json().await.map_err(|e| VaultError::Network {
                    message: format!("Invalid auth response from {}: {}", url, e),
                    source: Some(e),
                })?;
                Ok(extract_display_name(&body))
            }
            status => {
                warn!("Auth service returned {} for {}", status, url);
                Err(VaultError::Network {
                    message: format!("Auth service returned {}", status),
                    source: None,
                })
            }
        }
    }
}

/// Accept a bare JSON string or an object with a name-like field.
fn extract_display_name(body: &Value) -> Option<String> {
    let name = match body {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => ["display_name", "name", "username"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str)),
        _ => None,
    }?;
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

#[async_trait]
impl AuthSource for RemoteAuth {
    async fn is_known(&self, subject: &str) -> Result<bool> {
        Ok(self.display_name(subject).await?.is_some())
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}
