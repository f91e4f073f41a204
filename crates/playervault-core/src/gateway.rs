//! Authorization-checked image operations.
//!
//! Every operation validates its inputs, asks the configured
//! [`AuthSource`] whether the subject is known, and only then touches the
//! [`BlobStore`]. Images live under `subject/<uuid>`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::AuthSource;
use crate::config::{StoreConfig, UrlConfig};
use crate::error::{Result, VaultError};
use crate::storage::BlobStore;

/// How public image URLs are derived from object keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrlScheme {
    pub bucket: String,
    pub region: String,
    /// Template with `{bucket}`, `{region}` and `{key}` placeholders.
    pub template: String,
}

impl Default for ImageUrlScheme {
    fn default() -> Self {
        Self {
            bucket: UrlConfig::DEFAULT_BUCKET.to_string(),
            region: UrlConfig::DEFAULT_REGION.to_string(),
            template: UrlConfig::URL_TEMPLATE.to_string(),
        }
    }
}

impl ImageUrlScheme {
    pub fn new(bucket: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            ..Self::default()
        }
    }

    /// Public URL for `key`. Each key segment is percent-encoded.
    pub fn url_for(&self, key: &str) -> String {
        let encoded = key
            .split('/')
            .map(|seg| urlencoding::encode(seg).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        self.template
            .replace("{bucket}", &self.bucket)
            .replace("{region}", &self.region)
            .replace("{key}", &encoded)
    }
}

/// A stored image and the URLs it can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub id: String,
    pub key: String,
    /// Full-size image URL.
    pub original: String,
    /// Cover-size image URL.
    pub cover: String,
}

impl ImageRef {
    /// Build a reference from an object key of the form `subject/id`.
    pub fn from_key(key: &str, scheme: &ImageUrlScheme) -> Option<Self> {
        let (_, id) = key.split_once('/')?;
        if id.is_empty() || id.contains('/') {
            return None;
        }
        let url = scheme.url_for(key);
        Some(Self {
            id: id.to_string(),
            key: key.to_string(),
            original: url.clone(),
            cover: url,
        })
    }

    /// The subject this image belongs to.
    pub fn subject(&self) -> &str {
        self.key.split_once('/').map(|(s, _)| s).unwrap_or("")
    }
}

/// Gateway settings.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Upper bound for each blob-store call.
    pub request_timeout: Duration,
    pub url_scheme: ImageUrlScheme,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            request_timeout: StoreConfig::REQUEST_TIMEOUT,
            url_scheme: ImageUrlScheme::default(),
        }
    }
}

/// Facade over the blob store that only serves known subjects.
#[derive(Clone)]
pub struct ImageGateway {
    auth: Arc<dyn AuthSource>,
    store: Arc<dyn BlobStore>,
    options: GatewayOptions,
}

impl ImageGateway {
    pub fn new(auth: Arc<dyn AuthSource>, store: Arc<dyn BlobStore>) -> Self {
        Self::with_options(auth, store, GatewayOptions::default())
    }

    pub fn with_options(
        auth: Arc<dyn AuthSource>,
        store: Arc<dyn BlobStore>,
        options: GatewayOptions,
    ) -> Self {
        Self {
            auth,
            store,
            options,
        }
    }

    /// Name of the authorization source in use.
    pub fn auth_source(&self) -> &'static str {
        self.auth.name()
    }

    /// Whether `subject` may use the gateway. Malformed subjects are not known.
    pub async fn check_subject(&self, subject: &str) -> Result<bool> {
        if validate_segment("subject", subject).is_err() {
            return Ok(false);
        }
        self.auth.is_known(subject).await
    }

    /// All images stored for `subject`, in key order.
    pub async fn list_images(&self, subject: &str) -> Result<Vec<ImageRef>> {
        self.authorize(subject).await?;
        let prefix = format!("{}/", subject);
        let objects = self.call_store("list", self.store.list(&prefix)).await?;

        let mut images: Vec<ImageRef> = objects
            .iter()
            .filter_map(|obj| ImageRef::from_key(&obj.key, &self.options.url_scheme))
            .collect();
        images.sort_by(|a, b| a.key.cmp(&b.key));
        debug!("Listed {} images for {}", images.len(), subject);
        Ok(images)
    }

    /// Store `content` as a new image for `subject`.
    pub async fn upload_image(&self, subject: &str, content: Bytes) -> Result<ImageRef> {
        self.authorize(subject).await?;
        let id = Uuid::new_v4().to_string();
        let key = format!("{}/{}", subject, id);
        let size = content.len();

        self.call_store("put", self.store.put(&key, content)).await?;
        info!("Stored image {} ({} bytes)", key, size);

        ImageRef::from_key(&key, &self.options.url_scheme).ok_or_else(|| VaultError::Validation {
            field: "key".to_string(),
            message: format!("generated key {:?} is not subject/id", key),
        })
    }

    /// Delete image `id` of `subject`. Deleting a missing image succeeds.
    pub async fn delete_image(&self, subject: &str, id: &str) -> Result<()> {
        validate_segment("id", id)?;
        self.authorize(subject).await?;
        let key = format!("{}/{}", subject, id);
        self.call_store("delete", self.store.delete(&key)).await?;
        info!("Deleted image {}", key);
        Ok(())
    }

    async fn authorize(&self, subject: &str) -> Result<()> {
        validate_segment("subject", subject)?;
        if self.auth.is_known(subject).await? {
            Ok(())
        } else {
            debug!("Rejected unknown subject {:?} ({})", subject, self.auth.name());
            Err(VaultError::Unauthorized {
                subject: subject.to_string(),
            })
        }
    }

    /// Run a store call under the request timeout, surfacing failures as
    /// [`VaultError::StoreUnavailable`].
    async fn call_store<T, F>(&self, operation: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.options.request_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e @ (VaultError::StoreUnavailable { .. } | VaultError::Validation { .. }))) => {
                Err(e)
            }
            Ok(Err(e)) => Err(VaultError::store(operation, e.to_string())),
            Err(_) => Err(VaultError::store(
                operation,
                format!("timed out after {:?}", self.options.request_timeout),
            )),
        }
    }
}

/// A subject or image id must be a single non-empty key segment.
fn validate_segment(field: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.contains('/') || value == "." || value == ".." {
        return Err(VaultError::Validation {
            field: field.to_string(),
            message: format!("{:?} is not a valid {}", value, field),
        });
    }
    Ok(())
}
