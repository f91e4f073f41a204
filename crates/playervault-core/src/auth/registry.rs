//! Authorization backed by the live world registry.

use async_trait::async_trait;
use std::sync::Arc;

use super::AuthSource;
use crate::error::Result;
use crate::registry::RegistryStore;

/// Subjects are known when they appear in the world registry.
pub struct RegistryAuth {
    store: Arc<RegistryStore>,
}

impl RegistryAuth {
    pub fn new(store: Arc<RegistryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AuthSource for RegistryAuth {
    async fn is_known(&self, subject: &str) -> Result<bool> {
        Ok(self.store.contains(subject).await)
    }

    fn name(&self) -> &'static str {
        "registry"
    }
}
