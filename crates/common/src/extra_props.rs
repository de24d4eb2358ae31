//! Sidecar metadata for resources.
//!
//! A filesystem has nowhere to keep a content digest, the filename a client
//! supplied at upload, or a "touched" marker for a directory. The connector keeps
//! those here, keyed by `(resource id, property name)`. Entries never expire; they
//! are overwritten on store and dropped when the resource is removed.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

/// Cached `urn:sha1:<hex>` digest of a binary.
pub const CONTENT_DIGEST: &str = "content_digest";
/// Filename supplied via `Content-Disposition` when the binary was stored.
pub const ORIGINAL_NAME: &str = "original_name";
/// Mime type supplied via `Content-Type` when the binary was stored.
pub const MIME_TYPE: &str = "mime_type";
/// RFC 3339 timestamp of the last child mutation below a container.
pub const TOUCHED_AT: &str = "touched_at";

#[derive(Debug, thiserror::Error)]
pub enum ExtraPropertiesError {
    #[error("extra properties backend error: {0}")]
    Backend(String),
}

/// Key/value store for metadata that cannot live in the filesystem itself.
///
/// Implementations must tolerate concurrent callers working on different ids.
#[async_trait]
pub trait ExtraPropertiesStore: std::fmt::Debug + Send + Sync {
    async fn get(&self, id: &str, name: &str) -> Result<Option<String>, ExtraPropertiesError>;

    async fn get_all(&self, id: &str) -> Result<BTreeMap<String, String>, ExtraPropertiesError>;

    /// Create or overwrite a single property.
    async fn store(&self, id: &str, name: &str, value: &str) -> Result<(), ExtraPropertiesError>;

    /// Returns whether the property existed.
    async fn remove(&self, id: &str, name: &str) -> Result<bool, ExtraPropertiesError>;

    /// Drop every property of `id`.
    async fn remove_all(&self, id: &str) -> Result<(), ExtraPropertiesError>;

    /// Cheap liveness probe for readiness checks.
    async fn ping(&self) -> Result<(), ExtraPropertiesError> {
        Ok(())
    }
}

/// In-process store, used by tests and ephemeral deployments.
#[derive(Debug, Clone, Default)]
pub struct MemoryExtraProperties {
    inner: Arc<RwLock<HashMap<String, BTreeMap<String, String>>>>,
}

impl MemoryExtraProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of resources with at least one property.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[async_trait]
impl ExtraPropertiesStore for MemoryExtraProperties {
    async fn get(&self, id: &str, name: &str) -> Result<Option<String>, ExtraPropertiesError> {
        Ok(self
            .inner
            .read()
            .get(id)
            .and_then(|props| props.get(name).cloned()))
    }

    async fn get_all(&self, id: &str) -> Result<BTreeMap<String, String>, ExtraPropertiesError> {
        Ok(self.inner.read().get(id).cloned().unwrap_or_default())
    }

    async fn store(&self, id: &str, name: &str, value: &str) -> Result<(), ExtraPropertiesError> {
        self.inner
            .write()
            .entry(id.to_string())
            .or_default()
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, id: &str, name: &str) -> Result<bool, ExtraPropertiesError> {
        let mut guard = self.inner.write();
        let Some(props) = guard.get_mut(id) else {
            return Ok(false);
        };
        let existed = props.remove(name).is_some();
        if props.is_empty() {
            guard.remove(id);
        }
        Ok(existed)
    }

    async fn remove_all(&self, id: &str) -> Result<(), ExtraPropertiesError> {
        self.inner.write().remove(id);
        Ok(())
    }
}
