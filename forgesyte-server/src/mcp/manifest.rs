//! Discovery manifest generation and its TTL cache.
//!
//! The cache itself is grounded on the source's per-entry TTL cache
//! (`ManifestCacheService`): lazy expiry on access rather than a background
//! sweep, one lock, one `(value, created_at)` pair. Here there's a single
//! cached document rather than one per plugin, since the manifest is one
//! snapshot of the whole registry.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

use forgesyte_core::{PluginMetadata, PluginRegistry};

#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub id: String,
    pub title: String,
    pub description: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub endpoint: String,
    pub required_permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
    pub tools: Vec<ToolDescriptor>,
}

/// A plugin's metadata qualifies for the manifest when it names itself and
/// declares at least one tool, and its config schema (if any) is itself a
/// JSON object rather than some other scalar.
fn validate_metadata(metadata: &PluginMetadata) -> bool {
    if metadata.name.trim().is_empty() || metadata.tools.is_empty() {
        return false;
    }
    match &metadata.config_schema {
        Some(schema) => schema.is_object(),
        None => true,
    }
}

/// Walks the registry's available plugins and builds the manifest document,
/// skipping (and logging once for) any plugin whose metadata doesn't pass
/// [`validate_metadata`].
pub async fn generate_manifest(
    registry: &PluginRegistry,
    server_name: &str,
    server_version: &str,
    protocol_version: &str,
) -> Manifest {
    let mut tools = Vec::new();
    for status in registry.list_available().await {
        let metadata = &status.metadata;
        if !validate_metadata(metadata) {
            tracing::warn!(plugin = %metadata.name, "skipping plugin with invalid metadata during manifest generation");
            continue;
        }
        tools.push(ToolDescriptor {
            id: format!("forgesyte.{}", metadata.name),
            title: metadata.name.clone(),
            description: metadata.description.clone(),
            inputs: metadata.input_types.clone(),
            outputs: metadata.output_types.clone(),
            endpoint: "/v1/analyze".to_string(),
            required_permissions: metadata.permissions.clone(),
        });
    }

    Manifest {
        name: server_name.to_string(),
        version: server_version.to_string(),
        protocol_version: protocol_version.to_string(),
        tools,
    }
}

/// A single cached manifest document with a fixed TTL, consulted before any
/// regeneration and invalidated explicitly on registry mutation.
pub struct ManifestCache {
    ttl: Duration,
    inner: RwLock<Option<(Value, Instant)>>,
}

impl ManifestCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(None),
        }
    }

    /// Returns the cached manifest if present and not expired, lazily
    /// dropping it otherwise.
    pub async fn get(&self) -> Option<Value> {
        {
            let guard = self.inner.read().await;
            match guard.as_ref() {
                Some((value, created_at)) if created_at.elapsed() <= self.ttl => {
                    return Some(value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        let mut guard = self.inner.write().await;
        if matches!(guard.as_ref(), Some((_, created_at)) if created_at.elapsed() > self.ttl) {
            *guard = None;
        }
        None
    }

    pub async fn set(&self, manifest: Value) {
        *self.inner.write().await = Some((manifest, Instant::now()));
    }

    pub async fn invalidate(&self) {
        *self.inner.write().await = None;
    }

    /// Returns the cached manifest, regenerating via `generate` on a miss or
    /// expiry and populating the cache with the fresh value.
    pub async fn get_or_generate<F, Fut>(&self, generate: F) -> Value
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Value>,
    {
        if let Some(cached) = self.get().await {
            return cached;
        }
        let fresh = generate().await;
        self.set(fresh.clone()).await;
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn miss_then_generate_then_hit() {
        let cache = ManifestCache::new(Duration::from_secs(60));
        assert!(cache.get().await.is_none());

        let value = cache
            .get_or_generate(|| async { json!({"tools": []}) })
            .await;
        assert_eq!(value, json!({"tools": []}));
        assert_eq!(cache.get().await, Some(json!({"tools": []})));
    }

    #[tokio::test]
    async fn expired_entry_is_dropped_on_access() {
        let cache = ManifestCache::new(Duration::from_millis(1));
        cache.set(json!({"tools": []})).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get().await.is_none());
    }

    #[tokio::test]
    async fn invalidate_clears_the_cache() {
        let cache = ManifestCache::new(Duration::from_secs(60));
        cache.set(json!({"tools": []})).await;
        cache.invalidate().await;
        assert!(cache.get().await.is_none());
    }

    #[test]
    fn metadata_without_tools_fails_validation() {
        let metadata = PluginMetadata {
            name: "empty".to_string(),
            description: String::new(),
            version: "0.1.0".to_string(),
            input_types: vec![],
            output_types: vec![],
            permissions: vec![],
            config_schema: None,
            tools: vec![],
            default_tool: None,
        };
        assert!(!validate_metadata(&metadata));
    }
}
