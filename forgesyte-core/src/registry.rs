//! Plugin registry: lifecycle state tracking, metrics, and the
//! process-singleton lookup table the rest of the execution plane reads
//! plugins through.

use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::error::CoreError;
use crate::plugin::{PluginHandler, PluginMetadata};

const METRICS_WINDOW: usize = 10;

/// Where a plugin sits in its lifecycle. `Failed` and `Unavailable` are
/// reachable from any other state and are never cleared automatically —
/// recovery requires an explicit `mark_initialized`/`mark_running` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LifecycleState {
    Loaded,
    Initialized,
    Running,
    Failed { reason: String },
    Unavailable { reason: String },
}

impl LifecycleState {
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, LifecycleState::Failed { .. } | LifecycleState::Unavailable { .. })
    }
}

/// Rolling execution statistics for one plugin.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PluginMetrics {
    pub successes: u64,
    pub errors: u64,
    #[serde(skip)]
    recent_durations_ms: VecDeque<u64>,
    pub last_duration_ms: Option<u64>,
}

impl PluginMetrics {
    fn record(&mut self, duration_ms: u64, ok: bool) {
        if ok {
            self.successes += 1;
        } else {
            self.errors += 1;
        }
        self.last_duration_ms = Some(duration_ms);
        self.recent_durations_ms.push_back(duration_ms);
        if self.recent_durations_ms.len() > METRICS_WINDOW {
            self.recent_durations_ms.pop_front();
        }
    }

    pub fn average_duration_ms(&self) -> Option<f64> {
        if self.recent_durations_ms.is_empty() {
            return None;
        }
        let sum: u64 = self.recent_durations_ms.iter().sum();
        Some(sum as f64 / self.recent_durations_ms.len() as f64)
    }
}

/// A plugin's registry-owned state: its runtime handle, lifecycle, and
/// accumulated metrics.
pub struct PluginRecord {
    pub handle: Arc<dyn PluginHandler>,
    pub state: LifecycleState,
    pub metrics: PluginMetrics,
    pub loaded_at: chrono::DateTime<chrono::Utc>,
    pub last_used_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Snapshot view of a [`PluginRecord`] safe to serialize and hand out of
/// the registry without holding its lock.
#[derive(Debug, Clone, Serialize)]
pub struct PluginStatus {
    pub metadata: PluginMetadata,
    pub state: LifecycleState,
    pub metrics: PluginMetrics,
    pub loaded_at: chrono::DateTime<chrono::Utc>,
    pub last_used_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Concurrent lookup table mapping plugin name to its record. Reads
/// (`get`, `list_all`, `status`) and writes (`mark_*`, `record_execution`)
/// each hold only their own entry's lock, so one plugin's execution never
/// blocks another's.
pub struct PluginRegistry {
    plugins: DashMap<String, RwLock<PluginRecord>>,
}

static REGISTRY: OnceLock<PluginRegistry> = OnceLock::new();

impl PluginRegistry {
    /// Construct a standalone registry. Production code should use
    /// [`PluginRegistry::global`]; this constructor exists for tests that
    /// want isolation from process-wide state.
    pub fn new() -> Self {
        Self {
            plugins: DashMap::new(),
        }
    }

    /// The process-wide registry instance, initialized on first access.
    pub fn global() -> &'static PluginRegistry {
        REGISTRY.get_or_init(PluginRegistry::new)
    }

    /// Register a plugin in the `Loaded` state. Overwrites any existing
    /// record under the same name.
    pub fn register(&self, handle: Arc<dyn PluginHandler>) {
        let name = handle.metadata().name.clone();
        self.plugins.insert(
            name,
            RwLock::new(PluginRecord {
                handle,
                state: LifecycleState::Loaded,
                metrics: PluginMetrics::default(),
                loaded_at: chrono::Utc::now(),
                last_used_at: None,
            }),
        );
    }

    pub async fn mark_initialized(&self, name: &str) -> Result<(), CoreError> {
        self.transition(name, LifecycleState::Initialized).await
    }

    pub async fn mark_running(&self, name: &str) -> Result<(), CoreError> {
        self.transition(name, LifecycleState::Running).await
    }

    pub async fn mark_failed(&self, name: &str, reason: impl Into<String>) -> Result<(), CoreError> {
        let reason = reason.into();
        warn!(plugin = name, reason = %reason, "plugin marked failed");
        self.transition(name, LifecycleState::Failed { reason }).await
    }

    pub async fn mark_unavailable(&self, name: &str, reason: impl Into<String>) -> Result<(), CoreError> {
        let reason = reason.into();
        warn!(plugin = name, reason = %reason, "plugin marked unavailable");
        self.transition(name, LifecycleState::Unavailable { reason }).await
    }

    async fn transition(&self, name: &str, state: LifecycleState) -> Result<(), CoreError> {
        let entry = self
            .plugins
            .get(name)
            .ok_or_else(|| CoreError::PluginNotFound { name: name.to_string() })?;
        let mut record = entry.write().await;
        record.state = state;
        Ok(())
    }

    /// Record the outcome of a tool invocation: updates metrics and
    /// `last_used_at`. Called exactly once per `ToolRunner::execute` call.
    pub async fn record_execution(&self, name: &str, duration_ms: u64, ok: bool) -> Result<(), CoreError> {
        let entry = self
            .plugins
            .get(name)
            .ok_or_else(|| CoreError::PluginNotFound { name: name.to_string() })?;
        let mut record = entry.write().await;
        record.metrics.record(duration_ms, ok);
        record.last_used_at = Some(chrono::Utc::now());
        Ok(())
    }

    /// Fetch the runtime handle for a plugin, regardless of lifecycle
    /// state. Callers that require `Running` should check `status` first.
    pub async fn get(&self, name: &str) -> Result<Arc<dyn PluginHandler>, CoreError> {
        let entry = self
            .plugins
            .get(name)
            .ok_or_else(|| CoreError::PluginNotFound { name: name.to_string() })?;
        let record = entry.read().await;
        Ok(record.handle.clone())
    }

    pub async fn status(&self, name: &str) -> Result<PluginStatus, CoreError> {
        let entry = self
            .plugins
            .get(name)
            .ok_or_else(|| CoreError::PluginNotFound { name: name.to_string() })?;
        let record = entry.read().await;
        Ok(PluginStatus {
            metadata: record.handle.metadata(),
            state: record.state.clone(),
            metrics: record.metrics.clone(),
            loaded_at: record.loaded_at,
            last_used_at: record.last_used_at,
        })
    }

    /// All registered plugins, including failed and unavailable ones.
    pub async fn list_all(&self) -> Vec<PluginStatus> {
        let mut out = Vec::with_capacity(self.plugins.len());
        for entry in self.plugins.iter() {
            let record = entry.value().read().await;
            out.push(PluginStatus {
                metadata: record.handle.metadata(),
                state: record.state.clone(),
                metrics: record.metrics.clone(),
                loaded_at: record.loaded_at,
                last_used_at: record.last_used_at,
            });
        }
        out
    }

    /// Plugins in `Initialized` or `Running` state — the set eligible to
    /// accept tool calls.
    pub async fn list_available(&self) -> Vec<PluginStatus> {
        self.list_all()
            .await
            .into_iter()
            .filter(|s| matches!(s.state, LifecycleState::Initialized | LifecycleState::Running))
            .collect()
    }

    /// Verifies the three startup assertions: (a) the registry is non-empty
    /// iff at least one plugin was supplied, (b) every supplied name is
    /// actually registered, and (c) every registered plugin carries a
    /// non-absent lifecycle state (true by construction — `register` always
    /// sets one — but asserted here rather than assumed). Also checks that
    /// every registered plugin exposes at least one tool, an additional
    /// sanity check with no direct counterpart in the three assertions.
    /// Under `strict` a violation panics; otherwise it is logged at error
    /// level and the process continues with the offending plugin (if any)
    /// left unavailable.
    pub async fn startup_self_audit(&self, supplied: &[String], strict: bool) {
        // (a) non-empty iff at least one plugin was supplied.
        let registry_is_empty = self.plugins.is_empty();
        if registry_is_empty != supplied.is_empty() {
            let msg = format!(
                "startup audit: registry holds {} plugin(s) but {} were supplied",
                self.plugins.len(),
                supplied.len()
            );
            if strict {
                panic!("{msg}");
            }
            error!("{msg}");
        }

        // (b) every supplied name is present.
        for name in supplied {
            if self.plugins.get(name).is_none() {
                let msg = format!("startup audit: plugin '{name}' was configured but never registered");
                if strict {
                    panic!("{msg}");
                }
                error!("{msg}");
            }
        }

        // (c) every present plugin has a non-absent lifecycle state: held
        // trivially by construction, since `register` always assigns `Loaded`
        // and no path removes a record's state. Nothing further to assert.
        let names: Vec<String> = self.plugins.iter().map(|e| e.key().clone()).collect();
        for name in &names {
            let entry = self.plugins.get(name).expect("just listed");
            let tools_empty = entry.read().await.handle.metadata().tools.is_empty();
            drop(entry);
            if tools_empty {
                let msg = format!("startup audit: plugin '{name}' exposes no tools");
                if strict {
                    panic!("{msg}");
                } else {
                    error!("{msg}");
                    let _ = self.mark_unavailable(name, "no tools exposed").await;
                }
            }
        }
        info!(registered = self.plugins.len(), "startup self-audit complete");
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::EchoPlugin;
    use futures::FutureExt;

    fn echo(name: &str) -> Arc<dyn PluginHandler> {
        Arc::new(EchoPlugin::new(name, vec!["detect".to_string()]))
    }

    #[tokio::test]
    async fn register_then_get_roundtrips() {
        let registry = PluginRegistry::new();
        registry.register(echo("alpha"));
        let handle = registry.get("alpha").await.unwrap();
        assert_eq!(handle.metadata().name, "alpha");
    }

    #[tokio::test]
    async fn unknown_plugin_is_not_found() {
        let registry = PluginRegistry::new();
        assert!(matches!(
            registry.get("missing").await,
            Err(CoreError::PluginNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn lifecycle_transitions_and_recovery() {
        let registry = PluginRegistry::new();
        registry.register(echo("alpha"));
        registry.mark_initialized("alpha").await.unwrap();
        registry.mark_running("alpha").await.unwrap();
        registry.mark_failed("alpha", "backend crashed").await.unwrap();
        let status = registry.status("alpha").await.unwrap();
        assert!(status.state.is_terminal_failure());
        registry.mark_initialized("alpha").await.unwrap();
        let status = registry.status("alpha").await.unwrap();
        assert_eq!(status.state, LifecycleState::Initialized);
    }

    #[tokio::test]
    async fn list_available_excludes_failed() {
        let registry = PluginRegistry::new();
        registry.register(echo("alpha"));
        registry.register(echo("beta"));
        registry.mark_initialized("alpha").await.unwrap();
        registry.mark_failed("beta", "nope").await.unwrap();
        let available = registry.list_available().await;
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].metadata.name, "alpha");
    }

    #[tokio::test]
    async fn metrics_window_is_bounded() {
        let registry = PluginRegistry::new();
        registry.register(echo("alpha"));
        for i in 0..15u64 {
            registry.record_execution("alpha", i, true).await.unwrap();
        }
        let status = registry.status("alpha").await.unwrap();
        assert_eq!(status.metrics.successes, 15);
        assert_eq!(status.metrics.recent_durations_ms.len(), METRICS_WINDOW);
    }

    #[tokio::test]
    async fn strict_audit_panics_on_missing_plugin() {
        let registry = PluginRegistry::new();
        let result = std::panic::AssertUnwindSafe(registry.startup_self_audit(&["missing".to_string()], true))
            .catch_unwind()
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn strict_audit_passes_on_an_empty_registry_with_nothing_supplied() {
        let registry = PluginRegistry::new();
        let result = std::panic::AssertUnwindSafe(registry.startup_self_audit(&[], true))
            .catch_unwind()
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn strict_audit_panics_when_registry_is_non_empty_but_nothing_was_supplied() {
        let registry = PluginRegistry::new();
        registry.register(echo("alpha"));
        let result = std::panic::AssertUnwindSafe(registry.startup_self_audit(&[], true))
            .catch_unwind()
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn non_strict_audit_logs_but_does_not_panic_on_empty_mismatch() {
        let registry = PluginRegistry::new();
        registry.register(echo("alpha"));
        registry.startup_self_audit(&[], false).await;
        assert!(registry.get("alpha").await.is_ok());
    }
}
