//! The innermost layer of the execution chain. This module contains the
//! one and only call site for `PluginHandler::run_tool` anywhere in the
//! workspace — every other layer routes through `ToolRunner::execute`.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{info, instrument};

use crate::error::CoreError;
use crate::plugin::JsonMap;
use crate::registry::PluginRegistry;

/// Mime types the execution chain recognizes for an input artifact.
const RECOGNIZED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/webp",
    "application/octet-stream",
    "video/mp4",
];

/// Validated input handed to a plugin's tool handler.
#[derive(Debug, Clone)]
pub struct ToolInput {
    pub arguments: JsonMap,
    pub mime_type: String,
}

impl ToolInput {
    /// Validate the envelope: arguments must carry a non-empty opaque
    /// `artifact` field and `mime_type` must be recognized.
    pub fn validate(arguments: JsonMap, mime_type: String) -> Result<Self, CoreError> {
        let artifact_present = arguments
            .get("artifact")
            .map(|v| !matches!(v, Value::Null) && v != &Value::String(String::new()))
            .unwrap_or(false);
        if !artifact_present {
            return Err(CoreError::InputValidation {
                message: "arguments must contain a non-empty 'artifact' field".to_string(),
            });
        }
        if !RECOGNIZED_MIME_TYPES.contains(&mime_type.as_str()) {
            return Err(CoreError::InputValidation {
                message: format!("unrecognized mime type '{mime_type}'"),
            });
        }
        Ok(Self { arguments, mime_type })
    }
}

/// Validates a plugin's returned mapping against the output contract: it
/// must be non-empty and free of error sentinels.
fn validate_output(output: &JsonMap) -> Result<(), CoreError> {
    if output.is_empty() {
        return Err(CoreError::OutputValidation {
            message: "plugin returned an empty result mapping".to_string(),
        });
    }
    if output.get("error").is_some() {
        return Err(CoreError::OutputValidation {
            message: "plugin result mapping carries an 'error' field".to_string(),
        });
    }
    Ok(())
}

/// Runs a single named tool on a registered plugin. Holds no state of its
/// own beyond the registry handle — every invocation resolves the plugin
/// fresh, so lifecycle changes made between calls are always honored.
pub struct ToolRunner {
    registry: Arc<PluginRegistry>,
}

impl ToolRunner {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self { registry }
    }

    /// Resolve `plugin_name`, validate the input envelope, invoke its
    /// `tool_name` handler — the only call to `PluginHandler::run_tool` in
    /// the workspace — validate the output, and record execution metrics.
    #[instrument(skip(self, arguments), fields(plugin = %plugin_name, tool = %tool_name))]
    pub async fn execute(
        &self,
        plugin_name: &str,
        tool_name: &str,
        arguments: JsonMap,
        mime_type: &str,
    ) -> Result<JsonMap, CoreError> {
        let input = ToolInput::validate(arguments, mime_type.to_string())?;

        let handle = self.registry.get(plugin_name).await?;

        let started = Instant::now();
        let outcome = handle.run_tool(tool_name, input.arguments).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => {
                if let Err(e) = validate_output(&output) {
                    let _ = self.registry.record_execution(plugin_name, duration_ms, false).await;
                    return Err(e);
                }
                let _ = self.registry.record_execution(plugin_name, duration_ms, true).await;
                info!(duration_ms, "tool execution succeeded");
                Ok(output)
            }
            Err(source) => {
                let _ = self.registry.record_execution(plugin_name, duration_ms, false).await;
                Err(CoreError::PluginExecution {
                    plugin: plugin_name.to_string(),
                    tool: tool_name.to_string(),
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::EchoPlugin;
    use serde_json::json;

    fn args_with_artifact() -> JsonMap {
        json!({"artifact": "opaque-bytes"}).as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn executes_registered_tool() {
        let registry = Arc::new(PluginRegistry::new());
        registry.register(Arc::new(EchoPlugin::new("alpha", vec!["detect".to_string()])));
        let runner = ToolRunner::new(registry);
        let result = runner
            .execute("alpha", "detect", args_with_artifact(), "image/jpeg")
            .await
            .unwrap();
        assert_eq!(result.get("tool").unwrap(), "detect");
    }

    #[tokio::test]
    async fn rejects_missing_artifact() {
        let registry = Arc::new(PluginRegistry::new());
        registry.register(Arc::new(EchoPlugin::new("alpha", vec!["detect".to_string()])));
        let runner = ToolRunner::new(registry);
        let empty = serde_json::Map::new();
        let result = runner.execute("alpha", "detect", empty, "image/jpeg").await;
        assert!(matches!(result, Err(CoreError::InputValidation { .. })));
    }

    #[tokio::test]
    async fn rejects_unrecognized_mime_type() {
        let registry = Arc::new(PluginRegistry::new());
        registry.register(Arc::new(EchoPlugin::new("alpha", vec!["detect".to_string()])));
        let runner = ToolRunner::new(registry);
        let result = runner
            .execute("alpha", "detect", args_with_artifact(), "text/plain")
            .await;
        assert!(matches!(result, Err(CoreError::InputValidation { .. })));
    }

    #[tokio::test]
    async fn unknown_plugin_surfaces_plugin_not_found() {
        let registry = Arc::new(PluginRegistry::new());
        let runner = ToolRunner::new(registry);
        let result = runner
            .execute("missing", "detect", args_with_artifact(), "image/jpeg")
            .await;
        assert!(matches!(result, Err(CoreError::PluginNotFound { .. })));
    }

    #[tokio::test]
    async fn empty_output_fails_output_validation() {
        let registry = Arc::new(PluginRegistry::new());
        registry.register(Arc::new(
            EchoPlugin::new("alpha", vec!["detect".to_string()]).with_canned_result(serde_json::Map::new()),
        ));
        let runner = ToolRunner::new(registry);
        let result = runner
            .execute("alpha", "detect", args_with_artifact(), "image/jpeg")
            .await;
        assert!(matches!(result, Err(CoreError::OutputValidation { .. })));
    }
}
