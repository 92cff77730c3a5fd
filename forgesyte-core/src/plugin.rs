//! Plugin contract: the opaque runtime object the registry owns and the
//! `ToolRunner` is the sole caller of.

use serde_json::{Map, Value};

/// JSON object, the argument and result shape every tool handler trades in.
pub type JsonMap = Map<String, Value>;

/// Declarative facts about a plugin, independent of its runtime state.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PluginMetadata {
    pub name: String,
    pub description: String,
    pub version: String,
    pub input_types: Vec<String>,
    pub output_types: Vec<String>,
    pub permissions: Vec<String>,
    /// JSON-Schema-shaped configuration descriptor, if the plugin accepts config.
    pub config_schema: Option<Value>,
    /// Names of tools this plugin exports, used by `tools/list` and manifest
    /// generation. Must be non-empty.
    pub tools: Vec<String>,
    /// Tool invoked when a caller omits a tool name; `None` means the plugin
    /// requires an explicit tool name.
    pub default_tool: Option<String>,
}

/// The contract every plugin instance satisfies. The registry holds plugins
/// as `Arc<dyn PluginHandler>`; only `ToolRunner::execute` may call
/// `run_tool` in production code paths.
#[async_trait::async_trait]
pub trait PluginHandler: Send + Sync {
    /// Invoke a named tool with the given arguments, returning a result
    /// mapping or an opaque error (wrapped by callers into
    /// `CoreError::PluginExecution`).
    async fn run_tool(&self, tool: &str, args: JsonMap) -> anyhow::Result<JsonMap>;

    /// Static metadata describing this plugin.
    fn metadata(&self) -> PluginMetadata;
}

/// A trivial in-process plugin used by tests and as a reference
/// implementation: it echoes its arguments back under a fixed key, or
/// returns a canned detection payload when the tool name is `"detect"`.
pub struct EchoPlugin {
    metadata: PluginMetadata,
    canned: Option<JsonMap>,
}

impl EchoPlugin {
    pub fn new(name: impl Into<String>, tools: Vec<String>) -> Self {
        let name = name.into();
        let default_tool = tools.first().cloned();
        Self {
            metadata: PluginMetadata {
                name: name.clone(),
                description: format!("echo plugin '{name}'"),
                version: "0.1.0".to_string(),
                input_types: vec!["image".to_string()],
                output_types: vec!["json".to_string()],
                permissions: vec![],
                config_schema: None,
                tools,
                default_tool,
            },
            canned: None,
        }
    }

    pub fn with_canned_result(mut self, result: JsonMap) -> Self {
        self.canned = Some(result);
        self
    }
}

#[async_trait::async_trait]
impl PluginHandler for EchoPlugin {
    async fn run_tool(&self, tool: &str, args: JsonMap) -> anyhow::Result<JsonMap> {
        if !self.metadata.tools.iter().any(|t| t == tool) {
            anyhow::bail!("plugin '{}' has no tool '{}'", self.metadata.name, tool);
        }
        if let Some(canned) = &self.canned {
            return Ok(canned.clone());
        }
        let mut out: JsonMap = Map::new();
        out.insert("echo".to_string(), Value::Object(args));
        out.insert("tool".to_string(), Value::String(tool.to_string()));
        Ok(out)
    }

    fn metadata(&self) -> PluginMetadata {
        self.metadata.clone()
    }
}
