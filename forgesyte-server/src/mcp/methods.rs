//! The six mandatory MCP method handlers (spec §4.6.5): `initialize`,
//! `ping`, `tools/list`, `tools/call`, `resources/list`, `resources/read`.

use std::sync::Arc;

use base64::Engine;
use serde_json::{json, Map, Value};

use forgesyte_core::image_acquisition::ImageAcquisition;
use forgesyte_core::{AnalysisExecutionService, CoreError, JobFilter, PluginRegistry, ToolRunner};

use super::manifest::ManifestCache;

const RESOURCE_URI_PREFIX: &str = "forgesyte://job/";
const RECENT_JOBS_LIMIT: usize = 10;

/// Dependencies every method handler needs. Cheap to clone: every field is
/// an `Arc` (or otherwise clone-cheap) handle shared with the rest of the
/// server.
#[derive(Clone)]
pub struct MethodContext {
    pub plugin_registry: Arc<PluginRegistry>,
    pub tool_runner: Arc<ToolRunner>,
    pub image_acquisition: Arc<ImageAcquisition>,
    pub analysis: Arc<AnalysisExecutionService>,
    pub manifest_cache: Arc<ManifestCache>,
    pub server_name: String,
    pub server_version: String,
    pub protocol_version: String,
}

/// `initialize`: ignores `clientInfo`/`protocolVersion` beyond echoing the
/// server's own protocol version back.
pub async fn initialize(ctx: &MethodContext, _params: &Map<String, Value>) -> Result<Value, CoreError> {
    Ok(json!({
        "protocolVersion": ctx.protocol_version,
        "capabilities": { "tools": {} },
        "serverInfo": { "name": ctx.server_name, "version": ctx.server_version },
    }))
}

pub async fn ping(_ctx: &MethodContext, _params: &Map<String, Value>) -> Result<Value, CoreError> {
    Ok(json!({ "status": "pong" }))
}

pub async fn tools_list(ctx: &MethodContext, _params: &Map<String, Value>) -> Result<Value, CoreError> {
    let manifest = ctx
        .manifest_cache
        .get_or_generate(|| async {
            let manifest = super::manifest::generate_manifest(
                &ctx.plugin_registry,
                &ctx.server_name,
                &ctx.server_version,
                &ctx.protocol_version,
            )
            .await;
            serde_json::to_value(manifest).unwrap_or(json!({"tools": []}))
        })
        .await;

    let tools: Vec<Value> = manifest["tools"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .map(|tool| {
            json!({
                "name": tool["title"],
                "description": tool["description"],
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "image": { "type": "string" },
                        "options": { "type": "object" },
                    },
                    "required": ["image"],
                },
            })
        })
        .collect();

    Ok(json!({ "tools": tools }))
}

/// Decodes an `arguments.image` value into raw bytes. URLs are fetched
/// through the image-acquisition service; data URLs and bare base64 are
/// decoded in place. The plugin never sees the original string.
async fn resolve_image_bytes(
    ctx: &MethodContext,
    image: &str,
) -> Result<Vec<u8>, CoreError> {
    if image.starts_with("http://") || image.starts_with("https://") {
        return ctx.image_acquisition.fetch_url(image).await;
    }

    let encoded = match image.split_once(",") {
        Some((header, data)) if header.starts_with("data:") => data,
        _ => image,
    };

    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| CoreError::validation("image", format!("invalid base64: {e}")))
}

/// `tools/call`: `name` addresses a plugin by its manifest title;
/// `arguments.image` is the payload, `arguments.options` (if any) is
/// flattened into the tool arguments alongside the decoded artifact.
pub async fn tools_call(ctx: &MethodContext, params: &Map<String, Value>) -> Result<Value, CoreError> {
    let name = params
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| CoreError::validation("name", "tools/call requires a string 'name'"))?;

    let arguments = params
        .get("arguments")
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();

    let image = arguments
        .get("image")
        .and_then(|v| v.as_str())
        .ok_or_else(|| CoreError::validation("arguments.image", "missing required image payload"))?;

    let handle = ctx.plugin_registry.get(name).await.map_err(|_| {
        CoreError::validation("name", format!("unknown tool '{name}'"))
    })?;

    let bytes = resolve_image_bytes(ctx, image).await?;

    let mut tool_arguments = arguments
        .get("options")
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();
    tool_arguments.insert(
        "artifact".to_string(),
        Value::String(base64::engine::general_purpose::STANDARD.encode(&bytes)),
    );

    let default_tool = handle
        .metadata()
        .default_tool
        .unwrap_or_else(|| "default".to_string());

    let output = ctx
        .tool_runner
        .execute(name, &default_tool, tool_arguments, "image/jpeg")
        .await?;

    let text = serde_json::to_string(&output)
        .map_err(|e| CoreError::validation("arguments", format!("result not serializable: {e}")))?;

    Ok(json!({
        "content": [ { "type": "text", "text": text } ],
    }))
}

pub async fn resources_list(ctx: &MethodContext, _params: &Map<String, Value>) -> Result<Value, CoreError> {
    let jobs = ctx
        .analysis
        .list_jobs(JobFilter {
            status: None,
            plugin: None,
            limit: RECENT_JOBS_LIMIT,
        })
        .await;

    let resources: Vec<Value> = jobs
        .into_iter()
        .map(|job| {
            json!({
                "uri": format!("{RESOURCE_URI_PREFIX}{}", job.id),
                "name": format!("job {}", job.id),
                "mimeType": "application/json",
                "description": format!("{:?} job on plugin {}", job.status, job.plugin),
            })
        })
        .collect();

    Ok(json!({ "resources": resources, "nextCursor": Value::Null }))
}

pub async fn resources_read(ctx: &MethodContext, params: &Map<String, Value>) -> Result<Value, CoreError> {
    let uri = params
        .get("uri")
        .and_then(|v| v.as_str())
        .ok_or_else(|| CoreError::validation("uri", "resources/read requires a string 'uri'"))?;

    let job_id = uri.strip_prefix(RESOURCE_URI_PREFIX).ok_or_else(|| {
        CoreError::validation("uri", format!("unsupported resource scheme: {uri}"))
    })?;

    let job = ctx
        .analysis
        .get_job(job_id)
        .await
        .map_err(|_| CoreError::validation("uri", format!("unknown job id: {job_id}")))?;

    let text = serde_json::to_string(&job)
        .map_err(|e| CoreError::validation("uri", format!("job not serializable: {e}")))?;

    Ok(json!({
        "contents": [ { "uri": uri, "mimeType": "application/json", "text": text } ],
    }))
}
