//! # HTTP Request Handlers
//!
//! Every REST endpoint the server exposes under `/v1` plus the
//! unprefixed discovery/health routes (spec §6.1). Handlers are thin:
//! extract, delegate to `forgesyte-core` through `AppState`, map the
//! result to JSON. No handler ever touches a plugin's tool handle
//! directly — that privilege belongs to `ToolRunner::execute` alone.
//!
//! ## REST surface
//!
//! - `POST /v1/analyze` - submit an artifact for analysis
//! - `GET /v1/jobs/{id}` - fetch one job record
//! - `GET /v1/jobs` - list jobs with optional filters
//! - `DELETE /v1/jobs/{id}` - cancel a queued job
//! - `GET /v1/plugins` - list every registered plugin
//! - `GET /v1/plugins/{name}` - fetch one plugin's status
//! - `GET /v1/plugins/{name}/manifest` - fetch one plugin's manifest entry
//! - `POST /v1/plugins/{name}/reload` - reinitialize a plugin (admin)
//! - `POST /v1/plugins/reload-all` - reinitialize every plugin (admin)
//! - `GET /health` - coarse liveness
//! - `GET /.well-known/mcp-manifest` - MCP discovery manifest
//! - `GET /gemini-extension` - companion discovery descriptor
//! - `POST /v1/mcp` - JSON-RPC 2.0 endpoint
//! - `POST /v1/video/pipeline` - linear single-plugin tool sequence
//! - `GET /v1/worker/health` - companion worker liveness

use axum::extract::{Multipart, Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use forgesyte_core::{CoreError, JobFilter, JobStatus, LifecycleState};

use crate::error::GatewayError;
use crate::request_context::RequestContext;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct AnalyzeQuery {
    #[serde(default)]
    pub plugin: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub options: Option<String>,
}

/// `POST /v1/analyze` — accepts an uploaded file (multipart field `file`),
/// an `image_url` query parameter, or a base64-encoded raw request body.
/// First non-empty source wins, per `ImageAcquisition::locate_bytes`.
pub async fn analyze(
    State(state): State<AppState>,
    Query(query): Query<AnalyzeQuery>,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, GatewayError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let options: Map<String, Value> = query
        .options
        .as_deref()
        .map(|raw| serde_json::from_str(raw).unwrap_or_default())
        .unwrap_or_default();

    let (uploaded, raw_body_base64) = if content_type.starts_with("multipart/form-data") {
        let uploaded = extract_multipart_file(content_type, &body).await?;
        (uploaded, None)
    } else if body.is_empty() {
        (None, None)
    } else {
        (None, Some(String::from_utf8_lossy(&body).to_string()))
    };

    let plugin = query.plugin.unwrap_or_else(|| "ocr".to_string());

    let handle = state.plugin_registry.get(&plugin).await.map_err(|_| {
        GatewayError::Core(CoreError::PluginLoad {
            name: plugin.clone(),
            reason: "plugin is not currently available".to_string(),
        })
    })?;
    let tool_name = query
        .tool
        .clone()
        .unwrap_or_else(|| handle.metadata().default_tool.unwrap_or_else(|| "default".to_string()));

    let image_bytes = state
        .image_acquisition
        .locate_bytes(
            uploaded.as_deref(),
            query.image_url.as_deref(),
            &options,
            raw_body_base64.as_deref(),
        )
        .await?;

    let mut arguments = options;
    arguments.insert(
        "artifact".to_string(),
        Value::String(base64::engine::general_purpose::STANDARD.encode(&image_bytes)),
    );

    let job_id = state
        .analysis
        .submit_analysis_async(plugin.clone(), tool_name, arguments, None, None)
        .await?;

    Ok(Json(json!({
        "job_id": job_id,
        "status": "queued",
        "plugin": plugin,
    })))
}

/// Multipart bodies can't be read with the `Bytes` extractor directly, so
/// `analyze` reads the whole body up front and this hand-assembles a
/// `Multipart`-shaped parse over it when the content type calls for one.
async fn extract_multipart_file(
    content_type: &str,
    body: &[u8],
) -> Result<Option<Vec<u8>>, GatewayError> {
    let request = axum::http::Request::builder()
        .header(CONTENT_TYPE, content_type)
        .body(axum::body::Body::from(body.to_vec()))
        .map_err(|e| GatewayError::Config {
            message: format!("failed to rebuild multipart request: {e}"),
        })?;

    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| CoreError::validation("file", format!("malformed multipart body: {e}")))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| CoreError::validation("file", format!("malformed multipart field: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name == "file" || name == "image" {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| CoreError::validation("file", format!("unreadable upload: {e}")))?;
            return Ok(Some(bytes.to_vec()));
        }
    }
    Ok(None)
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let job = state.analysis.get_job(&id).await?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub plugin: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<impl IntoResponse, GatewayError> {
    let status = match query.status.as_deref() {
        Some("QUEUED") | Some("queued") => Some(JobStatus::Queued),
        Some("RUNNING") | Some("running") => Some(JobStatus::Running),
        Some("DONE") | Some("done") => Some(JobStatus::Done),
        Some("ERROR") | Some("error") => Some(JobStatus::Error),
        _ => None,
    };

    let jobs = state
        .analysis
        .list_jobs(JobFilter {
            status,
            plugin: query.plugin,
            limit: query.limit.unwrap_or(50),
        })
        .await;

    Ok(Json(json!({ "jobs": jobs, "count": jobs.len() })))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let cancelled = state.analysis.cancel_job(&id).await?;
    if !cancelled {
        return Err(GatewayError::Core(CoreError::JobCancellation {
            job_id: id,
            reason: "job is not in a cancellable state".to_string(),
        }));
    }
    Ok(Json(json!({ "status": "cancelled", "job_id": id })))
}

pub async fn list_plugins(State(state): State<AppState>) -> impl IntoResponse {
    let plugins = state.plugin_registry.list_all().await;
    Json(json!({ "plugins": plugins }))
}

pub async fn get_plugin(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let status = state.plugin_registry.status(&name).await?;
    Ok(Json(status))
}

pub async fn plugin_manifest(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let status = state.plugin_registry.status(&name).await?;
    if !matches!(status.state, LifecycleState::Initialized | LifecycleState::Running) {
        return Err(GatewayError::Core(CoreError::PluginLoad {
            name,
            reason: "plugin is not currently available".to_string(),
        }));
    }

    let manifest = state
        .manifest_cache
        .get_or_generate(|| async {
            let manifest = crate::mcp::manifest::generate_manifest(
                &state.plugin_registry,
                "forgesyte",
                env!("CARGO_PKG_VERSION"),
                &state.config.mcp.protocol_version,
            )
            .await;
            serde_json::to_value(manifest).unwrap_or(json!({"tools": []}))
        })
        .await;

    let tool_id = format!("forgesyte.{name}");
    let entry = manifest["tools"]
        .as_array()
        .and_then(|tools| tools.iter().find(|t| t["id"] == tool_id))
        .cloned()
        .ok_or_else(|| CoreError::PluginNotFound { name: name.clone() })?;

    Ok(Json(entry))
}

fn require_admin(ctx: &RequestContext) -> Result<(), GatewayError> {
    if ctx.has_permission(&crate::auth::Permission::Admin) {
        return Ok(());
    }
    Err(GatewayError::Core(CoreError::Authorization {
        required: ["admin".to_string()].into_iter().collect(),
        held: ctx.permissions.iter().map(|p| p.as_str().to_string()).collect(),
    }))
}

/// Admin-only: reinitializes a plugin (clears `Failed`/`Unavailable` back
/// to `Initialized`) and invalidates the manifest cache, since the set of
/// available tools may have changed.
pub async fn reload_plugin(
    State(state): State<AppState>,
    axum::Extension(ctx): axum::Extension<RequestContext>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    require_admin(&ctx)?;
    state.plugin_registry.mark_initialized(&name).await?;
    state.manifest_cache.invalidate().await;
    Ok(Json(json!({ "status": "reloaded", "plugin": name })))
}

pub async fn reload_all_plugins(
    State(state): State<AppState>,
    axum::Extension(ctx): axum::Extension<RequestContext>,
) -> Result<impl IntoResponse, GatewayError> {
    require_admin(&ctx)?;
    let mut reloaded = Vec::new();
    for status in state.plugin_registry.list_all().await {
        if state
            .plugin_registry
            .mark_initialized(&status.metadata.name)
            .await
            .is_ok()
        {
            reloaded.push(status.metadata.name);
        }
    }
    state.manifest_cache.invalidate().await;
    Ok(Json(json!({ "status": "reloaded", "plugins": reloaded })))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let plugins = state.plugin_registry.list_all().await;
    Json(json!({
        "status": "ok",
        "plugins_loaded": plugins.len(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn mcp_manifest_well_known(State(state): State<AppState>) -> impl IntoResponse {
    let manifest = state
        .manifest_cache
        .get_or_generate(|| async {
            let manifest = crate::mcp::manifest::generate_manifest(
                &state.plugin_registry,
                "forgesyte",
                env!("CARGO_PKG_VERSION"),
                &state.config.mcp.protocol_version,
            )
            .await;
            serde_json::to_value(manifest).unwrap_or(json!({"tools": []}))
        })
        .await;
    Json(manifest)
}

pub async fn gemini_extension(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "schema_version": "v1",
        "name_for_model": "forgesyte",
        "name_for_human": "Forgesyte Analysis Server",
        "description_for_model": "Submit images and video frames to pluggable analysis tools.",
        "api": {
            "type": "openapi",
            "url": "/.well-known/mcp-manifest",
        },
        "auth": {
            "type": if state.config.auth.enabled { "api_key" } else { "none" },
        },
    }))
}

/// `POST /v1/mcp` — accepts either a single JSON-RPC request object or a
/// batch array. A single notification returns 204 with no body.
pub async fn mcp_rpc(State(state): State<AppState>, Json(body): Json<Value>) -> impl IntoResponse {
    match body {
        Value::Array(requests) => {
            let responses = state.mcp.dispatch_batch(requests).await;
            (StatusCode::OK, Json(Value::Array(responses))).into_response()
        }
        single => match state.mcp.dispatch_single_raw(single).await {
            Some(response) => (StatusCode::OK, Json(response)).into_response(),
            None => StatusCode::NO_CONTENT.into_response(),
        },
    }
}

#[derive(Debug, Deserialize)]
pub struct VideoPipelineRequest {
    pub plugin_id: String,
    pub tools: Vec<String>,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

/// `POST /v1/video/pipeline` — runs `tools` in sequence against one
/// plugin, threading each tool's output mapping into the next tool's
/// arguments. Every invocation still goes through `ToolRunner::execute`.
pub async fn video_pipeline(
    State(state): State<AppState>,
    Json(request): Json<VideoPipelineRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    if request.tools.is_empty() {
        return Err(GatewayError::Core(CoreError::validation(
            "tools",
            "video pipeline requires at least one tool",
        )));
    }

    let mut current_payload = request.payload;
    let mut steps = Vec::with_capacity(request.tools.len());

    for tool_name in &request.tools {
        let result = state
            .tool_runner
            .execute(&request.plugin_id, tool_name, current_payload.clone(), "image/jpeg")
            .await?;
        steps.push(result.clone());
        current_payload = result;
    }

    Ok(Json(json!({
        "result": steps.last().cloned().unwrap_or_default(),
        "steps": steps,
        "plugin_id": request.plugin_id,
        "tools": request.tools,
    })))
}

/// Tracks whether a companion video-worker process has reported in
/// recently. Nothing in this server currently calls [`WorkerHeartbeat::beat`]
/// since process supervision of that worker is out of scope; the type
/// exists so the endpoint has real state to report rather than a constant.
struct WorkerHeartbeat {
    last_beat: Option<std::time::Instant>,
    last_beat_unix: f64,
}

impl WorkerHeartbeat {
    const RECENT_THRESHOLD: std::time::Duration = std::time::Duration::from_secs(5);

    fn is_recent(&self) -> bool {
        self.last_beat
            .map(|t| t.elapsed() < Self::RECENT_THRESHOLD)
            .unwrap_or(false)
    }
}

static WORKER_HEARTBEAT: std::sync::OnceLock<tokio::sync::RwLock<WorkerHeartbeat>> =
    std::sync::OnceLock::new();

fn worker_heartbeat() -> &'static tokio::sync::RwLock<WorkerHeartbeat> {
    WORKER_HEARTBEAT.get_or_init(|| {
        tokio::sync::RwLock::new(WorkerHeartbeat {
            last_beat: None,
            last_beat_unix: 0.0,
        })
    })
}

pub async fn worker_health() -> impl IntoResponse {
    let heartbeat = worker_heartbeat().read().await;
    Json(json!({
        "alive": heartbeat.is_recent(),
        "last_heartbeat": heartbeat.last_beat_unix,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_heartbeat_starts_not_recent() {
        let heartbeat = WorkerHeartbeat {
            last_beat: None,
            last_beat_unix: 0.0,
        };
        assert!(!heartbeat.is_recent());
    }

    #[test]
    fn worker_heartbeat_is_recent_right_after_a_beat() {
        let heartbeat = WorkerHeartbeat {
            last_beat: Some(std::time::Instant::now()),
            last_beat_unix: 0.0,
        };
        assert!(heartbeat.is_recent());
    }
}
