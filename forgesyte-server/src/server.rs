//! # HTTP Server Module
//!
//! Server initialization, middleware, routing, and shared application
//! state for the analysis server's REST, streaming, and MCP surfaces
//! (spec §6). Bootstraps the full execution chain —
//! `JobStore` → `ToolRunner` → `WorkerPool` → `JobExecutionService` →
//! `AnalysisExecutionService` — exactly as `forgesyte-core` expects it
//! wired, then exposes it behind one `AppState`.
//!
//! ## Middleware Stack
//!
//! 1. **CORS** — cross-origin handling
//! 2. **Authentication** — resolves a `RequestContext` from `X-API-Key`
//! 3. **Logging** — structured per-request log line
//! 4. **Metrics** — HTTP-layer latency/status recording
//! 5. **Timeout** — bounds every request's total handling time

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;

use forgesyte_core::{
    AnalysisExecutionService, JobExecutionService, JobStore, PipelineRegistry, PluginRegistry,
    ToolRunner, WorkerPool,
};
use forgesyte_core::image_acquisition::ImageAcquisition;
use forgesyte_core::plugin::EchoPlugin;

use crate::auth::AuthTable;
use crate::config::Config;
use crate::handlers;
use crate::mcp::manifest::ManifestCache;
use crate::mcp::methods::MethodContext;
use crate::mcp::McpEngine;
use crate::middleware::{auth_middleware, cors_middleware, logging_middleware, metrics_middleware};
use crate::streaming::{handler as streaming_handler, StreamingManager};

const FETCH_MAX_RETRIES: u32 = 3;
const FETCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// A demonstration plugin bootstrapped so `/v1/analyze`'s default
/// `plugin=ocr` query parameter resolves to something real. Actual plugin
/// discovery and loading from external processes is out of scope; this
/// stands in for it so the server is runnable out of the box.
fn bootstrap_demo_plugin(registry: &PluginRegistry) {
    let plugin = EchoPlugin::new("ocr", vec!["ocr".to_string(), "detect".to_string()]);
    registry.register(Arc::new(plugin));
}

/// Application state shared across every HTTP, WebSocket, and MCP handler.
/// Every field is `Arc`-backed or itself cheap to clone, so `AppState` as a
/// whole is cheap to clone into axum's per-request `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth_table: Arc<AuthTable>,
    pub plugin_registry: Arc<PluginRegistry>,
    pub tool_runner: Arc<ToolRunner>,
    pub analysis: Arc<AnalysisExecutionService>,
    pub pipeline_registry: Arc<PipelineRegistry>,
    pub image_acquisition: Arc<ImageAcquisition>,
    pub manifest_cache: Arc<ManifestCache>,
    pub streaming: StreamingManager,
    pub mcp: McpEngine,
}

/// Builds the execution chain, the ambient services around it, and the
/// full Axum router with its middleware stack.
pub async fn create_server(config: Config) -> anyhow::Result<Router> {
    crate::metrics::initialize_metrics(crate::metrics::MetricsConfig {
        enabled: config.metrics.enabled,
        max_requests: config.metrics.max_requests,
        retention_duration: config.metrics.retention_duration,
        cleanup_interval: config.metrics.cleanup_interval,
    })
    .await;

    let plugin_registry = Arc::new(PluginRegistry::new());
    bootstrap_demo_plugin(&plugin_registry);
    plugin_registry.mark_initialized("ocr").await?;
    plugin_registry
        .startup_self_audit(&["ocr".to_string()], config.strict_audit)
        .await;

    let job_store = Arc::new(JobStore::new(config.job_store.max_jobs));
    let tool_runner = Arc::new(ToolRunner::new(plugin_registry.clone()));
    let worker_pool = Arc::new(WorkerPool::new(
        job_store,
        tool_runner.clone(),
        config.worker_pool.size,
    ));
    let job_execution = JobExecutionService::new(worker_pool);
    let analysis = Arc::new(AnalysisExecutionService::new(job_execution));

    let pipeline_registry = Arc::new(PipelineRegistry::new());
    if let Some(dir) = &config.pipelines_dir {
        match pipeline_registry.load_directory(dir).await {
            Ok(count) => tracing::info!(count, dir = %dir.display(), "loaded pipeline descriptors"),
            Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "failed to load pipeline descriptors"),
        }
    }

    let image_acquisition = Arc::new(ImageAcquisition::new(FETCH_MAX_RETRIES, FETCH_TIMEOUT));
    let manifest_cache = Arc::new(ManifestCache::new(std::time::Duration::from_secs(
        config.manifest.ttl_seconds,
    )));
    let auth_table = Arc::new(AuthTable::from_config(&config.auth));
    let streaming = StreamingManager::new();

    let mcp_ctx = MethodContext {
        plugin_registry: plugin_registry.clone(),
        tool_runner: tool_runner.clone(),
        image_acquisition: image_acquisition.clone(),
        analysis: analysis.clone(),
        manifest_cache: manifest_cache.clone(),
        server_name: "forgesyte".to_string(),
        server_version: env!("CARGO_PKG_VERSION").to_string(),
        protocol_version: config.mcp.protocol_version.clone(),
    };

    if config.server.cors.enabled && config.server.cors.allowed_origins.iter().any(|o| o == "*") {
        tracing::warn!(
            "CORS is enabled with wildcard origins. This is unsafe for production. Configure explicit allowed_origins."
        );
    }

    let state = AppState {
        config: Arc::new(config.clone()),
        auth_table,
        plugin_registry,
        tool_runner,
        analysis,
        pipeline_registry,
        image_acquisition,
        manifest_cache,
        streaming,
        mcp: McpEngine::new(mcp_ctx),
    };

    let app = Router::new()
        .route("/v1/analyze", post(handlers::analyze))
        .route("/v1/jobs/{id}", get(handlers::get_job).delete(handlers::cancel_job))
        .route("/v1/jobs", get(handlers::list_jobs))
        .route("/v1/plugins", get(handlers::list_plugins))
        .route("/v1/plugins/{name}", get(handlers::get_plugin))
        .route("/v1/plugins/{name}/manifest", get(handlers::plugin_manifest))
        .route("/v1/plugins/{name}/reload", post(handlers::reload_plugin))
        .route("/v1/plugins/reload-all", post(handlers::reload_all_plugins))
        .route("/v1/video/pipeline", post(handlers::video_pipeline))
        .route("/v1/worker/health", get(handlers::worker_health))
        .route("/v1/mcp", post(handlers::mcp_rpc))
        .route("/v1/stream", get(streaming_handler::stream_handler))
        .route("/ws/jobs/{job_id}", get(streaming_handler::job_progress_handler))
        .route("/health", get(handlers::health))
        .route("/.well-known/mcp-manifest", get(handlers::mcp_manifest_well_known))
        .route("/gemini-extension", get(handlers::gemini_extension))
        .layer(
            ServiceBuilder::new()
                .layer(cors_middleware(&state.config.server.cors)) // 1. CORS
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    auth_middleware,
                )) // 2. Authentication
                .layer(axum::middleware::from_fn(logging_middleware)) // 3. Logging
                .layer(axum::middleware::from_fn(metrics_middleware)) // 4. Metrics
                .layer(TimeoutLayer::new(state.config.server.timeout)), // 5. Timeout (last)
        )
        .with_state(state);

    Ok(app)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum_test::TestServer;

    #[tokio::test]
    async fn health_endpoint_reports_the_bootstrapped_plugin() {
        let app = create_server(Config::default()).await.unwrap();
        let server = TestServer::new(app).unwrap();
        let response = server.get("/health").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body = response.json::<serde_json::Value>();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["plugins_loaded"], 1);
    }

    #[tokio::test]
    async fn analyze_without_an_image_source_is_a_bad_request() {
        let app = create_server(Config::default()).await.unwrap();
        let server = TestServer::new(app).unwrap();
        let response = server.post("/v1/analyze").await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn analyze_against_an_unknown_plugin_is_service_unavailable() {
        let app = create_server(Config::default()).await.unwrap();
        let server = TestServer::new(app).unwrap();
        let response = server.post("/v1/analyze?plugin=nonexistent").await;
        assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn mcp_ping_round_trips() {
        let app = create_server(Config::default()).await.unwrap();
        let server = TestServer::new(app).unwrap();
        let response = server
            .post("/v1/mcp")
            .json(&serde_json::json!({"jsonrpc": "2.0", "method": "ping", "id": 1}))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body = response.json::<serde_json::Value>();
        assert_eq!(body["result"]["status"], "pong");
    }

    #[tokio::test]
    async fn reload_plugin_without_admin_permission_is_forbidden() {
        let mut config = Config::default();
        config.auth.admin_key = Some("admin-secret".to_string());
        config.auth.user_key = Some("user-secret".to_string());
        config.auth.enabled = true;
        let app = create_server(config).await.unwrap();
        let server = TestServer::new(app).unwrap();
        let response = server
            .post("/v1/plugins/ocr/reload")
            .add_header("X-API-Key", "user-secret")
            .await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
    }
}
