//! # Forgesyte Server
//!
//! The HTTP, WebSocket, and MCP transport surface over `forgesyte-core`'s
//! execution plane: an analysis server that dispatches images, video
//! frames, and pipelines to pluggable analysis tools.
//!
//! ## Architecture
//!
//! - **`config`** — TOML configuration, environment overrides, validation
//! - **`server`** — `AppState` construction and the Axum router
//! - **`handlers`** — REST endpoint handlers (spec §6.1)
//! - **`streaming`** — the real-time WebSocket channel (spec §4.7, §6.2)
//! - **`mcp`** — the JSON-RPC 2.0 transport and the six mandatory methods
//!   (spec §4.6)
//! - **`middleware`** — CORS, authentication, logging, metrics
//! - **`auth`** — pre-shared API key table and permission model
//! - **`request_context`** — per-request identity attached by `auth_middleware`
//! - **`metrics`** — HTTP-layer request metrics, independent of per-plugin
//!   execution metrics tracked inside `forgesyte-core`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use forgesyte_server::{config::Config, server::create_server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml")?;
//!     let app = create_server(config).await?;
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod mcp;
pub mod metrics;
pub mod middleware;
pub mod request_context;
pub mod server;
pub mod streaming;

pub use server::create_server;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use base64::Engine;

    #[tokio::test]
    async fn default_config_serves_a_healthy_root() {
        let app = create_server(Config::default()).await.unwrap();
        let server = TestServer::new(app).unwrap();
        let response = server.get("/health").await;
        assert_eq!(response.status_code(), StatusCode::OK);
    }

    #[tokio::test]
    async fn mcp_manifest_well_known_lists_the_bootstrapped_plugin() {
        let app = create_server(Config::default()).await.unwrap();
        let server = TestServer::new(app).unwrap();
        let response = server.get("/.well-known/mcp-manifest").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body = response.json::<serde_json::Value>();
        assert_eq!(body["tools"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn job_lifecycle_round_trips_through_the_rest_surface() {
        let app = create_server(Config::default()).await.unwrap();
        let server = TestServer::new(app).unwrap();

        let encoded = base64::engine::general_purpose::STANDARD.encode(b"not-really-an-image");
        let submit = server
            .post("/v1/analyze")
            .add_header("Content-Type", "application/octet-stream")
            .bytes(encoded.into_bytes().into())
            .await;
        assert_eq!(submit.status_code(), StatusCode::OK);
        let job_id = submit.json::<serde_json::Value>()["job_id"]
            .as_str()
            .unwrap()
            .to_string();

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let fetched = server.get(&format!("/v1/jobs/{job_id}")).await;
        assert_eq!(fetched.status_code(), StatusCode::OK);
        assert_eq!(fetched.json::<serde_json::Value>()["status"], "DONE");
    }
}
