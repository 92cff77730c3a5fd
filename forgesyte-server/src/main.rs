//! # Forgesyte Server Binary
//!
//! Binary entry point for the analysis server: parses CLI arguments,
//! loads and validates configuration, builds the router, and serves it.
//!
//! ## Usage
//!
//! ```bash
//! # Basic usage with default configuration
//! forgesyte-server
//!
//! # Custom configuration file
//! forgesyte-server --config my-config.toml
//!
//! # Custom host and port
//! forgesyte-server --host 0.0.0.0 --port 8080
//!
//! # Debug logging
//! forgesyte-server --log-level debug
//! ```
//!
//! ## Environment Variables
//!
//! The following environment variables override configuration file
//! values (spec §6.4):
//!
//! - `FORGESYTE_HOST` — server bind host
//! - `FORGESYTE_PORT` — server bind port
//! - `FORGESYTE_ADMIN_KEY` / `FORGESYTE_USER_KEY` — pre-shared API keys
//! - `FORGESYTE_PLUGINS_DIR` — plugin descriptor directory
//! - `CORS_ORIGINS` — comma-separated allowed origins
//! - `FORGESYTE_LOG_LEVEL` — tracing log level
//! - `PHASE11_STRICT_AUDIT` — `1` makes the startup self-audit fatal

use clap::Parser;
use std::net::SocketAddr;

use forgesyte_server::{config::Config, server::create_server};

/// Command line arguments for the analysis server binary.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Port number for the HTTP server.
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// Host address to bind the server to.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Logging level for the application.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .init();

    let mut config = Config::load(&args.config).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config file, falling back to defaults");
        Config::default()
    });
    config.server.host = args.host.clone();
    config.server.port = args.port;
    config.apply_env_overrides()?;
    config.validate()?;

    let app = create_server(config).await?;

    let addr = SocketAddr::new(args.host.parse()?, args.port);
    tracing::info!("starting forgesyte-server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
