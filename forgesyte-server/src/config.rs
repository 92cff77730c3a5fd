//! # Configuration Management Module
//!
//! Loads, validates, and applies environment overrides to the server's
//! runtime configuration. Mirrors the shape and lifecycle of the config
//! this crate was adapted from: `Config::load` reads TOML, then applies
//! environment overrides, then validates the merged result.
//!
//! ## Configuration File Example
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 3000
//! timeout = "30s"
//! max_body_size = 10485760
//!
//! [server.cors]
//! enabled = true
//! allowed_origins = ["*"]
//! allowed_methods = ["GET", "POST", "PUT", "DELETE"]
//!
//! [auth]
//! enabled = true
//!
//! [job_store]
//! max_jobs = 10000
//! eviction_fraction = 0.2
//!
//! [worker_pool]
//! size = 4
//!
//! [manifest]
//! ttl_seconds = 60
//!
//! [mcp]
//! protocol_version = "2024-11-05"
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub job_store: JobStoreConfig,
    pub worker_pool: WorkerPoolConfig,
    pub manifest: ManifestConfig,
    pub mcp: McpConfig,
    /// Directory of plugin descriptors loaded at startup, if any.
    pub plugins_dir: Option<PathBuf>,
    /// Directory of pipeline descriptor JSON files loaded at startup, if any.
    pub pipelines_dir: Option<PathBuf>,
    /// Makes the registry's startup self-audit fatal on divergence instead
    /// of merely logging at error level. Set via `PHASE11_STRICT_AUDIT=1`.
    pub strict_audit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    pub max_body_size: usize,
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
}

/// Pre-shared API keys and the permission model. No keys configured means
/// unauthenticated requests get the default `{analyze, stream}` role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub enabled: bool,
    pub admin_key: Option<String>,
    pub user_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub max_requests: usize,
    #[serde(with = "duration_serde")]
    pub retention_duration: Duration,
    #[serde(with = "duration_serde")]
    pub cleanup_interval: Duration,
}

/// Bounds on the in-memory job store (spec §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStoreConfig {
    pub max_jobs: usize,
    pub eviction_fraction: f64,
}

/// Size of the semaphore bounding concurrent tool execution (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    pub size: usize,
}

/// TTL for the cached plugin manifest documents (spec §6.1, `GET /plugins/{id}/manifest`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestConfig {
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    pub protocol_version: String,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies the environment overrides named in spec §6.4.
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(host) = env::var("FORGESYTE_HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }

        if let Ok(port_str) = env::var("FORGESYTE_PORT") {
            let port: u16 = port_str
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid FORGESYTE_PORT: {port_str}"))?;
            self.server.port = port;
        }

        if let Ok(admin_key) = env::var("FORGESYTE_ADMIN_KEY") {
            if !admin_key.is_empty() {
                self.auth.admin_key = Some(admin_key);
                self.auth.enabled = true;
            }
        }

        if let Ok(user_key) = env::var("FORGESYTE_USER_KEY") {
            if !user_key.is_empty() {
                self.auth.user_key = Some(user_key);
                self.auth.enabled = true;
            }
        }

        if let Ok(plugins_dir) = env::var("FORGESYTE_PLUGINS_DIR") {
            if !plugins_dir.is_empty() {
                self.plugins_dir = Some(PathBuf::from(plugins_dir));
            }
        }

        if let Ok(origins) = env::var("CORS_ORIGINS") {
            self.server.cors.allowed_origins =
                origins.split(',').map(|s| s.trim().to_string()).collect();
        }

        if let Ok(strict_audit) = env::var("PHASE11_STRICT_AUDIT") {
            self.strict_audit = strict_audit == "1";
        }

        if let Ok(level) = env::var("FORGESYTE_LOG_LEVEL") {
            let valid_levels = ["trace", "debug", "info", "warn", "error"];
            if valid_levels.contains(&level.as_str()) {
                self.logging.level = level;
            } else {
                return Err(anyhow::anyhow!(
                    "invalid FORGESYTE_LOG_LEVEL: {level}. use: {:?}",
                    valid_levels
                ));
            }
        }

        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_server()?;
        self.validate_logging()?;
        self.validate_metrics()?;
        self.validate_job_store()?;
        self.validate_worker_pool()?;
        Ok(())
    }

    fn validate_server(&self) -> anyhow::Result<()> {
        if self.server.host.is_empty() {
            return Err(anyhow::anyhow!("server host cannot be empty"));
        }
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("server port must be between 1 and 65535"));
        }
        if self.server.max_body_size == 0 {
            return Err(anyhow::anyhow!("max_body_size cannot be 0"));
        }
        if self.server.timeout.as_secs() == 0 {
            return Err(anyhow::anyhow!("server timeout cannot be 0"));
        }
        if self.server.cors.enabled && self.server.cors.allowed_origins.is_empty() {
            return Err(anyhow::anyhow!(
                "CORS enabled but no allowed origins specified"
            ));
        }
        Ok(())
    }

    fn validate_logging(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "invalid log level: {}. must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }
        Ok(())
    }

    fn validate_metrics(&self) -> anyhow::Result<()> {
        if self.metrics.enabled {
            if self.metrics.max_requests == 0 {
                return Err(anyhow::anyhow!("max_requests cannot be 0 when metrics is enabled"));
            }
            if self.metrics.retention_duration.as_secs() == 0 {
                return Err(anyhow::anyhow!("retention_duration cannot be 0 when metrics is enabled"));
            }
            if self.metrics.cleanup_interval > self.metrics.retention_duration {
                return Err(anyhow::anyhow!(
                    "cleanup_interval cannot be longer than retention_duration"
                ));
            }
        }
        Ok(())
    }

    fn validate_job_store(&self) -> anyhow::Result<()> {
        if self.job_store.max_jobs == 0 {
            return Err(anyhow::anyhow!("job_store.max_jobs cannot be 0"));
        }
        if !(0.0..1.0).contains(&self.job_store.eviction_fraction) {
            return Err(anyhow::anyhow!(
                "job_store.eviction_fraction must be in [0.0, 1.0), got {}",
                self.job_store.eviction_fraction
            ));
        }
        Ok(())
    }

    fn validate_worker_pool(&self) -> anyhow::Result<()> {
        if self.worker_pool.size == 0 {
            return Err(anyhow::anyhow!("worker_pool.size cannot be 0"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
                timeout: Duration::from_secs(30),
                max_body_size: 10 * 1024 * 1024,
                cors: CorsConfig {
                    enabled: true,
                    allowed_origins: vec!["*".to_string()],
                    allowed_methods: vec!["GET".to_string(), "POST".to_string(), "DELETE".to_string()],
                    allowed_headers: vec!["*".to_string()],
                },
            },
            auth: AuthConfig {
                enabled: false,
                admin_key: None,
                user_key: None,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
            metrics: MetricsConfig {
                enabled: true,
                max_requests: 10_000,
                retention_duration: Duration::from_secs(3600),
                cleanup_interval: Duration::from_secs(300),
            },
            job_store: JobStoreConfig {
                max_jobs: 10_000,
                eviction_fraction: 0.2,
            },
            worker_pool: WorkerPoolConfig { size: 4 },
            manifest: ManifestConfig { ttl_seconds: 60 },
            mcp: McpConfig {
                protocol_version: "2024-11-05".to_string(),
            },
            plugins_dir: None,
            pipelines_dir: None,
            strict_audit: false,
        }
    }
}

/// TOML-friendly `Duration` (de)serialization via human strings like `"30s"`.
mod duration_serde {
    use super::Duration;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{}s", value.as_secs()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_duration(&raw).map_err(serde::de::Error::custom)
    }

    pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
        let s = s.trim();
        if let Some(secs) = s.strip_suffix('s') {
            return Ok(Duration::from_secs(secs.parse()?));
        }
        if let Some(mins) = s.strip_suffix('m') {
            return Ok(Duration::from_secs(mins.parse::<u64>()? * 60));
        }
        if let Some(hours) = s.strip_suffix('h') {
            return Ok(Duration::from_secs(hours.parse::<u64>()? * 3600));
        }
        Ok(Duration::from_secs(s.parse()?))
    }
}

pub use duration_serde::parse_duration;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_worker_pool_size_fails_validation() {
        let mut config = Config::default();
        config.worker_pool.size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn eviction_fraction_out_of_range_fails_validation() {
        let mut config = Config::default();
        config.job_store.eviction_fraction = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn cors_origins_env_override_splits_on_comma() {
        std::env::set_var("CORS_ORIGINS", "https://a.example,https://b.example");
        let mut config = Config::default();
        config.apply_env_overrides().unwrap();
        assert_eq!(
            config.server.cors.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
        std::env::remove_var("CORS_ORIGINS");
    }

    #[test]
    fn admin_key_env_override_enables_auth() {
        std::env::set_var("FORGESYTE_ADMIN_KEY", "test-admin-key-value");
        let mut config = Config::default();
        config.apply_env_overrides().unwrap();
        assert!(config.auth.enabled);
        assert_eq!(config.auth.admin_key.as_deref(), Some("test-admin-key-value"));
        std::env::remove_var("FORGESYTE_ADMIN_KEY");
    }

    #[test]
    fn strict_audit_env_override_requires_exact_value() {
        std::env::set_var("PHASE11_STRICT_AUDIT", "1");
        let mut config = Config::default();
        config.apply_env_overrides().unwrap();
        assert!(config.strict_audit);
        std::env::remove_var("PHASE11_STRICT_AUDIT");

        std::env::set_var("PHASE11_STRICT_AUDIT", "0");
        let mut config = Config::default();
        config.apply_env_overrides().unwrap();
        assert!(!config.strict_audit);
        std::env::remove_var("PHASE11_STRICT_AUDIT");
    }

    #[test]
    fn duration_parses_suffixed_strings() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    }
}
