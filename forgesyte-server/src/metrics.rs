//! # HTTP Request Metrics
//!
//! Ambient observability for the HTTP layer — request latency, status
//! codes, and throughput — independent of the per-plugin execution metrics
//! `forgesyte_core::registry::PluginMetrics` already tracks. This module
//! only ever sees HTTP request/response shape; it has no notion of
//! plugins, jobs, or tools.

use std::collections::{HashMap, VecDeque};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;

/// One completed HTTP request, as recorded by [`record_request`].
#[derive(Debug, Clone)]
pub struct RequestMetrics {
    pub recorded_at: Instant,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub latency_ms: u64,
}

/// Builder mirroring the shape request-producing middleware assembles a
/// [`RequestMetrics`] from.
pub struct RequestMetricsBuilder {
    method: String,
    path: String,
    status_code: u16,
    latency: Duration,
}

impl RequestMetricsBuilder {
    pub fn new(method: String, path: String, status_code: u16, latency: Duration) -> Self {
        Self {
            method,
            path,
            status_code,
            latency,
        }
    }

    pub fn build(self) -> RequestMetrics {
        RequestMetrics {
            recorded_at: Instant::now(),
            method: self.method,
            path: self.path,
            status_code: self.status_code,
            latency_ms: self.latency.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregatedMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p90_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub requests_per_minute: f64,
    pub error_rate: f64,
    pub active_connections: u64,
    pub uptime_seconds: u64,
    pub status_counts: HashMap<u16, u64>,
}

struct MetricsCollector {
    requests: VecDeque<RequestMetrics>,
    max_requests: usize,
    retention: Duration,
    active_connections: u64,
    started_at: Instant,
}

impl MetricsCollector {
    fn new(max_requests: usize, retention: Duration) -> Self {
        Self {
            requests: VecDeque::with_capacity(max_requests.min(1024)),
            max_requests,
            retention,
            active_connections: 0,
            started_at: Instant::now(),
        }
    }

    fn record(&mut self, metrics: RequestMetrics) {
        self.requests.push_back(metrics);
        while self.requests.len() > self.max_requests {
            self.requests.pop_front();
        }
    }

    fn cleanup_expired(&mut self) {
        let retention = self.retention;
        self.requests
            .retain(|m| m.recorded_at.elapsed() <= retention);
    }

    fn aggregate(&self) -> AggregatedMetrics {
        let total_requests = self.requests.len() as u64;
        if total_requests == 0 {
            return AggregatedMetrics {
                uptime_seconds: self.started_at.elapsed().as_secs(),
                active_connections: self.active_connections,
                ..Default::default()
            };
        }

        let mut latencies: Vec<u64> = self.requests.iter().map(|m| m.latency_ms).collect();
        latencies.sort_unstable();

        let successful = self
            .requests
            .iter()
            .filter(|m| m.status_code < 400)
            .count() as u64;
        let failed = total_requests - successful;

        let mut status_counts: HashMap<u16, u64> = HashMap::new();
        for m in &self.requests {
            *status_counts.entry(m.status_code).or_insert(0) += 1;
        }

        let sum: u64 = latencies.iter().sum();
        let average_latency_ms = sum as f64 / total_requests as f64;

        let percentile = |p: f64| -> f64 {
            let index = ((latencies.len() as f64 - 1.0) * p).round() as usize;
            latencies[index.min(latencies.len() - 1)] as f64
        };

        let window_minutes = (self.retention.as_secs_f64() / 60.0).max(1.0 / 60.0);

        AggregatedMetrics {
            total_requests,
            successful_requests: successful,
            failed_requests: failed,
            average_latency_ms,
            p50_latency_ms: percentile(0.50),
            p90_latency_ms: percentile(0.90),
            p95_latency_ms: percentile(0.95),
            p99_latency_ms: percentile(0.99),
            requests_per_minute: total_requests as f64 / window_minutes,
            error_rate: failed as f64 / total_requests as f64,
            active_connections: self.active_connections,
            uptime_seconds: self.started_at.elapsed().as_secs(),
            status_counts,
        }
    }
}

static COLLECTOR: OnceLock<RwLock<MetricsCollector>> = OnceLock::new();

fn collector() -> &'static RwLock<MetricsCollector> {
    COLLECTOR.get_or_init(|| RwLock::new(MetricsCollector::new(10_000, Duration::from_secs(3600))))
}

/// Initializes the global collector with the configured bounds. Safe to
/// call more than once; only the first call's bounds take effect, matching
/// `OnceLock` semantics — subsequent calls are no-ops save for a log line.
pub async fn initialize_metrics(config: crate::config::MetricsConfig) {
    if COLLECTOR
        .set(RwLock::new(MetricsCollector::new(
            config.max_requests,
            config.retention_duration,
        )))
        .is_err()
    {
        tracing::debug!("metrics collector already initialized, ignoring repeat init");
    }
    if config.enabled {
        start_cleanup_task(config.cleanup_interval);
    }
}

fn start_cleanup_task(interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            collector().write().await.cleanup_expired();
        }
    });
}

pub async fn record_request(metrics: RequestMetrics) {
    collector().write().await.record(metrics);
}

pub async fn get_aggregated_metrics() -> AggregatedMetrics {
    collector().read().await.aggregate()
}

pub async fn increment_connections() {
    collector().write().await.active_connections += 1;
}

pub async fn decrement_connections() {
    let mut guard = collector().write().await;
    guard.active_connections = guard.active_connections.saturating_sub(1);
}

/// Renders the Prometheus text exposition format for the handful of gauges
/// this module tracks.
pub async fn get_prometheus_metrics() -> String {
    let metrics = get_aggregated_metrics().await;
    let mut out = String::new();
    out.push_str("# HELP forgesyte_http_requests_total Total HTTP requests observed\n");
    out.push_str("# TYPE forgesyte_http_requests_total counter\n");
    out.push_str(&format!(
        "forgesyte_http_requests_total {}\n",
        metrics.total_requests
    ));
    out.push_str("# HELP forgesyte_http_request_latency_ms_avg Average request latency in milliseconds\n");
    out.push_str("# TYPE forgesyte_http_request_latency_ms_avg gauge\n");
    out.push_str(&format!(
        "forgesyte_http_request_latency_ms_avg {}\n",
        metrics.average_latency_ms
    ));
    out.push_str("# HELP forgesyte_http_error_rate Fraction of requests with a 4xx/5xx status\n");
    out.push_str("# TYPE forgesyte_http_error_rate gauge\n");
    out.push_str(&format!("forgesyte_http_error_rate {}\n", metrics.error_rate));
    out.push_str("# HELP forgesyte_http_active_connections Current active streaming connections\n");
    out.push_str("# TYPE forgesyte_http_active_connections gauge\n");
    out.push_str(&format!(
        "forgesyte_http_active_connections {}\n",
        metrics.active_connections
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(status: u16, latency_ms: u64) -> RequestMetrics {
        RequestMetricsBuilder::new(
            "GET".to_string(),
            "/v1/jobs".to_string(),
            status,
            Duration::from_millis(latency_ms),
        )
        .build()
    }

    #[test]
    fn aggregate_of_empty_collector_is_zeroed() {
        let collector = MetricsCollector::new(100, Duration::from_secs(60));
        let aggregated = collector.aggregate();
        assert_eq!(aggregated.total_requests, 0);
        assert_eq!(aggregated.error_rate, 0.0);
    }

    #[test]
    fn aggregate_splits_success_and_failure() {
        let mut collector = MetricsCollector::new(100, Duration::from_secs(60));
        collector.record(sample(200, 10));
        collector.record(sample(200, 20));
        collector.record(sample(500, 30));
        let aggregated = collector.aggregate();
        assert_eq!(aggregated.total_requests, 3);
        assert_eq!(aggregated.successful_requests, 2);
        assert_eq!(aggregated.failed_requests, 1);
        assert!((aggregated.error_rate - (1.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn record_respects_max_requests_bound() {
        let mut collector = MetricsCollector::new(2, Duration::from_secs(60));
        collector.record(sample(200, 1));
        collector.record(sample(200, 2));
        collector.record(sample(200, 3));
        assert_eq!(collector.requests.len(), 2);
    }
}
