//! # HTTP Middleware
//!
//! CORS, authentication, structured logging, and per-request metrics,
//! applied in that order around every route in [`crate::server::create_server`].

use std::time::Instant;

use axum::extract::State;
use axum::http::{HeaderValue, Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::request_context::RequestContext;
use crate::server::AppState;

/// Builds the CORS layer from configuration. A wildcard origin is honored
/// as `Any`; an explicit allow-list is parsed header value by header value,
/// silently dropping anything that isn't a valid `Origin` value.
pub fn cors_middleware(cors_config: &crate::config::CorsConfig) -> CorsLayer {
    if !cors_config.enabled {
        return CorsLayer::new();
    }

    let mut layer = CorsLayer::new();

    if cors_config.allowed_origins.iter().any(|o| o == "*") {
        layer = layer.allow_origin(Any);
    } else {
        let origins: Vec<HeaderValue> = cors_config
            .allowed_origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();
        layer = layer.allow_origin(origins);
    }

    let methods: Vec<Method> = cors_config
        .allowed_methods
        .iter()
        .filter_map(|m| m.parse().ok())
        .collect();
    if !methods.is_empty() {
        layer = layer.allow_methods(methods);
    }

    if cors_config.allowed_headers.iter().any(|h| h == "*") {
        layer = layer.allow_headers(Any);
    } else {
        let headers: Vec<_> = cors_config
            .allowed_headers
            .iter()
            .filter_map(|h| h.parse().ok())
            .collect();
        layer = layer.allow_headers(headers);
    }

    layer
}

/// Pulls `api_key` out of a raw query string without pulling in a form-encoding crate.
fn query_param(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next()?;
        let value = parts.next().unwrap_or("");
        (key == name).then(|| value.to_string())
    })
}

fn extract_api_key<B>(req: &Request<B>) -> Option<String> {
    if let Some(header) = req.headers().get("X-API-Key") {
        if let Ok(value) = header.to_str() {
            return Some(value.to_string());
        }
    }
    req.uri().query().and_then(|q| query_param(q, "api_key"))
}

/// Resolves the caller's permission set from `X-API-Key` or `?api_key=`
/// against the server's `AuthTable` and attaches a [`RequestContext`] to
/// the request's extensions. A presented key that matches nothing in the
/// table is rejected with 401; a request presenting no key at all gets the
/// unauthenticated default role (spec §6.1).
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let presented = extract_api_key(&req);
    let Some(permissions) = state.auth_table.resolve(presented.as_deref()) else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    req.extensions_mut().insert(RequestContext::new(permissions));

    Ok(next.run(req).await)
}

/// Logs method, path, status, and latency for every request once it has
/// passed authentication, tagged with the request id assigned there.
pub async fn logging_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let request_id = req
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let started = Instant::now();
    let response = next.run(req).await;
    let latency_ms = started.elapsed().as_millis();

    info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        latency_ms,
        "request_completed"
    );

    response
}

/// Records every request, other than streaming upgrades and health checks,
/// into the HTTP-layer request metrics collector.
pub async fn metrics_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let skip = path.starts_with("/v1/stream") || path == "/health" || path.starts_with("/ws/");

    let started = Instant::now();
    let response = next.run(req).await;
    let latency = started.elapsed();

    if !skip {
        crate::metrics::record_request(
            crate::metrics::RequestMetricsBuilder::new(
                method,
                path,
                response.status().as_u16(),
                latency,
            )
            .build(),
        )
        .await;
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_param_extracts_named_value() {
        assert_eq!(
            query_param("plugin=ocr&api_key=secret", "api_key"),
            Some("secret".to_string())
        );
        assert_eq!(query_param("plugin=ocr", "api_key"), None);
    }
}
