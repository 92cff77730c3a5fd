//! # MCP Transport
//!
//! JSON-RPC 2.0 request parsing, method dispatch, batching, and the legacy
//! 1.0 envelope rewrite, generalized from the dashboard's one-off JSON
//! message handling into a proper request/response engine per spec §4.6.

pub mod manifest;
pub mod methods;
pub mod transport;

use futures::future::join_all;
use serde_json::Value;

use forgesyte_core::CoreError;

use methods::MethodContext;
use transport::{error_codes, error_response, success_response, JsonRpcRequest};

/// Maps a method-handler failure onto a JSON-RPC error code. Validation
/// failures are the caller's fault (`InvalidParams`); everything else
/// collapses to `InternalError`, except an explicit transport error, which
/// carries its own code through unchanged.
fn map_error(error: &CoreError) -> (i64, String) {
    match error {
        CoreError::Transport { code, message, .. } => (*code, message.clone()),
        CoreError::Validation { .. } | CoreError::InputValidation { .. } => {
            (error_codes::INVALID_PARAMS, error.to_string())
        }
        other => (error_codes::INTERNAL_ERROR, other.to_string()),
    }
}

/// Routes a parsed request to its handler and returns the method's raw
/// result mapping (no JSON-RPC envelope yet) — callers wrap it.
async fn call_method(ctx: &MethodContext, request: &JsonRpcRequest) -> Result<Value, CoreError> {
    match request.method.as_str() {
        "initialize" => methods::initialize(ctx, &request.params).await,
        "ping" => methods::ping(ctx, &request.params).await,
        "tools/list" => methods::tools_list(ctx, &request.params).await,
        "tools/call" => methods::tools_call(ctx, &request.params).await,
        "resources/list" => methods::resources_list(ctx, &request.params).await,
        "resources/read" => methods::resources_read(ctx, &request.params).await,
        other => Err(CoreError::transport(
            error_codes::METHOD_NOT_FOUND,
            format!("method not found: {other}"),
        )),
    }
}

/// The JSON-RPC engine: owns nothing but a [`MethodContext`], and is cheap
/// to construct per request since that context is itself all `Arc` handles.
#[derive(Clone)]
pub struct McpEngine {
    ctx: MethodContext,
}

impl McpEngine {
    pub fn new(ctx: MethodContext) -> Self {
        Self { ctx }
    }

    /// Dispatches one already-parsed request. Returns `None` for
    /// notifications — no response is ever emitted for them, successful or
    /// not, and a failing notification handler is logged and swallowed.
    pub async fn dispatch_one(&self, request: JsonRpcRequest) -> transport::DispatchResult {
        let is_notification = request.is_notification();
        let id = request.id.clone();

        if request.jsonrpc != "2.0" {
            return id.map(|id| {
                error_response(
                    id,
                    error_codes::INVALID_REQUEST,
                    format!("unsupported jsonrpc version: {}", request.jsonrpc),
                    None,
                )
            });
        }

        let result = call_method(&self.ctx, &request).await;

        if is_notification {
            if let Err(e) = result {
                tracing::warn!(method = %request.method, error = %e, "notification handler failed, swallowing");
            }
            return None;
        }

        let id = id.unwrap_or(Value::Null);
        Some(match result {
            Ok(value) => success_response(id, value),
            Err(e) => {
                let (code, message) = map_error(&e);
                error_response(id, code, message, None)
            }
        })
    }

    /// Dispatches a batch of raw JSON-RPC requests, each independently
    /// rewritten for the legacy 1.0 envelope and parsed. Responses are
    /// returned in the same order as the input, with notifications omitted;
    /// malformed entries become an `InvalidRequest` response keyed to a
    /// null id since no id could be recovered.
    pub async fn dispatch_batch(&self, raw_requests: Vec<Value>) -> Vec<Value> {
        let futures = raw_requests.into_iter().map(|raw| {
            let engine = self.clone();
            async move {
                let raw = transport::rewrite_legacy_envelope(raw);
                match serde_json::from_value::<JsonRpcRequest>(raw) {
                    Ok(request) => engine.dispatch_one(request).await,
                    Err(e) => Some(error_response(
                        Value::Null,
                        error_codes::INVALID_REQUEST,
                        format!("malformed request: {e}"),
                        None,
                    )),
                }
            }
        });

        join_all(futures).await.into_iter().flatten().collect()
    }

    /// Dispatches a single raw JSON-RPC payload (not wrapped in an array).
    pub async fn dispatch_single_raw(&self, raw: Value) -> transport::DispatchResult {
        let raw = transport::rewrite_legacy_envelope(raw);
        match serde_json::from_value::<JsonRpcRequest>(raw) {
            Ok(request) => self.dispatch_one(request).await,
            Err(e) => Some(error_response(
                Value::Null,
                error_codes::INVALID_REQUEST,
                format!("malformed request: {e}"),
                None,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transport_error_code_passes_through() {
        let error = CoreError::transport(-32050, "custom failure");
        let (code, message) = map_error(&error);
        assert_eq!(code, -32050);
        assert_eq!(message, "custom failure");
    }

    #[test]
    fn validation_error_maps_to_invalid_params() {
        let error = CoreError::validation("name", "bad");
        let (code, _) = map_error(&error);
        assert_eq!(code, error_codes::INVALID_PARAMS);
    }

    #[test]
    fn unrelated_error_maps_to_internal_error() {
        let error = CoreError::PluginNotFound {
            name: "missing".to_string(),
        };
        let (code, _) = map_error(&error);
        assert_eq!(code, error_codes::INTERNAL_ERROR);
    }

    #[test]
    fn batch_request_shape_parses() {
        let batch: Vec<Value> = serde_json::from_value(json!([
            {"jsonrpc": "2.0", "method": "ping", "id": 1},
            {"jsonrpc": "2.0", "method": "ping"},
        ]))
        .unwrap();
        assert_eq!(batch.len(), 2);
    }
}
