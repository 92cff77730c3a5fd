//! JSON-RPC 2.0 envelope, dispatch, and the legacy 1.0 rewrite (spec §4.6).

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Standard JSON-RPC error codes plus the server-defined range
/// `[-32099, -32000]` this module doesn't currently populate.
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

fn default_jsonrpc_version() -> String {
    "2.0".to_string()
}

/// A single JSON-RPC request. `id` absent means a notification: no
/// response is ever emitted for it, successful or not.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "default_jsonrpc_version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

pub fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id,
    })
}

pub fn error_response(id: Value, code: i64, message: impl Into<String>, data: Option<Value>) -> Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(data) = data {
        error["data"] = data;
    }
    json!({
        "jsonrpc": "2.0",
        "error": error,
        "id": id,
    })
}

/// Rewrites a legacy `jsonrpc: "1.0"` envelope into a 2.0 request: assigns a
/// random id if absent and logs a deprecation warning. Applied before
/// parsing into [`JsonRpcRequest`] so downstream dispatch never sees "1.0".
pub fn rewrite_legacy_envelope(mut raw: Value) -> Value {
    let is_legacy = raw
        .get("jsonrpc")
        .and_then(|v| v.as_str())
        .map(|v| v == "1.0")
        .unwrap_or(false);
    if !is_legacy {
        return raw;
    }

    tracing::warn!("received JSON-RPC 1.0 request, rewriting to 2.0");
    if let Some(obj) = raw.as_object_mut() {
        obj.insert("jsonrpc".to_string(), Value::String("2.0".to_string()));
        if !obj.contains_key("id") {
            obj.insert(
                "id".to_string(),
                Value::String(uuid::Uuid::new_v4().to_string()),
            );
        }
    }
    raw
}

/// Result of dispatching one request: `None` for notifications, `Some`
/// carrying the full JSON-RPC response envelope otherwise.
pub type DispatchResult = Option<Value>;

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum BatchOrSingle<T> {
    Single(T),
    Batch(Vec<T>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_envelope_gets_rewritten_and_assigned_an_id() {
        let raw = json!({"jsonrpc": "1.0", "method": "ping"});
        let rewritten = rewrite_legacy_envelope(raw);
        assert_eq!(rewritten["jsonrpc"], "2.0");
        assert!(rewritten["id"].is_string());
    }

    #[test]
    fn already_2_0_envelope_is_untouched() {
        let raw = json!({"jsonrpc": "2.0", "method": "ping", "id": 1});
        let rewritten = rewrite_legacy_envelope(raw.clone());
        assert_eq!(rewritten, raw);
    }

    #[test]
    fn notification_has_no_id() {
        let request: JsonRpcRequest =
            serde_json::from_value(json!({"jsonrpc": "2.0", "method": "ping"})).unwrap();
        assert!(request.is_notification());
    }
}
