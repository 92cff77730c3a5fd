//! # Gateway Error Types
//!
//! Wraps [`forgesyte_core::CoreError`] with the HTTP-only concerns that
//! have no counterpart in the execution plane — admin-key auth failures,
//! config errors — and maps every variant to an HTTP status and a JSON
//! body of the shape `{"error": {"message", "type", "code"}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use forgesyte_core::CoreError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Any execution-plane error, passed through unchanged.
    #[error("{0}")]
    Core(#[from] CoreError),

    /// Missing or invalid API key (distinct from `CoreError::Authentication`
    /// so the header-parsing middleware doesn't need to construct a core error).
    #[error("authentication error: {message}")]
    Auth { message: String },

    /// Startup or file-based configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// JSON serialization/deserialization failure at the HTTP boundary.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            GatewayError::Core(CoreError::Authentication { .. }) => {
                (StatusCode::UNAUTHORIZED, "authentication_error")
            }
            GatewayError::Core(CoreError::Authorization { .. }) => {
                (StatusCode::FORBIDDEN, "authorization_error")
            }
            GatewayError::Core(CoreError::Validation { .. }) => {
                (StatusCode::BAD_REQUEST, "validation_error")
            }
            GatewayError::Core(CoreError::PluginNotFound { .. }) => {
                (StatusCode::NOT_FOUND, "plugin_not_found")
            }
            GatewayError::Core(CoreError::PluginLoad { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "plugin_load_error")
            }
            GatewayError::Core(CoreError::PluginExecution { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "plugin_execution_error")
            }
            GatewayError::Core(CoreError::InputValidation { .. }) => {
                (StatusCode::BAD_REQUEST, "input_validation_error")
            }
            GatewayError::Core(CoreError::OutputValidation { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "output_validation_error")
            }
            GatewayError::Core(CoreError::JobNotFound { .. }) => {
                (StatusCode::NOT_FOUND, "job_not_found")
            }
            GatewayError::Core(CoreError::JobCancellation { .. }) => {
                (StatusCode::BAD_REQUEST, "job_cancellation_error")
            }
            GatewayError::Core(CoreError::JobExecution { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "job_execution_error")
            }
            GatewayError::Core(CoreError::MessageDelivery { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "message_delivery_error")
            }
            GatewayError::Core(CoreError::ExternalService { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "external_service_error")
            }
            GatewayError::Core(CoreError::Transport { .. }) => {
                (StatusCode::BAD_REQUEST, "transport_error")
            }
            GatewayError::Auth { .. } => (StatusCode::UNAUTHORIZED, "authentication_error"),
            GatewayError::Config { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error")
            }
            GatewayError::Serialization(_) => (StatusCode::BAD_REQUEST, "serialization_error"),
        };

        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": error_type,
                "code": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn plugin_not_found_maps_to_404() {
        let err = GatewayError::Core(CoreError::PluginNotFound {
            name: "ocr".to_string(),
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["type"], "plugin_not_found");
    }

    #[tokio::test]
    async fn authorization_error_maps_to_403() {
        let err = GatewayError::Core(CoreError::Authorization {
            required: ["admin".to_string()].into_iter().collect(),
            held: ["analyze".to_string()].into_iter().collect(),
        });
        assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn auth_error_maps_to_401() {
        let err = GatewayError::Auth {
            message: "missing key".to_string(),
        };
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
    }
}
