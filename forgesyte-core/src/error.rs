//! # Core Error Taxonomy
//!
//! Every error a plugin, the registry, the job store, the execution chain
//! or the DAG engine can raise is a variant of [`CoreError`]. The HTTP and
//! MCP transports in `forgesyte-server` wrap this type rather than
//! inventing their own categories, so a failure always carries the same
//! shape regardless of which interface triggered it.

use std::collections::HashSet;
use thiserror::Error;

/// Errors raised anywhere in the execution plane.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Missing or invalid API key.
    #[error("authentication error: {message}")]
    Authentication { message: String },

    /// Caller's key lacks a required permission.
    #[error("authorization error: requires {required:?}, has {held:?}")]
    Authorization {
        required: HashSet<String>,
        held: HashSet<String>,
    },

    /// Shape, type, or constraint violation on input.
    #[error("validation error: {field}: {message}")]
    Validation { field: String, message: String },

    /// Lookup by plugin name failed.
    #[error("plugin '{name}' not found")]
    PluginNotFound { name: String },

    /// Plugin registration or initialization failed.
    #[error("plugin '{name}' failed to load: {reason}")]
    PluginLoad { name: String, reason: String },

    /// The plugin's tool handler raised.
    #[error("plugin '{plugin}' tool '{tool}' failed: {source}")]
    PluginExecution {
        plugin: String,
        tool: String,
        #[source]
        source: anyhow::Error,
    },

    /// The ToolRunner's input envelope failed validation.
    #[error("input validation error: {message}")]
    InputValidation { message: String },

    /// The plugin's returned mapping failed output-contract validation.
    #[error("output validation error: {message}")]
    OutputValidation { message: String },

    /// Job lookup by id failed.
    #[error("job '{job_id}' not found")]
    JobNotFound { job_id: String },

    /// Job cancellation was attempted against a non-cancellable job.
    #[error("job '{job_id}' cannot be cancelled: {reason}")]
    JobCancellation { job_id: String, reason: String },

    /// A job-lifecycle operation failed outside of cancellation.
    #[error("job '{job_id}' execution error in phase '{phase}': {reason}")]
    JobExecution {
        job_id: String,
        phase: String,
        reason: String,
    },

    /// Streaming delivery to a client failed.
    #[error("message delivery to client '{client_id}' failed after {retries} attempts")]
    MessageDelivery { client_id: String, retries: u32 },

    /// A remote fetch or third-party call failed.
    #[error("external service '{service}' error: {source}")]
    ExternalService {
        service: String,
        #[source]
        source: anyhow::Error,
    },

    /// A JSON-RPC-shaped transport error.
    #[error("transport error {code}: {message}")]
    Transport {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },
}

impl CoreError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn transport(code: i64, message: impl Into<String>) -> Self {
        CoreError::Transport {
            code,
            message: message.into(),
            data: None,
        }
    }
}
