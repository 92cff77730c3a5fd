//! # forgesyte-core
//!
//! The execution plane of the Forgesyte analysis server: plugin lifecycle
//! tracking, a bounded job store, a worker pool that runs plugin
//! invocations off the interface thread, the three-layer execution chain
//! that every interface (REST, MCP, streaming) funnels through, canonical
//! result normalization, image acquisition, and the DAG pipeline engine.
//!
//! This crate is transport-agnostic: it knows nothing about HTTP, JSON-RPC
//! framing, or WebSockets. `forgesyte-server` is the only thing that
//! imports those concerns.
//!
//! ## Execution chain
//!
//! ```text
//! AnalysisExecutionService  (shape validation, sync/async submission)
//!         |
//!         v
//! JobExecutionService       (job lifecycle, delegates to the worker pool)
//!         |
//!         v
//! ToolRunner                (the one call site for PluginHandler::run_tool)
//! ```
//!
//! A plugin's tool handler is invoked from exactly this one place in the
//! whole workspace; every other layer reaches the handler through it.

pub mod error;
pub mod execution;
pub mod image_acquisition;
pub mod job;
pub mod job_store;
pub mod normalization;
pub mod pipeline;
pub mod pipeline_registry;
pub mod plugin;
pub mod registry;
pub mod worker_pool;

pub use error::CoreError;
pub use execution::analysis_execution::{AnalysisExecutionService, JobFilter};
pub use execution::job_execution::JobExecutionService;
pub use execution::tool_runner::ToolRunner;
pub use job::{Job, JobPatch, JobStatus};
pub use job_store::JobStore;
pub use pipeline::{Edge, Node, Pipeline, ToolMetadata};
pub use pipeline_registry::PipelineRegistry;
pub use plugin::{JsonMap, PluginHandler, PluginMetadata};
pub use registry::{LifecycleState, PluginMetrics, PluginRegistry, PluginStatus};
pub use worker_pool::{CompletionNotifier, WorkerPool};

/// Result type for execution-plane operations.
pub type Result<T> = std::result::Result<T, CoreError>;
