//! Middle layer of the execution chain: owns job lifecycle transitions on
//! top of the worker pool, independent of how a caller chose to submit.

use std::sync::Arc;

use crate::error::CoreError;
use crate::job::Job;
use crate::plugin::JsonMap;
use crate::worker_pool::{CompletionNotifier, WorkerPool};

/// Facade over [`WorkerPool`] presenting the job-lifecycle operations the
/// outer execution layers depend on, without exposing pool internals.
pub struct JobExecutionService {
    worker_pool: Arc<WorkerPool>,
}

impl JobExecutionService {
    pub fn new(worker_pool: Arc<WorkerPool>) -> Self {
        Self { worker_pool }
    }

    /// Creates a job record and schedules its background run, returning the
    /// job id immediately. Actual processing time ends up recorded on the
    /// job's result mapping by the worker pool.
    pub async fn create_job(
        &self,
        plugin_name: String,
        tool_name: Option<String>,
        arguments: JsonMap,
        device: Option<String>,
        notifier: Option<Arc<dyn CompletionNotifier>>,
    ) -> Result<String, CoreError> {
        self.worker_pool
            .submit_job(plugin_name, tool_name, arguments, device, notifier)
            .await
    }

    pub async fn cancel_job(&self, id: &str) -> Result<bool, CoreError> {
        self.worker_pool.cancel_job(id).await
    }

    pub async fn get_job(&self, id: &str) -> Result<Job, CoreError> {
        self.worker_pool.get_job(id).await
    }

    pub async fn get_result(&self, id: &str) -> Result<JsonMap, CoreError> {
        self.worker_pool.get_result(id).await
    }

    pub async fn list_jobs(&self) -> Vec<Job> {
        self.worker_pool.list_jobs().await
    }
}
