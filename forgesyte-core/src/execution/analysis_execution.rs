//! Outermost, API-facing layer of the execution chain. Performs only shape
//! validation and delegates everything else to [`JobExecutionService`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::CoreError;
use crate::execution::job_execution::JobExecutionService;
use crate::job::{Job, JobStatus};
use crate::plugin::JsonMap;
use crate::worker_pool::CompletionNotifier;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Filters accepted by [`AnalysisExecutionService::list_jobs`].
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub plugin: Option<String>,
    pub limit: usize,
}

pub struct AnalysisExecutionService {
    jobs: JobExecutionService,
}

impl AnalysisExecutionService {
    pub fn new(jobs: JobExecutionService) -> Self {
        Self { jobs }
    }

    fn validate_shape(plugin_name: &str, tool_name: &str, args: &JsonMap) -> Result<(), CoreError> {
        if plugin_name.is_empty() {
            return Err(CoreError::validation("plugin_name", "must be a non-empty string"));
        }
        if tool_name.is_empty() {
            return Err(CoreError::validation("tool_name", "must be a non-empty string"));
        }
        let _ = args;
        Ok(())
    }

    /// Creates the job and awaits its completion before returning the final
    /// record.
    pub async fn submit_analysis(
        &self,
        plugin_name: String,
        tool_name: String,
        args: JsonMap,
        device: Option<String>,
    ) -> Result<Job, CoreError> {
        Self::validate_shape(&plugin_name, &tool_name, &args)?;
        let id = self
            .jobs
            .create_job(plugin_name, Some(tool_name), args, device, None)
            .await?;
        loop {
            let job = self.jobs.get_job(&id).await?;
            if job.is_terminal() {
                return Ok(job);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Creates the job and returns its id immediately; the caller polls or
    /// subscribes for completion.
    pub async fn submit_analysis_async(
        &self,
        plugin_name: String,
        tool_name: String,
        args: JsonMap,
        device: Option<String>,
        notifier: Option<Arc<dyn CompletionNotifier>>,
    ) -> Result<String, CoreError> {
        Self::validate_shape(&plugin_name, &tool_name, &args)?;
        self.jobs
            .create_job(plugin_name, Some(tool_name), args, device, notifier)
            .await
    }

    pub async fn get_job(&self, id: &str) -> Result<Job, CoreError> {
        self.jobs.get_job(id).await
    }

    pub async fn cancel_job(&self, id: &str) -> Result<bool, CoreError> {
        self.jobs.cancel_job(id).await
    }

    /// Matching jobs sorted newest-first, truncated to `filter.limit`
    /// (clamped to `1..=200`).
    pub async fn list_jobs(&self, filter: JobFilter) -> Vec<Job> {
        let limit = filter.limit.clamp(1, 200);
        let mut jobs: Vec<Job> = self
            .jobs
            .list_jobs()
            .await
            .into_iter()
            .filter(|job| filter.status.map(|s| s == job.status).unwrap_or(true))
            .filter(|job| {
                filter
                    .plugin
                    .as_ref()
                    .map(|p| p == &job.plugin)
                    .unwrap_or(true)
            })
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        jobs
    }
}

/// True if a JSON value is a plain object, used by transports that accept
/// loosely-typed arguments before handing them to [`AnalysisExecutionService`].
pub fn is_mapping(value: &Value) -> bool {
    value.is_object()
}
