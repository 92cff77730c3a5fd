//! Worker pool and task processor: runs each job's plugin invocation off
//! the interface thread, bounded to a fixed number of concurrent slots.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::error::CoreError;
use crate::execution::tool_runner::ToolRunner;
use crate::job::{Job, JobPatch, JobStatus};
use crate::job_store::JobStore;
use crate::normalization;
use crate::plugin::JsonMap;

pub const DEFAULT_POOL_SIZE: usize = 4;

/// Notified once a job reaches a terminal state, regardless of whether the
/// caller is waiting synchronously or polling asynchronously. Failures
/// raised by a notifier are caught and logged; they never affect the job
/// record itself.
#[async_trait::async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn notify(&self, job: &Job);
}

/// Bounded pool of background task slots. A job beyond capacity stays
/// `Queued` in the store until a permit frees up; there are no priority
/// classes.
pub struct WorkerPool {
    store: Arc<JobStore>,
    tool_runner: Arc<ToolRunner>,
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(store: Arc<JobStore>, tool_runner: Arc<ToolRunner>, pool_size: usize) -> Self {
        Self {
            store,
            tool_runner,
            semaphore: Arc::new(Semaphore::new(pool_size.max(1))),
        }
    }

    /// Preconditions: `arguments` must carry the artifact the caller wants
    /// analyzed (validated downstream by the tool runner) and `plugin_name`
    /// must be non-empty. Writes a `Queued` record and schedules background
    /// processing, returning the job id immediately.
    pub async fn submit_job(
        &self,
        plugin_name: String,
        tool_name: Option<String>,
        arguments: JsonMap,
        device: Option<String>,
        notifier: Option<Arc<dyn CompletionNotifier>>,
    ) -> Result<String, CoreError> {
        if plugin_name.is_empty() {
            return Err(CoreError::validation("plugin_name", "must be non-empty"));
        }
        let job_id = uuid::Uuid::new_v4().to_string();
        let mut job = Job::new(job_id.clone(), plugin_name, tool_name, arguments);
        job.requested_device = device;
        self.store.insert(job).await?;

        let store = self.store.clone();
        let tool_runner = self.tool_runner.clone();
        let semaphore = self.semaphore.clone();
        let id_for_task = job_id.clone();
        tokio::spawn(async move {
            let permit = semaphore.acquire_owned().await;
            let permit = match permit {
                Ok(p) => p,
                Err(_) => {
                    error!(job_id = %id_for_task, "worker pool semaphore closed");
                    return;
                }
            };
            run_background(&store, &tool_runner, &id_for_task, notifier).await;
            drop(permit);
        });

        Ok(job_id)
    }

    pub async fn cancel_job(&self, id: &str) -> Result<bool, CoreError> {
        let job = match self.store.get(id).await {
            Ok(job) => job,
            Err(CoreError::JobNotFound { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };
        if job.status != JobStatus::Queued {
            return Ok(false);
        }
        self.store
            .update(
                id,
                JobPatch {
                    status: Some(JobStatus::Error),
                    error: Some("Cancelled by caller".to_string()),
                    completed_at: Some(chrono::Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(true)
    }

    pub async fn get_job(&self, id: &str) -> Result<Job, CoreError> {
        self.store.get(id).await
    }

    pub async fn list_jobs(&self) -> Vec<Job> {
        self.store.list().await
    }

    pub async fn get_result(&self, id: &str) -> Result<JsonMap, CoreError> {
        let job = self.store.get(id).await?;
        match job.status {
            JobStatus::Done => Ok(job.result.unwrap_or_default()),
            _ => Err(CoreError::JobExecution {
                job_id: id.to_string(),
                phase: "get_result".to_string(),
                reason: format!("job has not reached DONE (status: {:?})", job.status),
            }),
        }
    }
}

async fn run_background(
    store: &JobStore,
    tool_runner: &ToolRunner,
    job_id: &str,
    notifier: Option<Arc<dyn CompletionNotifier>>,
) {
    // Step 1: RUNNING, progress 0.1.
    let started_at = chrono::Utc::now();
    let update = store
        .update(
            job_id,
            JobPatch {
                status: Some(JobStatus::Running),
                started_at: Some(started_at),
                progress: Some(0.1),
                ..Default::default()
            },
        )
        .await;
    let job = match update {
        Ok(job) => job,
        Err(e) => {
            error!(job_id, error = %e, "failed to mark job running");
            return;
        }
    };

    let tool_name = job.tool.clone().unwrap_or_else(|| "default".to_string());
    let mime_type = job
        .arguments
        .get("mime_type")
        .and_then(|v| v.as_str())
        .unwrap_or("application/octet-stream")
        .to_string();

    // Steps 2-3: resolve plugin and invoke its tool handler via the
    // execution chain's single call site.
    let outcome = tool_runner
        .execute(&job.plugin, &tool_name, job.arguments.clone(), &mime_type)
        .await;

    let patch = match outcome {
        Ok(raw_result) => {
            // Step 4: normalize, falling back to the raw mapping on failure.
            let result = match normalization::normalize(&raw_result) {
                Ok(normalized) => normalization::to_json_map(&normalized),
                Err(e) => {
                    warn!(job_id, error = %e, "normalization failed, using raw plugin output");
                    raw_result
                }
            };
            // Step 5: DONE.
            JobPatch {
                status: Some(JobStatus::Done),
                result: Some(result),
                completed_at: Some(chrono::Utc::now()),
                progress: Some(1.0),
                actual_device: job.requested_device.clone(),
                ..Default::default()
            }
        }
        Err(CoreError::PluginNotFound { name }) => {
            // Step 2 failure path.
            JobPatch {
                status: Some(JobStatus::Error),
                error: Some(format!("Plugin '{name}' not found")),
                completed_at: Some(chrono::Utc::now()),
                ..Default::default()
            }
        }
        Err(e) => {
            // Step 6: any other plugin-raised error.
            JobPatch {
                status: Some(JobStatus::Error),
                error: Some(e.to_string()),
                completed_at: Some(chrono::Utc::now()),
                ..Default::default()
            }
        }
    };

    let final_job = match store.update(job_id, patch).await {
        Ok(job) => job,
        Err(e) => {
            error!(job_id, error = %e, "failed to record job completion");
            return;
        }
    };

    // Step 7: always deliver the completion notification.
    if let Some(notifier) = notifier {
        notifier.notify(&final_job).await;
    }
    info!(job_id, status = ?final_job.status, "job completed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::EchoPlugin;
    use crate::registry::PluginRegistry;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct FlagNotifier(Arc<AtomicBool>);

    #[async_trait::async_trait]
    impl CompletionNotifier for FlagNotifier {
        async fn notify(&self, _job: &Job) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn pool() -> (Arc<JobStore>, WorkerPool) {
        let registry = Arc::new(PluginRegistry::new());
        registry.register(Arc::new(EchoPlugin::new("alpha", vec!["detect".to_string()])));
        let store = Arc::new(JobStore::new(100));
        let tool_runner = Arc::new(ToolRunner::new(registry));
        let worker_pool = WorkerPool::new(store.clone(), tool_runner, DEFAULT_POOL_SIZE);
        (store, worker_pool)
    }

    fn args() -> JsonMap {
        json!({"artifact": "bytes", "mime_type": "image/jpeg"}).as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn submit_then_completes() {
        let (_store, pool) = pool();
        let flag = Arc::new(AtomicBool::new(false));
        let notifier: Arc<dyn CompletionNotifier> = Arc::new(FlagNotifier(flag.clone()));
        let id = pool
            .submit_job("alpha".to_string(), Some("detect".to_string()), args(), None, Some(notifier))
            .await
            .unwrap();

        for _ in 0..50 {
            let job = pool.get_job(&id).await.unwrap();
            if job.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let job = pool.get_job(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert!(flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_only_affects_queued_jobs() {
        let (store, pool) = pool();
        let job = Job::new("manual".to_string(), "alpha".to_string(), None, args());
        store.insert(job).await.unwrap();
        assert!(pool.cancel_job("manual").await.unwrap());
        let cancelled = pool.get_job("manual").await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Error);
        assert!(cancelled.error.unwrap().starts_with("Cancelled"));

        assert!(!pool.cancel_job("manual").await.unwrap());
    }

    #[tokio::test]
    async fn get_result_fails_before_done() {
        let (store, pool) = pool();
        let job = Job::new("pending".to_string(), "alpha".to_string(), None, args());
        store.insert(job).await.unwrap();
        assert!(pool.get_result("pending").await.is_err());
    }

    #[tokio::test]
    async fn missing_plugin_yields_descriptive_error() {
        let (_store, pool) = pool();
        let id = pool
            .submit_job("ghost".to_string(), None, args(), None, None)
            .await
            .unwrap();
        for _ in 0..50 {
            let job = pool.get_job(&id).await.unwrap();
            if job.is_terminal() {
                assert_eq!(job.error.unwrap(), "Plugin 'ghost' not found");
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never reached a terminal state");
    }
}
