//! Bounded, concurrent store of job records.
//!
//! The store is a simple `Mutex`-guarded map: no I/O happens while the lock
//! is held, so critical sections stay short even under load. Capacity is
//! enforced lazily on insert rather than on every mutation.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::CoreError;
use crate::job::{Job, JobPatch};

/// Default maximum number of job records retained before eviction kicks in.
pub const DEFAULT_CAPACITY: usize = 10_000;

struct Inner {
    jobs: HashMap<String, Job>,
    capacity: usize,
}

/// Shared, cloneable handle onto the job table.
#[derive(Clone)]
pub struct JobStore {
    inner: Arc<Mutex<Inner>>,
}

impl JobStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                jobs: HashMap::new(),
                capacity,
            })),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// Insert a new job, evicting the oldest terminal records first if the
    /// store is at capacity. Fails if a job with the same id is already
    /// present rather than silently overwriting it.
    pub async fn insert(&self, job: Job) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;
        if inner.jobs.contains_key(&job.id) {
            return Err(CoreError::validation(
                "id",
                format!("job '{}' already exists", job.id),
            ));
        }
        if inner.jobs.len() >= inner.capacity {
            Self::evict(&mut inner);
        }
        inner.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    /// Evict the oldest 20% of terminal (`Done`/`Error`) jobs by creation
    /// time, at least one if any are evictable. If no job is in a terminal
    /// state the table is left over capacity rather than dropping live work.
    fn evict(inner: &mut Inner) {
        let mut terminal: Vec<(String, chrono::DateTime<chrono::Utc>)> = inner
            .jobs
            .values()
            .filter(|j| j.is_terminal())
            .map(|j| (j.id.clone(), j.created_at))
            .collect();
        if terminal.is_empty() {
            debug!("job store at capacity with no terminal jobs to evict");
            return;
        }
        terminal.sort_by_key(|(_, created_at)| *created_at);
        let evict_count = ((terminal.len() as f64) * 0.2).ceil().max(1.0) as usize;
        for (id, _) in terminal.into_iter().take(evict_count) {
            inner.jobs.remove(&id);
        }
    }

    pub async fn get(&self, id: &str) -> Result<Job, CoreError> {
        let inner = self.inner.lock().await;
        inner
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::JobNotFound { job_id: id.to_string() })
    }

    /// Apply a partial update to a job in place.
    pub async fn update(&self, id: &str, patch: JobPatch) -> Result<Job, CoreError> {
        let mut inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| CoreError::JobNotFound { job_id: id.to_string() })?;
        patch.apply(job);
        Ok(job.clone())
    }

    pub async fn list(&self) -> Vec<Job> {
        let inner = self.inner.lock().await;
        inner.jobs.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use serde_json::Map;

    fn job(id: &str) -> Job {
        Job::new(id.to_string(), "alpha".to_string(), None, Map::new())
    }

    #[tokio::test]
    async fn insert_then_get_roundtrips() {
        let store = JobStore::new(10);
        store.insert(job("1")).await.unwrap();
        let fetched = store.get("1").await.unwrap();
        assert_eq!(fetched.id, "1");
        assert_eq!(fetched.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn missing_job_errors() {
        let store = JobStore::new(10);
        assert!(matches!(store.get("missing").await, Err(CoreError::JobNotFound { .. })));
    }

    #[tokio::test]
    async fn duplicate_id_insert_is_rejected() {
        let store = JobStore::new(10);
        store.insert(job("1")).await.unwrap();
        assert!(matches!(
            store.insert(job("1")).await,
            Err(CoreError::Validation { .. })
        ));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn update_applies_patch() {
        let store = JobStore::new(10);
        store.insert(job("1")).await.unwrap();
        let patch = JobPatch {
            status: Some(JobStatus::Running),
            started_at: Some(chrono::Utc::now()),
            ..Default::default()
        };
        let updated = store.update("1", patch).await.unwrap();
        assert_eq!(updated.status, JobStatus::Running);
        assert!(updated.started_at.is_some());
    }

    #[tokio::test]
    async fn eviction_targets_oldest_terminal_jobs_first() {
        let store = JobStore::new(5);
        for i in 0..5 {
            let mut j = job(&i.to_string());
            j.status = JobStatus::Done;
            store.insert(j).await.unwrap();
        }
        // Sixth insert should trigger eviction of the oldest terminal job ("0").
        store.insert(job("5")).await.unwrap();
        assert!(store.get("0").await.is_err());
        assert!(store.get("5").await.is_ok());
    }

    #[tokio::test]
    async fn eviction_leaves_live_jobs_over_capacity_when_none_terminal() {
        let store = JobStore::new(2);
        store.insert(job("1")).await.unwrap();
        store.insert(job("2")).await.unwrap();
        store.insert(job("3")).await.unwrap();
        assert_eq!(store.len().await, 3);
    }
}
