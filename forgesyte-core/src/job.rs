//! Job record and status, as tracked by the job store and surfaced through
//! every interface.

use crate::plugin::JsonMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a submitted analysis job. `Error` also represents
/// cancellation — see spec Open Question on cancellation modeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
}

/// A server-side record tracking one submitted tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub plugin: String,
    pub tool: Option<String>,
    pub arguments: JsonMap,
    pub result: Option<JsonMap>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: f64,
    pub requested_device: Option<String>,
    pub actual_device: Option<String>,
}

impl Job {
    pub fn new(id: String, plugin: String, tool: Option<String>, arguments: JsonMap) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            plugin,
            tool,
            arguments,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: 0.0,
            requested_device: None,
            actual_device: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Done | JobStatus::Error)
    }
}

/// A partial update applied to a [`Job`] by `JobStore::update`. Every field
/// left `None` is left untouched on the stored record.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub result: Option<JsonMap>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: Option<f64>,
    pub actual_device: Option<String>,
}

impl JobPatch {
    pub fn apply(self, job: &mut Job) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(result) = self.result {
            job.result = Some(result);
        }
        if let Some(error) = self.error {
            job.error = Some(error);
        }
        if let Some(started_at) = self.started_at {
            job.started_at = Some(started_at);
        }
        if let Some(completed_at) = self.completed_at {
            job.completed_at = Some(completed_at);
        }
        if let Some(progress) = self.progress {
            job.progress = progress;
        }
        if let Some(actual_device) = self.actual_device {
            job.actual_device = Some(actual_device);
        }
    }
}
