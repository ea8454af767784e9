//! Job model: one user request owning a workflow execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Accepted,
    Previewing,
    Running,
    RunningWithErrors,
    Paused,
    Canceled,
    CompleteWithErrors,
    Successful,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Previewing => "previewing",
            Self::Running => "running",
            Self::RunningWithErrors => "running_with_errors",
            Self::Paused => "paused",
            Self::Canceled => "canceled",
            Self::CompleteWithErrors => "complete_with_errors",
            Self::Successful => "successful",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "accepted" => Some(Self::Accepted),
            "previewing" => Some(Self::Previewing),
            "running" => Some(Self::Running),
            "running_with_errors" => Some(Self::RunningWithErrors),
            "paused" => Some(Self::Paused),
            "canceled" => Some(Self::Canceled),
            "complete_with_errors" => Some(Self::CompleteWithErrors),
            "successful" => Some(Self::Successful),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal states admit no further mutation of the job or its children.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Canceled | Self::CompleteWithErrors | Self::Successful | Self::Failed
        )
    }

    /// States in which the scheduler may hand out work for the job.
    pub fn is_dispatchable(&self) -> bool {
        matches!(
            self,
            Self::Accepted | Self::Previewing | Self::Running | Self::RunningWithErrors
        )
    }
}

/// A single user request, owning one workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    /// Equals `job_id`; retained as its own field for request tracing.
    pub request_id: String,
    pub username: String,
    pub status: JobStatus,
    /// Percentage in [0, 100].
    pub progress: i32,
    pub message: Option<String>,
    pub is_async: bool,
    pub ignore_errors: bool,
    /// Planned number of input granules for the request.
    pub num_input_granules: i32,
    /// Snapshot of min(num_input_granules, producer service limit).
    pub granule_limit: i32,
    /// Granules emitted by the producer step so far.
    pub granules_produced: i32,
    pub failed_item_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(submission: &JobSubmission, granule_limit: i32) -> Self {
        let job_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let status = if submission.skip_preview {
            JobStatus::Accepted
        } else {
            JobStatus::Previewing
        };
        Self {
            request_id: job_id.clone(),
            job_id,
            username: submission.username.clone(),
            status,
            progress: 0,
            message: None,
            is_async: submission.is_async,
            ignore_errors: submission.ignore_errors,
            num_input_granules: submission.num_input_granules,
            granule_limit,
            granules_produced: 0,
            failed_item_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Granules the producer step may still emit.
    pub fn remaining_granule_budget(&self) -> i32 {
        (self.granule_limit - self.granules_produced).max(0)
    }
}

/// Parameters for creating a job, as handed over by the request front end.
#[derive(Debug, Clone)]
pub struct JobSubmission {
    pub username: String,
    /// Name of the service chain to run (see `services::ServiceRegistry`).
    pub chain: String,
    pub num_input_granules: i32,
    pub ignore_errors: bool,
    pub is_async: bool,
    pub skip_preview: bool,
    /// Input catalog for chains whose first step does not page an external
    /// source; ignored for producer chains.
    pub input_catalog: Option<String>,
}

impl JobSubmission {
    pub fn new(username: impl Into<String>, chain: impl Into<String>, granules: i32) -> Self {
        Self {
            username: username.into(),
            chain: chain.into(),
            num_input_granules: granules,
            ignore_errors: false,
            is_async: true,
            skip_preview: true,
            input_catalog: None,
        }
    }
}
