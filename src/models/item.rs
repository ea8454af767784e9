//! Work item model: one dispatchable unit at a given workflow step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    Ready,
    Running,
    Successful,
    Warning,
    Failed,
    Canceled,
}

impl WorkItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Successful => "successful",
            Self::Warning => "warning",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ready" => Some(Self::Ready),
            "running" => Some(Self::Running),
            "successful" => Some(Self::Successful),
            "warning" => Some(Self::Warning),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Successful | Self::Warning | Self::Failed | Self::Canceled
        )
    }

    /// Terminal statuses whose outputs feed the next step or the job links.
    pub fn produced_output(&self) -> bool {
        matches!(self, Self::Successful | Self::Warning)
    }
}

/// One executable unit of work, handed to exactly one worker at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: i32,
    pub job_id: String,
    pub step_index: i32,
    pub service_id: String,
    pub status: WorkItemStatus,
    /// Continuation token for producer-stage items paging an external source.
    pub scroll_id: Option<String>,
    /// Object-store location of this item's input catalog.
    pub catalog_location: Option<String>,
    /// Object-store locations of the output catalogs, in worker order.
    pub results: Vec<String>,
    pub retries: i32,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A completion report posted by a worker for a RUNNING item.
///
/// `status` may only be one of SUCCESSFUL, WARNING or FAILED; `results` is
/// required (possibly empty) for the first two and ignored for FAILED.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkItemUpdate {
    pub status: String,
    #[serde(default)]
    pub results: Vec<String>,
    #[serde(default, rename = "scrollID")]
    pub scroll_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl WorkItemUpdate {
    /// Parse the reported status, restricted to the statuses a worker may post.
    pub fn final_status(&self) -> Option<WorkItemStatus> {
        match WorkItemStatus::from_str(&self.status) {
            Some(s @ (WorkItemStatus::Successful | WorkItemStatus::Warning | WorkItemStatus::Failed)) => {
                Some(s)
            }
            _ => None,
        }
    }
}
