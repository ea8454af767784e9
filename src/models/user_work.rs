//! Per (job, service) queue aggregate driving scheduling fairness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ready/running counters for one (job, service) pair.
///
/// A row exists only while the job has non-terminal work for the service.
/// The counters mirror the matching `work_items` statuses; the user-work
/// reconciler repairs any drift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserWork {
    pub id: i32,
    pub username: String,
    pub job_id: String,
    pub service_id: String,
    pub is_async: bool,
    pub ready_count: i32,
    pub running_count: i32,
    /// Timestamp of the last dispatch for this row; drives starvation order.
    pub last_worked: DateTime<Utc>,
}
