//! Job result links and per-job error records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user-visible result link attached to a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLink {
    pub id: i32,
    pub job_id: String,
    /// Work item that produced the link; orders links deterministically.
    pub item_id: i32,
    pub href: String,
    pub title: Option<String>,
    pub rel: String,
    #[serde(rename = "type")]
    pub mime_type: Option<String>,
    /// [W, S, E, N]
    pub bbox: Option<[f64; 4]>,
    pub temporal_start: Option<DateTime<Utc>>,
    pub temporal_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One recorded failure for a job, retained for the user-facing message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub id: i32,
    pub job_id: String,
    pub url: Option<String>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
