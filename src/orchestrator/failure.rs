//! Failure policy for terminal work item failures.

use crate::models::{Job, WorkItem};

/// What to do with a FAILED completion report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Re-queue the item at the same step, consuming one retry.
    Retry,
    /// Count the failure and keep the job running.
    Tolerate,
    /// Fail the job and cancel all of its outstanding work.
    FailJob,
}

/// Classify a failure against the retry budget and the job's error policy.
///
/// `retriable` is false for failures the orchestrator itself raised from
/// malformed results; re-running the worker cannot fix those.
pub fn classify(
    job: &Job,
    item: &WorkItem,
    retriable: bool,
    max_retries: i32,
    max_errors_for_job: i32,
) -> FailureDisposition {
    if retriable && item.retries < max_retries {
        return FailureDisposition::Retry;
    }
    // The failure is terminal for the item; the caller has already counted
    // it in failed_item_count.
    if !job.ignore_errors || job.failed_item_count > max_errors_for_job {
        return FailureDisposition::FailJob;
    }
    FailureDisposition::Tolerate
}
