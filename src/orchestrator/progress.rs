//! Progress accounting and job finalization.

use crate::models::{Job, JobStatus, WorkItemStatus};
use crate::repository::{jobs, steps, user_work, work_items, AsyncSqliteConnection};

use super::OrchestratorError;

/// Recompute the job's progress as the fraction of expected final-step items
/// that finished with output. While the producer stage is still paging, the
/// planned granule count is only an upper bound, so progress is clamped.
pub async fn recompute(
    conn: &mut AsyncSqliteConnection,
    job: &mut Job,
) -> Result<(), OrchestratorError> {
    let step_list = steps::fetch_steps(conn, &job.job_id).await?;
    let Some(final_step) = step_list.last() else {
        return Ok(());
    };

    let producer_open = step_list
        .first()
        .map(|s| s.is_producer && !s.is_complete)
        .unwrap_or(false);
    let priors_complete = step_list[..step_list.len() - 1]
        .iter()
        .all(|s| s.is_complete);

    let expected: i64 = if final_step.has_aggregated_output {
        1
    } else if priors_complete && final_step.work_item_count > 0 {
        final_step.work_item_count as i64
    } else {
        job.num_input_granules.max(1) as i64
    };

    let done = work_items::count_step_status(
        conn,
        &job.job_id,
        final_step.step_index,
        &[WorkItemStatus::Successful, WorkItemStatus::Warning],
    )
    .await?;

    // 100 is reserved for finalization.
    let cap = if producer_open { 95 } else { 99 };
    job.progress = ((done * 100) / expected.max(1)).clamp(0, cap) as i32;
    Ok(())
}

/// Drive a job whose steps have all completed to its terminal status.
pub async fn finalize(
    conn: &mut AsyncSqliteConnection,
    job: &mut Job,
) -> Result<(), OrchestratorError> {
    let links = jobs::count_links(conn, &job.job_id).await?;

    if job.failed_item_count == 0 {
        job.status = JobStatus::Successful;
        job.progress = 100;
        if job.message.is_none() {
            job.message = Some("Completed successfully".to_string());
        }
    } else if links > 0 {
        job.status = JobStatus::CompleteWithErrors;
        job.progress = 100;
        job.message = Some(representative_error(conn, job).await?);
    } else {
        job.status = JobStatus::Failed;
        job.message = Some(representative_error(conn, job).await?);
    }

    user_work::delete_for_job(conn, &job.job_id).await?;
    tracing::info!(
        job_id = %job.job_id,
        status = job.status.as_str(),
        "job finalized"
    );
    Ok(())
}

/// The most specific user-facing reason: the first recorded failure.
async fn representative_error(
    conn: &mut AsyncSqliteConnection,
    job: &Job,
) -> Result<String, OrchestratorError> {
    Ok(jobs::first_error(conn, &job.job_id)
        .await?
        .map(|e| e.message)
        .unwrap_or_else(|| {
            format!("completed with {} failed work items", job.failed_item_count)
        }))
}
