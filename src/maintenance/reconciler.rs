//! User-work reconciler: repairs drifted ready/running counters.
//!
//! Crashes between the item transaction and the counter update can leave a
//! user_work row out of sync with the work_items table. This loop is the
//! system's fixpoint: stale rows are recounted from the items themselves,
//! rows of terminated jobs are removed, and paused jobs are zeroed.

use chrono::Utc;

use crate::config::Settings;
use crate::models::JobStatus;
use crate::repository::{format_datetime, jobs, user_work, AsyncSqlitePool, Result};

/// Reconcile every stale row. Returns the number of rows touched.
pub async fn run(pool: &AsyncSqlitePool, settings: &Settings) -> Result<usize> {
    let cutoff = format_datetime(Utc::now() - settings.user_work_expiration());
    let mut conn = pool.get().await?;

    let stale = user_work::stale_rows(&mut conn, &cutoff).await?;
    let mut touched = 0;

    for row in stale {
        let Some(job) = jobs::fetch_job(&mut conn, &row.job_id).await? else {
            user_work::delete_row(&mut conn, &row.job_id, &row.service_id).await?;
            touched += 1;
            continue;
        };

        if job.status.is_terminal() {
            user_work::delete_row(&mut conn, &row.job_id, &row.service_id).await?;
        } else if job.status == JobStatus::Paused {
            user_work::zero_for_job(&mut conn, &row.job_id).await?;
        } else {
            let (ready, running) =
                user_work::recompute(&mut conn, &row.job_id, &row.service_id).await?;
            if ready as i32 != row.ready_count || running as i32 != row.running_count {
                tracing::warn!(
                    job_id = %row.job_id,
                    service = %row.service_id,
                    old_ready = row.ready_count,
                    old_running = row.running_count,
                    ready,
                    running,
                    "repaired drifted user_work counters"
                );
            }
        }
        touched += 1;
    }

    Ok(touched)
}
