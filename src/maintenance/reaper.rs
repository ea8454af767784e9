//! Work reaper: batched deletion of rows belonging to long-terminated jobs.

use chrono::Utc;

use crate::config::Settings;
use crate::repository::{format_datetime, work_items, AsyncSqlitePool, Result};

/// Delete work items and workflow steps of terminated jobs older than the
/// reapable age, in batches. Stops when a batch comes back short. Returns
/// the total number of rows deleted.
pub async fn run(pool: &AsyncSqlitePool, settings: &Settings) -> Result<usize> {
    let cutoff = format_datetime(Utc::now() - settings.reapable_age());
    let batch = settings.work_reaper_batch_size;
    let mut conn = pool.get().await?;
    let mut total = 0;

    loop {
        let deleted = work_items::reap_terminated_items(&mut conn, &cutoff, batch).await?;
        total += deleted;
        if (deleted as i64) < batch {
            break;
        }
    }
    loop {
        let deleted = work_items::reap_terminated_steps(&mut conn, &cutoff, batch).await?;
        total += deleted;
        if (deleted as i64) < batch {
            break;
        }
    }

    if total > 0 {
        tracing::info!(rows = total, "reaped terminated job rows");
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobSubmission;
    use crate::repository::{run_migrations, JobRepository};
    use crate::services::ServiceRegistry;
    use diesel_async::RunQueryDsl;
    use tempfile::tempdir;

    async fn backdate_job_rows(pool: &AsyncSqlitePool, job_id: &str) {
        let mut conn = pool.get().await.unwrap();
        for table in ["work_items", "workflow_steps"] {
            diesel::sql_query(format!(
                "UPDATE {} SET updated_at = '2000-01-01T00:00:00.000000Z' WHERE job_id = ?",
                table
            ))
            .bind::<diesel::sql_types::Text, _>(job_id)
            .execute(&mut conn)
            .await
            .unwrap();
        }
    }

    async fn remaining_rows(pool: &AsyncSqlitePool, job_id: &str) -> (usize, usize) {
        let mut conn = pool.get().await.unwrap();
        let items = work_items::items_for_step(&mut conn, job_id, 1)
            .await
            .unwrap()
            .len();
        let steps = crate::repository::steps::fetch_steps(&mut conn, job_id)
            .await
            .unwrap()
            .len();
        (items, steps)
    }

    #[tokio::test]
    async fn reaps_only_old_terminated_jobs() {
        let dir = tempdir().unwrap();
        let url = dir.path().join("test.db").display().to_string();
        run_migrations(&url).await.unwrap();
        let pool = AsyncSqlitePool::new(&url);
        let repo = JobRepository::new(pool.clone());
        let registry = ServiceRegistry::builtin();
        let settings = Settings {
            work_reaper_batch_size: 100,
            reapable_work_age_minutes: 60,
            ..Settings::default()
        };

        let old = repo
            .create(&JobSubmission::new("alice", "reproject-zarr", 1), &registry)
            .await
            .unwrap();
        repo.cancel(&old.job_id).await.unwrap();
        backdate_job_rows(&pool, &old.job_id).await;

        let live = repo
            .create(&JobSubmission::new("bob", "reproject-zarr", 1), &registry)
            .await
            .unwrap();
        backdate_job_rows(&pool, &live.job_id).await;

        let deleted = run(&pool, &settings).await.unwrap();
        assert_eq!(deleted, 4); // 1 item + 3 steps

        assert_eq!(remaining_rows(&pool, &old.job_id).await, (0, 0));
        // Running jobs keep their rows no matter how stale.
        assert_eq!(remaining_rows(&pool, &live.job_id).await, (1, 3));
    }

    #[tokio::test]
    async fn recently_terminated_jobs_are_kept() {
        let dir = tempdir().unwrap();
        let url = dir.path().join("test.db").display().to_string();
        run_migrations(&url).await.unwrap();
        let pool = AsyncSqlitePool::new(&url);
        let repo = JobRepository::new(pool.clone());
        let registry = ServiceRegistry::builtin();
        let settings = Settings::default();

        let job = repo
            .create(&JobSubmission::new("alice", "reproject-zarr", 1), &registry)
            .await
            .unwrap();
        repo.cancel(&job.job_id).await.unwrap();

        let deleted = run(&pool, &settings).await.unwrap();
        assert_eq!(deleted, 0);
        assert_eq!(remaining_rows(&pool, &job.job_id).await, (1, 3));
    }
}
