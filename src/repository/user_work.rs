//! User work aggregates: the per (job, service) counters behind fair
//! scheduling.
//!
//! Counter updates always ride in the same transaction as the work item
//! transition they mirror; the reconciler repairs any drift left by crashes
//! between transactions.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::pool::AsyncSqliteConnection;
use super::records::UserWorkRecord;
use super::{now_string, Result};
use crate::models::{Job, UserWork, WorkItemStatus};
use crate::schema::user_work;

/// Add `n` ready units for a (job, service), creating the row if needed.
pub async fn add_ready(
    conn: &mut AsyncSqliteConnection,
    job: &Job,
    service_id: &str,
    n: i32,
) -> Result<()> {
    diesel::sql_query(
        "INSERT INTO user_work \
            (username, job_id, service_id, is_async, ready_count, running_count, last_worked) \
         VALUES (?, ?, ?, ?, ?, 0, ?) \
         ON CONFLICT(job_id, service_id) DO UPDATE SET \
            ready_count = ready_count + excluded.ready_count",
    )
    .bind::<diesel::sql_types::Text, _>(&job.username)
    .bind::<diesel::sql_types::Text, _>(&job.job_id)
    .bind::<diesel::sql_types::Text, _>(service_id)
    .bind::<diesel::sql_types::Integer, _>(job.is_async as i32)
    .bind::<diesel::sql_types::Integer, _>(n)
    .bind::<diesel::sql_types::Text, _>(now_string())
    .execute(conn)
    .await?;
    Ok(())
}

/// Move one unit from ready to running and stamp the dispatch time.
pub async fn claim_one(
    conn: &mut AsyncSqliteConnection,
    job_id: &str,
    service_id: &str,
) -> Result<()> {
    diesel::sql_query(
        "UPDATE user_work SET \
            ready_count = MAX(ready_count - 1, 0), \
            running_count = running_count + 1, \
            last_worked = ? \
         WHERE job_id = ? AND service_id = ?",
    )
    .bind::<diesel::sql_types::Text, _>(now_string())
    .bind::<diesel::sql_types::Text, _>(job_id)
    .bind::<diesel::sql_types::Text, _>(service_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Drop one running unit (item reached a terminal status).
pub async fn finish_running(
    conn: &mut AsyncSqliteConnection,
    job_id: &str,
    service_id: &str,
) -> Result<()> {
    diesel::sql_query(
        "UPDATE user_work SET running_count = MAX(running_count - 1, 0) \
         WHERE job_id = ? AND service_id = ?",
    )
    .bind::<diesel::sql_types::Text, _>(job_id)
    .bind::<diesel::sql_types::Text, _>(service_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Move one unit from running back to ready (retry of a failed item).
pub async fn retry_to_ready(
    conn: &mut AsyncSqliteConnection,
    job_id: &str,
    service_id: &str,
) -> Result<()> {
    diesel::sql_query(
        "UPDATE user_work SET \
            running_count = MAX(running_count - 1, 0), \
            ready_count = ready_count + 1 \
         WHERE job_id = ? AND service_id = ?",
    )
    .bind::<diesel::sql_types::Text, _>(job_id)
    .bind::<diesel::sql_types::Text, _>(service_id)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn zero_for_job(conn: &mut AsyncSqliteConnection, job_id: &str) -> Result<()> {
    diesel::update(user_work::table.filter(user_work::job_id.eq(job_id)))
        .set((user_work::ready_count.eq(0), user_work::running_count.eq(0)))
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn delete_for_job(conn: &mut AsyncSqliteConnection, job_id: &str) -> Result<()> {
    diesel::delete(user_work::table.filter(user_work::job_id.eq(job_id)))
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn delete_row(
    conn: &mut AsyncSqliteConnection,
    job_id: &str,
    service_id: &str,
) -> Result<()> {
    diesel::delete(
        user_work::table
            .filter(user_work::job_id.eq(job_id))
            .filter(user_work::service_id.eq(service_id)),
    )
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn get(
    conn: &mut AsyncSqliteConnection,
    job_id: &str,
    service_id: &str,
) -> Result<Option<UserWork>> {
    let record = user_work::table
        .filter(user_work::job_id.eq(job_id))
        .filter(user_work::service_id.eq(service_id))
        .first::<UserWorkRecord>(conn)
        .await
        .optional()?;
    Ok(record.map(UserWork::from))
}

/// Rows not dispatched since the cutoff that still claim outstanding work.
pub async fn stale_rows(
    conn: &mut AsyncSqliteConnection,
    cutoff: &str,
) -> Result<Vec<UserWork>> {
    let records = user_work::table
        .filter(user_work::last_worked.lt(cutoff))
        .filter(
            user_work::ready_count
                .gt(0)
                .or(user_work::running_count.gt(0)),
        )
        .load::<UserWorkRecord>(conn)
        .await?;
    Ok(records.into_iter().map(UserWork::from).collect())
}

/// Recompute both counters from the work_items table. Returns the repaired
/// (ready, running) pair.
pub async fn recompute(
    conn: &mut AsyncSqliteConnection,
    job_id: &str,
    service_id: &str,
) -> Result<(i64, i64)> {
    let ready = super::work_items::count_job_service_status(
        conn,
        job_id,
        service_id,
        WorkItemStatus::Ready,
    )
    .await?;
    let running = super::work_items::count_job_service_status(
        conn,
        job_id,
        service_id,
        WorkItemStatus::Running,
    )
    .await?;

    diesel::update(
        user_work::table
            .filter(user_work::job_id.eq(job_id))
            .filter(user_work::service_id.eq(service_id)),
    )
    .set((
        user_work::ready_count.eq(ready as i32),
        user_work::running_count.eq(running as i32),
    ))
    .execute(conn)
    .await?;

    Ok((ready, running))
}

/// Recompute every row of a job (used when resuming a paused job).
pub async fn recompute_all_for_job(
    conn: &mut AsyncSqliteConnection,
    job_id: &str,
) -> Result<()> {
    let services: Vec<String> = user_work::table
        .filter(user_work::job_id.eq(job_id))
        .select(user_work::service_id)
        .load(conn)
        .await?;
    for service_id in services {
        recompute(conn, job_id, &service_id).await?;
    }
    Ok(())
}
