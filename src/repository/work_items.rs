//! Work item persistence: creation, claim, terminal transitions, counts.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::pool::AsyncSqliteConnection;
use super::records::ItemRecord;
use super::{now_string, Result};
use crate::models::{WorkItem, WorkItemStatus};
use crate::schema::work_items;

/// Parameters for a new READY item.
#[derive(Debug, Clone)]
pub struct NewWorkItem {
    pub job_id: String,
    pub step_index: i32,
    pub service_id: String,
    pub scroll_id: Option<String>,
    pub catalog_location: Option<String>,
}

pub async fn insert_items(
    conn: &mut AsyncSqliteConnection,
    items: &[NewWorkItem],
) -> Result<usize> {
    if items.is_empty() {
        return Ok(0);
    }
    let now = now_string();
    let rows: Vec<_> = items
        .iter()
        .map(|item| {
            (
                work_items::job_id.eq(item.job_id.clone()),
                work_items::step_index.eq(item.step_index),
                work_items::service_id.eq(item.service_id.clone()),
                work_items::status.eq(WorkItemStatus::Ready.as_str()),
                work_items::scroll_id.eq(item.scroll_id.clone()),
                work_items::catalog_location.eq(item.catalog_location.clone()),
                work_items::results.eq("[]"),
                work_items::retries.eq(0),
                work_items::created_at.eq(now.clone()),
                work_items::updated_at.eq(now.clone()),
            )
        })
        .collect();

    let mut inserted = 0;
    for row in rows {
        inserted += diesel::insert_into(work_items::table)
            .values(row)
            .execute(conn)
            .await?;
    }
    Ok(inserted)
}

pub async fn fetch_item(conn: &mut AsyncSqliteConnection, id: i32) -> Result<Option<WorkItem>> {
    let record = work_items::table
        .find(id)
        .first::<ItemRecord>(conn)
        .await
        .optional()?;
    Ok(record.map(WorkItem::from))
}

/// All items of one step, ordered by id.
pub async fn items_for_step(
    conn: &mut AsyncSqliteConnection,
    job_id: &str,
    step_index: i32,
) -> Result<Vec<WorkItem>> {
    let records = work_items::table
        .filter(work_items::job_id.eq(job_id))
        .filter(work_items::step_index.eq(step_index))
        .order(work_items::id.asc())
        .load::<ItemRecord>(conn)
        .await?;
    Ok(records.into_iter().map(WorkItem::from).collect())
}

/// Claim the oldest READY item of a (job, service), moving it to RUNNING.
///
/// A single UPDATE .. RETURNING, so an item goes to at most one caller even
/// under concurrent dispatchers.
pub async fn claim_next_ready(
    conn: &mut AsyncSqliteConnection,
    job_id: &str,
    service_id: &str,
) -> Result<Option<WorkItem>> {
    #[derive(diesel::QueryableByName)]
    struct ClaimedId {
        #[diesel(sql_type = diesel::sql_types::Integer)]
        id: i32,
    }

    let claimed: Vec<ClaimedId> = diesel::sql_query(
        "UPDATE work_items SET status = 'running', updated_at = ? \
         WHERE id = ( \
            SELECT id FROM work_items \
            WHERE job_id = ? AND service_id = ? AND status = 'ready' \
            ORDER BY id LIMIT 1) \
         RETURNING id",
    )
    .bind::<diesel::sql_types::Text, _>(now_string())
    .bind::<diesel::sql_types::Text, _>(job_id)
    .bind::<diesel::sql_types::Text, _>(service_id)
    .load(conn)
    .await?;

    match claimed.into_iter().next() {
        Some(row) => fetch_item(conn, row.id).await,
        None => Ok(None),
    }
}

/// Persist a terminal transition with the worker's message and results.
pub async fn set_terminal(
    conn: &mut AsyncSqliteConnection,
    id: i32,
    status: WorkItemStatus,
    message: Option<&str>,
    results: &[String],
) -> Result<()> {
    let results_json = serde_json::to_string(results)?;
    diesel::update(work_items::table.find(id))
        .set((
            work_items::status.eq(status.as_str()),
            work_items::message.eq(message),
            work_items::results.eq(results_json),
            work_items::updated_at.eq(now_string()),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

/// Re-queue a failed item at the same step, consuming one retry.
pub async fn requeue_for_retry(conn: &mut AsyncSqliteConnection, id: i32) -> Result<()> {
    diesel::update(work_items::table.find(id))
        .set((
            work_items::status.eq(WorkItemStatus::Ready.as_str()),
            work_items::retries.eq(work_items::retries + 1),
            work_items::updated_at.eq(now_string()),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

/// Count a step's items currently in any of the given statuses.
pub async fn count_step_status(
    conn: &mut AsyncSqliteConnection,
    job_id: &str,
    step_index: i32,
    statuses: &[WorkItemStatus],
) -> Result<i64> {
    use diesel::dsl::count_star;
    let names: Vec<&str> = statuses.iter().map(WorkItemStatus::as_str).collect();
    let count: i64 = work_items::table
        .filter(work_items::job_id.eq(job_id))
        .filter(work_items::step_index.eq(step_index))
        .filter(work_items::status.eq_any(names))
        .select(count_star())
        .first(conn)
        .await?;
    Ok(count)
}

/// Count items for a (job, service) in one status; the reconciler's source
/// of truth for user_work counters.
pub async fn count_job_service_status(
    conn: &mut AsyncSqliteConnection,
    job_id: &str,
    service_id: &str,
    status: WorkItemStatus,
) -> Result<i64> {
    use diesel::dsl::count_star;
    let count: i64 = work_items::table
        .filter(work_items::job_id.eq(job_id))
        .filter(work_items::service_id.eq(service_id))
        .filter(work_items::status.eq(status.as_str()))
        .select(count_star())
        .first(conn)
        .await?;
    Ok(count)
}

/// Per-service terminal counts since a cutoff, for failure-rate metrics.
pub async fn terminal_counts_since(
    conn: &mut AsyncSqliteConnection,
    cutoff: &str,
) -> Result<Vec<(String, String, i64)>> {
    #[derive(diesel::QueryableByName)]
    struct ServiceStatusCount {
        #[diesel(sql_type = diesel::sql_types::Text)]
        service_id: String,
        #[diesel(sql_type = diesel::sql_types::Text)]
        status: String,
        #[diesel(sql_type = diesel::sql_types::BigInt)]
        count: i64,
    }

    let rows: Vec<ServiceStatusCount> = diesel::sql_query(
        "SELECT service_id, status, COUNT(*) as count FROM work_items \
         WHERE status IN ('successful', 'warning', 'failed') AND updated_at >= ? \
         GROUP BY service_id, status",
    )
    .bind::<diesel::sql_types::Text, _>(cutoff)
    .load(conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| (r.service_id, r.status, r.count))
        .collect())
}

/// Delete one batch of work items whose job has terminated and whose last
/// update is older than the cutoff. Returns the number of rows deleted.
pub async fn reap_terminated_items(
    conn: &mut AsyncSqliteConnection,
    cutoff: &str,
    limit: i64,
) -> Result<usize> {
    let deleted = diesel::sql_query(
        "DELETE FROM work_items WHERE id IN ( \
            SELECT wi.id FROM work_items wi \
            JOIN jobs j ON j.job_id = wi.job_id \
            WHERE j.status IN ('canceled', 'complete_with_errors', 'successful', 'failed') \
              AND wi.updated_at < ? \
            LIMIT ?)",
    )
    .bind::<diesel::sql_types::Text, _>(cutoff)
    .bind::<diesel::sql_types::BigInt, _>(limit)
    .execute(conn)
    .await?;
    Ok(deleted)
}

/// Companion to [`reap_terminated_items`] for workflow steps.
pub async fn reap_terminated_steps(
    conn: &mut AsyncSqliteConnection,
    cutoff: &str,
    limit: i64,
) -> Result<usize> {
    let deleted = diesel::sql_query(
        "DELETE FROM workflow_steps WHERE id IN ( \
            SELECT ws.id FROM workflow_steps ws \
            JOIN jobs j ON j.job_id = ws.job_id \
            WHERE j.status IN ('canceled', 'complete_with_errors', 'successful', 'failed') \
              AND ws.updated_at < ? \
            LIMIT ?)",
    )
    .bind::<diesel::sql_types::Text, _>(cutoff)
    .bind::<diesel::sql_types::BigInt, _>(limit)
    .execute(conn)
    .await?;
    Ok(deleted)
}
