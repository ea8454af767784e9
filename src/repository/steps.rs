//! Workflow step persistence.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::pool::AsyncSqliteConnection;
use super::records::StepRecord;
use super::{now_string, Result};
use crate::models::{Job, WorkflowStep};
use crate::schema::workflow_steps;
use crate::services::ServiceChain;

/// Insert one step row per chain stage, densely indexed from 1.
pub async fn insert_steps(
    conn: &mut AsyncSqliteConnection,
    job: &Job,
    chain: &ServiceChain,
) -> Result<()> {
    let now = now_string();
    let rows: Vec<_> = chain
        .steps
        .iter()
        .enumerate()
        .map(|(i, step)| {
            (
                workflow_steps::job_id.eq(job.job_id.clone()),
                workflow_steps::step_index.eq(i as i32 + 1),
                workflow_steps::service_id.eq(step.service.clone()),
                workflow_steps::work_item_count.eq(0),
                workflow_steps::has_aggregated_output.eq(step.aggregating as i32),
                workflow_steps::is_producer.eq((i == 0 && chain.producer) as i32),
                workflow_steps::is_complete.eq(0),
                workflow_steps::created_at.eq(now.clone()),
                workflow_steps::updated_at.eq(now.clone()),
            )
        })
        .collect();

    for row in rows {
        diesel::insert_into(workflow_steps::table)
            .values(row)
            .execute(conn)
            .await?;
    }
    Ok(())
}

/// All steps of a job, ordered by step index.
pub async fn fetch_steps(
    conn: &mut AsyncSqliteConnection,
    job_id: &str,
) -> Result<Vec<WorkflowStep>> {
    let records = workflow_steps::table
        .filter(workflow_steps::job_id.eq(job_id))
        .order(workflow_steps::step_index.asc())
        .load::<StepRecord>(conn)
        .await?;
    Ok(records.into_iter().map(WorkflowStep::from).collect())
}

pub async fn fetch_step(
    conn: &mut AsyncSqliteConnection,
    job_id: &str,
    step_index: i32,
) -> Result<Option<WorkflowStep>> {
    let record = workflow_steps::table
        .filter(workflow_steps::job_id.eq(job_id))
        .filter(workflow_steps::step_index.eq(step_index))
        .first::<StepRecord>(conn)
        .await
        .optional()?;
    Ok(record.map(WorkflowStep::from))
}

/// Grow a step's planned fan-out by `delta` newly created items.
pub async fn add_work_items(
    conn: &mut AsyncSqliteConnection,
    job_id: &str,
    step_index: i32,
    delta: i32,
) -> Result<()> {
    diesel::update(
        workflow_steps::table
            .filter(workflow_steps::job_id.eq(job_id))
            .filter(workflow_steps::step_index.eq(step_index)),
    )
    .set((
        workflow_steps::work_item_count.eq(workflow_steps::work_item_count + delta),
        workflow_steps::updated_at.eq(now_string()),
    ))
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn set_complete(
    conn: &mut AsyncSqliteConnection,
    job_id: &str,
    step_index: i32,
) -> Result<()> {
    diesel::update(
        workflow_steps::table
            .filter(workflow_steps::job_id.eq(job_id))
            .filter(workflow_steps::step_index.eq(step_index)),
    )
    .set((
        workflow_steps::is_complete.eq(1),
        workflow_steps::updated_at.eq(now_string()),
    ))
    .execute(conn)
    .await?;
    Ok(())
}

/// Number of steps that have not yet completed.
pub async fn incomplete_count(conn: &mut AsyncSqliteConnection, job_id: &str) -> Result<i64> {
    use diesel::dsl::count_star;
    let count: i64 = workflow_steps::table
        .filter(workflow_steps::job_id.eq(job_id))
        .filter(workflow_steps::is_complete.eq(0))
        .select(count_star())
        .first(conn)
        .await?;
    Ok(count)
}
