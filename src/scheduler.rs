//! Fair-queue work dispatch.
//!
//! Given a service and a batch limit, the scheduler chooses jobs in an order
//! that interleaves users round-robin (the longest-starved job of every user
//! first), prefers synchronous jobs, and dequeues one READY item per job per
//! round. The whole dispatch runs in one transaction so an item is handed to
//! at most one caller and the user_work counters move with it.

use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::Serialize;

use crate::models::{JobStatus, WorkItem};
use crate::repository::{jobs, user_work, work_items, AsyncSqlitePool, RepositoryError};

/// A claimed item plus the granule page budget for producer-stage items.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchedWork {
    #[serde(rename = "workItem")]
    pub item: WorkItem,
    /// Populated only for producer items: how many granules the worker may
    /// pull in this page.
    #[serde(rename = "maxCmrGranules", skip_serializing_if = "Option::is_none")]
    pub max_granules: Option<i32>,
}

/// Candidate jobs for a service, in fair-queue order: synchronous jobs beat
/// asynchronous ones outright; within each user jobs rank by last dispatch
/// (oldest starved first); across users rank-1 jobs of every user come
/// before any rank-2 job; ties break on last_worked.
const FAIR_QUEUE_SQL: &str = "\
    SELECT job_id FROM ( \
        SELECT job_id, is_async, last_worked, \
               ROW_NUMBER() OVER ( \
                   PARTITION BY username \
                   ORDER BY last_worked ASC, job_id ASC \
               ) AS user_rank \
        FROM user_work \
        WHERE service_id = ? AND ready_count > 0 \
    ) \
    ORDER BY is_async ASC, user_rank ASC, last_worked ASC \
    LIMIT ?";

#[derive(Clone)]
pub struct WorkScheduler {
    pool: AsyncSqlitePool,
    cmr_max_page_size: i32,
}

impl WorkScheduler {
    pub fn new(pool: AsyncSqlitePool, cmr_max_page_size: i32) -> Self {
        Self {
            pool,
            cmr_max_page_size,
        }
    }

    /// Claim up to `max_items` READY items for a service. An empty result is
    /// the normal "no work" answer, not an error.
    pub async fn get_work(
        &self,
        service_id: &str,
        max_items: usize,
    ) -> Result<Vec<DispatchedWork>, RepositoryError> {
        if max_items == 0 {
            return Ok(Vec::new());
        }

        let cmr_max_page_size = self.cmr_max_page_size;
        let mut conn = self.pool.get().await?;
        let service_id = service_id.to_string();

        conn.transaction::<_, RepositoryError, _>(|conn| {
            async move {
                #[derive(diesel::QueryableByName)]
                struct CandidateRow {
                    #[diesel(sql_type = diesel::sql_types::Text)]
                    job_id: String,
                }

                let candidates: Vec<CandidateRow> = diesel::sql_query(FAIR_QUEUE_SQL)
                    .bind::<diesel::sql_types::Text, _>(&service_id)
                    .bind::<diesel::sql_types::BigInt, _>(max_items as i64)
                    .load(conn)
                    .await?;

                let mut dispatched = Vec::new();
                let mut round: Vec<String> =
                    candidates.into_iter().map(|c| c.job_id).collect();

                // Cycle through the candidate jobs, one item per job per
                // round, until the batch is full or nothing is claimable.
                while dispatched.len() < max_items && !round.is_empty() {
                    let mut next_round = Vec::new();
                    for job_id in round {
                        if dispatched.len() >= max_items {
                            break;
                        }
                        let Some(mut job) = jobs::fetch_job(conn, &job_id).await? else {
                            continue;
                        };
                        if !job.status.is_dispatchable() {
                            continue;
                        }
                        let Some(item) =
                            work_items::claim_next_ready(conn, &job_id, &service_id).await?
                        else {
                            continue;
                        };
                        user_work::claim_one(conn, &job_id, &service_id).await?;

                        if job.status == JobStatus::Accepted {
                            job.status = JobStatus::Running;
                            jobs::persist_job(conn, &job).await?;
                        }

                        let step =
                            crate::repository::steps::fetch_step(conn, &job_id, item.step_index)
                                .await?;
                        let max_granules = match step {
                            Some(step) if step.is_producer => Some(
                                job.remaining_granule_budget().min(cmr_max_page_size),
                            ),
                            _ => None,
                        };

                        dispatched.push(DispatchedWork { item, max_granules });
                        next_round.push(job_id);
                    }
                    round = next_round;
                }

                Ok(dispatched)
            }
            .scope_boxed()
        })
        .await
    }
}
