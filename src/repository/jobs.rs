//! Job persistence: creation, lifecycle transitions, links and errors.

use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::pool::{AsyncSqliteConnection, AsyncSqlitePool};
use super::records::{ErrorRecord, JobRecord, LinkRecord};
use super::{now_string, steps, user_work, work_items, RepositoryError, Result};
use crate::models::{Job, JobError, JobLink, JobStatus, JobSubmission, ValidatedItem, WorkItemStatus};
use crate::schema::{job_errors, job_links, jobs, work_items as work_items_table};
use crate::services::ServiceRegistry;

pub async fn insert_job(conn: &mut AsyncSqliteConnection, job: &Job) -> Result<()> {
    diesel::insert_into(jobs::table)
        .values((
            jobs::job_id.eq(&job.job_id),
            jobs::request_id.eq(&job.request_id),
            jobs::username.eq(&job.username),
            jobs::status.eq(job.status.as_str()),
            jobs::progress.eq(job.progress),
            jobs::message.eq(&job.message),
            jobs::is_async.eq(job.is_async as i32),
            jobs::ignore_errors.eq(job.ignore_errors as i32),
            jobs::num_input_granules.eq(job.num_input_granules),
            jobs::granule_limit.eq(job.granule_limit),
            jobs::granules_produced.eq(job.granules_produced),
            jobs::failed_item_count.eq(job.failed_item_count),
            jobs::created_at.eq(now_string()),
            jobs::updated_at.eq(now_string()),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn fetch_job(conn: &mut AsyncSqliteConnection, job_id: &str) -> Result<Option<Job>> {
    let record = jobs::table
        .find(job_id)
        .first::<JobRecord>(conn)
        .await
        .optional()?;
    Ok(record.map(Job::from))
}

/// Persist the mutable fields of a job row.
pub async fn persist_job(conn: &mut AsyncSqliteConnection, job: &Job) -> Result<()> {
    diesel::update(jobs::table.find(&job.job_id))
        .set((
            jobs::status.eq(job.status.as_str()),
            jobs::progress.eq(job.progress),
            jobs::message.eq(&job.message),
            jobs::granules_produced.eq(job.granules_produced),
            jobs::failed_item_count.eq(job.failed_item_count),
            jobs::updated_at.eq(now_string()),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

/// Terminate a job and cascade: every READY or RUNNING item is CANCELED and
/// the job's user_work rows are removed, all in the caller's transaction.
/// Workers still holding items observe a conflict when they report back.
pub async fn terminate_job(
    conn: &mut AsyncSqliteConnection,
    job: &mut Job,
    status: JobStatus,
    message: &str,
) -> Result<()> {
    diesel::update(
        work_items_table::table
            .filter(work_items_table::job_id.eq(&job.job_id))
            .filter(work_items_table::status.eq_any([
                WorkItemStatus::Ready.as_str(),
                WorkItemStatus::Running.as_str(),
            ])),
    )
    .set((
        work_items_table::status.eq(WorkItemStatus::Canceled.as_str()),
        work_items_table::updated_at.eq(now_string()),
    ))
    .execute(conn)
    .await?;

    user_work::delete_for_job(conn, &job.job_id).await?;

    job.status = status;
    job.message = Some(message.to_string());
    persist_job(conn, job).await?;
    Ok(())
}

/// Attach validated catalog entries as result links for a final-step item.
pub async fn insert_links(
    conn: &mut AsyncSqliteConnection,
    job_id: &str,
    item_id: i32,
    entries: &[ValidatedItem],
) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }
    let now = now_string();
    let mut rows = Vec::with_capacity(entries.len());
    for entry in entries {
        let bbox_json = match &entry.bbox {
            Some(bbox) => Some(serde_json::to_string(bbox)?),
            None => None,
        };
        rows.push((
            job_links::job_id.eq(job_id.to_string()),
            job_links::item_id.eq(item_id),
            job_links::href.eq(entry.href.clone()),
            job_links::title.eq(entry.title.clone()),
            job_links::rel.eq("data"),
            job_links::mime_type.eq(entry.mime_type.clone()),
            job_links::bbox.eq(bbox_json),
            job_links::temporal_start
                .eq(entry.temporal.map(|(start, _)| super::format_datetime(start))),
            job_links::temporal_end
                .eq(entry.temporal.map(|(_, end)| super::format_datetime(end))),
            job_links::created_at.eq(now.clone()),
        ));
    }

    for row in rows {
        diesel::insert_into(job_links::table)
            .values(row)
            .execute(conn)
            .await?;
    }
    Ok(())
}

/// Result links in deterministic order: producing item id, then insertion.
pub async fn list_links(conn: &mut AsyncSqliteConnection, job_id: &str) -> Result<Vec<JobLink>> {
    let records = job_links::table
        .filter(job_links::job_id.eq(job_id))
        .order((job_links::item_id.asc(), job_links::id.asc()))
        .load::<LinkRecord>(conn)
        .await?;
    Ok(records.into_iter().map(JobLink::from).collect())
}

pub async fn count_links(conn: &mut AsyncSqliteConnection, job_id: &str) -> Result<i64> {
    use diesel::dsl::count_star;
    let count: i64 = job_links::table
        .filter(job_links::job_id.eq(job_id))
        .select(count_star())
        .first(conn)
        .await?;
    Ok(count)
}

pub async fn insert_error(
    conn: &mut AsyncSqliteConnection,
    job_id: &str,
    url: Option<&str>,
    message: &str,
) -> Result<()> {
    diesel::insert_into(job_errors::table)
        .values((
            job_errors::job_id.eq(job_id),
            job_errors::url.eq(url),
            job_errors::message.eq(message),
            job_errors::created_at.eq(now_string()),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn list_errors(conn: &mut AsyncSqliteConnection, job_id: &str) -> Result<Vec<JobError>> {
    let records = job_errors::table
        .filter(job_errors::job_id.eq(job_id))
        .order(job_errors::id.asc())
        .load::<ErrorRecord>(conn)
        .await?;
    Ok(records.into_iter().map(JobError::from).collect())
}

/// The first recorded failure, used as the representative job message.
pub async fn first_error(
    conn: &mut AsyncSqliteConnection,
    job_id: &str,
) -> Result<Option<JobError>> {
    let record = job_errors::table
        .filter(job_errors::job_id.eq(job_id))
        .order(job_errors::id.asc())
        .first::<ErrorRecord>(conn)
        .await
        .optional()?;
    Ok(record.map(JobError::from))
}

/// Pool-holding repository for job lifecycle operations.
#[derive(Clone)]
pub struct JobRepository {
    pool: AsyncSqlitePool,
}

impl JobRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Create a job with its workflow steps, the step-1 work item and the
    /// matching user_work row, all in one transaction.
    pub async fn create(
        &self,
        submission: &JobSubmission,
        registry: &ServiceRegistry,
    ) -> Result<Job> {
        let chain = registry
            .chain(&submission.chain)
            .ok_or_else(|| RepositoryError::NotFound(format!("service chain {}", submission.chain)))?
            .clone();

        let granule_limit = if chain.producer {
            registry
                .granule_limit(&chain.steps[0].service)
                .map(|limit| limit.min(submission.num_input_granules))
                .unwrap_or(submission.num_input_granules)
        } else {
            submission.num_input_granules
        };

        let job = Job::new(submission, granule_limit);
        let first_service = chain.steps[0].service.clone();
        let input_catalog = submission.input_catalog.clone();

        let mut conn = self.pool.get().await?;
        let job_ref = &job;
        let chain_ref = &chain;
        conn.transaction::<_, RepositoryError, _>(|conn| {
            async move {
                insert_job(conn, job_ref).await?;
                steps::insert_steps(conn, job_ref, chain_ref).await?;
                work_items::insert_items(
                    conn,
                    &[work_items::NewWorkItem {
                        job_id: job_ref.job_id.clone(),
                        step_index: 1,
                        service_id: first_service.clone(),
                        scroll_id: None,
                        catalog_location: input_catalog.clone(),
                    }],
                )
                .await?;
                steps::add_work_items(conn, &job_ref.job_id, 1, 1).await?;
                user_work::add_ready(conn, job_ref, &first_service, 1).await?;
                Ok(())
            }
            .scope_boxed()
        })
        .await?;

        Ok(job)
    }

    pub async fn get(&self, job_id: &str) -> Result<Job> {
        let mut conn = self.pool.get().await?;
        fetch_job(&mut conn, job_id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("job {}", job_id)))
    }

    pub async fn links(&self, job_id: &str) -> Result<Vec<JobLink>> {
        let mut conn = self.pool.get().await?;
        list_links(&mut conn, job_id).await
    }

    pub async fn errors(&self, job_id: &str) -> Result<Vec<JobError>> {
        let mut conn = self.pool.get().await?;
        list_errors(&mut conn, job_id).await
    }

    /// User-initiated cancellation.
    pub async fn cancel(&self, job_id: &str) -> Result<Job> {
        let mut conn = self.pool.get().await?;
        let job_id = job_id.to_string();
        conn.transaction::<_, RepositoryError, _>(|conn| {
            async move {
                let mut job = fetch_job(conn, &job_id)
                    .await?
                    .ok_or_else(|| RepositoryError::NotFound(format!("job {}", job_id)))?;
                if job.status.is_terminal() {
                    return Err(RepositoryError::InvalidState(format!(
                        "job {} is already {}",
                        job.job_id,
                        job.status.as_str()
                    )));
                }
                terminate_job(conn, &mut job, JobStatus::Canceled, "Canceled by user.").await?;
                Ok(job)
            }
            .scope_boxed()
        })
        .await
    }

    /// Pause a job: no further dispatch until resumed.
    pub async fn pause(&self, job_id: &str) -> Result<Job> {
        let mut conn = self.pool.get().await?;
        let job_id = job_id.to_string();
        conn.transaction::<_, RepositoryError, _>(|conn| {
            async move {
                let mut job = fetch_job(conn, &job_id)
                    .await?
                    .ok_or_else(|| RepositoryError::NotFound(format!("job {}", job_id)))?;
                if job.status.is_terminal() || job.status == JobStatus::Paused {
                    return Err(RepositoryError::InvalidState(format!(
                        "job {} is {}",
                        job.job_id,
                        job.status.as_str()
                    )));
                }
                job.status = JobStatus::Paused;
                persist_job(conn, &job).await?;
                user_work::zero_for_job(conn, &job.job_id).await?;
                Ok(job)
            }
            .scope_boxed()
        })
        .await
    }

    /// Resume a paused (or previewing) job, restoring its queue counters.
    pub async fn resume(&self, job_id: &str) -> Result<Job> {
        let mut conn = self.pool.get().await?;
        let job_id = job_id.to_string();
        conn.transaction::<_, RepositoryError, _>(|conn| {
            async move {
                let mut job = fetch_job(conn, &job_id)
                    .await?
                    .ok_or_else(|| RepositoryError::NotFound(format!("job {}", job_id)))?;
                if !matches!(job.status, JobStatus::Paused | JobStatus::Previewing) {
                    return Err(RepositoryError::InvalidState(format!(
                        "job {} is {}",
                        job.job_id,
                        job.status.as_str()
                    )));
                }
                job.status = JobStatus::Running;
                persist_job(conn, &job).await?;
                user_work::recompute_all_for_job(conn, &job.job_id).await?;
                Ok(job)
            }
            .scope_boxed()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::run_migrations;
    use tempfile::tempdir;

    async fn setup() -> (AsyncSqlitePool, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let url = dir.path().join("test.db").display().to_string();
        run_migrations(&url).await.unwrap();
        (AsyncSqlitePool::new(&url), dir)
    }

    #[tokio::test]
    async fn create_materializes_steps_first_item_and_counters() {
        let (pool, _dir) = setup().await;
        let repo = JobRepository::new(pool.clone());
        let registry = ServiceRegistry::builtin();

        let submission = JobSubmission::new("alice", "reproject-zarr", 3);
        let job = repo.create(&submission, &registry).await.unwrap();
        assert_eq!(job.granule_limit, 3);

        let mut conn = pool.get().await.unwrap();
        let job_steps = steps::fetch_steps(&mut conn, &job.job_id).await.unwrap();
        assert_eq!(job_steps.len(), 3);
        assert_eq!(job_steps[0].service_id, "harmony/query-cmr");
        assert_eq!(job_steps[0].work_item_count, 1);
        assert_eq!(job_steps[1].work_item_count, 0);

        let items = work_items::items_for_step(&mut conn, &job.job_id, 1)
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status, WorkItemStatus::Ready);

        let row = user_work::get(&mut conn, &job.job_id, "harmony/query-cmr")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.ready_count, 1);
        assert_eq!(row.running_count, 0);
    }

    #[tokio::test]
    async fn granule_limit_snapshots_service_cap() {
        let (pool, _dir) = setup().await;
        let repo = JobRepository::new(pool);
        let registry = ServiceRegistry::builtin();

        let submission = JobSubmission::new("alice", "reproject-zarr", 5000);
        let job = repo.create(&submission, &registry).await.unwrap();
        assert_eq!(job.granule_limit, 2000);
    }

    #[tokio::test]
    async fn cancel_cascades_to_items_and_counters() {
        let (pool, _dir) = setup().await;
        let repo = JobRepository::new(pool.clone());
        let registry = ServiceRegistry::builtin();

        let job = repo
            .create(&JobSubmission::new("alice", "reproject-zarr", 2), &registry)
            .await
            .unwrap();

        let canceled = repo.cancel(&job.job_id).await.unwrap();
        assert_eq!(canceled.status, JobStatus::Canceled);

        let mut conn = pool.get().await.unwrap();
        let items = work_items::items_for_step(&mut conn, &job.job_id, 1)
            .await
            .unwrap();
        assert!(items
            .iter()
            .all(|item| item.status == WorkItemStatus::Canceled));
        assert!(user_work::get(&mut conn, &job.job_id, "harmony/query-cmr")
            .await
            .unwrap()
            .is_none());

        // Terminal jobs reject a second cancel.
        assert!(matches!(
            repo.cancel(&job.job_id).await,
            Err(RepositoryError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn pause_zeroes_and_resume_recomputes_counters() {
        let (pool, _dir) = setup().await;
        let repo = JobRepository::new(pool.clone());
        let registry = ServiceRegistry::builtin();

        let job = repo
            .create(&JobSubmission::new("alice", "reproject-zarr", 2), &registry)
            .await
            .unwrap();

        repo.pause(&job.job_id).await.unwrap();
        let mut conn = pool.get().await.unwrap();
        let row = user_work::get(&mut conn, &job.job_id, "harmony/query-cmr")
            .await
            .unwrap()
            .unwrap();
        assert_eq!((row.ready_count, row.running_count), (0, 0));

        repo.resume(&job.job_id).await.unwrap();
        let row = user_work::get(&mut conn, &job.job_id, "harmony/query-cmr")
            .await
            .unwrap()
            .unwrap();
        assert_eq!((row.ready_count, row.running_count), (1, 0));
    }
}
