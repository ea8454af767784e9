//! The step engine: reacts to every work item completion.
//!
//! A completion report either re-queues the item (retry), fans the item's
//! output catalogs into the next step, defers them for an aggregating step,
//! attaches final-step outputs as job links, or fails the job and cancels
//! its outstanding work. All state transitions for one report happen in a
//! single transaction; the fencing checks (terminal job, item not RUNNING)
//! make worker retries safe.

mod failure;
mod progress;

pub use failure::{classify, FailureDisposition};

use std::sync::Arc;

use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::AsyncConnection;
use thiserror::Error;
use tracing::{info, warn};

use crate::artifacts::{self, CatalogError, ObjectStore};
use crate::config::Settings;
use crate::models::{
    Job, JobStatus, ValidatedItem, WorkItem, WorkItemStatus, WorkItemUpdate, WorkflowStep,
};
use crate::repository::{
    jobs, steps, user_work, work_items, AsyncSqliteConnection, AsyncSqlitePool, RepositoryError,
};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("work item {0} not found")]
    NotFound(i32),
    #[error("conflict: {0}")]
    Conflict(&'static str),
    #[error("invalid update: {0}")]
    Validation(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl From<diesel::result::Error> for OrchestratorError {
    fn from(e: diesel::result::Error) -> Self {
        Self::Repository(RepositoryError::Database(e))
    }
}

/// The engine's policy knobs, snapshotted from [`Settings`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_retries: i32,
    pub max_errors_for_job: i32,
    pub aggregate_page_size: usize,
}

impl From<&Settings> for EngineSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            max_retries: settings.max_retries,
            max_errors_for_job: settings.max_errors_for_job,
            aggregate_page_size: settings.aggregate_catalog_max_page_size,
        }
    }
}

/// Orchestrates step transitions on work item completion.
#[derive(Clone)]
pub struct StepEngine {
    pool: AsyncSqlitePool,
    store: Arc<dyn ObjectStore>,
    settings: EngineSettings,
}

impl StepEngine {
    pub fn new(pool: AsyncSqlitePool, store: Arc<dyn ObjectStore>, settings: EngineSettings) -> Self {
        Self {
            pool,
            store,
            settings,
        }
    }

    /// Apply a worker's completion report for a work item.
    ///
    /// Returns `Conflict` when the job is already terminal or the item is
    /// not RUNNING, and `NotFound` for unknown item ids.
    pub async fn handle_update(
        &self,
        item_id: i32,
        update: &WorkItemUpdate,
    ) -> Result<(), OrchestratorError> {
        let Some(reported) = update.final_status() else {
            return Err(OrchestratorError::Validation(format!(
                "status must be successful, warning or failed, got {:?}",
                update.status
            )));
        };

        let mut conn = self.pool.get().await?;

        // Identify the item and pre-read any final-step output catalogs
        // before opening the transaction: object-store reads are the slow
        // part, and a crash here changes nothing.
        let Some(peek) = work_items::fetch_item(&mut conn, item_id).await? else {
            return Err(OrchestratorError::NotFound(item_id));
        };
        let step_count = steps::fetch_steps(&mut conn, &peek.job_id).await?.len() as i32;
        let is_final = peek.step_index == step_count;

        let mut status = reported;
        let mut message = update.message.clone();
        let mut retriable = status == WorkItemStatus::Failed;
        let mut link_entries: Vec<ValidatedItem> = Vec::new();

        if is_final && status.produced_output() {
            match self.collect_entries(&update.results).await {
                Ok(entries) => link_entries = entries,
                Err(e @ (CatalogError::Validation(_) | CatalogError::Parse { .. })) => {
                    status = WorkItemStatus::Failed;
                    message = Some(format!("RequestValidationError: {}", e));
                    retriable = false;
                }
                Err(e) => return Err(e.into()),
            }
        }

        conn.transaction::<_, OrchestratorError, _>(|conn| {
            async move {
                let Some(item) = work_items::fetch_item(conn, item_id).await? else {
                    return Err(OrchestratorError::NotFound(item_id));
                };
                let mut job = jobs::fetch_job(conn, &item.job_id)
                    .await?
                    .ok_or_else(|| RepositoryError::NotFound(format!("job {}", item.job_id)))?;

                if job.status.is_terminal() {
                    return Err(OrchestratorError::Conflict("job has reached a terminal state"));
                }
                if item.status != WorkItemStatus::Running {
                    return Err(OrchestratorError::Conflict("work item is not running"));
                }

                user_work::finish_running(conn, &job.job_id, &item.service_id).await?;

                if status == WorkItemStatus::Failed {
                    self.handle_failure(conn, &mut job, &item, message, retriable)
                        .await?;
                } else {
                    self.handle_output(conn, &mut job, &item, status, message, update, link_entries)
                        .await?;
                }

                jobs::persist_job(conn, &job).await?;
                Ok(())
            }
            .scope_boxed()
        })
        .await
    }

    /// Failure path: retry, tolerate, or fail the job and cascade.
    async fn handle_failure(
        &self,
        conn: &mut AsyncSqliteConnection,
        job: &mut Job,
        item: &WorkItem,
        message: Option<String>,
        retriable: bool,
    ) -> Result<(), OrchestratorError> {
        if retriable && item.retries < self.settings.max_retries {
            work_items::requeue_for_retry(conn, item.id).await?;
            user_work::retry_to_ready(conn, &job.job_id, &item.service_id).await?;
            info!(
                item_id = item.id,
                job_id = %job.job_id,
                retries = item.retries + 1,
                "work item re-queued after failure"
            );
            return Ok(());
        }

        let reason = message
            .unwrap_or_else(|| "service failed without an error message".to_string());
        work_items::set_terminal(conn, item.id, WorkItemStatus::Failed, Some(&reason), &[])
            .await?;
        job.failed_item_count += 1;
        jobs::insert_error(conn, &job.job_id, item.catalog_location.as_deref(), &reason).await?;

        match failure::classify(
            job,
            item,
            false,
            self.settings.max_retries,
            self.settings.max_errors_for_job,
        ) {
            FailureDisposition::FailJob => {
                warn!(job_id = %job.job_id, item_id = item.id, %reason, "failing job");
                jobs::terminate_job(conn, job, JobStatus::Failed, &reason).await?;
                Ok(())
            }
            _ => {
                if job.status.is_dispatchable() {
                    job.status = JobStatus::RunningWithErrors;
                }
                // A terminally failed item still counts toward step closure.
                self.advance(conn, job, item, &[], &[]).await
            }
        }
    }

    /// Success/warning path: persist results, keep the producer paging, and
    /// advance the pipeline.
    #[allow(clippy::too_many_arguments)]
    async fn handle_output(
        &self,
        conn: &mut AsyncSqliteConnection,
        job: &mut Job,
        item: &WorkItem,
        status: WorkItemStatus,
        message: Option<String>,
        update: &WorkItemUpdate,
        link_entries: Vec<ValidatedItem>,
    ) -> Result<(), OrchestratorError> {
        let step = steps::fetch_step(conn, &job.job_id, item.step_index)
            .await?
            .ok_or_else(|| {
                RepositoryError::NotFound(format!(
                    "step {} of job {}",
                    item.step_index, job.job_id
                ))
            })?;

        let mut fanout = update.results.clone();
        if step.is_producer {
            // Each output catalog corresponds to one produced granule; never
            // accept more than the job's granule budget, even if the worker
            // over-reads.
            let budget = job.remaining_granule_budget() as usize;
            fanout.truncate(budget);
            job.granules_produced += fanout.len() as i32;
        }

        work_items::set_terminal(conn, item.id, status, message.as_deref(), &fanout).await?;

        if step.is_producer && update.scroll_id.is_some() && job.remaining_granule_budget() > 0 {
            work_items::insert_items(
                conn,
                &[work_items::NewWorkItem {
                    job_id: job.job_id.clone(),
                    step_index: step.step_index,
                    service_id: step.service_id.clone(),
                    scroll_id: update.scroll_id.clone(),
                    catalog_location: None,
                }],
            )
            .await?;
            steps::add_work_items(conn, &job.job_id, step.step_index, 1).await?;
            user_work::add_ready(conn, job, &step.service_id, 1).await?;
        }

        self.advance(conn, job, item, &fanout, &link_entries).await
    }

    /// Materialize downstream work for a terminal item, then close steps,
    /// recompute progress, and finalize the job when everything is done.
    async fn advance(
        &self,
        conn: &mut AsyncSqliteConnection,
        job: &mut Job,
        item: &WorkItem,
        fanout: &[String],
        link_entries: &[ValidatedItem],
    ) -> Result<(), OrchestratorError> {
        let step_list = steps::fetch_steps(conn, &job.job_id).await?;
        let total_steps = step_list.len() as i32;

        if item.step_index == total_steps {
            jobs::insert_links(conn, &job.job_id, item.id, link_entries).await?;
        } else if !fanout.is_empty() {
            let next = &step_list[item.step_index as usize];
            if !next.has_aggregated_output {
                let new_items: Vec<_> = fanout
                    .iter()
                    .map(|location| work_items::NewWorkItem {
                        job_id: job.job_id.clone(),
                        step_index: next.step_index,
                        service_id: next.service_id.clone(),
                        scroll_id: None,
                        catalog_location: Some(location.clone()),
                    })
                    .collect();
                work_items::insert_items(conn, &new_items).await?;
                steps::add_work_items(conn, &job.job_id, next.step_index, fanout.len() as i32)
                    .await?;
                user_work::add_ready(conn, job, &next.service_id, fanout.len() as i32).await?;
            }
            // Aggregating successors wait until this whole step is terminal.
        }

        self.close_steps(conn, job, total_steps).await?;
        progress::recompute(conn, job).await?;

        if steps::incomplete_count(conn, &job.job_id).await? == 0 {
            progress::finalize(conn, job).await?;
        }
        Ok(())
    }

    /// Walk the steps in order, marking each complete once no further items
    /// can be created for it and all its items are terminal. Closing a step
    /// materializes an aggregating successor's single input item.
    async fn close_steps(
        &self,
        conn: &mut AsyncSqliteConnection,
        job: &mut Job,
        total_steps: i32,
    ) -> Result<(), OrchestratorError> {
        for k in 1..=total_steps {
            let step = steps::fetch_step(conn, &job.job_id, k)
                .await?
                .ok_or_else(|| {
                    RepositoryError::NotFound(format!("step {} of job {}", k, job.job_id))
                })?;
            if step.is_complete {
                continue;
            }

            if k > 1 {
                let prior = steps::fetch_step(conn, &job.job_id, k - 1).await?;
                if !prior.map(|s| s.is_complete).unwrap_or(false) {
                    break;
                }
            }

            let terminal = work_items::count_step_status(
                conn,
                &job.job_id,
                k,
                &[
                    WorkItemStatus::Successful,
                    WorkItemStatus::Warning,
                    WorkItemStatus::Failed,
                    WorkItemStatus::Canceled,
                ],
            )
            .await?;

            // A pending producer continuation or unfinished fan-out keeps
            // the step open. Zero planned items means nothing upstream will
            // ever materialize work here.
            if step.work_item_count > 0 && terminal < step.work_item_count as i64 {
                break;
            }

            steps::set_complete(conn, &job.job_id, k).await?;

            if k < total_steps {
                let next = steps::fetch_step(conn, &job.job_id, k + 1)
                    .await?
                    .ok_or_else(|| {
                        RepositoryError::NotFound(format!(
                            "step {} of job {}",
                            k + 1,
                            job.job_id
                        ))
                    })?;
                if next.has_aggregated_output && next.work_item_count == 0 {
                    self.materialize_aggregation(conn, job, &step, &next).await?;
                }
            }
        }
        Ok(())
    }

    /// Build the single aggregated input item for `next` from every output
    /// of the just-closed `source` step.
    async fn materialize_aggregation(
        &self,
        conn: &mut AsyncSqliteConnection,
        job: &mut Job,
        source: &WorkflowStep,
        next: &WorkflowStep,
    ) -> Result<(), OrchestratorError> {
        let source_items =
            work_items::items_for_step(conn, &job.job_id, source.step_index).await?;
        let hrefs: Vec<String> = source_items
            .iter()
            .filter(|i| i.status.produced_output())
            .flat_map(|i| i.results.iter().cloned())
            .collect();

        if hrefs.is_empty() {
            // Nothing to aggregate; the step will close with zero items.
            return Ok(());
        }

        let head = artifacts::write_aggregated_catalog(
            self.store.as_ref(),
            &job.job_id,
            next.step_index,
            &hrefs,
            self.settings.aggregate_page_size,
        )
        .await?;

        work_items::insert_items(
            conn,
            &[work_items::NewWorkItem {
                job_id: job.job_id.clone(),
                step_index: next.step_index,
                service_id: next.service_id.clone(),
                scroll_id: None,
                catalog_location: Some(head),
            }],
        )
        .await?;
        steps::add_work_items(conn, &job.job_id, next.step_index, 1).await?;
        user_work::add_ready(conn, job, &next.service_id, 1).await?;
        Ok(())
    }

    /// Read and validate every entry of the given output catalogs.
    async fn collect_entries(
        &self,
        results: &[String],
    ) -> Result<Vec<ValidatedItem>, CatalogError> {
        let mut entries = Vec::new();
        for location in results {
            let catalog = artifacts::read_catalog(self.store.as_ref(), location).await?;
            for item in &catalog.items {
                entries.push(item.validate()?);
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::LocalObjectStore;
    use crate::models::{ArtifactCatalog, CatalogItem, JobSubmission};
    use crate::repository::{run_migrations, JobRepository};
    use crate::scheduler::{DispatchedWork, WorkScheduler};
    use crate::services::ServiceRegistry;
    use tempfile::tempdir;

    const PRODUCER: &str = "harmony/query-cmr";
    const REPROJECT: &str = "harmony/swath-projector";
    const ZARR: &str = "harmony/zarr-formatter";
    const CONCISE: &str = "harmony/concise";

    struct Harness {
        pool: AsyncSqlitePool,
        repo: JobRepository,
        registry: ServiceRegistry,
        scheduler: WorkScheduler,
        engine: StepEngine,
        store: LocalObjectStore,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        async fn new(settings: EngineSettings) -> Self {
            let dir = tempdir().unwrap();
            let url = dir.path().join("test.db").display().to_string();
            run_migrations(&url).await.unwrap();
            let pool = AsyncSqlitePool::new(&url);
            let store = LocalObjectStore::new(dir.path().join("artifacts"));
            Self {
                repo: JobRepository::new(pool.clone()),
                registry: ServiceRegistry::builtin(),
                scheduler: WorkScheduler::new(pool.clone(), 2000),
                engine: StepEngine::new(pool.clone(), Arc::new(store.clone()), settings),
                pool,
                store,
                _dir: dir,
            }
        }

        async fn default() -> Self {
            Self::new(EngineSettings {
                max_retries: 0,
                max_errors_for_job: 1,
                aggregate_page_size: 10000,
            })
            .await
        }

        async fn submit(&self, chain: &str, granules: i32, ignore_errors: bool) -> Job {
            let mut submission = JobSubmission::new("alice", chain, granules);
            submission.ignore_errors = ignore_errors;
            self.repo.create(&submission, &self.registry).await.unwrap()
        }

        async fn take(&self, service: &str) -> DispatchedWork {
            self.try_take(service)
                .await
                .unwrap_or_else(|| panic!("expected ready work for {}", service))
        }

        async fn try_take(&self, service: &str) -> Option<DispatchedWork> {
            self.scheduler
                .get_work(service, 1)
                .await
                .unwrap()
                .into_iter()
                .next()
        }

        async fn complete(
            &self,
            item_id: i32,
            status: &str,
            results: &[&str],
            scroll: Option<&str>,
        ) -> Result<(), OrchestratorError> {
            let update = WorkItemUpdate {
                status: status.to_string(),
                results: results.iter().map(|s| s.to_string()).collect(),
                scroll_id: scroll.map(str::to_string),
                message: None,
            };
            self.engine.handle_update(item_id, &update).await
        }

        async fn fail(&self, item_id: i32, message: &str) -> Result<(), OrchestratorError> {
            let update = WorkItemUpdate {
                status: "failed".to_string(),
                results: Vec::new(),
                scroll_id: None,
                message: Some(message.to_string()),
            };
            self.engine.handle_update(item_id, &update).await
        }

        async fn write_output_catalog(&self, key: &str, href: &str) {
            let catalog = ArtifactCatalog::new(vec![CatalogItem {
                href: href.to_string(),
                title: Some("output".to_string()),
                mime_type: Some("application/x-zarr".to_string()),
                bbox: Some(vec![-180.0, -90.0, 180.0, 90.0]),
                temporal: Some("2020-01-01T00:00:00Z,2020-12-31T00:00:00Z".to_string()),
            }]);
            artifacts::write_catalog(&self.store, key, &catalog).await.unwrap();
        }

        async fn job(&self, job_id: &str) -> Job {
            self.repo.get(job_id).await.unwrap()
        }

        async fn item(&self, id: i32) -> WorkItem {
            let mut conn = self.pool.get().await.unwrap();
            work_items::fetch_item(&mut conn, id).await.unwrap().unwrap()
        }

        async fn user_work_counts(&self, job_id: &str, service: &str) -> Option<(i32, i32)> {
            let mut conn = self.pool.get().await.unwrap();
            user_work::get(&mut conn, job_id, service)
                .await
                .unwrap()
                .map(|row| (row.ready_count, row.running_count))
        }
    }

    #[tokio::test]
    async fn single_granule_pipeline_succeeds() {
        let h = Harness::default().await;
        let job = h.submit("reproject-zarr", 1, false).await;

        let producer = h.take(PRODUCER).await;
        assert_eq!(producer.max_granules, Some(1));
        h.complete(producer.item.id, "successful", &["granules/g1.json"], None)
            .await
            .unwrap();
        assert_eq!(
            h.user_work_counts(&job.job_id, REPROJECT).await,
            Some((1, 0))
        );

        let reproject = h.take(REPROJECT).await;
        assert_eq!(reproject.max_granules, None);
        assert_eq!(
            reproject.item.catalog_location.as_deref(),
            Some("granules/g1.json")
        );
        h.complete(reproject.item.id, "successful", &["reprojected/g1.json"], None)
            .await
            .unwrap();

        let zarr = h.take(ZARR).await;
        h.write_output_catalog("outputs/z1.json", "https://example.com/r.zarr")
            .await;
        h.complete(zarr.item.id, "successful", &["outputs/z1.json"], None)
            .await
            .unwrap();

        let job = h.job(&job.job_id).await;
        assert_eq!(job.status, JobStatus::Successful);
        assert_eq!(job.progress, 100);

        let links = h.repo.links(&job.job_id).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].href, "https://example.com/r.zarr");
        assert_eq!(links[0].bbox, Some([-180.0, -90.0, 180.0, 90.0]));

        let mut conn = h.pool.get().await.unwrap();
        let step_list = steps::fetch_steps(&mut conn, &job.job_id).await.unwrap();
        assert!(step_list.iter().all(|s| s.is_complete));
        assert!(step_list.iter().all(|s| s.work_item_count == 1));
        // Finalization removes the queue rows.
        assert_eq!(h.user_work_counts(&job.job_id, ZARR).await, None);
    }

    #[tokio::test]
    async fn failure_cancels_outstanding_work_and_fences_stragglers() {
        let h = Harness::default().await;
        let job = h.submit("reproject-zarr", 2, false).await;

        let producer = h.take(PRODUCER).await;
        h.complete(
            producer.item.id,
            "successful",
            &["granules/g1.json", "granules/g2.json"],
            None,
        )
        .await
        .unwrap();

        let first = h.take(REPROJECT).await;
        let second = h.take(REPROJECT).await;
        h.complete(first.item.id, "successful", &["reprojected/g1.json"], None)
            .await
            .unwrap();

        // A zarr item now exists; claim it so it is RUNNING when the job fails.
        let zarr = h.take(ZARR).await;

        h.fail(second.item.id, "reprojection blew up").await.unwrap();

        let job = h.job(&job.job_id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.failed_item_count, 1);
        assert_eq!(job.message.as_deref(), Some("reprojection blew up"));

        assert_eq!(h.item(zarr.item.id).await.status, WorkItemStatus::Canceled);
        assert_eq!(h.user_work_counts(&job.job_id, ZARR).await, None);

        // The straggling worker's completion is rejected with a conflict.
        h.write_output_catalog("outputs/late.json", "https://example.com/late.zarr")
            .await;
        let err = h
            .complete(zarr.item.id, "successful", &["outputs/late.json"], None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Conflict(_)));
        assert_eq!(h.repo.links(&job.job_id).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn tolerated_failure_completes_with_errors() {
        let h = Harness::default().await;
        let job = h.submit("reproject-zarr", 3, true).await;

        let producer = h.take(PRODUCER).await;
        h.complete(
            producer.item.id,
            "successful",
            &["granules/g1.json", "granules/g2.json", "granules/g3.json"],
            None,
        )
        .await
        .unwrap();

        let a = h.take(REPROJECT).await;
        let b = h.take(REPROJECT).await;
        let c = h.take(REPROJECT).await;
        h.complete(a.item.id, "successful", &["reprojected/g1.json"], None)
            .await
            .unwrap();
        h.fail(b.item.id, "granule 2 unreadable").await.unwrap();
        assert_eq!(h.job(&job.job_id).await.status, JobStatus::RunningWithErrors);
        h.complete(c.item.id, "successful", &["reprojected/g3.json"], None)
            .await
            .unwrap();

        for (key, href) in [
            ("outputs/z1.json", "https://example.com/g1.zarr"),
            ("outputs/z3.json", "https://example.com/g3.zarr"),
        ] {
            let zarr = h.take(ZARR).await;
            h.write_output_catalog(key, href).await;
            h.complete(zarr.item.id, "successful", &[key], None)
                .await
                .unwrap();
        }

        let job = h.job(&job.job_id).await;
        assert_eq!(job.status, JobStatus::CompleteWithErrors);
        assert_eq!(job.progress, 100);
        assert_eq!(job.message.as_deref(), Some("granule 2 unreadable"));
        assert_eq!(h.repo.links(&job.job_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn too_many_tolerated_failures_fail_the_job() {
        let h = Harness::default().await; // max_errors_for_job = 1
        let job = h.submit("reproject-zarr", 3, true).await;

        let producer = h.take(PRODUCER).await;
        h.complete(
            producer.item.id,
            "successful",
            &["granules/g1.json", "granules/g2.json", "granules/g3.json"],
            None,
        )
        .await
        .unwrap();

        let a = h.take(REPROJECT).await;
        let b = h.take(REPROJECT).await;
        h.fail(a.item.id, "first failure").await.unwrap();
        assert!(!h.job(&job.job_id).await.status.is_terminal());
        h.fail(b.item.id, "second failure").await.unwrap();

        let job = h.job(&job.job_id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.failed_item_count, 2);
    }

    #[tokio::test]
    async fn aggregation_waits_for_producer_closure() {
        let h = Harness::default().await;
        let job = h.submit("concatenate", 2, false).await;

        let first = h.take(PRODUCER).await;
        h.complete(first.item.id, "successful", &["granules/g1.json"], Some("scroll-1"))
            .await
            .unwrap();

        // Producer is still paging: no aggregator work yet.
        assert!(h.try_take(CONCISE).await.is_none());

        let second = h.take(PRODUCER).await;
        assert_eq!(second.item.scroll_id.as_deref(), Some("scroll-1"));
        h.complete(second.item.id, "successful", &["granules/g2.json"], None)
            .await
            .unwrap();

        // Exactly one aggregator item, pointed at the head page listing the
        // union of producer outputs.
        let aggregator = h.take(CONCISE).await;
        let head = aggregator.item.catalog_location.clone().unwrap();
        let catalog = artifacts::read_catalog(&h.store, &head).await.unwrap();
        let hrefs: Vec<&str> = catalog.items.iter().map(|i| i.href.as_str()).collect();
        assert_eq!(hrefs, vec!["granules/g1.json", "granules/g2.json"]);
        assert!(catalog.links.is_empty());

        assert!(h.try_take(CONCISE).await.is_none());

        let mut conn = h.pool.get().await.unwrap();
        let agg_step = steps::fetch_step(&mut conn, &job.job_id, 2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(agg_step.work_item_count, 1);
    }

    #[tokio::test]
    async fn aggregated_catalog_pages_chain_prev_next() {
        let h = Harness::new(EngineSettings {
            max_retries: 0,
            max_errors_for_job: 1,
            aggregate_page_size: 1,
        })
        .await;
        h.submit("concatenate", 2, false).await;

        let producer = h.take(PRODUCER).await;
        h.complete(
            producer.item.id,
            "successful",
            &["granules/g1.json", "granules/g2.json"],
            None,
        )
        .await
        .unwrap();

        let aggregator = h.take(CONCISE).await;
        let head = aggregator.item.catalog_location.clone().unwrap();

        let page1 = artifacts::read_catalog(&h.store, &head).await.unwrap();
        assert_eq!(page1.items.len(), 1);
        assert!(page1.link("prev").is_none());
        let next = page1.link("next").unwrap().href.clone();

        let page2 = artifacts::read_catalog(&h.store, &next).await.unwrap();
        assert_eq!(page2.items.len(), 1);
        assert!(page2.link("next").is_none());
        assert_eq!(page2.link("prev").unwrap().href, head);
    }

    #[tokio::test]
    async fn failed_items_requeue_until_retries_exhausted() {
        let h = Harness::new(EngineSettings {
            max_retries: 2,
            max_errors_for_job: 10,
            aggregate_page_size: 10000,
        })
        .await;
        let job = h.submit("reproject-zarr", 1, false).await;

        for expected_retries in 1..=2 {
            let producer = h.take(PRODUCER).await;
            h.fail(producer.item.id, "CMR timeout").await.unwrap();

            let item = h.item(producer.item.id).await;
            assert_eq!(item.status, WorkItemStatus::Ready);
            assert_eq!(item.retries, expected_retries);
            assert_eq!(
                h.user_work_counts(&job.job_id, PRODUCER).await,
                Some((1, 0))
            );
            assert_eq!(h.job(&job.job_id).await.failed_item_count, 0);
        }

        // Budget spent: the next failure is terminal.
        let producer = h.take(PRODUCER).await;
        h.fail(producer.item.id, "CMR timeout").await.unwrap();
        assert_eq!(
            h.item(producer.item.id).await.status,
            WorkItemStatus::Failed
        );
        assert_eq!(h.job(&job.job_id).await.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn granule_budget_stops_producer_paging() {
        let h = Harness::default().await;
        let job = h.submit("reproject-zarr", 3, false).await;

        let first = h.take(PRODUCER).await;
        assert_eq!(first.max_granules, Some(3));
        h.complete(
            first.item.id,
            "successful",
            &["granules/g1.json", "granules/g2.json"],
            Some("scroll-1"),
        )
        .await
        .unwrap();

        let second = h.take(PRODUCER).await;
        assert_eq!(second.max_granules, Some(1));
        // The worker over-reads and still reports a continuation; the budget
        // truncates the fan-out and stops the paging.
        h.complete(
            second.item.id,
            "successful",
            &["granules/g3.json", "granules/g4.json"],
            Some("scroll-2"),
        )
        .await
        .unwrap();

        assert!(h.try_take(PRODUCER).await.is_none());

        let job = h.job(&job.job_id).await;
        assert_eq!(job.granules_produced, 3);

        let mut conn = h.pool.get().await.unwrap();
        let producer_step = steps::fetch_step(&mut conn, &job.job_id, 1)
            .await
            .unwrap()
            .unwrap();
        assert!(producer_step.is_complete);
        assert_eq!(producer_step.work_item_count, 2);
        let reproject_step = steps::fetch_step(&mut conn, &job.job_id, 2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reproject_step.work_item_count, 3);
    }

    #[tokio::test]
    async fn second_completion_is_rejected() {
        let h = Harness::default().await;
        h.submit("reproject-zarr", 1, false).await;

        let producer = h.take(PRODUCER).await;
        h.complete(producer.item.id, "successful", &["granules/g1.json"], None)
            .await
            .unwrap();

        let err = h
            .complete(producer.item.id, "successful", &["granules/g1.json"], None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Conflict(_)));
    }

    #[tokio::test]
    async fn unknown_item_is_not_found() {
        let h = Harness::default().await;
        let err = h
            .complete(424242, "successful", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound(424242)));
    }

    #[tokio::test]
    async fn invalid_final_metadata_fails_the_item_without_retry() {
        let h = Harness::new(EngineSettings {
            max_retries: 3,
            max_errors_for_job: 10,
            aggregate_page_size: 10000,
        })
        .await;
        let job = h.submit("reproject-zarr", 1, false).await;

        let producer = h.take(PRODUCER).await;
        h.complete(producer.item.id, "successful", &["granules/g1.json"], None)
            .await
            .unwrap();
        let reproject = h.take(REPROJECT).await;
        h.complete(reproject.item.id, "successful", &["reprojected/g1.json"], None)
            .await
            .unwrap();

        let zarr = h.take(ZARR).await;
        let bad = ArtifactCatalog::new(vec![CatalogItem {
            href: "https://example.com/r.zarr".to_string(),
            title: None,
            mime_type: None,
            bbox: Some(vec![1.0, 2.0, 3.0]),
            temporal: None,
        }]);
        artifacts::write_catalog(&h.store, "outputs/bad.json", &bad)
            .await
            .unwrap();

        h.complete(zarr.item.id, "successful", &["outputs/bad.json"], None)
            .await
            .unwrap();

        let item = h.item(zarr.item.id).await;
        assert_eq!(item.status, WorkItemStatus::Failed);
        assert_eq!(item.retries, 0);
        assert!(item
            .message
            .as_deref()
            .unwrap()
            .contains("RequestValidationError"));

        let job = h.job(&job.job_id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(h.repo.links(&job.job_id).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn progress_is_clamped_while_producer_pages() {
        let h = Harness::default().await;
        let job = h.submit("reproject-zarr", 2, false).await;

        let producer = h.take(PRODUCER).await;
        h.complete(producer.item.id, "successful", &["granules/g1.json"], Some("scroll-1"))
            .await
            .unwrap();

        let reproject = h.take(REPROJECT).await;
        h.complete(reproject.item.id, "successful", &["reprojected/g1.json"], None)
            .await
            .unwrap();
        let zarr = h.take(ZARR).await;
        h.write_output_catalog("outputs/z1.json", "https://example.com/g1.zarr")
            .await;
        h.complete(zarr.item.id, "successful", &["outputs/z1.json"], None)
            .await
            .unwrap();

        // One of two planned granules is fully processed while the producer
        // still pages.
        let job = h.job(&job.job_id).await;
        assert_eq!(job.progress, 50);
        assert!(!job.status.is_terminal());
    }

    #[tokio::test]
    async fn warning_outputs_feed_aggregation() {
        let h = Harness::default().await;
        h.submit("concatenate", 2, false).await;

        let producer = h.take(PRODUCER).await;
        let update = WorkItemUpdate {
            status: "warning".to_string(),
            results: vec!["granules/g1.json".to_string(), "granules/g2.json".to_string()],
            scroll_id: None,
            message: Some("granule 2 had suspect metadata".to_string()),
        };
        h.engine.handle_update(producer.item.id, &update).await.unwrap();

        let aggregator = h.take(CONCISE).await;
        let head = aggregator.item.catalog_location.clone().unwrap();
        let catalog = artifacts::read_catalog(&h.store, &head).await.unwrap();
        assert_eq!(catalog.items.len(), 2);
    }
}
