//! Worker-facing HTTP server.
//!
//! Stateless workers poll `GET /work` for their service and report results
//! with `PUT /work/:id`. Job status is exposed read-only for operators, and
//! `/metrics` serves the prometheus registry the failure-rate publisher
//! writes into.

mod handlers;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::artifacts::LocalObjectStore;
use crate::config::Settings;
use crate::maintenance::Maintenance;
use crate::orchestrator::{EngineSettings, StepEngine};
use crate::repository::{AsyncSqlitePool, JobRepository};
use crate::scheduler::WorkScheduler;

/// Shared state for the worker API.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: WorkScheduler,
    pub engine: StepEngine,
    pub jobs: JobRepository,
    pub metrics: Arc<prometheus::Registry>,
}

impl AppState {
    pub fn new(settings: &Settings) -> Self {
        let pool = AsyncSqlitePool::new(&settings.database_url);
        let store = Arc::new(LocalObjectStore::new(settings.artifact_dir()));
        Self {
            scheduler: WorkScheduler::new(pool.clone(), settings.cmr_max_page_size),
            engine: StepEngine::new(pool.clone(), store, EngineSettings::from(settings)),
            jobs: JobRepository::new(pool),
            metrics: Arc::new(prometheus::Registry::new()),
        }
    }
}

/// Start the server and the maintenance loops.
pub async fn serve(settings: &Settings) -> anyhow::Result<()> {
    let state = AppState::new(settings);

    let pool = AsyncSqlitePool::new(&settings.database_url);
    let store = Arc::new(LocalObjectStore::new(settings.artifact_dir()));
    let maintenance = Maintenance::new(
        pool,
        store,
        None,
        Arc::new(settings.clone()),
        &state.metrics,
    )?;
    let handles = maintenance.spawn();
    tracing::info!(loops = handles.len(), "maintenance loops started");

    let app = create_router(state);
    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port).parse()?;
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
