//! Background maintenance loops.
//!
//! Five independent, idempotent loops on their own clocks: the work reaper,
//! the user-work reconciler, the failure-rate publisher, the metrics-server
//! watchdog and the memory snapshotter. Each tick takes a TTL advisory lock
//! keyed by the loop name, so replicas never run the same loop twice
//! concurrently.

pub mod cluster;
pub mod failure_metrics;
pub mod memory;
pub mod reaper;
pub mod reconciler;
pub mod watchdog;

pub use cluster::{AutoscalerStatus, ClusterApi, ClusterError, MemoryStats};
pub use failure_metrics::FailureRatePublisher;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::artifacts::ObjectStore;
use crate::config::Settings;
use crate::repository::{locks, AsyncSqlitePool};

pub struct Maintenance {
    pool: AsyncSqlitePool,
    store: Arc<dyn ObjectStore>,
    cluster: Option<Arc<dyn ClusterApi>>,
    settings: Arc<Settings>,
    publisher: Arc<FailureRatePublisher>,
}

impl Maintenance {
    pub fn new(
        pool: AsyncSqlitePool,
        store: Arc<dyn ObjectStore>,
        cluster: Option<Arc<dyn ClusterApi>>,
        settings: Arc<Settings>,
        registry: &prometheus::Registry,
    ) -> Result<Self, prometheus::Error> {
        let publisher = Arc::new(FailureRatePublisher::new(
            pool.clone(),
            registry,
            &settings.client_id,
        )?);
        Ok(Self {
            pool,
            store,
            cluster,
            settings,
            publisher,
        })
    }

    /// Spawn every loop. Watchdog and memory snapshotter only run when a
    /// cluster API is configured.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let holder = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown-host".to_string());
        let mut handles = Vec::new();

        {
            let pool = self.pool.clone();
            let settings = self.settings.clone();
            let holder = holder.clone();
            handles.push(tokio::spawn(async move {
                let mut ticker = minutes(settings.work_reaper_interval_minutes);
                loop {
                    ticker.tick().await;
                    if !acquire(&pool, "work-reaper", &holder, &settings).await {
                        continue;
                    }
                    if let Err(e) = reaper::run(&pool, &settings).await {
                        tracing::error!(error = %e, "work reaper failed");
                    }
                    release(&pool, "work-reaper", &holder).await;
                }
            }));
        }

        {
            let pool = self.pool.clone();
            let settings = self.settings.clone();
            let holder = holder.clone();
            handles.push(tokio::spawn(async move {
                let mut ticker = minutes(settings.user_work_updater_interval_minutes);
                loop {
                    ticker.tick().await;
                    if !acquire(&pool, "user-work-reconciler", &holder, &settings).await {
                        continue;
                    }
                    if let Err(e) = reconciler::run(&pool, &settings).await {
                        tracing::error!(error = %e, "user-work reconciler failed");
                    }
                    release(&pool, "user-work-reconciler", &holder).await;
                }
            }));
        }

        {
            let pool = self.pool.clone();
            let settings = self.settings.clone();
            let publisher = self.publisher.clone();
            let holder = holder.clone();
            handles.push(tokio::spawn(async move {
                let mut ticker = minutes(settings.failure_metrics_interval_minutes);
                loop {
                    ticker.tick().await;
                    if !acquire(&pool, "failure-metrics", &holder, &settings).await {
                        continue;
                    }
                    if let Err(e) = publisher.run(&settings).await {
                        tracing::error!(error = %e, "failure-rate publisher failed");
                    }
                    release(&pool, "failure-metrics", &holder).await;
                }
            }));
        }

        if let Some(cluster) = self.cluster.clone() {
            {
                let pool = self.pool.clone();
                let settings = self.settings.clone();
                let cluster = cluster.clone();
                let holder = holder.clone();
                handles.push(tokio::spawn(async move {
                    let mut ticker = minutes(settings.watchdog_interval_minutes);
                    loop {
                        ticker.tick().await;
                        if !acquire(&pool, "metrics-watchdog", &holder, &settings).await {
                            continue;
                        }
                        if let Err(e) = watchdog::run(cluster.as_ref(), &settings).await {
                            tracing::error!(error = %e, "metrics watchdog failed");
                        }
                        release(&pool, "metrics-watchdog", &holder).await;
                    }
                }));
            }

            {
                let pool = self.pool.clone();
                let settings = self.settings.clone();
                let store = self.store.clone();
                let holder = holder.clone();
                handles.push(tokio::spawn(async move {
                    let mut ticker = minutes(settings.memory_collector_interval_minutes);
                    loop {
                        ticker.tick().await;
                        if !acquire(&pool, "memory-snapshotter", &holder, &settings).await {
                            continue;
                        }
                        if let Err(e) =
                            memory::run(cluster.as_ref(), store.as_ref(), &settings).await
                        {
                            tracing::error!(error = %e, "memory snapshotter failed");
                        }
                        release(&pool, "memory-snapshotter", &holder).await;
                    }
                }));
            }
        } else {
            tracing::debug!(
                "no cluster API configured; watchdog and memory snapshotter disabled"
            );
        }

        handles
    }
}

fn minutes(n: u64) -> tokio::time::Interval {
    let mut ticker = interval(Duration::from_secs(n.max(1) * 60));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn acquire(
    pool: &AsyncSqlitePool,
    name: &str,
    holder: &str,
    settings: &Settings,
) -> bool {
    let result = async {
        let mut conn = pool.get().await?;
        locks::try_acquire(&mut conn, name, holder, settings.maintenance_lock_ttl_minutes).await
    }
    .await;
    match result {
        Ok(acquired) => {
            if !acquired {
                tracing::debug!(lock = name, "another replica holds the loop lock");
            }
            acquired
        }
        Err(e) => {
            tracing::error!(lock = name, error = %e, "advisory lock acquisition failed");
            false
        }
    }
}

async fn release(pool: &AsyncSqlitePool, name: &str, holder: &str) {
    let result = async {
        let mut conn = pool.get().await?;
        locks::release(&mut conn, name, holder).await
    }
    .await;
    if let Err(e) = result {
        tracing::error!(lock = name, error = %e, "advisory lock release failed");
    }
}
