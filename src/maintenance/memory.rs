//! Memory-usage snapshotter.
//!
//! Enumerates backend services through their autoscalers, pulls per-pod
//! memory utilization over a lookback window, and writes a JSON summary to
//! the object store under `memory-metrics/<env>/<UTC stamp>.json`.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::artifacts::ObjectStore;
use crate::config::Settings;

use super::cluster::{ClusterApi, ClusterError};

#[derive(Debug, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub generated_at: String,
    pub environment: String,
    pub lookback_minutes: u32,
    pub services: Vec<ServiceMemory>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceMemory {
    pub service: String,
    pub memory_limit_bytes: Option<u64>,
    pub average_utilization_percent: f64,
    pub max_utilization_percent: f64,
    pub average_bytes: Option<u64>,
    pub max_bytes: Option<u64>,
}

/// Parse a container memory limit: `<int>{Ki|Mi|Gi}` or plain bytes.
pub fn parse_memory_limit(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let (digits, multiplier) = if let Some(n) = raw.strip_suffix("Ki") {
        (n, 1024u64)
    } else if let Some(n) = raw.strip_suffix("Mi") {
        (n, 1024 * 1024)
    } else if let Some(n) = raw.strip_suffix("Gi") {
        (n, 1024 * 1024 * 1024)
    } else {
        (raw, 1)
    };
    digits.parse::<u64>().ok().map(|n| n * multiplier)
}

/// Collect one snapshot and write it. Returns the object key.
pub async fn run(
    cluster: &dyn ClusterApi,
    store: &dyn ObjectStore,
    settings: &Settings,
) -> Result<String, SnapshotError> {
    let lookback = settings.memory_usage_lookback_minutes;
    let mut services = Vec::new();

    for autoscaler in cluster.list_autoscalers().await? {
        let stats = cluster
            .service_memory_stats(&autoscaler.service, lookback)
            .await?;
        let limit_bytes = autoscaler
            .memory_limit
            .as_deref()
            .and_then(parse_memory_limit);
        let to_bytes = |percent: f64| {
            limit_bytes.map(|limit| ((percent / 100.0) * limit as f64) as u64)
        };

        services.push(ServiceMemory {
            service: autoscaler.service,
            memory_limit_bytes: limit_bytes,
            average_utilization_percent: stats.average_utilization_percent,
            max_utilization_percent: stats.max_utilization_percent,
            average_bytes: to_bytes(stats.average_utilization_percent),
            max_bytes: to_bytes(stats.max_utilization_percent),
        });
    }

    let now = Utc::now();
    let snapshot = MemorySnapshot {
        generated_at: now.to_rfc3339(),
        environment: settings.environment.clone(),
        lookback_minutes: lookback,
        services,
    };

    let key = format!(
        "{}/memory-metrics/{}/{}.json",
        settings.memory_usage_bucket,
        settings.environment,
        now.format("%Y-%m-%d-%H%M"),
    );
    let body = serde_json::to_vec_pretty(&snapshot).map_err(SnapshotError::Encode)?;
    store.put(&key, &body).await?;
    tracing::info!(%key, services = snapshot.services.len(), "wrote memory usage snapshot");
    Ok(key)
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error(transparent)]
    Store(#[from] crate::artifacts::CatalogError),
    #[error("snapshot encoding failed: {0}")]
    Encode(serde_json::Error),
}
