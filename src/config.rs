//! Configuration for the orchestration core.
//!
//! Settings come from an optional `harmony.toml` in the data directory,
//! overridden by environment variables for deployment-specific values.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// All tunables for the orchestrator, scheduler and maintenance loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// SQLite database URL or path.
    pub database_url: String,
    /// Root directory for local artifact storage and the default database.
    pub data_dir: PathBuf,
    /// Optional YAML file describing services and chains.
    pub service_chains_path: Option<PathBuf>,

    pub host: String,
    pub port: u16,

    /// Client identifier used to namespace published metrics.
    pub client_id: String,
    /// Deployment environment name, used in metrics object keys.
    pub environment: String,

    /// Jobs considered per scheduling pass.
    pub default_batch_size: usize,
    /// Re-queue budget for failed work items.
    pub max_retries: i32,
    /// Tolerated failures per job when the job ignores errors.
    pub max_errors_for_job: i32,
    /// Upper bound on granules a producer item may fetch in one page.
    pub cmr_max_page_size: i32,
    /// Maximum entries per page of an aggregated input catalog.
    pub aggregate_catalog_max_page_size: usize,

    pub work_reaper_interval_minutes: u64,
    pub work_reaper_batch_size: i64,
    pub reapable_work_age_minutes: i64,

    pub user_work_updater_interval_minutes: u64,
    pub user_work_expiration_minutes: i64,

    pub failure_metrics_interval_minutes: u64,
    pub failure_metrics_lookback_minutes: i64,

    pub watchdog_interval_minutes: u64,
    /// Namespace holding the metrics-server pods the watchdog may recycle.
    pub monitoring_namespace: String,
    /// Pod-name prefix identifying the metrics server.
    pub prometheus_pod_prefix: String,

    pub memory_collector_interval_minutes: u64,
    pub memory_usage_lookback_minutes: u32,
    /// Object-store prefix for memory usage snapshots.
    pub memory_usage_bucket: String,

    /// TTL for the advisory locks that keep maintenance loops single-flight.
    pub maintenance_lock_ttl_minutes: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            data_dir: default_data_dir(),
            service_chains_path: None,
            host: "127.0.0.1".to_string(),
            port: 8081,
            client_id: "harmony".to_string(),
            environment: "dev".to_string(),
            default_batch_size: 10,
            max_retries: 3,
            max_errors_for_job: 10,
            cmr_max_page_size: 2000,
            aggregate_catalog_max_page_size: 10000,
            work_reaper_interval_minutes: 60,
            work_reaper_batch_size: 2000,
            reapable_work_age_minutes: 10080,
            user_work_updater_interval_minutes: 5,
            user_work_expiration_minutes: 90,
            failure_metrics_interval_minutes: 5,
            failure_metrics_lookback_minutes: 120,
            watchdog_interval_minutes: 10,
            monitoring_namespace: "monitoring".to_string(),
            prometheus_pod_prefix: "prometheus".to_string(),
            memory_collector_interval_minutes: 60,
            memory_usage_lookback_minutes: 60,
            memory_usage_bucket: "metrics".to_string(),
            maintenance_lock_ttl_minutes: 10,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("harmony"))
        .unwrap_or_else(|| PathBuf::from("./harmony-data"))
}

impl Settings {
    /// Load settings: `harmony.toml` in the data dir (if present), then
    /// environment overrides.
    pub fn load(data_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let dir = match data_dir {
            Some(d) => expand_path(&d),
            None => default_data_dir(),
        };

        let config_path = dir.join("harmony.toml");
        let mut settings = if config_path.exists() {
            let raw = fs::read_to_string(&config_path)?;
            toml::from_str(&raw)?
        } else {
            Settings::default()
        };
        settings.data_dir = dir;

        if let Ok(url) = std::env::var("DATABASE_URL") {
            settings.database_url = url;
        }
        if settings.database_url.is_empty() {
            settings.database_url = settings
                .data_dir
                .join("harmony.db")
                .display()
                .to_string();
        }
        if let Ok(env) = std::env::var("HARMONY_ENV") {
            settings.environment = env;
        }
        if let Ok(id) = std::env::var("HARMONY_CLIENT_ID") {
            settings.client_id = id;
        }

        Ok(settings)
    }

    /// Directory for locally stored artifact catalogs.
    pub fn artifact_dir(&self) -> PathBuf {
        self.data_dir.join("artifacts")
    }

    pub fn reapable_age(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.reapable_work_age_minutes)
    }

    pub fn user_work_expiration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.user_work_expiration_minutes)
    }
}

fn expand_path(path: &Path) -> PathBuf {
    let raw = path.display().to_string();
    PathBuf::from(shellexpand::tilde(&raw).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert!(settings.default_batch_size > 0);
        assert!(settings.max_retries > 0);
        assert!(settings.aggregate_catalog_max_page_size > 0);
        assert_eq!(settings.client_id, "harmony");
    }

    #[test]
    fn load_reads_toml_overrides() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("harmony.toml"),
            "max_retries = 7\nclient_id = \"uat\"\n",
        )
        .unwrap();
        let settings = Settings::load(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(settings.max_retries, 7);
        assert_eq!(settings.client_id, "uat");
        assert!(settings.database_url.ends_with("harmony.db"));
    }
}
