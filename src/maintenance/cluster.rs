//! Container-orchestrator seam for the watchdog and memory snapshotter.
//!
//! The cluster itself is an external collaborator; deployments provide an
//! implementation of [`ClusterApi`] backed by their orchestrator's API.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("cluster api error: {0}")]
    Api(String),
}

/// One horizontal autoscaler target and its reported metric health.
#[derive(Debug, Clone)]
pub struct AutoscalerStatus {
    pub name: String,
    /// Canonical service the autoscaler scales.
    pub service: String,
    /// False when the autoscaler reports an "unknown" metric value.
    pub metrics_available: bool,
    /// Container memory limit as configured, e.g. "512Mi".
    pub memory_limit: Option<String>,
}

/// Memory utilization for a service's pods over a lookback window.
#[derive(Debug, Clone, Copy)]
pub struct MemoryStats {
    pub average_utilization_percent: f64,
    pub max_utilization_percent: f64,
}

#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list_autoscalers(&self) -> Result<Vec<AutoscalerStatus>, ClusterError>;
    async fn list_pods(&self, namespace: &str) -> Result<Vec<String>, ClusterError>;
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;
    async fn service_memory_stats(
        &self,
        service: &str,
        lookback_minutes: u32,
    ) -> Result<MemoryStats, ClusterError>;
}

#[cfg(test)]
pub mod fake {
    //! In-memory cluster used by the maintenance tests.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    pub struct FakeCluster {
        pub autoscalers: Vec<AutoscalerStatus>,
        pub pods: Vec<String>,
        pub stats: HashMap<String, MemoryStats>,
        pub deleted: Mutex<Vec<(String, String)>>,
    }

    impl FakeCluster {
        pub fn new(autoscalers: Vec<AutoscalerStatus>, pods: Vec<String>) -> Self {
            Self {
                autoscalers,
                pods,
                stats: HashMap::new(),
                deleted: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ClusterApi for FakeCluster {
        async fn list_autoscalers(&self) -> Result<Vec<AutoscalerStatus>, ClusterError> {
            Ok(self.autoscalers.clone())
        }

        async fn list_pods(&self, _namespace: &str) -> Result<Vec<String>, ClusterError> {
            Ok(self.pods.clone())
        }

        async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
            self.deleted
                .lock()
                .unwrap()
                .push((namespace.to_string(), name.to_string()));
            Ok(())
        }

        async fn service_memory_stats(
            &self,
            service: &str,
            _lookback_minutes: u32,
        ) -> Result<MemoryStats, ClusterError> {
            self.stats
                .get(service)
                .copied()
                .ok_or_else(|| ClusterError::Api(format!("no stats for {}", service)))
        }
    }
}
