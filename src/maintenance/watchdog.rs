//! Metrics-server watchdog.
//!
//! Autoscalers that report an "unknown" metric value mean the metrics
//! server has wedged. The watchdog deletes the matching pod so its
//! supervisor recreates it.

use crate::config::Settings;

use super::cluster::{ClusterApi, ClusterError};

/// Returns the name of the pod that was recycled, if any.
pub async fn run(
    cluster: &dyn ClusterApi,
    settings: &Settings,
) -> Result<Option<String>, ClusterError> {
    let autoscalers = cluster.list_autoscalers().await?;
    let unhealthy: Vec<&str> = autoscalers
        .iter()
        .filter(|a| !a.metrics_available)
        .map(|a| a.name.as_str())
        .collect();

    if unhealthy.is_empty() {
        return Ok(None);
    }
    tracing::warn!(
        autoscalers = ?unhealthy,
        "autoscalers report unknown metrics; recycling the metrics server"
    );

    let pods = cluster.list_pods(&settings.monitoring_namespace).await?;
    let Some(pod) = pods
        .iter()
        .find(|name| name.starts_with(&settings.prometheus_pod_prefix))
    else {
        tracing::warn!(
            namespace = %settings.monitoring_namespace,
            prefix = %settings.prometheus_pod_prefix,
            "no metrics-server pod found to recycle"
        );
        return Ok(None);
    };

    cluster
        .delete_pod(&settings.monitoring_namespace, pod)
        .await?;
    tracing::info!(pod = %pod, "deleted metrics-server pod");
    Ok(Some(pod.clone()))
}
