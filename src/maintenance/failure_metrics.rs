//! Per-service failure-rate publisher.
//!
//! Computes failed / (failed + successful + warning) over a lookback window
//! for every service that completed work, and publishes each rate as a
//! prometheus gauge labeled by service.

use std::collections::HashMap;

use chrono::Utc;
use prometheus::{GaugeVec, Opts, Registry};

use crate::config::Settings;
use crate::repository::{format_datetime, work_items, AsyncSqlitePool, Result};

pub struct FailureRatePublisher {
    pool: AsyncSqlitePool,
    gauge: GaugeVec,
}

impl FailureRatePublisher {
    pub fn new(
        pool: AsyncSqlitePool,
        registry: &Registry,
        client_id: &str,
    ) -> std::result::Result<Self, prometheus::Error> {
        // Metric names admit neither dashes nor slashes.
        let namespace = format!("harmony_services_{}", sanitize(client_id));
        let gauge = GaugeVec::new(
            Opts::new(
                "failure_rate_percent",
                "Share of work items that failed per service over the lookback window",
            )
            .namespace(namespace),
            &["service"],
        )?;
        registry.register(Box::new(gauge.clone()))?;
        Ok(Self { pool, gauge })
    }

    /// Publish rates for every service with terminal items in the window.
    /// Returns (service, percent) pairs for logging and tests.
    pub async fn run(&self, settings: &Settings) -> Result<Vec<(String, f64)>> {
        let cutoff = format_datetime(
            Utc::now() - chrono::Duration::minutes(settings.failure_metrics_lookback_minutes),
        );
        let mut conn = self.pool.get().await?;
        let counts = work_items::terminal_counts_since(&mut conn, &cutoff).await?;

        let mut failed: HashMap<String, i64> = HashMap::new();
        let mut total: HashMap<String, i64> = HashMap::new();
        for (service, status, count) in counts {
            if status == "failed" {
                *failed.entry(service.clone()).or_default() += count;
            }
            *total.entry(service).or_default() += count;
        }

        let mut rates = Vec::new();
        for (service, total_count) in total {
            let failed_count = failed.get(&service).copied().unwrap_or(0);
            let percent = (failed_count as f64 / total_count as f64) * 100.0;
            self.gauge.with_label_values(&[service.as_str()]).set(percent);
            tracing::info!(service = %service, percent, "published service failure rate");
            rates.push((service, percent));
        }
        Ok(rates)
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
