//! RED metrics: rate, error rate and duration per queue and job type.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing;

use jobforge_core::config::EngineConfig;
use jobforge_core::result::AppResult;
use jobforge_database::MetricStore;
use jobforge_entity::{Job, JobMetric, JobStatus, NewJobMetric};

use crate::shutdown;

/// Aggregated execution metrics over a trailing window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedMetrics {
    pub queue_name: String,
    pub job_type: String,
    pub window_seconds: u64,
    pub total_jobs: u64,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub jobs_per_second: f64,
    /// Percentage of failed executions, 0-100.
    pub error_rate: f64,
    pub p50_ms: i64,
    pub p95_ms: i64,
    pub p99_ms: i64,
}

/// Nearest-rank percentile of ascending `sorted` durations; 0 when empty.
pub fn percentile(sorted: &[i64], pct: u32) -> i64 {
    if sorted.is_empty() {
        return 0;
    }
    let index = (sorted.len() * pct as usize / 100).min(sorted.len() - 1);
    sorted[index]
}

/// Fold the metrics of one window into a [`RedMetrics`] report.
pub fn compute_red(
    queue_name: &str,
    job_type: &str,
    window: Duration,
    metrics: &[JobMetric],
) -> RedMetrics {
    let total_jobs = metrics.len() as u64;
    let completed_jobs = metrics
        .iter()
        .filter(|m| m.status == JobStatus::Completed)
        .count() as u64;
    let failed_jobs = metrics
        .iter()
        .filter(|m| m.status == JobStatus::Failed)
        .count() as u64;

    let window_seconds = window.as_secs();
    let jobs_per_second = if window_seconds == 0 {
        0.0
    } else {
        total_jobs as f64 / window_seconds as f64
    };
    let error_rate = if total_jobs == 0 {
        0.0
    } else {
        failed_jobs as f64 / total_jobs as f64 * 100.0
    };

    let mut durations: Vec<i64> = metrics.iter().map(|m| m.duration_ms).collect();
    durations.sort_unstable();

    RedMetrics {
        queue_name: queue_name.to_string(),
        job_type: job_type.to_string(),
        window_seconds,
        total_jobs,
        completed_jobs,
        failed_jobs,
        jobs_per_second,
        error_rate,
        p50_ms: percentile(&durations, 50),
        p95_ms: percentile(&durations, 95),
        p99_ms: percentile(&durations, 99),
    }
}

/// Records one metric per execution and answers RED queries.
pub struct MetricsAggregator {
    store: Arc<dyn MetricStore>,
    window: Duration,
    retention: Duration,
    prune_interval: Duration,
}

impl MetricsAggregator {
    pub fn new(store: Arc<dyn MetricStore>, config: &EngineConfig) -> Self {
        Self {
            store,
            window: config.metrics_window(),
            retention: config.metrics_retention(),
            prune_interval: config.metrics_prune_interval(),
        }
    }

    /// Append the outcome of one execution of `job`. Failures are logged and
    /// never reach the caller.
    pub async fn record(&self, job: &Job, status: JobStatus, duration: Duration) {
        let metric = NewJobMetric {
            queue_name: job.queue_name.clone(),
            job_type: job.job_type.clone(),
            status,
            duration_ms: i64::try_from(duration.as_millis()).unwrap_or(i64::MAX),
            recorded_at: Utc::now(),
        };
        if let Err(e) = self.store.record_metric(&metric).await {
            tracing::warn!(
                job_id = %job.id,
                queue = %job.queue_name,
                job_type = %job.job_type,
                error = %e,
                "Failed to record job metric"
            );
        }
    }

    /// RED metrics of the trailing window ending now.
    pub async fn get_metrics(&self, queue_name: &str, job_type: &str) -> AppResult<RedMetrics> {
        self.metrics_at(queue_name, job_type, Utc::now()).await
    }

    /// RED metrics of the window ending at `now`.
    pub async fn metrics_at(
        &self,
        queue_name: &str,
        job_type: &str,
        now: DateTime<Utc>,
    ) -> AppResult<RedMetrics> {
        let since = now
            .checked_sub_signed(to_chrono(self.window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let metrics = self.store.select_metrics(queue_name, job_type, since).await?;
        Ok(compute_red(queue_name, job_type, self.window, &metrics))
    }

    /// Delete metrics older than the retention window.
    pub async fn prune(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let cutoff = now
            .checked_sub_signed(to_chrono(self.retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let removed = self.store.prune_metrics(cutoff).await?;
        if removed > 0 {
            tracing::info!(removed, "Pruned job metrics");
        }
        Ok(removed)
    }

    /// Prune on a fixed interval until shutdown.
    pub async fn run_pruner(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.prune_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_ms = self.prune_interval.as_millis() as u64,
            retention_hours = self.retention.as_secs() / 3600,
            "Metrics pruner started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown::requested(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.prune(Utc::now()).await {
                tracing::error!(error = %e, "Metrics prune failed");
            }
        }

        tracing::info!("Metrics pruner stopped");
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::weeks(5200))
}

impl std::fmt::Debug for MetricsAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsAggregator")
            .field("window", &self.window)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}
