//! Job engine configuration.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Configuration of the job engine: worker pools, retries, scheduler,
/// metrics retention and shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of concurrent workers per queue. One pool is started for each
    /// entry.
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: HashMap<String, usize>,
    /// Interval in milliseconds between candidate polls of each queue.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Retry bound applied when an enqueue request does not carry one.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: i32,
    /// First retry delay in milliseconds; doubled for each further retry.
    #[serde(default = "default_backoff_base")]
    pub retry_backoff_base_ms: u64,
    /// Upper bound on the retry delay in milliseconds.
    #[serde(default = "default_backoff_max")]
    pub retry_backoff_max_ms: u64,
    /// Whether recurring definitions are materialized by this process.
    #[serde(default = "default_true")]
    pub scheduler_enabled: bool,
    #[serde(default = "default_scheduler_interval")]
    pub scheduler_interval_ms: u64,
    /// Maximum number of due definitions handled per scheduler tick.
    #[serde(default = "default_scheduler_batch")]
    pub scheduler_batch_size: i64,
    /// Metrics older than this are pruned.
    #[serde(default = "default_metrics_retention")]
    pub metrics_retention_hours: u64,
    /// Trailing window used when computing RED metrics.
    #[serde(default = "default_metrics_window")]
    pub metrics_window_seconds: u64,
    #[serde(default = "default_metrics_prune_interval")]
    pub metrics_prune_interval_ms: u64,
    /// How long `stop` waits for in-flight handlers before aborting them.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
    /// Requeue `running` jobs whose `started_at` is older than this many
    /// seconds. Disabled when unset.
    #[serde(default)]
    pub stale_job_timeout_seconds: Option<u64>,
}

impl EngineConfig {
    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), AppError> {
        if let Some((queue, _)) = self.worker_concurrency.iter().find(|(_, n)| **n == 0) {
            return Err(AppError::configuration(format!(
                "worker concurrency for queue '{queue}' must be at least 1"
            )));
        }
        if self.poll_interval_ms == 0
            || self.scheduler_interval_ms == 0
            || self.metrics_prune_interval_ms == 0
        {
            return Err(AppError::configuration(
                "poll, scheduler and metrics prune intervals must be non-zero",
            ));
        }
        if self.scheduler_batch_size < 1 {
            return Err(AppError::configuration(
                "scheduler_batch_size must be at least 1",
            ));
        }
        if self.retry_backoff_max_ms < self.retry_backoff_base_ms {
            return Err(AppError::configuration(
                "retry_backoff_max_ms must not be smaller than retry_backoff_base_ms",
            ));
        }
        if self.default_max_retries < 0 {
            return Err(AppError::configuration(
                "default_max_retries must not be negative",
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_backoff_base(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_base_ms)
    }

    pub fn retry_backoff_max(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_max_ms)
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler_interval_ms)
    }

    pub fn metrics_retention(&self) -> Duration {
        Duration::from_secs(self.metrics_retention_hours * 3600)
    }

    pub fn metrics_window(&self) -> Duration {
        Duration::from_secs(self.metrics_window_seconds)
    }

    pub fn metrics_prune_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_prune_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn stale_job_timeout(&self) -> Option<Duration> {
        self.stale_job_timeout_seconds.map(Duration::from_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: default_worker_concurrency(),
            poll_interval_ms: default_poll_interval(),
            default_max_retries: default_max_retries(),
            retry_backoff_base_ms: default_backoff_base(),
            retry_backoff_max_ms: default_backoff_max(),
            scheduler_enabled: default_true(),
            scheduler_interval_ms: default_scheduler_interval(),
            scheduler_batch_size: default_scheduler_batch(),
            metrics_retention_hours: default_metrics_retention(),
            metrics_window_seconds: default_metrics_window(),
            metrics_prune_interval_ms: default_metrics_prune_interval(),
            shutdown_timeout_ms: default_shutdown_timeout(),
            stale_job_timeout_seconds: None,
        }
    }
}

fn default_worker_concurrency() -> HashMap<String, usize> {
    HashMap::from([("default".to_string(), 4)])
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_max_retries() -> i32 {
    3
}

fn default_backoff_base() -> u64 {
    1000
}

fn default_backoff_max() -> u64 {
    300_000
}

fn default_true() -> bool {
    true
}

fn default_scheduler_interval() -> u64 {
    60_000
}

fn default_scheduler_batch() -> i64 {
    100
}

fn default_metrics_retention() -> u64 {
    168
}

fn default_metrics_window() -> u64 {
    3600
}

fn default_metrics_prune_interval() -> u64 {
    3_600_000
}

fn default_shutdown_timeout() -> u64 {
    30_000
}
