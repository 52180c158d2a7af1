//! Stale job janitor.
//!
//! A worker that dies mid-execution leaves its job `running` forever. When a
//! staleness threshold is configured, the janitor periodically returns such
//! jobs to `pending`. The threshold must exceed the longest legitimate
//! execution, otherwise live jobs are handed to a second worker.
//!
//! Every recovery consumes a retry, so a job that keeps killing its worker
//! ends up `failed` once its retries are exhausted.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};

use jobforge_core::result::AppResult;
use jobforge_database::JobStore;

use crate::shutdown;

/// Error recorded on a job recovered from a lost worker.
pub const STALE_JOB_ERROR: &str = "worker lost: job exceeded the stale job timeout";

pub struct StaleJobJanitor {
    store: Arc<dyn JobStore>,
    timeout: Duration,
}

impl StaleJobJanitor {
    pub fn new(store: Arc<dyn JobStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Sweep every half timeout, at most once per second.
    pub fn interval(&self) -> Duration {
        (self.timeout / 2).max(Duration::from_secs(1))
    }

    /// Recover jobs that have been running longer than the timeout at `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let timeout =
            chrono::Duration::from_std(self.timeout).unwrap_or_else(|_| chrono::Duration::weeks(5200));
        let started_before = now
            .checked_sub_signed(timeout)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let recovered = self
            .store
            .requeue_stale(started_before, STALE_JOB_ERROR, now)
            .await?;
        if recovered > 0 {
            tracing::warn!(
                recovered,
                timeout_seconds = self.timeout.as_secs(),
                "Recovered stale running jobs"
            );
        }
        Ok(recovered)
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            timeout_seconds = self.timeout.as_secs(),
            "Stale job janitor started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown::requested(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.sweep(Utc::now()).await {
                tracing::error!(error = %e, "Stale job sweep failed");
            }
        }

        tracing::info!("Stale job janitor stopped");
    }
}

impl std::fmt::Debug for StaleJobJanitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaleJobJanitor")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
