//! Retry policy applied after a handler fails.

use std::time::Duration;

use chrono::{DateTime, Utc};

use jobforge_core::config::EngineConfig;
use jobforge_entity::Job;

/// What to do with a job whose handler returned a retryable error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Return to pending, eligible again at `run_at`.
    Retry { run_at: DateTime<Utc> },
    /// Retries are used up; fail terminally.
    Exhausted,
}

/// Capped exponential backoff: `backoff(n) = min(base * 2^n, cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base: Duration,
    cap: Duration,
}

impl RetryPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.retry_backoff_base(), config.retry_backoff_max())
    }

    /// Delay before the retry that follows `retry_count` earlier retries.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.cap, |delay| delay.min(self.cap))
    }

    /// Decide the fate of `job` after a retryable failure at `now`.
    pub fn decide(&self, job: &Job, now: DateTime<Utc>) -> RetryDecision {
        if !job.can_retry() {
            return RetryDecision::Exhausted;
        }
        let delay = self.backoff(u32::try_from(job.retry_count).unwrap_or(0));
        let delay =
            chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::weeks(5200));
        RetryDecision::Retry {
            run_at: now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}
