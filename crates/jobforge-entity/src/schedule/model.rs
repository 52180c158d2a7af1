//! Scheduled job entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A named recurring definition (a row of `scheduled_jobs`).
///
/// Each firing enqueues a new job built from the template fields and moves
/// `next_run_at` to the following cron occurrence.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScheduledJob {
    pub id: Uuid,
    /// Unique definition name; upserts are keyed on it.
    pub name: String,
    pub queue_name: String,
    pub job_type: String,
    /// Payload template copied verbatim into every enqueued job.
    pub payload: String,
    /// Five-field Unix cron expression.
    pub cron_expr: String,
    pub enabled: bool,
    pub next_run_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledJob {
    /// Whether this definition should fire at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run_at <= now
    }
}

/// Data written by an upsert of a scheduled job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertScheduledJob {
    /// Used only when the name does not exist yet.
    pub id: Uuid,
    pub name: String,
    pub queue_name: String,
    pub job_type: String,
    pub payload: String,
    pub cron_expr: String,
    pub enabled: bool,
    /// Next occurrence computed from `cron_expr`; kept out of an existing
    /// row whose expression is unchanged.
    pub next_run_at: DateTime<Utc>,
    pub now: DateTime<Utc>,
}
