//! Job metric entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::job::JobStatus;

/// One handler execution (a row of `job_metrics`). Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobMetric {
    pub id: Uuid,
    pub queue_name: String,
    pub job_type: String,
    /// `completed` or `failed`.
    pub status: JobStatus,
    pub duration_ms: i64,
    pub recorded_at: DateTime<Utc>,
}

/// Data required to append a metric row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJobMetric {
    pub queue_name: String,
    pub job_type: String,
    pub status: JobStatus,
    pub duration_ms: i64,
    pub recorded_at: DateTime<Utc>,
}

impl NewJobMetric {
    /// Materialize the stored row under a fresh identifier.
    pub fn into_metric(self) -> JobMetric {
        JobMetric {
            id: Uuid::new_v4(),
            queue_name: self.queue_name,
            job_type: self.job_type,
            status: self.status,
            duration_ms: self.duration_ms,
            recorded_at: self.recorded_at,
        }
    }
}
