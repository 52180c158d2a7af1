//! Job entity model.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::payload::{self, Payload};
use super::status::JobStatus;

/// A unit of deferred work (a row of `jobs`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    /// Unique job identifier.
    pub id: Uuid,
    /// Queue whose worker pool may claim this job.
    pub queue_name: String,
    /// Key used to look up the registered handler.
    pub job_type: String,
    /// Payload document, stored as JSON text.
    pub payload: String,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Higher values are dequeued first.
    pub priority: i32,
    /// How many times a failed execution may be retried.
    pub max_retries: i32,
    /// How many retries have been scheduled so far.
    pub retry_count: i32,
    /// Earliest time the job is eligible for dispatch.
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When the job last entered `pending`.
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Last failure message.
    pub error: Option<String>,
    /// Caller-supplied deduplication token.
    pub idempotency_key: Option<String>,
    /// Optimistic-concurrency counter, incremented on every state change.
    pub version: i64,
}

impl Job {
    /// Decode the payload into a key/value document.
    pub fn payload_map(&self) -> Result<Payload, serde_json::Error> {
        payload::decode(&self.payload)
    }

    /// Decode the payload into a typed structure.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        payload::decode_as(&self.payload)
    }

    /// Whether another failed execution may still be retried.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Data required to insert a new pending job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub id: Uuid,
    pub queue_name: String,
    pub job_type: String,
    /// Payload already encoded as JSON text.
    pub payload: String,
    pub priority: i32,
    pub max_retries: i32,
    pub run_at: DateTime<Utc>,
    pub idempotency_key: Option<String>,
    /// Insertion time; becomes `created_at`, `updated_at` and `queued_at`.
    pub now: DateTime<Utc>,
}

impl NewJob {
    /// Materialize the row that inserting this job produces.
    pub fn into_job(self) -> Job {
        Job {
            id: self.id,
            queue_name: self.queue_name,
            job_type: self.job_type,
            payload: self.payload,
            status: JobStatus::Pending,
            priority: self.priority,
            max_retries: self.max_retries,
            retry_count: 0,
            run_at: self.run_at,
            created_at: self.now,
            updated_at: self.now,
            queued_at: self.now,
            started_at: None,
            completed_at: None,
            error: None,
            idempotency_key: self.idempotency_key,
            version: 1,
        }
    }
}
