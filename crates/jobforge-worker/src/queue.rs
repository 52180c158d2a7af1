//! Job queue: enqueue with idempotency and version-gated bookkeeping.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing;
use uuid::Uuid;

use jobforge_core::error::AppError;
use jobforge_core::result::AppResult;
use jobforge_database::JobStore;
use jobforge_entity::job::payload;
use jobforge_entity::{Job, JobStatus, NewJob, Payload};

use crate::claim;

/// Parameters for creating a new job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnqueueRequest {
    /// Queue the job is served from
    pub queue_name: String,
    /// Handler key
    pub job_type: String,
    /// Arguments passed to the handler
    pub payload: Payload,
    /// Higher runs first
    pub priority: i32,
    /// Falls back to the engine default when unset
    pub max_retries: Option<i32>,
    /// Earliest execution time; takes precedence over `run_in`
    pub run_at: Option<DateTime<Utc>>,
    /// Delay from now
    pub run_in: Option<Duration>,
    /// Deduplication token
    pub idempotency_key: Option<String>,
}

impl EnqueueRequest {
    pub fn new(queue_name: impl Into<String>, job_type: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            job_type: job_type.into(),
            ..Self::default()
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = Some(run_at);
        self
    }

    pub fn run_in(mut self, delay: Duration) -> Self {
        self.run_in = Some(delay);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    fn resolve_run_at(&self, now: DateTime<Utc>) -> AppResult<DateTime<Utc>> {
        if let Some(run_at) = self.run_at {
            return Ok(run_at);
        }
        match self.run_in {
            Some(delay) => chrono::Duration::from_std(delay)
                .ok()
                .and_then(|delay| now.checked_add_signed(delay))
                .ok_or_else(|| AppError::validation(format!("run_in {delay:?} is out of range"))),
            None => Ok(now),
        }
    }
}

/// Job counts of one queue by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queue_name: String,
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

/// Front door to the job store for producers and workers.
///
/// Every state change after enqueue is gated on the version the caller
/// holds. A `false` result means another writer moved the job first; it is
/// logged and otherwise ignored.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    default_max_retries: i32,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>, default_max_retries: i32) -> Self {
        Self {
            store,
            default_max_retries,
        }
    }

    /// Enqueue a new job and return its id.
    ///
    /// With an idempotency key that is already taken, the id of the
    /// existing job is returned and nothing is inserted.
    pub async fn enqueue(&self, request: EnqueueRequest) -> AppResult<Uuid> {
        if request.queue_name.trim().is_empty() {
            return Err(AppError::validation("queue_name must not be empty"));
        }
        if request.job_type.trim().is_empty() {
            return Err(AppError::validation("job_type must not be empty"));
        }
        let max_retries = request.max_retries.unwrap_or(self.default_max_retries);
        if max_retries < 0 {
            return Err(AppError::validation(format!(
                "max_retries must not be negative, got {max_retries}"
            )));
        }
        if request.idempotency_key.as_deref() == Some("") {
            return Err(AppError::validation("idempotency_key must not be empty"));
        }

        let now = Utc::now();
        let new_job = NewJob {
            id: Uuid::new_v4(),
            queue_name: request.queue_name.clone(),
            job_type: request.job_type.clone(),
            payload: payload::encode(&request.payload)?,
            priority: request.priority,
            max_retries,
            run_at: request.resolve_run_at(now)?,
            idempotency_key: request.idempotency_key.clone(),
            now,
        };

        match self.store.insert_job(&new_job).await {
            Ok(job) => {
                tracing::debug!(
                    job_id = %job.id,
                    queue = %job.queue_name,
                    job_type = %job.job_type,
                    priority = job.priority,
                    "Enqueued job"
                );
                Ok(job.id)
            }
            Err(err) if err.is_conflict() => {
                let Some(key) = new_job.idempotency_key.as_deref() else {
                    return Err(err);
                };
                match self.store.find_id_by_idempotency_key(key).await? {
                    Some(existing) => {
                        tracing::debug!(
                            job_id = %existing,
                            idempotency_key = key,
                            "Idempotency key already used, returning existing job"
                        );
                        Ok(existing)
                    }
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    pub async fn find(&self, id: Uuid) -> AppResult<Option<Job>> {
        self.store.find_by_id(id).await
    }

    /// Cancel a job that no worker has claimed yet.
    pub async fn cancel(&self, id: Uuid) -> AppResult<bool> {
        let cancelled = self.store.cancel(id, Utc::now()).await?;
        if cancelled {
            tracing::info!(job_id = %id, "Job cancelled");
        }
        Ok(cancelled)
    }

    /// Pending, due jobs of `queue` in dispatch order.
    pub async fn candidates(
        &self,
        queue: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Job>> {
        claim::fetch_candidates(self.store.as_ref(), queue, limit, now).await
    }

    /// Claim a candidate; `None` when the race was lost.
    pub async fn claim(&self, job: Job, now: DateTime<Utc>) -> AppResult<Option<Job>> {
        claim::try_claim(self.store.as_ref(), job, now).await
    }

    pub async fn complete(&self, job: &Job, now: DateTime<Utc>) -> AppResult<bool> {
        let updated = self.store.mark_completed(job.id, job.version, now).await?;
        self.note_lost_update(job, updated, "complete");
        Ok(updated)
    }

    /// Terminal failure with `error` kept on the row.
    pub async fn fail(&self, job: &Job, error: &str, now: DateTime<Utc>) -> AppResult<bool> {
        let updated = self.store.mark_failed(job.id, job.version, error, now).await?;
        self.note_lost_update(job, updated, "fail");
        Ok(updated)
    }

    /// Back to pending with one more retry used, eligible at `run_at`.
    pub async fn retry(
        &self,
        job: &Job,
        run_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let updated = self
            .store
            .schedule_retry(job.id, job.version, run_at, error, now)
            .await?;
        self.note_lost_update(job, updated, "retry");
        Ok(updated)
    }

    /// Hand a claimed but never executed job back to pending.
    pub async fn release(&self, job: &Job) -> AppResult<bool> {
        let updated = self
            .store
            .release_claim(job.id, job.version, Utc::now())
            .await?;
        self.note_lost_update(job, updated, "release");
        Ok(updated)
    }

    /// Counts of `queue` by status.
    pub async fn stats(&self, queue: &str) -> AppResult<QueueStats> {
        Ok(QueueStats {
            queue_name: queue.to_string(),
            pending: self.store.count_by_status(queue, JobStatus::Pending).await?,
            running: self.store.count_by_status(queue, JobStatus::Running).await?,
            completed: self.store.count_by_status(queue, JobStatus::Completed).await?,
            failed: self.store.count_by_status(queue, JobStatus::Failed).await?,
            cancelled: self.store.count_by_status(queue, JobStatus::Cancelled).await?,
        })
    }

    fn note_lost_update(&self, job: &Job, updated: bool, action: &str) {
        if !updated {
            tracing::warn!(
                job_id = %job.id,
                version = job.version,
                action,
                "Job changed underneath the worker, update skipped"
            );
        }
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("default_max_retries", &self.default_max_retries)
            .finish_non_exhaustive()
    }
}
