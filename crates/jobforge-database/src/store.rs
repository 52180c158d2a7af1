//! Job store contract.
//!
//! Every operation is a single atomic statement against the shared store.
//! State-changing job writes are gated on the `version` the caller last
//! read and return `false` when another writer got there first; losing
//! such a race is not an error.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use jobforge_core::result::AppResult;
use jobforge_entity::{
    Job, JobMetric, JobStatus, NewJob, NewJobMetric, ScheduledJob, UpsertScheduledJob,
};

use crate::memory::MemoryStore;
use crate::repositories::{PgJobMetricRepository, PgJobRepository, PgScheduledJobRepository};

/// Access to the `jobs` table.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Insert a pending job. A duplicate idempotency key fails with
    /// `ErrorKind::Conflict`.
    async fn insert_job(&self, job: &NewJob) -> AppResult<Job>;

    /// Id of the job created with `key`, if any.
    async fn find_id_by_idempotency_key(&self, key: &str) -> AppResult<Option<Uuid>>;

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Job>>;

    /// Pending jobs of `queue` with `run_at <= now`, ordered by
    /// `priority DESC, run_at ASC`.
    async fn select_candidates(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<Job>>;

    /// Move a pending job to running if its version is still
    /// `expected_version`. Exactly one of any number of concurrent callers
    /// holding the same version succeeds.
    async fn try_claim(
        &self,
        id: Uuid,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Hand a claimed job back to pending without touching its retry state.
    async fn release_claim(&self, id: Uuid, version: i64, now: DateTime<Utc>) -> AppResult<bool>;

    async fn mark_completed(&self, id: Uuid, version: i64, now: DateTime<Utc>)
    -> AppResult<bool>;

    /// Terminal failure. The error is preserved for inspection.
    async fn mark_failed(
        &self,
        id: Uuid,
        version: i64,
        error: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Return a claimed job to pending with `retry_count + 1`, eligible
    /// again at `run_at`.
    async fn schedule_retry(
        &self,
        id: Uuid,
        version: i64,
        run_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Cancel a job that has not been claimed yet.
    async fn cancel(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<bool>;

    async fn count_by_status(&self, queue: &str, status: JobStatus) -> AppResult<i64>;

    /// Recover running jobs started before `started_before`. Each recovery
    /// consumes a retry: a job with retries left returns to pending, one
    /// without is failed with `error`.
    async fn requeue_stale(
        &self,
        started_before: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> AppResult<u64>;
}

/// Access to the `scheduled_jobs` table.
#[async_trait]
pub trait ScheduleStore: Send + Sync + 'static {
    /// Create or update a definition by name. An update keeps the stored
    /// `next_run_at` when the cron expression did not change.
    async fn upsert_scheduled_job(&self, job: &UpsertScheduledJob) -> AppResult<ScheduledJob>;

    async fn find_scheduled_job(&self, name: &str) -> AppResult<Option<ScheduledJob>>;

    /// Enabled definitions with `next_run_at <= now`, earliest first.
    async fn select_due_scheduled_jobs(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<ScheduledJob>>;

    /// Move a definition to its next occurrence, provided nobody advanced it
    /// since `expected_next_run_at` was read.
    async fn advance_schedule_next_run(
        &self,
        id: Uuid,
        expected_next_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
        last_run_at: DateTime<Utc>,
    ) -> AppResult<bool>;
}

/// Access to the `job_metrics` table.
#[async_trait]
pub trait MetricStore: Send + Sync + 'static {
    async fn record_metric(&self, metric: &NewJobMetric) -> AppResult<()>;

    /// Metrics of one queue/job type recorded at or after `since`.
    async fn select_metrics(
        &self,
        queue: &str,
        job_type: &str,
        since: DateTime<Utc>,
    ) -> AppResult<Vec<JobMetric>>;

    /// Delete metrics recorded before `before`; returns the number removed.
    async fn prune_metrics(&self, before: DateTime<Utc>) -> AppResult<u64>;
}

/// The three stores the engine works against.
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub schedules: Arc<dyn ScheduleStore>,
    pub metrics: Arc<dyn MetricStore>,
}

impl Stores {
    /// PostgreSQL-backed stores sharing one pool.
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            jobs: Arc::new(PgJobRepository::new(pool.clone())),
            schedules: Arc::new(PgScheduledJobRepository::new(pool.clone())),
            metrics: Arc::new(PgJobMetricRepository::new(pool)),
        }
    }

    /// Fresh in-memory stores.
    pub fn memory() -> Self {
        Self::from_memory(MemoryStore::new())
    }

    /// Stores backed by an existing in-memory store, so tests can keep a
    /// handle for direct inspection.
    pub fn from_memory(store: MemoryStore) -> Self {
        Self {
            jobs: Arc::new(store.clone()),
            schedules: Arc::new(store.clone()),
            metrics: Arc::new(store),
        }
    }
}

impl fmt::Debug for Stores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
