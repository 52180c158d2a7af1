//! In-process implementation of the job store contract.
//!
//! Every operation takes one mutex for its whole duration, which gives it
//! the same atomicity a single SQL statement has. Useful for tests and for
//! deployments where every worker lives in one process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use jobforge_core::error::AppError;
use jobforge_core::result::AppResult;
use jobforge_entity::{
    Job, JobMetric, JobStatus, NewJob, NewJobMetric, ScheduledJob, UpsertScheduledJob,
};

use crate::store::{JobStore, MetricStore, ScheduleStore};

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<Uuid, Job>,
    idempotency_keys: HashMap<String, Uuid>,
    schedules: HashMap<String, ScheduledJob>,
    metrics: Vec<JobMetric>,
}

/// In-memory job, schedule and metric store. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| AppError::internal("Memory store lock poisoned"))
    }

    /// Snapshot of every stored job.
    pub fn jobs(&self) -> AppResult<Vec<Job>> {
        Ok(self.lock()?.jobs.values().cloned().collect())
    }

    /// Snapshot of every stored metric.
    pub fn metrics(&self) -> AppResult<Vec<JobMetric>> {
        Ok(self.lock()?.metrics.clone())
    }

    /// Apply `change` to a job whose version and status still match.
    fn transition(
        &self,
        id: Uuid,
        version: Option<i64>,
        from: JobStatus,
        change: impl FnOnce(&mut Job),
    ) -> AppResult<bool> {
        let mut state = self.lock()?;
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(false);
        };
        if job.status != from || version.is_some_and(|v| v != job.version) {
            return Ok(false);
        }
        change(job);
        job.version += 1;
        Ok(true)
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job(&self, job: &NewJob) -> AppResult<Job> {
        let mut state = self.lock()?;
        if let Some(key) = &job.idempotency_key {
            if state.idempotency_keys.contains_key(key) {
                return Err(AppError::conflict(format!(
                    "Idempotency key already used: {key}"
                )));
            }
            state.idempotency_keys.insert(key.clone(), job.id);
        }
        let row = job.clone().into_job();
        state.jobs.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_id_by_idempotency_key(&self, key: &str) -> AppResult<Option<Uuid>> {
        Ok(self.lock()?.idempotency_keys.get(key).copied())
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Job>> {
        Ok(self.lock()?.jobs.get(&id).cloned())
    }

    async fn select_candidates(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<Job>> {
        let state = self.lock()?;
        let mut candidates: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| j.queue_name == queue && j.status == JobStatus::Pending && j.run_at <= now)
            .cloned()
            .collect();
        candidates.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.run_at.cmp(&b.run_at))
                .then(a.created_at.cmp(&b.created_at))
        });
        candidates.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(candidates)
    }

    async fn try_claim(
        &self,
        id: Uuid,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        self.transition(id, Some(expected_version), JobStatus::Pending, |job| {
            job.status = JobStatus::Running;
            job.started_at = Some(now);
            job.updated_at = now;
        })
    }

    async fn release_claim(&self, id: Uuid, version: i64, now: DateTime<Utc>) -> AppResult<bool> {
        self.transition(id, Some(version), JobStatus::Running, |job| {
            job.status = JobStatus::Pending;
            job.started_at = None;
            job.queued_at = now;
            job.updated_at = now;
        })
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        version: i64,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        self.transition(id, Some(version), JobStatus::Running, |job| {
            job.status = JobStatus::Completed;
            job.completed_at = Some(now);
            job.updated_at = now;
        })
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        version: i64,
        error: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        self.transition(id, Some(version), JobStatus::Running, |job| {
            job.status = JobStatus::Failed;
            job.error = Some(error.to_string());
            job.completed_at = Some(now);
            job.updated_at = now;
        })
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        version: i64,
        run_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        self.transition(id, Some(version), JobStatus::Running, |job| {
            job.status = JobStatus::Pending;
            job.retry_count += 1;
            job.run_at = run_at;
            job.error = Some(error.to_string());
            job.started_at = None;
            job.queued_at = now;
            job.updated_at = now;
        })
    }

    async fn cancel(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<bool> {
        self.transition(id, None, JobStatus::Pending, |job| {
            job.status = JobStatus::Cancelled;
            job.completed_at = Some(now);
            job.updated_at = now;
        })
    }

    async fn count_by_status(&self, queue: &str, status: JobStatus) -> AppResult<i64> {
        let state = self.lock()?;
        let count = state
            .jobs
            .values()
            .filter(|j| j.queue_name == queue && j.status == status)
            .count();
        Ok(count as i64)
    }

    async fn requeue_stale(
        &self,
        started_before: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> AppResult<u64> {
        let mut state = self.lock()?;
        let mut recovered = 0;
        for job in state.jobs.values_mut() {
            let stale = job.status == JobStatus::Running
                && job.started_at.is_some_and(|started| started < started_before);
            if !stale {
                continue;
            }
            if job.retry_count < job.max_retries {
                job.status = JobStatus::Pending;
                job.retry_count += 1;
                job.started_at = None;
                job.queued_at = now;
            } else {
                job.status = JobStatus::Failed;
                job.completed_at = Some(now);
            }
            job.error = Some(error.to_string());
            job.updated_at = now;
            job.version += 1;
            recovered += 1;
        }
        Ok(recovered)
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn upsert_scheduled_job(&self, job: &UpsertScheduledJob) -> AppResult<ScheduledJob> {
        let mut state = self.lock()?;
        let row = match state.schedules.get(&job.name) {
            Some(existing) => ScheduledJob {
                id: existing.id,
                name: job.name.clone(),
                queue_name: job.queue_name.clone(),
                job_type: job.job_type.clone(),
                payload: job.payload.clone(),
                next_run_at: if existing.cron_expr == job.cron_expr {
                    existing.next_run_at
                } else {
                    job.next_run_at
                },
                cron_expr: job.cron_expr.clone(),
                enabled: job.enabled,
                last_run_at: existing.last_run_at,
                created_at: existing.created_at,
                updated_at: job.now,
            },
            None => ScheduledJob {
                id: job.id,
                name: job.name.clone(),
                queue_name: job.queue_name.clone(),
                job_type: job.job_type.clone(),
                payload: job.payload.clone(),
                cron_expr: job.cron_expr.clone(),
                enabled: job.enabled,
                next_run_at: job.next_run_at,
                last_run_at: None,
                created_at: job.now,
                updated_at: job.now,
            },
        };
        state.schedules.insert(row.name.clone(), row.clone());
        Ok(row)
    }

    async fn find_scheduled_job(&self, name: &str) -> AppResult<Option<ScheduledJob>> {
        Ok(self.lock()?.schedules.get(name).cloned())
    }

    async fn select_due_scheduled_jobs(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<ScheduledJob>> {
        let state = self.lock()?;
        let mut due: Vec<ScheduledJob> = state
            .schedules
            .values()
            .filter(|s| s.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.next_run_at);
        due.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(due)
    }

    async fn advance_schedule_next_run(
        &self,
        id: Uuid,
        expected_next_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
        last_run_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut state = self.lock()?;
        let Some(schedule) = state
            .schedules
            .values_mut()
            .find(|s| s.id == id && s.next_run_at == expected_next_run_at)
        else {
            return Ok(false);
        };
        schedule.next_run_at = next_run_at;
        schedule.last_run_at = Some(last_run_at);
        schedule.updated_at = last_run_at;
        Ok(true)
    }
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn record_metric(&self, metric: &NewJobMetric) -> AppResult<()> {
        self.lock()?.metrics.push(metric.clone().into_metric());
        Ok(())
    }

    async fn select_metrics(
        &self,
        queue: &str,
        job_type: &str,
        since: DateTime<Utc>,
    ) -> AppResult<Vec<JobMetric>> {
        let state = self.lock()?;
        Ok(state
            .metrics
            .iter()
            .filter(|m| m.queue_name == queue && m.job_type == job_type && m.recorded_at >= since)
            .cloned()
            .collect())
    }

    async fn prune_metrics(&self, before: DateTime<Utc>) -> AppResult<u64> {
        let mut state = self.lock()?;
        let before_len = state.metrics.len();
        state.metrics.retain(|m| m.recorded_at >= before);
        Ok((before_len - state.metrics.len()) as u64)
    }
}
