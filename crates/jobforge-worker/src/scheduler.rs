//! Cron scheduler for recurring jobs.
//!
//! Definitions live in the `scheduled_jobs` table, so any number of engine
//! processes can run the scheduler against the same store. Each tick turns
//! due definitions into ordinary jobs. The idempotency key
//! `scheduled:<name>:<due unix seconds>` makes a second scheduler that reads
//! the same due definition enqueue nothing, and the conditional advance of
//! `next_run_at` lets only one of them move the definition forward.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing;
use uuid::Uuid;

use jobforge_core::config::EngineConfig;
use jobforge_core::error::AppError;
use jobforge_core::result::AppResult;
use jobforge_database::ScheduleStore;
use jobforge_entity::job::payload;
use jobforge_entity::{Payload, ScheduledJob, UpsertScheduledJob};

use crate::cron::CronExpr;
use crate::queue::{EnqueueRequest, JobQueue};
use crate::shutdown;

/// Definition of a recurring job, upserted by `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub name: String,
    pub queue_name: String,
    pub job_type: String,
    pub payload: Payload,
    /// Five-field cron expression, evaluated in UTC
    pub cron_expr: String,
    pub enabled: bool,
}

impl ScheduleRequest {
    /// An enabled definition with an empty payload.
    pub fn new(
        name: impl Into<String>,
        queue_name: impl Into<String>,
        job_type: impl Into<String>,
        cron_expr: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            queue_name: queue_name.into(),
            job_type: job_type.into(),
            payload: Payload::new(),
            cron_expr: cron_expr.into(),
            enabled: true,
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Idempotency key of the job fired for `name` at `due`.
pub fn fire_key(name: &str, due: DateTime<Utc>) -> String {
    format!("scheduled:{name}:{}", due.timestamp())
}

/// Turns due scheduled definitions into jobs
pub struct CronScheduler {
    store: Arc<dyn ScheduleStore>,
    queue: Arc<JobQueue>,
    interval: Duration,
    batch_size: i64,
}

impl CronScheduler {
    pub fn new(store: Arc<dyn ScheduleStore>, queue: Arc<JobQueue>, config: &EngineConfig) -> Self {
        Self {
            store,
            queue,
            interval: config.scheduler_interval(),
            batch_size: config.scheduler_batch_size,
        }
    }

    /// Create or update a definition. The cron expression is validated here
    /// so a bad definition never reaches the store.
    pub async fn upsert(&self, request: ScheduleRequest) -> AppResult<ScheduledJob> {
        for (field, value) in [
            ("name", &request.name),
            ("queue_name", &request.queue_name),
            ("job_type", &request.job_type),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::validation(format!("{field} must not be empty")));
            }
        }

        let cron = CronExpr::parse(&request.cron_expr)?;
        let now = Utc::now();
        let next_run_at = cron.next_after(now).ok_or_else(|| {
            AppError::validation(format!("cron expression '{cron}' never fires"))
        })?;

        let definition = self
            .store
            .upsert_scheduled_job(&UpsertScheduledJob {
                id: Uuid::new_v4(),
                name: request.name,
                queue_name: request.queue_name,
                job_type: request.job_type,
                payload: payload::encode(&request.payload)?,
                cron_expr: cron.as_str().to_string(),
                enabled: request.enabled,
                next_run_at,
                now,
            })
            .await?;

        tracing::info!(
            schedule = %definition.name,
            cron = %definition.cron_expr,
            next_run_at = %definition.next_run_at,
            enabled = definition.enabled,
            "Scheduled job registered"
        );
        Ok(definition)
    }

    pub async fn find(&self, name: &str) -> AppResult<Option<ScheduledJob>> {
        self.store.find_scheduled_job(name).await
    }

    /// Fire every definition due at `now`; returns how many this scheduler
    /// advanced. A definition that fails is logged and left due.
    pub async fn tick(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let due = self
            .store
            .select_due_scheduled_jobs(now, self.batch_size)
            .await?;

        let mut fired = 0;
        for definition in &due {
            match self.fire(definition, now).await {
                Ok(true) => fired += 1,
                Ok(false) => tracing::debug!(
                    schedule = %definition.name,
                    "Schedule advanced by another scheduler"
                ),
                Err(e) => tracing::error!(
                    schedule = %definition.name,
                    cron = %definition.cron_expr,
                    error = %e,
                    "Failed to fire scheduled job"
                ),
            }
        }
        Ok(fired)
    }

    async fn fire(&self, definition: &ScheduledJob, now: DateTime<Utc>) -> AppResult<bool> {
        let cron = CronExpr::parse(&definition.cron_expr)?;
        let next_run_at = cron.next_after(now).ok_or_else(|| {
            AppError::validation(format!("cron expression '{cron}' has no future occurrence"))
        })?;

        let request = EnqueueRequest::new(&definition.queue_name, &definition.job_type)
            .with_payload(payload::decode(&definition.payload)?)
            .with_idempotency_key(fire_key(&definition.name, definition.next_run_at));
        let job_id = self.queue.enqueue(request).await?;

        let advanced = self
            .store
            .advance_schedule_next_run(definition.id, definition.next_run_at, next_run_at, now)
            .await?;
        if advanced {
            tracing::info!(
                schedule = %definition.name,
                job_id = %job_id,
                %next_run_at,
                "Fired scheduled job"
            );
        }
        Ok(advanced)
    }

    /// Tick on the configured interval until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            batch_size = self.batch_size,
            "Cron scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown::requested(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.tick(Utc::now()).await {
                tracing::error!(error = %e, "Scheduler tick failed");
            }
        }

        tracing::info!("Cron scheduler shut down");
    }
}

impl std::fmt::Debug for CronScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronScheduler")
            .field("interval", &self.interval)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}
