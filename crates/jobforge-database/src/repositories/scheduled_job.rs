//! PostgreSQL implementation of [`ScheduleStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use jobforge_core::error::{AppError, ErrorKind};
use jobforge_core::result::AppResult;
use jobforge_entity::{ScheduledJob, UpsertScheduledJob};

use crate::store::ScheduleStore;

/// Repository for the `scheduled_jobs` table.
#[derive(Debug, Clone)]
pub struct PgScheduledJobRepository {
    pool: PgPool,
}

impl PgScheduledJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleStore for PgScheduledJobRepository {
    async fn upsert_scheduled_job(&self, job: &UpsertScheduledJob) -> AppResult<ScheduledJob> {
        sqlx::query_as::<_, ScheduledJob>(
            "INSERT INTO scheduled_jobs (id, name, queue_name, job_type, payload, cron_expr, \
             enabled, next_run_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9) \
             ON CONFLICT (name) DO UPDATE SET \
                queue_name = EXCLUDED.queue_name, \
                job_type = EXCLUDED.job_type, \
                payload = EXCLUDED.payload, \
                enabled = EXCLUDED.enabled, \
                next_run_at = CASE WHEN scheduled_jobs.cron_expr = EXCLUDED.cron_expr \
                    THEN scheduled_jobs.next_run_at ELSE EXCLUDED.next_run_at END, \
                cron_expr = EXCLUDED.cron_expr, \
                updated_at = EXCLUDED.updated_at \
             RETURNING *",
        )
        .bind(job.id)
        .bind(&job.name)
        .bind(&job.queue_name)
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(&job.cron_expr)
        .bind(job.enabled)
        .bind(job.next_run_at)
        .bind(job.now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to upsert schedule", e))
    }

    async fn find_scheduled_job(&self, name: &str) -> AppResult<Option<ScheduledJob>> {
        sqlx::query_as::<_, ScheduledJob>("SELECT * FROM scheduled_jobs WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find schedule", e))
    }

    async fn select_due_scheduled_jobs(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<ScheduledJob>> {
        sqlx::query_as::<_, ScheduledJob>(
            "SELECT * FROM scheduled_jobs WHERE enabled AND next_run_at <= $1 \
             ORDER BY next_run_at ASC LIMIT $2",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to select due schedules", e)
        })
    }

    async fn advance_schedule_next_run(
        &self,
        id: Uuid,
        expected_next_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
        last_run_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE scheduled_jobs SET next_run_at = $3, last_run_at = $4, updated_at = $4 \
             WHERE id = $1 AND next_run_at = $2",
        )
        .bind(id)
        .bind(expected_next_run_at)
        .bind(next_run_at)
        .bind(last_run_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to advance schedule", e))?;
        Ok(result.rows_affected() == 1)
    }
}
