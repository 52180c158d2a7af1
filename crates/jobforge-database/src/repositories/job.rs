//! PostgreSQL implementation of [`JobStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use jobforge_core::error::{AppError, ErrorKind};
use jobforge_core::result::AppResult;
use jobforge_entity::{Job, JobStatus, NewJob};

use crate::store::JobStore;

/// Repository for the `jobs` table.
#[derive(Debug, Clone)]
pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_error(message: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| AppError::with_source(ErrorKind::Database, message, e)
}

#[async_trait]
impl JobStore for PgJobRepository {
    async fn insert_job(&self, job: &NewJob) -> AppResult<Job> {
        sqlx::query_as::<_, Job>(
            "INSERT INTO jobs (id, queue_name, job_type, payload, status, priority, max_retries, \
             retry_count, run_at, created_at, updated_at, queued_at, idempotency_key, version) \
             VALUES ($1, $2, $3, $4, 'pending', $5, $6, 0, $7, $8, $8, $8, $9, 1) RETURNING *",
        )
        .bind(job.id)
        .bind(&job.queue_name)
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(job.priority)
        .bind(job.max_retries)
        .bind(job.run_at)
        .bind(job.now)
        .bind(&job.idempotency_key)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            let duplicate = matches!(&e, sqlx::Error::Database(db) if db.is_unique_violation());
            if duplicate {
                AppError::with_source(ErrorKind::Conflict, "Idempotency key already used", e)
            } else {
                AppError::with_source(ErrorKind::Database, "Failed to insert job", e)
            }
        })
    }

    async fn find_id_by_idempotency_key(&self, key: &str) -> AppResult<Option<Uuid>> {
        sqlx::query_scalar::<_, Uuid>("SELECT id FROM jobs WHERE idempotency_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to look up idempotency key"))
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Job>> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to find job"))
    }

    async fn select_candidates(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<Job>> {
        sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs \
             WHERE queue_name = $1 AND status = 'pending' AND run_at <= $2 \
             ORDER BY priority DESC, run_at ASC, created_at ASC \
             LIMIT $3",
        )
        .bind(queue)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to select candidate jobs"))
    }

    async fn try_claim(
        &self,
        id: Uuid,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'running', started_at = $3, updated_at = $3, \
             version = version + 1 \
             WHERE id = $1 AND version = $2 AND status = 'pending'",
        )
        .bind(id)
        .bind(expected_version)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to claim job"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_claim(&self, id: Uuid, version: i64, now: DateTime<Utc>) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending', started_at = NULL, queued_at = $3, \
             updated_at = $3, version = version + 1 \
             WHERE id = $1 AND version = $2 AND status = 'running'",
        )
        .bind(id)
        .bind(version)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to release job"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        version: i64,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'completed', completed_at = $3, updated_at = $3, \
             version = version + 1 \
             WHERE id = $1 AND version = $2 AND status = 'running'",
        )
        .bind(id)
        .bind(version)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to complete job"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        version: i64,
        error: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed', error = $3, completed_at = $4, updated_at = $4, \
             version = version + 1 \
             WHERE id = $1 AND version = $2 AND status = 'running'",
        )
        .bind(id)
        .bind(version)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to mark job as failed"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        version: i64,
        run_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending', retry_count = retry_count + 1, run_at = $3, \
             error = $4, started_at = NULL, queued_at = $5, updated_at = $5, \
             version = version + 1 \
             WHERE id = $1 AND version = $2 AND status = 'running'",
        )
        .bind(id)
        .bind(version)
        .bind(run_at)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to schedule job retry"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn cancel(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'cancelled', completed_at = $2, updated_at = $2, \
             version = version + 1 \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to cancel job"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn count_by_status(&self, queue: &str, status: JobStatus) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM jobs WHERE queue_name = $1 AND status = $2",
        )
        .bind(queue)
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to count jobs"))
    }

    async fn requeue_stale(
        &self,
        started_before: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> AppResult<u64> {
        // SET expressions read the pre-update row, so every CASE sees the
        // old retry_count.
        let result = sqlx::query(
            "UPDATE jobs SET \
                status = CASE WHEN retry_count < max_retries \
                    THEN 'pending'::job_status ELSE 'failed'::job_status END, \
                retry_count = CASE WHEN retry_count < max_retries \
                    THEN retry_count + 1 ELSE retry_count END, \
                started_at = CASE WHEN retry_count < max_retries THEN NULL ELSE started_at END, \
                queued_at = CASE WHEN retry_count < max_retries THEN $3 ELSE queued_at END, \
                completed_at = CASE WHEN retry_count < max_retries THEN NULL ELSE $3 END, \
                error = $2, \
                updated_at = $3, \
                version = version + 1 \
             WHERE status = 'running' AND started_at < $1",
        )
        .bind(started_before)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to requeue stale jobs"))?;
        Ok(result.rows_affected())
    }
}
