//! PostgreSQL implementation of [`MetricStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use jobforge_core::error::{AppError, ErrorKind};
use jobforge_core::result::AppResult;
use jobforge_entity::{JobMetric, NewJobMetric};

use crate::store::MetricStore;

/// Repository for the append-only `job_metrics` table.
#[derive(Debug, Clone)]
pub struct PgJobMetricRepository {
    pool: PgPool,
}

impl PgJobMetricRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetricStore for PgJobMetricRepository {
    async fn record_metric(&self, metric: &NewJobMetric) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO job_metrics (id, queue_name, job_type, status, duration_ms, recorded_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4())
        .bind(&metric.queue_name)
        .bind(&metric.job_type)
        .bind(metric.status)
        .bind(metric.duration_ms)
        .bind(metric.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to record metric", e))?;
        Ok(())
    }

    async fn select_metrics(
        &self,
        queue: &str,
        job_type: &str,
        since: DateTime<Utc>,
    ) -> AppResult<Vec<JobMetric>> {
        sqlx::query_as::<_, JobMetric>(
            "SELECT * FROM job_metrics \
             WHERE queue_name = $1 AND job_type = $2 AND recorded_at >= $3",
        )
        .bind(queue)
        .bind(job_type)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to select metrics", e))
    }

    async fn prune_metrics(&self, before: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM job_metrics WHERE recorded_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to prune metrics", e))?;
        Ok(result.rows_affected())
    }
}
