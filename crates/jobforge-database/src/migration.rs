//! Embedded schema migrations.

use sqlx::PgPool;
use tracing::info;

use jobforge_core::error::{AppError, ErrorKind};

/// Apply every pending migration under `migrations/` to the job store.
pub async fn run_migrations(pool: &PgPool) -> Result<(), AppError> {
    info!("Applying job store migrations");

    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(|e| {
            AppError::with_source(
                ErrorKind::Database,
                format!("Failed to run migrations: {e}"),
                e,
            )
        })?;

    info!("Job store schema is up to date");
    Ok(())
}
