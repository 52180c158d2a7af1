//! JobForge server: runs the job engine against PostgreSQL.
//!
//! Applications embed [`jobforge_worker::JobEngine`] and register their
//! handlers; this binary hosts the parts that need none: the scheduler,
//! the metrics pruner, the stale job janitor, and pools that fail jobs of
//! unknown types fast.

use tracing;
use tracing_subscriber::{EnvFilter, fmt};

use jobforge_core::config::AppConfig;
use jobforge_core::error::AppError;
use jobforge_database::{DatabasePool, Stores};
use jobforge_worker::JobEngine;

#[tokio::main]
async fn main() {
    let env = std::env::var("JOBFORGE_ENV").unwrap_or_else(|_| "development".to_string());

    let config = match AppConfig::load(&env) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config);
    tracing::info!(env = %env, "Configuration loaded");

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting JobForge v{}", env!("CARGO_PKG_VERSION"));

    let db = DatabasePool::connect(&config.database).await?;
    db.health_check().await?;

    if config.database.run_migrations {
        jobforge_database::migration::run_migrations(db.pool()).await?;
    }

    let engine = JobEngine::new(Stores::postgres(db.pool().clone()), config.engine.clone())?;
    engine.start()?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, stopping job engine...");

    engine.stop().await?;
    db.close().await;

    tracing::info!("JobForge shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
