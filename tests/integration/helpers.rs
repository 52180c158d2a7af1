//! Shared test helpers for integration tests.

use std::future::Future;
use std::time::Duration;

use uuid::Uuid;

use jobforge_core::config::EngineConfig;
use jobforge_database::{MemoryStore, Stores};
use jobforge_entity::{Job, JobStatus};
use jobforge_worker::JobEngine;

/// Test engine context
pub struct TestEngine {
    /// The engine under test
    pub engine: JobEngine,
    /// Direct handle on the in-memory store
    pub store: MemoryStore,
}

impl TestEngine {
    /// Engine with fast polling, tiny backoff and no scheduler loop.
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = MemoryStore::new();
        let engine = JobEngine::new(Stores::from_memory(store.clone()), config)
            .expect("valid engine config");
        Self { engine, store }
    }

    /// Poll until the job reaches `status` or panic after five seconds.
    pub async fn wait_for_status(&self, id: Uuid, status: JobStatus) -> Job {
        let engine = &self.engine;
        wait_until(Duration::from_secs(5), || async move {
            engine
                .get_job(id)
                .await
                .expect("job lookup")
                .filter(|job| job.status == status)
        })
        .await
        .unwrap_or_else(|| panic!("job {id} never reached {status}"))
    }

    /// Poll until every listed job is terminal.
    pub async fn wait_all_terminal(&self, ids: &[Uuid]) -> Vec<Job> {
        let engine = &self.engine;
        wait_until(Duration::from_secs(5), || async move {
            let mut jobs = Vec::with_capacity(ids.len());
            for id in ids {
                match engine.get_job(*id).await.expect("job lookup") {
                    Some(job) if job.status.is_terminal() => jobs.push(job),
                    _ => return None,
                }
            }
            Some(jobs)
        })
        .await
        .expect("jobs did not finish in time")
    }
}

/// Engine settings tuned for tests.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        poll_interval_ms: 10,
        retry_backoff_base_ms: 5,
        retry_backoff_max_ms: 20,
        scheduler_enabled: false,
        shutdown_timeout_ms: 2_000,
        ..EngineConfig::default()
    }
}

/// Engine settings with a single worker on the default queue.
pub fn single_worker_config() -> EngineConfig {
    let mut config = fast_config();
    config.worker_concurrency = [("default".to_string(), 1)].into_iter().collect();
    config
}

/// Re-evaluate `check` every few milliseconds until it yields a value.
pub async fn wait_until<T, F, Fut>(timeout: Duration, mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(value) = check().await {
            return Some(value);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
