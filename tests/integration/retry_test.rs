//! Integration tests for retries, permanent failures and panics.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use jobforge_entity::{Job, JobStatus};
use jobforge_worker::{EnqueueRequest, JobExecutionError, JobHandler, handler_fn};

use crate::helpers::TestEngine;

/// Fails every attempt with the configured error.
struct FailingHandler {
    attempts: AtomicUsize,
    permanent: bool,
}

impl FailingHandler {
    fn new(permanent: bool) -> Arc<Self> {
        Arc::new(Self {
            attempts: AtomicUsize::new(0),
            permanent,
        })
    }
}

#[async_trait]
impl JobHandler for FailingHandler {
    async fn execute(&self, _job: &Job) -> Result<(), JobExecutionError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.permanent {
            Err(JobExecutionError::permanent(format!("rejected on attempt {attempt}")))
        } else {
            Err(JobExecutionError::transient(format!("timeout on attempt {attempt}")))
        }
    }
}

#[tokio::test]
async fn test_retries_exhaust_then_fail() {
    let app = TestEngine::new();
    let handler = FailingHandler::new(false);
    app.engine.register("flaky", handler.clone());

    let id = app
        .engine
        .enqueue(EnqueueRequest::new("default", "flaky").with_max_retries(2))
        .await
        .unwrap();

    app.engine.start().unwrap();
    let job = app.wait_for_status(id, JobStatus::Failed).await;
    app.engine.stop().await.unwrap();

    assert_eq!(job.retry_count, 2);
    assert_eq!(handler.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(job.error.as_deref(), Some("timeout on attempt 3"));
    assert!(job.completed_at.is_some());

    let metrics = app.engine.get_metrics("default", "flaky").await.unwrap();
    assert_eq!(metrics.total_jobs, 3);
    assert_eq!(metrics.failed_jobs, 3);
}

#[tokio::test]
async fn test_permanent_error_is_not_retried() {
    let app = TestEngine::new();
    let handler = FailingHandler::new(true);
    app.engine.register("strict", handler.clone());

    let id = app
        .engine
        .enqueue(EnqueueRequest::new("default", "strict").with_max_retries(5))
        .await
        .unwrap();

    app.engine.start().unwrap();
    let job = app.wait_for_status(id, JobStatus::Failed).await;
    app.engine.stop().await.unwrap();

    assert_eq!(job.retry_count, 0);
    assert_eq!(handler.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(job.error.as_deref(), Some("rejected on attempt 1"));
}

#[tokio::test]
async fn test_panicking_handler_does_not_kill_the_pool() {
    let app = TestEngine::new();
    app.engine.register(
        "explode",
        handler_fn(|_job| async {
            if true {
                panic!("boom");
            }
            Ok::<(), JobExecutionError>(())
        }),
    );
    app.engine.register(
        "echo",
        handler_fn(|_job| async { Ok::<(), JobExecutionError>(()) }),
    );

    let exploding = app
        .engine
        .enqueue(EnqueueRequest::new("default", "explode").with_max_retries(1))
        .await
        .unwrap();

    app.engine.start().unwrap();
    let failed = app.wait_for_status(exploding, JobStatus::Failed).await;

    let healthy = app
        .engine
        .enqueue(EnqueueRequest::new("default", "echo"))
        .await
        .unwrap();
    app.wait_for_status(healthy, JobStatus::Completed).await;
    app.engine.stop().await.unwrap();

    assert_eq!(failed.retry_count, 1);
    assert_eq!(failed.error.as_deref(), Some("handler panicked: boom"));
}
