//! Integration tests for end-to-end job lifecycle: unknown types,
//! cancellation, stale job recovery and engine start/stop.

use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use jobforge_database::JobStore;
use jobforge_entity::{JobStatus, Payload};
use jobforge_worker::{EnqueueRequest, JobExecutionError, handler_fn};

use crate::helpers::{TestEngine, fast_config};

#[tokio::test]
async fn test_unregistered_job_type_fails_without_retry() {
    let app = TestEngine::new();

    let mut payload = Payload::new();
    payload.insert("n".to_string(), json!(1));
    let id = app
        .engine
        .enqueue(EnqueueRequest::new("default", "echo").with_payload(payload))
        .await
        .unwrap();

    app.engine.start().unwrap();
    let job = app.wait_for_status(id, JobStatus::Failed).await;
    app.engine.stop().await.unwrap();

    assert!(
        job.error
            .unwrap()
            .contains("no handler registered for job type: echo")
    );
    assert_eq!(job.retry_count, 0);
}

#[tokio::test]
async fn test_cancel_only_affects_pending_jobs() {
    let app = TestEngine::new();
    app.engine.register(
        "echo",
        handler_fn(|_job| async { Ok::<(), JobExecutionError>(()) }),
    );

    let later = app
        .engine
        .enqueue(EnqueueRequest::new("default", "echo").run_in(Duration::from_secs(3600)))
        .await
        .unwrap();
    let ready = app
        .engine
        .enqueue(EnqueueRequest::new("default", "echo"))
        .await
        .unwrap();

    assert!(app.engine.cancel(later).await.unwrap());
    assert!(!app.engine.cancel(later).await.unwrap());

    app.engine.start().unwrap();
    app.wait_for_status(ready, JobStatus::Completed).await;
    app.engine.stop().await.unwrap();

    assert!(!app.engine.cancel(ready).await.unwrap());
    assert!(!app.engine.cancel(uuid::Uuid::new_v4()).await.unwrap());

    let cancelled = app.engine.get_job(later).await.unwrap().unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    let stats = app.engine.queue_stats("default").await.unwrap();
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn test_janitor_requeues_orphaned_running_job() {
    let mut config = fast_config();
    config.stale_job_timeout_seconds = Some(1);
    let app = TestEngine::with_config(config);
    app.engine.register(
        "export",
        handler_fn(|_job| async { Ok::<(), JobExecutionError>(()) }),
    );

    let id = app
        .engine
        .enqueue(EnqueueRequest::new("default", "export"))
        .await
        .unwrap();

    // A worker in another process claimed the job and died.
    let job = app.store.find_by_id(id).await.unwrap().unwrap();
    let started_at = Utc::now() - chrono::Duration::seconds(30);
    assert!(app.store.try_claim(id, job.version, started_at).await.unwrap());

    app.engine.start().unwrap();
    let job = app.wait_for_status(id, JobStatus::Completed).await;
    app.engine.stop().await.unwrap();

    assert_eq!(job.retry_count, 1);
    assert!(job.started_at.unwrap() > started_at);
}

#[tokio::test]
async fn test_orphaned_job_stays_running_without_janitor() {
    let app = TestEngine::new();
    app.engine.register(
        "export",
        handler_fn(|_job| async { Ok::<(), JobExecutionError>(()) }),
    );
    let id = app
        .engine
        .enqueue(EnqueueRequest::new("default", "export"))
        .await
        .unwrap();
    let job = app.store.find_by_id(id).await.unwrap().unwrap();
    let started_at = Utc::now() - chrono::Duration::hours(1);
    assert!(app.store.try_claim(id, job.version, started_at).await.unwrap());

    app.engine.start().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    app.engine.stop().await.unwrap();

    let job = app.engine.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Running);
}

#[tokio::test]
async fn test_stop_waits_for_in_flight_job() {
    let app = TestEngine::new();
    app.engine.register(
        "slow",
        handler_fn(|_job| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<(), JobExecutionError>(())
        }),
    );
    let id = app
        .engine
        .enqueue(EnqueueRequest::new("default", "slow"))
        .await
        .unwrap();

    app.engine.start().unwrap();
    app.wait_for_status(id, JobStatus::Running).await;
    app.engine.stop().await.unwrap();

    let job = app.engine.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(!app.engine.is_running());
}
