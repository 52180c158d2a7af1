//! Integration tests for RED metrics.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use jobforge_entity::{Job, JobStatus, Payload};
use jobforge_worker::{EnqueueRequest, JobExecutionError, JobHandler};

use crate::helpers::TestEngine;

#[derive(Deserialize)]
struct Work {
    fail: bool,
}

struct SometimesFails;

#[async_trait]
impl JobHandler for SometimesFails {
    async fn execute(&self, job: &Job) -> Result<(), JobExecutionError> {
        let work: Work = job.payload_as()?;
        if work.fail {
            return Err(JobExecutionError::permanent("asked to fail"));
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_error_rate_over_ten_jobs() {
    let app = TestEngine::new();
    app.engine.register("resize", Arc::new(SometimesFails));

    let mut ids = Vec::new();
    for i in 0..10 {
        let mut payload = Payload::new();
        payload.insert("fail".to_string(), json!(i < 2));
        ids.push(
            app.engine
                .enqueue(EnqueueRequest::new("default", "resize").with_payload(payload))
                .await
                .unwrap(),
        );
    }

    app.engine.start().unwrap();
    let jobs = app.wait_all_terminal(&ids).await;
    app.engine.stop().await.unwrap();

    assert_eq!(
        jobs.iter().filter(|j| j.status == JobStatus::Failed).count(),
        2
    );

    let metrics = app.engine.get_metrics("default", "resize").await.unwrap();
    assert_eq!(metrics.total_jobs, 10);
    assert_eq!(metrics.completed_jobs, 8);
    assert_eq!(metrics.failed_jobs, 2);
    assert!((metrics.error_rate - 20.0).abs() < 1e-9);
    assert_eq!(metrics.window_seconds, 3600);
    assert!(metrics.jobs_per_second > 0.0);
    assert!(metrics.p50_ms <= metrics.p95_ms && metrics.p95_ms <= metrics.p99_ms);
}

#[tokio::test]
async fn test_metrics_are_scoped_by_queue_and_type() {
    let app = TestEngine::new();
    app.engine.register("resize", Arc::new(SometimesFails));

    let mut payload = Payload::new();
    payload.insert("fail".to_string(), json!(false));
    let id = app
        .engine
        .enqueue(EnqueueRequest::new("default", "resize").with_payload(payload))
        .await
        .unwrap();

    app.engine.start().unwrap();
    app.wait_for_status(id, JobStatus::Completed).await;
    app.engine.stop().await.unwrap();

    let other_queue = app.engine.get_metrics("images", "resize").await.unwrap();
    assert_eq!(other_queue.total_jobs, 0);
    assert_eq!(other_queue.error_rate, 0.0);

    let other_type = app.engine.get_metrics("default", "thumbnail").await.unwrap();
    assert_eq!(other_type.total_jobs, 0);
}
