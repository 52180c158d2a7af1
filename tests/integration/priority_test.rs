//! Integration tests for dispatch order within a queue.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use jobforge_entity::Job;
use jobforge_worker::{EnqueueRequest, JobExecutionError, JobHandler};

use crate::helpers::{TestEngine, single_worker_config};

/// Records the priority and enqueue order of every executed job.
#[derive(Default)]
struct OrderRecorder {
    order: Mutex<Vec<(i32, String)>>,
}

#[async_trait]
impl JobHandler for OrderRecorder {
    async fn execute(&self, job: &Job) -> Result<(), JobExecutionError> {
        let label = job.payload_as::<serde_json::Value>()?["label"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        self.order.lock().unwrap().push((job.priority, label));
        Ok(())
    }
}

fn labelled(priority: i32, label: &str) -> EnqueueRequest {
    let mut payload = jobforge_entity::Payload::new();
    payload.insert("label".to_string(), serde_json::json!(label));
    EnqueueRequest::new("default", "record")
        .with_payload(payload)
        .with_priority(priority)
}

#[tokio::test]
async fn test_single_worker_runs_highest_priority_first() {
    let app = TestEngine::with_config(single_worker_config());
    let recorder = Arc::new(OrderRecorder::default());
    app.engine.register("record", recorder.clone());

    let mut ids = Vec::new();
    for priority in [5, 1, 3] {
        ids.push(
            app.engine
                .enqueue(labelled(priority, &format!("p{priority}")))
                .await
                .unwrap(),
        );
    }

    app.engine.start().unwrap();
    app.wait_all_terminal(&ids).await;
    app.engine.stop().await.unwrap();

    let priorities: Vec<i32> = recorder.order.lock().unwrap().iter().map(|(p, _)| *p).collect();
    assert_eq!(priorities, vec![5, 3, 1]);
}

#[tokio::test]
async fn test_equal_priority_runs_earliest_run_at_first() {
    let app = TestEngine::with_config(single_worker_config());
    let recorder = Arc::new(OrderRecorder::default());
    app.engine.register("record", recorder.clone());

    let now = Utc::now();
    let mut ids = Vec::new();
    for (label, age_seconds) in [("newer", 10), ("oldest", 30), ("older", 20)] {
        ids.push(
            app.engine
                .enqueue(labelled(0, label).run_at(now - chrono::Duration::seconds(age_seconds)))
                .await
                .unwrap(),
        );
    }

    app.engine.start().unwrap();
    app.wait_all_terminal(&ids).await;
    app.engine.stop().await.unwrap();

    let labels: Vec<String> = recorder
        .order
        .lock()
        .unwrap()
        .iter()
        .map(|(_, label)| label.clone())
        .collect();
    assert_eq!(labels, vec!["oldest", "older", "newer"]);
}
