//! Integration tests for the optimistic claim protocol.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use jobforge_database::{JobStore, MemoryStore, Stores};
use jobforge_entity::{Job, JobStatus, NewJob};
use jobforge_worker::{EnqueueRequest, JobEngine, JobExecutionError, JobHandler, claim};

use crate::helpers;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_at_most_one_claim_per_version() {
    let store = Arc::new(MemoryStore::new());
    let now = Utc::now();
    let job = store
        .insert_job(&NewJob {
            id: Uuid::new_v4(),
            queue_name: "default".to_string(),
            job_type: "echo".to_string(),
            payload: "{}".to_string(),
            priority: 0,
            max_retries: 3,
            run_at: now,
            idempotency_key: None,
            now,
        })
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..32 {
        let store = Arc::clone(&store);
        let job = job.clone();
        handles.push(tokio::spawn(async move {
            claim::try_claim(store.as_ref(), job, Utc::now()).await.unwrap()
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        if let Some(job) = handle.await.unwrap() {
            winners.push(job);
        }
    }

    assert_eq!(winners.len(), 1);
    let stored = store.find_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Running);
    assert_eq!(stored.version, job.version + 1);
    assert_eq!(winners[0].version, stored.version);
}

/// Counts executions per job id.
#[derive(Default)]
struct CountingHandler {
    runs: Mutex<HashMap<Uuid, usize>>,
}

#[async_trait]
impl JobHandler for CountingHandler {
    async fn execute(&self, job: &Job) -> Result<(), JobExecutionError> {
        *self.runs.lock().unwrap().entry(job.id).or_default() += 1;
        tokio::task::yield_now().await;
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_engines_sharing_a_store_run_each_job_once() {
    let store = MemoryStore::new();
    let handler = Arc::new(CountingHandler::default());

    let engines: Vec<JobEngine> = (0..3)
        .map(|_| {
            let engine =
                JobEngine::new(Stores::from_memory(store.clone()), helpers::fast_config()).unwrap();
            engine.register("count", handler.clone());
            engine
        })
        .collect();

    let mut ids = Vec::new();
    for i in 0..60 {
        let id = engines[i % engines.len()]
            .enqueue(EnqueueRequest::new("default", "count"))
            .await
            .unwrap();
        ids.push(id);
    }

    for engine in &engines {
        engine.start().unwrap();
    }

    let observer = helpers::TestEngine {
        engine: JobEngine::new(Stores::from_memory(store.clone()), helpers::fast_config())
            .unwrap(),
        store: store.clone(),
    };
    let jobs = observer.wait_all_terminal(&ids).await;

    for engine in &engines {
        engine.stop().await.unwrap();
    }

    assert!(jobs.iter().all(|job| job.status == JobStatus::Completed));
    let runs = handler.runs.lock().unwrap();
    assert_eq!(runs.len(), 60);
    assert!(runs.values().all(|&count| count == 1));
}
