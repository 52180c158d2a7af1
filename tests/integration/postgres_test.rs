//! Store statements against a real PostgreSQL.
//!
//! Ignored by default. Run with
//! `JOBFORGE_TEST_DATABASE_URL=postgres://... cargo test -- --ignored`.
//! Every test uses its own queue or schedule name so they can share one
//! database.

use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use uuid::Uuid;

use jobforge_core::config::DatabaseConfig;
use jobforge_core::error::ErrorKind;
use jobforge_database::migration::run_migrations;
use jobforge_database::{DatabasePool, JobStore, ScheduleStore, Stores};
use jobforge_entity::{JobStatus, NewJob, UpsertScheduledJob};

const DATABASE_URL_VAR: &str = "JOBFORGE_TEST_DATABASE_URL";

async fn postgres_stores() -> Option<Stores> {
    let Ok(url) = std::env::var(DATABASE_URL_VAR) else {
        eprintln!("{DATABASE_URL_VAR} is not set, skipping");
        return None;
    };
    let config = DatabaseConfig {
        url,
        max_connections: 10,
        min_connections: 1,
        connect_timeout_seconds: 5,
        idle_timeout_seconds: 60,
        run_migrations: true,
    };
    let pool = DatabasePool::connect(&config).await.expect("connect");
    run_migrations(pool.pool()).await.expect("migrate");
    Some(Stores::postgres(pool.pool().clone()))
}

/// Postgres keeps microseconds; whole seconds compare equal after a round trip.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

fn new_job(queue: &str, max_retries: i32, key: Option<String>) -> NewJob {
    let now = now();
    NewJob {
        id: Uuid::new_v4(),
        queue_name: queue.to_string(),
        job_type: "export".to_string(),
        payload: r#"{"file":"a.csv"}"#.to_string(),
        priority: 0,
        max_retries,
        run_at: now - Duration::seconds(1),
        idempotency_key: key,
        now,
    }
}

fn unique_queue() -> String {
    format!("pg-{}", Uuid::new_v4())
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_pg_claim_is_version_gated() {
    let Some(stores) = postgres_stores().await else {
        return;
    };
    let queue = unique_queue();
    let job = stores.jobs.insert_job(&new_job(&queue, 3, None)).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.version, 1);

    let candidates = stores.jobs.select_candidates(&queue, now(), 10).await.unwrap();
    assert_eq!(candidates.len(), 1);

    assert!(stores.jobs.try_claim(job.id, job.version, now()).await.unwrap());
    assert!(!stores.jobs.try_claim(job.id, job.version, now()).await.unwrap());

    let claimed = stores.jobs.find_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(claimed.status, JobStatus::Running);
    assert_eq!(claimed.version, 2);
    assert!(claimed.started_at.is_some());
    assert!(stores.jobs.select_candidates(&queue, now(), 10).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_pg_concurrent_claims_have_one_winner() {
    let Some(stores) = postgres_stores().await else {
        return;
    };
    let queue = unique_queue();
    let job = stores.jobs.insert_job(&new_job(&queue, 3, None)).await.unwrap();

    let (id, version) = (job.id, job.version);
    let mut handles = Vec::new();
    for _ in 0..8 {
        let jobs = Arc::clone(&stores.jobs);
        handles.push(tokio::spawn(async move {
            jobs.try_claim(id, version, Utc::now()).await.unwrap()
        }));
    }
    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_pg_duplicate_idempotency_key_conflicts() {
    let Some(stores) = postgres_stores().await else {
        return;
    };
    let queue = unique_queue();
    let key = format!("{queue}:daily");
    let first = stores
        .jobs
        .insert_job(&new_job(&queue, 3, Some(key.clone())))
        .await
        .unwrap();

    let err = stores
        .jobs
        .insert_job(&new_job(&queue, 3, Some(key.clone())))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);
    assert_eq!(
        stores.jobs.find_id_by_idempotency_key(&key).await.unwrap(),
        Some(first.id)
    );
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_pg_stale_recovery_consumes_retries() {
    let Some(stores) = postgres_stores().await else {
        return;
    };
    let queue = unique_queue();
    let started_at = now() - Duration::minutes(30);
    let cutoff = now() - Duration::minutes(10);

    let retryable = stores.jobs.insert_job(&new_job(&queue, 1, None)).await.unwrap();
    let exhausted = stores.jobs.insert_job(&new_job(&queue, 0, None)).await.unwrap();
    for job in [&retryable, &exhausted] {
        assert!(stores.jobs.try_claim(job.id, job.version, started_at).await.unwrap());
    }

    let recovered = stores
        .jobs
        .requeue_stale(cutoff, "worker lost", now())
        .await
        .unwrap();
    assert!(recovered >= 2);

    let retryable = stores.jobs.find_by_id(retryable.id).await.unwrap().unwrap();
    assert_eq!(retryable.status, JobStatus::Pending);
    assert_eq!(retryable.retry_count, 1);
    assert!(retryable.started_at.is_none());
    assert_eq!(retryable.version, 3);

    let exhausted = stores.jobs.find_by_id(exhausted.id).await.unwrap().unwrap();
    assert_eq!(exhausted.status, JobStatus::Failed);
    assert_eq!(exhausted.retry_count, 0);
    assert!(exhausted.completed_at.is_some());
    assert_eq!(exhausted.error.as_deref(), Some("worker lost"));
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_pg_schedule_upsert_and_conditional_advance() {
    let Some(stores) = postgres_stores().await else {
        return;
    };
    let name = format!("pg-{}", Uuid::new_v4());
    let first_next = now() + Duration::minutes(1);
    let mut upsert = UpsertScheduledJob {
        id: Uuid::new_v4(),
        name: name.clone(),
        queue_name: "default".to_string(),
        job_type: "report".to_string(),
        payload: "{}".to_string(),
        cron_expr: "* * * * *".to_string(),
        enabled: true,
        next_run_at: first_next,
        now: now(),
    };
    let created = stores.schedules.upsert_scheduled_job(&upsert).await.unwrap();
    assert_eq!(created.next_run_at, first_next);

    // Same expression: the stored next run survives.
    upsert.id = Uuid::new_v4();
    upsert.next_run_at = first_next + Duration::hours(1);
    upsert.payload = r#"{"scope":"all"}"#.to_string();
    let updated = stores.schedules.upsert_scheduled_job(&upsert).await.unwrap();
    assert_eq!(updated.id, created.id);
    assert_eq!(updated.next_run_at, first_next);
    assert_eq!(updated.payload, r#"{"scope":"all"}"#);

    // Changed expression: the next run is recomputed.
    let changed_next = first_next + Duration::days(1);
    upsert.cron_expr = "0 3 * * *".to_string();
    upsert.next_run_at = changed_next;
    let changed = stores.schedules.upsert_scheduled_job(&upsert).await.unwrap();
    assert_eq!(changed.next_run_at, changed_next);

    let later = changed_next + Duration::days(1);
    assert!(
        !stores
            .schedules
            .advance_schedule_next_run(changed.id, first_next, later, now())
            .await
            .unwrap()
    );
    assert!(
        stores
            .schedules
            .advance_schedule_next_run(changed.id, changed_next, later, now())
            .await
            .unwrap()
    );
    let advanced = stores.schedules.find_scheduled_job(&name).await.unwrap().unwrap();
    assert_eq!(advanced.next_run_at, later);
    assert!(advanced.last_run_at.is_some());
}
