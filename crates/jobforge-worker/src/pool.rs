//! Worker pool: one poller and `concurrency` workers per queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{self, MissedTickBehavior};
use tracing;

use jobforge_core::config::EngineConfig;
use jobforge_core::result::AppResult;
use jobforge_entity::{Job, JobStatus};

use crate::executor::{JobExecutionError, JobExecutor};
use crate::metrics::MetricsAggregator;
use crate::queue::JobQueue;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::shutdown;

type SharedReceiver = Arc<Mutex<mpsc::Receiver<Job>>>;

/// Serves one queue.
///
/// The poller claims due jobs into a bounded channel holding at most
/// `2 × concurrency` jobs; workers pull from it, execute and record the
/// outcome. Pools of different queues share nothing but the store.
pub struct WorkerPool {
    queue_name: String,
    concurrency: usize,
    poll_interval: Duration,
    retry: RetryPolicy,
    queue: Arc<JobQueue>,
    executor: Arc<JobExecutor>,
    metrics: Arc<MetricsAggregator>,
}

impl WorkerPool {
    pub fn new(
        queue_name: impl Into<String>,
        concurrency: usize,
        config: &EngineConfig,
        queue: Arc<JobQueue>,
        executor: Arc<JobExecutor>,
        metrics: Arc<MetricsAggregator>,
    ) -> Self {
        Self {
            queue_name: queue_name.into(),
            concurrency: concurrency.max(1),
            poll_interval: config.poll_interval(),
            retry: RetryPolicy::from_config(config),
            queue,
            executor,
            metrics,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    fn buffer_size(&self) -> usize {
        self.concurrency.saturating_mul(2)
    }

    /// Run until shutdown is signalled. Jobs still buffered at that point
    /// go back to pending; in-flight executions finish first.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let pool = Arc::new(self);
        let (tx, rx) = mpsc::channel::<Job>(pool.buffer_size());
        let rx: SharedReceiver = Arc::new(Mutex::new(rx));

        tracing::info!(
            queue = %pool.queue_name,
            concurrency = pool.concurrency,
            poll_interval_ms = pool.poll_interval.as_millis() as u64,
            "Worker pool started"
        );

        let mut workers = JoinSet::new();
        for worker in 0..pool.concurrency {
            let pool = Arc::clone(&pool);
            let rx = Arc::clone(&rx);
            let shutdown = shutdown.clone();
            workers.spawn(async move { pool.work(worker, rx, shutdown).await });
        }

        pool.poll(&tx, shutdown).await;
        drop(tx);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(queue = %pool.queue_name, error = %e, "Worker task failed");
            }
        }

        let mut rx = rx.lock().await;
        rx.close();
        let mut released = 0usize;
        while let Ok(job) = rx.try_recv() {
            pool.release(&job).await;
            released += 1;
        }

        tracing::info!(
            queue = %pool.queue_name,
            released,
            "Worker pool stopped"
        );
    }

    async fn poll(&self, tx: &mpsc::Sender<Job>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown::requested(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }

            match self.poll_once(tx).await {
                Ok(0) => tracing::trace!(queue = %self.queue_name, "No jobs dispatched"),
                Ok(dispatched) => {
                    tracing::debug!(queue = %self.queue_name, dispatched, "Dispatched jobs")
                }
                Err(e) => {
                    tracing::error!(queue = %self.queue_name, error = %e, "Polling failed")
                }
            }
        }
    }

    /// Claim due jobs into `tx` while it has room; returns how many were
    /// handed to workers.
    pub(crate) async fn poll_once(&self, tx: &mpsc::Sender<Job>) -> AppResult<usize> {
        if tx.capacity() == 0 {
            tracing::trace!(queue = %self.queue_name, "All worker slots occupied");
            return Ok(0);
        }

        let now = Utc::now();
        let candidates = self
            .queue
            .candidates(&self.queue_name, self.buffer_size(), now)
            .await?;

        let mut dispatched = 0;
        for candidate in candidates {
            if tx.capacity() == 0 {
                break;
            }
            let job_id = candidate.id;
            let job = match self.queue.claim(candidate, now).await {
                Ok(Some(job)) => job,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Claim failed, skipping job");
                    continue;
                }
            };
            if self.dispatch(tx, job).await {
                dispatched += 1;
            }
        }
        Ok(dispatched)
    }

    /// Push a claimed job to the workers, releasing it when the channel
    /// cannot take it.
    pub(crate) async fn dispatch(&self, tx: &mpsc::Sender<Job>, job: Job) -> bool {
        match tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) | Err(TrySendError::Closed(job)) => {
                tracing::debug!(job_id = %job.id, "Worker channel unavailable, releasing job");
                self.release(&job).await;
                false
            }
        }
    }

    async fn release(&self, job: &Job) {
        if let Err(e) = self.queue.release(job).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to release job");
        }
    }

    async fn work(&self, worker: usize, rx: SharedReceiver, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!(queue = %self.queue_name, worker, "Worker started");

        loop {
            let job = tokio::select! {
                biased;
                _ = shutdown::requested(&mut shutdown) => break,
                job = async { rx.lock().await.recv().await } => job,
            };
            match job {
                Some(job) => self.process(job).await,
                None => break,
            }
        }

        tracing::debug!(queue = %self.queue_name, worker, "Worker stopped");
    }

    /// Execute one claimed job and write its outcome.
    pub(crate) async fn process(&self, job: Job) {
        tracing::info!(
            job_id = %job.id,
            queue = %job.queue_name,
            job_type = %job.job_type,
            attempt = job.retry_count + 1,
            "Processing job"
        );

        let started = Instant::now();
        let result = self.executor.execute(&job).await;
        let elapsed = started.elapsed();

        let status = if result.is_ok() {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        self.metrics.record(&job, status, elapsed).await;

        let now = Utc::now();
        let outcome = match result {
            Ok(()) => {
                tracing::info!(
                    job_id = %job.id,
                    duration_ms = elapsed.as_millis() as u64,
                    "Job completed"
                );
                self.queue.complete(&job, now).await
            }
            Err(err) => self.handle_failure(&job, err, now).await,
        };

        if let Err(e) = outcome {
            tracing::error!(job_id = %job.id, error = %e, "Failed to record job outcome");
        }
    }

    async fn handle_failure(
        &self,
        job: &Job,
        err: JobExecutionError,
        now: chrono::DateTime<Utc>,
    ) -> AppResult<bool> {
        let message = err.to_string();

        if !err.is_retryable() {
            tracing::error!(job_id = %job.id, error = %message, "Job failed permanently");
            return self.queue.fail(job, &message, now).await;
        }

        match self.retry.decide(job, now) {
            RetryDecision::Retry { run_at } => {
                tracing::warn!(
                    job_id = %job.id,
                    error = %message,
                    retry = job.retry_count + 1,
                    max_retries = job.max_retries,
                    %run_at,
                    "Job failed, retry scheduled"
                );
                self.queue.retry(job, run_at, &message, now).await
            }
            RetryDecision::Exhausted => {
                tracing::error!(
                    job_id = %job.id,
                    error = %message,
                    retries = job.retry_count,
                    "Job failed, retries exhausted"
                );
                self.queue.fail(job, &message, now).await
            }
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("queue_name", &self.queue_name)
            .field("concurrency", &self.concurrency)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}
