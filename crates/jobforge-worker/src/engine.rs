//! The job engine: single owner of handlers, pools and background loops.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::join_all;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use jobforge_core::config::EngineConfig;
use jobforge_core::error::AppError;
use jobforge_core::result::AppResult;
use jobforge_database::Stores;
use jobforge_entity::{Job, ScheduledJob};

use crate::executor::{JobExecutor, JobHandler};
use crate::janitor::StaleJobJanitor;
use crate::metrics::{MetricsAggregator, RedMetrics};
use crate::pool::WorkerPool;
use crate::queue::{EnqueueRequest, JobQueue, QueueStats};
use crate::scheduler::{CronScheduler, ScheduleRequest};

/// Shutdown sender and tasks of a started engine.
struct Running {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Persistent job queue and scheduler.
///
/// Construct once at startup, register handlers, then [`start`] it. Any
/// number of engines may share one store; they coordinate only through the
/// store's conditional updates.
///
/// [`start`]: JobEngine::start
pub struct JobEngine {
    stores: Stores,
    config: EngineConfig,
    executor: Arc<JobExecutor>,
    queue: Arc<JobQueue>,
    scheduler: Arc<CronScheduler>,
    metrics: Arc<MetricsAggregator>,
    running: Mutex<Option<Running>>,
}

impl JobEngine {
    pub fn new(stores: Stores, config: EngineConfig) -> AppResult<Self> {
        config.validate()?;

        let queue = Arc::new(JobQueue::new(
            Arc::clone(&stores.jobs),
            config.default_max_retries,
        ));
        let scheduler = Arc::new(CronScheduler::new(
            Arc::clone(&stores.schedules),
            Arc::clone(&queue),
            &config,
        ));
        let metrics = Arc::new(MetricsAggregator::new(Arc::clone(&stores.metrics), &config));

        Ok(Self {
            stores,
            config,
            executor: Arc::new(JobExecutor::new()),
            queue,
            scheduler,
            metrics,
            running: Mutex::new(None),
        })
    }

    /// Register the handler of `job_type`, replacing any previous one. May
    /// be called while the engine runs.
    pub fn register(&self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.executor.register(job_type, handler);
    }

    /// Enqueue a job and return its id. A reused idempotency key returns
    /// the id of the job created first.
    pub async fn enqueue(&self, request: EnqueueRequest) -> AppResult<Uuid> {
        self.queue.enqueue(request).await
    }

    /// Create or update a recurring job by name.
    pub async fn schedule(&self, request: ScheduleRequest) -> AppResult<ScheduledJob> {
        self.scheduler.upsert(request).await
    }

    /// Spawn one worker pool per configured queue plus the scheduler, the
    /// metrics pruner and, when configured, the stale job janitor.
    ///
    /// Must be called from within a Tokio runtime. Fails if already running.
    pub fn start(&self) -> AppResult<()> {
        let runtime = Handle::try_current()
            .map_err(|e| AppError::lifecycle(format!("no Tokio runtime to start on: {e}")))?;

        let mut running = self.running_guard()?;
        if running.is_some() {
            return Err(AppError::lifecycle("job engine is already running"));
        }

        let (shutdown, signal) = watch::channel(false);
        let mut tasks = Vec::new();

        let mut queues: Vec<(&String, &usize)> = self.config.worker_concurrency.iter().collect();
        queues.sort();
        for (queue_name, concurrency) in queues {
            let pool = WorkerPool::new(
                queue_name.clone(),
                *concurrency,
                &self.config,
                Arc::clone(&self.queue),
                Arc::clone(&self.executor),
                Arc::clone(&self.metrics),
            );
            tasks.push(runtime.spawn(pool.run(signal.clone())));
        }

        if self.config.scheduler_enabled {
            tasks.push(runtime.spawn(Arc::clone(&self.scheduler).run(signal.clone())));
        }

        tasks.push(runtime.spawn(Arc::clone(&self.metrics).run_pruner(signal.clone())));

        if let Some(timeout) = self.config.stale_job_timeout() {
            let janitor = Arc::new(StaleJobJanitor::new(Arc::clone(&self.stores.jobs), timeout));
            tasks.push(runtime.spawn(janitor.run(signal.clone())));
        }

        tracing::info!(
            queues = self.config.worker_concurrency.len(),
            scheduler = self.config.scheduler_enabled,
            janitor = self.config.stale_job_timeout_seconds.is_some(),
            "Job engine started"
        );

        *running = Some(Running { shutdown, tasks });
        Ok(())
    }

    /// Signal shutdown and wait for pools and loops to exit. In-flight
    /// executions may finish within the shutdown timeout; whatever is still
    /// running after it is aborted. Stopping a stopped engine is a no-op.
    pub async fn stop(&self) -> AppResult<()> {
        let running = self.running_guard()?.take();
        let Some(Running { shutdown, tasks }) = running else {
            return Ok(());
        };

        tracing::info!(tasks = tasks.len(), "Job engine stopping");
        // Receivers treat a dropped sender as shutdown too.
        let _ = shutdown.send(true);

        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        match tokio::time::timeout(self.config.shutdown_timeout(), join_all(tasks)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Engine task ended abnormally");
                    }
                }
                tracing::info!("Job engine stopped");
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.config.shutdown_timeout_ms,
                    "Shutdown timed out, aborting remaining tasks"
                );
                for abort in aborts {
                    abort.abort();
                }
            }
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .map(|running| running.is_some())
            .unwrap_or(false)
    }

    /// RED metrics of `job_type` on `queue_name` over the configured window.
    pub async fn get_metrics(&self, queue_name: &str, job_type: &str) -> AppResult<RedMetrics> {
        self.metrics.get_metrics(queue_name, job_type).await
    }

    pub async fn get_job(&self, id: Uuid) -> AppResult<Option<Job>> {
        self.queue.find(id).await
    }

    /// Cancel a job that has not been claimed; `false` once a worker owns it
    /// or it already finished.
    pub async fn cancel(&self, id: Uuid) -> AppResult<bool> {
        self.queue.cancel(id).await
    }

    pub async fn queue_stats(&self, queue_name: &str) -> AppResult<QueueStats> {
        self.queue.stats(queue_name).await
    }

    pub fn scheduler(&self) -> &CronScheduler {
        &self.scheduler
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn running_guard(&self) -> AppResult<MutexGuard<'_, Option<Running>>> {
        self.running
            .lock()
            .map_err(|_| AppError::internal("engine state lock poisoned"))
    }
}

impl std::fmt::Debug for JobEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobEngine")
            .field("queues", &self.config.worker_concurrency)
            .field("job_types", &self.executor.registered_types())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
