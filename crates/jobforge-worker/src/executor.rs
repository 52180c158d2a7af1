//! Job executor: handler registry and dispatch.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use futures::FutureExt;
use tracing;

use jobforge_core::error::AppError;
use jobforge_entity::Job;

/// Code that performs the work of one job type.
///
/// Claims are at-most-once but a crash mid-execution can make a job run
/// again, so implementations must be safe to re-run.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Execute the job. The payload is available through
    /// [`Job::payload_map`] and [`Job::payload_as`].
    async fn execute(&self, job: &Job) -> Result<(), JobExecutionError>;
}

/// Error from job execution
#[derive(Debug, thiserror::Error)]
pub enum JobExecutionError {
    /// Permanent failure; do not retry.
    #[error("{0}")]
    Permanent(String),

    /// Transient failure; retried with backoff while retries remain.
    #[error("{0}")]
    Transient(String),

    /// Internal error raised by a collaborator; treated as transient.
    #[error("{0}")]
    Internal(#[from] AppError),

    /// The handler panicked; caught at the worker boundary.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl JobExecutionError {
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Whether the retry policy applies to this failure.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Permanent(_))
    }
}

impl From<serde_json::Error> for JobExecutionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Permanent(format!("invalid payload: {err}"))
    }
}

/// Adapter turning an async closure into a [`JobHandler`].
pub struct HandlerFn<F>(F);

#[async_trait]
impl<F, Fut> JobHandler for HandlerFn<F>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobExecutionError>> + Send + 'static,
{
    async fn execute(&self, job: &Job) -> Result<(), JobExecutionError> {
        (self.0)(job.clone()).await
    }
}

/// Wrap an async closure as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn JobHandler>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobExecutionError>> + Send + 'static,
{
    Arc::new(HandlerFn(f))
}

/// Dispatches jobs to the handler registered for their `job_type`.
///
/// The registry is read on every execution and written rarely, so it sits
/// behind a read-write lock; handlers may be registered while pools run.
#[derive(Default)]
pub struct JobExecutor {
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
}

impl JobExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for a job type.
    pub fn register(&self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        let job_type = job_type.into();
        tracing::info!("Registered job handler for type '{}'", job_type);
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_type, handler);
    }

    fn handler(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_type)
            .cloned()
    }

    /// Check if a handler is registered for a job type
    pub fn has_handler(&self, job_type: &str) -> bool {
        self.handler(job_type).is_some()
    }

    /// Registered job types, sorted.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }

    /// Execute a job by dispatching to its handler.
    ///
    /// A missing handler or an undecodable payload is a permanent failure.
    /// A panic inside the handler is caught and reported as
    /// [`JobExecutionError::Panicked`].
    pub async fn execute(&self, job: &Job) -> Result<(), JobExecutionError> {
        let handler = self.handler(&job.job_type).ok_or_else(|| {
            JobExecutionError::Permanent(format!(
                "no handler registered for job type: {}",
                job.job_type
            ))
        })?;

        job.payload_map()?;

        tracing::debug!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.retry_count + 1,
            "Executing job"
        );

        match AssertUnwindSafe(handler.execute(job)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(JobExecutionError::Panicked(panic_message(panic.as_ref()))),
        }
    }
}

impl std::fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobExecutor")
            .field("job_types", &self.registered_types())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
