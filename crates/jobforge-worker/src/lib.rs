//! Job execution for JobForge.
//!
//! This crate provides:
//! - [`JobEngine`], the owner object applications construct at startup
//! - Worker pools that claim jobs with optimistic concurrency and run them
//! - Capped exponential retry backoff
//! - A cron scheduler that turns recurring definitions into jobs
//! - RED metrics per queue and job type
//! - An optional janitor for jobs orphaned by crashed workers

pub mod claim;
pub mod cron;
pub mod engine;
pub mod executor;
pub mod janitor;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod retry;
pub mod scheduler;
mod shutdown;

pub use cron::CronExpr;
pub use engine::JobEngine;
pub use executor::{JobExecutionError, JobExecutor, JobHandler, handler_fn};
pub use metrics::RedMetrics;
pub use queue::{EnqueueRequest, JobQueue, QueueStats};
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::{CronScheduler, ScheduleRequest};
