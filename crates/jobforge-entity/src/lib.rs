//! # jobforge-entity
//!
//! Row models for the job engine. Every struct in this crate maps a row of
//! `jobs`, `scheduled_jobs` or `job_metrics`, or the data needed to create
//! one. Persisted rows additionally derive `sqlx::FromRow`.

pub mod job;
pub mod metric;
pub mod schedule;

pub use job::{Job, JobStatus, NewJob, Payload};
pub use metric::{JobMetric, NewJobMetric};
pub use schedule::{ScheduledJob, UpsertScheduledJob};
