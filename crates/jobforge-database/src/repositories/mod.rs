//! PostgreSQL repositories, one per table.

pub mod job;
pub mod metric;
pub mod scheduled_job;

pub use job::PgJobRepository;
pub use metric::PgJobMetricRepository;
pub use scheduled_job::PgScheduledJobRepository;
