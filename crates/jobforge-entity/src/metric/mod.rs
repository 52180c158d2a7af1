//! Per-execution metrics.

pub mod model;

pub use model::{JobMetric, NewJobMetric};
