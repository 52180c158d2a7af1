//! Recurring job definitions.

pub mod model;

pub use model::{ScheduledJob, UpsertScheduledJob};
