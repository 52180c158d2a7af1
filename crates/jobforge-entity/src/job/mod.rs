//! Job domain entities.

pub mod model;
pub mod payload;
pub mod status;

pub use model::{Job, NewJob};
pub use payload::Payload;
pub use status::JobStatus;
