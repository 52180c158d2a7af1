//! Job status enumeration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a job row.
///
/// `pending -> running -> completed | failed`, with `running -> pending`
/// on retry or release, and `pending -> cancelled` on operator request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for `run_at` and a worker claim.
    Pending,
    /// Claimed by exactly one worker.
    Running,
    /// Handler returned success.
    Completed,
    /// Terminal failure; never retried automatically.
    Failed,
    /// Withdrawn before it was claimed.
    Cancelled,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Return the status as its stored lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
