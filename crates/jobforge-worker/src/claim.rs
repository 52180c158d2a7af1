//! Optimistic claim protocol.
//!
//! Pollers read pending candidates together with their `version` and race
//! to move each one to `running` with a conditional update. The store
//! accepts exactly one update per version, so among any number of
//! competing pollers (in this process or others) at most one wins. A lost
//! race is not an error: the candidate is skipped until the next poll.

use chrono::{DateTime, Utc};

use jobforge_core::result::AppResult;
use jobforge_database::JobStore;
use jobforge_entity::{Job, JobStatus};

/// Pending, due jobs of `queue` in dispatch order, at most `limit` of them.
pub async fn fetch_candidates(
    store: &dyn JobStore,
    queue: &str,
    limit: usize,
    now: DateTime<Utc>,
) -> AppResult<Vec<Job>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    store.select_candidates(queue, now, limit).await
}

/// Attempt to claim `job` at the version it was read with.
///
/// On success the returned copy mirrors the row the store now holds:
/// status `running`, `started_at = now`, version incremented. `None` means
/// another worker or a concurrent state change won.
pub async fn try_claim(store: &dyn JobStore, mut job: Job, now: DateTime<Utc>) -> AppResult<Option<Job>> {
    if !store.try_claim(job.id, job.version, now).await? {
        tracing::trace!(job_id = %job.id, version = job.version, "Lost claim race");
        return Ok(None);
    }

    job.version += 1;
    job.status = JobStatus::Running;
    job.started_at = Some(now);
    job.updated_at = now;
    Ok(Some(job))
}
