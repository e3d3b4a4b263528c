//! The progress store abstraction.
//!
//! A `ProgressStore` is the single source of truth a poller consults for job
//! state, and the checkpoint log a resumed job reads to pick up where it left
//! off. Implementations must apply each mutation as one atomic update: no
//! reader may ever observe `outcomes.len() != last_processed_index`.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{DispatchOutcome, JobId, JobState, JobStatus};

/// Backing storage for per-job dispatch progress.
///
/// The dispatch job owning a `JobId` is the only writer for it; enforcement
/// of that exclusivity lives with the job registry, not here. Stores only
/// guarantee that each individual mutation is atomic and that snapshots are
/// consistent.
#[async_trait]
pub trait ProgressStore: Send + Sync + std::fmt::Debug {
    /// Insert the initial state for a new job.
    ///
    /// # Errors
    /// Returns `StoreError::AlreadyExists` if the job ID is already present.
    async fn create(&self, state: &JobState) -> Result<()>;

    /// Fetch a consistent snapshot of a job's state.
    ///
    /// # Errors
    /// Returns `StoreError::NotFound` if the job does not exist.
    async fn read(&self, id: &JobId) -> Result<JobState>;

    /// Mark a job as running and return its stored snapshot.
    ///
    /// This is the resume read: the returned `last_processed_index` tells the
    /// caller where to continue. The job-level error and any armed expiry are
    /// cleared, since the job is live again.
    ///
    /// # Errors
    /// Returns `StoreError::NotFound` if the job does not exist.
    async fn begin_processing(&self, id: &JobId) -> Result<JobState>;

    /// Record the outcome of one processed record as a single atomic update.
    ///
    /// `new_index` must be exactly one past the stored index.
    ///
    /// # Errors
    /// Returns `StoreError::NotFound` if the job does not exist, or a
    /// validation error for a non-contiguous checkpoint.
    async fn append_progress(
        &self,
        id: &JobId,
        new_index: usize,
        outcome: DispatchOutcome,
    ) -> Result<()>;

    /// Move a job into a terminal status, recording a job-level error if any.
    ///
    /// # Errors
    /// Returns `StoreError::NotFound` if the job does not exist.
    async fn set_terminal(&self, id: &JobId, status: JobStatus, error: Option<String>)
    -> Result<()>;

    /// Arm the retention deadline on a job.
    ///
    /// The job becomes eligible for `remove_expired` once the deadline
    /// passes.
    ///
    /// # Errors
    /// Returns `StoreError::NotFound` if the job does not exist.
    async fn expire_after(&self, id: &JobId, retention: Duration) -> Result<()>;

    /// List all job IDs, sorted by creation time (ULID order).
    ///
    /// # Errors
    /// Returns an error if the underlying storage cannot be enumerated.
    async fn list(&self) -> Result<Vec<JobId>>;

    /// Remove every job whose retention deadline has passed.
    ///
    /// Returns the IDs that were removed.
    ///
    /// # Errors
    /// Returns an error if the underlying storage cannot be enumerated.
    async fn remove_expired(&self) -> Result<Vec<JobId>>;
}

/// Milliseconds since the Unix epoch, for expiry arithmetic.
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Deadline `retention` from now, saturating on overflow.
pub(crate) fn deadline_after(retention: Duration) -> u64 {
    now_ms().saturating_add(u64::try_from(retention.as_millis()).unwrap_or(u64::MAX))
}
