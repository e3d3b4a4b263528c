//! Live-job bookkeeping: which jobs are running right now, and the stop
//! signal for each.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use missive_common::internal;
use missive_store::JobId;

/// Cooperative stop signal for one running job.
///
/// One-way: once raised it never resets. The dispatch loop polls it at record
/// boundaries, so a raised token stops the job after the in-flight record
/// finishes, never mid-send.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the stop flag. Idempotent.
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Registry entry for a running job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub job_id: JobId,
    pub stop: StopToken,
    pub registered_at: DateTime<Utc>,
}

/// Tracks every job currently running in this process.
///
/// A job is registered before its task spawns and unregistered when its run
/// finishes, whatever the terminal status. Registration is first-writer-wins:
/// a second registration for a live job id is refused, which is what makes
/// concurrent resume attempts safe.
///
/// Cheaply cloneable; all clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<DashMap<JobId, JobHandle>>,
}

impl JobRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job as live, returning its fresh stop token.
    ///
    /// Returns `None` if the job is already registered; the caller must treat
    /// that as "refuse to start a second runner".
    #[must_use]
    pub fn register(&self, job_id: JobId) -> Option<StopToken> {
        match self.jobs.entry(job_id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(entry) => {
                let handle = JobHandle {
                    job_id,
                    stop: StopToken::new(),
                    registered_at: Utc::now(),
                };
                let token = handle.stop.clone();
                entry.insert(handle);
                Some(token)
            }
        }
    }

    /// Remove a job from the live set. Idempotent.
    pub fn unregister(&self, job_id: &JobId) {
        self.jobs.remove(job_id);
    }

    /// Raise the stop flag on a live job.
    ///
    /// Returns `false` when the job is not live, so callers can distinguish
    /// "signal delivered" from "nothing to stop".
    pub fn request_stop(&self, job_id: &JobId) -> bool {
        self.jobs.get(job_id).is_some_and(|handle| {
            internal!(level = INFO, "Stop requested for job {job_id}");
            handle.stop.request_stop();
            true
        })
    }

    /// Raise the stop flag on every live job. Returns how many were signaled.
    pub fn stop_all(&self) -> usize {
        let mut signaled = 0;
        for handle in self.jobs.iter() {
            handle.stop.request_stop();
            signaled += 1;
        }
        signaled
    }

    #[must_use]
    pub fn is_live(&self, job_id: &JobId) -> bool {
        self.jobs.contains_key(job_id)
    }

    /// Snapshot of the currently live job handles.
    #[must_use]
    pub fn live_jobs(&self) -> Vec<JobHandle> {
        self.jobs.iter().map(|entry| entry.value().clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
