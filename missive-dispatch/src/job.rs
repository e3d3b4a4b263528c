//! The dispatch job: one resumable run over one recipient batch.

use std::{sync::Arc, time::Duration};

use missive_common::job;
use missive_store::{DispatchOutcome, JobId, JobStatus, ProgressStore, StoreError};

use crate::{
    batch::RecipientBatch,
    error::{DispatchError, PersistenceError},
    registry::{JobRegistry, StopToken},
    transport::MailTransport,
};

/// Backoff between checkpoint write retries.
const CHECKPOINT_BACKOFF: Duration = Duration::from_millis(100);

/// A single run of a dispatch job over its recipient batch.
///
/// The job owns its transport session for the whole run and checkpoints after
/// every record, so the store is never more than one record behind reality. A
/// run resumes from whatever index the store holds, making resume after a
/// crash or stop idempotent: already-checkpointed records are never re-sent.
pub struct DispatchJob {
    job_id: JobId,
    batch: RecipientBatch,
    store: Arc<dyn ProgressStore>,
    registry: JobRegistry,
    stop: StopToken,
    inter_send_delay: Duration,
    checkpoint_attempts: u32,
    retention: Duration,
}

impl DispatchJob {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        job_id: JobId,
        batch: RecipientBatch,
        store: Arc<dyn ProgressStore>,
        registry: JobRegistry,
        stop: StopToken,
        inter_send_delay: Duration,
        checkpoint_attempts: u32,
        retention: Duration,
    ) -> Self {
        Self {
            job_id,
            batch,
            store,
            registry,
            stop,
            inter_send_delay,
            checkpoint_attempts,
            retention,
        }
    }

    /// Run the job to a terminal state.
    ///
    /// The transport is always closed and the job always leaves the live set,
    /// whatever happened in between. The terminal status and any job-level
    /// error land in the store before the registry entry drops, so a poller
    /// never sees a vanished-but-nonterminal job.
    pub async fn run<T: MailTransport>(self, mut transport: T) {
        let job_id = self.job_id;
        job!(
            level = INFO,
            "Job {job_id} starting over {} record(s)",
            self.batch.len()
        );

        let result = self.dispatch(&mut transport).await;
        transport.close().await;

        let (status, error) = match result {
            Ok(status) => (status, None),
            Err(e) => {
                tracing::error!("Job {job_id} failed: {e}");
                (JobStatus::Failed, Some(e.to_string()))
            }
        };

        if let Err(e) = self.store.set_terminal(&job_id, status, error).await {
            tracing::error!("Job {job_id}: failed to record terminal status: {e}");
        } else if let Err(e) = self.store.expire_after(&job_id, self.retention).await {
            tracing::error!("Job {job_id}: failed to arm retention deadline: {e}");
        }

        job!(level = INFO, "Job {job_id} finished as {status}");
        self.registry.unregister(&job_id);
    }

    /// The dispatch loop proper.
    ///
    /// Returns the terminal status for a run that ended cleanly; any error
    /// is fatal to the run and becomes the job-level error.
    async fn dispatch<T: MailTransport>(
        &self,
        transport: &mut T,
    ) -> Result<JobStatus, DispatchError> {
        let state = self.store.begin_processing(&self.job_id).await?;
        let start = state.last_processed_index;
        let total = self.batch.len();

        if state.total != total {
            tracing::warn!(
                "Job {}: stored total {} differs from supplied batch of {total}",
                self.job_id,
                state.total
            );
        }

        // Nothing left to do: no relay session is ever opened.
        if start >= total {
            return Ok(JobStatus::Completed);
        }

        if start > 0 {
            job!(
                level = INFO,
                "Job {} resuming at record {start} of {total}",
                self.job_id
            );
        }

        transport.connect().await?;

        let mut sent = state.successful();
        let mut failed = state.failed();

        for index in start..total {
            // Stop lands on the record boundary: the upcoming record is not
            // attempted and no outcome is appended for it.
            if self.stop.is_stop_requested() {
                job!(
                    level = INFO,
                    "Job {} stopping at record {index} of {total}",
                    self.job_id
                );
                return Ok(JobStatus::Stopped);
            }

            let Some(record) = self.batch.get(index) else {
                break;
            };

            let outcome = transport.send(record).await;
            match &outcome {
                DispatchOutcome::Success { recipient, .. } => {
                    sent += 1;
                    job!(
                        level = INFO,
                        "Job {}: record {index} sent to {recipient}",
                        self.job_id
                    );
                }
                DispatchOutcome::Failed { recipient, reason } => {
                    failed += 1;
                    tracing::warn!(
                        "Job {}: record {index} to {recipient} failed: {reason}",
                        self.job_id
                    );
                }
                DispatchOutcome::Stopped { .. } => {}
            }

            self.checkpoint(index + 1, outcome).await?;

            // Pace the relay between records, keeping the idle session warm.
            // Skipped after the last record and once a stop is pending.
            if index + 1 < total && !self.stop.is_stop_requested() {
                transport.keep_alive().await;
                tokio::time::sleep(self.inter_send_delay).await;
            }
        }

        job!(
            level = INFO,
            "Job {} completed: {sent} sent, {failed} failed",
            self.job_id
        );
        Ok(JobStatus::Completed)
    }

    /// Write one checkpoint, retrying transient store failures.
    ///
    /// Validation failures (an out-of-order index) are not transient and
    /// escalate immediately.
    async fn checkpoint(
        &self,
        new_index: usize,
        outcome: DispatchOutcome,
    ) -> Result<(), DispatchError> {
        let mut last_error = None;

        for attempt in 1..=self.checkpoint_attempts {
            match self
                .store
                .append_progress(&self.job_id, new_index, outcome.clone())
                .await
            {
                Ok(()) => return Ok(()),
                Err(e @ StoreError::Validation(_)) => return Err(DispatchError::Store(e)),
                Err(e) => {
                    tracing::warn!(
                        "Job {}: checkpoint {new_index} attempt {attempt}/{} failed: {e}",
                        self.job_id,
                        self.checkpoint_attempts
                    );
                    last_error = Some(e);
                    if attempt < self.checkpoint_attempts {
                        tokio::time::sleep(CHECKPOINT_BACKOFF).await;
                    }
                }
            }
        }

        let source = last_error
            .unwrap_or_else(|| StoreError::Internal("checkpoint retry never attempted".into()));
        Err(PersistenceError::CheckpointFailed {
            attempts: self.checkpoint_attempts,
            source,
        }
        .into())
    }
}
