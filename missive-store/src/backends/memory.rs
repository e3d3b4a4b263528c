use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    StoreError,
    error::Result,
    store::{ProgressStore, deadline_after, now_ms},
    types::{DispatchOutcome, JobId, JobState, JobStatus},
};

/// In-memory progress store implementation
///
/// This implementation stores job state in a `HashMap` protected by an
/// `RwLock`. It's primarily intended for testing, but is also usable for
/// deployments that accept losing resume checkpoints on restart.
///
/// # Capacity Management
/// The store can be configured with a maximum capacity to prevent unbounded
/// memory growth. When capacity is reached, `create` fails with an error.
///
/// # Concurrency
/// Uses an `RwLock` for interior mutability. Each mutation takes the write
/// lock for the whole update, so readers always observe a consistent
/// snapshot.
#[derive(Debug, Clone)]
pub struct MemoryProgressStore {
    pub(crate) jobs: Arc<RwLock<HashMap<JobId, JobState>>>,
    /// Maximum number of jobs to track (None = unlimited)
    capacity: Option<usize>,
}

impl MemoryProgressStore {
    /// Create a new empty memory-backed store with unlimited capacity
    #[must_use]
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            capacity: None,
        }
    }

    /// Create a new memory-backed store with a capacity limit
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            capacity: Some(capacity),
        }
    }

    /// Get the current number of tracked jobs
    ///
    /// Recovers gracefully if the lock is poisoned by accessing the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Check if the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the configured capacity (None = unlimited)
    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

impl Default for MemoryProgressStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn create(&self, state: &JobState) -> Result<()> {
        let mut jobs = self.jobs.write()?;

        if jobs.contains_key(&state.job_id) {
            return Err(StoreError::AlreadyExists(state.job_id.clone()));
        }

        if let Some(cap) = self.capacity
            && jobs.len() >= cap
        {
            return Err(StoreError::Internal(format!(
                "Job store capacity exceeded: {}/{cap} jobs",
                jobs.len()
            )));
        }

        jobs.insert(state.job_id.clone(), state.clone());

        Ok(())
    }

    async fn read(&self, id: &JobId) -> Result<JobState> {
        self.jobs
            .read()?
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn begin_processing(&self, id: &JobId) -> Result<JobState> {
        let mut jobs = self.jobs.write()?;
        let state = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        state.status = JobStatus::Processing;
        state.error = None;
        state.expires_at = None;

        Ok(state.clone())
    }

    async fn append_progress(
        &self,
        id: &JobId,
        new_index: usize,
        outcome: DispatchOutcome,
    ) -> Result<()> {
        let mut jobs = self.jobs.write()?;
        let state = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        state.apply_progress(new_index, outcome)
    }

    async fn set_terminal(
        &self,
        id: &JobId,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<()> {
        let mut jobs = self.jobs.write()?;
        let state = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        state.status = status;
        state.error = error;

        Ok(())
    }

    async fn expire_after(&self, id: &JobId, retention: Duration) -> Result<()> {
        let deadline = deadline_after(retention);

        let mut jobs = self.jobs.write()?;
        let state = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        state.expires_at = Some(deadline);

        Ok(())
    }

    async fn list(&self) -> Result<Vec<JobId>> {
        let mut ids: Vec<_> = self.jobs.read()?.keys().cloned().collect();

        // ULIDs are lexicographically sortable by creation time
        ids.sort();

        Ok(ids)
    }

    async fn remove_expired(&self) -> Result<Vec<JobId>> {
        let now = now_ms();
        let mut jobs = self.jobs.write()?;

        let mut removed: Vec<_> = jobs
            .iter()
            .filter(|(_, state)| state.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &removed {
            jobs.remove(id);
        }

        removed.sort();

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued_state(total: usize) -> JobState {
        JobState::queued(JobId::generate(), total)
    }

    fn success(recipient: &str) -> DispatchOutcome {
        DispatchOutcome::Success {
            recipient: recipient.to_string(),
            address: format!("{recipient}@example.com"),
        }
    }

    #[tokio::test]
    async fn test_memory_store_lifecycle() {
        let store = MemoryProgressStore::new();
        let state = queued_state(2);
        let id = state.job_id.clone();

        store.create(&state).await.expect("Failed to create");

        let ids = store.list().await.expect("Failed to list");
        assert_eq!(ids, vec![id.clone()]);

        let snapshot = store.begin_processing(&id).await.expect("Failed to begin");
        assert_eq!(snapshot.status, JobStatus::Processing);
        assert_eq!(snapshot.last_processed_index, 0);

        store
            .append_progress(&id, 1, success("acme"))
            .await
            .expect("Failed to append");
        store
            .append_progress(&id, 2, success("globex"))
            .await
            .expect("Failed to append");

        store
            .set_terminal(&id, JobStatus::Completed, None)
            .await
            .expect("Failed to finalise");

        let final_state = store.read(&id).await.expect("Failed to read");
        assert_eq!(final_state.status, JobStatus::Completed);
        assert_eq!(final_state.last_processed_index, 2);
        assert_eq!(final_state.outcomes.len(), 2);
        assert_eq!(final_state.successful(), 2);
    }

    #[tokio::test]
    async fn test_append_keeps_outcomes_and_index_in_lockstep() {
        let store = MemoryProgressStore::new();
        let state = queued_state(5);
        let id = state.job_id.clone();
        store.create(&state).await.unwrap();

        for i in 0..5 {
            store
                .append_progress(&id, i + 1, success(&format!("r{i}")))
                .await
                .unwrap();

            let snapshot = store.read(&id).await.unwrap();
            assert_eq!(snapshot.outcomes.len(), snapshot.last_processed_index);
        }
    }

    #[tokio::test]
    async fn test_out_of_order_checkpoint_rejected() {
        let store = MemoryProgressStore::new();
        let state = queued_state(3);
        let id = state.job_id.clone();
        store.create(&state).await.unwrap();

        let err = store
            .append_progress(&id, 2, success("skip"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        // Replays are refused too
        store.append_progress(&id, 1, success("ok")).await.unwrap();
        let err = store
            .append_progress(&id, 1, success("again"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        let snapshot = store.read(&id).await.unwrap();
        assert_eq!(snapshot.last_processed_index, 1);
        assert_eq!(snapshot.outcomes.len(), 1);
    }

    #[tokio::test]
    async fn test_begin_processing_clears_error_and_expiry() {
        let store = MemoryProgressStore::new();
        let state = queued_state(1);
        let id = state.job_id.clone();
        store.create(&state).await.unwrap();

        store
            .set_terminal(&id, JobStatus::Failed, Some("connect failed".into()))
            .await
            .unwrap();
        store
            .expire_after(&id, Duration::from_secs(86_400))
            .await
            .unwrap();

        let resumed = store.begin_processing(&id).await.unwrap();
        assert_eq!(resumed.status, JobStatus::Processing);
        assert_eq!(resumed.error, None);
        assert_eq!(resumed.expires_at, None);
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let store = MemoryProgressStore::with_capacity(2);

        store.create(&queued_state(1)).await.unwrap();
        store.create(&queued_state(1)).await.unwrap();

        let result = store.create(&queued_state(1)).await;
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("capacity exceeded")
        );
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates() {
        let store = MemoryProgressStore::new();
        let state = queued_state(1);

        store.create(&state).await.unwrap();
        let err = store.create(&state).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_read_missing_job() {
        let store = MemoryProgressStore::new();
        let err = store.read(&JobId::generate()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_creates_stay_unique() {
        let store = MemoryProgressStore::new();

        let mut handles = vec![];
        for i in 0..100 {
            let store_clone = store.clone();
            let handle = tokio::spawn(async move { store_clone.create(&queued_state(i)).await });
            handles.push(handle);
        }

        for handle in handles {
            handle.await.expect("Task panicked").expect("Create failed");
        }

        let ids = store.list().await.expect("Failed to list");
        assert_eq!(ids.len(), 100);

        let mut id_set = std::collections::HashSet::new();
        for id in &ids {
            assert!(id_set.insert(id.clone()), "Found duplicate ID: {id}");
        }
    }

    #[tokio::test]
    async fn test_remove_expired_sweeps_only_past_deadlines() {
        let store = MemoryProgressStore::new();

        let keep = queued_state(0);
        let drop = queued_state(0);
        store.create(&keep).await.unwrap();
        store.create(&drop).await.unwrap();

        store
            .expire_after(&keep.job_id, Duration::from_secs(3_600))
            .await
            .unwrap();
        store
            .expire_after(&drop.job_id, Duration::ZERO)
            .await
            .unwrap();

        let removed = store.remove_expired().await.unwrap();
        assert_eq!(removed, vec![drop.job_id.clone()]);

        assert!(store.read(&keep.job_id).await.is_ok());
        assert!(matches!(
            store.read(&drop.job_id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_capacity_methods() {
        let unlimited = MemoryProgressStore::new();
        assert_eq!(unlimited.capacity(), None);

        let limited = MemoryProgressStore::with_capacity(100);
        assert_eq!(limited.capacity(), Some(100));
    }
}
