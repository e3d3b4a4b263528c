use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use missive_common::internal;
use serde::Deserialize;
use tokio::fs;

use crate::{
    error::{Result, SerializationError, StoreError, ValidationError},
    store::{ProgressStore, deadline_after, now_ms},
    types::{DispatchOutcome, JobId, JobState, JobStatus},
};

/// File-based progress store implementation
///
/// Each job is stored as a single file `{job_id}.bin` containing the whole
/// `JobState` as bincode. The job ID is a 26-character ULID, which encodes
/// both timestamp and randomness, so filenames sort by creation time.
///
/// Keeping the index and the outcome list inside one file means every
/// checkpoint is one atomic rewrite; a reader can never observe the two out
/// of step with each other.
///
/// # Security
/// - Uses atomic writes (write to temp file, then rename) to prevent corruption
/// - Validates the store path at deserialization time
/// - Only reads files whose names parse as valid ULIDs
///
/// # Atomicity
/// All write operations use the "write to temp, then rename" pattern so that
/// partial writes never leave a job file in an inconsistent state. Deletes
/// are two-phase (rename to `.deleted`, then remove); orphans are cleaned up
/// on the next `init()`.
#[derive(Debug, Clone)]
pub struct FileProgressStore {
    path: PathBuf,
}

impl Default for FileProgressStore {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/missive/jobs"),
        }
    }
}

// Custom Deserialize implementation with path validation
impl<'de> Deserialize<'de> for FileProgressStore {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct FileProgressStoreHelper {
            path: PathBuf,
        }

        let helper = FileProgressStoreHelper::deserialize(deserializer)?;
        Self::validate_path(&helper.path).map_err(serde::de::Error::custom)?;

        Ok(Self { path: helper.path })
    }
}

impl FileProgressStore {
    /// Validate a store path for security
    ///
    /// # Security Checks
    /// - Rejects paths containing `..` (directory traversal)
    /// - Rejects paths to sensitive system directories
    /// - Ensures the path is absolute
    ///
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous
    fn validate_path(path: &Path) -> Result<()> {
        for component in path.components() {
            if component == std::path::Component::ParentDir {
                return Err(ValidationError::InvalidPath(format!(
                    "Store path cannot contain '..' components: {}",
                    path.display()
                ))
                .into());
            }
        }

        if !path.is_absolute() {
            return Err(ValidationError::InvalidPath(format!(
                "Store path must be absolute: {}",
                path.display()
            ))
            .into());
        }

        let sensitive_prefixes = [
            "/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/sys", "/proc", "/dev",
        ];

        for prefix in &sensitive_prefixes {
            if path.starts_with(prefix) {
                return Err(ValidationError::InvalidPath(format!(
                    "Store path cannot be in system directory {prefix}: {}",
                    path.display()
                ))
                .into());
            }
        }

        Ok(())
    }

    /// Create a new `FileProgressStore` builder
    #[must_use]
    pub fn builder() -> FileProgressStoreBuilder {
        FileProgressStoreBuilder::default()
    }

    /// The directory job files are stored under
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Initialize the file-backed store
    ///
    /// Creates the store directory if it doesn't exist and validates that the
    /// path is actually a directory. Also cleans up any orphaned `.deleted`
    /// files from previous crashes.
    ///
    /// # Errors
    /// - If the store path cannot be created
    /// - If the path exists but is not a directory
    pub fn init(&mut self) -> Result<()> {
        internal!("Initialising job store ...");

        let path = Path::new(&self.path);
        if !path.try_exists()? {
            internal!("{:#?} does not exist, creating...", self.path);
            std::fs::create_dir_all(path)?;
        } else if !path.is_dir() {
            return Err(std::io::Error::new(
                ErrorKind::NotADirectory,
                format!(
                    "Expected {} to be a Directory, but it is not",
                    path.display()
                ),
            )
            .into());
        }

        self.cleanup_deleted_files()?;

        Ok(())
    }

    /// Clean up orphaned `.deleted` files from incomplete delete operations
    fn cleanup_deleted_files(&self) -> Result<()> {
        let entries = std::fs::read_dir(&self.path)?;
        let mut cleaned = 0;

        for entry in entries {
            let entry = entry?;
            let filename = entry.file_name();
            let filename_str = filename.to_string_lossy();

            if filename_str.ends_with(".deleted") {
                std::fs::remove_file(entry.path())?;
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} orphaned .deleted files from job store"
            );
        }

        Ok(())
    }

    fn job_path(&self, id: &JobId) -> PathBuf {
        self.path.join(format!("{id}.bin"))
    }

    /// Write a job state to its file via the temp-then-rename pattern
    async fn write_state(&self, state: &JobState) -> Result<()> {
        let filename = format!("{}.bin", state.job_id);
        let final_path = self.path.join(&filename);
        let temp_path = self.path.join(format!(".tmp_{filename}"));

        let bytes = bincode::serde::encode_to_vec(state, bincode::config::legacy())
            .map_err(SerializationError::from)?;

        fs::write(&temp_path, &bytes).await?;
        fs::rename(&temp_path, &final_path).await?;

        Ok(())
    }

    /// Read and deserialize a job file, mapping a missing file to `NotFound`
    async fn read_state(&self, id: &JobId) -> Result<JobState> {
        let bytes = match fs::read(self.job_path(id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let (state, _): (JobState, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::legacy())
                .map_err(SerializationError::from)?;

        Ok(state)
    }

    /// Remove a job file via the two-phase delete
    ///
    /// Phase 1 atomically renames the file to a `.deleted` suffix, phase 2
    /// removes it. If the process crashes between the phases, the `.deleted`
    /// file is ignored by `list()` and cleaned up on the next `init()`.
    async fn delete_state(&self, id: &JobId) -> Result<()> {
        let filename = format!("{id}.bin");
        let path = self.path.join(&filename);
        let deleted_path = self.path.join(format!("{filename}.deleted"));

        fs::rename(&path, &deleted_path).await?;
        fs::remove_file(&deleted_path).await?;

        internal!(level = DEBUG, "Deleted job {id} from store");

        Ok(())
    }
}

#[async_trait]
impl ProgressStore for FileProgressStore {
    async fn create(&self, state: &JobState) -> Result<()> {
        if fs::try_exists(self.job_path(&state.job_id))
            .await
            .unwrap_or(false)
        {
            return Err(StoreError::AlreadyExists(state.job_id.clone()));
        }

        self.write_state(state).await?;

        internal!(level = DEBUG, "Created job {} in store", state.job_id);

        Ok(())
    }

    async fn read(&self, id: &JobId) -> Result<JobState> {
        self.read_state(id).await
    }

    async fn begin_processing(&self, id: &JobId) -> Result<JobState> {
        let mut state = self.read_state(id).await?;

        state.status = JobStatus::Processing;
        state.error = None;
        state.expires_at = None;

        self.write_state(&state).await?;

        Ok(state)
    }

    async fn append_progress(
        &self,
        id: &JobId,
        new_index: usize,
        outcome: DispatchOutcome,
    ) -> Result<()> {
        let mut state = self.read_state(id).await?;

        state.apply_progress(new_index, outcome)?;

        self.write_state(&state).await
    }

    async fn set_terminal(
        &self,
        id: &JobId,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<()> {
        let mut state = self.read_state(id).await?;

        state.status = status;
        state.error = error;

        self.write_state(&state).await
    }

    async fn expire_after(&self, id: &JobId, retention: std::time::Duration) -> Result<()> {
        let mut state = self.read_state(id).await?;

        state.expires_at = Some(deadline_after(retention));

        self.write_state(&state).await
    }

    /// List all jobs in the store directory
    ///
    /// Scans for `.bin` files and parses their filenames into job IDs.
    /// Results are sorted lexicographically by ULID (creation order).
    ///
    /// # Security
    /// - Ignores temporary files (starting with `.tmp_`)
    /// - Uses `JobId::from_filename()`, which validates filenames to prevent
    ///   path traversal
    /// - Skips any files that don't match the expected pattern
    async fn list(&self) -> Result<Vec<JobId>> {
        let mut entries = fs::read_dir(&self.path).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let filename_str = filename.to_string_lossy();

            if filename_str.ends_with(".bin")
                && !filename_str.starts_with(".tmp_")
                && let Some(id) = JobId::from_filename(&filename_str)
            {
                ids.push(id);
            }
        }

        ids.sort();

        internal!(level = DEBUG, "Found {} jobs in store", ids.len());

        Ok(ids)
    }

    async fn remove_expired(&self) -> Result<Vec<JobId>> {
        let now = now_ms();
        let mut removed = Vec::new();

        for id in self.list().await? {
            // A file that vanished between list and read was already removed
            let state = match self.read_state(&id).await {
                Ok(state) => state,
                Err(StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };

            if state.is_expired(now) {
                self.delete_state(&id).await?;
                removed.push(id);
            }
        }

        Ok(removed)
    }
}

/// Builder for `FileProgressStore`
#[derive(Debug, Default)]
pub struct FileProgressStoreBuilder {
    path: PathBuf,
}

impl FileProgressStoreBuilder {
    /// Set the store directory path
    #[must_use]
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Build the final `FileProgressStore`
    ///
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous
    pub fn build(self) -> Result<FileProgressStore> {
        FileProgressStore::validate_path(&self.path)?;
        Ok(FileProgressStore { path: self.path })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> FileProgressStore {
        let mut store = FileProgressStore::builder()
            .path(dir.path().to_path_buf())
            .build()
            .expect("Failed to build store");
        store.init().expect("Failed to init store");
        store
    }

    fn success(recipient: &str) -> DispatchOutcome {
        DispatchOutcome::Success {
            recipient: recipient.to_string(),
            address: format!("{recipient}@example.com"),
        }
    }

    #[test]
    fn test_path_validation() {
        assert!(FileProgressStore::validate_path(Path::new("/var/lib/missive/jobs")).is_ok());

        assert!(FileProgressStore::validate_path(Path::new("relative/path")).is_err());
        assert!(FileProgressStore::validate_path(Path::new("/var/../etc/passwd")).is_err());
        assert!(FileProgressStore::validate_path(Path::new("/etc/missive")).is_err());
        assert!(FileProgressStore::validate_path(Path::new("/proc/self")).is_err());
    }

    #[test]
    fn test_deserialize_rejects_bad_paths() {
        let ok: std::result::Result<FileProgressStore, _> =
            ron::from_str(r#"(path: "/tmp/missive-test")"#);
        assert!(ok.is_ok());

        let bad: std::result::Result<FileProgressStore, _> =
            ron::from_str(r#"(path: "/etc/missive")"#);
        assert!(bad.is_err());
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let state = JobState::queued(JobId::generate(), 2);
        let id = state.job_id.clone();

        store.create(&state).await.unwrap();
        assert!(matches!(
            store.create(&state).await,
            Err(StoreError::AlreadyExists(_))
        ));

        let snapshot = store.begin_processing(&id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Processing);

        store.append_progress(&id, 1, success("acme")).await.unwrap();
        store
            .append_progress(&id, 2, success("globex"))
            .await
            .unwrap();
        store
            .set_terminal(&id, JobStatus::Completed, None)
            .await
            .unwrap();

        let read_back = store.read(&id).await.unwrap();
        assert_eq!(read_back.status, JobStatus::Completed);
        assert_eq!(read_back.last_processed_index, 2);
        assert_eq!(read_back.outcomes.len(), 2);
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id;

        {
            let store = store_in(&dir);
            let state = JobState::queued(JobId::generate(), 3);
            id = state.job_id.clone();
            store.create(&state).await.unwrap();
            store.begin_processing(&id).await.unwrap();
            store.append_progress(&id, 1, success("acme")).await.unwrap();
        }

        // A fresh store over the same directory sees the checkpoint
        let store = store_in(&dir);
        let state = store.read(&id).await.unwrap();
        assert_eq!(state.last_processed_index, 1);
        assert_eq!(state.outcomes.len(), 1);
        assert_eq!(state.total, 3);
    }

    #[tokio::test]
    async fn test_list_skips_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let state = JobState::queued(JobId::generate(), 1);
        store.create(&state).await.unwrap();

        std::fs::write(dir.path().join("not_a_ulid.bin"), b"junk").unwrap();
        std::fs::write(dir.path().join(".tmp_garbage.bin"), b"junk").unwrap();
        std::fs::write(dir.path().join("readme.txt"), b"junk").unwrap();

        let ids = store.list().await.unwrap();
        assert_eq!(ids, vec![state.job_id]);
    }

    #[tokio::test]
    async fn test_remove_expired_deletes_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let keep = JobState::queued(JobId::generate(), 0);
        let drop = JobState::queued(JobId::generate(), 0);
        store.create(&keep).await.unwrap();
        store.create(&drop).await.unwrap();

        store
            .expire_after(&keep.job_id, Duration::from_secs(3_600))
            .await
            .unwrap();
        store.expire_after(&drop.job_id, Duration::ZERO).await.unwrap();

        let removed = store.remove_expired().await.unwrap();
        assert_eq!(removed, vec![drop.job_id.clone()]);

        assert!(store.read(&keep.job_id).await.is_ok());
        assert!(matches!(
            store.read(&drop.job_id).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(!dir.path().join(format!("{}.bin", drop.job_id)).exists());
    }

    #[tokio::test]
    async fn test_init_cleans_orphaned_deleted_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stale.bin.deleted"), b"junk").unwrap();

        let _store = store_in(&dir);

        assert!(!dir.path().join("stale.bin.deleted").exists());
    }

    #[tokio::test]
    async fn test_missing_job_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        assert!(matches!(
            store.read(&JobId::generate()).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
