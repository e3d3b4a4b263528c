use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};

/// Identifier for a dispatch job
///
/// This is a globally unique identifier (ULID) that serves as both the job
/// handle returned to callers and the filename for persisted job state. ULIDs
/// are lexicographically sortable by creation time and collision-resistant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId {
    id: ulid::Ulid,
}

impl JobId {
    /// Parse a job ID from a filename like `01ARYZ6S41.bin`
    ///
    /// Validates that the filename is a valid ULID to prevent path traversal attacks.
    ///
    /// # Security
    /// This function explicitly rejects:
    /// - Path separators (/ and \)
    /// - Directory traversal patterns (..)
    /// - Invalid ULID format
    pub fn from_filename(filename: &str) -> Option<Self> {
        // Reject filenames with path separators
        if filename.contains('/') || filename.contains('\\') {
            return None;
        }

        // Reject filenames with directory traversal patterns
        if filename.contains("..") {
            return None;
        }

        let stem = filename.strip_suffix(".bin")?;

        let id = ulid::Ulid::from_string(stem).ok()?;

        Some(Self { id })
    }

    /// Create a new job ID from a ULID
    #[must_use]
    pub const fn new(id: ulid::Ulid) -> Self {
        Self { id }
    }

    /// Generate a new unique job ID
    #[must_use]
    pub fn generate() -> Self {
        Self {
            id: ulid::Ulid::new(),
        }
    }

    /// Get the underlying ULID
    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.id
    }

    /// Get the timestamp (milliseconds since Unix epoch) encoded in this ULID
    #[must_use]
    pub const fn timestamp_ms(&self) -> u64 {
        self.id.timestamp_ms()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl std::str::FromStr for JobId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ulid::Ulid::from_string(s).map(|id| Self { id })
    }
}

impl serde::Serialize for JobId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.id.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for JobId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let id = ulid::Ulid::from_string(&s).map_err(serde::de::Error::custom)?;
        Ok(Self { id })
    }
}

/// Lifecycle status of a dispatch job
///
/// A job starts `Queued`, moves to `Processing` when its task picks it up,
/// and ends in exactly one of the three terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Stopped,
    Failed,
}

impl JobStatus {
    /// Whether this status is terminal (no further transitions)
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        })
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "stopped" => Ok(Self::Stopped),
            "failed" => Ok(Self::Failed),
            other => Err(format!("Unknown job status: {other}")),
        }
    }
}

/// The result of attempting one recipient record
///
/// Exactly one outcome is recorded per attempted record, in batch order.
/// The `recipient` field is the record's display label (its display name
/// when present, otherwise its address).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchOutcome {
    /// The message was handed to the relay.
    Success { recipient: String, address: String },
    /// The record could not be sent; the reason is recorded, the batch continues.
    Failed { recipient: String, reason: String },
    /// The record was abandoned mid-flight by a stop request.
    Stopped { recipient: String },
}

impl DispatchOutcome {
    /// The display label of the recipient this outcome belongs to
    #[must_use]
    pub fn recipient(&self) -> &str {
        match self {
            Self::Success { recipient, .. }
            | Self::Failed { recipient, .. }
            | Self::Stopped { recipient } => recipient,
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Persisted state of one dispatch job
///
/// This is the single record of truth for a job: everything a poller can
/// observe, and everything a resumed run needs to pick up where the last
/// one left off.
///
/// # Invariants
/// - `outcomes.len() == last_processed_index` after every persisted write
/// - `last_processed_index <= total`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Number of records fully processed and checkpointed (0-based exclusive bound).
    pub last_processed_index: usize,
    /// Size of the batch this job was submitted with.
    pub total: usize,
    /// One outcome per processed record, in batch order.
    pub outcomes: Vec<DispatchOutcome>,
    /// Job-level error, set when the job fails as a whole.
    pub error: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
    /// Expiry deadline in milliseconds since the Unix epoch, armed once terminal.
    pub expires_at: Option<u64>,
}

impl JobState {
    /// Create the initial state for a freshly submitted job
    ///
    /// The creation timestamp is taken from the ULID, which encodes it.
    #[must_use]
    pub fn queued(job_id: JobId, total: usize) -> Self {
        let created_at = job_id.timestamp_ms();
        Self {
            job_id,
            status: JobStatus::Queued,
            last_processed_index: 0,
            total,
            outcomes: Vec::new(),
            error: None,
            created_at,
            expires_at: None,
        }
    }

    /// Record the outcome of one processed record
    ///
    /// Enforces that checkpoints advance one record at a time, keeping
    /// `outcomes.len()` and `last_processed_index` in lockstep.
    ///
    /// # Errors
    /// Returns `ValidationError::OutOfOrderCheckpoint` if `new_index` is not
    /// exactly one past the current index.
    pub fn apply_progress(&mut self, new_index: usize, outcome: DispatchOutcome) -> Result<()> {
        let expected = self.last_processed_index + 1;
        if new_index != expected {
            return Err(ValidationError::OutOfOrderCheckpoint {
                expected,
                got: new_index,
            }
            .into());
        }

        self.outcomes.push(outcome);
        self.last_processed_index = new_index;

        Ok(())
    }

    /// Count of successful outcomes so far
    #[must_use]
    pub fn successful(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Count of failed outcomes so far
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failed()).count()
    }

    /// Whether the retention deadline has passed
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now_ms)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_job_id_validation() {
        // Valid ULIDs (26 characters)
        assert!(JobId::from_filename("01ARZ3NDEKTSV4RRFFQ69G5FAV.bin").is_some());

        // Invalid IDs (security)
        assert!(JobId::from_filename("../etc/passwd.bin").is_none());
        assert!(JobId::from_filename("foo/bar.bin").is_none());
        assert!(JobId::from_filename("..\\windows\\system32.bin").is_none());

        // Invalid IDs (format)
        assert!(JobId::from_filename("not_a_valid_ulid.bin").is_none());
        assert!(JobId::from_filename("1234567890.bin").is_none());

        // Unsupported extensions
        assert!(JobId::from_filename("01ARZ3NDEKTSV4RRFFQ69G5FAV.json").is_none());
        assert!(JobId::from_filename("01ARZ3NDEKTSV4RRFFQ69G5FAV.eml").is_none());
    }

    #[test]
    fn test_job_id_parse_roundtrip() {
        let id = JobId::generate();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);

        assert!("not-a-ulid".parse::<JobId>().is_err());
    }

    #[test]
    fn test_status_display_and_parse() {
        for status in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Stopped,
            JobStatus::Failed,
        ] {
            let parsed: JobStatus = status.to_string().parse().unwrap();
            assert_eq!(status, parsed);
        }

        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Stopped.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn test_apply_progress_keeps_lockstep() {
        let mut state = JobState::queued(JobId::generate(), 3);

        state
            .apply_progress(
                1,
                DispatchOutcome::Success {
                    recipient: "Acme".into(),
                    address: "acme@example.com".into(),
                },
            )
            .unwrap();
        state
            .apply_progress(
                2,
                DispatchOutcome::Failed {
                    recipient: "Globex".into(),
                    reason: "no email address found".into(),
                },
            )
            .unwrap();

        assert_eq!(state.last_processed_index, 2);
        assert_eq!(state.outcomes.len(), state.last_processed_index);
        assert_eq!(state.successful(), 1);
        assert_eq!(state.failed(), 1);
    }

    #[test]
    fn test_apply_progress_rejects_out_of_order() {
        let mut state = JobState::queued(JobId::generate(), 3);

        let err = state
            .apply_progress(
                2,
                DispatchOutcome::Stopped {
                    recipient: "Acme".into(),
                },
            )
            .unwrap_err();

        assert!(err.to_string().contains("expected 1"));
        assert_eq!(state.last_processed_index, 0);
        assert!(state.outcomes.is_empty());
    }

    #[test]
    fn test_expiry_deadline() {
        let mut state = JobState::queued(JobId::generate(), 0);
        assert!(!state.is_expired(u64::MAX));

        state.expires_at = Some(1_000);
        assert!(!state.is_expired(999));
        assert!(state.is_expired(1_000));
        assert!(state.is_expired(1_001));
    }
}
