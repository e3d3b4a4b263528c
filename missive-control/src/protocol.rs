//! Control protocol types and serialization

use std::fmt::{Display, Formatter};

use chrono::{TimeZone, Utc, offset::LocalResult};
use missive_dispatch::{JobConfig, RecipientRecord};
use missive_store::{DispatchOutcome, JobState};
use serde::{Deserialize, Serialize};

/// Current protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Format timestamp (milliseconds since epoch) as human-readable
fn format_timestamp(timestamp_ms: u64) -> String {
    let datetime = Utc.timestamp_millis_opt(i64::try_from(timestamp_ms).unwrap_or(0));
    if let LocalResult::Single(dt) = datetime {
        dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
    } else {
        "unknown".to_string()
    }
}

/// Request sent to the control server (versioned wrapper)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Protocol version
    pub version: u32,
    /// Optional authentication token (bearer token)
    ///
    /// When authentication is enabled on the server, this must be provided
    /// and must match one of the configured token hashes.
    #[serde(default)]
    pub token: Option<String>,
    /// The actual command to execute
    pub command: RequestCommand,
}

/// Request command types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestCommand {
    /// Dispatch job commands
    Job(JobCommand),
    /// System management commands
    System(SystemCommand),
}

/// Dispatch job commands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobCommand {
    /// Submit a new batch for dispatch
    Submit {
        /// The recipient records, in send order
        records: Vec<RecipientRecord>,
        /// Sender identity and per-job settings
        config: JobConfig,
    },
    /// Resume an interrupted job from its last checkpoint
    Resume {
        /// Job ID to resume
        job_id: String,
        /// The recipient records, re-supplied in the original order
        records: Vec<RecipientRecord>,
        /// Sender identity and per-job settings
        config: JobConfig,
    },
    /// View detailed progress for a specific job
    Status {
        /// Job ID to view
        job_id: String,
    },
    /// Request a cooperative stop of a running job
    Stop {
        /// Job ID to stop
        job_id: String,
    },
    /// List stored jobs
    List {
        /// Filter by status (optional)
        status_filter: Option<String>,
    },
}

/// System management commands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SystemCommand {
    /// Health check / ping
    Ping,
    /// Get system status and statistics
    Status,
}

/// Response from the control server (versioned wrapper)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Protocol version
    pub version: u32,
    /// The actual response payload
    pub payload: ResponsePayload,
}

/// Response payload types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponsePayload {
    /// Command succeeded
    Ok,
    /// Command succeeded with data
    Data(Box<ResponseData>),
    /// Command failed with error message
    Error(String),
}

/// Response data types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseData {
    /// ID of a freshly submitted job
    JobSubmitted(String),
    /// Detailed job progress
    JobDetails(Box<JobDetails>),
    /// Stored job list
    JobList(Vec<JobSummary>),
    /// Result of a stop request
    StopResult(StopResult),
    /// System status information
    SystemStatus(SystemStatus),
    /// Simple string message
    Message(String),
}

/// Job summary (for list command)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    /// Job ID
    pub id: String,
    /// Job status
    pub status: String,
    /// Records processed so far
    pub processed: usize,
    /// Total records in the batch
    pub total: usize,
    /// Records sent successfully
    pub successful: usize,
    /// Records that failed
    pub failed: usize,
    /// Time the job was created (milliseconds since epoch)
    pub created_at: u64,
}

impl JobSummary {
    /// Build a summary from stored job state
    #[must_use]
    pub fn from_state(state: &JobState) -> Self {
        Self {
            id: state.job_id.to_string(),
            status: state.status.to_string(),
            processed: state.last_processed_index,
            total: state.total,
            successful: state.successful(),
            failed: state.failed(),
            created_at: state.created_at,
        }
    }
}

impl Display for JobSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("ID:        {}\n", self.id))?;
        f.write_fmt(format_args!("Status:    {}\n", self.status))?;
        f.write_fmt(format_args!(
            "Progress:  {}/{} ({} sent, {} failed)\n",
            self.processed, self.total, self.successful, self.failed
        ))?;
        f.write_fmt(format_args!(
            "Created:   {}\n",
            format_timestamp(self.created_at)
        ))
    }
}

/// Per-record outcome line (for status command)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeLine {
    /// Position of the record in the batch
    pub index: usize,
    /// Recipient display label
    pub recipient: String,
    /// What happened: "sent", "failed", or "stopped"
    pub disposition: String,
    /// Delivery address or failure reason
    pub detail: Option<String>,
}

impl From<(usize, &DispatchOutcome)> for OutcomeLine {
    fn from((index, outcome): (usize, &DispatchOutcome)) -> Self {
        match outcome {
            DispatchOutcome::Success { recipient, address } => Self {
                index,
                recipient: recipient.clone(),
                disposition: "sent".to_string(),
                detail: Some(address.clone()),
            },
            DispatchOutcome::Failed { recipient, reason } => Self {
                index,
                recipient: recipient.clone(),
                disposition: "failed".to_string(),
                detail: Some(reason.clone()),
            },
            DispatchOutcome::Stopped { recipient } => Self {
                index,
                recipient: recipient.clone(),
                disposition: "stopped".to_string(),
                detail: None,
            },
        }
    }
}

/// Job details (for status command)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDetails {
    /// Job ID
    pub id: String,
    /// Job status
    pub status: String,
    /// Records processed so far
    pub processed: usize,
    /// Total records in the batch
    pub total: usize,
    /// Records sent successfully
    pub successful: usize,
    /// Records that failed
    pub failed: usize,
    /// Time the job was created (milliseconds since epoch)
    pub created_at: u64,
    /// Retention deadline, if armed (milliseconds since epoch)
    pub expires_at: Option<u64>,
    /// Job-level error (if the job failed)
    pub error: Option<String>,
    /// Per-record outcomes, in batch order
    pub outcomes: Vec<OutcomeLine>,
}

impl JobDetails {
    /// Build details from stored job state
    #[must_use]
    pub fn from_state(state: &JobState) -> Self {
        Self {
            id: state.job_id.to_string(),
            status: state.status.to_string(),
            processed: state.last_processed_index,
            total: state.total,
            successful: state.successful(),
            failed: state.failed(),
            created_at: state.created_at,
            expires_at: state.expires_at,
            error: state.error.clone(),
            outcomes: state
                .outcomes
                .iter()
                .enumerate()
                .map(OutcomeLine::from)
                .collect(),
        }
    }
}

impl Display for JobDetails {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("ID:        {}\n", self.id))?;
        f.write_fmt(format_args!("Status:    {}\n", self.status))?;
        f.write_fmt(format_args!(
            "Progress:  {}/{} ({} sent, {} failed)\n",
            self.processed, self.total, self.successful, self.failed
        ))?;
        f.write_fmt(format_args!(
            "Created:   {}\n",
            format_timestamp(self.created_at)
        ))?;
        if let Some(expires_at) = self.expires_at {
            f.write_fmt(format_args!(
                "Expires:   {}\n",
                format_timestamp(expires_at)
            ))?;
        }
        if let Some(ref error) = self.error {
            f.write_fmt(format_args!("Error:     {error}\n"))?;
        }

        if !self.outcomes.is_empty() {
            f.write_str("\n--- Outcomes ---\n")?;
            for outcome in &self.outcomes {
                match &outcome.detail {
                    Some(detail) => f.write_fmt(format_args!(
                        "{:>5}  {:<8} {} ({detail})\n",
                        outcome.index, outcome.disposition, outcome.recipient
                    ))?,
                    None => f.write_fmt(format_args!(
                        "{:>5}  {:<8} {}\n",
                        outcome.index, outcome.disposition, outcome.recipient
                    ))?,
                }
            }
        }

        Ok(())
    }
}

/// Result of a stop request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResult {
    /// Job ID the stop was addressed to
    pub job_id: String,
    /// Whether a running job received the signal
    pub signaled: bool,
}

impl Display for StopResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.signaled {
            f.write_fmt(format_args!(
                "Stop signaled for job {}; it will halt at the next record boundary\n",
                self.job_id
            ))
        } else {
            f.write_fmt(format_args!("Job {} is not running\n", self.job_id))
        }
    }
}

/// System status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Server version
    pub version: String,
    /// Uptime in seconds
    pub uptime_secs: u64,
    /// Number of jobs currently running
    pub live_jobs: usize,
    /// Number of jobs with stored state
    pub stored_jobs: usize,
}

impl Display for SystemStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("Version:      {}\n", self.version))?;
        f.write_fmt(format_args!("Uptime:       {}s\n", self.uptime_secs))?;
        f.write_fmt(format_args!("Running jobs: {}\n", self.live_jobs))?;
        f.write_fmt(format_args!("Stored jobs:  {}\n", self.stored_jobs))
    }
}

impl Request {
    /// Create a new request with the current protocol version
    #[must_use]
    pub const fn new(command: RequestCommand) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            token: None,
            command,
        }
    }

    /// Create a new request with authentication token
    #[must_use]
    pub fn with_token(command: RequestCommand, token: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            token: Some(token.into()),
            command,
        }
    }

    /// Check if the request version is compatible with the current version
    #[must_use]
    pub const fn is_version_compatible(&self) -> bool {
        // Only exact version match is supported for now
        self.version == PROTOCOL_VERSION
    }
}

impl Response {
    /// Create an error response
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Error(message.into()),
        }
    }

    /// Create a success response with no data
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Ok,
        }
    }

    /// Create a response with data
    #[must_use]
    pub fn data(data: ResponseData) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Data(Box::new(data)),
        }
    }

    /// Check if the response indicates success (not an error)
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self.payload, ResponsePayload::Error(_))
    }

    /// Check if the response version is compatible with the current version
    #[must_use]
    pub const fn is_version_compatible(&self) -> bool {
        // Only exact version match is supported for now
        self.version == PROTOCOL_VERSION
    }
}
