//! Typed error handling for dispatch operations.
//!
//! The split mirrors how failures propagate:
//! - Connect-class errors are fatal to the whole job
//! - Send-class errors are folded into a per-record `Failed` outcome and
//!   never unwind the dispatch loop
//! - Persistence errors escalate to job failure once the bounded checkpoint
//!   retries are exhausted

use thiserror::Error;

use missive_store::StoreError;

/// Job-level error: anything that aborts the whole batch.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Establishing the relay session failed; no records were attempted.
    #[error("Connect failure: {0}")]
    Connect(#[from] ConnectError),

    /// A checkpoint could not be persisted; continuing would break resume.
    #[error("Persistence failure: {0}")]
    Persistence(#[from] PersistenceError),

    /// The progress store failed outside the checkpoint path.
    #[error("Store failure: {0}")]
    Store(#[from] StoreError),

    /// A second runner was refused for a job that is already live.
    #[error("Job {0} is already running")]
    AlreadyRunning(missive_store::JobId),

    /// The dispatcher was used before `init()`.
    #[error("Dispatcher not initialised: {0}")]
    NotInitialized(String),
}

/// Errors establishing the relay session. All of these are fatal to the job.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// TCP connection could not be established.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The relay rejected us at the greeting or EHLO stage.
    #[error("Relay rejected session: {0}")]
    Rejected(String),

    /// STARTTLS negotiation or the TLS handshake failed while TLS is required.
    #[error("TLS negotiation failed: {0}")]
    Tls(String),

    /// The relay refused our credentials.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// A connect-phase operation exceeded its configured timeout.
    #[error("Connect timed out: {0}")]
    Timeout(String),
}

/// Per-record send errors. Folded into a `Failed` outcome, never propagated.
#[derive(Debug, Error)]
pub enum SendError {
    /// The record has no recipient address; nothing was sent.
    #[error("no email address found")]
    MissingAddress,

    /// The relay rejected a command during the transaction.
    #[error("Relay rejected message ({code}): {message}")]
    Rejected { code: u16, message: String },

    /// The session broke mid-transaction.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The message text could not be assembled.
    #[error("Message build failed: {0}")]
    MessageBuild(String),

    /// A send-phase operation exceeded its configured timeout.
    #[error("Send timed out: {0}")]
    Timeout(String),
}

/// Checkpoint persistence failure after bounded retries.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Every attempt to write the checkpoint failed.
    #[error("Checkpoint write failed after {attempts} attempts: {source}")]
    CheckpointFailed {
        attempts: u32,
        #[source]
        source: StoreError,
    },
}

/// Specialized `Result` type for job-level dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_address_reason_string() {
        // The reason recorded for an address-less record is load-bearing:
        // pollers of older deployments match on it.
        assert_eq!(SendError::MissingAddress.to_string(), "no email address found");
    }

    #[test]
    fn test_connect_error_is_job_level() {
        let err = DispatchError::from(ConnectError::Auth("535 bad credentials".into()));
        assert!(err.to_string().contains("Authentication failed"));
    }

    #[test]
    fn test_persistence_error_carries_attempts() {
        let err = PersistenceError::CheckpointFailed {
            attempts: 3,
            source: StoreError::Internal("disk full".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("after 3 attempts"));
        assert!(msg.contains("disk full"));
    }
}
