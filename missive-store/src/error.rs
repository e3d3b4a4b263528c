//! Error types for the missive-store crate.
//!
//! This module provides typed error handling for progress store operations
//! including file I/O, serialization, and checkpoint validation.

use std::io;

use thiserror::Error;

use crate::types::JobId;

/// Top-level store error type.
///
/// All progress store operations return this error type, which categorizes
/// failures into I/O, serialization, validation, and logical errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O operation failed (file read/write/delete).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Job not found in the store.
    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// Store or checkpoint validation failed.
    #[error("Store validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Internal error (lock poisoning, etc.).
    #[error("Internal error: {0}")]
    Internal(String),

    /// Job already exists in the store.
    #[error("Job already exists: {0}")]
    AlreadyExists(JobId),
}

/// Serialization and deserialization errors.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// Bincode serialization failed.
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    /// Bincode deserialization failed.
    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    /// Invalid job state format (corrupted data).
    #[error("Invalid job state format: {0}")]
    InvalidFormat(String),
}

/// Store directory and checkpoint validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Store path failed security validation.
    #[error("Invalid store path: {0}")]
    InvalidPath(String),

    /// A checkpoint tried to skip ahead or move backwards.
    #[error("Out-of-order checkpoint: expected {expected}, got {got}")]
    OutOfOrderCheckpoint { expected: usize, got: usize },
}

/// Specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

// Convenience conversion for lock poisoning
impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}
