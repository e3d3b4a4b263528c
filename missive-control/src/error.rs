//! Error types for control operations

use thiserror::Error;

/// Errors that can occur during control operations
#[derive(Debug, Error)]
pub enum ControlError {
    /// I/O error communicating with the control socket
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol deserialization error
    #[error("Protocol error: {0}")]
    ProtocolDeserialization(#[from] bincode::error::DecodeError),

    /// Protocol serialization error
    #[error("Protocol error: {0}")]
    ProtocolSerialization(#[from] bincode::error::EncodeError),

    /// A frame exceeded the wire-level size bound
    #[error("Frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge {
        /// Length announced by the frame's prefix
        size: u32,
        /// Bound the frame was checked against
        limit: u32,
    },

    /// Client and server disagree on the protocol version
    #[error("Incompatible protocol version: client={client}, server={server}")]
    VersionMismatch {
        /// Version this side speaks
        client: u32,
        /// Version the other side answered with
        server: u32,
    },

    /// Another live instance already owns the control socket
    #[error("Control socket already in use: {0}")]
    SocketInUse(String),

    /// The supplied job id does not parse as a ULID
    #[error("Invalid job id: {0}")]
    InvalidJobId(String),

    /// Server returned an error
    #[error("Server error: {0}")]
    ServerError(String),

    /// Connection closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Control socket path is invalid
    #[error("Invalid socket path: {0}")]
    InvalidSocketPath(String),
}

/// Result type for control operations
pub type Result<T> = std::result::Result<T, ControlError>;
