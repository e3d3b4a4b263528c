//! Control protocol for managing a running missive instance
//!
//! This module provides an IPC mechanism using Unix domain sockets to:
//! - Submit and resume dispatch jobs
//! - Query job progress and stored state
//! - Request cooperative stops
//! - Check system health
//!
//! The protocol uses bincode for efficient serialization.

pub mod auth;
pub mod client;
pub mod codec;
pub mod error;
pub mod protocol;
pub mod server;

pub use auth::ControlAuthConfig;
pub use client::ControlClient;
pub use error::{ControlError, Result};
pub use protocol::{
    JobCommand, JobDetails, JobSummary, PROTOCOL_VERSION, Request, RequestCommand, Response,
    ResponseData, ResponsePayload, StopResult, SystemCommand, SystemStatus,
};
pub use server::{CommandHandler, ControlServer};

/// Default path for the control socket
pub const DEFAULT_CONTROL_SOCKET: &str = "/tmp/missive.sock";
