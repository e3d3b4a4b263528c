//! Resumable batch email dispatch.
//!
//! This crate is the core of missive: it takes an ordered batch of recipient
//! records, sends one message per record over a single authenticated relay
//! session, and checkpoints progress to a [`missive_store::ProgressStore`]
//! after every record so an interrupted job can resume where it left off.
//!
//! The moving parts:
//!
//! - [`RecipientBatch`]: the immutable ordered batch of records for one job
//! - [`MailTransport`]: the relay session (connect, send-one, keep-alive, close)
//! - [`DispatchJob`]: the state machine driving the resume-aware send loop
//! - [`JobRegistry`]: live job handles, carrying the cooperative stop tokens
//! - [`Dispatcher`]: the deserializable component tying it all together

pub mod batch;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod registry;
pub mod transport;
pub mod types;

pub use batch::{RecipientBatch, RecipientRecord};
pub use dispatcher::Dispatcher;
pub use error::{ConnectError, DispatchError, PersistenceError, SendError};
pub use job::DispatchJob;
pub use registry::{JobHandle, JobRegistry, StopToken};
pub use transport::{MailTransport, SmtpRelayTransport};
pub use types::{JobConfig, SmtpTimeouts};
