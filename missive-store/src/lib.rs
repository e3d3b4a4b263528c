pub mod backends;
pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use backends::{
    FileProgressStore, FileProgressStoreBuilder, MemoryProgressStore, TestProgressStore,
};
pub use config::{MemoryConfig, StoreConfig};
pub use error::{Result, SerializationError, StoreError, ValidationError};
pub use store::ProgressStore;
pub use types::{DispatchOutcome, JobId, JobState, JobStatus};
