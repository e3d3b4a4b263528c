//! Backend implementations of the progress store
//!
//! - `memory`: in-memory storage for testing and transient deployments
//! - `file`: file-based storage for production use
//! - `test`: test utilities with synchronization primitives

pub mod file;
pub mod memory;

pub use file::{FileProgressStore, FileProgressStoreBuilder};
pub use memory::MemoryProgressStore;
pub use test::TestProgressStore;
