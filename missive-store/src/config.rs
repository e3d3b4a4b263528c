use std::sync::Arc;

use serde::Deserialize;

use crate::{
    backends::{FileProgressStore, MemoryProgressStore},
    error::Result,
    store::ProgressStore,
};

/// Configuration for the progress store backend
///
/// This enum allows runtime selection of the store implementation through
/// configuration files.
///
/// # Examples
///
/// File-backed store in RON config:
/// ```ron
/// store: (type: "File", path: "/var/lib/missive/jobs"),
/// ```
///
/// Memory-backed store for testing (unlimited capacity):
/// ```ron
/// store: (type: "Memory"),
/// ```
///
/// Memory-backed store with a capacity limit:
/// ```ron
/// store: (type: "Memory", capacity: 1000),
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum StoreConfig {
    /// File-based store (production)
    File(FileProgressStore),
    /// Memory-based store (testing/development)
    Memory(MemoryConfig),
}

/// Configuration for the memory-backed store
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MemoryConfig {
    /// Maximum number of jobs to track (omit for unlimited)
    #[serde(default)]
    pub capacity: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::File(FileProgressStore::default())
    }
}

impl StoreConfig {
    /// Get the filesystem path for file-backed stores, if applicable
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::File(store) => Some(store.path()),
            Self::Memory(_) => None,
        }
    }

    /// Convert the configuration into an initialized store
    ///
    /// File-backed stores get their directory created and orphaned delete
    /// markers cleaned up before the store is handed out.
    ///
    /// # Errors
    /// Returns an error if file store initialization fails (directory
    /// creation, permissions, etc.)
    pub fn into_store(self) -> Result<Arc<dyn ProgressStore>> {
        match self {
            Self::File(mut store) => {
                store.init()?;
                Ok(Arc::new(store))
            }
            Self::Memory(config) => Ok(config.capacity.map_or_else(
                || Arc::new(MemoryProgressStore::new()) as Arc<dyn ProgressStore>,
                |capacity| Arc::new(MemoryProgressStore::with_capacity(capacity)),
            )),
        }
    }
}
