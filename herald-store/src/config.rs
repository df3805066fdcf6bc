use std::{path::PathBuf, sync::Arc};

use serde::Deserialize;

use crate::{FileStore, MemoryStore, error::Result, store::Store};

/// Configuration for the pipeline store
///
/// Allows runtime selection of the store implementation through the
/// configuration file.
///
/// # Examples
///
/// File-backed store in RON config:
/// ```ron
/// Herald (
///     store: File(
///         path: "/var/lib/herald",
///     ),
/// )
/// ```
///
/// Memory-backed store for testing:
/// ```ron
/// Herald (
///     store: Memory,
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub enum StoreConfig {
    /// File-based store (production)
    File {
        /// Root directory; `jobs/`, `deliveries/` and `logs/` are created
        /// beneath it
        path: PathBuf,
    },
    /// Memory-based store (testing/development)
    Memory,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::File {
            path: PathBuf::from("/var/lib/herald"),
        }
    }
}

impl StoreConfig {
    /// Get the filesystem path for file-backed stores, if applicable
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::File { path } => Some(path),
            Self::Memory => None,
        }
    }

    /// Build and initialize the configured store.
    ///
    /// For file-backed stores this validates the root path, creates the
    /// record directories and removes incomplete writes from previous runs,
    /// so a misconfigured deployment fails here rather than on the first
    /// claim.
    ///
    /// # Errors
    /// Returns an error if path validation or directory initialization
    /// fails.
    pub fn build(&self) -> Result<Arc<dyn Store>> {
        match self {
            Self::File { path } => {
                let store = FileStore::new(path.clone())?;
                store.init()?;
                Ok(Arc::new(store))
            }
            Self::Memory => Ok(Arc::new(MemoryStore::new())),
        }
    }
}
