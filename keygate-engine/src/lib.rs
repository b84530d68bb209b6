//! Persistent identity link storage on fjall

use fjall::{Config, PersistMode, TxKeyspace};
use keygate_core::{KeygateError, Result};
use std::path::Path;
use std::sync::Arc;

pub mod links;

pub use links::*;

/// Storage engine wrapping a transactional fjall keyspace
#[derive(Clone)]
pub struct StorageEngine {
    keyspace: Arc<TxKeyspace>,
}

impl StorageEngine {
    /// Open or create the keyspace at `path`
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let keyspace = Config::new(path)
            .open_transactional()
            .map_err(storage_error)?;

        Ok(StorageEngine {
            keyspace: Arc::new(keyspace),
        })
    }

    /// Create temporary storage engine for testing
    #[cfg(any(test, feature = "test-utils"))]
    pub fn temp() -> Result<(Self, tempfile::TempDir)> {
        let temp_dir = tempfile::tempdir()?;
        let engine = Self::new(temp_dir.path())?;
        Ok((engine, temp_dir))
    }

    /// Open the identity link store
    pub fn link_store(&self) -> Result<FjallLinkStore> {
        FjallLinkStore::open(self.clone())
    }

    pub(crate) fn keyspace(&self) -> &TxKeyspace {
        &self.keyspace
    }

    /// Persist all changes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace
            .persist(PersistMode::SyncAll)
            .map_err(storage_error)
    }
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine").finish_non_exhaustive()
    }
}

pub(crate) fn storage_error(e: impl std::fmt::Display) -> KeygateError {
    KeygateError::Storage(e.to_string())
}
