// Ledger configuration

use crate::consensus::TARGET_BITS;
use crate::error::{LedgerError, Result};
use std::path::{Path, PathBuf};

/// Where the ledger lives and which proof-of-work target it is created with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    /// Database directory; `None` for a throwaway database
    pub path: Option<PathBuf>,
    /// Leading zero bits required of block digests. Only consulted when a
    /// ledger is created; an existing ledger keeps the value it stored.
    pub target_bits: u32,
}

impl ChainConfig {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            target_bits: TARGET_BITS,
        }
    }

    /// Temporary database, removed when the ledger is dropped (for testing)
    pub fn temporary() -> Self {
        Self {
            path: None,
            target_bits: TARGET_BITS,
        }
    }

    pub fn with_target_bits(mut self, target_bits: u32) -> Self {
        self.target_bits = target_bits;
        self
    }

    /// Whether a database directory is already present
    pub fn exists(&self) -> bool {
        self.path.as_ref().is_some_and(|p| p.exists())
    }

    pub(crate) fn open_db(&self) -> Result<sled::Db> {
        let config = match &self.path {
            Some(path) => sled::Config::new().path(path),
            None => sled::Config::new().temporary(true),
        };
        config.open().map_err(LedgerError::from)
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self::new("./data/blockchain")
    }
}
