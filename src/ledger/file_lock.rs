//! Filesystem lock keeping a second ingestor off a shared ledger
//!
//! Uses flock() through `fs2`. The OS releases the lock if the process dies,
//! so a crashed ingestor never leaves the ledger permanently locked.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Guard that holds an exclusive lock on `<ledger>.lock`
///
/// The lock is released when this guard is dropped.
#[derive(Debug)]
pub struct LedgerLock {
    _file: File,
    path: PathBuf,
}

impl LedgerLock {
    /// Try to acquire the lock, non-blocking
    ///
    /// Returns:
    /// - `Ok(Some(guard))` if the lock was acquired
    /// - `Ok(None)` if another process holds the lock
    /// - `Err(...)` on IO errors
    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>> {
        tracing::debug!(lock_file = %lock_path.display(), "Attempting to acquire ledger lock");

        if let Some(parent) = lock_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).context("Failed to create lock directory")?;
        }

        let file = File::create(lock_path).context("Failed to create lock file")?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                tracing::debug!(lock_file = %lock_path.display(), "Acquired ledger lock");
                Ok(Some(Self {
                    _file: file,
                    path: lock_path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                tracing::debug!(lock_file = %lock_path.display(), "Ledger lock held elsewhere");
                Ok(None)
            }
            Err(e) => Err(e).context("Failed to acquire ledger lock"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        // The lock file stays on disk and is reused by the next holder
        tracing::debug!(lock_file = %self.path.display(), "Releasing ledger lock");
    }
}
