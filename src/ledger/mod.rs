//! Processed-commit ledger
//!
//! Records which commit hashes have been accepted for processing so each
//! commit is dispatched at most once. The check and the insert happen under
//! one mutex, which makes concurrent deliveries of the same push safe.
//!
//! Two modes:
//! - in-memory: hashes accumulate for the lifetime of the process
//! - persisted: the set is also written to a JSON file (temp file + rename)
//!   so a restart does not replay recent commits. Entries older than the
//!   replay window are compacted away at load and on every acquire. Hashes
//!   accepted by the running process are never compacted.
//!
//! [`CommitLedger::try_acquire`] never touches the disk. Writes happen in
//! [`CommitLedger::flush`], which async callers reach through
//! [`CommitLedger::persist`] on the blocking pool.

mod file_lock;

pub use file_lock::LedgerLock;

use crate::error::LedgerError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// On-disk and in-memory representation: commit hash -> accepted-at (unix seconds)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LedgerState {
    commits: HashMap<String, i64>,
    /// Bumped on every change
    #[serde(skip)]
    revision: u64,
}

impl LedgerState {
    /// Drop entries accepted before `cutoff`; returns how many were removed
    fn compact(&mut self, cutoff: i64) -> usize {
        let before = self.commits.len();
        self.commits.retain(|_, accepted_at| *accepted_at >= cutoff);
        before - self.commits.len()
    }
}

/// Backing file of a persisted ledger
#[derive(Debug)]
struct LedgerFile {
    path: PathBuf,
    replay_window: Duration,
    /// Unix seconds at open; entries from this process are newer than this
    opened_at: i64,
    /// Revision on disk; held for the whole write
    saved: Mutex<u64>,
    _lock: LedgerLock,
}

impl LedgerFile {
    fn cutoff(&self, now: i64) -> i64 {
        let window = i64::try_from(self.replay_window.as_secs()).unwrap_or(i64::MAX);
        now.saturating_sub(window).min(self.opened_at)
    }

    fn save(&self, state: &LedgerState) -> Result<(), LedgerError> {
        let fail = |reason: String| LedgerError::SaveFailed {
            path: self.path.display().to_string(),
            reason,
        };

        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(|e| fail(e.to_string()))?;

        let content = serde_json::to_vec_pretty(state).map_err(|e| fail(e.to_string()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| fail(e.to_string()))?;
        tmp.write_all(&content).map_err(|e| fail(e.to_string()))?;
        tmp.as_file().sync_all().map_err(|e| fail(e.to_string()))?;
        tmp.persist(&self.path).map_err(|e| fail(e.error.to_string()))?;

        tracing::trace!(path = %self.path.display(), entries = state.commits.len(), "Saved ledger");
        Ok(())
    }
}

/// Set of commit hashes already dispatched for processing
#[derive(Debug)]
pub struct CommitLedger {
    state: Mutex<LedgerState>,
    file: Option<LedgerFile>,
}

impl CommitLedger {
    /// A ledger that lives only as long as the process
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            file: None,
        }
    }

    /// Open (or create) a persisted ledger at `path`
    ///
    /// Fails with [`LedgerError::Locked`] when another process already holds
    /// `<path>.lock`.
    pub fn open(path: &Path, replay_window: Duration) -> Result<Self, LedgerError> {
        let lock_path = crate::paths::PlatformPaths::ledger_lock_path(path);
        let lock = LedgerLock::try_acquire(&lock_path)
            .map_err(|e| LedgerError::LoadFailed {
                path: lock_path.display().to_string(),
                reason: format!("{:#}", e),
            })?
            .ok_or_else(|| LedgerError::Locked(path.display().to_string()))?;

        let mut state = Self::load(path)?;
        let opened_at = chrono::Utc::now().timestamp();
        let file = LedgerFile {
            path: path.to_path_buf(),
            replay_window,
            opened_at,
            saved: Mutex::new(0),
            _lock: lock,
        };

        let removed = state.compact(file.cutoff(opened_at));
        tracing::info!(
            path = %path.display(),
            entries = state.commits.len(),
            expired = removed,
            "Opened commit ledger"
        );
        if removed > 0 {
            file.save(&state)?;
        }

        Ok(Self {
            state: Mutex::new(state),
            file: Some(file),
        })
    }

    fn load(path: &Path) -> Result<LedgerState, LedgerError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "Ledger file not found, starting empty");
            return Ok(LedgerState::default());
        }

        let fail = |reason: String| LedgerError::LoadFailed {
            path: path.display().to_string(),
            reason,
        };
        let content = fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| fail(e.to_string()))
    }

    /// Record `hash` if it has not been seen
    ///
    /// Returns `Ok(true)` exactly once per distinct hash and `Ok(false)` for
    /// every later call. Only memory is updated; call [`flush`](Self::flush)
    /// or [`persist`](Self::persist) to write a persisted ledger.
    pub fn try_acquire(&self, hash: &str) -> Result<bool, LedgerError> {
        let mut state = self.state.lock().map_err(|_| LedgerError::LockPoisoned)?;

        if state.commits.contains_key(hash) {
            return Ok(false);
        }

        let now = chrono::Utc::now().timestamp();
        state.commits.insert(hash.to_string(), now);
        if let Some(file) = &self.file {
            state.compact(file.cutoff(now));
        }
        state.revision += 1;

        Ok(true)
    }

    /// Write the current set to the backing file, if anything changed
    ///
    /// Blocking. The state lock is held only to take a snapshot, so
    /// [`try_acquire`](Self::try_acquire) is never stalled by disk I/O.
    pub fn flush(&self) -> Result<(), LedgerError> {
        let Some(file) = &self.file else {
            return Ok(());
        };

        let mut saved = file.saved.lock().map_err(|_| LedgerError::LockPoisoned)?;
        let snapshot = self
            .state
            .lock()
            .map_err(|_| LedgerError::LockPoisoned)?
            .clone();
        if snapshot.revision == *saved {
            return Ok(());
        }

        file.save(&snapshot)?;
        *saved = snapshot.revision;
        Ok(())
    }

    /// [`flush`](Self::flush) on the blocking pool
    pub async fn persist(self: Arc<Self>) -> Result<(), LedgerError> {
        if !self.is_persistent() {
            return Ok(());
        }

        let path = self.path().map(|p| p.display().to_string()).unwrap_or_default();
        tokio::task::spawn_blocking(move || self.flush())
            .await
            .map_err(|e| LedgerError::SaveFailed {
                path,
                reason: e.to_string(),
            })?
    }

    /// Whether `hash` has been recorded
    pub fn contains(&self, hash: &str) -> bool {
        self.state
            .lock()
            .map(|state| state.commits.contains_key(hash))
            .unwrap_or(false)
    }

    /// Number of recorded hashes
    pub fn len(&self) -> usize {
        self.state.lock().map(|state| state.commits.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_persistent(&self) -> bool {
        self.file.is_some()
    }

    /// Backing file, if persisted
    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path.as_path())
    }
}

#[cfg(test)]
mod tests;
