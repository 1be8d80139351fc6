use crate::error::{PayloadError, UploadStep};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Repository push notification as delivered to `POST /webhook`
///
/// Only the fields the pipeline consumes are modelled; everything else in the
/// notifier's body is ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushEvent {
    pub push: Push,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Push {
    pub changes: Vec<Change>,
}

/// One ref update inside a push
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Change {
    pub new: ChangeState,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeState {
    pub target: Target,
    pub links: ChangeLinks,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Target {
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeLinks {
    pub commits: Link,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Link {
    pub href: String,
}

impl PushEvent {
    /// Parse a raw webhook body
    ///
    /// Missing fields or fields of the wrong shape are rejected, as are commit
    /// hashes that are not plain hexadecimal (they are later handed to git as
    /// revisions).
    pub fn from_slice(body: &[u8]) -> Result<Self, PayloadError> {
        let event: PushEvent = serde_json::from_slice(body).map_err(|e| {
            if e.is_data() {
                PayloadError::Malformed(e.to_string())
            } else {
                PayloadError::InvalidJson(e.to_string())
            }
        })?;

        for change in &event.push.changes {
            validate_commit_hash(&change.new.target.hash)?;
        }

        Ok(event)
    }

    /// The commits announced by this push, in delivery order
    ///
    /// Hashes are lowercased so one commit always maps to one ledger key.
    pub fn commits(&self) -> Vec<CommitRef> {
        self.push
            .changes
            .iter()
            .map(|change| CommitRef {
                hash: change.new.target.hash.to_ascii_lowercase(),
                commits_href: change.new.links.commits.href.clone(),
            })
            .collect()
    }
}

/// Check that a commit hash is 4-64 hexadecimal characters
pub fn validate_commit_hash(hash: &str) -> Result<(), PayloadError> {
    let valid_len = (4..=64).contains(&hash.len());
    if valid_len && hash.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(PayloadError::InvalidCommitHash(hash.to_string()))
    }
}

/// A commit accepted for processing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CommitRef {
    /// Full or abbreviated commit hash
    pub hash: String,
    /// Notifier endpoint listing the commit's changed files
    pub commits_href: String,
}

impl CommitRef {
    pub fn new(hash: impl Into<String>, commits_href: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            commits_href: commits_href.into(),
        }
    }

    /// First 12 characters of the hash, for log lines
    pub fn short_hash(&self) -> &str {
        &self.hash[..self.hash.len().min(12)]
    }
}

impl fmt::Display for CommitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hash)
    }
}

/// What a changed path resolves to inside a working copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Regular,
    /// Directory, submodule or symlink
    NonFile,
    Missing,
}

/// A path touched by a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    /// Path relative to the repository root, as reported by the diff
    pub relative: PathBuf,
    /// `relative` joined onto the working copy root
    pub absolute: PathBuf,
    pub kind: FileKind,
}

impl ChangedFile {
    /// Resolve `relative` inside `root` and classify what is on disk
    pub fn classify(root: &Path, relative: impl Into<PathBuf>) -> Self {
        let relative = relative.into();
        let absolute = root.join(&relative);
        // Symlinks are not followed: their target may lie outside the checkout
        let kind = match std::fs::symlink_metadata(&absolute) {
            Ok(meta) if meta.file_type().is_file() => FileKind::Regular,
            Ok(_) => FileKind::NonFile,
            Err(_) => FileKind::Missing,
        };
        Self {
            relative,
            absolute,
            kind,
        }
    }

    pub fn is_regular(&self) -> bool {
        self.kind == FileKind::Regular
    }
}

/// Time-limited write target issued by the record store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadSlot {
    /// Signed PUT endpoint
    pub url: String,
    /// Canonical storage path of the object
    pub file_path: String,
    /// Content type the signed URL was issued for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Lifecycle of an artifact as held by the record store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactStatus {
    #[serde(alias = "Pending", alias = "pending")]
    Pending,
    #[serde(alias = "Uploaded", alias = "uploaded")]
    Uploaded,
    #[serde(alias = "Available", alias = "available")]
    Available,
    #[serde(alias = "Deprecated", alias = "deprecated")]
    Deprecated,
}

impl ArtifactStatus {
    /// Whether the record store accepts a move from `self` to `next`
    ///
    /// Re-applying the current status is allowed so completion and
    /// availability toggles are idempotent.
    pub fn can_transition_to(self, next: ArtifactStatus) -> bool {
        use ArtifactStatus::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Uploaded)
                | (Uploaded, Available)
                | (Uploaded, Deprecated)
                | (Available, Deprecated)
                | (Deprecated, Available)
        )
    }
}

impl fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArtifactStatus::Pending => "pending",
            ArtifactStatus::Uploaded => "uploaded",
            ArtifactStatus::Available => "available",
            ArtifactStatus::Deprecated => "deprecated",
        };
        f.write_str(name)
    }
}

/// Result of the complete step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompletedUpload {
    pub version: i64,
    pub public_url: String,
    pub status: ArtifactStatus,
}

/// Answer to the login operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoginOutcome {
    pub is_authenticated: bool,
    #[serde(default)]
    pub message: String,
}

/// One file that made it through initiate, transfer and complete
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadedFile {
    pub path: String,
    pub storage_path: String,
    pub version: i64,
    pub public_url: String,
    pub status: ArtifactStatus,
}

/// One file whose upload sequence stopped early
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailedFile {
    pub path: String,
    pub step: UploadStep,
    pub error: String,
}

/// Per-file outcomes of one orchestrator run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadSummary {
    pub uploaded: Vec<UploadedFile>,
    pub failed: Vec<FailedFile>,
}

impl UploadSummary {
    /// Number of files the orchestrator attempted
    pub fn attempted(&self) -> usize {
        self.uploaded.len() + self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Terminal report of one commit task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitReport {
    pub commit: String,
    /// Paths the diff reported, before filtering
    pub changed_paths: usize,
    /// Paths dropped because they are not regular files in the working copy
    pub skipped: Vec<String>,
    pub uploads: UploadSummary,
    pub duration_ms: u64,
}
