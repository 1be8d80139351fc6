/// Centralized error types for agreement-sync using thiserror
///
/// Every stage of the webhook -> fetch -> diff -> upload pipeline has its own
/// error enum so logs and reports can say exactly which step failed.
use thiserror::Error;

/// Main error type for the sync pipeline
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Diff error: {0}")]
    Diff(#[from] DiffError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Malformed webhook bodies. Always answered with 400 and never dispatched.
#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("Invalid JSON payload: {0}")]
    InvalidJson(String),

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Invalid commit hash '{0}': expected 4-64 hexadecimal characters")]
    InvalidCommitHash(String),
}

/// Failures materializing a working copy
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Failed to create working directory: {0}")]
    WorkDir(String),

    #[error("Failed to clone '{url}': {reason}")]
    Clone { url: String, reason: String },

    #[error("Failed to check out commit {commit}: {reason}")]
    Checkout { commit: String, reason: String },

    #[error("Clone of '{url}' exceeded {secs} seconds")]
    Timeout { url: String, secs: u64 },

    #[error("Fetch task failed: {0}")]
    Task(String),
}

/// Failures listing the files touched by a commit
#[derive(Error, Debug)]
pub enum DiffError {
    #[error("Failed to open working copy at '{path}': {reason}")]
    Open { path: String, reason: String },

    #[error("Commit {commit} not found in working copy: {reason}")]
    CommitNotFound { commit: String, reason: String },

    #[error("Failed to diff commit {commit}: {reason}")]
    Diff { commit: String, reason: String },

    #[error("Diff task failed: {0}")]
    Task(String),
}

/// Errors reported by the remote upload protocol
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("not authenticated: {0}")]
    Unauthenticated(String),

    #[error("rejected by record store: {0}")]
    Rejected(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Authentication against the record store failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("authentication failed: {0}")]
    Rejected(String),

    #[error("login request failed: {0}")]
    Api(#[from] ApiError),

    #[error("credential '{0}' is not set")]
    MissingCredential(String),
}

/// The record store refused to issue an upload slot
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InitiateError {
    #[error("{0}")]
    Auth(#[from] AuthError),

    #[error("initiate for version {version} failed: {source}")]
    Api { version: i64, source: ApiError },
}

/// Object storage PUT failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("storage returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transfer request failed: {0}")]
    Transport(String),

    #[error("upload slot rejected: {0}")]
    InvalidSlot(String),
}

/// The record store could not finalize the artifact
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompleteError {
    #[error("{0}")]
    Auth(#[from] AuthError),

    #[error("complete for version {version} failed: {source}")]
    Api { version: i64, source: ApiError },
}

/// The step of the per-file upload sequence that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStep {
    Read,
    Initiate,
    Transfer,
    Complete,
}

impl std::fmt::Display for UploadStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UploadStep::Read => "read",
            UploadStep::Initiate => "initiate",
            UploadStep::Transfer => "transfer",
            UploadStep::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// A single file's upload sequence failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("Failed to read '{path}': {reason}")]
    Read { path: String, reason: String },

    #[error("Initiate failed: {0}")]
    Initiate(#[from] InitiateError),

    #[error("Transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("Complete failed: {0}")]
    Complete(#[from] CompleteError),
}

impl UploadError {
    /// Which protocol step this failure belongs to
    pub fn step(&self) -> UploadStep {
        match self {
            UploadError::Read { .. } => UploadStep::Read,
            UploadError::Initiate(_) => UploadStep::Initiate,
            UploadError::Transfer(_) => UploadStep::Transfer,
            UploadError::Complete(_) => UploadStep::Complete,
        }
    }
}

/// Errors related to configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration file: {0}")]
    LoadFailed(String),

    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

/// Errors from the processed-commit ledger
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Failed to load ledger from '{path}': {reason}")]
    LoadFailed { path: String, reason: String },

    #[error("Failed to save ledger to '{path}': {reason}")]
    SaveFailed { path: String, reason: String },

    #[error("Ledger '{0}' is locked by another process")]
    Locked(String),

    #[error("Ledger lock was poisoned")]
    LockPoisoned,
}

/// Errors handing a commit to the worker pool
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Dispatch queue is full")]
    QueueFull,

    #[error("Dispatcher is shutting down")]
    Closed,
}

/// Errors from a record store implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("artifact version {0} already exists")]
    DuplicateVersion(i64),

    #[error("artifact version {0} not found")]
    NotFound(i64),

    #[error("invalid status transition for version {version}: {from:?} -> {to:?}")]
    InvalidTransition {
        version: i64,
        from: crate::types::ArtifactStatus,
        to: crate::types::ArtifactStatus,
    },

    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

// Conversion from anyhow::Error to SyncError
impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        SyncError::Other(format!("{:#}", err))
    }
}

impl SyncError {
    /// Create a new error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        SyncError::Other(msg.into())
    }

    /// Check if this is caused by bad caller input (answered with 4xx)
    pub fn is_user_error(&self) -> bool {
        matches!(self, SyncError::Payload(_))
    }

    /// Check if the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Dispatch(DispatchError::QueueFull)
                | SyncError::Fetch(FetchError::Timeout { .. })
                | SyncError::Io(_)
        )
    }
}

impl ApiError {
    /// Transport failures and timeouts may succeed on a second attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transport(_))
    }

    /// The record store already holds an artifact for the requested version
    pub fn is_conflict(&self) -> bool {
        match self {
            ApiError::Rejected(message) => {
                let message = message.to_ascii_lowercase();
                message.contains("already exists") || message.contains("duplicate")
            }
            _ => false,
        }
    }
}

impl TransferError {
    /// Server errors and connection failures are worth retrying; 4xx are not
    pub fn is_transient(&self) -> bool {
        match self {
            TransferError::Status { status, .. } => *status >= 500 || *status == 429,
            TransferError::Transport(_) => true,
            TransferError::InvalidSlot(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::Payload(PayloadError::Malformed("push.changes".to_string()));
        assert_eq!(
            err.to_string(),
            "Payload error: Malformed payload: push.changes"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let sync_err: SyncError = io_err.into();
        assert!(matches!(sync_err, SyncError::Io(_)));
    }

    #[test]
    fn test_error_from_anyhow() {
        let anyhow_err = anyhow::anyhow!("test error");
        let sync_err: SyncError = anyhow_err.into();
        assert!(matches!(sync_err, SyncError::Other(_)));
    }

    #[test]
    fn test_is_user_error() {
        let user_err = SyncError::Payload(PayloadError::InvalidCommitHash("zz".to_string()));
        assert!(user_err.is_user_error());

        let system_err = SyncError::Fetch(FetchError::WorkDir("disk full".to_string()));
        assert!(!system_err.is_user_error());
    }

    #[test]
    fn test_is_retryable() {
        assert!(SyncError::Dispatch(DispatchError::QueueFull).is_retryable());
        assert!(!SyncError::Dispatch(DispatchError::Closed).is_retryable());
    }

    #[test]
    fn test_upload_error_step() {
        let read = UploadError::Read {
            path: "README.md".to_string(),
            reason: "gone".to_string(),
        };
        assert_eq!(read.step(), UploadStep::Read);

        let transfer: UploadError = TransferError::Status {
            status: 403,
            body: "SignatureDoesNotMatch".to_string(),
        }
        .into();
        assert_eq!(transfer.step(), UploadStep::Transfer);
        assert_eq!(
            transfer.to_string(),
            "Transfer failed: storage returned status 403: SignatureDoesNotMatch"
        );

        let complete: UploadError = CompleteError::Api {
            version: 2,
            source: ApiError::Transport("timed out".to_string()),
        }
        .into();
        assert_eq!(complete.step(), UploadStep::Complete);
    }

    #[test]
    fn test_auth_error_reports_server_message() {
        let err: UploadError =
            InitiateError::Auth(AuthError::Rejected("invalid password".to_string())).into();
        assert_eq!(err.step(), UploadStep::Initiate);
        assert!(err.to_string().contains("invalid password"));
    }

    #[test]
    fn test_api_conflict() {
        let taken = ApiError::Rejected(RecordError::DuplicateVersion(3).to_string());
        assert!(taken.is_conflict());
        assert!(ApiError::Rejected("Duplicate key".to_string()).is_conflict());
        assert!(!ApiError::Rejected("record not found".to_string()).is_conflict());
        assert!(!ApiError::Transport("already exists".to_string()).is_conflict());
    }

    #[test]
    fn test_transfer_transient() {
        let server = TransferError::Status {
            status: 503,
            body: String::new(),
        };
        assert!(server.is_transient());

        let client = TransferError::Status {
            status: 403,
            body: String::new(),
        };
        assert!(!client.is_transient());
        assert!(TransferError::Transport("reset".to_string()).is_transient());
    }

    #[test]
    fn test_upload_step_display() {
        assert_eq!(UploadStep::Initiate.to_string(), "initiate");
        assert_eq!(
            serde_json::to_string(&UploadStep::Complete).unwrap(),
            "\"complete\""
        );
    }

    #[test]
    fn test_config_error_invalid_value() {
        let err = ConfigError::InvalidValue {
            key: "dispatch.queue_capacity".to_string(),
            reason: "must be greater than 0".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid configuration value for 'dispatch.queue_capacity': must be greater than 0"
        );
    }

    #[test]
    fn test_sync_error_other() {
        let err = SyncError::other("custom error message");
        assert_eq!(err.to_string(), "custom error message");
    }
}
