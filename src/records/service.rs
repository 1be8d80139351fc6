use super::{ArtifactRecord, RecordStore};
use crate::error::{ApiError, RecordError};
use crate::storage::SignedUrlIssuer;
use crate::types::{ArtifactStatus, CompletedUpload, LoginOutcome, UploadSlot};
use crate::upload::UploadApi;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Write URLs stay valid this long after initiate
pub const SIGNED_URL_VALIDITY: Duration = Duration::from_secs(3600);

/// Content type every signed URL is issued for
pub const UPLOAD_CONTENT_TYPE: &str = "application/octet-stream";

/// The single account the local service accepts
#[derive(Clone)]
pub struct ServiceCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for ServiceCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// In-process implementation of the upload protocol
///
/// initiate stores a `Pending` record under `eulas/{version}-{uuid}` and
/// hands out a one-hour signed PUT URL; complete moves the record to
/// `Uploaded` and returns its public URL. Completing an already completed
/// version returns the same answer again.
pub struct LocalUploadService {
    records: Arc<dyn RecordStore>,
    issuer: Arc<dyn SignedUrlIssuer>,
    credentials: ServiceCredentials,
    authenticated: AtomicBool,
}

impl LocalUploadService {
    pub fn new(
        records: Arc<dyn RecordStore>,
        issuer: Arc<dyn SignedUrlIssuer>,
        credentials: ServiceCredentials,
    ) -> Self {
        Self {
            records,
            issuer,
            credentials,
            authenticated: AtomicBool::new(false),
        }
    }

    /// Drop the current login, as a server restart or session expiry would
    pub fn revoke_sessions(&self) {
        self.authenticated.store(false, Ordering::SeqCst);
    }

    /// Toggle an uploaded artifact between `Available` and `Deprecated`
    pub async fn set_availability(
        &self,
        version: i64,
        available: bool,
    ) -> Result<ArtifactRecord, RecordError> {
        let status = if available {
            ArtifactStatus::Available
        } else {
            ArtifactStatus::Deprecated
        };
        let record = self.records.update_artifact_status(version, status).await?;
        tracing::info!(version, status = %record.status, "Artifact availability changed");
        Ok(record)
    }

    fn require_login(&self) -> Result<(), ApiError> {
        if self.authenticated.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ApiError::Unauthenticated("access denied".to_string()))
        }
    }

    fn completed(&self, record: &ArtifactRecord) -> CompletedUpload {
        CompletedUpload {
            version: record.version,
            public_url: self.issuer.public_url(&record.file_path),
            status: record.status,
        }
    }
}

fn record_error(e: RecordError) -> ApiError {
    match e {
        RecordError::Unavailable(reason) => ApiError::Transport(reason),
        other => ApiError::Rejected(other.to_string()),
    }
}

#[async_trait]
impl UploadApi for LocalUploadService {
    async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, ApiError> {
        let ok = username == self.credentials.username && password == self.credentials.password;
        self.authenticated.store(ok, Ordering::SeqCst);

        Ok(LoginOutcome {
            is_authenticated: ok,
            message: if ok {
                "Login successful".to_string()
            } else {
                "invalid username or password".to_string()
            },
        })
    }

    async fn initiate_upload(&self, version: i64, content: &str) -> Result<UploadSlot, ApiError> {
        self.require_login()?;

        let file_path = format!("eulas/{}-{}", version, uuid::Uuid::new_v4());
        let url = self
            .issuer
            .signed_put_url(&file_path, UPLOAD_CONTENT_TYPE, SIGNED_URL_VALIDITY)
            .map_err(record_error)?;

        let record = self
            .records
            .create_artifact(
                version,
                content.to_string(),
                file_path,
                ArtifactStatus::Pending,
            )
            .await
            .map_err(record_error)?;

        tracing::debug!(version, file_path = %record.file_path, "Issued upload slot");
        Ok(UploadSlot {
            url,
            file_path: record.file_path,
            content_type: Some(UPLOAD_CONTENT_TYPE.to_string()),
        })
    }

    async fn complete_upload(&self, version: i64) -> Result<CompletedUpload, ApiError> {
        self.require_login()?;

        let record = self
            .records
            .find_artifact_by_version(version)
            .await
            .map_err(record_error)?;

        let record = match record.status {
            ArtifactStatus::Pending => self
                .records
                .update_artifact_status(version, ArtifactStatus::Uploaded)
                .await
                .map_err(record_error)?,
            // Already past Pending: repeat the earlier answer
            _ => record,
        };

        Ok(self.completed(&record))
    }
}
