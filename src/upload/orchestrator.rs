use super::api::UploadApi;
use super::session::SessionManager;
use crate::config::Config;
use crate::error::{
    ApiError, CompleteError, InitiateError, SyncError, TransferError, UploadError,
};
use crate::storage::ObjectStore;
use crate::types::{
    ArtifactStatus, ChangedFile, CompletedUpload, FailedFile, UploadSlot, UploadSummary,
    UploadedFile,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Knobs for the per-file protocol
#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub content_type: String,
    /// Attempts for transfer and complete
    pub max_attempts: u32,
    /// Multiplied by the attempt number between attempts
    pub retry_backoff: Duration,
    pub default_version: i64,
    /// One capture group, matched against the file's relative path
    pub version_pattern: Option<Regex>,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            content_type: "application/octet-stream".to_string(),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            default_version: 1,
            version_pattern: None,
        }
    }
}

impl UploadSettings {
    pub fn from_config(config: &Config) -> Result<Self, SyncError> {
        let version_pattern = config
            .artifact
            .version_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| SyncError::other(format!("artifact.version_pattern: {}", e)))?;

        Ok(Self {
            content_type: config.storage.content_type.clone(),
            max_attempts: config.storage.max_attempts.max(1),
            retry_backoff: Duration::from_millis(config.storage.retry_backoff_ms),
            default_version: config.artifact.default_version,
            version_pattern,
        })
    }

    /// Record version named by the file's path, if the pattern matches
    ///
    /// Files without a match draw from the fallback sequence that starts at
    /// `default_version`.
    pub fn pattern_version(&self, relative: &Path) -> Option<i64> {
        let path = relative.to_string_lossy();
        self.version_pattern
            .as_ref()
            .and_then(|pattern| pattern.captures(&path))
            .and_then(|captures| captures.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }
}

/// Versions tried for one unmatched file before giving up
const MAX_FALLBACK_VERSIONS: i64 = 256;

/// Drives initiate -> transfer -> complete for each changed file
pub struct UploadOrchestrator {
    api: Arc<dyn UploadApi>,
    store: Arc<dyn ObjectStore>,
    session: Arc<SessionManager>,
    settings: UploadSettings,
    /// Next version handed to a file without a pattern match
    next_fallback: Mutex<i64>,
}

impl UploadOrchestrator {
    pub fn new(
        api: Arc<dyn UploadApi>,
        store: Arc<dyn ObjectStore>,
        session: Arc<SessionManager>,
        settings: UploadSettings,
    ) -> Self {
        Self {
            api,
            store,
            session,
            next_fallback: Mutex::new(settings.default_version),
            settings,
        }
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    /// Upload every file in order
    ///
    /// A failure stops only that file; the remaining files are still
    /// attempted and every outcome lands in the summary.
    pub async fn process(&self, commit: &str, files: &[ChangedFile]) -> UploadSummary {
        let mut summary = UploadSummary::default();

        for file in files {
            let path = file.relative.display().to_string();
            match self.upload_file(commit, file).await {
                Ok(uploaded) => summary.uploaded.push(uploaded),
                Err(e) => {
                    tracing::warn!(
                        commit,
                        path = %path,
                        step = %e.step(),
                        error = %e,
                        "File upload failed"
                    );
                    summary.failed.push(FailedFile {
                        path,
                        step: e.step(),
                        error: e.to_string(),
                    });
                }
            }
        }

        summary
    }

    #[tracing::instrument(skip(self, file), fields(path = %file.relative.display()))]
    async fn upload_file(&self, commit: &str, file: &ChangedFile) -> Result<UploadedFile, UploadError> {
        let bytes = tokio::fs::read(&file.absolute)
            .await
            .map_err(|e| UploadError::Read {
                path: file.relative.display().to_string(),
                reason: e.to_string(),
            })?;
        let content = STANDARD.encode(&bytes);

        let (version, slot) = match self.settings.pattern_version(&file.relative) {
            Some(version) => (version, self.initiate(version, &content).await?),
            None => self.initiate_fallback(&content).await?,
        };
        tracing::debug!(
            version,
            file_path = %slot.file_path,
            status = %ArtifactStatus::Pending,
            "Upload slot issued"
        );

        let size = bytes.len();
        self.transfer(&slot, bytes).await?;
        tracing::debug!(version, bytes = size, "Transfer finished");

        let done = self.complete(version).await?;
        tracing::info!(
            version,
            status = %done.status,
            public_url = %done.public_url,
            "File uploaded"
        );

        Ok(UploadedFile {
            path: file.relative.display().to_string(),
            storage_path: slot.file_path,
            version: done.version,
            public_url: done.public_url,
            status: done.status,
        })
    }

    /// Not retried: a second initiate would collide on the version
    async fn initiate(&self, version: i64, content: &str) -> Result<UploadSlot, InitiateError> {
        let api_error = |source: ApiError| InitiateError::Api { version, source };
        let ticket = self.session.ensure(self.api.as_ref()).await?;

        match self.api.initiate_upload(version, content).await {
            Err(ApiError::Unauthenticated(message)) => {
                tracing::info!(%message, "Session rejected during initiate, logging in again");
                self.session.invalidate(ticket).await;
                self.session.ensure(self.api.as_ref()).await?;
                self.api
                    .initiate_upload(version, content)
                    .await
                    .map_err(api_error)
            }
            other => other.map_err(api_error),
        }
    }

    /// Initiate at the next free fallback version
    ///
    /// Versions the record store reports as taken are skipped. The sequence
    /// stays locked until a slot is issued.
    async fn initiate_fallback(&self, content: &str) -> Result<(i64, UploadSlot), InitiateError> {
        let mut next = self.next_fallback.lock().await;
        let first = *next;

        loop {
            let version = *next;
            match self.initiate(version, content).await {
                Ok(slot) => {
                    *next = version + 1;
                    return Ok((version, slot));
                }
                Err(InitiateError::Api { ref source, .. })
                    if source.is_conflict() && version - first + 1 < MAX_FALLBACK_VERSIONS =>
                {
                    tracing::debug!(version, "Version already taken, trying the next one");
                    *next = version + 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn transfer(&self, slot: &UploadSlot, body: Vec<u8>) -> Result<(), TransferError> {
        // The signed URL is bound to the type it was issued for
        let content_type = slot
            .content_type
            .as_deref()
            .unwrap_or(&self.settings.content_type);

        let mut attempt = 1;
        loop {
            let result = self.store.put(&slot.url, body.clone(), content_type).await;

            match result {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.settings.max_attempts => {
                    tracing::debug!(attempt, error = %e, "Transfer failed, retrying");
                    tokio::time::sleep(self.settings.retry_backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn complete(&self, version: i64) -> Result<CompletedUpload, CompleteError> {
        let mut attempt = 1;
        let mut relogged = false;
        loop {
            let ticket = self.session.ensure(self.api.as_ref()).await?;

            match self.api.complete_upload(version).await {
                Ok(done) => return Ok(done),
                Err(ApiError::Unauthenticated(message)) if !relogged => {
                    tracing::info!(%message, "Session rejected during complete, logging in again");
                    self.session.invalidate(ticket).await;
                    relogged = true;
                }
                Err(e) if e.is_transient() && attempt < self.settings.max_attempts => {
                    tracing::debug!(attempt, error = %e, "Complete failed, retrying");
                    tokio::time::sleep(self.settings.retry_backoff * attempt).await;
                    attempt += 1;
                }
                Err(source) => return Err(CompleteError::Api { version, source }),
            }
        }
    }
}

