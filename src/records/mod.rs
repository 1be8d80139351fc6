//! Artifact records and the server side of the upload protocol
//!
//! The record store owns each artifact's lifecycle
//! (`Pending -> Uploaded -> Available | Deprecated`). The pipeline only
//! triggers transitions through the upload protocol; [`LocalUploadService`]
//! is the reference implementation of that protocol over a [`RecordStore`].

mod service;

pub use service::{LocalUploadService, ServiceCredentials};

use crate::error::RecordError;
use crate::types::ArtifactStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// One artifact version as held by the record store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    pub version: i64,
    /// Base64 content submitted at initiate
    pub content: String,
    /// Canonical storage path (`eulas/{version}-{uuid}`)
    pub file_path: String,
    pub status: ArtifactStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Remote record interface
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create a record; versions are unique
    async fn create_artifact(
        &self,
        version: i64,
        content: String,
        file_path: String,
        status: ArtifactStatus,
    ) -> Result<ArtifactRecord, RecordError>;

    async fn find_artifact_by_version(&self, version: i64) -> Result<ArtifactRecord, RecordError>;

    /// Move a record to `status`, rejecting transitions the lifecycle forbids
    async fn update_artifact_status(
        &self,
        version: i64,
        status: ArtifactStatus,
    ) -> Result<ArtifactRecord, RecordError>;
}

/// Record store kept in process memory
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<i64, ArtifactRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create_artifact(
        &self,
        version: i64,
        content: String,
        file_path: String,
        status: ArtifactStatus,
    ) -> Result<ArtifactRecord, RecordError> {
        let mut records = self.records.write().await;
        if records.contains_key(&version) {
            return Err(RecordError::DuplicateVersion(version));
        }

        let now = Utc::now();
        let record = ArtifactRecord {
            version,
            content,
            file_path,
            status,
            created_at: now,
            updated_at: now,
        };
        records.insert(version, record.clone());
        Ok(record)
    }

    async fn find_artifact_by_version(&self, version: i64) -> Result<ArtifactRecord, RecordError> {
        self.records
            .read()
            .await
            .get(&version)
            .cloned()
            .ok_or(RecordError::NotFound(version))
    }

    async fn update_artifact_status(
        &self,
        version: i64,
        status: ArtifactStatus,
    ) -> Result<ArtifactRecord, RecordError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&version)
            .ok_or(RecordError::NotFound(version))?;

        if !record.status.can_transition_to(status) {
            return Err(RecordError::InvalidTransition {
                version,
                from: record.status,
                to: status,
            });
        }

        if record.status != status {
            record.status = status;
            record.updated_at = Utc::now();
        }
        Ok(record.clone())
    }
}
