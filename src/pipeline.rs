//! One commit, end to end: fetch -> diff -> upload
//!
//! The working copy lives exactly as long as [`CommitProcessor::handle`];
//! it is removed before the report is returned, whatever the outcome.

use crate::error::SyncError;
use crate::git::{ChangeSetResolver, SourceFetcher};
use crate::types::{CommitReport, CommitRef};
use crate::upload::UploadOrchestrator;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// Processes one accepted commit
#[async_trait]
pub trait CommitHandler: Send + Sync {
    async fn handle(&self, commit: CommitRef) -> Result<CommitReport, SyncError>;
}

/// The production handler
pub struct CommitProcessor {
    fetcher: Arc<dyn SourceFetcher>,
    resolver: ChangeSetResolver,
    orchestrator: Arc<UploadOrchestrator>,
}

impl CommitProcessor {
    pub fn new(fetcher: Arc<dyn SourceFetcher>, orchestrator: Arc<UploadOrchestrator>) -> Self {
        Self {
            fetcher,
            resolver: ChangeSetResolver::new(),
            orchestrator,
        }
    }
}

#[async_trait]
impl CommitHandler for CommitProcessor {
    #[tracing::instrument(skip(self, commit), fields(commit = %commit.short_hash()))]
    async fn handle(&self, commit: CommitRef) -> Result<CommitReport, SyncError> {
        let started = Instant::now();

        let copy = self.fetcher.fetch(&commit).await?;

        let change_set = match self.resolver.resolve(&copy, copy.commit()).await {
            Ok(change_set) => change_set,
            Err(e) => {
                copy.close();
                return Err(e.into());
            }
        };

        let uploads = self
            .orchestrator
            .process(&commit.hash, &change_set.files)
            .await;
        copy.close();

        Ok(CommitReport {
            commit: commit.hash,
            changed_paths: change_set.changed_paths(),
            skipped: change_set
                .skipped
                .iter()
                .map(|f| f.relative.display().to_string())
                .collect(),
            uploads,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}
