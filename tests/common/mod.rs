//! Shared fixtures for the integration tests
#![allow(dead_code)]

use agreement_sync::git::{FetchSettings, GitCredentials, GitFetcher};
use agreement_sync::pipeline::CommitProcessor;
use agreement_sync::records::{LocalUploadService, MemoryRecordStore, ServiceCredentials};
use agreement_sync::storage::MemoryBucket;
use agreement_sync::upload::{Credentials, SessionManager, UploadOrchestrator, UploadSettings};
use git2::{Repository, Signature};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const USERNAME: &str = "publisher";
pub const PASSWORD: &str = "hunter2";

/// A local repository the fetcher clones from
pub struct FixtureRepo {
    pub dir: TempDir,
    repo: Repository,
}

impl FixtureRepo {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        Self { dir, repo }
    }

    pub fn url(&self) -> String {
        self.dir.path().display().to_string()
    }

    /// Commit `writes` and `removes` on HEAD; returns the full hash
    pub fn commit(&self, writes: &[(&str, &str)], removes: &[&str]) -> String {
        let mut index = self.repo.index().unwrap();
        for (path, content) in writes {
            let absolute = self.dir.path().join(path);
            if let Some(parent) = absolute.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(&absolute, content).unwrap();
            index.add_path(Path::new(path)).unwrap();
        }
        for path in removes {
            std::fs::remove_file(self.dir.path().join(path)).unwrap();
            index.remove_path(Path::new(path)).unwrap();
        }
        index.write().unwrap();

        let tree = self.repo.find_tree(index.write_tree().unwrap()).unwrap();
        let signature = Signature::now("Fixture", "fixture@example.org").unwrap();
        let parent = self.repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        self.repo
            .commit(Some("HEAD"), &signature, &signature, "fixture", &tree, &parents)
            .unwrap()
            .to_string()
    }
}

/// Everything a commit touches, wired in-process
pub struct Stack {
    pub processor: Arc<CommitProcessor>,
    pub records: Arc<MemoryRecordStore>,
    pub bucket: Arc<MemoryBucket>,
    pub service: Arc<LocalUploadService>,
    pub workdirs: TempDir,
}

pub fn stack(clone_url: String, version_pattern: Option<&str>) -> Stack {
    let records = Arc::new(MemoryRecordStore::new());
    let bucket = Arc::new(MemoryBucket::new("agreements", "https://cdn.example"));
    let service = Arc::new(LocalUploadService::new(
        records.clone(),
        bucket.clone(),
        ServiceCredentials {
            username: USERNAME.to_string(),
            password: PASSWORD.to_string(),
        },
    ));

    let settings = UploadSettings {
        version_pattern: version_pattern.map(|p| regex::Regex::new(p).unwrap()),
        retry_backoff: Duration::from_millis(1),
        ..UploadSettings::default()
    };
    let orchestrator = UploadOrchestrator::new(
        service.clone(),
        bucket.clone(),
        Arc::new(SessionManager::new(
            Credentials::new(USERNAME, PASSWORD),
            Duration::from_secs(600),
        )),
        settings,
    );

    let workdirs = TempDir::new().unwrap();
    let fetcher = GitFetcher::new(FetchSettings {
        clone_url,
        workdir_root: Some(workdirs.path().to_path_buf()),
        workdir_prefix: "agreement-sync-it-".to_string(),
        clone_timeout: Duration::from_secs(60),
        credentials: GitCredentials::default(),
    });

    Stack {
        processor: Arc::new(CommitProcessor::new(
            Arc::new(fetcher),
            Arc::new(orchestrator),
        )),
        records,
        bucket,
        service,
        workdirs,
    }
}

/// Poll `check` until it holds or five seconds pass
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}
