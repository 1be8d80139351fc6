use crate::config::Config;
use crate::error::FetchError;
use crate::types::CommitRef;
use async_trait::async_trait;
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Cred, CredentialType, FetchOptions, RemoteCallbacks};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Credential prompts answered before the clone gives up
const MAX_CREDENTIAL_ATTEMPTS: u32 = 3;

/// Produces disposable working copies checked out at a commit
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, commit: &CommitRef) -> Result<WorkingCopy, FetchError>;
}

/// A clone of the canonical repository, checked out at one commit
///
/// The directory is removed when the value is dropped, on every exit path of
/// the owning task (including unwinding).
#[derive(Debug)]
pub struct WorkingCopy {
    dir: TempDir,
    commit: String,
}

impl WorkingCopy {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Full hash of the checked-out commit
    pub fn commit(&self) -> &str {
        &self.commit
    }

    /// Remove the directory now, logging (not returning) removal errors
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove working copy");
        } else {
            tracing::debug!(path = %path.display(), "Removed working copy");
        }
    }
}

/// Credentials offered to the remote during clone
#[derive(Clone, Default)]
pub struct GitCredentials {
    pub ssh_key_path: Option<PathBuf>,
    pub username: Option<String>,
    pub token: Option<String>,
}

impl std::fmt::Debug for GitCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitCredentials")
            .field("ssh_key_path", &self.ssh_key_path)
            .field("username", &self.username)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Everything the fetcher needs to produce a working copy
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub clone_url: String,
    pub workdir_root: Option<PathBuf>,
    pub workdir_prefix: String,
    pub clone_timeout: Duration,
    pub credentials: GitCredentials,
}

impl FetchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            clone_url: config.repository.clone_url.clone(),
            workdir_root: config.repository.workdir_root.clone(),
            workdir_prefix: config.repository.workdir_prefix.clone(),
            clone_timeout: config.clone_timeout(),
            credentials: GitCredentials {
                ssh_key_path: config.repository.ssh_key_path.clone(),
                username: config.repository.username.clone(),
                token: config.repository_token(),
            },
        }
    }
}

/// Full clone + detached checkout with libgit2
#[derive(Debug, Clone)]
pub struct GitFetcher {
    settings: Arc<FetchSettings>,
}

impl GitFetcher {
    pub fn new(settings: FetchSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    fn create_workdir(settings: &FetchSettings) -> Result<TempDir, FetchError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(&settings.workdir_prefix);

        let dir = match &settings.workdir_root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(|e| FetchError::WorkDir(e.to_string()))?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        };
        dir.map_err(|e| FetchError::WorkDir(e.to_string()))
    }

    /// Blocking part: clone into `dir`, then detach HEAD at `commit`
    fn clone_and_checkout(
        settings: &FetchSettings,
        dir: &Path,
        commit: &str,
    ) -> Result<String, FetchError> {
        let deadline = Instant::now() + settings.clone_timeout;
        let timed_out = || FetchError::Timeout {
            url: settings.clone_url.clone(),
            secs: settings.clone_timeout.as_secs(),
        };

        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(build_remote_callbacks(&settings.credentials, deadline));

        let repo = RepoBuilder::new()
            .fetch_options(fetch_options)
            .clone(&settings.clone_url, dir)
            .map_err(|e| {
                if Instant::now() >= deadline {
                    timed_out()
                } else {
                    FetchError::Clone {
                        url: settings.clone_url.clone(),
                        reason: e.message().to_string(),
                    }
                }
            })?;

        let checkout_error = |reason: String| FetchError::Checkout {
            commit: commit.to_string(),
            reason,
        };

        let target = repo
            .revparse_single(commit)
            .and_then(|object| object.peel_to_commit())
            .map_err(|e| checkout_error(e.message().to_string()))?;

        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        repo.checkout_tree(target.as_object(), Some(&mut checkout))
            .map_err(|e| checkout_error(e.message().to_string()))?;
        repo.set_head_detached(target.id())
            .map_err(|e| checkout_error(e.message().to_string()))?;

        if Instant::now() >= deadline {
            return Err(timed_out());
        }

        Ok(target.id().to_string())
    }
}

#[async_trait]
impl SourceFetcher for GitFetcher {
    #[tracing::instrument(skip(self), fields(commit = %commit.short_hash()))]
    async fn fetch(&self, commit: &CommitRef) -> Result<WorkingCopy, FetchError> {
        let settings = Arc::clone(&self.settings);
        let hash = commit.hash.clone();
        let started = Instant::now();

        // The TempDir moves into the blocking task so a failed or panicking
        // clone still removes the directory
        let dir = Self::create_workdir(&settings)?;
        tracing::debug!(path = %dir.path().display(), "Created working directory");

        let copy = tokio::task::spawn_blocking(move || {
            let full_hash = Self::clone_and_checkout(&settings, dir.path(), &hash)?;
            Ok::<_, FetchError>(WorkingCopy {
                dir,
                commit: full_hash,
            })
        })
        .await
        .map_err(|e| FetchError::Task(e.to_string()))??;

        tracing::info!(
            path = %copy.path().display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Checked out working copy"
        );
        Ok(copy)
    }
}

fn build_remote_callbacks(credentials: &GitCredentials, deadline: Instant) -> RemoteCallbacks<'static> {
    let credentials = credentials.clone();
    let mut attempts = 0;

    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, username_from_url, allowed| {
        attempts += 1;
        if attempts > MAX_CREDENTIAL_ATTEMPTS {
            return Err(git2::Error::from_str("remote rejected the offered credentials"));
        }

        if allowed.contains(CredentialType::SSH_KEY) {
            let user = username_from_url.unwrap_or("git");
            return match &credentials.ssh_key_path {
                Some(key) => Cred::ssh_key(user, None, key, None),
                None => Cred::ssh_key_from_agent(user),
            };
        }

        if allowed.contains(CredentialType::USER_PASS_PLAINTEXT)
            && let Some(token) = &credentials.token
        {
            let user = credentials
                .username
                .as_deref()
                .or(username_from_url)
                .unwrap_or("x-access-token");
            return Cred::userpass_plaintext(user, token);
        }

        Cred::default()
    });
    // Returning false aborts the transfer once the clone deadline passes
    callbacks.transfer_progress(move |_| Instant::now() < deadline);
    callbacks.sideband_progress(move |_| Instant::now() < deadline);
    callbacks
}

