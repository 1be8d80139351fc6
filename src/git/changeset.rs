use super::fetcher::WorkingCopy;
use crate::error::DiffError;
use crate::types::ChangedFile;
use git2::{Delta, DiffOptions, Repository};
use std::path::{Path, PathBuf};

/// Files touched by one commit, split by what they are on disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Regular files, in diff order
    pub files: Vec<ChangedFile>,
    /// Paths that resolved to directories, submodules or nothing
    pub skipped: Vec<ChangedFile>,
}

impl ChangeSet {
    /// Number of paths the diff reported (deletions excluded)
    pub fn changed_paths(&self) -> usize {
        self.files.len() + self.skipped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Lists the paths a commit changed relative to its first parent
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeSetResolver;

impl ChangeSetResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve the uploadable files of `commit` inside `copy`
    #[tracing::instrument(skip(self, copy))]
    pub async fn resolve(&self, copy: &WorkingCopy, commit: &str) -> Result<ChangeSet, DiffError> {
        let root = copy.path().to_path_buf();
        let commit = commit.to_string();

        let change_set = tokio::task::spawn_blocking(move || {
            let paths = Self::changed_paths(&root, &commit)?;
            Ok::<_, DiffError>(Self::classify(&root, paths))
        })
        .await
        .map_err(|e| DiffError::Task(e.to_string()))??;

        for skipped in &change_set.skipped {
            tracing::debug!(
                path = %skipped.relative.display(),
                kind = ?skipped.kind,
                "Skipping path that is not a regular file"
            );
        }
        tracing::info!(
            files = change_set.files.len(),
            skipped = change_set.skipped.len(),
            "Resolved changed files"
        );
        Ok(change_set)
    }

    /// Name-only, recursive diff of `commit` against its first parent
    ///
    /// Root commits are diffed against the empty tree. Pure deletions are
    /// dropped since they have no content to upload.
    pub fn changed_paths(repo_root: &Path, commit: &str) -> Result<Vec<PathBuf>, DiffError> {
        let repo = Repository::open(repo_root).map_err(|e| DiffError::Open {
            path: repo_root.display().to_string(),
            reason: e.message().to_string(),
        })?;

        let target = repo
            .revparse_single(commit)
            .and_then(|object| object.peel_to_commit())
            .map_err(|e| DiffError::CommitNotFound {
                commit: commit.to_string(),
                reason: e.message().to_string(),
            })?;

        let diff_error = |e: git2::Error| DiffError::Diff {
            commit: commit.to_string(),
            reason: e.message().to_string(),
        };

        let tree = target.tree().map_err(diff_error)?;
        let parent_tree = if target.parent_count() > 0 {
            Some(target.parent(0).and_then(|p| p.tree()).map_err(diff_error)?)
        } else {
            None
        };

        let mut diff_opts = DiffOptions::new();
        diff_opts.include_typechange(true);

        let diff = repo
            .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut diff_opts))
            .map_err(diff_error)?;

        let paths = diff
            .deltas()
            .filter(|delta| delta.status() != Delta::Deleted)
            .filter_map(|delta| delta.new_file().path().map(Path::to_path_buf))
            .collect();

        Ok(paths)
    }

    /// Keep regular files, set aside everything else
    pub fn classify(root: &Path, paths: Vec<PathBuf>) -> ChangeSet {
        let (files, skipped) = paths
            .into_iter()
            .map(|relative| ChangedFile::classify(root, relative))
            .partition(ChangedFile::is_regular);

        ChangeSet { files, skipped }
    }
}
