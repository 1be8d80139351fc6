//! Repository access for the commit pipeline
//!
//! Materializes a disposable working copy at a commit and lists the files
//! that commit changed. Both use libgit2 on the blocking thread pool.

/// Changed-file resolution for a single commit
pub mod changeset;
/// Clone + checkout into a scoped temporary directory
pub mod fetcher;

pub use changeset::{ChangeSet, ChangeSetResolver};
pub use fetcher::{FetchSettings, GitCredentials, GitFetcher, SourceFetcher, WorkingCopy};
