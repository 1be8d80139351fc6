//! # Agreement Sync - Push-Driven Artifact Publisher
//!
//! A webhook service that watches a repository of agreement documents and
//! publishes every file changed by a pushed commit to an upload service.
//!
//! ## Overview
//!
//! A push notification names one or more commits. Each commit is accepted at
//! most once, queued on a bounded worker pool, and processed in the
//! background: the repository is cloned into a throwaway working copy, the
//! commit is diffed against its first parent, and every changed regular file
//! goes through the three-step upload (initiate, transfer, complete). A
//! failure on one file never stops the others.
//!
//! ## Architecture
//!
//! ```text
//!  push notifier
//!       │ POST /webhook
//! ┌─────▼──────┐   ┌──────────────┐
//! │   server   ├──►│ CommitLedger │  (dedup, optional JSON file)
//! └─────┬──────┘   └──────────────┘
//!       │ DispatchPermit
//! ┌─────▼──────┐
//! │ Dispatcher │  (bounded queue + worker limit)
//! └─────┬──────┘
//!       │ CommitHandler
//! ┌─────▼───────────┐   ┌──────────────┐   ┌───────────────────┐
//! │ CommitProcessor ├──►│ GitFetcher   ├──►│ ChangeSetResolver │
//! └─────┬───────────┘   └──────────────┘   └───────────────────┘
//!       │
//! ┌─────▼───────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ UploadOrchestrator  ├──►│ UploadApi   │   │ ObjectStore  │
//! └─────────────────────┘   └─────────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`server`]: axum routes for the webhook and health check
//! - [`ledger`]: processed-commit set with optional persistence
//! - [`dispatch`]: bounded background worker pool
//! - [`pipeline`]: fetch, diff and upload for one commit
//! - [`git`]: working-copy checkout and changed-file resolution
//! - [`upload`]: upload client, session handling and per-file orchestration
//! - [`storage`]: signed-URL object storage
//! - [`records`]: artifact records and an in-process upload service
//! - [`config`]: TOML configuration with environment overrides
//! - [`types`]: payload and report types
//! - [`error`]: error types
//! - [`paths`]: platform default locations

/// Configuration management with environment variable overrides
pub mod config;

/// Bounded worker pool for accepted commits
pub mod dispatch;

/// Error types and utilities
pub mod error;

/// Working-copy checkout and per-commit change sets
pub mod git;

/// Processed-commit ledger
pub mod ledger;

/// Platform default locations
pub mod paths;

/// Per-commit processing pipeline
pub mod pipeline;

/// Artifact records and the in-process upload service
pub mod records;

/// HTTP ingestor
pub mod server;

/// Object storage behind signed URLs
pub mod storage;

/// Webhook payload, upload and report types
pub mod types;

/// Upload client and orchestration
pub mod upload;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Commit the binary was built from, set by `build.rs`
pub const GIT_COMMIT: &str = env!("GIT_COMMIT_HASH");

/// UTC build time, set by `build.rs`
pub const BUILD_TIMESTAMP: &str = env!("BUILD_TIMESTAMP");
