/// Configuration system for agreement-sync
///
/// Supports loading from multiple sources with priority:
/// CLI args > Environment variables > Config file > Defaults
///
/// Secrets are never stored in the file: the record-store password and the
/// optional repository token are read from environment variables whose names
/// the file provides.
use crate::error::{ConfigError, SyncError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix shared by every environment override
pub const ENV_PREFIX: &str = "AGREEMENT_SYNC_";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Webhook listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Canonical repository to clone for each commit
    #[serde(default)]
    pub repository: RepositoryConfig,

    /// Remote record store (GraphQL endpoint and login)
    #[serde(default)]
    pub record_store: RecordStoreConfig,

    /// Object storage transfer settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// How record versions are derived from changed files
    #[serde(default)]
    pub artifact: ArtifactConfig,

    /// Worker pool sizing
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Processed-commit ledger
    #[serde(default)]
    pub ledger: LedgerConfig,
}

/// Webhook listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address for the HTTP listener
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Time allowed for in-flight commits to finish on shutdown
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

/// Canonical repository configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Clone source (ssh, https or local path)
    #[serde(default)]
    pub clone_url: String,

    /// Parent directory for working copies (system temp dir when unset)
    #[serde(default)]
    pub workdir_root: Option<PathBuf>,

    /// Prefix of each working copy directory name
    #[serde(default = "default_workdir_prefix")]
    pub workdir_prefix: String,

    /// Upper bound on clone + checkout
    #[serde(default = "default_clone_timeout")]
    pub clone_timeout_secs: u64,

    /// Private key for ssh clone URLs (ssh-agent is used when unset)
    #[serde(default)]
    pub ssh_key_path: Option<PathBuf>,

    /// Username for https clone URLs
    #[serde(default)]
    pub username: Option<String>,

    /// Name of the environment variable holding an https token
    #[serde(default)]
    pub token_env: Option<String>,
}

/// Remote record store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordStoreConfig {
    /// GraphQL endpoint
    #[serde(default = "default_record_store_endpoint")]
    pub endpoint: String,

    /// Login name
    #[serde(default)]
    pub username: String,

    /// Name of the environment variable holding the login password
    #[serde(default = "default_password_env")]
    pub password_env: String,

    /// How long a successful login is reused before logging in again
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// Timeout applied to every record-store request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Object storage transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Content type sent with every PUT
    #[serde(default = "default_content_type")]
    pub content_type: String,

    /// Timeout applied to every PUT
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout_secs: u64,

    /// Attempts for transfer and complete (1 disables retries)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between attempts, multiplied by the attempt number
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

/// Record version derivation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// First version handed to files `version_pattern` does not match;
    /// later ones take the next free version
    #[serde(default = "default_artifact_version")]
    pub default_version: i64,

    /// Regex with one capture group, applied to the changed file's path
    #[serde(default)]
    pub version_pattern: Option<String>,
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Commits that may wait for a worker before webhooks get 503
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Commits processed at the same time
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_commits: usize,
}

/// Processed-commit ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Ledger file path
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,

    /// Keep the ledger on disk across restarts
    #[serde(default = "default_persist")]
    pub persist: bool,

    /// How long a persisted commit hash is remembered
    #[serde(default = "default_replay_window")]
    pub replay_window_hours: u64,
}

// Default value functions
fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_workdir_prefix() -> String {
    "agreement-sync-".to_string()
}

fn default_clone_timeout() -> u64 {
    300
}

fn default_record_store_endpoint() -> String {
    "http://localhost:8081/query".to_string()
}

fn default_password_env() -> String {
    format!("{}PASSWORD", ENV_PREFIX)
}

fn default_session_ttl() -> u64 {
    3600
}

fn default_request_timeout() -> u64 {
    30
}

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

fn default_transfer_timeout() -> u64 {
    120
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    500
}

fn default_artifact_version() -> i64 {
    1
}

fn default_queue_capacity() -> usize {
    64
}

fn default_max_concurrent() -> usize {
    4
}

fn default_ledger_path() -> PathBuf {
    crate::paths::PlatformPaths::default_ledger_path()
}

fn default_persist() -> bool {
    true
}

fn default_replay_window() -> u64 {
    24
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            clone_url: String::new(),
            workdir_root: None,
            workdir_prefix: default_workdir_prefix(),
            clone_timeout_secs: default_clone_timeout(),
            ssh_key_path: None,
            username: None,
            token_env: None,
        }
    }
}

impl Default for RecordStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: default_record_store_endpoint(),
            username: String::new(),
            password_env: default_password_env(),
            session_ttl_secs: default_session_ttl(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            content_type: default_content_type(),
            transfer_timeout_secs: default_transfer_timeout(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            default_version: default_artifact_version(),
            version_pattern: None,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_concurrent_commits: default_max_concurrent(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
            persist: default_persist(),
            replay_window_hours: default_replay_window(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> Result<Self, SyncError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseFailed(format!("Invalid TOML: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from an explicit path, the default location, or defaults
    ///
    /// An explicit path that does not exist is an error; a missing default
    /// file is not.
    pub fn load(path: Option<&Path>) -> Result<Self, SyncError> {
        if let Some(path) = path {
            tracing::info!("Loading config from: {}", path.display());
            return Self::from_file(path);
        }

        let config_path = crate::paths::PlatformPaths::default_config_path();
        if config_path.exists() {
            tracing::info!("Loading config from: {}", config_path.display());
            Self::from_file(&config_path)
        } else {
            tracing::info!("No config file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.server.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(invalid(
                "server.listen",
                format!("not a socket address: '{}'", self.server.listen),
            ));
        }

        if self.repository.clone_url.trim().is_empty() {
            return Err(ConfigError::MissingRequired("repository.clone_url".to_string()).into());
        }

        if self.repository.clone_timeout_secs == 0 {
            return Err(invalid("repository.clone_timeout_secs", "must be greater than 0"));
        }

        if self.record_store.endpoint.trim().is_empty() {
            return Err(ConfigError::MissingRequired("record_store.endpoint".to_string()).into());
        }

        if self.record_store.username.trim().is_empty() {
            return Err(ConfigError::MissingRequired("record_store.username".to_string()).into());
        }

        if self.record_store.request_timeout_secs == 0 {
            return Err(invalid("record_store.request_timeout_secs", "must be greater than 0"));
        }

        if self.storage.transfer_timeout_secs == 0 {
            return Err(invalid("storage.transfer_timeout_secs", "must be greater than 0"));
        }

        if self.storage.max_attempts == 0 {
            return Err(invalid("storage.max_attempts", "must be at least 1"));
        }

        if let Some(pattern) = &self.artifact.version_pattern {
            let regex = Regex::new(pattern).map_err(|e| invalid("artifact.version_pattern", e))?;
            if regex.captures_len() < 2 {
                return Err(invalid(
                    "artifact.version_pattern",
                    "must contain a capture group for the version number",
                ));
            }
        }

        if self.dispatch.queue_capacity == 0 {
            return Err(invalid("dispatch.queue_capacity", "must be greater than 0"));
        }

        if self.dispatch.max_concurrent_commits == 0 {
            return Err(invalid("dispatch.max_concurrent_commits", "must be greater than 0"));
        }

        if self.ledger.persist && self.ledger.replay_window_hours == 0 {
            return Err(invalid("ledger.replay_window_hours", "must be greater than 0"));
        }

        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup (the process environment in production)
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(listen) = var("LISTEN") {
            self.server.listen = listen;
        }

        if let Some(url) = var("CLONE_URL") {
            self.repository.clone_url = url;
        }

        if let Some(endpoint) = var("RECORD_STORE_ENDPOINT") {
            self.record_store.endpoint = endpoint;
        }

        if let Some(username) = var("RECORD_STORE_USERNAME") {
            self.record_store.username = username;
        }

        if let Some(path) = var("LEDGER_PATH") {
            self.ledger.path = PathBuf::from(path);
        }

        if let Some(capacity) = var("QUEUE_CAPACITY")
            && let Ok(capacity) = capacity.parse()
        {
            self.dispatch.queue_capacity = capacity;
        }

        if let Some(workers) = var("MAX_CONCURRENT_COMMITS")
            && let Ok(workers) = workers.parse()
        {
            self.dispatch.max_concurrent_commits = workers;
        }

        if let Some(version) = var("ARTIFACT_VERSION")
            && let Ok(version) = version.parse()
        {
            self.artifact.default_version = version;
        }
    }

    /// Load, apply environment overrides and validate
    pub fn new(path: Option<&Path>) -> Result<Self, SyncError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Record-store password, read from the configured environment variable
    pub fn record_store_password(&self) -> Option<String> {
        std::env::var(&self.record_store.password_env)
            .ok()
            .filter(|p| !p.is_empty())
    }

    /// Repository https token, when a token variable is configured and set
    pub fn repository_token(&self) -> Option<String> {
        self.repository
            .token_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|t| !t.is_empty())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_grace_secs)
    }

    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.repository.clone_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.record_store.request_timeout_secs)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.storage.transfer_timeout_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.record_store.session_ttl_secs)
    }

    pub fn replay_window(&self) -> Duration {
        Duration::from_secs(self.ledger.replay_window_hours * 3600)
    }
}

fn invalid(key: &str, reason: impl ToString) -> SyncError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests;
