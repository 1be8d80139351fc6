/// Platform-specific locations for configuration and persistent state
///
/// Uses the `dirs` crate for the platform base directories (XDG on Linux,
/// `~/Library/...` on macOS, `%APPDATA%` on Windows) and falls back to the
/// current directory when no home is available, e.g. in minimal containers.
use std::path::PathBuf;

/// Folder name used under every platform base directory
const APP_DIR: &str = "agreement-sync";

/// Platform-agnostic path utilities
pub struct PlatformPaths;

impl PlatformPaths {
    /// Directory for persistent state (the processed-commit ledger)
    ///
    /// Returns: {data_local_dir}/agreement-sync
    pub fn project_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }

    /// Directory holding `config.toml`
    ///
    /// Returns: {config_dir}/agreement-sync
    pub fn project_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }

    /// Default processed-commit ledger path
    ///
    /// Returns: {data_local_dir}/agreement-sync/processed_commits.json
    pub fn default_ledger_path() -> PathBuf {
        Self::project_data_dir().join("processed_commits.json")
    }

    /// Default config file path
    ///
    /// Returns: {config_dir}/agreement-sync/config.toml
    pub fn default_config_path() -> PathBuf {
        Self::project_config_dir().join("config.toml")
    }

    /// Lock file guarding a ledger against a second ingestor process
    ///
    /// Returns: `<ledger>.lock` next to the ledger file
    pub fn ledger_lock_path(ledger_path: &std::path::Path) -> PathBuf {
        let mut name = ledger_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "ledger".into());
        name.push(".lock");
        ledger_path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_default_paths_live_under_app_dir() {
        let ledger = PlatformPaths::default_ledger_path();
        assert!(ledger.ends_with("agreement-sync/processed_commits.json"));

        let config = PlatformPaths::default_config_path();
        assert!(config.ends_with("agreement-sync/config.toml"));
    }

    #[test]
    fn test_ledger_lock_path() {
        let lock = PlatformPaths::ledger_lock_path(Path::new("/var/lib/sync/commits.json"));
        assert_eq!(lock, PathBuf::from("/var/lib/sync/commits.json.lock"));
    }

    #[test]
    fn test_ledger_lock_path_relative() {
        let lock = PlatformPaths::ledger_lock_path(Path::new("ledger.json"));
        assert_eq!(lock, PathBuf::from("ledger.json.lock"));
    }
}
