use super::*;
use std::collections::HashMap;
use tempfile::NamedTempFile;

fn valid_config() -> Config {
    let mut config = Config::default();
    config.repository.clone_url = "git@example.org:acme/agreement.git".to_string();
    config.record_store.username = "uploader".to_string();
    config
}

fn assert_invalid(config: &Config, key: &str) {
    match config.validate() {
        Err(SyncError::Config(ConfigError::InvalidValue { key: k, .. })) => assert_eq!(k, key),
        other => panic!("expected invalid '{}', got {:?}", key, other),
    }
}

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.server.listen, "0.0.0.0:8080");
    assert_eq!(config.record_store.endpoint, "http://localhost:8081/query");
    assert_eq!(config.record_store.password_env, "AGREEMENT_SYNC_PASSWORD");
    assert_eq!(config.storage.content_type, "application/octet-stream");
    assert_eq!(config.storage.max_attempts, 3);
    assert_eq!(config.artifact.default_version, 1);
    assert_eq!(config.dispatch.queue_capacity, 64);
    assert_eq!(config.ledger.replay_window_hours, 24);
    assert!(config.ledger.persist);
}

#[test]
fn test_validate_valid_config() {
    assert!(valid_config().validate().is_ok());
}

#[test]
fn test_validate_requires_clone_url() {
    let mut config = valid_config();
    config.repository.clone_url = "  ".to_string();
    assert!(matches!(
        config.validate(),
        Err(SyncError::Config(ConfigError::MissingRequired(_)))
    ));
}

#[test]
fn test_validate_requires_username() {
    let mut config = valid_config();
    config.record_store.username.clear();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("record_store.username"));
}

#[test]
fn test_validate_listen_address() {
    let mut config = valid_config();
    config.server.listen = "localhost".to_string();
    assert_invalid(&config, "server.listen");
}

#[test]
fn test_validate_zero_values() {
    let mut config = valid_config();
    config.dispatch.queue_capacity = 0;
    assert_invalid(&config, "dispatch.queue_capacity");

    let mut config = valid_config();
    config.dispatch.max_concurrent_commits = 0;
    assert_invalid(&config, "dispatch.max_concurrent_commits");

    let mut config = valid_config();
    config.storage.max_attempts = 0;
    assert_invalid(&config, "storage.max_attempts");

    let mut config = valid_config();
    config.repository.clone_timeout_secs = 0;
    assert_invalid(&config, "repository.clone_timeout_secs");
}

#[test]
fn test_validate_replay_window_only_when_persisted() {
    let mut config = valid_config();
    config.ledger.replay_window_hours = 0;
    assert_invalid(&config, "ledger.replay_window_hours");

    config.ledger.persist = false;
    assert!(config.validate().is_ok());
}

#[test]
fn test_validate_version_pattern() {
    let mut config = valid_config();
    config.artifact.version_pattern = Some(r"v(\d+)".to_string());
    assert!(config.validate().is_ok());

    config.artifact.version_pattern = Some(r"v\d+".to_string());
    assert_invalid(&config, "artifact.version_pattern");

    config.artifact.version_pattern = Some(r"v(\d+".to_string());
    assert_invalid(&config, "artifact.version_pattern");
}

#[test]
fn test_from_file() {
    let file = NamedTempFile::new().unwrap();
    std::fs::write(
        file.path(),
        r#"
[server]
listen = "127.0.0.1:9000"

[repository]
clone_url = "https://example.org/acme/agreement.git"
token_env = "AGREEMENT_REPO_TOKEN"

[record_store]
username = "uploader"
session_ttl_secs = 600

[artifact]
default_version = 7
version_pattern = 'eula-v(\d+)'

[ledger]
persist = false
"#,
    )
    .unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.server.listen, "127.0.0.1:9000");
    assert_eq!(
        config.repository.clone_url,
        "https://example.org/acme/agreement.git"
    );
    assert_eq!(config.repository.token_env.as_deref(), Some("AGREEMENT_REPO_TOKEN"));
    assert_eq!(config.record_store.session_ttl_secs, 600);
    assert_eq!(config.artifact.default_version, 7);
    assert!(!config.ledger.persist);
    // Untouched sections keep their defaults
    assert_eq!(config.dispatch.max_concurrent_commits, 4);
    assert_eq!(config.storage.retry_backoff_ms, 500);
    assert!(config.validate().is_ok());
}

#[test]
fn test_from_file_not_found() {
    let result = Config::from_file(Path::new("/nonexistent/agreement-sync.toml"));
    assert!(matches!(
        result,
        Err(SyncError::Config(ConfigError::FileNotFound(_)))
    ));
}

#[test]
fn test_from_file_invalid_toml() {
    let file = NamedTempFile::new().unwrap();
    std::fs::write(file.path(), "[server\nlisten = ").unwrap();

    let result = Config::from_file(file.path());
    assert!(matches!(
        result,
        Err(SyncError::Config(ConfigError::ParseFailed(_)))
    ));
}

#[test]
fn test_load_explicit_missing_path_is_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/config.toml"))).is_err());
}

#[test]
fn test_overrides_from_lookup() {
    let vars: HashMap<&str, &str> = [
        ("AGREEMENT_SYNC_LISTEN", "127.0.0.1:7000"),
        ("AGREEMENT_SYNC_CLONE_URL", "/srv/git/agreement.git"),
        ("AGREEMENT_SYNC_RECORD_STORE_ENDPOINT", "http://records:8081/query"),
        ("AGREEMENT_SYNC_RECORD_STORE_USERNAME", "ci"),
        ("AGREEMENT_SYNC_LEDGER_PATH", "/tmp/ledger.json"),
        ("AGREEMENT_SYNC_QUEUE_CAPACITY", "8"),
        ("AGREEMENT_SYNC_MAX_CONCURRENT_COMMITS", "2"),
        ("AGREEMENT_SYNC_ARTIFACT_VERSION", "5"),
    ]
    .into_iter()
    .collect();

    let mut config = Config::default();
    config.apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()));

    assert_eq!(config.server.listen, "127.0.0.1:7000");
    assert_eq!(config.repository.clone_url, "/srv/git/agreement.git");
    assert_eq!(config.record_store.endpoint, "http://records:8081/query");
    assert_eq!(config.record_store.username, "ci");
    assert_eq!(config.ledger.path, PathBuf::from("/tmp/ledger.json"));
    assert_eq!(config.dispatch.queue_capacity, 8);
    assert_eq!(config.dispatch.max_concurrent_commits, 2);
    assert_eq!(config.artifact.default_version, 5);
}

#[test]
fn test_overrides_ignore_unparsable_numbers() {
    let mut config = Config::default();
    config.apply_overrides_from(|key| {
        (key == "AGREEMENT_SYNC_QUEUE_CAPACITY").then(|| "lots".to_string())
    });
    assert_eq!(config.dispatch.queue_capacity, 64);
}

#[test]
fn test_durations() {
    let config = Config::default();
    assert_eq!(config.replay_window(), Duration::from_secs(24 * 3600));
    assert_eq!(config.session_ttl(), Duration::from_secs(3600));
    assert_eq!(config.clone_timeout(), Duration::from_secs(300));
}

#[test]
fn test_record_store_password_missing_variable() {
    let mut config = Config::default();
    config.record_store.password_env = "AGREEMENT_SYNC_TEST_UNSET_PASSWORD_VARIABLE".to_string();
    assert!(config.record_store_password().is_none());
}

#[test]
fn test_config_serializes_without_secrets() {
    let config = valid_config();
    let rendered = toml::to_string_pretty(&config).unwrap();
    assert!(rendered.contains("password_env"));
    assert!(rendered.contains("clone_url"));
}
