use super::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

const DAY: Duration = Duration::from_secs(24 * 3600);

fn write_ledger(path: &Path, entries: &[(&str, i64)]) {
    let state = LedgerState {
        commits: entries
            .iter()
            .map(|(hash, ts)| (hash.to_string(), *ts))
            .collect(),
        ..LedgerState::default()
    };
    fs::write(path, serde_json::to_string(&state).unwrap()).unwrap();
}

#[test]
fn test_try_acquire_once_per_hash() {
    let ledger = CommitLedger::in_memory();

    assert!(ledger.try_acquire("abc123").unwrap());
    assert!(!ledger.try_acquire("abc123").unwrap());
    assert!(ledger.try_acquire("def456").unwrap());

    assert_eq!(ledger.len(), 2);
    assert!(ledger.contains("abc123"));
    assert!(!ledger.contains("fff000"));
    assert!(!ledger.is_persistent());
}

#[test]
fn test_concurrent_acquire_single_winner() {
    let ledger = Arc::new(CommitLedger::in_memory());
    let winners = Arc::new(AtomicUsize::new(0));

    std::thread::scope(|scope| {
        for _ in 0..16 {
            let ledger = Arc::clone(&ledger);
            let winners = Arc::clone(&winners);
            scope.spawn(move || {
                if ledger.try_acquire("abc123").unwrap() {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });

    assert_eq!(winners.load(Ordering::SeqCst), 1);
    assert_eq!(ledger.len(), 1);
}

#[test]
fn test_persisted_ledger_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("processed_commits.json");

    {
        let ledger = CommitLedger::open(&path, DAY).unwrap();
        assert!(ledger.is_persistent());
        assert_eq!(ledger.path(), Some(path.as_path()));
        assert!(ledger.try_acquire("abc123").unwrap());
        ledger.flush().unwrap();
    }

    let reopened = CommitLedger::open(&path, DAY).unwrap();
    assert!(!reopened.try_acquire("abc123").unwrap());
    assert!(reopened.try_acquire("def456").unwrap());
}

#[test]
fn test_open_compacts_entries_outside_window() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("processed_commits.json");
    let now = chrono::Utc::now().timestamp();
    write_ledger(&path, &[("0dd0dd", now - 48 * 3600), ("f00d", now - 3600)]);

    let ledger = CommitLedger::open(&path, DAY).unwrap();
    assert_eq!(ledger.len(), 1);

    // Expired hash is accepted again; the recent one is still a duplicate
    assert!(ledger.try_acquire("0dd0dd").unwrap());
    assert!(!ledger.try_acquire("f00d").unwrap());
    ledger.flush().unwrap();

    let on_disk: LedgerState =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(on_disk.commits.len(), 2);
}

#[test]
fn test_entries_from_running_process_are_kept() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("processed_commits.json");

    // A zero window would expire everything older than now
    let ledger = CommitLedger::open(&path, Duration::ZERO).unwrap();
    assert!(ledger.try_acquire("abc123").unwrap());
    assert!(ledger.try_acquire("def456").unwrap());
    assert!(!ledger.try_acquire("abc123").unwrap());
    assert_eq!(ledger.len(), 2);
}

#[test]
fn test_second_open_is_locked() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("processed_commits.json");

    let _first = CommitLedger::open(&path, DAY).unwrap();
    let second = CommitLedger::open(&path, DAY);
    assert!(matches!(second, Err(LedgerError::Locked(_))));
}

#[test]
fn test_corrupt_ledger_is_load_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("processed_commits.json");
    fs::write(&path, "not json").unwrap();

    let result = CommitLedger::open(&path, DAY);
    assert!(matches!(result, Err(LedgerError::LoadFailed { .. })));
}

#[test]
fn test_write_leaves_no_temp_files() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("processed_commits.json");

    let ledger = CommitLedger::open(&path, DAY).unwrap();
    for hash in ["aaaa", "bbbb", "cccc"] {
        assert!(ledger.try_acquire(hash).unwrap());
        ledger.flush().unwrap();
    }

    let mut names: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec!["processed_commits.json", "processed_commits.json.lock"]
    );
}

fn on_disk(path: &Path) -> LedgerState {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_acquire_does_not_write_until_flush() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("processed_commits.json");

    let ledger = CommitLedger::open(&path, DAY).unwrap();
    assert!(ledger.try_acquire("abc123").unwrap());
    assert!(!path.exists());

    ledger.flush().unwrap();
    assert!(on_disk(&path).commits.contains_key("abc123"));

    // Nothing new: the file is left alone
    fs::write(&path, r#"{"commits": {}}"#).unwrap();
    ledger.flush().unwrap();
    assert!(on_disk(&path).commits.is_empty());

    assert!(ledger.try_acquire("def456").unwrap());
    ledger.flush().unwrap();
    assert_eq!(on_disk(&path).commits.len(), 2);
}

#[test]
fn test_flush_in_memory_is_noop() {
    let ledger = CommitLedger::in_memory();
    assert!(ledger.try_acquire("abc123").unwrap());
    ledger.flush().unwrap();
    assert!(ledger.path().is_none());
}

#[tokio::test]
async fn test_persist_writes_from_async_context() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("processed_commits.json");
    let ledger = Arc::new(CommitLedger::open(&path, DAY).unwrap());

    let acquires = (0..8).map(|i| {
        let ledger = Arc::clone(&ledger);
        async move {
            assert!(ledger.try_acquire(&format!("beef{:02}", i)).unwrap());
            ledger.persist().await.unwrap();
        }
    });
    futures::future::join_all(acquires).await;

    assert_eq!(on_disk(&path).commits.len(), 8);
}
