use bytes::Bytes;

use super::*;
use crate::test_utils;
use crate::test_utils::open_log_store;
use crate::Error;
use crate::StorageError;
use crate::SystemError;

fn is_not_found(
    e: &Error,
    idx: u64,
) -> bool {
    matches!(
        e,
        Error::System(SystemError::Storage(StorageError::LogNotFound(i))) if *i == idx
    )
}

fn records(range: std::ops::RangeInclusive<u64>) -> Vec<LogRecord> {
    range
        .map(|i| LogRecord::command(i, 1, Bytes::from(format!("cmd-{i}"))))
        .collect()
}

#[test]
fn test_empty_store_reports_zero_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_log_store(dir.path());

    assert_eq!(store.first_index().unwrap(), 0);
    assert_eq!(store.last_index().unwrap(), 0);
    assert!(store.is_empty());
}

/// # Case: append then point lookup
///
/// ## Criterias:
/// 1. stored record comes back with index, term and data intact
/// 2. a missing index is "log not found", not corruption
#[test]
fn test_store_log_then_get_log() {
    test_utils::enable_logger();
    let dir = tempfile::tempdir().unwrap();
    let store = open_log_store(dir.path());

    store
        .store_log(&LogRecord::command(5, 1, Bytes::from_static(b"x")))
        .unwrap();

    let r = store.get_log(5).unwrap();
    assert_eq!(r.index, 5);
    assert_eq!(r.term, 1);
    assert_eq!(r.data, Bytes::from_static(b"x"));
    assert_eq!(store.first_index().unwrap(), 5);
    assert_eq!(store.last_index().unwrap(), 5);

    let err = store.get_log(6).unwrap_err();
    assert!(is_not_found(&err, 6));
}

#[test]
fn test_store_logs_updates_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_log_store(dir.path());

    store.store_logs(&records(1..=10)).unwrap();
    assert_eq!(store.first_index().unwrap(), 1);
    assert_eq!(store.last_index().unwrap(), 10);
    assert_eq!(store.len(), 10);

    store.store_logs(&records(11..=12)).unwrap();
    assert_eq!(store.last_index().unwrap(), 12);
    assert_eq!(store.get_log(12).unwrap().data, Bytes::from_static(b"cmd-12"));
}

/// # Case: prefix compaction
///
/// ## Criterias:
/// 1. first index advances to max + 1
/// 2. deleted records are not found
#[test]
fn test_delete_range_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_log_store(dir.path());
    store.store_logs(&records(1..=10)).unwrap();

    store.delete_range(1, 5).unwrap();

    assert_eq!(store.first_index().unwrap(), 6);
    assert_eq!(store.last_index().unwrap(), 10);
    assert!(is_not_found(&store.get_log(3).unwrap_err(), 3));
    assert_eq!(store.get_log(6).unwrap().index, 6);
}

/// # Case: repeated compaction of an already compacted prefix
///
/// ## Criterias:
/// 1. first index never moves backwards
/// 2. first index still points at a stored record
#[test]
fn test_delete_range_below_first_index_keeps_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_log_store(dir.path());
    store.store_logs(&records(1..=10)).unwrap();
    store.delete_range(1, 5).unwrap();

    store.delete_range(1, 3).unwrap();

    assert_eq!(store.first_index().unwrap(), 6);
    assert_eq!(store.last_index().unwrap(), 10);
    assert_eq!(store.get_log(6).unwrap().index, 6);
}

#[test]
fn test_delete_range_suffix_moves_last_index() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_log_store(dir.path());
    store.store_logs(&records(1..=10)).unwrap();

    store.delete_range(8, 10).unwrap();

    assert_eq!(store.first_index().unwrap(), 1);
    assert_eq!(store.last_index().unwrap(), 7);
}

#[test]
fn test_delete_everything_resets_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_log_store(dir.path());
    store.store_logs(&records(1..=3)).unwrap();

    store.delete_range(1, 3).unwrap();

    assert_eq!(store.first_index().unwrap(), 0);
    assert_eq!(store.last_index().unwrap(), 0);
}

#[test]
fn test_bounds_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open_log_store(dir.path());
        store.store_logs(&records(1..=10)).unwrap();
        store.delete_range(1, 4).unwrap();
    }

    let store = open_log_store(dir.path());
    assert_eq!(store.first_index().unwrap(), 5);
    assert_eq!(store.last_index().unwrap(), 10);
    assert_eq!(store.get_log(7).unwrap().data, Bytes::from_static(b"cmd-7"));
}
