use std::sync::Arc;

use bytes::Bytes;

use super::*;
use crate::envelope::encode_batch;
use crate::test_utils::args;
use crate::test_utils::kv_table;
use crate::test_utils::KvData;
use crate::CommandError;
use crate::Error;
use crate::JsonSnapshotCodec;
use crate::LogRecord;
use crate::LogType;
use crate::StateMachine;

fn command_record(
    index: u64,
    commands: &[Vec<Bytes>],
) -> LogRecord {
    let refs: Vec<&[Bytes]> = commands.iter().map(Vec::as_slice).collect();
    LogRecord::command(index, 1, encode_batch(&refs).unwrap())
}

fn kv_fsm() -> ReplicatedFsm<KvData> {
    let machine = Arc::new(Machine::new(KvData::default(), kv_table()).unwrap());
    ReplicatedFsm::new(machine, Arc::new(JsonSnapshotCodec::default()))
}

#[test]
fn test_non_command_records_only_advance_applied_index() {
    let fsm = kv_fsm();
    let noop = LogRecord::new(1, 1, LogType::Noop, Bytes::new());
    assert!(fsm.apply(&noop).unwrap().is_empty());
    assert_eq!(fsm.applied_index(), 1);
}

#[test]
fn test_snapshot_restores_data_and_clock() {
    let fsm = kv_fsm();
    fsm.apply(&command_record(1, &[tick_args(1_000, 3)])).unwrap();
    fsm.apply(&command_record(2, &[args(&["set", "a", "1"]), args(&["stamp", "b"])]))
        .unwrap();

    let mut buf = Vec::new();
    fsm.snapshot().unwrap().persist(&mut buf).unwrap();

    let other = kv_fsm();
    other.restore(2, &mut buf.as_slice()).unwrap();
    assert_eq!(other.machine().clock(), fsm.machine().clock());
    assert_eq!(other.applied_index(), 2);
    assert_eq!(other.machine().first_index(), 2);
    assert_eq!(
        other.machine().read(|s| s.data.clone()),
        fsm.machine().read(|s| s.data.clone())
    );

    // Restored replica keeps applying where the snapshot ended
    let out = other.apply(&command_record(3, &[args(&["incr", "a"])])).unwrap();
    assert_eq!(out[0].result, Ok(crate::Value::Int(2)));
}

#[test]
fn test_only_one_snapshot_in_flight() {
    let fsm = kv_fsm();
    let first = fsm.snapshot().unwrap();
    let err = fsm.snapshot().err().unwrap();
    assert!(matches!(err, Error::Command(CommandError::SnapshotInProgress)));

    drop(first);
    assert!(fsm.snapshot().is_ok());
}

#[test]
fn test_restore_rejects_foreign_stream() {
    let fsm = kv_fsm();
    let err = fsm.restore(5, &mut &b"not a snapshot"[..]).unwrap_err();
    assert!(!matches!(err, Error::Command(_)));
    assert_eq!(fsm.applied_index(), 0);
}
