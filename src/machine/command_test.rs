use bytes::Bytes;

use super::*;
use crate::test_utils::args;
use crate::test_utils::kv_table;
use crate::test_utils::KvData;
use crate::CommandError;
use crate::Error;
use crate::SystemError;

#[test]
fn test_arity_accepts() {
    assert!(Arity::Exact(2).accepts(2));
    assert!(!Arity::Exact(2).accepts(3));
    assert!(Arity::AtLeast(2).accepts(5));
    assert!(!Arity::AtLeast(2).accepts(1));
}

#[test]
fn test_lookup_is_case_insensitive() {
    let table = kv_table();
    let cmd = table.get(b"SeT").unwrap();
    assert_eq!(cmd.name(), "set");
    assert_eq!(cmd.kind(), CommandKind::Write);
    assert_eq!(table.get(b"GET").unwrap().kind(), CommandKind::Read);
    assert!(table.get(b"nope").is_none());
    assert!(table.get(&[0xff, 0xfe]).is_none());
}

#[test]
fn test_register_duplicate_fails() {
    let mut table = kv_table();
    let before = table.len();
    let err = table
        .register(Command::<KvData>::read("GET", Arity::Exact(2), |_, _| Ok(Value::Nil)))
        .unwrap_err();
    assert!(matches!(err, Error::System(SystemError::NodeStartFailed(_))));
    assert_eq!(table.len(), before);
}

#[test]
fn test_validate_counts_command_name() {
    let table = kv_table();
    let set = table.get(b"set").unwrap();
    assert!(set.validate(&args(&["set", "k", "v"])).is_ok());
    assert_eq!(
        set.validate(&args(&["set", "k"])),
        Err(CommandError::WrongArgs("set".to_string()))
    );

    let del = table.get(b"del").unwrap();
    assert!(del.validate(&args(&["del", "a", "b", "c"])).is_ok());
    assert!(del.validate(&[Bytes::from_static(b"del")]).is_err());
}

#[test]
fn test_names_lists_everything_registered() {
    let table = kv_table();
    let mut names: Vec<&str> = table.names().collect();
    names.sort();
    assert_eq!(names, vec!["del", "get", "incr", "now", "set", "stamp"]);
    assert!(!table.is_empty());
}
