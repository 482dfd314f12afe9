use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use super::*;
use crate::test_utils::args;
use crate::test_utils::kv_table;
use crate::test_utils::KvData;
use crate::Handler;
use crate::MockConsensus;
use crate::MockLeaderResolver;
use crate::Value;

const TERM: u64 = 2;

fn consensus(role: NodeRole) -> Arc<dyn Consensus> {
    let mut c = MockConsensus::new();
    c.expect_state().returning(move || role);
    c.expect_term().returning(|| TERM);
    Arc::new(c)
}

fn resolver(hint: Option<&str>) -> Arc<dyn LeaderResolver> {
    let hint = hint.map(str::to_string);
    let mut r = MockLeaderResolver::new();
    r.expect_leader_hint().returning(move || hint.clone());
    Arc::new(r)
}

fn controller(
    role: NodeRole,
    hint: Option<&str>,
) -> (ReadController<KvData>, Arc<Machine<KvData>>, Arc<WriteBarrier>) {
    let machine = Arc::new(Machine::new(KvData::default(), kv_table()).unwrap());
    let barrier = WriteBarrier::new();
    let reads = ReadController::new(machine.clone(), consensus(role), barrier.clone(), resolver(hint));
    (reads, machine, barrier)
}

fn get_handler(machine: &Machine<KvData>) -> ReadFn<KvData> {
    match machine.commands().get(b"get").unwrap().handler() {
        Handler::Read(f) => f.clone(),
        _ => unreachable!(),
    }
}

#[test]
fn test_strict_read_on_follower_redirects() {
    let (reads, _, _) = controller(NodeRole::Follower, Some("10.0.0.2:6379"));
    assert_eq!(
        reads.check(ReadPolicy::Strict),
        Err(CommandError::Moved("10.0.0.2:6379".to_string()))
    );

    let (reads, _, _) = controller(NodeRole::Candidate, None);
    assert_eq!(reads.check(ReadPolicy::Strict), Err(CommandError::ClusterDown));
}

#[test]
fn test_strict_read_requires_tick_after_election() {
    let (reads, machine, _) = controller(NodeRole::Leader, Some("10.0.0.1:6379"));
    assert!(reads.check(ReadPolicy::Strict).is_err());

    machine.record_tick(4, TERM);
    assert!(reads.check(ReadPolicy::Strict).is_ok());

    machine.reset_ticked();
    assert!(reads.check(ReadPolicy::Strict).is_err());
}

/// # Case: leadership lost and regained between two ticks
///
/// ## Criterias:
/// 1. a tick from the previous term does not satisfy strict reads
/// 2. the first tick of the new term does
#[test]
fn test_strict_read_rejects_tick_from_previous_term() {
    let term = Arc::new(AtomicU64::new(1));
    let mut c = MockConsensus::new();
    c.expect_state().returning(|| NodeRole::Leader);
    let current = term.clone();
    c.expect_term().returning(move || current.load(Ordering::Acquire));

    let machine = Arc::new(Machine::new(KvData::default(), kv_table()).unwrap());
    let reads = ReadController::new(
        machine.clone(),
        Arc::new(c),
        WriteBarrier::new(),
        resolver(Some("10.0.0.1:6379")),
    );

    machine.record_tick(5, 1);
    assert!(reads.check(ReadPolicy::Strict).is_ok());

    term.store(2, Ordering::Release);
    assert_eq!(
        reads.check(ReadPolicy::Strict),
        Err(CommandError::Moved("10.0.0.1:6379".to_string()))
    );

    machine.record_tick(9, 2);
    assert!(reads.check(ReadPolicy::Strict).is_ok());
}

#[test]
fn test_open_read_waits_for_log_replay() {
    let (reads, machine, _) = controller(NodeRole::Follower, None);
    assert_eq!(reads.check(ReadPolicy::Open), Err(CommandError::Loading));

    machine.set_log_loaded(true);
    assert!(reads.check(ReadPolicy::Open).is_ok());
}

#[tokio::test]
async fn test_read_waits_for_callers_own_write() {
    let (reads, machine, barrier) = controller(NodeRole::Follower, None);
    machine.set_log_loaded(true);
    let reads = Arc::new(reads);
    let caller = CallerId::from("client-1");
    let ticket = barrier.begin(&caller);

    let handler = get_handler(&machine);
    let task = {
        let reads = reads.clone();
        let caller = caller.clone();
        tokio::spawn(async move {
            reads
                .execute(Some(&caller), ReadPolicy::Open, &handler, &args(&["get", "k"]))
                .await
        })
    };

    sleep(Duration::from_millis(30)).await;
    assert!(!task.is_finished());

    ticket.complete();
    assert_eq!(task.await.unwrap(), Ok(Value::Nil));
}

#[tokio::test]
async fn test_other_callers_do_not_wait() {
    let (reads, machine, barrier) = controller(NodeRole::Follower, None);
    machine.set_log_loaded(true);
    let _ticket = barrier.begin(&CallerId::from("writer"));

    let handler = get_handler(&machine);
    let res = tokio::time::timeout(
        Duration::from_millis(100),
        reads.execute(
            Some(&CallerId::from("reader")),
            ReadPolicy::Open,
            &handler,
            &args(&["get", "k"]),
        ),
    )
    .await
    .unwrap();
    assert_eq!(res, Ok(Value::Nil));
}

#[test]
fn test_policy_serde_is_lowercase() {
    assert_eq!(serde_json::to_string(&ReadPolicy::Open).unwrap(), "\"open\"");
    let p: ReadPolicy = serde_json::from_str("\"strict\"").unwrap();
    assert_eq!(p, ReadPolicy::Strict);
    assert_eq!(ReadPolicy::default(), ReadPolicy::Strict);
}
