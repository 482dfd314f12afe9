use std::time::Duration;

use crate::test_utils::args;
use crate::test_utils::enable_logger;
use crate::test_utils::kv_commands;
use crate::test_utils::node_config;
use crate::test_utils::KvData;
use crate::CallerId;
use crate::CommandError;
use crate::Node;
use crate::NodeBuilder;
use crate::ReadPolicy;
use crate::Value;

const READY: Duration = Duration::from_secs(5);

async fn start(dir: &std::path::Path) -> Node<KvData> {
    enable_logger();
    let node = NodeBuilder::new(node_config(dir), KvData::default())
        .commands(kv_commands())
        .build()
        .await
        .unwrap();
    assert!(node.wait_ready(READY).await);
    node
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_single_node_writes_and_reads() {
    let dir = tempfile::tempdir().unwrap();
    let node = start(dir.path()).await;

    assert_eq!(node.execute(None, args(&["set", "k", "v"]), None).await, Ok(Value::Ok));
    assert_eq!(
        node.execute(None, args(&["GET", "k"]), None).await,
        Ok(Value::Bytes(b"v".to_vec()))
    );
    assert_eq!(node.execute(None, args(&["incr", "n"]), None).await, Ok(Value::Int(1)));
    assert_eq!(node.execute(None, args(&["del", "k", "n", "x"]), None).await, Ok(Value::Int(2)));

    // Replicated clock is visible to reads and has started
    let Ok(Value::Int(now)) = node.execute(None, args(&["now"]), None).await else {
        panic!("now returns an integer");
    };
    assert!(now > 0);

    node.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dispatch_errors() {
    let dir = tempfile::tempdir().unwrap();
    let node = start(dir.path()).await;

    assert_eq!(
        node.execute(None, args(&["tick", "1", "2"]), None).await,
        Err(CommandError::Unauthorized)
    );
    assert_eq!(
        node.execute(None, args(&["flushall"]), None).await,
        Err(CommandError::UnknownCommand("flushall".into()))
    );
    assert_eq!(
        node.execute(None, args(&["set", "k"]), None).await,
        Err(CommandError::WrongArgs("set".into()))
    );
    assert!(node.execute(None, vec![], None).await.is_err());
    assert!(matches!(
        node.submit_write(None, args(&["get", "k"])).await,
        Err(CommandError::Custom(_))
    ));

    node.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_read_after_own_async_write() {
    let dir = tempfile::tempdir().unwrap();
    let node = start(dir.path()).await;
    let caller = CallerId::generate();

    let pending = node
        .submit_write(Some(&caller), args(&["set", "k", "mine"]))
        .await
        .unwrap();
    assert_eq!(
        node.execute(Some(&caller), args(&["get", "k"]), Some(ReadPolicy::Strict)).await,
        Ok(Value::Bytes(b"mine".to_vec()))
    );
    assert_eq!(pending.wait().await.result, Ok(Value::Ok));

    node.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_writes_all_succeed() {
    let dir = tempfile::tempdir().unwrap();
    let node = std::sync::Arc::new(start(dir.path()).await);

    let mut handles = Vec::new();
    for _ in 0..32 {
        let node = node.clone();
        handles.push(tokio::spawn(async move {
            node.execute(None, args(&["incr", "counter"]), None).await
        }));
    }
    for h in handles {
        assert!(h.await.unwrap().is_ok());
    }
    assert_eq!(
        node.execute(None, args(&["get", "counter"]), None).await,
        Ok(Value::Bytes(b"32".to_vec()))
    );

    node.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restart_recovers_state_and_clock() {
    let dir = tempfile::tempdir().unwrap();
    let before;
    {
        let node = start(dir.path()).await;
        node.execute(None, args(&["set", "a", "1"]), None).await.unwrap();
        let Ok(Value::Map(_)) = node.execute(None, args(&["raft", "snapshot", "now"]), None).await else {
            panic!("snapshot now returns its metadata");
        };
        node.execute(None, args(&["set", "b", "2"]), None).await.unwrap();
        before = node.machine().clock();
        node.shutdown().await.unwrap();
    }

    let node = start(dir.path()).await;
    assert_eq!(
        node.execute(None, args(&["get", "a"]), None).await,
        Ok(Value::Bytes(b"1".to_vec()))
    );
    assert_eq!(
        node.execute(None, args(&["get", "b"]), None).await,
        Ok(Value::Bytes(b"2".to_vec()))
    );
    let after = node.machine().clock();
    assert_eq!(after.start, before.start);
    assert!(after.ts > before.ts);

    node.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_is_idempotent_and_final() {
    let dir = tempfile::tempdir().unwrap();
    let node = start(dir.path()).await;
    node.shutdown().await.unwrap();
    node.shutdown().await.unwrap();

    assert_eq!(
        node.execute(None, args(&["set", "k", "v"]), None).await,
        Err(CommandError::ClusterDown)
    );
    assert!(!node.fatal().is_cancelled());
}
