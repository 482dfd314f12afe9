use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::test_utils::args;
use crate::test_utils::enable_logger;
use crate::test_utils::kv_commands;
use crate::test_utils::node_config;
use crate::test_utils::KvData;
use crate::Arity;
use crate::Command;
use crate::CommandError;
use crate::Error;
use crate::JsonSnapshotCodec;
use crate::MockConsensus;
use crate::NodeRole;
use crate::ReadPolicy;
use crate::Server;
use crate::SystemError;
use crate::Value;

fn start_failed(res: crate::Result<Node<KvData>>) -> bool {
    matches!(res, Err(Error::System(SystemError::NodeStartFailed(_))))
}

#[tokio::test]
async fn test_json_and_custom_codec_are_exclusive() {
    enable_logger();
    let dir = tempfile::tempdir().unwrap();
    let res = NodeBuilder::new(node_config(dir.path()), KvData::default())
        .json_snapshots()
        .snapshot_codec(Arc::new(JsonSnapshotCodec::default()))
        .build()
        .await;
    assert!(start_failed(res));

    let res = NodeBuilder::new(node_config(dir.path()), KvData::default())
        .snapshot_codec(Arc::new(JsonSnapshotCodec::default()))
        .json_snapshots()
        .build()
        .await;
    assert!(start_failed(res));
}

#[tokio::test]
async fn test_command_clashing_with_builtin_fails() {
    let dir = tempfile::tempdir().unwrap();
    let res = NodeBuilder::new(node_config(dir.path()), KvData::default())
        .command(Command::read("RAFT", Arity::Exact(1), |_, _| Ok(Value::Nil)))
        .build()
        .await;
    assert!(start_failed(res));

    let res = NodeBuilder::new(node_config(dir.path()), KvData::default())
        .command(Command::write("tick", Arity::Exact(1), |_, _| Ok(Value::Nil)))
        .build()
        .await;
    assert!(start_failed(res));
}

#[tokio::test]
async fn test_join_address_requires_transport() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = node_config(dir.path());
    config.cluster.join_address = Some("127.0.0.1:17999".into());
    let res = NodeBuilder::new(config, KvData::default())
        .commands(kv_commands())
        .build()
        .await;
    assert!(start_failed(res));
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = node_config(dir.path());
    config.pipeline.max_batch_size = 0;
    let res = NodeBuilder::new(config, KvData::default()).build().await;
    assert!(matches!(res, Err(Error::Config(_))));
}

/// # Case: custom consensus on a follower
///
/// ## Criterias:
/// 1. the node starts without bootstrapping (configuration already set)
/// 2. strict reads redirect to the leader's configured address
/// 3. shutdown closes the injected consensus
#[tokio::test]
async fn test_custom_consensus_follower() {
    let dir = tempfile::tempdir().unwrap();
    let mut consensus = MockConsensus::new();
    consensus
        .expect_get_configuration()
        .returning(|| Ok(vec![Server::voter("n1", "127.0.0.1:17001"), Server::voter("n0", "127.0.0.1:17000")]));
    consensus.expect_state().returning(|| NodeRole::Follower);
    consensus
        .expect_leader()
        .returning(|| Some(Server::voter("n0", "127.0.0.1:17000")));
    consensus.expect_last_index().returning(|| 0);
    consensus.expect_shutdown().times(1).returning(|| Ok(()));

    let node = NodeBuilder::new(node_config(dir.path()), KvData::default())
        .commands(kv_commands())
        .consensus(consensus_instance(Arc::new(consensus)))
        .build()
        .await
        .unwrap();
    assert_eq!(node.topology().state(), crate::TopologyState::Steady);

    assert_eq!(
        node.execute(None, args(&["get", "k"]), Some(ReadPolicy::Strict)).await,
        Err(CommandError::Moved("127.0.0.1:17000".into()))
    );

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(
        node.execute(None, args(&["get", "k"]), Some(ReadPolicy::Open)).await,
        Ok(Value::Nil)
    );

    node.shutdown().await.unwrap();
}
