use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use bytes::Bytes;

use super::*;
use crate::test_utils::args;
use crate::test_utils::kv_table;
use crate::test_utils::KvData;
use crate::ClusterConfig;
use crate::ConsensusError;
use crate::Handler;
use crate::MockConsensus;
use crate::Server;

const N1: &str = "10.0.0.1:7001";
const N2: &str = "10.0.0.2:7002";

struct Fixture {
    ctx: SystemContext<KvData>,
    table: CommandTable<KvData>,
    _dir: tempfile::TempDir,
}

fn fixture(consensus: MockConsensus) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let consensus: Arc<dyn Consensus> = Arc::new(consensus);
    let cluster = ClusterConfig {
        node_id: "n1".into(),
        listen_address: N1.into(),
        ..ClusterConfig::default()
    };
    let topology = Arc::new(Topology::new(&cluster, consensus.clone(), Duration::from_millis(50)));
    let mut table = CommandTable::new();
    register_system_commands(&mut table).unwrap();
    Fixture {
        ctx: SystemContext {
            node_id: "n1".into(),
            machine: Arc::new(Machine::new(KvData::default(), kv_table()).unwrap()),
            consensus,
            topology,
            snapshots: Arc::new(FileSnapshotStore::new(dir.path().join("snapshots"), 2).unwrap()),
            boot_time: 42,
            started: Instant::now(),
        },
        table,
        _dir: dir,
    }
}

impl Fixture {
    async fn run(
        &self,
        parts: &[&str],
    ) -> CommandResult {
        let argv: Vec<Bytes> = args(parts);
        let command = self.table.get(&argv[0]).unwrap();
        command.validate(&argv)?;
        match command.handler() {
            Handler::System(f) => f(self.ctx.clone(), argv).await,
            _ => unreachable!(),
        }
    }
}

fn two_node_cluster() -> MockConsensus {
    let mut c = MockConsensus::new();
    c.expect_get_configuration()
        .returning(|| Ok(vec![Server::voter("n1", N1), Server::voter("n2", N2)]));
    c.expect_leader().returning(|| Some(Server::voter("n1", N1)));
    c.expect_stats().returning(|| {
        vec![
            ("term".to_string(), "3".to_string()),
            ("state".to_string(), "Leader".to_string()),
            ("last_log_index".to_string(), "9".to_string()),
        ]
    });
    c
}

fn keys(v: &Value) -> Vec<String> {
    match v {
        Value::Map(pairs) => pairs.iter().map(|(k, _)| k.clone()).collect(),
        other => panic!("expected map, got {other:?}"),
    }
}

#[test]
fn test_glob_match() {
    assert!(glob_match("*", "anything"));
    assert!(glob_match("*", ""));
    assert!(glob_match("last_*", "last_log_index"));
    assert!(glob_match("*_index", "applied_index"));
    assert!(glob_match("te?m", "term"));
    assert!(glob_match("a*b*c", "aXXbYYc"));
    assert!(!glob_match("a*b*c", "aXXbYY"));
    assert!(!glob_match("Term", "term"));
}

#[test]
fn test_node_name_is_stable_40_hex() {
    let name = node_name("n1");
    assert_eq!(name.len(), 40);
    assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(name, node_name("n1"));
    assert_ne!(name, node_name("n2"));
    // Same on every build, replicas must agree on it
    assert_eq!(name, "00000000000000000000000008b37b07b558d4c0");
}

#[test]
fn test_split_host_port() {
    assert_eq!(split_host_port("10.0.0.1:7001"), ("10.0.0.1".to_string(), 7001));
    assert_eq!(split_host_port("[::1]:6379"), ("::1".to_string(), 6379));
    assert_eq!(split_host_port("nohost"), ("nohost".to_string(), 0));
}

#[tokio::test]
async fn test_raft_info_is_sorted_and_filtered() {
    let f = fixture(two_node_cluster());

    let all = f.run(&["raft", "info"]).await.unwrap();
    let names = keys(&all);
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
    assert!(names.contains(&"node_id".to_string()));
    assert!(names.contains(&"ticked_index".to_string()));

    let filtered = f.run(&["RAFT", "INFO", "t*"]).await.unwrap();
    assert_eq!(keys(&filtered), vec!["term", "ticked_index", "ticked_term", "topology"]);
}

#[tokio::test]
async fn test_raft_leader_and_server_list() {
    let f = fixture(two_node_cluster());
    let leader = f.run(&["raft", "leader"]).await.unwrap();
    assert_eq!(
        leader,
        Value::Map(vec![
            ("id".into(), Value::Str("n1".into())),
            ("address".into(), Value::Str(N1.into())),
        ])
    );

    let list = f.run(&["raft", "server", "list"]).await.unwrap();
    assert_eq!(list.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_raft_metrics_serves_text_exposition() {
    let f = fixture(MockConsensus::new());
    match f.run(&["raft", "metrics"]).await.unwrap() {
        Value::Str(text) => {
            assert!(text.contains("# TYPE ticks_committed counter"));
            assert!(text.contains("write_batch_size_bucket"));
        }
        other => panic!("expected text, got {other:?}"),
    }
    assert_eq!(
        f.run(&["raft", "metrics", "extra"]).await,
        Err(CommandError::WrongArgs("raft".into()))
    );
}

#[tokio::test]
async fn test_raft_leader_unknown_is_cluster_down() {
    let mut c = MockConsensus::new();
    c.expect_leader().returning(|| None);
    let f = fixture(c);
    assert_eq!(f.run(&["raft", "leader"]).await, Err(CommandError::ClusterDown));
}

#[tokio::test]
async fn test_raft_rejects_bad_usage() {
    let f = fixture(two_node_cluster());
    assert_eq!(f.run(&["raft", "bogus"]).await, Err(CommandError::Syntax));
    assert_eq!(
        f.run(&["raft", "server", "add", "n3"]).await,
        Err(CommandError::WrongArgs("raft".into()))
    );
    assert_eq!(f.run(&["raft"]).await, Err(CommandError::WrongArgs("raft".into())));
}

#[tokio::test]
async fn test_raft_snapshot_listing_and_paths() {
    let f = fixture(two_node_cluster());
    assert_eq!(f.run(&["raft", "snapshot", "list"]).await, Ok(Value::Array(vec![])));
    assert!(matches!(
        f.run(&["raft", "snapshot", "file", "../etc"]).await,
        Err(CommandError::Custom(_))
    ));
    assert_eq!(
        f.run(&["raft", "snapshot", "read", "snapshot-1-1-1", "x", "10"]).await,
        Err(CommandError::Syntax)
    );
}

#[tokio::test]
async fn test_barrier_translates_not_leader() {
    let mut c = MockConsensus::new();
    c.expect_barrier().returning(|_| Err(ConsensusError::NotLeader.into()));
    c.expect_leader().returning(|| Some(Server::voter("n2", N2)));
    let f = fixture(c);
    assert_eq!(f.run(&["barrier"]).await, Err(CommandError::Moved(N2.into())));
}

#[tokio::test]
async fn test_machine_info() {
    let f = fixture(MockConsensus::new());
    let info = f.run(&["machine"]).await.unwrap();
    assert_eq!(keys(&info), vec!["version", "git_sha", "uptime", "boot", "now"]);
    let Value::Map(pairs) = info else { unreachable!() };
    assert_eq!(pairs[3].1, Value::Int(42));
    assert_eq!(pairs[4].1, Value::Int(0));
}

#[tokio::test]
async fn test_cluster_compatibility_views() {
    let f = fixture(two_node_cluster());

    let Value::Str(info) = f.run(&["cluster", "info"]).await.unwrap() else {
        panic!("cluster info is a string");
    };
    assert!(info.starts_with("cluster_state:ok\r\n"));
    assert!(info.contains("cluster_known_nodes:2\r\n"));

    let Value::Str(nodes) = f.run(&["cluster", "nodes"]).await.unwrap() else {
        panic!("cluster nodes is a string");
    };
    let lines: Vec<&str> = nodes.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("10.0.0.1:7001@7001 myself,master - 0 0 1 connected 0-16383"));
    assert!(lines[1].contains(&format!("slave {}", node_name("n1"))));

    let slots = f.run(&["cluster", "slots"]).await.unwrap();
    let row = &slots.as_array().unwrap()[0];
    let row = row.as_array().unwrap();
    assert_eq!(row[0], Value::Int(0));
    assert_eq!(row[1], Value::Int(16383));
    assert_eq!(
        row[2],
        Value::Array(vec![
            Value::Str("10.0.0.1".into()),
            Value::Int(7001),
            Value::Str(node_name("n1")),
        ])
    );
    assert_eq!(row.len(), 4);

    assert_eq!(f.run(&["cluster", "bogus"]).await, Err(CommandError::Syntax));
}
