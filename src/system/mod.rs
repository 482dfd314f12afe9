//! System command surface.
//!
//! Administrative commands that run outside the log against node
//! components: `barrier`, `raft ...`, `machine` and `cluster ...`.
//! `raft metrics` serves the Prometheus text exposition.

mod glob;
pub use glob::*;

#[cfg(test)]
mod system_test;

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::FutureExt;

use crate::convert::parse_u64;
use crate::convert::str_to_u64;
use crate::constants::CLUSTER_SLOTS;
use crate::metrics;
use crate::pipeline::translate_error;
use crate::Arity;
use crate::Command;
use crate::CommandError;
use crate::CommandResult;
use crate::CommandTable;
use crate::Consensus;
use crate::FileSnapshotStore;
use crate::Machine;
use crate::Result;
use crate::ServerInfo;
use crate::SnapshotMeta;
use crate::Topology;
use crate::Value;

/// Node components reachable from System handlers.
pub struct SystemContext<D> {
    pub node_id: String,
    pub machine: Arc<Machine<D>>,
    pub consensus: Arc<dyn Consensus>,
    pub topology: Arc<Topology>,
    pub snapshots: Arc<FileSnapshotStore>,
    /// Wall clock at process start, unix nanoseconds
    pub boot_time: i64,
    pub started: Instant,
}

impl<D> Clone for SystemContext<D> {
    fn clone(&self) -> Self {
        Self {
            node_id: self.node_id.clone(),
            machine: self.machine.clone(),
            consensus: self.consensus.clone(),
            topology: self.topology.clone(),
            snapshots: self.snapshots.clone(),
            boot_time: self.boot_time,
            started: self.started,
        }
    }
}

/// Adds the built-in System commands to `table`.
pub fn register_system_commands<D>(table: &mut CommandTable<D>) -> Result<()>
where
    D: Send + Sync + 'static,
{
    table.register(Command::system("barrier", Arity::Exact(1), |ctx, _| {
        barrier(ctx).boxed()
    }))?;
    table.register(Command::system("raft", Arity::AtLeast(2), |ctx, args| {
        raft(ctx, args).boxed()
    }))?;
    table.register(Command::system("machine", Arity::Exact(1), |ctx, _| {
        async move { Ok::<_, CommandError>(machine_info(&ctx)) }.boxed()
    }))?;
    table.register(Command::system("cluster", Arity::Exact(2), |ctx, args| {
        cluster(ctx, args).boxed()
    }))?;
    Ok(())
}

fn lower(arg: &Bytes) -> String {
    String::from_utf8_lossy(arg).to_ascii_lowercase()
}

fn utf8(arg: &Bytes) -> std::result::Result<String, CommandError> {
    String::from_utf8(arg.to_vec()).map_err(|_| CommandError::Syntax)
}

async fn barrier<D: Send + Sync + 'static>(ctx: SystemContext<D>) -> CommandResult {
    ctx.consensus
        .barrier(None)
        .await
        .map(|_| Value::Ok)
        .map_err(|e| translate_error(&e, ctx.topology.as_ref()))
}

async fn raft<D: Send + Sync + 'static>(
    ctx: SystemContext<D>,
    args: Vec<Bytes>,
) -> CommandResult {
    let sub: Vec<String> = args.iter().skip(1).take(2).map(lower).collect();
    match (sub[0].as_str(), sub.get(1).map(String::as_str), args.len()) {
        ("info", _, 2) => Ok(raft_info(&ctx, "*")),
        ("info", _, 3) => Ok(raft_info(&ctx, &utf8(&args[2])?)),
        ("leader", None, 2) => raft_leader(&ctx),
        ("metrics", None, 2) => Ok(Value::Str(metrics::render())),
        ("server", Some("list"), 3) => {
            let servers = ctx
                .topology
                .list()
                .await
                .map_err(|e| translate_error(&e, ctx.topology.as_ref()))?;
            Ok(Value::Array(servers.iter().map(server_row).collect()))
        }
        ("server", Some("add"), 5) => {
            ctx.topology.add(&utf8(&args[3])?, &utf8(&args[4])?).await?;
            Ok(Value::Ok)
        }
        ("server", Some("remove"), 4) => {
            ctx.topology.remove(&utf8(&args[3])?).await?;
            Ok(Value::Ok)
        }
        ("snapshot", Some("now"), 3) => {
            let meta = ctx
                .consensus
                .snapshot()
                .await
                .map_err(|e| translate_error(&e, ctx.topology.as_ref()))?;
            Ok(snapshot_row(&meta))
        }
        ("snapshot", Some("list"), 3) => {
            let list = ctx.snapshots.list().map_err(|e| CommandError::custom(e.to_string()))?;
            Ok(Value::Array(list.iter().map(snapshot_row).collect()))
        }
        ("snapshot", Some("file"), 4) => {
            let path = ctx
                .snapshots
                .path_of(&utf8(&args[3])?)
                .map_err(|e| CommandError::custom(e.to_string()))?;
            Ok(Value::Str(path.display().to_string()))
        }
        ("snapshot", Some("read"), 6) => {
            let offset = parse_u64(&args[4]).ok_or(CommandError::Syntax)?;
            let len = parse_u64(&args[5]).ok_or(CommandError::Syntax)? as usize;
            let bytes = ctx
                .snapshots
                .read_range(&utf8(&args[3])?, offset, len)
                .await
                .map_err(|e| CommandError::custom(e.to_string()))?;
            Ok(Value::Bytes(bytes))
        }
        ("info" | "leader" | "metrics" | "server" | "snapshot", _, _) => Err(CommandError::WrongArgs("raft".to_string())),
        _ => Err(CommandError::Syntax),
    }
}

fn raft_info<D: Send + Sync + 'static>(
    ctx: &SystemContext<D>,
    pattern: &str,
) -> Value {
    let (ticked_index, ticked_term) = ctx.machine.ticked();
    let mut pairs = ctx.consensus.stats();
    pairs.push(("node_id".into(), ctx.node_id.clone()));
    pairs.push(("topology".into(), ctx.topology.state().to_string()));
    pairs.push(("ticked_index".into(), ticked_index.to_string()));
    pairs.push(("ticked_term".into(), ticked_term.to_string()));
    pairs.push(("log_loaded".into(), ctx.machine.is_log_loaded().to_string()));
    pairs.push(("readers".into(), ctx.machine.readers().to_string()));
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    Value::Map(
        pairs
            .into_iter()
            .filter(|(k, _)| glob_match(pattern, k))
            .map(|(k, v)| (k, Value::Str(v)))
            .collect(),
    )
}

fn raft_leader<D: Send + Sync + 'static>(ctx: &SystemContext<D>) -> CommandResult {
    let leader = ctx.consensus.leader().ok_or(CommandError::ClusterDown)?;
    Ok(Value::Map(vec![
        ("id".into(), Value::Str(leader.id)),
        ("address".into(), Value::Str(leader.address)),
    ]))
}

fn server_row(s: &ServerInfo) -> Value {
    Value::Map(vec![
        ("id".into(), Value::Str(s.id.clone())),
        ("address".into(), Value::Str(s.address.clone())),
        ("leader".into(), Value::Int(s.leader as i64)),
    ])
}

fn snapshot_row(meta: &SnapshotMeta) -> Value {
    Value::Map(vec![
        ("id".into(), Value::Str(meta.id.clone())),
        ("index".into(), Value::Int(meta.index as i64)),
        ("term".into(), Value::Int(meta.term as i64)),
        ("size".into(), Value::Int(meta.size as i64)),
    ])
}

fn machine_info<D: Send + Sync + 'static>(ctx: &SystemContext<D>) -> Value {
    Value::Map(vec![
        ("version".into(), Value::str(env!("CARGO_PKG_VERSION"))),
        (
            "git_sha".into(),
            Value::str(option_env!("VERGEN_GIT_SHA").unwrap_or("unknown")),
        ),
        (
            "uptime".into(),
            Value::Int(ctx.started.elapsed().as_nanos().min(i64::MAX as u128) as i64),
        ),
        ("boot".into(), Value::Int(ctx.boot_time)),
        ("now".into(), Value::Int(ctx.machine.clock().ts)),
    ])
}

/// 40 hex digit node name derived from the server id.
pub fn node_name(id: &str) -> String {
    format!("{:040x}", str_to_u64(id))
}

fn split_host_port(addr: &str) -> (String, i64) {
    match addr.rsplit_once(':') {
        Some((host, port)) => (
            host.trim_matches(|c: char| c == '[' || c == ']').to_string(),
            port.parse().unwrap_or(0),
        ),
        None => (addr.to_string(), 0),
    }
}

/// External address of `server`: our own advertised address, otherwise what
/// the prober resolved, otherwise the configured one.
fn external_address<D: Send + Sync + 'static>(
    ctx: &SystemContext<D>,
    server: &ServerInfo,
) -> String {
    if server.id == ctx.node_id {
        return ctx.topology.advertised().to_string();
    }
    ctx.topology
        .probe_status(&server.address)
        .and_then(|p| p.resolved)
        .unwrap_or_else(|| server.address.clone())
}

async fn cluster<D: Send + Sync + 'static>(
    ctx: SystemContext<D>,
    args: Vec<Bytes>,
) -> CommandResult {
    let servers = ctx
        .topology
        .list()
        .await
        .map_err(|e| translate_error(&e, ctx.topology.as_ref()))?;
    let leader = servers.iter().find(|s| s.leader);

    match lower(&args[1]).as_str() {
        "info" => {
            let state = if leader.is_some() { "ok" } else { "fail" };
            Ok(Value::Str(format!(
                "cluster_state:{state}\r\ncluster_slots_assigned:{CLUSTER_SLOTS}\r\ncluster_slots_ok:{CLUSTER_SLOTS}\r\ncluster_slots_pfail:0\r\ncluster_slots_fail:0\r\ncluster_known_nodes:{}\r\ncluster_size:1\r\n",
                servers.len()
            )))
        }
        "nodes" => {
            let leader_name = leader.map(|l| node_name(&l.id));
            let mut out = String::new();
            for s in &servers {
                let addr = external_address(&ctx, s);
                let (host, port) = split_host_port(&addr);
                let myself = if s.id == ctx.node_id { "myself," } else { "" };
                if s.leader {
                    out.push_str(&format!(
                        "{} {}:{}@{} {}master - 0 0 1 connected 0-{}\n",
                        node_name(&s.id),
                        host,
                        port,
                        port,
                        myself,
                        CLUSTER_SLOTS - 1
                    ));
                } else {
                    out.push_str(&format!(
                        "{} {}:{}@{} {}slave {} 0 0 1 connected\n",
                        node_name(&s.id),
                        host,
                        port,
                        port,
                        myself,
                        leader_name.as_deref().unwrap_or("-")
                    ));
                }
            }
            Ok(Value::Str(out))
        }
        "slots" => {
            let Some(leader) = leader else {
                return Err(CommandError::ClusterDown);
            };
            let mut row = vec![Value::Int(0), Value::Int(CLUSTER_SLOTS as i64 - 1)];
            for s in std::iter::once(leader).chain(servers.iter().filter(|s| !s.leader)) {
                let (host, port) = split_host_port(&external_address(&ctx, s));
                row.push(Value::Array(vec![
                    Value::Str(host),
                    Value::Int(port),
                    Value::Str(node_name(&s.id)),
                ]));
            }
            Ok(Value::Array(vec![Value::Array(row)]))
        }
        _ => Err(CommandError::Syntax),
    }
}
