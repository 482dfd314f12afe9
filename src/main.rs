//! Single node development shell.
//!
//! Starts a node over a small key/value model and executes one command per
//! stdin line, e.g. `set k v`, `get k`, `raft info`, `@open get k`.

use std::collections::BTreeMap;
use std::process::ExitCode;

use bytes::Bytes;
use raft_machine::convert::parse_i64;
use raft_machine::observability::init_observability;
use raft_machine::Arity;
use raft_machine::CallerId;
use raft_machine::Command;
use raft_machine::CommandError;
use raft_machine::Node;
use raft_machine::NodeBuilder;
use raft_machine::NodeConfig;
use raft_machine::ReadPolicy;
use raft_machine::Result;
use raft_machine::Value;
use serde::Deserialize;
use serde::Serialize;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tracing::error;
use tracing::info;


#[derive(Debug, Default, Serialize, Deserialize)]
struct Store {
    entries: BTreeMap<String, Vec<u8>>,
}

fn key(arg: &[u8]) -> String {
    String::from_utf8_lossy(arg).into_owned()
}

fn store_commands() -> Vec<Command<Store>> {
    vec![
        Command::<Store>::write("set", Arity::Exact(3), |ctx, args| {
            ctx.data().entries.insert(key(&args[0]), args[1].to_vec());
            Ok(Value::Ok)
        }),
        Command::<Store>::read("get", Arity::Exact(2), |ctx, args| {
            Ok(ctx.data().entries.get(&key(&args[0])).cloned().into())
        }),
        Command::<Store>::write("del", Arity::AtLeast(2), |ctx, args| {
            let removed = args
                .iter()
                .filter(|k| ctx.data().entries.remove(&key(k)).is_some())
                .count();
            Ok(Value::Int(removed as i64))
        }),
        Command::<Store>::write("incr", Arity::Exact(2), |ctx, args| {
            let k = key(&args[0]);
            let current = match ctx.data().entries.get(&k) {
                Some(v) => parse_i64(v).ok_or_else(|| CommandError::custom("value is not an integer"))?,
                None => 0,
            };
            let next = current
                .checked_add(1)
                .ok_or_else(|| CommandError::custom("increment would overflow"))?;
            ctx.data().entries.insert(k, next.to_string().into_bytes());
            Ok(Value::Int(next))
        }),
        Command::<Store>::read("keys", Arity::Exact(1), |ctx, _| {
            Ok(Value::Array(
                ctx.data().entries.keys().map(|k| Value::from(k.as_str())).collect(),
            ))
        }),
    ]
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> ExitCode {
    let config = match NodeConfig::new() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initializing Logs
    let _guard = match init_observability(&config.cluster.node_id, &config.cluster.log_dir) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    let node = match NodeBuilder::new(config, Store::default())
        .commands(store_commands())
        .build()
        .await
    {
        Ok(n) => n,
        Err(e) => {
            error!("node failed to start: {:?}", e);
            eprintln!("node failed to start: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!("Application started. Waiting for commands or CTRL+C...");
    let fatal = tokio::select! {
        res = repl(&node) => {
            if let Err(e) = res {
                error!("stdin closed with error: {:?}", e);
            }
            false
        }
        _ = shutdown_signal() => false,
        _ = node.fatal().cancelled() => true,
    };

    if let Err(e) = node.shutdown().await {
        error!("shutdown failed: {:?}", e);
        return ExitCode::FAILURE;
    }
    if fatal {
        return ExitCode::FAILURE;
    }
    println!("Exiting program.");
    ExitCode::SUCCESS
}

async fn repl(node: &Node<Store>) -> Result<()> {
    let caller = CallerId::generate();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }
        let policy = match parts[0] {
            "@open" => Some(ReadPolicy::Open),
            "@strict" => Some(ReadPolicy::Strict),
            _ => None,
        };
        if policy.is_some() {
            parts.remove(0);
        }
        let args: Vec<Bytes> = parts.iter().map(|p| Bytes::copy_from_slice(p.as_bytes())).collect();
        match node.execute(Some(&caller), args, policy).await {
            Ok(v) => println!("{v}"),
            Err(e) => println!("(error) {e}"),
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let (Ok(mut sigint), Ok(mut sigterm)) = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) else {
        error!("failed to install signal handlers");
        return std::future::pending().await;
    };
    tokio::select! {
        _ = sigint.recv() => info!("SIGINT detected."),
        _ = sigterm.recv() => info!("SIGTERM detected."),
    }
}
