//! A small key/value data model and its command table.

use std::collections::BTreeMap;

use rand::RngCore;
use serde::Deserialize;
use serde::Serialize;

use crate::convert::parse_i64;
use crate::Arity;
use crate::Command;
use crate::CommandError;
use crate::CommandTable;
use crate::Value;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvData {
    pub entries: BTreeMap<String, Vec<u8>>,
}

fn key(arg: &[u8]) -> String {
    String::from_utf8_lossy(arg).into_owned()
}

pub fn kv_commands() -> Vec<Command<KvData>> {
    vec![
        Command::<KvData>::write("set", Arity::Exact(3), |ctx, args| {
            ctx.data().entries.insert(key(&args[0]), args[1].to_vec());
            Ok(Value::Ok)
        }),
        Command::<KvData>::read("get", Arity::Exact(2), |ctx, args| {
            Ok(ctx.data().entries.get(&key(&args[0])).cloned().map(Value::Bytes).into())
        }),
        Command::<KvData>::write("del", Arity::AtLeast(2), |ctx, args| {
            let removed = args
                .iter()
                .filter(|k| ctx.data().entries.remove(&key(k)).is_some())
                .count();
            Ok(Value::Int(removed as i64))
        }),
        Command::<KvData>::write("incr", Arity::Exact(2), |ctx, args| {
            let k = key(&args[0]);
            let current = match ctx.data().entries.get(&k) {
                Some(v) => parse_i64(v)
                    .ok_or_else(|| CommandError::custom("value is not an integer or out of range"))?,
                None => 0,
            };
            let next = current
                .checked_add(1)
                .ok_or_else(|| CommandError::custom("increment would overflow"))?;
            ctx.data().entries.insert(k, next.to_string().into_bytes());
            Ok(Value::Int(next))
        }),
        // Stores the replicated clock and a replicated random draw
        Command::<KvData>::write("stamp", Arity::Exact(2), |ctx, args| {
            let now = ctx.now();
            let draw = ctx.rng().next_u64();
            ctx.data()
                .entries
                .insert(key(&args[0]), format!("{now}:{draw}").into_bytes());
            Ok(Value::Int(now))
        }),
        Command::<KvData>::read("now", Arity::Exact(1), |ctx, _| Ok(Value::Int(ctx.now()))),
    ]
}

pub fn kv_table() -> CommandTable<KvData> {
    let mut table = CommandTable::new();
    for command in kv_commands() {
        table.register(command).unwrap();
    }
    table
}
