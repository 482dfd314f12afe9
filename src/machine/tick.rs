use bytes::Bytes;

use super::Arity;
use super::Command;
use super::WriteContext;
use crate::constants::TICK_COMMAND;
use crate::convert::parse_i64;
use crate::CommandError;
use crate::CommandResult;
use crate::Value;

/// Built-in `tick <ts> <seed>`, the only command allowed to move the
/// replicated clock. The apply path replaces its reply with the entry's
/// `[index, term]`.
pub(crate) fn tick_command<D: 'static>() -> Command<D> {
    Command::write(TICK_COMMAND, Arity::Exact(3), apply_tick::<D>)
}

fn apply_tick<D>(
    ctx: &mut WriteContext<'_, D>,
    args: &[Bytes],
) -> CommandResult {
    let ts = args.first().and_then(|a| parse_i64(a)).ok_or(CommandError::Syntax)?;
    let seed = args.get(1).and_then(|a| parse_i64(a)).ok_or(CommandError::Syntax)?;
    let next = ctx.clock().advance(ts, seed);
    ctx.set_clock(next);
    Ok(Value::Ok)
}

/// Arguments of a tick proposing `(ts, seed)`.
pub(crate) fn tick_args(
    ts: i64,
    seed: i64,
) -> Vec<Bytes> {
    vec![
        Bytes::from_static(TICK_COMMAND.as_bytes()),
        Bytes::from(ts.to_string()),
        Bytes::from(seed.to_string()),
    ]
}

pub(crate) fn is_tick(name: &[u8]) -> bool {
    name.eq_ignore_ascii_case(TICK_COMMAND.as_bytes())
}
