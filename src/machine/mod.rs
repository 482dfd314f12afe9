//! Deterministic Machine
//!
//! Holds the user data model together with the replicated clock and seed.
//! The consensus layer drives [`Machine::apply_entry`] with committed batch
//! envelopes; reads run concurrently against the same state under a shared
//! lock. Given the same sequence of entries every replica ends in the same
//! state.

mod clock;
mod command;
mod fsm;
pub mod prng;
mod tick;
mod value;

pub use clock::*;
pub use command::*;
pub use fsm::*;
pub(crate) use tick::*;
pub use value::*;

#[cfg(test)]
mod command_test;
#[cfg(test)]
mod fsm_test;

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;
use tracing::error;
use tracing::trace;

use self::prng::command_rng;
use self::prng::local_rng;
use crate::envelope::decode_batch;
use crate::CommandError;
use crate::CommandResult;
use crate::Error;
use crate::Result;

/// Mutable machine fields, guarded by one lock.
#[derive(Debug)]
pub struct MachineState<D> {
    pub data: D,
    pub clock: Clock,
    /// Lowest log index applied since boot (or restored from a snapshot)
    pub first_index: u64,
    pub applied_index: u64,
}

/// Result of one command inside an applied entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub result: CommandResult,
    pub elapsed: Duration,
}

pub struct Machine<D> {
    state: RwLock<MachineState<D>>,
    commands: CommandTable<D>,
    /// In-flight read executions, for diagnostics
    readers: AtomicUsize,
    /// Replay judged complete enough for open reads
    log_loaded: AtomicBool,
    /// Position of the last tick this node committed as leader, 0 when the
    /// read barrier is not established
    ticked_index: AtomicU64,
    ticked_term: AtomicU64,
}

impl<D> std::fmt::Debug for Machine<D> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Machine")
            .field("clock", &state.clock)
            .field("first_index", &state.first_index)
            .field("applied_index", &state.applied_index)
            .field("commands", &self.commands.len())
            .finish()
    }
}

struct ReaderGuard<'a>(&'a AtomicUsize);

impl<'a> ReaderGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for ReaderGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<D> Machine<D>
where
    D: Send + Sync + 'static,
{
    /// Builds a machine over `data`. The built-in tick is added to `commands`.
    pub fn new(
        data: D,
        mut commands: CommandTable<D>,
    ) -> Result<Self> {
        commands.register(tick_command())?;
        Ok(Self {
            state: RwLock::new(MachineState {
                data,
                clock: Clock::default(),
                first_index: 0,
                applied_index: 0,
            }),
            commands,
            readers: AtomicUsize::new(0),
            log_loaded: AtomicBool::new(false),
            ticked_index: AtomicU64::new(0),
            ticked_term: AtomicU64::new(0),
        })
    }

    pub fn commands(&self) -> &CommandTable<D> {
        &self.commands
    }

    /// Applies one committed batch envelope at `(index, term)`.
    ///
    /// Commands run in batch order under the exclusive lock. Returns
    /// [`Error::Fatal`] when the entry cannot be decoded or names a command
    /// that is not a registered Write command: replicas have diverged.
    pub fn apply_entry(
        &self,
        index: u64,
        term: u64,
        payload: &[u8],
    ) -> Result<Vec<CommandOutcome>> {
        let batch = decode_batch(payload).map_err(|e| {
            error!("log entry {} failed to decode: {}", index, e);
            Error::Fatal(format!("log entry {index} failed to decode: {e}"))
        })?;

        let mut state = self.state.write();
        if index <= state.applied_index {
            return Err(Error::Fatal(format!(
                "log entry {} applied out of order, applied index is {}",
                index, state.applied_index
            )));
        }

        let mut outcomes = Vec::with_capacity(batch.len());
        for (position, args) in batch.iter().enumerate() {
            let started = Instant::now();
            let result = self.apply_command(&mut state, index, term, position, args)?;
            outcomes.push(CommandOutcome {
                result,
                elapsed: started.elapsed(),
            });
        }

        if state.first_index == 0 {
            state.first_index = index;
        }
        state.applied_index = index;
        trace!("applied entry {} with {} commands", index, outcomes.len());
        Ok(outcomes)
    }

    fn apply_command(
        &self,
        state: &mut MachineState<D>,
        index: u64,
        term: u64,
        position: usize,
        args: &[Bytes],
    ) -> Result<CommandResult> {
        let name = args
            .first()
            .ok_or_else(|| Error::Fatal(format!("log entry {index} holds an empty command")))?;
        let command = self.commands.get(name).ok_or_else(|| {
            Error::Fatal(format!(
                "log entry {} holds unknown command '{}'",
                index,
                String::from_utf8_lossy(name)
            ))
        })?;
        let Handler::Write(handler) = command.handler() else {
            return Err(Error::Fatal(format!(
                "log entry {} holds {:?} command '{}'",
                index,
                command.kind(),
                command.name()
            )));
        };

        let tick = is_tick(name);
        if !tick && !state.clock.is_initialized() {
            return Ok(Err(CommandError::NotLeader));
        }
        if let Err(e) = command.validate(args) {
            return Ok(Err(e));
        }

        let mut ctx = WriteContext {
            rng: command_rng(state.clock.seed, index, position),
            data: &mut state.data,
            clock: &mut state.clock,
            index,
            term,
        };
        let result = handler(&mut ctx, &args[1..]);

        if tick && result.is_ok() {
            debug!("tick applied at {}: {:?}", index, state.clock);
            return Ok(Ok(crate::Value::log_position(index, term)));
        }
        Ok(result)
    }

    /// Records a non-command entry (no-op, barrier, configuration) as applied.
    pub fn note_applied(
        &self,
        index: u64,
    ) {
        let mut state = self.state.write();
        if index > state.applied_index {
            if state.first_index == 0 {
                state.first_index = index;
            }
            state.applied_index = index;
        }
    }

    /// Runs a Read handler against local state.
    pub fn execute_read(
        &self,
        handler: &ReadFn<D>,
        args: &[Bytes],
    ) -> CommandResult {
        let _reader = ReaderGuard::enter(&self.readers);
        let state = self.state.read();
        let mut ctx = ReadContext {
            data: &state.data,
            clock: state.clock,
            rng: local_rng(state.clock.seed),
        };
        handler(&mut ctx, args.get(1..).unwrap_or(&[]))
    }

    /// Shared access to the whole state.
    pub fn read<R>(
        &self,
        f: impl FnOnce(&MachineState<D>) -> R,
    ) -> R {
        let _reader = ReaderGuard::enter(&self.readers);
        f(&self.state.read())
    }

    /// Replaces the whole state with a restored snapshot covering the log up
    /// to `index`.
    pub(crate) fn install(
        &self,
        clock: Clock,
        data: D,
        index: u64,
    ) {
        let mut state = self.state.write();
        state.data = data;
        state.clock = clock;
        state.first_index = index;
        state.applied_index = index;
        debug!("machine restored at index {}: {:?}", index, clock);
    }

    pub fn clock(&self) -> Clock {
        self.state.read().clock
    }

    pub fn applied_index(&self) -> u64 {
        self.state.read().applied_index
    }

    pub fn first_index(&self) -> u64 {
        self.state.read().first_index
    }

    pub fn readers(&self) -> usize {
        self.readers.load(Ordering::Acquire)
    }

    pub fn is_log_loaded(&self) -> bool {
        self.log_loaded.load(Ordering::Acquire)
    }

    pub fn set_log_loaded(
        &self,
        loaded: bool,
    ) {
        self.log_loaded.store(loaded, Ordering::Release);
    }

    /// `(index, term)` of the last tick committed by this node as leader.
    pub fn ticked(&self) -> (u64, u64) {
        (
            self.ticked_index.load(Ordering::Acquire),
            self.ticked_term.load(Ordering::Acquire),
        )
    }

    pub fn record_tick(
        &self,
        index: u64,
        term: u64,
    ) {
        self.ticked_term.store(term, Ordering::Release);
        self.ticked_index.store(index, Ordering::Release);
    }

    pub fn reset_ticked(&self) {
        self.ticked_index.store(0, Ordering::Release);
        self.ticked_term.store(0, Ordering::Release);
    }
}
