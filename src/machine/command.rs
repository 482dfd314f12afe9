//! Typed command registry.
//!
//! Every command is registered once with a name, an arity and a handler
//! whose variant fixes its kind. Dispatch matches on the handler variant, so
//! a Read handler can never be handed mutable data and only Write handlers
//! can be encoded into the log.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;

use super::prng::CommandRng;
use super::Clock;
use crate::system::SystemContext;
use crate::CommandError;
use crate::CommandResult;
use crate::Result;
use crate::SystemError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Administrative, runs outside the log against node components
    System,
    /// Runs against local data under a shared lock
    Read,
    /// Encoded into the log and applied on every replica
    Write,
}

/// Accepted argument count, command name included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(
        &self,
        argc: usize,
    ) -> bool {
        match *self {
            Arity::Exact(n) => argc == n,
            Arity::AtLeast(n) => argc >= n,
        }
    }
}

/// View handed to Write handlers on the apply path.
pub struct WriteContext<'a, D> {
    pub(crate) data: &'a mut D,
    pub(crate) clock: &'a mut Clock,
    pub(crate) rng: CommandRng,
    pub(crate) index: u64,
    pub(crate) term: u64,
}

impl<D> WriteContext<'_, D> {
    pub fn data(&mut self) -> &mut D {
        self.data
    }

    /// Replicated time of the last applied tick.
    pub fn now(&self) -> i64 {
        self.clock.ts
    }

    pub fn clock(&self) -> Clock {
        *self.clock
    }

    /// Generator derived from the replicated seed and this command's log
    /// position.
    pub fn rng(&mut self) -> &mut CommandRng {
        &mut self.rng
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn term(&self) -> u64 {
        self.term
    }

    /// Installs the next clock value. Reachable only from the built-in tick.
    pub(crate) fn set_clock(
        &mut self,
        next: Clock,
    ) {
        *self.clock = next;
    }
}

/// View handed to Read handlers. Clock and generator are local copies,
/// nothing done here reaches replicated state.
pub struct ReadContext<'a, D> {
    pub(crate) data: &'a D,
    pub(crate) clock: Clock,
    pub(crate) rng: CommandRng,
}

impl<D> ReadContext<'_, D> {
    pub fn data(&self) -> &D {
        self.data
    }

    pub fn now(&self) -> i64 {
        self.clock.ts
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    pub fn rng(&mut self) -> &mut CommandRng {
        &mut self.rng
    }
}

/// Read and Write handlers receive the arguments after the command name.
pub type WriteFn<D> = Arc<dyn Fn(&mut WriteContext<'_, D>, &[Bytes]) -> CommandResult + Send + Sync>;
pub type ReadFn<D> = Arc<dyn Fn(&mut ReadContext<'_, D>, &[Bytes]) -> CommandResult + Send + Sync>;
/// System handlers receive the full argument vector.
pub type SystemFn<D> =
    Arc<dyn Fn(SystemContext<D>, Vec<Bytes>) -> BoxFuture<'static, CommandResult> + Send + Sync>;

pub enum Handler<D> {
    System(SystemFn<D>),
    Read(ReadFn<D>),
    Write(WriteFn<D>),
}

impl<D> Clone for Handler<D> {
    fn clone(&self) -> Self {
        match self {
            Handler::System(f) => Handler::System(f.clone()),
            Handler::Read(f) => Handler::Read(f.clone()),
            Handler::Write(f) => Handler::Write(f.clone()),
        }
    }
}

pub struct Command<D> {
    name: String,
    arity: Arity,
    handler: Handler<D>,
}

impl<D> Clone for Command<D> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            arity: self.arity,
            handler: self.handler.clone(),
        }
    }
}

impl<D> fmt::Debug for Command<D> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("arity", &self.arity)
            .finish()
    }
}

impl<D> Command<D> {
    pub fn write<F>(
        name: &str,
        arity: Arity,
        f: F,
    ) -> Self
    where
        F: Fn(&mut WriteContext<'_, D>, &[Bytes]) -> CommandResult + Send + Sync + 'static,
    {
        Self::new(name, arity, Handler::Write(Arc::new(f)))
    }

    pub fn read<F>(
        name: &str,
        arity: Arity,
        f: F,
    ) -> Self
    where
        F: Fn(&mut ReadContext<'_, D>, &[Bytes]) -> CommandResult + Send + Sync + 'static,
    {
        Self::new(name, arity, Handler::Read(Arc::new(f)))
    }

    pub fn system<F>(
        name: &str,
        arity: Arity,
        f: F,
    ) -> Self
    where
        F: Fn(SystemContext<D>, Vec<Bytes>) -> BoxFuture<'static, CommandResult> + Send + Sync + 'static,
    {
        Self::new(name, arity, Handler::System(Arc::new(f)))
    }

    fn new(
        name: &str,
        arity: Arity,
        handler: Handler<D>,
    ) -> Self {
        Self {
            name: name.to_ascii_lowercase(),
            arity,
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CommandKind {
        match self.handler {
            Handler::System(_) => CommandKind::System,
            Handler::Read(_) => CommandKind::Read,
            Handler::Write(_) => CommandKind::Write,
        }
    }

    pub fn handler(&self) -> &Handler<D> {
        &self.handler
    }

    /// Checks the argument count, command name included.
    pub fn validate(
        &self,
        args: &[Bytes],
    ) -> std::result::Result<(), CommandError> {
        if self.arity.accepts(args.len()) {
            Ok(())
        } else {
            Err(CommandError::WrongArgs(self.name.clone()))
        }
    }
}

/// Name to command mapping, filled once at startup.
pub struct CommandTable<D> {
    commands: HashMap<String, Command<D>>,
}

impl<D> Default for CommandTable<D> {
    fn default() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }
}

impl<D> fmt::Debug for CommandTable<D> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let mut names: Vec<&String> = self.commands.keys().collect();
        names.sort();
        f.debug_struct("CommandTable").field("commands", &names).finish()
    }
}

impl<D> CommandTable<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `command`; a name already taken is a startup error.
    pub fn register(
        &mut self,
        command: Command<D>,
    ) -> Result<()> {
        if self.commands.contains_key(command.name()) {
            return Err(SystemError::NodeStartFailed(format!(
                "command '{}' registered twice",
                command.name()
            ))
            .into());
        }
        self.commands.insert(command.name.clone(), command);
        Ok(())
    }

    /// Case-insensitive lookup by raw name bytes.
    pub fn get(
        &self,
        name: &[u8],
    ) -> Option<&Command<D>> {
        let name = std::str::from_utf8(name).ok()?;
        if let Some(cmd) = self.commands.get(name) {
            return Some(cmd);
        }
        self.commands.get(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }
}
