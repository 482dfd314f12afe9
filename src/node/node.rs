use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::machine::is_tick;
use crate::CallerId;
use crate::CommandError;
use crate::CommandResult;
use crate::Consensus;
use crate::Handler;
use crate::Machine;
use crate::NodeConfig;
use crate::PendingWrite;
use crate::ReadController;
use crate::ReadPolicy;
use crate::Result;
use crate::SledStorage;
use crate::SystemContext;
use crate::Topology;
use crate::WritePipeline;

/// A running replica: the command entry point plus the tasks behind it.
pub struct Node<D> {
    pub(super) node_id: String,
    pub(super) config: NodeConfig,
    pub(super) machine: Arc<Machine<D>>,
    pub(super) consensus: Arc<dyn Consensus>,
    pub(super) topology: Arc<Topology>,
    pub(super) storage: SledStorage,
    pub(super) pipeline: WritePipeline,
    pub(super) reads: ReadController<D>,
    pub(super) system: SystemContext<D>,
    pub(super) shutdown: CancellationToken,
    pub(super) fatal: CancellationToken,
    pub(super) tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<D> std::fmt::Debug for Node<D> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("node_id", &self.node_id)
            .field("role", &self.consensus.state())
            .finish()
    }
}

impl<D> Node<D>
where
    D: Send + Sync + 'static,
{
    /// Runs one command.
    ///
    /// `args[0]` is the command name. Writes go through the batching
    /// pipeline, reads through the consistency gate under `policy` (the
    /// configured default when `None`), System commands run directly.
    pub async fn execute(
        &self,
        caller: Option<&CallerId>,
        args: Vec<Bytes>,
        policy: Option<ReadPolicy>,
    ) -> CommandResult {
        let name = args
            .first()
            .ok_or_else(|| CommandError::UnknownCommand(String::new()))?;
        if is_tick(name) {
            warn!("rejected external {} from {:?}", String::from_utf8_lossy(name), caller);
            return Err(CommandError::Unauthorized);
        }
        let command = self
            .machine
            .commands()
            .get(name)
            .ok_or_else(|| CommandError::UnknownCommand(String::from_utf8_lossy(name).to_lowercase()))?;
        command.validate(&args)?;

        match command.handler() {
            Handler::System(f) => f(self.system.clone(), args).await,
            Handler::Read(f) => {
                let policy = policy.unwrap_or(self.config.reads.default_policy);
                self.reads.execute(caller, policy, f, &args).await
            }
            Handler::Write(_) => self.pipeline.write(caller, args).await.result,
        }
    }

    /// Queues a write and returns without waiting for it to commit.
    ///
    /// Validation happens here; the returned handle resolves with the
    /// outcome. A later read by the same `caller` waits for it.
    pub async fn submit_write(
        &self,
        caller: Option<&CallerId>,
        args: Vec<Bytes>,
    ) -> std::result::Result<PendingWrite, CommandError> {
        let name = args
            .first()
            .ok_or_else(|| CommandError::UnknownCommand(String::new()))?;
        if is_tick(name) {
            return Err(CommandError::Unauthorized);
        }
        let command = self
            .machine
            .commands()
            .get(name)
            .ok_or_else(|| CommandError::UnknownCommand(String::from_utf8_lossy(name).to_lowercase()))?;
        if !matches!(command.handler(), Handler::Write(_)) {
            return Err(CommandError::custom(format!("'{}' is not a write command", command.name())));
        }
        command.validate(&args)?;
        self.pipeline.submit(caller, args).await
    }

    /// Waits until this node has committed a tick as leader, making strict
    /// reads possible. Returns `false` on timeout.
    pub async fn wait_ready(
        &self,
        timeout: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        while self.machine.ticked().0 == 0 {
            if Instant::now() >= deadline || self.shutdown.is_cancelled() {
                return false;
            }
            sleep(Duration::from_millis(5)).await;
        }
        true
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn machine(&self) -> &Arc<Machine<D>> {
        &self.machine
    }

    pub fn consensus(&self) -> &Arc<dyn Consensus> {
        &self.consensus
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    /// Cancelled once the state machine reports divergence. The process
    /// should shut the node down and exit non-zero.
    pub fn fatal(&self) -> &CancellationToken {
        &self.fatal
    }

    /// Stops every background task, then closes consensus and flushes
    /// storage. Safe to call more than once.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        if tasks.is_empty() {
            debug!("node {} already stopped", self.node_id);
            return Ok(());
        }
        info!("stopping node {}", self.node_id);
        for task in tasks {
            task.await?;
        }
        self.consensus.shutdown().await?;
        self.storage.sync()?;
        info!("node {} stopped", self.node_id);
        Ok(())
    }
}
