//! Read-Consistency Controller
//!
//! Reads bypass the log. Before one runs, the controller waits for the
//! caller's own outstanding write, then checks the selected policy:
//!
//! - [`ReadPolicy::Strict`]: this node leads and has committed a tick since
//!   gaining leadership.
//! - [`ReadPolicy::Open`]: any replica whose log replay is judged complete.

mod progress;
pub use progress::*;

#[cfg(test)]
mod reads_test;

use std::sync::Arc;

use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::metrics::REJECTED_READS;
use crate::pipeline::translate_command_error;
use crate::CallerId;
use crate::CommandError;
use crate::CommandResult;
use crate::Consensus;
use crate::LeaderResolver;
use crate::Machine;
use crate::NodeRole;
use crate::ReadFn;
use crate::WriteBarrier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadPolicy {
    /// Leader with an established tick barrier
    #[default]
    Strict,
    /// Any replica with its log loaded
    Open,
}

impl ReadPolicy {
    fn label(&self) -> &'static str {
        match self {
            ReadPolicy::Strict => "strict",
            ReadPolicy::Open => "open",
        }
    }
}

pub struct ReadController<D> {
    machine: Arc<Machine<D>>,
    consensus: Arc<dyn Consensus>,
    barrier: Arc<WriteBarrier>,
    resolver: Arc<dyn LeaderResolver>,
}

impl<D> ReadController<D>
where
    D: Send + Sync + 'static,
{
    pub fn new(
        machine: Arc<Machine<D>>,
        consensus: Arc<dyn Consensus>,
        barrier: Arc<WriteBarrier>,
        resolver: Arc<dyn LeaderResolver>,
    ) -> Self {
        Self {
            machine,
            consensus,
            barrier,
            resolver,
        }
    }

    /// Whether this replica may answer a read under `policy` right now.
    pub fn check(
        &self,
        policy: ReadPolicy,
    ) -> Result<(), CommandError> {
        let res = match policy {
            ReadPolicy::Strict => {
                // The tick must belong to the current leadership, an older
                // term's tick says nothing about reads served now
                let (ticked_index, ticked_term) = self.machine.ticked();
                if self.consensus.state() == NodeRole::Leader
                    && ticked_index != 0
                    && ticked_term == self.consensus.term()
                {
                    Ok(())
                } else {
                    Err(translate_command_error(&CommandError::NotLeader, self.resolver.as_ref()))
                }
            }
            ReadPolicy::Open => {
                if self.machine.is_log_loaded() {
                    Ok(())
                } else {
                    Err(CommandError::Loading)
                }
            }
        };
        if let Err(e) = &res {
            REJECTED_READS.with_label_values(&[policy.label()]).inc();
            debug!("{:?} read rejected: {}", policy, e);
        }
        res
    }

    /// Waits for the caller's own write, checks `policy`, then runs the
    /// handler under the shared lock.
    pub async fn execute(
        &self,
        caller: Option<&CallerId>,
        policy: ReadPolicy,
        handler: &ReadFn<D>,
        args: &[Bytes],
    ) -> CommandResult {
        if let Some(caller) = caller {
            self.barrier.wait(caller).await;
        }
        self.check(policy)?;
        self.machine.execute_read(handler, args)
    }
}
