//! Deterministic Ticker
//!
//! While this node leads, proposes a clock/seed advance through the write
//! pipeline every interval, exactly like any other writer. A committed tick
//! establishes the strict read barrier; a failed one or a lost leadership
//! clears it.

#[cfg(test)]
mod ticker_test;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;

use crate::machine::tick_args;
use crate::metrics::TICKS_COMMITTED;
use crate::time::now_nanos;
use crate::Consensus;
use crate::Machine;
use crate::NodeRole;
use crate::Result;
use crate::Value;
use crate::WritePipeline;

pub struct Ticker<D> {
    machine: Arc<Machine<D>>,
    consensus: Arc<dyn Consensus>,
    pipeline: WritePipeline,
    every: Duration,
}

impl<D> Ticker<D>
where
    D: Send + Sync + 'static,
{
    pub fn new(
        machine: Arc<Machine<D>>,
        consensus: Arc<dyn Consensus>,
        pipeline: WritePipeline,
        every: Duration,
    ) -> Self {
        Self {
            machine,
            consensus,
            pipeline,
            every,
        }
    }

    /// Proposes one tick if leading. Returns whether a tick was committed.
    pub async fn tick_once(&self) -> bool {
        if self.consensus.state() != NodeRole::Leader {
            if self.machine.ticked().0 != 0 {
                info!("no longer leader, read barrier cleared");
                self.machine.reset_ticked();
            }
            return false;
        }

        let outcome = self
            .pipeline
            .write(None, tick_args(now_nanos(), rand::random::<i64>()))
            .await;
        match outcome.result {
            Ok(Value::Array(pos)) if pos.len() == 2 => {
                let (index, term) = (pos[0].as_int().unwrap_or(0), pos[1].as_int().unwrap_or(0));
                if self.machine.ticked().0 == 0 {
                    info!("read barrier established at index {} term {}", index, term);
                }
                self.machine.record_tick(index as u64, term as u64);
                TICKS_COMMITTED.inc();
                true
            }
            other => {
                debug!("tick failed: {:?}", other);
                self.machine.reset_ticked();
                false
            }
        }
    }

    pub async fn run(
        self,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("ticker stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.tick_once().await;
                }
            }
        }
    }
}
