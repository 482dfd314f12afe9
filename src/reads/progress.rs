use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;

use crate::Consensus;
use crate::Machine;
use crate::ReadConfig;
use crate::Result;

/// Share of the local log applied so far, in percent.
pub fn catch_up_percent(
    first: u64,
    applied: u64,
    last: u64,
) -> f64 {
    if last <= first || applied >= last {
        return 100.0;
    }
    let done = applied.saturating_sub(first) as f64;
    (done / (last - first) as f64 * 100.0).clamp(0.0, 100.0)
}

/// Polls apply progress and flips the machine's log-loaded flag in both
/// directions.
pub struct LogProgressMonitor<D> {
    machine: Arc<Machine<D>>,
    consensus: Arc<dyn Consensus>,
    poll_interval: Duration,
    max_lag: u64,
}

impl<D> LogProgressMonitor<D>
where
    D: Send + Sync + 'static,
{
    pub fn new(
        machine: Arc<Machine<D>>,
        consensus: Arc<dyn Consensus>,
        config: &ReadConfig,
    ) -> Self {
        Self {
            machine,
            consensus,
            poll_interval: config.progress_poll_interval(),
            max_lag: config.open_read_max_lag,
        }
    }

    /// One evaluation; returns the new flag value.
    pub fn poll_once(&self) -> bool {
        let last = self.consensus.last_index();
        let applied = self.machine.applied_index();
        let loaded = applied.saturating_add(self.max_lag) >= last;

        let was = self.machine.is_log_loaded();
        if loaded != was {
            self.machine.set_log_loaded(loaded);
            if loaded {
                info!("log loaded at index {} of {}", applied, last);
            } else {
                info!("log fell behind: applied {} of {}", applied, last);
            }
        } else if !loaded {
            debug!(
                "loading log: {:.1}%",
                catch_up_percent(self.machine.first_index(), applied, last)
            );
        }
        loaded
    }

    pub async fn run(
        self,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("log progress monitor stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.poll_once();
                }
            }
        }
    }
}
