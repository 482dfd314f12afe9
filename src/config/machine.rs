use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use crate::ReadPolicy;
use crate::Result;

/// Write pipeline batching parameters
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Maximum number of write requests folded into one consensus entry
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Bounded queue between callers and the applier
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Timeout handed to the consensus Apply call; 0 waits indefinitely
    #[serde(default)]
    pub apply_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            queue_capacity: default_queue_capacity(),
            apply_timeout_ms: 0,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(invalid("pipeline.max_batch_size must be > 0"));
        }
        if self.queue_capacity < self.max_batch_size {
            return Err(invalid(format!(
                "pipeline.queue_capacity {} must be >= max_batch_size {}",
                self.queue_capacity, self.max_batch_size
            )));
        }
        Ok(())
    }

    pub fn apply_timeout(&self) -> Option<Duration> {
        (self.apply_timeout_ms > 0).then(|| Duration::from_millis(self.apply_timeout_ms))
    }
}

fn default_max_batch_size() -> usize {
    1024
}
fn default_queue_capacity() -> usize {
    4096
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TickerConfig {
    /// Period between clock/seed proposals while leader
    #[serde(default = "default_tick_interval")]
    pub interval_ms: u64,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_tick_interval(),
        }
    }
}

impl TickerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(invalid("ticker.interval_ms must be > 0"));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_tick_interval() -> u64 {
    200
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReadConfig {
    /// Policy used when a read does not ask for one explicitly
    #[serde(default)]
    pub default_policy: ReadPolicy,

    /// How often log replay progress is sampled to gate open reads
    #[serde(default = "default_progress_poll_interval")]
    pub progress_poll_interval_ms: u64,

    /// Open reads are allowed once the applied index is within this many
    /// entries of the last log index
    #[serde(default)]
    pub open_read_max_lag: u64,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            default_policy: ReadPolicy::default(),
            progress_poll_interval_ms: default_progress_poll_interval(),
            open_read_max_lag: 0,
        }
    }
}

impl ReadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.progress_poll_interval_ms == 0 {
            return Err(invalid("reads.progress_poll_interval_ms must be > 0"));
        }
        Ok(())
    }

    pub fn progress_poll_interval(&self) -> Duration {
        Duration::from_millis(self.progress_poll_interval_ms)
    }
}

fn default_progress_poll_interval() -> u64 {
    100
}
