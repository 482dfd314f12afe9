use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    /// sled page cache for the log engine
    #[serde(default = "default_log_cache_capacity")]
    pub log_cache_capacity: u64,

    /// sled page cache for the stable engine
    #[serde(default = "default_stable_cache_capacity")]
    pub stable_cache_capacity: u64,

    #[serde(default = "default_use_compression")]
    pub use_compression: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            log_cache_capacity: default_log_cache_capacity(),
            stable_cache_capacity: default_stable_cache_capacity(),
            use_compression: default_use_compression(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.log_cache_capacity == 0 || self.stable_cache_capacity == 0 {
            return Err(invalid("storage cache capacities must be > 0"));
        }
        Ok(())
    }
}

fn default_log_cache_capacity() -> u64 {
    256 * 1024 * 1024 //256MB
}
fn default_stable_cache_capacity() -> u64 {
    10 * 1024 * 1024 //10MB
}
fn default_use_compression() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SnapshotConfig {
    /// Number of snapshots kept on disk
    #[serde(default = "default_retain")]
    pub retain: usize,

    /// Entries applied since the last snapshot before the local consensus
    /// takes a new one; 0 disables automatic snapshots
    #[serde(default = "default_threshold")]
    pub threshold: u64,

    /// Log entries kept behind a snapshot for slow followers
    #[serde(default = "default_trailing_logs")]
    pub trailing_logs: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            retain: default_retain(),
            threshold: default_threshold(),
            trailing_logs: default_trailing_logs(),
        }
    }
}

impl SnapshotConfig {
    pub fn validate(&self) -> Result<()> {
        if self.retain == 0 {
            return Err(invalid("snapshot.retain must be >= 1"));
        }
        Ok(())
    }
}

fn default_retain() -> usize {
    2
}
fn default_threshold() -> u64 {
    8192
}
fn default_trailing_logs() -> u64 {
    1024
}
