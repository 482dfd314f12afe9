//! Configuration management for a replicated state machine node.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
//! - Component-wise validation
mod cluster;
mod machine;
mod retry;
mod storage;
mod topology;
pub use cluster::*;
pub use machine::*;
pub use retry::*;
pub use storage::*;
pub use topology::*;


use std::env;
use std::fmt::Debug;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

pub(crate) const ENV_PREFIX: &str = "RAFT_MACHINE";

/// Main configuration container
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct NodeConfig {
    /// Node identity, addresses and directories
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// Write batching
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Replicated clock advancement
    #[serde(default)]
    pub ticker: TickerConfig,
    /// Read consistency defaults
    #[serde(default)]
    pub reads: ReadConfig,
    /// Membership probing and changes
    #[serde(default)]
    pub topology: TopologyConfig,
    /// Snapshot retention and cadence
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    /// Embedded engine tuning
    #[serde(default)]
    pub storage: StorageConfig,
    /// Retry policies for distributed operations
    #[serde(default)]
    pub retry: RetryPolicies,
}

impl Debug for NodeConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("NodeConfig").field("cluster", &self.cluster).finish()
    }
}

impl NodeConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Later sources override earlier ones:
    /// 1. Type defaults
    /// 2. Configuration file from `CONFIG_PATH` (if set)
    /// 3. Environment variables with `RAFT_MACHINE__` prefix
    ///
    /// # Example
    /// ```ignore
    /// std::env::set_var("RAFT_MACHINE__CLUSTER__NODE_ID", "n2");
    /// let cfg = NodeConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(env_source());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order: current values, then the file, then environment
    /// variables again so they keep the highest priority.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every section and returns the validated instance.
    pub fn validate(self) -> Result<Self> {
        self.cluster.validate()?;
        self.pipeline.validate()?;
        self.ticker.validate()?;
        self.reads.validate()?;
        self.topology.validate()?;
        self.snapshot.validate()?;
        self.storage.validate()?;
        self.retry.validate()?;
        Ok(self)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}

/// Shorthand used by every section validator.
pub(crate) fn invalid(msg: impl Into<String>) -> crate::Error {
    crate::Error::Config(config::ConfigError::Message(msg.into()))
}
