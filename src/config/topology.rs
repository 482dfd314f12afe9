use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TopologyConfig {
    /// Period of the reachability prober
    #[serde(default = "default_probe_interval")]
    pub probe_interval_ms: u64,

    /// Per-server dial timeout inside one probe cycle
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// Timeout handed to AddVoter/RemoveServer
    #[serde(default = "default_membership_timeout")]
    pub membership_timeout_ms: u64,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: default_probe_interval(),
            probe_timeout_ms: default_probe_timeout(),
            membership_timeout_ms: default_membership_timeout(),
        }
    }
}

impl TopologyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.probe_interval_ms == 0 {
            return Err(invalid("topology.probe_interval_ms must be > 0"));
        }
        if self.probe_timeout_ms == 0 || self.probe_timeout_ms > self.probe_interval_ms {
            return Err(invalid(format!(
                "topology.probe_timeout_ms {} must be in 1..={}",
                self.probe_timeout_ms, self.probe_interval_ms
            )));
        }
        Ok(())
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn membership_timeout(&self) -> Duration {
        Duration::from_millis(self.membership_timeout_ms)
    }
}

fn default_probe_interval() -> u64 {
    1000
}
fn default_probe_timeout() -> u64 {
    500
}
fn default_membership_timeout() -> u64 {
    10_000
}
