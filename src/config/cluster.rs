use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClusterConfig {
    /// Stable identity of this server inside the consensus configuration
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Address the consensus layer listens on and records in the configuration
    #[serde(default = "default_listen_addr")]
    pub listen_address: String,

    /// Externally reachable address handed to clients in redirect hints.
    /// Must stay stable once the node is a cluster member.
    #[serde(default)]
    pub advertise_address: Option<String>,

    /// Existing member to ask for admission when the configuration is empty
    #[serde(default)]
    pub join_address: Option<String>,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            listen_address: default_listen_addr(),
            advertise_address: None,
            join_address: None,
            data_dir: default_data_dir(),
            log_dir: default_log_dir(),
        }
    }
}

impl ClusterConfig {
    /// Validates cluster configuration consistency
    pub fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(invalid("node_id cannot be empty"));
        }

        if self.listen_address.trim().is_empty() {
            return Err(invalid("listen_address cannot be empty"));
        }

        if let Some(addr) = &self.advertise_address {
            if addr.trim().is_empty() {
                return Err(invalid("advertise_address cannot be empty when set"));
            }
        }

        if let Some(addr) = &self.join_address {
            if addr == &self.listen_address {
                return Err(invalid(format!(
                    "join_address {} points at this node's own listen_address",
                    addr
                )));
            }
        }

        validate_directory(&self.data_dir, "data_dir")?;
        validate_directory(&self.log_dir, "log_dir")?;
        Ok(())
    }

    /// The address clients should be redirected to for this node.
    pub fn advertised(&self) -> &str {
        self.advertise_address.as_deref().unwrap_or(&self.listen_address)
    }
}

/// Ensures directory path is non-empty and can be created
pub(crate) fn validate_directory(
    path: &Path,
    name: &str,
) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(invalid(format!("{} path cannot be empty", name)));
    }

    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| {
            invalid(format!(
                "Failed to create {} directory at {}: {}",
                name,
                path.display(),
                e
            ))
        })?;
    }
    Ok(())
}

fn default_node_id() -> String {
    "1".to_string()
}
fn default_listen_addr() -> String {
    "127.0.0.1:11001".to_string()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/tmp/raft-machine/data")
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("/tmp/raft-machine/logs")
}
