//! Consensus capability boundary.
//!
//! The core consumes a consensus layer through [`Consensus`] and hands it a
//! [`StateMachine`] together with the stores of [`crate::storage`]. Leader
//! election and replication live behind this trait; [`LocalConsensus`] is a
//! single process implementation over the local stores.

mod local;
pub use local::*;


use std::fmt;
use std::io::Read;
use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;

use crate::CommandOutcome;
use crate::LogRecord;
use crate::Result;
use crate::SnapshotMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Suffrage {
    Voter,
    Nonvoter,
}

/// One member of the consensus configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub id: String,
    /// Consensus (internal) address
    pub address: String,
    pub suffrage: Suffrage,
}

impl Server {
    pub fn voter(
        id: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            suffrage: Suffrage::Voter,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Follower,
    Candidate,
    Leader,
    Shutdown,
}

impl fmt::Display for NodeRole {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            NodeRole::Follower => "Follower",
            NodeRole::Candidate => "Candidate",
            NodeRole::Leader => "Leader",
            NodeRole::Shutdown => "Shutdown",
        };
        f.write_str(s)
    }
}

/// Reply of a committed Apply.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyResponse {
    pub index: u64,
    pub term: u64,
    /// One outcome per command of the submitted batch, same order
    pub outcomes: Vec<CommandOutcome>,
}

/// Point-in-time state captured by [`StateMachine::snapshot`], written out
/// later without holding the machine lock.
pub trait FsmSnapshot: Send {
    fn persist(
        self: Box<Self>,
        sink: &mut dyn Write,
    ) -> Result<()>;
}

/// What the consensus layer drives with committed entries.
pub trait StateMachine: Send + Sync + 'static {
    /// Applies one committed record. An error here is fatal for the node.
    fn apply(
        &self,
        record: &LogRecord,
    ) -> Result<Vec<CommandOutcome>>;

    fn snapshot(&self) -> Result<Box<dyn FsmSnapshot>>;

    /// Replaces all state with the snapshot covering the log up to `index`.
    fn restore(
        &self,
        index: u64,
        source: &mut dyn Read,
    ) -> Result<()>;

    fn applied_index(&self) -> u64;
}

/// Operations the core needs from a consensus layer.
///
/// Leadership failures are reported as [`crate::ConsensusError`]; a state
/// machine divergence surfaces as [`crate::Error::Fatal`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Consensus: Send + Sync + 'static {
    /// Commits `payload` as one log entry and returns the state machine's
    /// per-command outcomes once applied locally.
    async fn apply(
        &self,
        payload: Bytes,
        timeout: Option<Duration>,
    ) -> Result<ApplyResponse>;

    /// Commits a no-op entry; returns its index once applied.
    async fn barrier(
        &self,
        timeout: Option<Duration>,
    ) -> Result<u64>;

    /// Takes a user requested snapshot.
    async fn snapshot(&self) -> Result<SnapshotMeta>;

    async fn get_configuration(&self) -> Result<Vec<Server>>;

    async fn bootstrap_cluster(
        &self,
        servers: Vec<Server>,
    ) -> Result<()>;

    async fn add_voter(
        &self,
        id: String,
        address: String,
        timeout: Duration,
    ) -> Result<()>;

    async fn remove_server(
        &self,
        id: String,
        timeout: Duration,
    ) -> Result<()>;

    /// Current leader as known by this node.
    fn leader(&self) -> Option<Server>;

    fn state(&self) -> NodeRole;

    /// Current term. A new leadership always starts a higher term.
    fn term(&self) -> u64;

    /// Diagnostic key/value pairs.
    fn stats(&self) -> Vec<(String, String)>;

    fn last_index(&self) -> u64;

    async fn shutdown(&self) -> Result<()>;
}
