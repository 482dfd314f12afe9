//! Cluster Topology Controller
//!
//! Decides at startup whether this node bootstraps a new cluster, joins an
//! existing one or is already a member. Afterwards it probes every
//! configured server in the background, resolves leader addresses for
//! redirects and serves membership changes. It never touches user data.

mod join;
mod prober;

pub use join::*;
pub use prober::*;


use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::RwLock;
use tokio::time::interval;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::pipeline::translate_error;
use crate::BackoffPolicy;
use crate::ClusterConfig;
use crate::CommandError;
use crate::Consensus;
use crate::Error;
use crate::LeaderResolver;
use crate::Result;
use crate::Server;
use crate::SystemError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyState {
    Unconfigured,
    /// Created a new single voter configuration
    Bootstrapped,
    /// Added to an existing cluster through a join address
    Joined,
    /// Member of a configuration that lists this node
    Steady,
}

impl fmt::Display for TopologyState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One row of a server listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub id: String,
    pub address: String,
    pub leader: bool,
}

/// Reachability learned by the last probe of one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeStatus {
    pub reachable: bool,
    /// Address the server answered on, when reachable
    pub resolved: Option<String>,
}

pub struct Topology {
    node_id: String,
    advertised: String,
    consensus: Arc<dyn Consensus>,
    state: RwLock<TopologyState>,
    /// Configured address -> last probe result
    probes: DashMap<String, ProbeStatus>,
    membership_timeout: Duration,
}

impl fmt::Debug for Topology {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Topology")
            .field("node_id", &self.node_id)
            .field("advertised", &self.advertised)
            .field("state", &*self.state.read())
            .finish()
    }
}

impl Topology {
    pub fn new(
        cluster: &ClusterConfig,
        consensus: Arc<dyn Consensus>,
        membership_timeout: Duration,
    ) -> Self {
        Self {
            node_id: cluster.node_id.clone(),
            advertised: cluster.advertised().to_string(),
            consensus,
            state: RwLock::new(TopologyState::Unconfigured),
            probes: DashMap::new(),
            membership_timeout,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn advertised(&self) -> &str {
        &self.advertised
    }

    pub fn state(&self) -> TopologyState {
        *self.state.read()
    }

    fn set_state(
        &self,
        next: TopologyState,
    ) {
        let mut state = self.state.write();
        if *state != next {
            info!("topology {} -> {}", *state, next);
            *state = next;
        }
    }

    /// Bootstrap, join, or verify existing membership.
    ///
    /// A changed advertised address under an existing membership and a
    /// rejected join are fatal.
    pub async fn start(
        &self,
        cluster: &ClusterConfig,
        transport: Option<Arc<dyn JoinTransport>>,
        policy: BackoffPolicy,
        cancel: &CancellationToken,
    ) -> Result<TopologyState> {
        let servers = self.consensus.get_configuration().await?;

        if !servers.is_empty() {
            if let Some(join) = &cluster.join_address {
                warn!("ignoring join address {}: already a cluster member", join);
            }
            if cluster.advertise_address.is_some() {
                if let Some(me) = servers.iter().find(|s| s.id == self.node_id) {
                    if me.address != self.advertised {
                        error!(
                            "advertised address changed from {} to {}",
                            me.address, self.advertised
                        );
                        return Err(Error::Fatal(format!(
                            "advertised address of node {} changed from {} to {}; remove and re-join the node",
                            self.node_id, me.address, self.advertised
                        )));
                    }
                }
            }
            self.set_state(TopologyState::Steady);
            return Ok(TopologyState::Steady);
        }

        match &cluster.join_address {
            None => {
                info!("bootstrapping new cluster with {} at {}", self.node_id, self.advertised);
                self.consensus
                    .bootstrap_cluster(vec![Server::voter(self.node_id.clone(), self.advertised.clone())])
                    .await?;
                self.set_state(TopologyState::Bootstrapped);
            }
            Some(join_address) => {
                let transport = transport.ok_or_else(|| {
                    SystemError::NodeStartFailed("join address configured without a join transport".to_string())
                })?;
                join_cluster(
                    transport,
                    join_address,
                    &self.node_id,
                    &self.advertised,
                    policy,
                    cancel,
                )
                .await?;
                self.set_state(TopologyState::Joined);
            }
        }
        Ok(self.state())
    }

    /// Every configured server with a leader flag.
    pub async fn list(&self) -> Result<Vec<ServerInfo>> {
        let leader = self.consensus.leader().map(|l| l.id);
        let servers = self.consensus.get_configuration().await?;
        Ok(servers
            .into_iter()
            .map(|s| ServerInfo {
                leader: leader.as_deref() == Some(s.id.as_str()),
                id: s.id,
                address: s.address,
            })
            .collect())
    }

    pub async fn add(
        &self,
        id: &str,
        address: &str,
    ) -> std::result::Result<(), CommandError> {
        info!("adding voter {} at {}", id, address);
        self.consensus
            .add_voter(id.to_string(), address.to_string(), self.membership_timeout)
            .await
            .map_err(|e| translate_error(&e, self))
    }

    pub async fn remove(
        &self,
        id: &str,
    ) -> std::result::Result<(), CommandError> {
        info!("removing server {}", id);
        self.consensus
            .remove_server(id.to_string(), self.membership_timeout)
            .await
            .map_err(|e| translate_error(&e, self))
    }

    pub fn probe_status(
        &self,
        address: &str,
    ) -> Option<ProbeStatus> {
        self.probes.get(address).map(|p| p.clone())
    }

    /// Dials every other configured server once, concurrently, and records
    /// what each one answered.
    pub async fn probe_once(
        &self,
        prober: &dyn PeerProber,
    ) -> Result<()> {
        let servers = self.consensus.get_configuration().await?;
        if servers.iter().any(|s| s.id == self.node_id) {
            self.set_state(TopologyState::Steady);
        }

        let peers: Vec<&Server> = servers.iter().filter(|s| s.id != self.node_id).collect();
        let results = join_all(peers.iter().map(|s| prober.probe(&s.address))).await;
        for (server, res) in peers.iter().zip(results) {
            let status = match res {
                Ok(resolved) => ProbeStatus {
                    reachable: true,
                    resolved: Some(resolved),
                },
                Err(e) => {
                    debug!("probe of {} at {} failed: {:?}", server.id, server.address, e);
                    ProbeStatus {
                        reachable: false,
                        resolved: None,
                    }
                }
            };
            self.probes.insert(server.address.clone(), status);
        }
        self.probes
            .retain(|addr, _| servers.iter().any(|s| &s.address == addr));
        Ok(())
    }

    /// Periodic prober, stops on `shutdown`.
    pub async fn run_prober(
        self: Arc<Self>,
        prober: Arc<dyn PeerProber>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("topology prober stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.probe_once(prober.as_ref()).await {
                        warn!("probe cycle failed: {:?}", e);
                    }
                }
            }
        }
    }
}

impl LeaderResolver for Topology {
    fn leader_hint(&self) -> Option<String> {
        let leader = self.consensus.leader()?;
        if leader.id == self.node_id {
            return Some(self.advertised.clone());
        }
        let resolved = self
            .probes
            .get(&leader.address)
            .and_then(|p| p.resolved.clone());
        Some(resolved.unwrap_or(leader.address))
    }
}
