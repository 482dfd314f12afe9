//! Assembles a [`Node`] from a [`NodeConfig`], a data model and its
//! commands.
//!
//! ## Startup order
//! 1. Validate configuration and open storage under `cluster.data_dir`
//! 2. Register built-in and user commands, build the [`Machine`]
//! 3. Open consensus, which restores the newest snapshot and replays the log
//! 4. Bootstrap, join, or verify membership through [`Topology::start`]
//! 5. Spawn the batch applier, ticker, log progress monitor and prober
//!
//! ## Example
//! ```ignore
//! let node = NodeBuilder::new(config, KvData::default())
//!     .command(set_command())
//!     .command(get_command())
//!     .build()
//!     .await?;
//! ```

use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;

use super::Node;
use crate::async_task::spawn_task;
use crate::constants::SNAPSHOTS_DIR;
use crate::constants::STORAGE_DIR;
use crate::register_system_commands;
use crate::time::now_nanos;
use crate::BatchApplier;
use crate::Command;
use crate::CommandTable;
use crate::Consensus;
use crate::FileSnapshotStore;
use crate::JoinTransport;
use crate::JsonSnapshotCodec;
use crate::LocalConsensus;
use crate::LogProgressMonitor;
use crate::Machine;
use crate::NodeConfig;
use crate::PeerProber;
use crate::ReadController;
use crate::ReplicatedFsm;
use crate::Result;
use crate::SledStorage;
use crate::SnapshotCodec;
use crate::StateMachine;
use crate::SystemContext;
use crate::SystemError;
use crate::TcpPeerProber;
use crate::Ticker;
use crate::Topology;
use crate::WritePipeline;

/// What a consensus factory gets to work with.
pub struct ConsensusParts {
    pub config: NodeConfig,
    pub fsm: Arc<dyn StateMachine>,
    pub storage: SledStorage,
    pub snapshots: Arc<FileSnapshotStore>,
}

/// Opens the consensus capability. Defaults to [`LocalConsensus`].
pub type ConsensusFactory =
    Box<dyn FnOnce(ConsensusParts) -> BoxFuture<'static, Result<Arc<dyn Consensus>>> + Send>;

enum CodecChoice<D> {
    /// JSON, picked by [`NodeBuilder::new`]
    Default(Arc<dyn SnapshotCodec<D>>),
    /// JSON, asked for explicitly
    Json(Arc<dyn SnapshotCodec<D>>),
    Custom(Arc<dyn SnapshotCodec<D>>),
    Conflict,
}

pub struct NodeBuilder<D> {
    config: NodeConfig,
    data: D,
    commands: Vec<Command<D>>,
    codec: CodecChoice<D>,
    join_transport: Option<Arc<dyn JoinTransport>>,
    prober: Option<Arc<dyn PeerProber>>,
    consensus: Option<ConsensusFactory>,
}

impl<D> NodeBuilder<D>
where
    D: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Builder whose snapshots are JSON unless [`Self::snapshot_codec`]
    /// replaces the codec.
    pub fn new(
        config: NodeConfig,
        data: D,
    ) -> Self {
        Self::init(config, data, CodecChoice::Default(Arc::new(JsonSnapshotCodec::default())))
    }

    /// Explicitly selects the JSON codec. Cannot be combined with a custom
    /// codec.
    pub fn json_snapshots(mut self) -> Self {
        self.codec = match self.codec {
            CodecChoice::Custom(_) | CodecChoice::Conflict => CodecChoice::Conflict,
            _ => CodecChoice::Json(Arc::new(JsonSnapshotCodec::default())),
        };
        self
    }
}

impl<D> NodeBuilder<D>
where
    D: Send + Sync + 'static,
{
    /// Builder for data models that bring their own snapshot encoding.
    pub fn with_codec(
        config: NodeConfig,
        data: D,
        codec: Arc<dyn SnapshotCodec<D>>,
    ) -> Self {
        Self::init(config, data, CodecChoice::Custom(codec))
    }

    fn init(
        config: NodeConfig,
        data: D,
        codec: CodecChoice<D>,
    ) -> Self {
        Self {
            config,
            data,
            commands: Vec::new(),
            codec,
            join_transport: None,
            prober: None,
            consensus: None,
        }
    }

    /// Registers a user command. Name clashes fail [`Self::build`].
    pub fn command(
        mut self,
        command: Command<D>,
    ) -> Self {
        self.commands.push(command);
        self
    }

    pub fn commands(
        mut self,
        commands: impl IntoIterator<Item = Command<D>>,
    ) -> Self {
        self.commands.extend(commands);
        self
    }

    /// Replaces the default JSON codec. Cannot be combined with
    /// [`Self::json_snapshots`].
    pub fn snapshot_codec(
        mut self,
        codec: Arc<dyn SnapshotCodec<D>>,
    ) -> Self {
        self.codec = match self.codec {
            CodecChoice::Json(_) | CodecChoice::Conflict => CodecChoice::Conflict,
            _ => CodecChoice::Custom(codec),
        };
        self
    }

    /// Required when `cluster.join_address` is set on a fresh node.
    pub fn join_transport(
        mut self,
        transport: Arc<dyn JoinTransport>,
    ) -> Self {
        self.join_transport = Some(transport);
        self
    }

    /// Overrides the default TCP prober.
    pub fn peer_prober(
        mut self,
        prober: Arc<dyn PeerProber>,
    ) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn consensus<F>(
        mut self,
        factory: F,
    ) -> Self
    where
        F: FnOnce(ConsensusParts) -> BoxFuture<'static, Result<Arc<dyn Consensus>>> + Send + 'static,
    {
        self.consensus = Some(Box::new(factory));
        self
    }

    /// Opens storage and consensus, settles membership and spawns every
    /// background task.
    pub async fn build(self) -> Result<Node<D>> {
        let codec = match self.codec {
            CodecChoice::Default(c) | CodecChoice::Json(c) | CodecChoice::Custom(c) => c,
            CodecChoice::Conflict => {
                return Err(SystemError::NodeStartFailed(
                    "json snapshots and a custom snapshot codec are mutually exclusive".to_string(),
                )
                .into())
            }
        };
        let config = self.config.validate()?;
        let node_id = config.cluster.node_id.clone();
        info!("starting node {} in {:?}", node_id, config.cluster.data_dir);

        let storage = SledStorage::open(config.cluster.data_dir.join(STORAGE_DIR), &config.storage)?;
        let snapshots = Arc::new(FileSnapshotStore::new(
            config.cluster.data_dir.join(SNAPSHOTS_DIR),
            config.snapshot.retain,
        )?);

        let mut table = CommandTable::new();
        register_system_commands(&mut table)?;
        for command in self.commands {
            table.register(command)?;
        }
        let machine = Arc::new(Machine::new(self.data, table)?);
        let fsm: Arc<dyn StateMachine> = Arc::new(ReplicatedFsm::new(machine.clone(), codec));

        let parts = ConsensusParts {
            config: config.clone(),
            fsm,
            storage: storage.clone(),
            snapshots: snapshots.clone(),
        };
        let consensus = match self.consensus {
            Some(factory) => factory(parts).await?,
            None => open_local_consensus(parts).await?,
        };

        let shutdown = CancellationToken::new();
        let fatal = CancellationToken::new();

        let topology = Arc::new(Topology::new(
            &config.cluster,
            consensus.clone(),
            config.topology.membership_timeout(),
        ));
        if let Err(e) = topology
            .start(&config.cluster, self.join_transport, config.retry.join, &shutdown)
            .await
        {
            error!("node {} failed to settle membership: {:?}", node_id, e);
            let _ = consensus.shutdown().await;
            return Err(e);
        }

        let (pipeline, rx) = WritePipeline::new(&config.pipeline);
        let reads = ReadController::new(
            machine.clone(),
            consensus.clone(),
            pipeline.barrier().clone(),
            topology.clone(),
        );
        let system = SystemContext {
            node_id: node_id.clone(),
            machine: machine.clone(),
            consensus: consensus.clone(),
            topology: topology.clone(),
            snapshots: snapshots.clone(),
            boot_time: now_nanos(),
            started: Instant::now(),
        };

        let mut tasks = Vec::new();
        let applier = BatchApplier::new(
            rx,
            consensus.clone(),
            topology.clone(),
            &config.pipeline,
            fatal.clone(),
        );
        tasks.push(spawn_task("batch applier", applier.run(shutdown.clone())));

        let ticker = Ticker::new(
            machine.clone(),
            consensus.clone(),
            pipeline.clone(),
            config.ticker.interval(),
        );
        tasks.push(spawn_task("ticker", ticker.run(shutdown.clone())));

        let monitor = LogProgressMonitor::new(machine.clone(), consensus.clone(), &config.reads);
        tasks.push(spawn_task("log progress monitor", monitor.run(shutdown.clone())));

        let prober = self
            .prober
            .unwrap_or_else(|| Arc::new(TcpPeerProber::new(config.topology.probe_timeout())));
        tasks.push(spawn_task(
            "topology prober",
            topology
                .clone()
                .run_prober(prober, config.topology.probe_interval(), shutdown.clone()),
        ));

        // Divergence stops every task; the owner still calls `shutdown`.
        let (watch_fatal, watch_shutdown) = (fatal.clone(), shutdown.clone());
        tasks.push(spawn_task("fatal watcher", async move {
            tokio::select! {
                _ = watch_fatal.cancelled() => {
                    error!("fatal state machine error, stopping node");
                    watch_shutdown.cancel();
                }
                _ = watch_shutdown.cancelled() => {}
            }
            Ok(())
        }));

        info!("node {} started as {}", node_id, topology.state());
        Ok(Node {
            node_id,
            config,
            machine,
            consensus,
            topology,
            storage,
            pipeline,
            reads,
            system,
            shutdown,
            fatal,
            tasks: Mutex::new(tasks),
        })
    }
}

async fn open_local_consensus(parts: ConsensusParts) -> Result<Arc<dyn Consensus>> {
    let consensus = LocalConsensus::open(
        parts.config.cluster.node_id.clone(),
        parts.config.cluster.advertised().to_string(),
        parts.fsm,
        parts.storage.log_store(),
        parts.storage.stable_store(),
        parts.snapshots,
        parts.config.snapshot.clone(),
    )
    .await?;
    Ok(Arc::new(consensus))
}

/// Wraps an already opened consensus instance as a factory.
pub fn consensus_instance(
    consensus: Arc<dyn Consensus>,
) -> impl FnOnce(ConsensusParts) -> BoxFuture<'static, Result<Arc<dyn Consensus>>> + Send + 'static {
    move |_| async move { Ok(consensus) }.boxed()
}
