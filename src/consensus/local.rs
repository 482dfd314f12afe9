use std::io::BufReader;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::sync::MutexGuard;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::ApplyResponse;
use super::Consensus;
use super::NodeRole;
use super::Server;
use super::StateMachine;
use super::Suffrage;
use crate::constants::KEY_CURRENT_TERM;
use crate::constants::KEY_LAST_VOTE_CAND;
use crate::constants::KEY_LAST_VOTE_TERM;
use crate::ConsensusError;
use crate::Error;
use crate::FileSnapshotStore;
use crate::LogRecord;
use crate::LogStore;
use crate::LogType;
use crate::Result;
use crate::SnapshotConfig;
use crate::SnapshotMeta;
use crate::StableStore;
use crate::StorageError;

/// Position of the newest appended record.
#[derive(Debug, Default, Clone, Copy)]
struct LogTail {
    index: u64,
    term: u64,
}

/// Single process consensus.
///
/// Every entry is committed as soon as it is durably appended to the local
/// log, then applied to the state machine in index order. The node leads
/// whenever the latest configuration lists it as a voter. On open it
/// restores the newest snapshot and replays the log behind it.
pub struct LocalConsensus {
    id: String,
    address: String,
    fsm: Arc<dyn StateMachine>,
    log: Arc<dyn LogStore>,
    stable: Arc<dyn StableStore>,
    snapshots: Arc<FileSnapshotStore>,
    snapshot_config: SnapshotConfig,
    /// Serializes appends; holds the log tail
    tail: Mutex<LogTail>,
    role: RwLock<NodeRole>,
    configuration: ArcSwap<Vec<Server>>,
    configuration_index: AtomicU64,
    term: AtomicU64,
    last_index: AtomicU64,
    last_snapshot_index: AtomicU64,
    last_snapshot_term: AtomicU64,
}

impl std::fmt::Debug for LocalConsensus {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("LocalConsensus")
            .field("id", &self.id)
            .field("role", &*self.role.read())
            .field("term", &self.term.load(Ordering::Acquire))
            .field("last_index", &self.last_index.load(Ordering::Acquire))
            .finish()
    }
}

impl LocalConsensus {
    /// Restores the newest snapshot, replays the log behind it and takes
    /// leadership if the recovered configuration lists this node.
    pub async fn open(
        id: String,
        address: String,
        fsm: Arc<dyn StateMachine>,
        log: Arc<dyn LogStore>,
        stable: Arc<dyn StableStore>,
        snapshots: Arc<FileSnapshotStore>,
        snapshot_config: SnapshotConfig,
    ) -> Result<Self> {
        let consensus = Self {
            id,
            address,
            fsm,
            log,
            stable,
            snapshots,
            snapshot_config,
            tail: Mutex::new(LogTail::default()),
            role: RwLock::new(NodeRole::Follower),
            configuration: ArcSwap::from_pointee(Vec::new()),
            configuration_index: AtomicU64::new(0),
            term: AtomicU64::new(0),
            last_index: AtomicU64::new(0),
            last_snapshot_index: AtomicU64::new(0),
            last_snapshot_term: AtomicU64::new(0),
        };

        {
            let mut tail = consensus.tail.lock().await;
            consensus.recover(&mut tail)?;
            if consensus.is_voter(&consensus.configuration.load()) {
                consensus.become_leader(&mut tail)?;
            }
        }
        info!("local consensus opened: {:?}", consensus);
        Ok(consensus)
    }

    fn recover(
        &self,
        tail: &mut LogTail,
    ) -> Result<()> {
        self.term
            .store(self.stable.get_u64(KEY_CURRENT_TERM)?, Ordering::Release);

        let mut replay_from = 1;
        if let Some(meta) = self.snapshots.latest()? {
            let (_, file) = self.snapshots.open(&meta.id)?;
            self.fsm.restore(meta.index, &mut BufReader::new(file))?;
            self.configuration.store(Arc::new(meta.configuration.clone()));
            self.configuration_index.store(meta.index, Ordering::Release);
            self.last_snapshot_index.store(meta.index, Ordering::Release);
            self.last_snapshot_term.store(meta.term, Ordering::Release);
            *tail = LogTail {
                index: meta.index,
                term: meta.term,
            };
            replay_from = meta.index + 1;
        }

        let first = self.log.first_index()?;
        let last = self.log.last_index()?;
        if last != 0 && first > replay_from {
            return Err(Error::Fatal(format!(
                "log starts at {} but the newest snapshot ends at {}",
                first,
                replay_from - 1
            )));
        }

        let mut replayed = 0u64;
        for index in replay_from.max(first)..=last {
            let record = self.log.get_log(index)?;
            self.commit(&record)?;
            *tail = LogTail {
                index: record.index,
                term: record.term,
            };
            replayed += 1;
        }
        self.last_index.store(tail.index, Ordering::Release);
        info!(
            "replayed {} log entries, last index {}, term {}",
            replayed,
            tail.index,
            self.term.load(Ordering::Acquire)
        );
        Ok(())
    }

    /// Applies a durable record to the state machine and the configuration.
    fn commit(
        &self,
        record: &LogRecord,
    ) -> Result<Vec<crate::CommandOutcome>> {
        if record.log_type == LogType::Configuration {
            let servers: Vec<Server> = bincode::deserialize(&record.data)?;
            self.configuration.store(Arc::new(servers));
            self.configuration_index.store(record.index, Ordering::Release);
        }
        self.fsm.apply(record)
    }

    fn is_voter(
        &self,
        servers: &[Server],
    ) -> bool {
        servers
            .iter()
            .any(|s| s.id == self.id && s.suffrage == Suffrage::Voter)
    }

    fn become_leader(
        &self,
        tail: &mut LogTail,
    ) -> Result<()> {
        let term = self.term.load(Ordering::Acquire) + 1;
        self.stable.set_u64(KEY_CURRENT_TERM, term)?;
        self.stable.set_u64(KEY_LAST_VOTE_TERM, term)?;
        self.stable.set(KEY_LAST_VOTE_CAND, self.id.as_bytes())?;
        self.term.store(term, Ordering::Release);
        *self.role.write() = NodeRole::Leader;

        self.append(tail, LogType::Noop, Bytes::new())?;
        info!("{} became leader at term {}", self.id, term);
        Ok(())
    }

    /// Appends and commits one record at the tail.
    fn append(
        &self,
        tail: &mut LogTail,
        log_type: LogType,
        data: Bytes,
    ) -> Result<ApplyResponse> {
        let term = self.term.load(Ordering::Acquire);
        let record = LogRecord::new(tail.index + 1, term, log_type, data);
        self.log.store_log(&record)?;
        *tail = LogTail {
            index: record.index,
            term,
        };
        self.last_index.store(record.index, Ordering::Release);

        let outcomes = self.commit(&record).map_err(|e| {
            error!("state machine failed at {}: {:?}", record.index, e);
            *self.role.write() = NodeRole::Shutdown;
            e
        })?;
        Ok(ApplyResponse {
            index: record.index,
            term,
            outcomes,
        })
    }

    fn check_leader(&self) -> Result<()> {
        match *self.role.read() {
            NodeRole::Leader => Ok(()),
            NodeRole::Shutdown => Err(ConsensusError::Shutdown.into()),
            _ => Err(ConsensusError::NotLeader.into()),
        }
    }

    async fn lock_tail(
        &self,
        timeout: Option<Duration>,
    ) -> Result<MutexGuard<'_, LogTail>> {
        match timeout {
            Some(t) => tokio::time::timeout(t, self.tail.lock())
                .await
                .map_err(|_| ConsensusError::Timeout.into()),
            None => Ok(self.tail.lock().await),
        }
    }

    fn change_configuration(
        &self,
        tail: &mut LogTail,
        servers: Vec<Server>,
    ) -> Result<()> {
        let data = bincode::serialize(&servers)?;
        self.append(tail, LogType::Configuration, Bytes::from(data))?;
        if !self.is_voter(&servers) {
            info!("{} removed from configuration, stepping down", self.id);
            *self.role.write() = NodeRole::Follower;
        }
        Ok(())
    }

    fn take_snapshot(
        &self,
        tail: &LogTail,
    ) -> Result<SnapshotMeta> {
        if tail.index == 0 || tail.index == self.last_snapshot_index.load(Ordering::Acquire) {
            return Err(StorageError::Snapshot("nothing new to snapshot".to_string()).into());
        }

        let captured = self.fsm.snapshot()?;
        let mut sink =
            self.snapshots
                .create(tail.index, tail.term, Vec::clone(&self.configuration.load()))?;
        captured.persist(&mut sink)?;
        let meta = sink.close()?;
        self.last_snapshot_index.store(meta.index, Ordering::Release);
        self.last_snapshot_term.store(meta.term, Ordering::Release);

        self.compact(meta.index)?;
        Ok(meta)
    }

    /// Drops log entries covered by the snapshot at `index`, keeping
    /// `trailing_logs` of them.
    fn compact(
        &self,
        index: u64,
    ) -> Result<()> {
        let first = self.log.first_index()?;
        let max = index.saturating_sub(self.snapshot_config.trailing_logs);
        if first == 0 || max < first {
            return Ok(());
        }
        self.log.delete_range(first, max)?;
        debug!("compacted log {}..={}", first, max);
        Ok(())
    }

    fn maybe_snapshot(
        &self,
        tail: &LogTail,
    ) {
        let threshold = self.snapshot_config.threshold;
        if threshold == 0 || tail.index - self.last_snapshot_index.load(Ordering::Acquire) < threshold {
            return;
        }
        match self.take_snapshot(tail) {
            Ok(meta) => info!("automatic snapshot {} at index {}", meta.id, meta.index),
            Err(Error::Command(e)) => debug!("automatic snapshot skipped: {}", e),
            Err(e) => warn!("automatic snapshot failed: {:?}", e),
        }
    }
}

#[async_trait]
impl Consensus for LocalConsensus {
    async fn apply(
        &self,
        payload: Bytes,
        timeout: Option<Duration>,
    ) -> Result<ApplyResponse> {
        self.check_leader()?;
        let mut tail = self.lock_tail(timeout).await?;
        self.check_leader()?;
        let response = self.append(&mut tail, LogType::Command, payload)?;
        self.maybe_snapshot(&tail);
        Ok(response)
    }

    async fn barrier(
        &self,
        timeout: Option<Duration>,
    ) -> Result<u64> {
        self.check_leader()?;
        let mut tail = self.lock_tail(timeout).await?;
        self.check_leader()?;
        Ok(self.append(&mut tail, LogType::Barrier, Bytes::new())?.index)
    }

    async fn snapshot(&self) -> Result<SnapshotMeta> {
        let tail = self.tail.lock().await;
        self.take_snapshot(&tail)
    }

    async fn get_configuration(&self) -> Result<Vec<Server>> {
        Ok(Vec::clone(&self.configuration.load()))
    }

    async fn bootstrap_cluster(
        &self,
        servers: Vec<Server>,
    ) -> Result<()> {
        let mut tail = self.tail.lock().await;
        if tail.index != 0 || !self.configuration.load().is_empty() {
            return Err(ConsensusError::Rejected("cluster already bootstrapped".to_string()).into());
        }
        if servers.is_empty() {
            return Err(ConsensusError::Rejected("empty configuration".to_string()).into());
        }

        self.term.store(1, Ordering::Release);
        self.stable.set_u64(KEY_CURRENT_TERM, 1)?;
        self.change_configuration(&mut tail, servers)?;
        if self.is_voter(&self.configuration.load()) {
            self.become_leader(&mut tail)?;
        }
        Ok(())
    }

    async fn add_voter(
        &self,
        id: String,
        address: String,
        timeout: Duration,
    ) -> Result<()> {
        self.check_leader()?;
        let mut tail = self.lock_tail(Some(timeout)).await?;
        self.check_leader()?;

        let mut servers = Vec::clone(&self.configuration.load());
        if servers
            .iter()
            .any(|s| s.id == id && s.address == address && s.suffrage == Suffrage::Voter)
        {
            return Ok(());
        }
        servers.retain(|s| s.id != id && s.address != address);
        servers.push(Server::voter(id, address));
        self.change_configuration(&mut tail, servers)
    }

    async fn remove_server(
        &self,
        id: String,
        timeout: Duration,
    ) -> Result<()> {
        self.check_leader()?;
        let mut tail = self.lock_tail(Some(timeout)).await?;
        self.check_leader()?;

        let mut servers = Vec::clone(&self.configuration.load());
        let before = servers.len();
        servers.retain(|s| s.id != id);
        if servers.len() == before {
            return Err(ConsensusError::UnknownServer(id).into());
        }
        self.change_configuration(&mut tail, servers)
    }

    fn leader(&self) -> Option<Server> {
        (*self.role.read() == NodeRole::Leader).then(|| Server::voter(self.id.clone(), self.address.clone()))
    }

    fn state(&self) -> NodeRole {
        *self.role.read()
    }

    fn term(&self) -> u64 {
        self.term.load(Ordering::Acquire)
    }

    fn stats(&self) -> Vec<(String, String)> {
        let configuration = self.configuration.load();
        let servers: Vec<String> = configuration
            .iter()
            .map(|s| format!("{{Suffrage:{:?} ID:{} Address:{}}}", s.suffrage, s.id, s.address))
            .collect();
        let last_index = self.last_index.load(Ordering::Acquire);
        vec![
            ("state".into(), self.state().to_string()),
            ("term".into(), self.term.load(Ordering::Acquire).to_string()),
            ("last_log_index".into(), last_index.to_string()),
            ("commit_index".into(), last_index.to_string()),
            ("applied_index".into(), self.fsm.applied_index().to_string()),
            (
                "last_snapshot_index".into(),
                self.last_snapshot_index.load(Ordering::Acquire).to_string(),
            ),
            (
                "last_snapshot_term".into(),
                self.last_snapshot_term.load(Ordering::Acquire).to_string(),
            ),
            (
                "latest_configuration_index".into(),
                self.configuration_index.load(Ordering::Acquire).to_string(),
            ),
            ("latest_configuration".into(), format!("[{}]", servers.join(" "))),
            (
                "num_peers".into(),
                configuration.iter().filter(|s| s.id != self.id).count().to_string(),
            ),
        ]
    }

    fn last_index(&self) -> u64 {
        self.last_index.load(Ordering::Acquire)
    }

    async fn shutdown(&self) -> Result<()> {
        let _tail = self.tail.lock().await;
        *self.role.write() = NodeRole::Shutdown;
        self.log.sync()?;
        self.stable.sync()?;
        info!("local consensus {} shut down", self.id);
        Ok(())
    }
}
