// -
// Database namespaces

/// Sled tree holding log records keyed by big-endian index
pub(crate) const RAFT_LOG_TREE: &str = "_raft_log";
/// Sled tree holding stable key/value facts
pub(crate) const RAFT_STABLE_TREE: &str = "_raft_stable";

/// Stable store hot keys
pub const KEY_CURRENT_TERM: &[u8] = b"CurrentTerm";
pub const KEY_LAST_VOTE_TERM: &[u8] = b"LastVoteTerm";
pub const KEY_LAST_VOTE_CAND: &[u8] = b"LastVoteCand";

/// Snapshot dir
pub(crate) const SNAPSHOT_DIR_PREFIX: &str = "snapshot-";
pub(crate) const SNAPSHOT_TEMP_SUFFIX: &str = ".tmp";
pub(crate) const SNAPSHOT_STATE_FILE: &str = "state.bin";
pub(crate) const SNAPSHOT_META_FILE: &str = "meta.json";

/// Reserved name of the clock/seed advancing write command
pub const TICK_COMMAND: &str = "tick";

/// Number of hash slots advertised by the cluster compatibility command
pub(crate) const CLUSTER_SLOTS: u64 = 16384;

/// Sub directories of `cluster.data_dir`
pub(crate) const STORAGE_DIR: &str = "raft";
pub(crate) const SNAPSHOTS_DIR: &str = "snapshots";
