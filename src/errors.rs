//! Replicated State Machine Error Hierarchy
//!
//! Errors are grouped by the boundary they cross:
//! - [`ConsensusError`]: what the consensus capability reports back to the core
//! - [`CommandError`]: what callers of the node see, already translated
//! - [`StorageError`]: Storage Engine Adapter and snapshot store failures
//! - [`Error::Fatal`]: divergence or corruption, the node must stop

use std::path::PathBuf;

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

/// Result of a single command execution as seen by its caller.
pub type CommandResult = std::result::Result<crate::Value, CommandError>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Infrastructure-level failures (storage, serialization, tasks)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Configuration loading and validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Failures reported by the consensus layer
    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    /// Caller visible command failures
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl Error {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error("Storage operation failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Node failed to start: {0}")]
    NodeStartFailed(String),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Disk I/O failures during log/snapshot operations
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("Error occurred at path: {path}")]
    PathError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Embedded database errors
    #[error("Embedded database error: {0}")]
    DbError(String),

    /// Point lookup of a log index that is not stored
    #[error("log not found: {0}")]
    LogNotFound(u64),

    /// A persisted record failed structural validation
    #[error("Data corruption detected at {location}")]
    DataCorruption { location: String },

    /// Snapshot creation/restoration failures
    #[error("Snapshot operation failed: {0}")]
    Snapshot(String),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// Error type for value conversion operations
    #[error("Value convert failed: {0}")]
    Convert(#[from] ConvertError),
}

/// Error type for value conversion operations
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// This occurs when the input byte slice length doesn't match the required 8 bytes.
    #[error("invalid byte length: expected 8 bytes, received {0} bytes")]
    InvalidLength(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("Bincode serialization failed: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Json serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Batch envelope malformed: {0}")]
    Envelope(String),
}

/// Errors surfaced by the consensus capability.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsensusError {
    #[error("node is not the leader")]
    NotLeader,

    #[error("leadership lost while committing")]
    LeadershipLost,

    #[error("consensus layer is shutting down")]
    Shutdown,

    #[error("timed out enqueuing operation")]
    Timeout,

    #[error("unknown server: {0}")]
    UnknownServer(String),

    #[error("operation rejected: {0}")]
    Rejected(String),
}

impl ConsensusError {
    /// Not-leader, leadership-lost and shutdown are answered with a redirect
    /// hint or a cluster-down signal, never passed through verbatim.
    pub fn is_leadership_class(&self) -> bool {
        matches!(
            self,
            ConsensusError::NotLeader | ConsensusError::LeadershipLost | ConsensusError::Shutdown
        )
    }
}

/// Errors returned to callers of the node.
///
/// The `Display` strings follow the conventional reply prefixes of key/value
/// wire protocols so an adapter can forward them as-is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArgs(String),

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR unauthorized")]
    Unauthorized,

    /// Leadership-class failure not yet translated into a redirect.
    #[error("ERR node is not the leader")]
    NotLeader,

    #[error("MOVED 0 {0}")]
    Moved(String),

    #[error("CLUSTERDOWN The cluster is down")]
    ClusterDown,

    #[error("LOADING The log is loading")]
    Loading,

    #[error("ERR snapshot already in progress")]
    SnapshotInProgress,

    #[error("ERR {0}")]
    Custom(String),
}

impl CommandError {
    pub fn custom(msg: impl Into<String>) -> Self {
        CommandError::Custom(msg.into())
    }

    pub fn is_leadership_class(&self) -> bool {
        matches!(self, CommandError::NotLeader)
    }
}

// ============== Conversion Implementations ============== //
impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::System(SystemError::Storage(e))
    }
}

impl From<ConvertError> for Error {
    fn from(e: ConvertError) -> Self {
        Error::System(SystemError::Storage(StorageError::Convert(e)))
    }
}

impl From<SerializationError> for Error {
    fn from(e: SerializationError) -> Self {
        Error::System(SystemError::Serialization(e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        StorageError::IoError(e).into()
    }
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        StorageError::DbError(err.to_string()).into()
    }
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::DbError(err.to_string())
    }
}

impl From<JoinError> for Error {
    fn from(err: JoinError) -> Self {
        SystemError::TaskFailed(err).into()
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        SerializationError::Bincode(err).into()
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        SerializationError::Json(err).into()
    }
}
