//! Storage Engine Adapter
//!
//! Durable persistence required by the consensus layer, built on sled:
//! - [`LogStore`]: append-only log records keyed by integer index
//! - [`StableStore`]: small named facts (current term, last vote)
//! - [`FileSnapshotStore`]: versioned snapshot files on local disk
//!
//! The log and stable stores live in two independent sled instances so they
//! can be flushed separately.

mod log_record;
mod sled_log_store;
mod sled_stable_store;
mod snapshot_store;

#[cfg(test)]
mod sled_log_store_test;

use std::path::Path;
use std::sync::Arc;

pub use log_record::*;
#[cfg(test)]
use mockall::automock;
pub use sled_log_store::*;
pub use sled_stable_store::*;
pub use snapshot_store::*;
use tracing::debug;
use tracing::warn;

use crate::Result;
use crate::StorageConfig;

/// Durable consensus log.
///
/// A lookup miss is reported as [`crate::StorageError::LogNotFound`] and is
/// never conflated with a corrupt record.
#[cfg_attr(test, automock)]
pub trait LogStore: Send + Sync + 'static {
    /// Lowest stored index, 0 when empty
    fn first_index(&self) -> Result<u64>;

    /// Highest stored index, 0 when empty
    fn last_index(&self) -> Result<u64>;

    fn get_log(
        &self,
        index: u64,
    ) -> Result<LogRecord>;

    fn store_log(
        &self,
        record: &LogRecord,
    ) -> Result<()>;

    /// Writes all records then flushes once.
    fn store_logs(
        &self,
        records: &[LogRecord],
    ) -> Result<()>;

    /// Removes `min..=max`.
    fn delete_range(
        &self,
        min: u64,
        max: u64,
    ) -> Result<()>;

    fn sync(&self) -> Result<()>;
}

/// Durable named facts. Absent keys read as `None` / `0`.
#[cfg_attr(test, automock)]
pub trait StableStore: Send + Sync + 'static {
    fn set(
        &self,
        key: &[u8],
        value: &[u8],
    ) -> Result<()>;

    fn get(
        &self,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>>;

    fn set_u64(
        &self,
        key: &[u8],
        value: u64,
    ) -> Result<()>;

    fn get_u64(
        &self,
        key: &[u8],
    ) -> Result<u64>;

    fn sync(&self) -> Result<()>;
}

/// Both persistence capabilities backed by sled.
#[derive(Clone)]
pub struct SledStorage {
    log: Arc<SledLogStore>,
    stable: Arc<SledStableStore>,
}

impl SledStorage {
    /// Opens (or creates) `<dir>/raft_log` and `<dir>/raft_stable`.
    pub fn open(
        dir: impl AsRef<Path> + std::fmt::Debug,
        config: &StorageConfig,
    ) -> Result<Self> {
        let log_db = init_sled_log_db(&dir, config)?;
        let stable_db = init_sled_stable_db(&dir, config)?;
        Ok(Self {
            log: Arc::new(SledLogStore::new(log_db)?),
            stable: Arc::new(SledStableStore::new(stable_db)?),
        })
    }

    pub fn log_store(&self) -> Arc<SledLogStore> {
        self.log.clone()
    }

    pub fn stable_store(&self) -> Arc<SledStableStore> {
        self.stable.clone()
    }

    pub fn sync_log(&self) -> Result<()> {
        self.log.sync()
    }

    pub fn sync_stable(&self) -> Result<()> {
        self.stable.sync()
    }

    pub fn sync(&self) -> Result<()> {
        self.sync_log()?;
        self.sync_stable()
    }
}

pub fn init_sled_log_db(
    root: impl AsRef<Path> + std::fmt::Debug,
    config: &StorageConfig,
) -> std::result::Result<sled::Db, std::io::Error> {
    open_sled(root.as_ref().join("raft_log"), config.log_cache_capacity, config.use_compression)
}

pub fn init_sled_stable_db(
    root: impl AsRef<Path> + std::fmt::Debug,
    config: &StorageConfig,
) -> std::result::Result<sled::Db, std::io::Error> {
    open_sled(
        root.as_ref().join("raft_stable"),
        config.stable_cache_capacity,
        config.use_compression,
    )
}

fn open_sled(
    path: std::path::PathBuf,
    cache_capacity: u64,
    use_compression: bool,
) -> std::result::Result<sled::Db, std::io::Error> {
    debug!("open sled db from path: {:?}", &path);

    sled::Config::default()
        .path(&path)
        .cache_capacity(cache_capacity)
        .use_compression(use_compression)
        .compression_factor(1)
        .open()
        .map_err(|e| {
            warn!("Try to open DB at this location: {:?} and failed: {:?}", path, e);
            std::io::Error::other(e)
        })
}
