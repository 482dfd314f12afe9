use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use sled::Batch;
use sled::IVec;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::instrument;
use tracing::trace;

use super::LogRecord;
use super::LogStore;
use crate::constants::RAFT_LOG_TREE;
use crate::convert::safe_kv;
use crate::convert::safe_vk;
use crate::Result;
use crate::StorageError;

/// Log store on a dedicated sled instance.
///
/// First/last indices are cached in atomics and refreshed after every
/// successful write or delete, so index queries never touch the engine.
pub struct SledLogStore {
    db: sled::Db,
    tree: sled::Tree,
    first_index: AtomicU64,
    last_index: AtomicU64,
}

impl std::fmt::Debug for SledLogStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SledLogStore")
            .field("first_index", &self.first_index.load(Ordering::Acquire))
            .field("last_index", &self.last_index.load(Ordering::Acquire))
            .finish()
    }
}

impl Drop for SledLogStore {
    fn drop(&mut self) {
        match self.db.flush() {
            Ok(_) => info!("Successfully flush log store"),
            Err(e) => error!(?e, "Failed to flush log store"),
        }
    }
}

impl SledLogStore {
    pub fn new(db: sled::Db) -> Result<Self> {
        let tree = db.open_tree(RAFT_LOG_TREE)?;
        let store = Self {
            db,
            tree,
            first_index: AtomicU64::new(0),
            last_index: AtomicU64::new(0),
        };
        store.refresh_bounds()?;
        debug!(?store, "log store opened");
        Ok(store)
    }

    /// Reloads the cached bounds from the tree's first and last keys.
    fn refresh_bounds(&self) -> Result<()> {
        let first = match self.tree.first()? {
            Some((key, _)) => safe_vk(&key)?,
            None => 0,
        };
        let last = match self.tree.last()? {
            Some((key, _)) => safe_vk(&key)?,
            None => 0,
        };
        self.first_index.store(first, Ordering::Release);
        self.last_index.store(last, Ordering::Release);
        Ok(())
    }

    fn note_appended(
        &self,
        min: u64,
        max: u64,
    ) {
        let first = self.first_index.load(Ordering::Acquire);
        if first == 0 || min < first {
            self.first_index.store(min, Ordering::Release);
        }
        self.last_index.fetch_max(max, Ordering::AcqRel);
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

impl LogStore for SledLogStore {
    fn first_index(&self) -> Result<u64> {
        Ok(self.first_index.load(Ordering::Acquire))
    }

    fn last_index(&self) -> Result<u64> {
        Ok(self.last_index.load(Ordering::Acquire))
    }

    #[instrument(skip(self))]
    fn get_log(
        &self,
        index: u64,
    ) -> Result<LogRecord> {
        match self.tree.get(safe_kv(index))? {
            Some(bytes) => LogRecord::decode(&bytes),
            None => Err(StorageError::LogNotFound(index).into()),
        }
    }

    fn store_log(
        &self,
        record: &LogRecord,
    ) -> Result<()> {
        self.store_logs(std::slice::from_ref(record))
    }

    #[instrument(skip_all, fields(len = records.len()))]
    fn store_logs(
        &self,
        records: &[LogRecord],
    ) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut batch = Batch::default();
        let mut min = u64::MAX;
        let mut max = 0;
        for record in records {
            // The value buffer is sized exactly and handed over to the engine
            let value = IVec::from(record.encode()?);
            batch.insert(safe_kv(record.index).to_vec(), value);
            min = min.min(record.index);
            max = max.max(record.index);
        }

        self.tree.apply_batch(batch)?;
        self.tree.flush()?;
        self.note_appended(min, max);
        trace!("store_logs {}..={}, last_index = {}", min, max, max);
        Ok(())
    }

    #[instrument(skip(self))]
    fn delete_range(
        &self,
        min: u64,
        max: u64,
    ) -> Result<()> {
        if min > max {
            return Ok(());
        }

        let mut batch = Batch::default();
        for item in self.tree.range(safe_kv(min)..=safe_kv(max)) {
            let (key, _) = item?;
            batch.remove(key);
        }
        self.tree.apply_batch(batch)?;

        // A range entirely below the first index leaves the bounds alone
        let first = self.first_index.load(Ordering::Acquire);
        if max >= first {
            if min <= first && self.last_index.load(Ordering::Acquire) > max {
                // Prefix compaction, the common case after a snapshot
                self.first_index.store(max + 1, Ordering::Release);
            } else {
                self.refresh_bounds()?;
            }
        }
        debug!(
            "delete_range {}..={}, first_index = {}",
            min,
            max,
            self.first_index.load(Ordering::Acquire)
        );
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.tree.flush()?;
        Ok(())
    }
}
