use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::RwLock;
use tracing::debug;
use tracing::error;
use tracing::info;

use super::StableStore;
use crate::constants::KEY_CURRENT_TERM;
use crate::constants::KEY_LAST_VOTE_CAND;
use crate::constants::KEY_LAST_VOTE_TERM;
use crate::constants::RAFT_STABLE_TREE;
use crate::convert::le_to_u64;
use crate::convert::u64_to_le;
use crate::Result;

/// Stable key/value store on a dedicated sled instance.
///
/// The three election-critical keys are mirrored in lock-free fields and
/// never read back from the engine after open. Every other key goes through
/// a read-through cache guarded by its own lock.
pub struct SledStableStore {
    tree: sled::Tree,
    cache: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
    current_term: AtomicU64,
    last_vote_term: AtomicU64,
    last_vote_cand: ArcSwapOption<Vec<u8>>,
}

impl std::fmt::Debug for SledStableStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SledStableStore")
            .field("tree_len", &self.tree.len())
            .field("current_term", &self.current_term.load(Ordering::Acquire))
            .finish()
    }
}

impl Drop for SledStableStore {
    fn drop(&mut self) {
        if let Err(e) = self.tree.flush() {
            error!(?e, "Failed to flush stable store");
        }
    }
}

#[derive(Clone, Copy)]
enum HotKey {
    CurrentTerm,
    LastVoteTerm,
    LastVoteCand,
}

fn hot_key(key: &[u8]) -> Option<HotKey> {
    if key == KEY_CURRENT_TERM {
        Some(HotKey::CurrentTerm)
    } else if key == KEY_LAST_VOTE_TERM {
        Some(HotKey::LastVoteTerm)
    } else if key == KEY_LAST_VOTE_CAND {
        Some(HotKey::LastVoteCand)
    } else {
        None
    }
}

impl SledStableStore {
    pub fn new(db: sled::Db) -> Result<Self> {
        let tree = db.open_tree(RAFT_STABLE_TREE)?;

        let current_term = match tree.get(KEY_CURRENT_TERM)? {
            Some(v) => le_to_u64(&v)?,
            None => 0,
        };
        let last_vote_term = match tree.get(KEY_LAST_VOTE_TERM)? {
            Some(v) => le_to_u64(&v)?,
            None => 0,
        };
        let last_vote_cand = tree.get(KEY_LAST_VOTE_CAND)?.map(|v| Arc::new(v.to_vec()));

        info!(
            "stable store opened: current_term={}, last_vote_term={}",
            current_term, last_vote_term
        );

        Ok(Self {
            tree,
            cache: RwLock::new(HashMap::new()),
            current_term: AtomicU64::new(current_term),
            last_vote_term: AtomicU64::new(last_vote_term),
            last_vote_cand: ArcSwapOption::new(last_vote_cand),
        })
    }

    /// Term mirrored in memory, no storage round trip.
    pub fn current_term(&self) -> u64 {
        self.current_term.load(Ordering::Acquire)
    }

    pub fn last_vote_term(&self) -> u64 {
        self.last_vote_term.load(Ordering::Acquire)
    }

    pub fn last_vote_candidate(&self) -> Option<Arc<Vec<u8>>> {
        self.last_vote_cand.load_full()
    }

    fn write(
        &self,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        self.tree.insert(key, value)?;
        // Term and vote must survive a crash before the caller acts on them
        self.tree.flush()?;
        Ok(())
    }
}

impl StableStore for SledStableStore {
    fn set(
        &self,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        let hot = hot_key(key);
        let number = match hot {
            Some(HotKey::CurrentTerm) | Some(HotKey::LastVoteTerm) => le_to_u64(value)?,
            _ => 0,
        };

        match hot {
            Some(HotKey::LastVoteCand) => {
                self.write(key, value)?;
                self.last_vote_cand.store(Some(Arc::new(value.to_vec())));
            }
            Some(HotKey::CurrentTerm) => {
                self.write(key, value)?;
                self.current_term.store(number, Ordering::Release);
            }
            Some(HotKey::LastVoteTerm) => {
                self.write(key, value)?;
                self.last_vote_term.store(number, Ordering::Release);
            }
            None => {
                // Engine and cache change under one lock, a concurrent miss
                // can not install the previous value afterwards
                let mut cache = self.cache.write();
                self.write(key, value)?;
                cache.insert(key.to_vec(), value.to_vec());
            }
        }
        Ok(())
    }

    fn get(
        &self,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        match hot_key(key) {
            Some(HotKey::LastVoteCand) => return Ok(self.last_vote_cand.load_full().map(|v| v.to_vec())),
            Some(HotKey::CurrentTerm) => return Ok(Some(u64_to_le(self.current_term()).to_vec())),
            Some(HotKey::LastVoteTerm) => return Ok(Some(u64_to_le(self.last_vote_term()).to_vec())),
            None => {}
        }

        if let Some(v) = self.cache.read().get(key) {
            return Ok(Some(v.clone()));
        }

        let mut cache = self.cache.write();
        if let Some(v) = cache.get(key) {
            return Ok(Some(v.clone()));
        }
        match self.tree.get(key)? {
            Some(v) => {
                let v = v.to_vec();
                cache.insert(key.to_vec(), v.clone());
                Ok(Some(v))
            }
            None => {
                debug!("stable key {:?} not found", String::from_utf8_lossy(key));
                Ok(None)
            }
        }
    }

    fn set_u64(
        &self,
        key: &[u8],
        value: u64,
    ) -> Result<()> {
        self.set(key, &u64_to_le(value))
    }

    fn get_u64(
        &self,
        key: &[u8],
    ) -> Result<u64> {
        match hot_key(key) {
            Some(HotKey::CurrentTerm) => Ok(self.current_term()),
            Some(HotKey::LastVoteTerm) => Ok(self.last_vote_term()),
            _ => match self.get(key)? {
                Some(v) => le_to_u64(v),
                None => Ok(0),
            },
        }
    }

    fn sync(&self) -> Result<()> {
        self.tree.flush()?;
        Ok(())
    }
}
