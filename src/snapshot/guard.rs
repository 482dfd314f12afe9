//! Single-in-flight snapshot guard (RAII).
//!
//! Acquiring sets a shared flag; a second acquisition while the flag is set
//! fails with [`CommandError::SnapshotInProgress`]. Dropping the guard
//! clears the flag. The guard owns its flag so it can travel with a
//! captured snapshot until that snapshot is persisted.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::CommandError;

#[derive(Debug)]
pub struct SnapshotGuard {
    flag: Arc<AtomicBool>,
}

impl SnapshotGuard {
    pub fn acquire(flag: &Arc<AtomicBool>) -> Result<Self, CommandError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| CommandError::SnapshotInProgress)?;
        Ok(Self { flag: flag.clone() })
    }
}

impl Drop for SnapshotGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
