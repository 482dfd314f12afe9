use std::fs::File;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncSeekExt;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::constants::SNAPSHOT_DIR_PREFIX;
use crate::constants::SNAPSHOT_META_FILE;
use crate::constants::SNAPSHOT_STATE_FILE;
use crate::constants::SNAPSHOT_TEMP_SUFFIX;
use crate::file_io::remove_path;
use crate::time::now_nanos;
use crate::Result;
use crate::Server;
use crate::StorageError;

/// Metadata persisted next to every snapshot payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub id: String,
    /// Monotonic per-store sequence, newest is highest
    pub version: u64,
    /// Last log index covered by the snapshot
    pub index: u64,
    pub term: u64,
    /// Size of `state.bin` in bytes
    pub size: u64,
    /// Membership at `index`
    pub configuration: Vec<Server>,
    pub created_at: i64,
}

/// Snapshot directories on local disk.
///
/// Layout: `<dir>/snapshot-{version}-{index}-{term}/{state.bin,meta.json}`.
/// A snapshot is written into a `.tmp` sibling and renamed into place on
/// close, so a listed snapshot is always complete.
#[derive(Debug)]
pub struct FileSnapshotStore {
    dir: PathBuf,
    retain: usize,
    next_version: AtomicU64,
}

impl FileSnapshotStore {
    pub fn new(
        dir: impl AsRef<Path>,
        retain: usize,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| StorageError::PathError {
            path: dir.clone(),
            source: e,
        })?;

        let store = Self {
            dir,
            retain: retain.max(1),
            next_version: AtomicU64::new(1),
        };
        store.remove_partial()?;

        let newest = store.list()?.first().map(|m| m.version).unwrap_or(0);
        store.next_version.store(newest + 1, Ordering::Release);
        info!(
            "snapshot store opened at {:?}, next version {}",
            store.dir,
            newest + 1
        );
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Starts a new snapshot covering the log up to `index`.
    pub fn create(
        &self,
        index: u64,
        term: u64,
        configuration: Vec<Server>,
    ) -> Result<FileSnapshotSink> {
        let version = self.next_version.fetch_add(1, Ordering::AcqRel);
        let id = format!("{}{}-{}-{}", SNAPSHOT_DIR_PREFIX, version, index, term);
        let temp_dir = self.dir.join(format!("{}{}", id, SNAPSHOT_TEMP_SUFFIX));
        std::fs::create_dir_all(&temp_dir).map_err(|e| StorageError::PathError {
            path: temp_dir.clone(),
            source: e,
        })?;
        let state_path = temp_dir.join(SNAPSHOT_STATE_FILE);
        let file = File::create(&state_path).map_err(|e| StorageError::PathError {
            path: state_path,
            source: e,
        })?;

        debug!("creating snapshot {}", id);
        Ok(FileSnapshotSink {
            final_dir: self.dir.join(&id),
            temp_dir,
            writer: Some(BufWriter::new(file)),
            meta: SnapshotMeta {
                id,
                version,
                index,
                term,
                size: 0,
                configuration,
                created_at: now_nanos(),
            },
            retain: self.retain,
            store_dir: self.dir.clone(),
            finished: false,
        })
    }

    /// All complete snapshots, newest first.
    pub fn list(&self) -> Result<Vec<SnapshotMeta>> {
        list_in(&self.dir)
    }

    pub fn latest(&self) -> Result<Option<SnapshotMeta>> {
        Ok(self.list()?.into_iter().next())
    }

    /// Opens the payload of snapshot `id` for reading.
    pub fn open(
        &self,
        id: &str,
    ) -> Result<(SnapshotMeta, File)> {
        let meta = read_meta(&self.dir.join(id))?;
        let path = self.path_of(id)?;
        let file = File::open(&path).map_err(|e| StorageError::PathError { path, source: e })?;
        Ok((meta, file))
    }

    /// Path of the payload file of snapshot `id`.
    pub fn path_of(
        &self,
        id: &str,
    ) -> Result<PathBuf> {
        if id.contains(std::path::MAIN_SEPARATOR) || id.contains("..") {
            return Err(StorageError::SnapshotNotFound(id.to_string()).into());
        }
        let path = self.dir.join(id).join(SNAPSHOT_STATE_FILE);
        if !path.is_file() {
            return Err(StorageError::SnapshotNotFound(id.to_string()).into());
        }
        Ok(path)
    }

    /// Reads up to `len` payload bytes of snapshot `id` starting at `offset`.
    /// Returns fewer bytes at the end of the file, none past it.
    pub async fn read_range(
        &self,
        id: &str,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>> {
        let path = self.path_of(id)?;
        let mut file = tokio::fs::File::open(&path).await?;
        let size = file.metadata().await?.len();
        if offset >= size {
            return Ok(Vec::new());
        }

        let want = len.min((size - offset) as usize);
        let mut buf = vec![0u8; want];
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }

    fn remove_partial(&self) -> Result<()> {
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_temp = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(SNAPSHOT_TEMP_SUFFIX))
                .unwrap_or(false);
            if is_temp {
                warn!("removing incomplete snapshot {:?}", path);
                remove_path(&path)?;
            }
        }
        Ok(())
    }
}

/// Writer for one snapshot in progress.
///
/// Dropping a sink without calling [`FileSnapshotSink::close`] discards it.
pub struct FileSnapshotSink {
    final_dir: PathBuf,
    temp_dir: PathBuf,
    writer: Option<BufWriter<File>>,
    meta: SnapshotMeta,
    retain: usize,
    store_dir: PathBuf,
    finished: bool,
}

impl std::fmt::Debug for FileSnapshotSink {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("FileSnapshotSink")
            .field("id", &self.meta.id)
            .field("size", &self.meta.size)
            .finish()
    }
}

impl FileSnapshotSink {
    pub fn id(&self) -> &str {
        &self.meta.id
    }

    /// Durably publishes the snapshot and reaps old ones beyond the
    /// retention count.
    pub fn close(mut self) -> Result<SnapshotMeta> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| StorageError::Snapshot(format!("snapshot {} already closed", self.meta.id)))?;
        let file = writer
            .into_inner()
            .map_err(|e| StorageError::IoError(e.into_error()))?;
        file.sync_all()?;

        let meta_path = self.temp_dir.join(SNAPSHOT_META_FILE);
        std::fs::write(&meta_path, serde_json::to_vec_pretty(&self.meta)?)?;

        std::fs::rename(&self.temp_dir, &self.final_dir).map_err(|e| StorageError::PathError {
            path: self.final_dir.clone(),
            source: e,
        })?;
        self.finished = true;
        info!(
            "snapshot {} persisted: index={}, term={}, size={}",
            self.meta.id, self.meta.index, self.meta.term, self.meta.size
        );

        reap(&self.store_dir, self.retain)?;
        Ok(self.meta.clone())
    }

    /// Abandons the snapshot and removes its partial files.
    pub fn cancel(mut self) -> Result<()> {
        self.writer.take();
        self.finished = true;
        debug!("snapshot {} cancelled", self.meta.id);
        remove_path(&self.temp_dir)
    }
}

impl Write for FileSnapshotSink {
    fn write(
        &mut self,
        buf: &[u8],
    ) -> std::io::Result<usize> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| std::io::Error::other("snapshot sink closed"))?;
        let n = writer.write(buf)?;
        self.meta.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.writer.as_mut() {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for FileSnapshotSink {
    fn drop(&mut self) {
        if !self.finished {
            self.writer.take();
            if let Err(e) = remove_path(&self.temp_dir) {
                warn!("failed to discard snapshot {}: {:?}", self.meta.id, e);
            }
        }
    }
}

fn read_meta(snapshot_dir: &Path) -> Result<SnapshotMeta> {
    let path = snapshot_dir.join(SNAPSHOT_META_FILE);
    let bytes = std::fs::read(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            crate::Error::from(StorageError::SnapshotNotFound(snapshot_dir.display().to_string()))
        } else {
            StorageError::PathError { path, source: e }.into()
        }
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn list_in(dir: &Path) -> Result<Vec<SnapshotMeta>> {
    let mut snapshots = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => continue,
        };
        if !path.is_dir() || !name.starts_with(SNAPSHOT_DIR_PREFIX) || name.ends_with(SNAPSHOT_TEMP_SUFFIX) {
            continue;
        }
        match read_meta(&path) {
            Ok(meta) => snapshots.push(meta),
            Err(e) => warn!("skipping unreadable snapshot {:?}: {:?}", path, e),
        }
    }
    snapshots.sort_by(|a, b| b.version.cmp(&a.version));
    Ok(snapshots)
}

fn reap(
    dir: &Path,
    retain: usize,
) -> Result<()> {
    for stale in list_in(dir)?.into_iter().skip(retain) {
        debug!("reaping snapshot {}", stale.id);
        remove_path(&dir.join(&stale.id))?;
    }
    Ok(())
}
