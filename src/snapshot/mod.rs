//! Snapshot/Restore Codec
//!
//! A snapshot stream is one zlib stream holding a fixed 32 byte header
//! followed by the payload produced by a [`SnapshotCodec`]:
//!
//! ```text
//! | "SNAP0001" | start i64 LE | ts i64 LE | seed i64 LE | payload .. |
//! ```
//! The header is always written and read as a unit before any payload byte.

mod guard;
pub use guard::*;


use std::io::Read;
use std::io::Write;
use std::marker::PhantomData;

use bytes::Buf;
use bytes::BufMut;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::error;

use crate::Clock;
use crate::Error;
use crate::Result;
use crate::SerializationError;
use crate::StorageError;

pub const SNAPSHOT_MAGIC: &[u8; 8] = b"SNAP0001";
pub const SNAPSHOT_HEADER_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub start: i64,
    pub ts: i64,
    pub seed: i64,
}

impl From<Clock> for SnapshotHeader {
    fn from(c: Clock) -> Self {
        Self {
            start: c.start,
            ts: c.ts,
            seed: c.seed,
        }
    }
}

impl From<SnapshotHeader> for Clock {
    fn from(h: SnapshotHeader) -> Self {
        Clock {
            start: h.start,
            ts: h.ts,
            seed: h.seed,
        }
    }
}

impl SnapshotHeader {
    pub fn encode(&self) -> [u8; SNAPSHOT_HEADER_LEN] {
        let mut out = [0u8; SNAPSHOT_HEADER_LEN];
        let mut buf = &mut out[..];
        buf.put_slice(SNAPSHOT_MAGIC);
        buf.put_i64_le(self.start);
        buf.put_i64_le(self.ts);
        buf.put_i64_le(self.seed);
        out
    }

    /// A magic mismatch means the stream is not ours or is corrupt; it is
    /// reported as fatal.
    pub fn decode(bytes: &[u8; SNAPSHOT_HEADER_LEN]) -> Result<Self> {
        if &bytes[..8] != SNAPSHOT_MAGIC {
            error!("snapshot magic mismatch: {:?}", &bytes[..8]);
            return Err(Error::Fatal(format!(
                "snapshot magic mismatch: expected {:?}, found {:?}",
                String::from_utf8_lossy(SNAPSHOT_MAGIC),
                String::from_utf8_lossy(&bytes[..8])
            )));
        }
        let mut buf = &bytes[8..];
        Ok(Self {
            start: buf.get_i64_le(),
            ts: buf.get_i64_le(),
            seed: buf.get_i64_le(),
        })
    }
}

/// Pluggable user data serialization for snapshots.
pub trait SnapshotCodec<D>: Send + Sync + 'static {
    /// Serializes a point-in-time view of `data`.
    fn encode(
        &self,
        data: &D,
    ) -> Result<Vec<u8>>;

    /// Rebuilds user data from the payload remaining after the header.
    fn decode(
        &self,
        payload: &mut dyn Read,
    ) -> Result<D>;
}

/// Default codec storing user data as JSON.
pub struct JsonSnapshotCodec<D>(PhantomData<fn() -> D>);

impl<D> Default for JsonSnapshotCodec<D> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<D> SnapshotCodec<D> for JsonSnapshotCodec<D>
where
    D: Serialize + DeserializeOwned + 'static,
{
    fn encode(
        &self,
        data: &D,
    ) -> Result<Vec<u8>> {
        serde_json::to_vec(data).map_err(|e| SerializationError::Json(e).into())
    }

    fn decode(
        &self,
        payload: &mut dyn Read,
    ) -> Result<D> {
        serde_json::from_reader(payload).map_err(|e| SerializationError::Json(e).into())
    }
}

/// Writes header and payload as one compressed stream into `sink`.
pub fn write_snapshot(
    header: &SnapshotHeader,
    payload: &[u8],
    sink: &mut dyn Write,
) -> Result<()> {
    let mut encoder = ZlibEncoder::new(sink, Compression::default());
    encoder.write_all(&header.encode())?;
    encoder.write_all(payload)?;
    encoder.finish()?.flush()?;
    Ok(())
}

/// Opens a snapshot stream: validates and returns the header, and a reader
/// positioned at the first payload byte.
pub fn read_snapshot<'a>(source: &'a mut dyn Read) -> Result<(SnapshotHeader, impl Read + 'a)> {
    let mut decoder = ZlibDecoder::new(source);
    let mut raw = [0u8; SNAPSHOT_HEADER_LEN];
    decoder.read_exact(&mut raw).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Fatal("snapshot stream shorter than its header".to_string())
        } else {
            StorageError::IoError(e).into()
        }
    })?;
    let header = SnapshotHeader::decode(&raw)?;
    Ok((header, decoder))
}
