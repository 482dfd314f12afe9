//! Fixed-layout binary format of persisted log records.
//!
//! ```text
//! 0        8        16           24     25         29        33
//! | index  | term   | appended_at | type | data_len | ext_len | data .. | extensions .. |
//! ```
//! Integers are little-endian. Encoding and decoding go field by field with
//! explicit bounds checks.

use bytes::Buf;
use bytes::BufMut;
use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;

use crate::utils::time::now_nanos;
use crate::Result;
use crate::StorageError;

pub const LOG_HEADER_LEN: usize = 33;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogType {
    /// Batch envelope delivered to the state machine
    Command = 0,
    /// Leader assertion appended at the start of a term
    Noop = 1,
    /// Barrier to confirm all preceding entries are applied
    Barrier = 2,
    /// Membership change carrying the full server list
    Configuration = 3,
}

impl TryFrom<u8> for LogType {
    type Error = StorageError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(LogType::Command),
            1 => Ok(LogType::Noop),
            2 => Ok(LogType::Barrier),
            3 => Ok(LogType::Configuration),
            other => Err(StorageError::DataCorruption {
                location: format!("log record type byte {}", other),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub index: u64,
    pub term: u64,
    /// Unix nanoseconds when the leader appended the record
    pub appended_at: i64,
    pub log_type: LogType,
    pub data: Bytes,
    pub extensions: Bytes,
}

impl LogRecord {
    pub fn new(
        index: u64,
        term: u64,
        log_type: LogType,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            index,
            term,
            appended_at: now_nanos(),
            log_type,
            data: data.into(),
            extensions: Bytes::new(),
        }
    }

    pub fn command(
        index: u64,
        term: u64,
        data: impl Into<Bytes>,
    ) -> Self {
        Self::new(index, term, LogType::Command, data)
    }

    pub fn encoded_len(&self) -> usize {
        LOG_HEADER_LEN + self.data.len() + self.extensions.len()
    }

    /// Appends the encoded record to `buf`.
    pub fn encode_into(
        &self,
        buf: &mut impl BufMut,
    ) -> Result<()> {
        let data_len = u32::try_from(self.data.len()).map_err(|_| StorageError::DataCorruption {
            location: format!("log {} payload exceeds u32 length", self.index),
        })?;
        let ext_len = u32::try_from(self.extensions.len()).map_err(|_| StorageError::DataCorruption {
            location: format!("log {} extensions exceed u32 length", self.index),
        })?;

        buf.put_u64_le(self.index);
        buf.put_u64_le(self.term);
        buf.put_i64_le(self.appended_at);
        buf.put_u8(self.log_type as u8);
        buf.put_u32_le(data_len);
        buf.put_u32_le(ext_len);
        buf.put_slice(&self.data);
        buf.put_slice(&self.extensions);
        Ok(())
    }

    /// Encodes into a buffer sized exactly for this record.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < LOG_HEADER_LEN {
            return Err(corrupt(format!(
                "log record header truncated: {} < {} bytes",
                bytes.len(),
                LOG_HEADER_LEN
            )));
        }

        let mut buf = bytes;
        let index = buf.get_u64_le();
        let term = buf.get_u64_le();
        let appended_at = buf.get_i64_le();
        let log_type = LogType::try_from(buf.get_u8())?;
        let data_len = buf.get_u32_le() as usize;
        let ext_len = buf.get_u32_le() as usize;

        let body_len = data_len
            .checked_add(ext_len)
            .ok_or_else(|| corrupt(format!("log {} body length overflow", index)))?;
        if buf.remaining() != body_len {
            return Err(corrupt(format!(
                "log {} body length mismatch: header says {}, found {}",
                index,
                body_len,
                buf.remaining()
            )));
        }

        let data = Bytes::copy_from_slice(&buf[..data_len]);
        buf.advance(data_len);
        let extensions = Bytes::copy_from_slice(&buf[..ext_len]);

        Ok(Self {
            index,
            term,
            appended_at,
            log_type,
            data,
            extensions,
        })
    }
}

fn corrupt(location: String) -> crate::Error {
    StorageError::DataCorruption { location }.into()
}
