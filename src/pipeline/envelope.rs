//! Batch envelope: the byte payload of one consensus log entry.
//!
//! ```text
//! uvarint(count)
//! repeat count:
//!     uvarint(argc)
//!     repeat argc: uvarint(len) bytes[len]
//! ```
//! The whole buffer is zlib compressed. Decoding must be bit-identical on
//! every replica, so any malformed input is an error and never skipped.

use std::io::Read;
use std::io::Write;

use bytes::Buf;
use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use prost::encoding::decode_varint;
use prost::encoding::encode_varint;
use prost::encoding::encoded_len_varint;

use crate::SerializationError;

/// Argument lists of one batch, in submission order.
pub type Batch = Vec<Vec<Bytes>>;

pub fn encoded_len(commands: &[&[Bytes]]) -> usize {
    let mut len = encoded_len_varint(commands.len() as u64);
    for args in commands {
        len += encoded_len_varint(args.len() as u64);
        for arg in args.iter() {
            len += encoded_len_varint(arg.len() as u64) + arg.len();
        }
    }
    len
}

/// Encodes and compresses a batch.
pub fn encode_batch(commands: &[&[Bytes]]) -> Result<Bytes, SerializationError> {
    let mut raw = BytesMut::with_capacity(encoded_len(commands));
    encode_varint(commands.len() as u64, &mut raw);
    for args in commands {
        encode_varint(args.len() as u64, &mut raw);
        for arg in args.iter() {
            encode_varint(arg.len() as u64, &mut raw);
            raw.put_slice(arg);
        }
    }

    let mut encoder = ZlibEncoder::new(Vec::with_capacity(raw.len() / 2 + 16), Compression::fast());
    encoder
        .write_all(&raw)
        .map_err(|e| SerializationError::Envelope(format!("compress: {e}")))?;
    let compressed = encoder
        .finish()
        .map_err(|e| SerializationError::Envelope(format!("compress: {e}")))?;
    Ok(Bytes::from(compressed))
}

/// Decompresses and decodes a batch.
pub fn decode_batch(payload: &[u8]) -> Result<Batch, SerializationError> {
    let mut raw = Vec::new();
    ZlibDecoder::new(payload)
        .read_to_end(&mut raw)
        .map_err(|e| SerializationError::Envelope(format!("decompress: {e}")))?;

    let mut buf = Bytes::from(raw);
    let count = read_len(&mut buf, "command count")?;
    let mut batch = Vec::with_capacity(count.min(buf.remaining()));
    for i in 0..count {
        let argc = read_len(&mut buf, "argument count")?;
        let mut args = Vec::with_capacity(argc.min(buf.remaining()));
        for _ in 0..argc {
            let len = read_len(&mut buf, "argument length")?;
            if buf.remaining() < len {
                return Err(SerializationError::Envelope(format!(
                    "command {i}: argument of {len} bytes truncated to {}",
                    buf.remaining()
                )));
            }
            args.push(buf.split_to(len));
        }
        batch.push(args);
    }

    if buf.has_remaining() {
        return Err(SerializationError::Envelope(format!(
            "{} trailing bytes after {count} commands",
            buf.remaining()
        )));
    }
    Ok(batch)
}

fn read_len(
    buf: &mut Bytes,
    what: &str,
) -> Result<usize, SerializationError> {
    let v = decode_varint(buf).map_err(|e| SerializationError::Envelope(format!("{what}: {e}")))?;
    usize::try_from(v).map_err(|_| SerializationError::Envelope(format!("{what} {v} overflows usize")))
}
