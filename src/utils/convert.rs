use crate::ConvertError;
use crate::Result;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a of `s`. Stable across builds and platforms.
pub fn str_to_u64(s: &str) -> u64 {
    s.bytes()
        .fold(FNV_OFFSET_BASIS, |hash, b| (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME))
}

/// Converts a `u64` to an 8-byte array in big-endian byte order.
///
/// Big-endian keys keep sled's lexicographic order equal to numeric order.
///
/// # Examples
/// ```
/// use raft_machine::utils::convert::safe_kv;
///
/// let bytes = safe_kv(0x1234_5678_9ABC_DEF0);
/// assert_eq!(bytes, [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0]);
/// ```
pub const fn safe_kv(num: u64) -> [u8; 8] {
    num.to_be_bytes()
}

pub fn safe_vk<K: AsRef<[u8]>>(bytes: K) -> Result<u64> {
    let bytes = bytes.as_ref();
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| ConvertError::InvalidLength(bytes.len()))?;
    Ok(u64::from_be_bytes(array))
}

/// Stable stores keep integers little-endian.
pub fn u64_to_le(num: u64) -> [u8; 8] {
    num.to_le_bytes()
}

pub fn le_to_u64<K: AsRef<[u8]>>(bytes: K) -> Result<u64> {
    let bytes = bytes.as_ref();
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| ConvertError::InvalidLength(bytes.len()))?;
    Ok(u64::from_le_bytes(array))
}

/// Parses a decimal integer argument.
pub fn parse_i64(arg: &[u8]) -> Option<i64> {
    std::str::from_utf8(arg).ok()?.parse::<i64>().ok()
}

pub fn parse_u64(arg: &[u8]) -> Option<u64> {
    std::str::from_utf8(arg).ok()?.parse::<u64>().ok()
}
