use bytes::Bytes;

use super::envelope::*;
use crate::test_utils::args;

#[test]
fn test_batch_round_trip_keeps_order_and_bytes() {
    let a = args(&["SET", "a", "1"]);
    let b = vec![Bytes::from_static(b"SET"), Bytes::from(vec![0u8, 255, 10]), Bytes::new()];
    let c = args(&["INCR", "counter"]);

    let payload = encode_batch(&[&a, &b, &c]).unwrap();
    let batch = decode_batch(&payload).unwrap();

    assert_eq!(batch, vec![a, b, c]);
}

#[test]
fn test_empty_batch() {
    let payload = encode_batch(&[]).unwrap();
    assert!(decode_batch(&payload).unwrap().is_empty());
}

#[test]
fn test_large_argument_uses_multibyte_length() {
    let big = Bytes::from(vec![7u8; 300]);
    let cmd = vec![Bytes::from_static(b"SET"), big.clone()];

    assert_eq!(encoded_len(&[&cmd]), 1 + 1 + (1 + 3) + (2 + 300));
    let batch = decode_batch(&encode_batch(&[&cmd]).unwrap()).unwrap();
    assert_eq!(batch[0][1], big);
}

#[test]
fn test_decode_rejects_garbage() {
    assert!(decode_batch(b"not zlib at all").is_err());
}

fn compress(raw: &[u8]) -> Vec<u8> {
    use std::io::Write;
    let mut e = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::fast());
    e.write_all(raw).unwrap();
    e.finish().unwrap()
}

#[test]
fn test_decode_rejects_truncated_argument() {
    // one command, one arg of 5 bytes, only 2 present
    let payload = compress(&[1, 1, 5, b'a', b'b']);
    assert!(decode_batch(&payload).is_err());
}

#[test]
fn test_decode_rejects_trailing_bytes() {
    let payload = compress(&[1, 1, 1, b'a', 0xff]);
    assert!(decode_batch(&payload).is_err());
}
