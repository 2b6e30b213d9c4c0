//! VarInt / VarLong encoding.
//!
//! 7 bits per byte, least significant group first, `0x80` marks continuation.
//! Negative values use their two's-complement bit pattern, so every negative
//! VarInt occupies the full 5 bytes and every negative VarLong 10 bytes.

use bytes::BufMut;

use crate::error::{ProtocolError, Result};

/// Longest legal VarInt encoding in bytes
pub const MAX_VARINT_LEN: usize = 5;

/// Longest legal VarLong encoding in bytes
pub const MAX_VARLONG_LEN: usize = 10;

const SEGMENT_BITS: u8 = 0x7F;
const CONTINUE_BIT: u8 = 0x80;

/// Append a VarInt to `dst`
pub fn put_varint<B: BufMut + ?Sized>(dst: &mut B, value: i32) {
    let mut v = value as u32;
    loop {
        if v & !(SEGMENT_BITS as u32) == 0 {
            dst.put_u8(v as u8);
            return;
        }
        dst.put_u8((v as u8 & SEGMENT_BITS) | CONTINUE_BIT);
        v >>= 7;
    }
}

/// Append a VarLong to `dst`
pub fn put_varlong<B: BufMut + ?Sized>(dst: &mut B, value: i64) {
    let mut v = value as u64;
    loop {
        if v & !(SEGMENT_BITS as u64) == 0 {
            dst.put_u8(v as u8);
            return;
        }
        dst.put_u8((v as u8 & SEGMENT_BITS) | CONTINUE_BIT);
        v >>= 7;
    }
}

/// Encode a VarInt into a fresh vector
pub fn encode_varint(value: i32) -> Vec<u8> {
    let mut out = Vec::with_capacity(varint_len(value));
    put_varint(&mut out, value);
    out
}

/// Encode a VarLong into a fresh vector
pub fn encode_varlong(value: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(MAX_VARLONG_LEN);
    put_varlong(&mut out, value);
    out
}

/// Number of bytes `value` occupies as a VarInt
pub fn varint_len(value: i32) -> usize {
    let v = value as u32;
    match v {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0x0FFF_FFFF => 4,
        _ => 5,
    }
}

/// Decode a VarInt from the front of `src` without consuming anything.
///
/// Returns `Ok(None)` when `src` ends before the terminating byte, and the
/// decoded value plus its encoded length otherwise.
///
/// # Errors
/// `VarIntTooLong` once a fifth byte still carries the continuation bit.
pub fn peek_varint(src: &[u8]) -> Result<Option<(i32, usize)>> {
    let mut value: u32 = 0;
    for (i, &byte) in src.iter().enumerate() {
        if i >= MAX_VARINT_LEN {
            return Err(ProtocolError::VarIntTooLong);
        }
        value |= ((byte & SEGMENT_BITS) as u32) << (7 * i);
        if byte & CONTINUE_BIT == 0 {
            return Ok(Some((value as i32, i + 1)));
        }
    }
    if src.len() >= MAX_VARINT_LEN {
        return Err(ProtocolError::VarIntTooLong);
    }
    Ok(None)
}

/// Decode a VarLong from the front of `src` without consuming anything.
///
/// # Errors
/// `VarIntTooLong` once a tenth byte still carries the continuation bit.
pub fn peek_varlong(src: &[u8]) -> Result<Option<(i64, usize)>> {
    let mut value: u64 = 0;
    for (i, &byte) in src.iter().enumerate() {
        if i >= MAX_VARLONG_LEN {
            return Err(ProtocolError::VarIntTooLong);
        }
        value |= ((byte & SEGMENT_BITS) as u64) << (7 * i);
        if byte & CONTINUE_BIT == 0 {
            return Ok(Some((value as i64, i + 1)));
        }
    }
    if src.len() >= MAX_VARLONG_LEN {
        return Err(ProtocolError::VarIntTooLong);
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_varint_encodings() {
        assert_eq!(encode_varint(0), vec![0x00]);
        assert_eq!(encode_varint(1), vec![0x01]);
        assert_eq!(encode_varint(127), vec![0x7F]);
        assert_eq!(encode_varint(128), vec![0x80, 0x01]);
        assert_eq!(encode_varint(255), vec![0xFF, 0x01]);
        assert_eq!(encode_varint(25565), vec![0xDD, 0xC7, 0x01]);
        assert_eq!(encode_varint(2_097_151), vec![0xFF, 0xFF, 0x7F]);
        assert_eq!(encode_varint(i32::MAX), vec![0xFF, 0xFF, 0xFF, 0xFF, 0x07]);
        assert_eq!(encode_varint(-1), vec![0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
        assert_eq!(encode_varint(i32::MIN), vec![0x80, 0x80, 0x80, 0x80, 0x08]);
    }

    #[test]
    fn known_varlong_encodings() {
        assert_eq!(
            encode_varlong(-1),
            vec![0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]
        );
        assert_eq!(
            encode_varlong(i64::MAX),
            vec![0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F]
        );
        assert_eq!(
            encode_varlong(i64::MIN),
            vec![0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x01]
        );
    }

    #[test]
    fn varint_len_matches_encoding() {
        for v in [0, 1, 127, 128, 16_383, 16_384, 2_097_151, 2_097_152, i32::MAX, -1] {
            assert_eq!(varint_len(v), encode_varint(v).len(), "value {v}");
        }
    }

    #[test]
    fn peek_reports_incomplete_input() {
        assert_eq!(peek_varint(&[]).unwrap(), None);
        assert_eq!(peek_varint(&[0x80, 0x80]).unwrap(), None);
        assert_eq!(peek_varint(&[0xDD, 0xC7, 0x01, 0x42]).unwrap(), Some((25565, 3)));
    }

    #[test]
    fn overlong_varints_are_rejected() {
        assert!(matches!(
            peek_varint(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]),
            Err(ProtocolError::VarIntTooLong)
        ));
        assert!(matches!(
            peek_varlong(&[0xFF; 11]),
            Err(ProtocolError::VarIntTooLong)
        ));
    }
}
