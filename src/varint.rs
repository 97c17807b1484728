//! Variable-length integer codec.
//!
//! B+tree entries and catalog records store their sizes and values as
//! LEB128-style varints: seven payload bits per byte, least significant
//! group first, high bit set on every byte except the last. A `u64` takes
//! between 1 and 10 bytes.

use crate::error::{Error, Result};

/// Continuation bit: set on every encoded byte except the last.
const MSB: u8 = 0x80;

/// Number of bytes [`encode`] will append for `n`.
pub fn encoded_len(n: u64) -> usize {
    match n {
        0..=0x7f => 1,
        0x80..=0x3fff => 2,
        0x4000..=0x1f_ffff => 3,
        0x20_0000..=0xfff_ffff => 4,
        0x1000_0000..=0x7_ffff_ffff => 5,
        0x8_0000_0000..=0x3ff_ffff_ffff => 6,
        0x400_0000_0000..=0x1_ffff_ffff_ffff => 7,
        0x2_0000_0000_0000..=0xff_ffff_ffff_ffff => 8,
        0x100_0000_0000_0000..=0x7fff_ffff_ffff_ffff => 9,
        _ => 10,
    }
}

/// Append the varint encoding of `n` to `buf`.
pub fn encode(mut n: u64, buf: &mut Vec<u8>) {
    while n >= 0x80 {
        buf.push((n as u8 & 0x7f) | MSB);
        n >>= 7;
    }
    buf.push(n as u8);
}

/// Decode a varint from the front of `buf`, returning the value and the
/// number of bytes consumed.
///
/// # Errors
///
/// [`Error::Corruption`] when the buffer ends before the terminating byte
/// or the encoding runs past ten bytes.
pub fn decode(buf: &[u8]) -> Result<(u64, usize)> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().enumerate() {
        if i == 10 {
            break;
        }
        result |= u64::from(byte & 0x7f) << shift;
        if byte & MSB == 0 {
            return Ok((result, i + 1));
        }
        shift += 7;
    }
    Err(Error::Corruption("truncated or overlong varint".into()))
}
