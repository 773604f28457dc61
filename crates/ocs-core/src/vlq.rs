//! Variable-length quantities.
//!
//! Unsigned integers are written as base-128 digits, most significant digit
//! first. Every byte except the last has the continuation bit (`0x80`) set.
//! Arbitrary-precision values are passed around as big-endian magnitudes
//! (`&[u8]` without leading zero bytes); zero is the empty magnitude.

use crate::error::VlqError;

const CONTINUATION: u8 = 0x80;
const DIGIT_MASK: u8 = 0x7f;

/// Append the VLQ form of `n` to `out`.
pub fn encode_u64(mut n: u64, out: &mut Vec<u8>) {
    let start = out.len();
    loop {
        let mut b = (n as u8) & DIGIT_MASK;
        if out.len() != start {
            b |= CONTINUATION;
        }
        out.push(b);
        n >>= 7;
        if n == 0 {
            break;
        }
    }
    out[start..].reverse();
}

pub fn encode_u32(n: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    encode_u64(u64::from(n), &mut out);
    out
}

/// Decode one quantity, returning it and the unread rest of `bytes`.
pub fn decode_u64(bytes: &[u8]) -> Result<(u64, &[u8]), VlqError> {
    let mut n: u64 = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if n > (u64::MAX >> 7) {
            return Err(VlqError::Overflow(64));
        }
        n = (n << 7) | u64::from(b & DIGIT_MASK);
        if b & CONTINUATION == 0 {
            return Ok((n, &bytes[i + 1..]));
        }
    }
    Err(VlqError::NoTerminatingByte)
}

pub fn decode_u32(bytes: &[u8]) -> Result<(u32, &[u8]), VlqError> {
    let (n, rest) = decode_u64(bytes)?;
    let n = u32::try_from(n).map_err(|_| VlqError::Overflow(32))?;
    Ok((n, rest))
}

/// Append the VLQ form of a big-endian magnitude to `out`.
pub fn encode_big(magnitude: &[u8], out: &mut Vec<u8>) {
    // Digits are collected least significant first, then flipped.
    let mut digits = Vec::with_capacity(magnitude.len() * 8 / 7 + 1);
    let mut acc: u16 = 0;
    let mut acc_bits = 0;
    for &b in magnitude.iter().rev() {
        acc |= u16::from(b) << acc_bits;
        acc_bits += 8;
        while acc_bits >= 7 {
            digits.push((acc as u8) & DIGIT_MASK);
            acc >>= 7;
            acc_bits -= 7;
        }
    }
    if acc_bits > 0 {
        digits.push((acc as u8) & DIGIT_MASK);
    }
    while digits.len() > 1 && digits.last() == Some(&0) {
        digits.pop();
    }
    if digits.is_empty() {
        digits.push(0);
    }
    let last = digits.len() - 1;
    for (i, digit) in digits.iter().rev().enumerate() {
        out.push(if i == last { *digit } else { digit | CONTINUATION });
    }
}

/// Decode one arbitrary-precision quantity into a big-endian magnitude.
pub fn decode_big(bytes: &[u8]) -> Result<(Vec<u8>, &[u8]), VlqError> {
    let end = bytes
        .iter()
        .position(|b| b & CONTINUATION == 0)
        .ok_or(VlqError::NoTerminatingByte)?;

    let mut le = Vec::with_capacity((end + 1) * 7 / 8 + 1);
    let mut acc: u16 = 0;
    let mut acc_bits = 0;
    for &b in bytes[..=end].iter().rev() {
        acc |= u16::from(b & DIGIT_MASK) << acc_bits;
        acc_bits += 7;
        if acc_bits >= 8 {
            le.push(acc as u8);
            acc >>= 8;
            acc_bits -= 8;
        }
    }
    if acc != 0 {
        le.push(acc as u8);
    }
    while le.last() == Some(&0) {
        le.pop();
    }
    le.reverse();
    Ok((le, &bytes[end + 1..]))
}
