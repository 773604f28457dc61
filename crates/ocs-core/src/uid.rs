//! Dense, collision-free ordering identifiers.
//!
//! A `Uid` is a `Position` plus the `Dot` of the mutation that created it.
//! Positions are paths in a numeral tree whose levels grow wider with depth:
//! level `d` holds a numeral of `BASE_LEVEL + d` bits. Seen as a bit string
//! (a leading `1` followed by every numeral at its width) positions compare
//! with shorter values right-padded with zero bits; the dot breaks ties.
//!
//! `Uid::between` allocates a fresh position strictly between two others,
//! only descending a level when the two bounds leave no room at the current
//! one. Even levels place the new numeral just above the lower bound and odd
//! levels just below the upper bound, so a run of inserts at the same end
//! keeps finding room on every other level.

use crate::dot::Dot;
use crate::error::{CrdtError, Result};
use crate::vlq;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use tracing::trace;

/// Width in bits of the first level.
pub const BASE_LEVEL: u32 = 20;

/// Width in bits of the deepest level.
pub const MAX_LEVEL: u32 = 64;

/// Upper bound on the random offset from the chosen side of a gap.
pub const BOUNDARY: u64 = 40;

/// Number of levels a position can have.
pub const MAX_DEPTH: usize = (MAX_LEVEL - BASE_LEVEL + 1) as usize;

fn level_width(depth: usize) -> u32 {
    BASE_LEVEL + depth as u32
}

fn level_max(depth: usize) -> u64 {
    match level_width(depth) {
        64 => u64::MAX,
        width => (1u64 << width) - 1,
    }
}

/// Path of numerals through the level tree.
///
/// Comparing the numeral vectors lexicographically (a proper prefix sorts
/// first) is exactly the zero-padded bit string order, since every level has
/// the same width in every position.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position(Vec<u64>);

impl Position {
    fn new(numerals: Vec<u64>) -> Self {
        debug_assert!(!numerals.is_empty() && numerals.len() <= MAX_DEPTH);
        Self(numerals)
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn numerals(&self) -> &[u64] {
        &self.0
    }

    /// Number of significant bits, counting the leading marker bit.
    pub fn bit_len(&self) -> usize {
        1 + (0..self.0.len()).map(|d| level_width(d) as usize).sum::<usize>()
    }

    /// Big-endian magnitude of the position's integer form.
    pub fn to_magnitude(&self) -> Vec<u8> {
        let mut writer = BitWriter::default();
        for (depth, &numeral) in self.0.iter().enumerate().rev() {
            writer.push(numeral, level_width(depth));
        }
        writer.push(1, 1);
        writer.finish()
    }

    /// Rebuild a position from its big-endian magnitude.
    pub fn from_magnitude(magnitude: &[u8]) -> Result<Self> {
        let lead = magnitude.first().map_or(8, |b| b.leading_zeros() as usize);
        let bit_len = magnitude.len() * 8 - lead.min(magnitude.len() * 8);

        let mut depth = 0;
        let mut expected = 1;
        while expected < bit_len && depth < MAX_DEPTH {
            expected += level_width(depth) as usize;
            depth += 1;
        }
        if depth == 0 || expected != bit_len {
            return Err(CrdtError::InvalidPosition(bit_len));
        }

        let mut reader = BitReader::new(magnitude, lead + 1);
        let numerals = (0..depth).map(|d| reader.read(level_width(d))).collect();
        Ok(Self(numerals))
    }
}

#[derive(Default)]
struct BitWriter {
    le_bytes: Vec<u8>,
    acc: u128,
    bits: u32,
}

impl BitWriter {
    fn push(&mut self, value: u64, width: u32) {
        self.acc |= u128::from(value) << self.bits;
        self.bits += width;
        while self.bits >= 8 {
            self.le_bytes.push(self.acc as u8);
            self.acc >>= 8;
            self.bits -= 8;
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.bits > 0 {
            self.le_bytes.push(self.acc as u8);
        }
        while self.le_bytes.last() == Some(&0) {
            self.le_bytes.pop();
        }
        self.le_bytes.reverse();
        self.le_bytes
    }
}

struct BitReader<'a> {
    bytes: &'a [u8],
    cursor: usize,
}

impl<'a> BitReader<'a> {
    fn new(bytes: &'a [u8], cursor: usize) -> Self {
        Self { bytes, cursor }
    }

    fn read(&mut self, width: u32) -> u64 {
        let mut value = 0u64;
        for _ in 0..width {
            let byte = self.bytes[self.cursor / 8];
            let bit = (byte >> (7 - self.cursor % 8)) & 1;
            value = (value << 1) | u64::from(bit);
            self.cursor += 1;
        }
        value
    }
}

/// Ordered identifier of one element in a sequence.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Uid {
    pub position: Position,
    pub dot: Dot,
}

impl Uid {
    /// Sentinel sorting before every generated UID.
    pub fn min() -> Self {
        Self {
            position: Position::new(vec![0]),
            dot: Dot::new(0, 0),
        }
    }

    /// Sentinel sorting after every generated UID.
    pub fn max() -> Self {
        Self {
            position: Position::new(vec![level_max(0)]),
            dot: Dot::new(u32::MAX, u32::MAX),
        }
    }

    /// Allocate a UID tagged with `dot` strictly between `lo` and `hi`.
    ///
    /// Requires `lo < hi`. Panics if the level tree is exhausted.
    ///
    /// Two concurrent allocations can pick the same position. When `lo` and
    /// `hi` share a position nothing fits between them and the result sorts
    /// just after `hi`; callers place elements by UID, so replicas still agree.
    pub fn between(lo: &Uid, hi: &Uid, dot: Dot) -> Uid {
        debug_assert!(lo < hi, "UID bounds out of order");
        let mut numerals = Vec::new();
        // Once the prefix sorts below `hi`, `hi` no longer bounds deeper levels.
        let mut below_hi = false;
        for depth in 0..MAX_DEPTH {
            let max = level_max(depth);
            let pos1 = lo.position.0.get(depth).copied().unwrap_or(0);
            let pos2 = if below_hi {
                max
            } else {
                hi.position.0.get(depth).copied().unwrap_or(max)
            };
            if pos2 > pos1 && pos2 - pos1 > 1 {
                numerals.push(generate_numeral(depth, pos1, pos2));
                trace!(depth = depth + 1, "allocated uid");
                return Uid {
                    position: Position::new(numerals),
                    dot,
                };
            }
            below_hi |= pos1 < pos2;
            numerals.push(pos1);
        }
        panic!("UID cannot have more than {} levels", MAX_DEPTH);
    }

    /// Binary form: VLQ(position) ++ VLQ(site) ++ VLQ(counter).
    pub fn to_vlq(&self) -> Vec<u8> {
        let mut out = Vec::new();
        vlq::encode_big(&self.position.to_magnitude(), &mut out);
        vlq::encode_u64(u64::from(self.dot.site), &mut out);
        vlq::encode_u64(u64::from(self.dot.counter), &mut out);
        out
    }

    pub fn from_vlq(bytes: &[u8]) -> Result<Self> {
        let (magnitude, rest) = vlq::decode_big(bytes)?;
        let (site, rest) = vlq::decode_u32(rest)?;
        let (counter, rest) = vlq::decode_u32(rest)?;
        if !rest.is_empty() {
            return Err(CrdtError::TrailingBytes(rest.len()));
        }
        Ok(Self {
            position: Position::from_magnitude(&magnitude)?,
            dot: Dot::new(site, counter),
        })
    }
}

/// Random numeral in `(pos1, pos2)`, less than `BOUNDARY` past `pos1` on
/// even levels and less than `BOUNDARY` before `pos2` on odd ones.
///
/// Requires `pos2 - pos1 > 1`.
fn generate_numeral(depth: usize, pos1: u64, pos2: u64) -> u64 {
    let step = rand::thread_rng().gen_range(1..BOUNDARY.min(pos2 - pos1));
    if depth % 2 == 0 {
        pos1 + step
    } else {
        pos2 - step
    }
}

impl PartialOrd for Uid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Uid {
    fn cmp(&self, other: &Self) -> Ordering {
        self.position
            .cmp(&other.position)
            .then_with(|| self.dot.cmp(&other.dot))
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&URL_SAFE_NO_PAD.encode(self.to_vlq()))
    }
}

impl FromStr for Uid {
    type Err = CrdtError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(s)?;
        Self::from_vlq(&bytes)
    }
}

// UIDs travel as their base64 string so they can also key JSON maps.
impl Serialize for Uid {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Uid {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
