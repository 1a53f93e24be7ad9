//! The encoded-lengths word.
//!
//! A 32-byte big-endian word. The low 7 bytes hold the total dynamic
//! length (uint56); dynamic field `i` occupies the 5 bytes (uint40) just
//! above the previous one:
//!
//! ```text
//! | len4 | len3 | len2 | len1 | len0 | total |
//! |  5B  |  5B  |  5B  |  5B  |  5B  |  7B   |
//! ```

use crate::error::{MirrorError, Result};
use crate::schema::MAX_DYNAMIC_FIELDS;

/// Size of the encoded-lengths word in bytes.
pub const ENCODED_LENGTHS_SIZE: usize = 32;

/// Largest length a single dynamic field may have.
pub const MAX_DYNAMIC_LENGTH: u64 = (1 << 40) - 1;

const TOTAL_BYTES: usize = 7;
const LENGTH_BYTES: usize = 5;

/// Decoded lengths of a record's dynamic fields.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct EncodedLengths {
    lengths: Vec<u64>,
    total: u64,
}

impl EncodedLengths {
    pub fn new(lengths: Vec<u64>) -> Result<Self> {
        if lengths.len() > MAX_DYNAMIC_FIELDS {
            return Err(MirrorError::MalformedRecord(format!(
                "{} dynamic lengths (max {})",
                lengths.len(),
                MAX_DYNAMIC_FIELDS
            )));
        }
        let mut total = 0u64;
        for (i, len) in lengths.iter().enumerate() {
            if *len > MAX_DYNAMIC_LENGTH {
                return Err(MirrorError::MalformedRecord(format!(
                    "dynamic field {} length {} exceeds uint40",
                    i, len
                )));
            }
            total = checked_total(total, *len)?;
        }
        Ok(Self { lengths, total })
    }

    /// Decode a word describing `num_dynamic` fields.
    ///
    /// Fails if the word is not 32 bytes, if unused slots are non-zero, or if
    /// the stored total disagrees with the sum of lengths.
    pub fn decode(bytes: &[u8], num_dynamic: usize) -> Result<Self> {
        if bytes.len() != ENCODED_LENGTHS_SIZE {
            return Err(MirrorError::MalformedRecord(format!(
                "encoded lengths must be {} bytes, got {}",
                ENCODED_LENGTHS_SIZE,
                bytes.len()
            )));
        }
        if num_dynamic > MAX_DYNAMIC_FIELDS {
            return Err(MirrorError::MalformedRecord(format!(
                "{} dynamic fields (max {})",
                num_dynamic, MAX_DYNAMIC_FIELDS
            )));
        }

        let stored_total = read_be(&bytes[ENCODED_LENGTHS_SIZE - TOTAL_BYTES..]);

        let mut lengths = Vec::with_capacity(num_dynamic);
        let mut total = 0u64;
        for i in 0..MAX_DYNAMIC_FIELDS {
            let (start, end) = slot_bounds(i);
            let len = read_be(&bytes[start..end]);
            if i < num_dynamic {
                total = checked_total(total, len)?;
                lengths.push(len);
            } else if len != 0 {
                return Err(MirrorError::MalformedRecord(format!(
                    "unused length slot {} is non-zero",
                    i
                )));
            }
        }

        if total != stored_total {
            return Err(MirrorError::MalformedRecord(format!(
                "encoded total {} does not match sum of lengths {}",
                stored_total, total
            )));
        }

        Ok(Self { lengths, total })
    }

    pub fn encode(&self) -> [u8; ENCODED_LENGTHS_SIZE] {
        let mut word = [0u8; ENCODED_LENGTHS_SIZE];
        write_be(&mut word[ENCODED_LENGTHS_SIZE - TOTAL_BYTES..], self.total);
        for (i, len) in self.lengths.iter().enumerate() {
            let (start, end) = slot_bounds(i);
            write_be(&mut word[start..end], *len);
        }
        word
    }

    pub fn lengths(&self) -> &[u64] {
        &self.lengths
    }

    pub fn get(&self, index: usize) -> Option<u64> {
        self.lengths.get(index).copied()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Replace the length of dynamic field `index`, recomputing the total.
    pub fn set(&mut self, index: usize, len: u64) -> Result<()> {
        let mut lengths = self.lengths.clone();
        let slot = lengths.get_mut(index).ok_or_else(|| {
            MirrorError::MalformedRecord(format!("no dynamic field {}", index))
        })?;
        *slot = len;
        *self = Self::new(lengths)?;
        Ok(())
    }

    /// Byte span `[start, end)` of dynamic field `index` within the dynamic segment.
    pub fn span(&self, index: usize) -> Result<(u64, u64)> {
        let mut start = 0u64;
        for (i, len) in self.lengths.iter().enumerate() {
            let end = checked_total(start, *len)?;
            if i == index {
                return Ok((start, end));
            }
            start = end;
        }
        Err(MirrorError::MalformedRecord(format!(
            "no dynamic field {}",
            index
        )))
    }
}

fn checked_total(acc: u64, len: u64) -> Result<u64> {
    acc.checked_add(len)
        .ok_or_else(|| MirrorError::MalformedRecord("dynamic length overflow".into()))
}

fn slot_bounds(index: usize) -> (usize, usize) {
    let end = ENCODED_LENGTHS_SIZE - TOTAL_BYTES - LENGTH_BYTES * index;
    (end - LENGTH_BYTES, end)
}

fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
}

fn write_be(out: &mut [u8], value: u64) {
    let be = value.to_be_bytes();
    out.copy_from_slice(&be[be.len() - out.len()..]);
}
