//! Three-segment packed layout.

use super::lengths::{EncodedLengths, ENCODED_LENGTHS_SIZE};
use crate::error::{MirrorError, Result};
use crate::schema::{Schema, Slot};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Wire representation of a record value (or of a key with dynamic fields).
///
/// Flat coordinates address `static_data ++ encoded_lengths ++ dynamic_data`.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PackedLayout {
    pub static_data: Vec<u8>,
    pub encoded_lengths: Vec<u8>,
    pub dynamic_data: Vec<u8>,
}

impl PackedLayout {
    pub fn new(static_data: Vec<u8>, encoded_lengths: Vec<u8>, dynamic_data: Vec<u8>) -> Self {
        Self {
            static_data,
            encoded_lengths,
            dynamic_data,
        }
    }

    /// Split flat bytes into segments using the schema's shape.
    pub fn from_bytes(schema: &Schema, bytes: &[u8]) -> Result<Self> {
        let static_len = schema.static_length();
        let lengths_len = if schema.has_dynamic() {
            ENCODED_LENGTHS_SIZE
        } else {
            0
        };
        if bytes.len() < static_len + lengths_len {
            return Err(MirrorError::MalformedRecord(format!(
                "{} bytes is shorter than the {} byte fixed prefix",
                bytes.len(),
                static_len + lengths_len
            )));
        }
        let (static_data, rest) = bytes.split_at(static_len);
        let (encoded_lengths, dynamic_data) = rest.split_at(lengths_len);
        Ok(Self::new(
            static_data.to_vec(),
            encoded_lengths.to_vec(),
            dynamic_data.to_vec(),
        ))
    }

    /// Concatenate the three segments.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len() as usize);
        out.extend_from_slice(&self.static_data);
        out.extend_from_slice(&self.encoded_lengths);
        out.extend_from_slice(&self.dynamic_data);
        out
    }

    /// Total flat length.
    pub fn len(&self) -> u64 {
        (self.static_data.len() + self.encoded_lengths.len() + self.dynamic_data.len()) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat offset where the dynamic segment begins.
    pub fn dynamic_offset(&self) -> u64 {
        (self.static_data.len() + self.encoded_lengths.len()) as u64
    }

    /// Flat byte range of the field named `name`.
    pub fn field_range(&self, schema: &Schema, name: &str) -> Result<Range<u64>> {
        let index = schema
            .index_of(name)
            .ok_or_else(|| MirrorError::SchemaMismatch(format!("no field named {}", name)))?;
        match schema.slot(index) {
            Some(Slot::Static { offset, width }) => Ok(offset as u64..(offset + width) as u64),
            Some(Slot::Dynamic { index }) => self.dynamic_field_range(schema, index),
            None => Err(MirrorError::SchemaMismatch(format!("no field named {}", name))),
        }
    }

    /// Flat byte range of dynamic field `index` (in serialization order).
    pub fn dynamic_field_range(&self, schema: &Schema, index: usize) -> Result<Range<u64>> {
        let lengths = EncodedLengths::decode(&self.encoded_lengths, schema.num_dynamic())?;
        let (start, end) = lengths.span(index)?;
        let base = self.dynamic_offset();
        Ok(base + start..base + end)
    }
}
