//! Partial updates over the flat packed layout.

use super::layout::PackedLayout;
use super::lengths::EncodedLengths;
use crate::error::{MirrorError, Result};
use crate::schema::Schema;
use crate::types::Patch;
use std::ops::Range;

/// Replace flat byte range `range` of `layout` with `new_bytes`.
///
/// Length-preserving patches may touch any segment. Length-changing patches
/// must fall inside a single dynamic field; that field's length is
/// recomputed and later dynamic bytes shift.
pub fn apply_patch(
    schema: &Schema,
    layout: &PackedLayout,
    range: Range<u64>,
    new_bytes: &[u8],
) -> Result<PackedLayout> {
    splice(schema, layout, range, new_bytes, None)
}

/// Apply a log entry's [`Patch`], honoring its dynamic field hint.
pub fn apply_log_patch(schema: &Schema, layout: &PackedLayout, patch: &Patch) -> Result<PackedLayout> {
    let end = patch
        .start
        .checked_add(patch.delete_count)
        .ok_or(MirrorError::PatchOutOfBounds {
            start: patch.start,
            end: u64::MAX,
            len: layout.len(),
        })?;
    splice(schema, layout, patch.start..end, &patch.data, patch.dynamic_field)
}

fn splice(
    schema: &Schema,
    layout: &PackedLayout,
    range: Range<u64>,
    new_bytes: &[u8],
    dynamic_field: Option<usize>,
) -> Result<PackedLayout> {
    let len = layout.len();
    if range.start > range.end || range.end > len {
        return Err(MirrorError::PatchOutOfBounds {
            start: range.start,
            end: range.end,
            len,
        });
    }

    let removed = range.end - range.start;
    let inserted = new_bytes.len() as u64;

    if removed == inserted {
        return overwrite(schema, layout, range, new_bytes);
    }

    let dynamic_offset = layout.dynamic_offset();
    if !schema.has_dynamic() || range.start < dynamic_offset {
        return Err(MirrorError::MalformedRecord(format!(
            "length-changing patch at byte {} falls outside dynamic data (starts at {})",
            range.start, dynamic_offset
        )));
    }

    let mut lengths = EncodedLengths::decode(&layout.encoded_lengths, schema.num_dynamic())?;
    if lengths.total() != layout.dynamic_data.len() as u64 {
        return Err(MirrorError::MalformedRecord(format!(
            "dynamic data is {} bytes, encoded lengths sum to {}",
            layout.dynamic_data.len(),
            lengths.total()
        )));
    }

    let rel_start = range.start - dynamic_offset;
    let rel_end = range.end - dynamic_offset;
    let contains = |index: usize| -> Result<bool> {
        let (start, end) = lengths.span(index)?;
        Ok(start <= rel_start && rel_end <= end)
    };

    let field = match dynamic_field {
        Some(index) => {
            if index >= schema.num_dynamic() || !contains(index)? {
                return Err(MirrorError::MalformedRecord(format!(
                    "patch {}..{} is not inside dynamic field {}",
                    range.start, range.end, index
                )));
            }
            index
        }
        None => {
            let mut found = None;
            for index in 0..schema.num_dynamic() {
                if contains(index)? {
                    found = Some(index);
                    break;
                }
            }
            found.ok_or_else(|| {
                MirrorError::MalformedRecord(format!(
                    "length-changing patch {}..{} spans more than one dynamic field",
                    range.start, range.end
                ))
            })?
        }
    };

    let current = lengths.get(field).unwrap_or(0);
    let new_len = (current - removed)
        .checked_add(inserted)
        .ok_or_else(|| MirrorError::MalformedRecord("dynamic length overflow".into()))?;
    lengths.set(field, new_len)?;

    let mut dynamic_data = layout.dynamic_data.clone();
    dynamic_data.splice(
        rel_start as usize..rel_end as usize,
        new_bytes.iter().copied(),
    );

    Ok(PackedLayout::new(
        layout.static_data.clone(),
        lengths.encode().to_vec(),
        dynamic_data,
    ))
}

fn overwrite(
    schema: &Schema,
    layout: &PackedLayout,
    range: Range<u64>,
    new_bytes: &[u8],
) -> Result<PackedLayout> {
    let mut flat = layout.to_bytes();
    flat[range.start as usize..range.end as usize].copy_from_slice(new_bytes);

    let static_len = layout.static_data.len();
    let lengths_len = layout.encoded_lengths.len();
    let dynamic_data = flat.split_off(static_len + lengths_len);
    let encoded_lengths = flat.split_off(static_len);
    let patched = PackedLayout::new(flat, encoded_lengths, dynamic_data);

    let touches_lengths =
        range.start < layout.dynamic_offset() && range.end > static_len as u64 && lengths_len > 0;
    if touches_lengths {
        let lengths = EncodedLengths::decode(&patched.encoded_lengths, schema.num_dynamic())?;
        if lengths.total() != patched.dynamic_data.len() as u64 {
            return Err(MirrorError::MalformedRecord(
                "patched encoded lengths disagree with dynamic data".into(),
            ));
        }
    }

    Ok(patched)
}
