//! Encoding and decoding of keys and values against a schema.

use super::layout::PackedLayout;
use super::lengths::{EncodedLengths, MAX_DYNAMIC_LENGTH};
use crate::error::{MirrorError, Result};
use crate::schema::{FieldType, FieldValue, Schema, Slot, StaticType};
use crate::types::Address;

/// Encode key values.
///
/// All-static keys encode to the concatenated static bytes; keys with
/// dynamic fields use the flat three-segment form.
pub fn encode_key(schema: &Schema, values: &[FieldValue]) -> Result<Vec<u8>> {
    Ok(encode_value(schema, values)?.to_bytes())
}

/// Decode key bytes produced by [`encode_key`].
pub fn decode_key(schema: &Schema, bytes: &[u8]) -> Result<Vec<FieldValue>> {
    let layout = PackedLayout::from_bytes(schema, bytes)?;
    decode_layout(schema, &layout)
}

/// Encode values (in declared order) into a packed layout.
pub fn encode_value(schema: &Schema, values: &[FieldValue]) -> Result<PackedLayout> {
    check_shape(schema, values)?;

    let mut static_data = Vec::with_capacity(schema.static_length());
    let mut dynamic: Vec<Vec<u8>> = vec![Vec::new(); schema.num_dynamic()];

    for ((field, slot), value) in schema.slots().zip(values) {
        match slot {
            Slot::Static { width, .. } => encode_static(width, value, &mut static_data),
            Slot::Dynamic { index } => encode_dynamic(&field.field_type, value, &mut dynamic[index]),
        }
    }

    if !schema.has_dynamic() {
        return Ok(PackedLayout::new(static_data, Vec::new(), Vec::new()));
    }

    let mut lengths = Vec::with_capacity(dynamic.len());
    for (bytes, field) in dynamic.iter().zip(schema.dynamic_fields()) {
        let len = bytes.len() as u64;
        if len > MAX_DYNAMIC_LENGTH {
            return Err(MirrorError::SchemaMismatch(format!(
                "field {} is {} bytes, more than a dynamic field can hold",
                field.name, len
            )));
        }
        lengths.push(len);
    }
    let encoded_lengths = EncodedLengths::new(lengths)?.encode().to_vec();

    Ok(PackedLayout::new(
        static_data,
        encoded_lengths,
        dynamic.concat(),
    ))
}

/// Decode a value from its three segments.
///
/// The segments are validated against the schema before any field is read.
pub fn decode_value(
    schema: &Schema,
    static_data: &[u8],
    encoded_lengths: &[u8],
    dynamic_data: &[u8],
) -> Result<Vec<FieldValue>> {
    if static_data.len() != schema.static_length() {
        return Err(MirrorError::MalformedRecord(format!(
            "static data is {} bytes, schema requires {}",
            static_data.len(),
            schema.static_length()
        )));
    }

    let lengths = if schema.has_dynamic() {
        let lengths = EncodedLengths::decode(encoded_lengths, schema.num_dynamic())?;
        if lengths.total() != dynamic_data.len() as u64 {
            return Err(MirrorError::MalformedRecord(format!(
                "dynamic data is {} bytes, encoded lengths sum to {}",
                dynamic_data.len(),
                lengths.total()
            )));
        }
        lengths
    } else {
        if !encoded_lengths.is_empty() || !dynamic_data.is_empty() {
            return Err(MirrorError::MalformedRecord(
                "schema has no dynamic fields but dynamic segments are present".into(),
            ));
        }
        EncodedLengths::default()
    };

    let mut values = Vec::with_capacity(schema.len());
    for (field, slot) in schema.slots() {
        let value = match slot {
            Slot::Static { offset, width } => {
                decode_field(&field.field_type, &static_data[offset..offset + width])?
            }
            Slot::Dynamic { index } => {
                let (start, end) = lengths.span(index)?;
                let start = to_index(start)?;
                let end = to_index(end)?;
                decode_field(&field.field_type, &dynamic_data[start..end])?
            }
        };
        values.push(value);
    }
    Ok(values)
}

/// Decode a value held as a [`PackedLayout`].
pub fn decode_layout(schema: &Schema, layout: &PackedLayout) -> Result<Vec<FieldValue>> {
    decode_value(
        schema,
        &layout.static_data,
        &layout.encoded_lengths,
        &layout.dynamic_data,
    )
}

fn check_shape(schema: &Schema, values: &[FieldValue]) -> Result<()> {
    if values.len() != schema.len() {
        return Err(MirrorError::SchemaMismatch(format!(
            "expected {} values, got {}",
            schema.len(),
            values.len()
        )));
    }
    for (field, value) in schema.fields().iter().zip(values) {
        if !field.field_type.conforms(value) {
            return Err(MirrorError::SchemaMismatch(format!(
                "field {} expects {}, got {:?}",
                field.name, field.field_type, value
            )));
        }
    }
    Ok(())
}

fn to_index(offset: u64) -> Result<usize> {
    usize::try_from(offset)
        .map_err(|_| MirrorError::MalformedRecord(format!("offset {} out of range", offset)))
}

// Values are checked against the schema before encoding.
fn encode_static(width: usize, value: &FieldValue, out: &mut Vec<u8>) {
    match value {
        FieldValue::Uint(v) => out.extend_from_slice(&v.to_be_bytes()[16 - width..]),
        FieldValue::Int(v) => out.extend_from_slice(&v.to_be_bytes()[16 - width..]),
        FieldValue::Bool(b) => out.push(u8::from(*b)),
        FieldValue::Address(a) => out.extend_from_slice(&a.0),
        FieldValue::FixedBytes(b) => out.extend_from_slice(b),
        FieldValue::Bytes(_) | FieldValue::String(_) | FieldValue::Array(_) => {}
    }
}

fn encode_dynamic(ty: &FieldType, value: &FieldValue, out: &mut Vec<u8>) {
    match (ty, value) {
        (_, FieldValue::Bytes(b)) => out.extend_from_slice(b),
        (_, FieldValue::String(s)) => out.extend_from_slice(s.as_bytes()),
        (FieldType::Array(elem), FieldValue::Array(items)) => {
            for item in items {
                encode_static(elem.byte_width(), item, out);
            }
        }
        _ => {}
    }
}

fn decode_static(ty: StaticType, bytes: &[u8]) -> Result<FieldValue> {
    match ty {
        StaticType::Uint(w) => {
            let mut buf = [0u8; 16];
            buf[16 - w as usize..].copy_from_slice(bytes);
            Ok(FieldValue::Uint(u128::from_be_bytes(buf)))
        }
        StaticType::Int(w) => {
            let fill = if matches!(bytes.first(), Some(b) if b & 0x80 != 0) {
                0xff
            } else {
                0
            };
            let mut buf = [fill; 16];
            buf[16 - w as usize..].copy_from_slice(bytes);
            Ok(FieldValue::Int(i128::from_be_bytes(buf)))
        }
        StaticType::Bool => match bytes {
            [0] => Ok(FieldValue::Bool(false)),
            [1] => Ok(FieldValue::Bool(true)),
            _ => Err(MirrorError::MalformedRecord(format!(
                "invalid bool byte {:?}",
                bytes
            ))),
        },
        StaticType::Address => {
            let mut addr = [0u8; 20];
            addr.copy_from_slice(bytes);
            Ok(FieldValue::Address(Address(addr)))
        }
        StaticType::FixedBytes(_) => Ok(FieldValue::FixedBytes(bytes.to_vec())),
    }
}

fn decode_field(ty: &FieldType, bytes: &[u8]) -> Result<FieldValue> {
    match ty {
        FieldType::Bytes => Ok(FieldValue::Bytes(bytes.to_vec())),
        FieldType::String => String::from_utf8(bytes.to_vec())
            .map(FieldValue::String)
            .map_err(|e| MirrorError::MalformedRecord(format!("invalid UTF-8 string: {}", e))),
        FieldType::Array(elem) => {
            let width = elem.byte_width();
            if bytes.len() % width != 0 {
                return Err(MirrorError::MalformedRecord(format!(
                    "{} array bytes is not a multiple of element width {}",
                    bytes.len(),
                    width
                )));
            }
            let items = bytes
                .chunks_exact(width)
                .map(|chunk| decode_static(*elem, chunk))
                .collect::<Result<Vec<_>>>()?;
            Ok(FieldValue::Array(items))
        }
        FieldType::Static(ty) => decode_static(*ty, bytes),
    }
}
