//! Field types, schemas and typed values.

use crate::error::{MirrorError, Result};
use crate::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Max number of dynamic fields the encoded-lengths word can describe.
pub const MAX_DYNAMIC_FIELDS: usize = 5;

/// Fixed-width field types. Widths are in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StaticType {
    Uint(u8),
    Int(u8),
    Bool,
    Address,
    FixedBytes(u8),
}

impl StaticType {
    pub fn byte_width(&self) -> usize {
        match self {
            StaticType::Uint(w) | StaticType::Int(w) | StaticType::FixedBytes(w) => *w as usize,
            StaticType::Bool => 1,
            StaticType::Address => 20,
        }
    }

    fn conforms(&self, value: &FieldValue) -> bool {
        match (self, value) {
            (StaticType::Uint(w), FieldValue::Uint(v)) => *w >= 16 || *v >> (8 * *w as u32) == 0,
            (StaticType::Int(w), FieldValue::Int(v)) => {
                if *w >= 16 {
                    return true;
                }
                let bound = 1i128 << (8 * *w as u32 - 1);
                (-bound..bound).contains(v)
            }
            (StaticType::Bool, FieldValue::Bool(_)) => true,
            (StaticType::Address, FieldValue::Address(_)) => true,
            (StaticType::FixedBytes(n), FieldValue::FixedBytes(b)) => b.len() == *n as usize,
            _ => false,
        }
    }
}

impl fmt::Display for StaticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaticType::Uint(w) => write!(f, "uint{}", *w as u32 * 8),
            StaticType::Int(w) => write!(f, "int{}", *w as u32 * 8),
            StaticType::Bool => write!(f, "bool"),
            StaticType::Address => write!(f, "address"),
            StaticType::FixedBytes(n) => write!(f, "bytes{}", n),
        }
    }
}

impl FromStr for StaticType {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || MirrorError::SchemaMismatch(format!("unsupported static type: {}", s));

        if s == "bool" {
            return Ok(StaticType::Bool);
        }
        if s == "address" {
            return Ok(StaticType::Address);
        }
        // uint256/int256 words do not fit the native integer values; declare them as bytes32
        if let Some(bits) = s.strip_prefix("uint") {
            let bits: u32 = bits.parse().map_err(|_| invalid())?;
            if bits == 0 || bits % 8 != 0 || bits > 128 {
                return Err(invalid());
            }
            return Ok(StaticType::Uint((bits / 8) as u8));
        }
        if let Some(bits) = s.strip_prefix("int") {
            let bits: u32 = bits.parse().map_err(|_| invalid())?;
            if bits == 0 || bits % 8 != 0 || bits > 128 {
                return Err(invalid());
            }
            return Ok(StaticType::Int((bits / 8) as u8));
        }
        if let Some(len) = s.strip_prefix("bytes") {
            let len: u8 = len.parse().map_err(|_| invalid())?;
            if len == 0 || len > 32 {
                return Err(invalid());
            }
            return Ok(StaticType::FixedBytes(len));
        }
        Err(invalid())
    }
}

/// Logical type of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldType {
    Static(StaticType),
    Bytes,
    String,
    /// Variable-length array of a fixed-width element type.
    Array(StaticType),
}

impl FieldType {
    /// Byte width for fixed-width types; `None` for variable-width types.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            FieldType::Static(t) => Some(t.byte_width()),
            _ => None,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.fixed_width().is_none()
    }

    /// Whether `value` has this type and fits its width.
    pub fn conforms(&self, value: &FieldValue) -> bool {
        match (self, value) {
            (FieldType::Static(t), v) => t.conforms(v),
            (FieldType::Bytes, FieldValue::Bytes(_)) => true,
            (FieldType::String, FieldValue::String(_)) => true,
            (FieldType::Array(elem), FieldValue::Array(items)) => {
                items.iter().all(|item| elem.conforms(item))
            }
            _ => false,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Static(t) => write!(f, "{}", t),
            FieldType::Bytes => write!(f, "bytes"),
            FieldType::String => write!(f, "string"),
            FieldType::Array(elem) => write!(f, "{}[]", elem),
        }
    }
}

impl FromStr for FieldType {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s {
            "bytes" => Ok(FieldType::Bytes),
            "string" => Ok(FieldType::String),
            _ => match s.strip_suffix("[]") {
                Some(elem) => Ok(FieldType::Array(elem.parse()?)),
                None => Ok(FieldType::Static(s.parse()?)),
            },
        }
    }
}

impl TryFrom<String> for FieldType {
    type Error = MirrorError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<FieldType> for String {
    fn from(t: FieldType) -> Self {
        t.to_string()
    }
}

/// A named, typed unit of a schema.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }

    pub fn fixed_width(&self) -> Option<usize> {
        self.field_type.fixed_width()
    }
}

/// Where a field lives in the packed layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Byte offset and width within the static segment.
    Static { offset: usize, width: usize },
    /// Position among the dynamic fields (index into the encoded lengths).
    Dynamic { index: usize },
}

/// Ordered fields of a key or value.
///
/// Fields may be declared in any order. When packed, fixed-width fields are
/// serialized contiguously in declared order before any variable-width field.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<Field>", into = "Vec<Field>")]
pub struct Schema {
    fields: Vec<Field>,
    slots: Vec<Slot>,
    static_length: usize,
    num_dynamic: usize,
}

impl Schema {
    /// Build a schema, validating names and the dynamic field count.
    pub fn new(fields: Vec<Field>) -> Result<Self> {
        let mut names = HashSet::new();
        let mut slots = Vec::with_capacity(fields.len());
        let mut static_length = 0usize;
        let mut num_dynamic = 0usize;

        for field in &fields {
            if !names.insert(field.name.as_str()) {
                return Err(MirrorError::SchemaMismatch(format!(
                    "duplicate field name: {}",
                    field.name
                )));
            }
            match field.fixed_width() {
                Some(width) => {
                    slots.push(Slot::Static {
                        offset: static_length,
                        width,
                    });
                    static_length += width;
                }
                None => {
                    slots.push(Slot::Dynamic { index: num_dynamic });
                    num_dynamic += 1;
                }
            }
        }

        if num_dynamic > MAX_DYNAMIC_FIELDS {
            return Err(MirrorError::SchemaMismatch(format!(
                "{} dynamic fields (max {})",
                num_dynamic, MAX_DYNAMIC_FIELDS
            )));
        }

        Ok(Self {
            fields,
            slots,
            static_length,
            num_dynamic,
        })
    }

    /// Build a schema from `(name, type)` pairs, e.g. `[("id", "uint32")]`.
    pub fn parse(fields: &[(&str, &str)]) -> Result<Self> {
        let fields = fields
            .iter()
            .map(|(name, ty)| Ok(Field::new(*name, ty.parse()?)))
            .collect::<Result<Vec<_>>>()?;
        Self::new(fields)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Total width of the static segment.
    pub fn static_length(&self) -> usize {
        self.static_length
    }

    pub fn num_static(&self) -> usize {
        self.fields.len() - self.num_dynamic
    }

    pub fn num_dynamic(&self) -> usize {
        self.num_dynamic
    }

    pub fn has_dynamic(&self) -> bool {
        self.num_dynamic > 0
    }

    /// Layout slot of the field at declared position `index`.
    pub fn slot(&self, index: usize) -> Option<Slot> {
        self.slots.get(index).copied()
    }

    /// Fields paired with their slots, in declared order.
    pub fn slots(&self) -> impl Iterator<Item = (&Field, Slot)> {
        self.fields.iter().zip(self.slots.iter().copied())
    }

    /// Dynamic fields in serialization order.
    pub fn dynamic_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.field_type.is_dynamic())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

impl TryFrom<Vec<Field>> for Schema {
    type Error = MirrorError;

    fn try_from(fields: Vec<Field>) -> Result<Self> {
        Schema::new(fields)
    }
}

impl From<Schema> for Vec<Field> {
    fn from(schema: Schema) -> Self {
        schema.fields
    }
}

/// A decoded field value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldValue {
    Uint(u128),
    Int(i128),
    Bool(bool),
    Address(Address),
    FixedBytes(Vec<u8>),
    Bytes(Vec<u8>),
    String(String),
    Array(Vec<FieldValue>),
}

impl FieldValue {
    pub fn string(s: impl Into<String>) -> Self {
        FieldValue::String(s.into())
    }

    pub fn as_uint(&self) -> Option<u128> {
        match self {
            FieldValue::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_type_names() {
        assert_eq!(
            "uint32".parse::<FieldType>().unwrap(),
            FieldType::Static(StaticType::Uint(4))
        );
        assert_eq!(
            "int8".parse::<FieldType>().unwrap(),
            FieldType::Static(StaticType::Int(1))
        );
        assert_eq!(
            "bytes32".parse::<FieldType>().unwrap(),
            FieldType::Static(StaticType::FixedBytes(32))
        );
        assert_eq!("bytes".parse::<FieldType>().unwrap(), FieldType::Bytes);
        assert_eq!("string".parse::<FieldType>().unwrap(), FieldType::String);
        assert_eq!(
            "address[]".parse::<FieldType>().unwrap(),
            FieldType::Array(StaticType::Address)
        );
        assert!("uint256".parse::<FieldType>().is_err());
        assert!("uint7".parse::<FieldType>().is_err());
        assert!("bytes33".parse::<FieldType>().is_err());
        assert!("string[]".parse::<FieldType>().is_err());
    }

    #[test]
    fn test_type_display_roundtrip() {
        for name in ["uint8", "int128", "bool", "address", "bytes4", "bytes", "string", "uint16[]"] {
            let parsed: FieldType = name.parse().unwrap();
            assert_eq!(parsed.to_string(), name);
        }
    }

    #[test]
    fn test_schema_slots() {
        let schema = Schema::parse(&[
            ("a", "uint8"),
            ("b", "uint32"),
            ("c", "address"),
            ("d", "string"),
        ])
        .unwrap();
        assert_eq!(schema.static_length(), 25);
        assert_eq!(schema.slot(0), Some(Slot::Static { offset: 0, width: 1 }));
        assert_eq!(schema.slot(1), Some(Slot::Static { offset: 1, width: 4 }));
        assert_eq!(schema.slot(2), Some(Slot::Static { offset: 5, width: 20 }));
        assert_eq!(schema.slot(3), Some(Slot::Dynamic { index: 0 }));
        assert_eq!(schema.num_dynamic(), 1);
        assert_eq!(schema.index_of("d"), Some(3));
    }

    #[test]
    fn test_schema_interleaved_declaration() {
        let schema = Schema::parse(&[("name", "string"), ("score", "uint32"), ("tags", "bytes")]).unwrap();
        assert_eq!(schema.slot(0), Some(Slot::Dynamic { index: 0 }));
        assert_eq!(schema.slot(1), Some(Slot::Static { offset: 0, width: 4 }));
        assert_eq!(schema.slot(2), Some(Slot::Dynamic { index: 1 }));
        assert_eq!(schema.static_length(), 4);
        let names: Vec<&str> = schema.dynamic_fields().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["name", "tags"]);
    }

    #[test]
    fn test_schema_rejects_duplicate_names() {
        let result = Schema::parse(&[("a", "uint8"), ("a", "uint16")]);
        assert!(matches!(result, Err(MirrorError::SchemaMismatch(_))));
    }

    #[test]
    fn test_schema_rejects_too_many_dynamic() {
        let fields: Vec<(String, &str)> = (0..6).map(|i| (format!("f{}", i), "bytes")).collect();
        let pairs: Vec<(&str, &str)> = fields.iter().map(|(n, t)| (n.as_str(), *t)).collect();
        assert!(Schema::parse(&pairs).is_err());
    }

    #[test]
    fn test_conforms() {
        let uint8 = FieldType::Static(StaticType::Uint(1));
        assert!(uint8.conforms(&FieldValue::Uint(255)));
        assert!(!uint8.conforms(&FieldValue::Uint(256)));
        assert!(!uint8.conforms(&FieldValue::Int(1)));

        let int8 = FieldType::Static(StaticType::Int(1));
        assert!(int8.conforms(&FieldValue::Int(-128)));
        assert!(!int8.conforms(&FieldValue::Int(128)));

        let bytes2 = FieldType::Static(StaticType::FixedBytes(2));
        assert!(bytes2.conforms(&FieldValue::FixedBytes(vec![1, 2])));
        assert!(!bytes2.conforms(&FieldValue::FixedBytes(vec![1])));

        let arr = FieldType::Array(StaticType::Uint(2));
        assert!(arr.conforms(&FieldValue::Array(vec![FieldValue::Uint(1), FieldValue::Uint(65535)])));
        assert!(!arr.conforms(&FieldValue::Array(vec![FieldValue::Uint(65536)])));
    }

    #[test]
    fn test_schema_json() {
        let json = r#"[{"name":"id","type":"uint32"},{"name":"tags","type":"bytes"}]"#;
        let schema: Schema = serde_json::from_str(json).unwrap();
        assert_eq!(schema.static_length(), 4);
        assert_eq!(serde_json::to_string(&schema).unwrap(), json);

        let bad = r#"[{"name":"id","type":"bytes"},{"name":"id","type":"uint32"}]"#;
        assert!(serde_json::from_str::<Schema>(bad).is_err());
    }
}
