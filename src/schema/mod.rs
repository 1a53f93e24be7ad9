//! Table schemas.
//!
//! A schema is an ordered list of typed fields. Fixed-width fields are
//! packed into the static segment; variable-width fields go to the dynamic
//! segment and are described by the encoded-lengths word.

mod field;
mod registry;

pub use field::{Field, FieldType, FieldValue, Schema, Slot, StaticType, MAX_DYNAMIC_FIELDS};
pub use registry::{SchemaRegistry, Table};
