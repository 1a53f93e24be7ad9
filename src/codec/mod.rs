//! Record codec.
//!
//! Values are packed into three segments:
//!
//! ```text
//! | static data | encoded lengths (32B, only with dynamic fields) | dynamic data |
//! ```
//!
//! Static fields are concatenated at schema-derived offsets. Dynamic fields
//! are concatenated in declared order and sliced using the lengths word.

mod layout;
mod lengths;
mod patch;
mod record;

pub use layout::PackedLayout;
pub use lengths::{EncodedLengths, ENCODED_LENGTHS_SIZE, MAX_DYNAMIC_LENGTH};
pub use patch::{apply_log_patch, apply_patch};
pub use record::{decode_key, decode_layout, decode_value, encode_key, encode_value};
