//! Self-describing, field-indexed record encoding.
//!
//! A record is written as a one-byte field count followed by one
//! `[u8 field index][u8 type tag][payload]` triple per field, in ascending
//! field-index order. Records carry no length prefix: the encoding itself
//! delimits them, which is what lets the data file be a bare concatenation
//! of records.
//!
//! ## Compatibility
//!
//! Field indexes are assigned once and never reused. On decode the
//! encoded fields are merged against the reader's current [`Schema`]:
//!
//! - a field the reader no longer declares is skipped using its type tag;
//! - a field the writer did not know about keeps the reader's default;
//! - a field whose stored type differs from the declared type is skipped
//!   and reported once per type through `tracing::warn!`.
//!
//! Tag ids in [`FieldType`] are part of the on-disk format.
//!
//! ## Nested records
//!
//! Nested-record slots declare a closed set of accepted types through
//! [`NestedDef`]. The default type is written without a tag; other types
//! write their stable tag, and arrays reuse the previous tag with a one-byte
//! "same as last" flag. An unknown tag on decode skips the nested payload.

#[cfg(test)]
pub(crate) mod tests;

mod read;
mod schema;
mod types;
mod value;
mod write;

pub use read::{decode_into, decode_record, skip_record};
pub use schema::{Bean, BeanFactory, BeanType, FieldDef, NestedDef, Schema};
pub use types::FieldType;
pub use value::Value;
pub use write::{encode_bean, encode_to_vec};

pub(crate) use write::write_value;
