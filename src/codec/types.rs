//! The fixed field-type tag space.
//!
//! Every field written by the codec is prefixed with one of these tags.
//! Numeric ids are part of the on-disk format: a tag may be added, but an
//! existing id is never renumbered or given new semantics.

use std::fmt;

/// Declared type of a bean field, and its on-disk tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldType {
    Int = 0,
    Long = 1,
    Float = 2,
    Double = 3,
    Boolean = 4,
    Byte = 5,
    Char = 6,
    Short = 7,
    IntBoxed = 8,
    LongBoxed = 9,
    FloatBoxed = 10,
    DoubleBoxed = 11,
    BooleanBoxed = 12,
    ByteBoxed = 13,
    CharBoxed = 14,
    ShortBoxed = 15,
    String = 16,
    Date = 17,
    Uuid = 18,
    ByteArray = 19,
    IntArray = 20,
    LongArray = 21,
    FloatArray = 22,
    DoubleArray = 23,
    ByteArray2D = 24,
    IntArray2D = 25,
    LongArray2D = 26,
    FloatArray2D = 27,
    DoubleArray2D = 28,
    StringArray = 29,
    StringArray2D = 30,
    DateArray = 31,
    DateArray2D = 32,
    Bean = 33,
    BeanArray = 34,
    BeanArray2D = 35,
    BeanList = 36,
    StringList = 37,
    BeanSet = 38,
    StringSet = 39,
    /// Legacy enum encoding by ordinal. Still readable, mapped onto
    /// [`FieldType::Enum`] slots through the declared variant names.
    EnumOrdinal = 40,
    Enum = 41,
    EnumSet = 42,
    /// Opaque, application-serialized fallback.
    Object = 43,
}

const ALL: [FieldType; 44] = [
    FieldType::Int,
    FieldType::Long,
    FieldType::Float,
    FieldType::Double,
    FieldType::Boolean,
    FieldType::Byte,
    FieldType::Char,
    FieldType::Short,
    FieldType::IntBoxed,
    FieldType::LongBoxed,
    FieldType::FloatBoxed,
    FieldType::DoubleBoxed,
    FieldType::BooleanBoxed,
    FieldType::ByteBoxed,
    FieldType::CharBoxed,
    FieldType::ShortBoxed,
    FieldType::String,
    FieldType::Date,
    FieldType::Uuid,
    FieldType::ByteArray,
    FieldType::IntArray,
    FieldType::LongArray,
    FieldType::FloatArray,
    FieldType::DoubleArray,
    FieldType::ByteArray2D,
    FieldType::IntArray2D,
    FieldType::LongArray2D,
    FieldType::FloatArray2D,
    FieldType::DoubleArray2D,
    FieldType::StringArray,
    FieldType::StringArray2D,
    FieldType::DateArray,
    FieldType::DateArray2D,
    FieldType::Bean,
    FieldType::BeanArray,
    FieldType::BeanArray2D,
    FieldType::BeanList,
    FieldType::StringList,
    FieldType::BeanSet,
    FieldType::StringSet,
    FieldType::EnumOrdinal,
    FieldType::Enum,
    FieldType::EnumSet,
    FieldType::Object,
];

impl FieldType {
    /// The on-disk tag byte.
    #[inline]
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Maps a tag byte back to its type, or `None` for an unknown tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        ALL.get(tag as usize).copied()
    }

    /// Primitive slots are fixed width and never null.
    pub fn is_primitive(self) -> bool {
        (self as u8) <= FieldType::Short as u8
    }

    /// Slots that hold a single nested bean or a container of them.
    pub fn is_bean(self) -> bool {
        matches!(
            self,
            FieldType::Bean
                | FieldType::BeanArray
                | FieldType::BeanArray2D
                | FieldType::BeanList
                | FieldType::BeanSet
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
