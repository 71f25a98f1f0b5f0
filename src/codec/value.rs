//! Dynamically typed field values exchanged through the [`Bean`] accessor.

use std::collections::BTreeSet;

use super::Bean;

/// A single field value.
///
/// Primitive slots always carry their scalar variant. Nullable slots use
/// [`Value::Null`] for absence. Dates are milliseconds since the UNIX epoch.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Byte(i8),
    Char(char),
    Short(i16),
    Str(String),
    Date(i64),
    Uuid(u128),
    ByteArray(Vec<u8>),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
    FloatArray(Vec<f32>),
    DoubleArray(Vec<f64>),
    ByteArray2D(Vec<Vec<u8>>),
    IntArray2D(Vec<Vec<i32>>),
    LongArray2D(Vec<Vec<i64>>),
    FloatArray2D(Vec<Vec<f32>>),
    DoubleArray2D(Vec<Vec<f64>>),
    StrArray(Vec<Option<String>>),
    StrArray2D(Vec<Vec<Option<String>>>),
    DateArray(Vec<Option<i64>>),
    DateArray2D(Vec<Vec<Option<i64>>>),
    Bean(Box<dyn Bean>),
    BeanArray(Vec<Option<Box<dyn Bean>>>),
    BeanArray2D(Vec<Vec<Option<Box<dyn Bean>>>>),
    BeanList(Vec<Option<Box<dyn Bean>>>),
    StrList(Vec<Option<String>>),
    BeanSet(Vec<Box<dyn Bean>>),
    StrSet(BTreeSet<String>),
    Enum(String),
    EnumSet(BTreeSet<String>),
    Object(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Enum(s) => Some(s),
            _ => None,
        }
    }

    /// Takes the string out of a `Str` or `Enum` value.
    pub fn into_string(self) -> Option<String> {
        match self {
            Value::Str(s) | Value::Enum(s) => Some(s),
            _ => None,
        }
    }

    /// Takes the nested bean out of a `Bean` value.
    pub fn into_bean(self) -> Option<Box<dyn Bean>> {
        match self {
            Value::Bean(b) => Some(b),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Value::ByteArray(b) | Value::Object(b) => Some(b),
            _ => None,
        }
    }

    /// Downcasts a nested bean value to a concrete type, cloning it.
    pub fn bean_as<T: Bean + Clone>(&self) -> Option<T> {
        match self {
            Value::Bean(b) => b.as_any().downcast_ref::<T>().cloned(),
            _ => None,
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
