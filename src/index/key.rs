//! Index keys and key-type dispatch.
//!
//! The indexed field's declared type picks one of four key paths:
//! `Int`/`IntBoxed` keys are `i32`, `Long`/`LongBoxed` keys are `i64`,
//! `String` keys are UTF-8 strings, and everything else (nested beans
//! included) is keyed by the codec encoding of the field value.

use std::collections::HashMap;
use std::fmt;

use crate::codec::{self, FieldDef, FieldType, Value};
use crate::error::DumpError;

// ------------------------------------------------------------------------------------------------
// IndexKey
// ------------------------------------------------------------------------------------------------

/// A key as stored in an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexKey {
    Int(i32),
    Long(i64),
    Str(String),
    /// Codec encoding of a nested bean or any other field value.
    Object(Vec<u8>),
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKey::Int(v) => write!(f, "{v}"),
            IndexKey::Long(v) => write!(f, "{v}"),
            IndexKey::Str(s) => write!(f, "{s:?}"),
            IndexKey::Object(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

impl From<i32> for IndexKey {
    fn from(v: i32) -> Self {
        IndexKey::Int(v)
    }
}

impl From<i64> for IndexKey {
    fn from(v: i64) -> Self {
        IndexKey::Long(v)
    }
}

impl From<&str> for IndexKey {
    fn from(v: &str) -> Self {
        IndexKey::Str(v.to_string())
    }
}

impl From<String> for IndexKey {
    fn from(v: String) -> Self {
        IndexKey::Str(v)
    }
}

impl IndexKey {
    /// Identity bytes: big-endian for numbers, UTF-8 for strings.
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        match self {
            IndexKey::Int(v) => v.to_be_bytes().to_vec(),
            IndexKey::Long(v) => v.to_be_bytes().to_vec(),
            IndexKey::Str(s) => s.as_bytes().to_vec(),
            IndexKey::Object(b) => b.clone(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// KeyKind
// ------------------------------------------------------------------------------------------------

/// Key path chosen from the indexed field's declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyKind {
    Int,
    Long,
    Str,
    Bean,
    Object,
}

impl KeyKind {
    pub(crate) fn of(ty: FieldType) -> Self {
        match ty {
            FieldType::Int | FieldType::IntBoxed => KeyKind::Int,
            FieldType::Long | FieldType::LongBoxed => KeyKind::Long,
            FieldType::String => KeyKind::Str,
            t if t.is_bean() => KeyKind::Bean,
            _ => KeyKind::Object,
        }
    }

    /// Keys that are too wide for a fixed-width slot.
    pub(crate) fn is_variable(self) -> bool {
        matches!(self, KeyKind::Str | KeyKind::Bean | KeyKind::Object)
    }

    pub(crate) fn accepts(self, key: &IndexKey) -> bool {
        matches!(
            (self, key),
            (KeyKind::Int, IndexKey::Int(_))
                | (KeyKind::Long, IndexKey::Long(_))
                | (KeyKind::Str, IndexKey::Str(_))
                | (KeyKind::Bean | KeyKind::Object, IndexKey::Object(_))
        )
    }

    /// Rejects a key of the wrong shape for a field.
    pub(crate) fn check(self, field: &str, key: &IndexKey) -> Result<(), DumpError> {
        if self.accepts(key) {
            Ok(())
        } else {
            Err(DumpError::InvalidArgument(format!(
                "key {key} does not match the {self:?} keys of `{field}`"
            )))
        }
    }
}

/// The key of `value` in a field declared as `def`, or `None` for null.
pub(crate) fn key_for(def: &FieldDef, value: &Value) -> Result<Option<IndexKey>, DumpError> {
    if value.is_null() {
        return Ok(None);
    }
    let key = match (KeyKind::of(def.ty), value) {
        (KeyKind::Int, Value::Int(v)) => IndexKey::Int(*v),
        (KeyKind::Long, Value::Long(v)) => IndexKey::Long(*v),
        (KeyKind::Str, Value::Str(s)) => IndexKey::Str(s.clone()),
        (KeyKind::Bean | KeyKind::Object, v) => {
            let mut buf = Vec::new();
            codec::write_value(def, v, &mut buf)?;
            IndexKey::Object(buf)
        }
        (kind, v) => {
            return Err(DumpError::InvalidArgument(format!(
                "value {v:?} cannot key the {kind:?} field `{}`",
                def.name
            )));
        }
    };
    Ok(Some(key))
}

// ------------------------------------------------------------------------------------------------
// KeyMap
// ------------------------------------------------------------------------------------------------

/// A key map specialised per key path, so numeric keys are stored unboxed.
#[derive(Debug)]
pub(crate) enum KeyMap<V> {
    Int(HashMap<i32, V>),
    Long(HashMap<i64, V>),
    Str(HashMap<String, V>),
    Bytes(HashMap<Vec<u8>, V>),
}

impl<V> KeyMap<V> {
    pub(crate) fn new(kind: KeyKind) -> Self {
        match kind {
            KeyKind::Int => KeyMap::Int(HashMap::new()),
            KeyKind::Long => KeyMap::Long(HashMap::new()),
            KeyKind::Str => KeyMap::Str(HashMap::new()),
            KeyKind::Bean | KeyKind::Object => KeyMap::Bytes(HashMap::new()),
        }
    }

    pub(crate) fn get(&self, key: &IndexKey) -> Option<&V> {
        match (self, key) {
            (KeyMap::Int(m), IndexKey::Int(k)) => m.get(k),
            (KeyMap::Long(m), IndexKey::Long(k)) => m.get(k),
            (KeyMap::Str(m), IndexKey::Str(k)) => m.get(k),
            (KeyMap::Bytes(m), IndexKey::Object(k)) => m.get(k),
            _ => None,
        }
    }

    pub(crate) fn get_mut(&mut self, key: &IndexKey) -> Option<&mut V> {
        match (self, key) {
            (KeyMap::Int(m), IndexKey::Int(k)) => m.get_mut(k),
            (KeyMap::Long(m), IndexKey::Long(k)) => m.get_mut(k),
            (KeyMap::Str(m), IndexKey::Str(k)) => m.get_mut(k),
            (KeyMap::Bytes(m), IndexKey::Object(k)) => m.get_mut(k),
            _ => None,
        }
    }

    /// Returns the entry for `key`, inserting `default()` if absent.
    ///
    /// `None` if the key has the wrong shape for this map.
    pub(crate) fn get_or_insert_with(
        &mut self,
        key: &IndexKey,
        default: impl FnOnce() -> V,
    ) -> Option<&mut V> {
        match (self, key) {
            (KeyMap::Int(m), IndexKey::Int(k)) => Some(m.entry(*k).or_insert_with(default)),
            (KeyMap::Long(m), IndexKey::Long(k)) => Some(m.entry(*k).or_insert_with(default)),
            (KeyMap::Str(m), IndexKey::Str(k)) => {
                Some(m.entry(k.clone()).or_insert_with(default))
            }
            (KeyMap::Bytes(m), IndexKey::Object(k)) => {
                Some(m.entry(k.clone()).or_insert_with(default))
            }
            _ => None,
        }
    }

    pub(crate) fn insert(&mut self, key: &IndexKey, value: V) -> Option<V> {
        match (self, key) {
            (KeyMap::Int(m), IndexKey::Int(k)) => m.insert(*k, value),
            (KeyMap::Long(m), IndexKey::Long(k)) => m.insert(*k, value),
            (KeyMap::Str(m), IndexKey::Str(k)) => m.insert(k.clone(), value),
            (KeyMap::Bytes(m), IndexKey::Object(k)) => m.insert(k.clone(), value),
            _ => None,
        }
    }

    pub(crate) fn remove(&mut self, key: &IndexKey) -> Option<V> {
        match (self, key) {
            (KeyMap::Int(m), IndexKey::Int(k)) => m.remove(k),
            (KeyMap::Long(m), IndexKey::Long(k)) => m.remove(k),
            (KeyMap::Str(m), IndexKey::Str(k)) => m.remove(k),
            (KeyMap::Bytes(m), IndexKey::Object(k)) => m.remove(k),
            _ => None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            KeyMap::Int(m) => m.len(),
            KeyMap::Long(m) => m.len(),
            KeyMap::Str(m) => m.len(),
            KeyMap::Bytes(m) => m.len(),
        }
    }

    pub(crate) fn clear(&mut self) {
        match self {
            KeyMap::Int(m) => m.clear(),
            KeyMap::Long(m) => m.clear(),
            KeyMap::Str(m) => m.clear(),
            KeyMap::Bytes(m) => m.clear(),
        }
    }

    /// Every `(key, value)` pair, in no particular order.
    pub(crate) fn entries(&self) -> Vec<(IndexKey, &V)> {
        match self {
            KeyMap::Int(m) => m.iter().map(|(k, v)| (IndexKey::Int(*k), v)).collect(),
            KeyMap::Long(m) => m.iter().map(|(k, v)| (IndexKey::Long(*k), v)).collect(),
            KeyMap::Str(m) => m.iter().map(|(k, v)| (IndexKey::Str(k.clone()), v)).collect(),
            KeyMap::Bytes(m) => m
                .iter()
                .map(|(k, v)| (IndexKey::Object(k.clone()), v))
                .collect(),
        }
    }

    pub(crate) fn values(&self) -> Box<dyn Iterator<Item = &V> + '_> {
        match self {
            KeyMap::Int(m) => Box::new(m.values()),
            KeyMap::Long(m) => Box::new(m.values()),
            KeyMap::Str(m) => Box::new(m.values()),
            KeyMap::Bytes(m) => Box::new(m.values()),
        }
    }
}
