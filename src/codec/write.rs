//! Bean → bytes.

use std::collections::BTreeSet;

use crate::encoding::{Encode, EncodingError, len_to_u32};

use super::{Bean, FieldDef, FieldType, NestedDef, Value};

/// Appends the encoding of `bean` to `buf`.
///
/// Layout: `[u8 field_count]` then, in ascending field-index order,
/// `[u8 index][u8 type tag][payload]` for every declared field.
pub fn encode_bean(bean: &dyn Bean, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
    let schema = bean.schema();
    let count = u8::try_from(schema.fields().len()).map_err(|_| {
        EncodingError::LengthOverflow(format!(
            "{} declares more than 255 fields",
            schema.type_name()
        ))
    })?;
    buf.push(count);
    for def in schema.fields() {
        buf.push(def.index);
        buf.push(def.ty.tag());
        let value = bean.field(def.index);
        write_value(def, &value, buf).map_err(|e| match e {
            EncodingError::Custom(msg) => {
                EncodingError::Custom(format!("{}.{}: {msg}", schema.type_name(), def.name))
            }
            other => other,
        })?;
    }
    Ok(())
}

/// Encodes `bean` into a fresh buffer.
pub fn encode_to_vec(bean: &dyn Bean) -> Result<Vec<u8>, EncodingError> {
    let mut buf = Vec::with_capacity(64);
    encode_bean(bean, &mut buf)?;
    Ok(buf)
}

fn mismatch(def: &FieldDef, value: &Value) -> EncodingError {
    EncodingError::Custom(format!("cannot write {value:?} into a {} slot", def.ty))
}

/// Writes `[not_null]` and returns whether a payload follows.
#[inline]
fn not_null(value: &Value, buf: &mut Vec<u8>) -> bool {
    let present = !value.is_null();
    buf.push(u8::from(present));
    present
}

fn write_len(len: usize, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
    len_to_u32(len)?.encode_to(buf)
}

fn write_char(c: char, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
    let unit = u16::try_from(c as u32).map_err(|_| {
        EncodingError::Custom(format!("char {c:?} is outside the basic multilingual plane"))
    })?;
    unit.encode_to(buf)
}

fn write_slice<T: Encode>(items: &[T], buf: &mut Vec<u8>) -> Result<(), EncodingError> {
    write_len(items.len(), buf)?;
    for item in items {
        item.encode_to(buf)?;
    }
    Ok(())
}

/// 2-D rows are written as `[u32 rows]` then per row `[1][u32 n][items]`.
fn write_rows<T: Encode>(rows: &[Vec<T>], buf: &mut Vec<u8>) -> Result<(), EncodingError> {
    write_len(rows.len(), buf)?;
    for row in rows {
        buf.push(1);
        write_slice(row, buf)?;
    }
    Ok(())
}

fn write_opt_strings<'a>(
    items: impl ExactSizeIterator<Item = Option<&'a str>>,
    buf: &mut Vec<u8>,
) -> Result<(), EncodingError> {
    write_len(items.len(), buf)?;
    for item in items {
        match item {
            Some(s) => {
                buf.push(1);
                s.encode_to(buf)?;
            }
            None => buf.push(0),
        }
    }
    Ok(())
}

fn write_opt_dates(items: &[Option<i64>], buf: &mut Vec<u8>) -> Result<(), EncodingError> {
    write_len(items.len(), buf)?;
    for item in items {
        item.encode_to(buf)?;
    }
    Ok(())
}

fn write_string_set(items: &BTreeSet<String>, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
    write_opt_strings(items.iter().map(|s| Some(s.as_str())), buf)
}

/// Writes the type header of a single nested bean:
/// `[is_default][tag if !default]`.
fn write_single_header(
    nested: Option<&NestedDef>,
    bean: &dyn Bean,
    buf: &mut Vec<u8>,
) -> Result<(), EncodingError> {
    let tag = bean.schema().type_name();
    let is_default = nested.is_some_and(|n| n.default.tag == tag);
    buf.push(u8::from(is_default));
    if !is_default {
        tag.encode_to(buf)?;
    }
    Ok(())
}

/// Writes a sequence of optional nested beans. Per element:
/// `[not_null][is_default][same_as_last if !default][tag if !same]`
/// followed by the body. `last` tracks the last non-default tag seen.
fn write_bean_elements<'a>(
    nested: Option<&NestedDef>,
    items: impl ExactSizeIterator<Item = Option<&'a dyn Bean>>,
    last: &mut Option<&'static str>,
    buf: &mut Vec<u8>,
) -> Result<(), EncodingError> {
    write_len(items.len(), buf)?;
    for item in items {
        let Some(bean) = item else {
            buf.push(0);
            continue;
        };
        buf.push(1);
        let tag = bean.schema().type_name();
        let is_default = nested.is_some_and(|n| n.default.tag == tag);
        buf.push(u8::from(is_default));
        if !is_default {
            let same = *last == Some(tag);
            buf.push(u8::from(same));
            if !same {
                tag.encode_to(buf)?;
                *last = Some(tag);
            }
        }
        encode_bean(bean, buf)?;
    }
    Ok(())
}

/// Containers of nested beans/strings carry `[is_default_container]`.
/// Only the default container kind exists on this side, so it is always 1.
#[inline]
fn default_container(buf: &mut Vec<u8>) {
    buf.push(1);
}

pub(crate) fn write_value(
    def: &FieldDef,
    value: &Value,
    buf: &mut Vec<u8>,
) -> Result<(), EncodingError> {
    use FieldType as T;

    match (def.ty, value) {
        // Primitives: fixed width, no null flag.
        (T::Int, Value::Int(v)) => v.encode_to(buf),
        (T::Long, Value::Long(v)) => v.encode_to(buf),
        (T::Float, Value::Float(v)) => v.encode_to(buf),
        (T::Double, Value::Double(v)) => v.encode_to(buf),
        (T::Boolean, Value::Bool(v)) => v.encode_to(buf),
        (T::Byte, Value::Byte(v)) => v.encode_to(buf),
        (T::Char, Value::Char(v)) => write_char(*v, buf),
        (T::Short, Value::Short(v)) => v.encode_to(buf),

        // Everything else: `[not_null]` first.
        (ty, Value::Null) if !ty.is_primitive() => {
            not_null(value, buf);
            Ok(())
        }

        (T::IntBoxed, Value::Int(v)) => write_present(v, buf),
        (T::LongBoxed, Value::Long(v)) => write_present(v, buf),
        (T::FloatBoxed, Value::Float(v)) => write_present(v, buf),
        (T::DoubleBoxed, Value::Double(v)) => write_present(v, buf),
        (T::BooleanBoxed, Value::Bool(v)) => write_present(v, buf),
        (T::ByteBoxed, Value::Byte(v)) => write_present(v, buf),
        (T::ShortBoxed, Value::Short(v)) => write_present(v, buf),
        (T::CharBoxed, Value::Char(v)) => {
            buf.push(1);
            write_char(*v, buf)
        }
        (T::String, Value::Str(s)) => write_present(s, buf),
        (T::Date, Value::Date(ms)) => write_present(ms, buf),
        (T::Uuid, Value::Uuid(id)) => write_present(id, buf),

        (T::ByteArray, Value::ByteArray(v)) => {
            buf.push(1);
            write_len(v.len(), buf)?;
            buf.extend_from_slice(v);
            Ok(())
        }
        (T::IntArray, Value::IntArray(v)) => present_then(buf, |b| write_slice(v, b)),
        (T::LongArray, Value::LongArray(v)) => present_then(buf, |b| write_slice(v, b)),
        (T::FloatArray, Value::FloatArray(v)) => present_then(buf, |b| write_slice(v, b)),
        (T::DoubleArray, Value::DoubleArray(v)) => present_then(buf, |b| write_slice(v, b)),
        (T::ByteArray2D, Value::ByteArray2D(v)) => present_then(buf, |b| {
            write_len(v.len(), b)?;
            for row in v {
                b.push(1);
                write_len(row.len(), b)?;
                b.extend_from_slice(row);
            }
            Ok(())
        }),
        (T::IntArray2D, Value::IntArray2D(v)) => present_then(buf, |b| write_rows(v, b)),
        (T::LongArray2D, Value::LongArray2D(v)) => present_then(buf, |b| write_rows(v, b)),
        (T::FloatArray2D, Value::FloatArray2D(v)) => present_then(buf, |b| write_rows(v, b)),
        (T::DoubleArray2D, Value::DoubleArray2D(v)) => present_then(buf, |b| write_rows(v, b)),

        (T::StringArray, Value::StrArray(v)) => present_then(buf, |b| {
            write_opt_strings(v.iter().map(|s| s.as_deref()), b)
        }),
        (T::StringArray2D, Value::StrArray2D(rows)) => present_then(buf, |b| {
            write_len(rows.len(), b)?;
            for row in rows {
                b.push(1);
                write_opt_strings(row.iter().map(|s| s.as_deref()), b)?;
            }
            Ok(())
        }),
        (T::DateArray, Value::DateArray(v)) => present_then(buf, |b| write_opt_dates(v, b)),
        (T::DateArray2D, Value::DateArray2D(rows)) => present_then(buf, |b| {
            write_len(rows.len(), b)?;
            for row in rows {
                b.push(1);
                write_opt_dates(row, b)?;
            }
            Ok(())
        }),

        (T::Bean, Value::Bean(bean)) => present_then(buf, |b| {
            write_single_header(def.nested.as_ref(), bean.as_ref(), b)?;
            encode_bean(bean.as_ref(), b)
        }),
        (T::BeanArray, Value::BeanArray(items)) | (T::BeanList, Value::BeanList(items)) => {
            present_then(buf, |b| {
                if def.ty == T::BeanList {
                    default_container(b);
                }
                let mut last = None;
                write_bean_elements(
                    def.nested.as_ref(),
                    items.iter().map(|i| i.as_deref()),
                    &mut last,
                    b,
                )
            })
        }
        (T::BeanArray2D, Value::BeanArray2D(rows)) => present_then(buf, |b| {
            write_len(rows.len(), b)?;
            let mut last = None;
            for row in rows {
                b.push(1);
                write_bean_elements(
                    def.nested.as_ref(),
                    row.iter().map(|i| i.as_deref()),
                    &mut last,
                    b,
                )?;
            }
            Ok(())
        }),
        (T::BeanSet, Value::BeanSet(items)) => present_then(buf, |b| {
            default_container(b);
            let mut last = None;
            write_bean_elements(
                def.nested.as_ref(),
                items.iter().map(|i| Some(i.as_ref())),
                &mut last,
                b,
            )
        }),
        (T::StringList, Value::StrList(items)) => present_then(buf, |b| {
            default_container(b);
            write_opt_strings(items.iter().map(|s| s.as_deref()), b)
        }),
        (T::StringSet, Value::StrSet(items)) => present_then(buf, |b| {
            default_container(b);
            write_string_set(items, b)
        }),

        (T::Enum, Value::Enum(name)) => write_present(name, buf),
        (T::EnumOrdinal, Value::Int(ordinal)) => write_present(ordinal, buf),
        (T::EnumOrdinal, Value::Enum(name)) => {
            let ordinal = def
                .enum_variants
                .iter()
                .position(|v| v == name)
                .ok_or_else(|| EncodingError::Custom(format!("unknown enum variant {name:?}")))?;
            write_present(&(ordinal as i32), buf)
        }
        (T::EnumSet, Value::EnumSet(names)) => present_then(buf, |b| write_string_set(names, b)),
        (T::Object, Value::Object(bytes)) => present_then(buf, |b| bytes.as_slice().encode_to(b)),

        _ => Err(mismatch(def, value)),
    }
}

#[inline]
fn write_present<T: Encode>(value: &T, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
    buf.push(1);
    value.encode_to(buf)
}

#[inline]
fn present_then(
    buf: &mut Vec<u8>,
    payload: impl FnOnce(&mut Vec<u8>) -> Result<(), EncodingError>,
) -> Result<(), EncodingError> {
    buf.push(1);
    payload(buf)
}
