//! Bytes → bean, with forward/backward compatibility.
//!
//! Encoded fields are walked in ascending field-index order alongside the
//! schema's (also ascending) field table, so matching is one linear merge.
//! Fields the schema no longer declares, and fields whose type tag no
//! longer matches, are decoded generically from their tag and dropped.

use std::collections::BTreeSet;

use crate::encoding::{Decode, EncodingError, MAX_BYTE_LEN, MAX_VEC_ELEMENTS, SliceReader};

use super::{Bean, BeanType, FieldDef, FieldType, NestedDef, Schema, Value};

/// Decodes a fresh `B` from the start of `buf`.
///
/// Returns the bean and the number of bytes consumed.
pub fn decode_record<B: BeanType>(buf: &[u8]) -> Result<(B, usize), EncodingError> {
    let mut bean = B::default();
    let consumed = decode_into(&mut bean, buf)?;
    Ok((bean, consumed))
}

/// Decodes the fields encoded at the start of `buf` into `bean`.
///
/// Fields missing from the encoding keep their current value.
pub fn decode_into(bean: &mut dyn Bean, buf: &[u8]) -> Result<usize, EncodingError> {
    let mut reader = SliceReader::new(buf);
    read_body(bean, &mut reader)?;
    Ok(reader.offset())
}

/// Returns the encoded length of the record at the start of `buf`
/// without materialising it.
pub fn skip_record(buf: &[u8]) -> Result<usize, EncodingError> {
    let mut reader = SliceReader::new(buf);
    skip_body(&mut reader)?;
    Ok(reader.offset())
}

fn read_body(bean: &mut dyn Bean, r: &mut SliceReader<'_>) -> Result<(), EncodingError> {
    let schema: &'static Schema = bean.schema();
    let fields = schema.fields();
    let count: u8 = r.read()?;
    let mut cursor = 0usize;

    for _ in 0..count {
        let index: u8 = r.read()?;
        let ty = read_type(r)?;

        while cursor < fields.len() && fields[cursor].index < index {
            cursor += 1;
        }

        match fields.get(cursor) {
            Some(def) if def.index == index && def.ty == ty => {
                let value = read_value(ty, Some(def), Some(schema), r)?;
                bean.set_field(index, value);
            }
            Some(def) if def.index == index && def.ty == FieldType::Enum && ty == FieldType::EnumOrdinal => {
                let value = match read_value(ty, Some(def), Some(schema), r)? {
                    Value::Int(ordinal) => match def.enum_variants.get(ordinal as usize) {
                        Some(name) => Value::Enum((*name).to_string()),
                        None => {
                            schema.note_incompatible(format_args!(
                                "{}: enum ordinal {ordinal} has no declared variant",
                                def.name
                            ));
                            continue;
                        }
                    },
                    other => other,
                };
                bean.set_field(index, value);
            }
            Some(def) if def.index == index => {
                skip_value(ty, r)?;
                schema.note_incompatible(format_args!(
                    "{}: stored as {ty}, declared as {}",
                    def.name, def.ty
                ));
            }
            _ => skip_value(ty, r)?,
        }
    }
    Ok(())
}

fn skip_body(r: &mut SliceReader<'_>) -> Result<(), EncodingError> {
    let count: u8 = r.read()?;
    for _ in 0..count {
        let _index: u8 = r.read()?;
        let ty = read_type(r)?;
        skip_value(ty, r)?;
    }
    Ok(())
}

#[inline]
fn read_type(r: &mut SliceReader<'_>) -> Result<FieldType, EncodingError> {
    let tag: u8 = r.read()?;
    FieldType::from_tag(tag).ok_or(EncodingError::InvalidTag {
        tag: tag as u32,
        type_name: "FieldType",
    })
}

#[inline]
fn skip_value(ty: FieldType, r: &mut SliceReader<'_>) -> Result<(), EncodingError> {
    read_value(ty, None, None, r).map(|_| ())
}

#[inline]
fn count(r: &mut SliceReader<'_>) -> Result<usize, EncodingError> {
    r.read_len(MAX_VEC_ELEMENTS, "element count")
}

fn read_char(r: &mut SliceReader<'_>) -> Result<char, EncodingError> {
    let unit: u16 = r.read()?;
    Ok(char::from_u32(unit as u32).unwrap_or(char::REPLACEMENT_CHARACTER))
}

fn read_items<T: Decode>(r: &mut SliceReader<'_>) -> Result<Vec<T>, EncodingError> {
    let n = count(r)?;
    let mut out = Vec::with_capacity(n.min(4096));
    for _ in 0..n {
        out.push(r.read::<T>()?);
    }
    Ok(out)
}

fn read_byte_items(r: &mut SliceReader<'_>) -> Result<Vec<u8>, EncodingError> {
    let n = r.read_len(MAX_BYTE_LEN, "byte array")?;
    Ok(r.take(n)?.to_vec())
}

/// Reads `[u32 rows]` then per row `[not_null][row]`; null rows become empty.
fn read_rows<T>(
    r: &mut SliceReader<'_>,
    mut row: impl FnMut(&mut SliceReader<'_>) -> Result<Vec<T>, EncodingError>,
) -> Result<Vec<Vec<T>>, EncodingError> {
    let n = count(r)?;
    let mut out = Vec::with_capacity(n.min(4096));
    for _ in 0..n {
        let present: bool = r.read()?;
        out.push(if present { row(r)? } else { Vec::new() });
    }
    Ok(out)
}

fn read_opt_strings(r: &mut SliceReader<'_>) -> Result<Vec<Option<String>>, EncodingError> {
    read_items::<Option<String>>(r)
}

fn read_opt_dates(r: &mut SliceReader<'_>) -> Result<Vec<Option<i64>>, EncodingError> {
    read_items::<Option<i64>>(r)
}

/// `[is_default_container][name if !default]`. The name is informational
/// only on this side and is discarded.
fn read_container_header(r: &mut SliceReader<'_>) -> Result<(), EncodingError> {
    let is_default: bool = r.read()?;
    if !is_default {
        let _container: String = r.read()?;
    }
    Ok(())
}

/// Instantiates and fills a nested bean of the given tag, or skips the
/// body generically when no factory is known for it.
fn read_nested(
    nested: Option<&NestedDef>,
    tag: Option<&str>,
    owner: Option<&'static Schema>,
    r: &mut SliceReader<'_>,
) -> Result<Option<Box<dyn Bean>>, EncodingError> {
    let factory = match (nested, tag) {
        (Some(n), None) => Some(n.default),
        (Some(n), Some(t)) => n.resolve(t),
        (None, _) => None,
    };
    match factory {
        Some(f) => {
            let mut bean = (f.create)();
            read_body(bean.as_mut(), r)?;
            Ok(Some(bean))
        }
        None => {
            if let (Some(schema), Some(t)) = (owner, tag) {
                schema.note_incompatible(format_args!("unknown nested type tag {t:?}"));
            }
            skip_body(r)?;
            Ok(None)
        }
    }
}

/// Reads a sequence of optional nested beans written by the writer's
/// element encoding, honouring the "same as last" tag shortcut.
fn read_bean_elements(
    nested: Option<&NestedDef>,
    owner: Option<&'static Schema>,
    last: &mut Option<String>,
    r: &mut SliceReader<'_>,
) -> Result<Vec<Option<Box<dyn Bean>>>, EncodingError> {
    let n = count(r)?;
    let mut out = Vec::with_capacity(n.min(4096));
    for _ in 0..n {
        let present: bool = r.read()?;
        if !present {
            out.push(None);
            continue;
        }
        let is_default: bool = r.read()?;
        let tag = if is_default {
            None
        } else {
            let same: bool = r.read()?;
            if !same {
                *last = Some(r.read::<String>()?);
            }
            match last.as_deref() {
                Some(t) => Some(t.to_string()),
                None => {
                    return Err(EncodingError::Custom(
                        "nested element refers to a previous type but none was written".into(),
                    ));
                }
            }
        };
        out.push(read_nested(nested, tag.as_deref(), owner, r)?);
    }
    Ok(out)
}

/// Decodes one payload of type `ty`.
///
/// `def` is `None` when the value is being skipped; nested beans are then
/// walked generically and [`Value::Null`] is returned for them.
fn read_value(
    ty: FieldType,
    def: Option<&FieldDef>,
    owner: Option<&'static Schema>,
    r: &mut SliceReader<'_>,
) -> Result<Value, EncodingError> {
    use FieldType as T;

    match ty {
        T::Int => return Ok(Value::Int(r.read()?)),
        T::Long => return Ok(Value::Long(r.read()?)),
        T::Float => return Ok(Value::Float(r.read()?)),
        T::Double => return Ok(Value::Double(r.read()?)),
        T::Boolean => return Ok(Value::Bool(r.read()?)),
        T::Byte => return Ok(Value::Byte(r.read()?)),
        T::Char => return Ok(Value::Char(read_char(r)?)),
        T::Short => return Ok(Value::Short(r.read()?)),
        _ => {}
    }

    let present: bool = r.read()?;
    if !present {
        return Ok(Value::Null);
    }

    let nested = def.and_then(|d| d.nested.as_ref());

    let value = match ty {
        T::IntBoxed | T::EnumOrdinal => Value::Int(r.read()?),
        T::LongBoxed => Value::Long(r.read()?),
        T::FloatBoxed => Value::Float(r.read()?),
        T::DoubleBoxed => Value::Double(r.read()?),
        T::BooleanBoxed => Value::Bool(r.read()?),
        T::ByteBoxed => Value::Byte(r.read()?),
        T::CharBoxed => Value::Char(read_char(r)?),
        T::ShortBoxed => Value::Short(r.read()?),
        T::String => Value::Str(r.read()?),
        T::Date => Value::Date(r.read()?),
        T::Uuid => Value::Uuid(r.read()?),

        T::ByteArray => Value::ByteArray(read_byte_items(r)?),
        T::IntArray => Value::IntArray(read_items(r)?),
        T::LongArray => Value::LongArray(read_items(r)?),
        T::FloatArray => Value::FloatArray(read_items(r)?),
        T::DoubleArray => Value::DoubleArray(read_items(r)?),
        T::ByteArray2D => Value::ByteArray2D(read_rows(r, read_byte_items)?),
        T::IntArray2D => Value::IntArray2D(read_rows(r, read_items)?),
        T::LongArray2D => Value::LongArray2D(read_rows(r, read_items)?),
        T::FloatArray2D => Value::FloatArray2D(read_rows(r, read_items)?),
        T::DoubleArray2D => Value::DoubleArray2D(read_rows(r, read_items)?),
        T::StringArray => Value::StrArray(read_opt_strings(r)?),
        T::StringArray2D => Value::StrArray2D(read_rows(r, read_opt_strings)?),
        T::DateArray => Value::DateArray(read_opt_dates(r)?),
        T::DateArray2D => Value::DateArray2D(read_rows(r, read_opt_dates)?),

        T::Bean => {
            let is_default: bool = r.read()?;
            let tag = if is_default {
                None
            } else {
                Some(r.read::<String>()?)
            };
            match read_nested(nested, tag.as_deref(), owner, r)? {
                Some(bean) if def.is_some() => Value::Bean(bean),
                _ => Value::Null,
            }
        }
        T::BeanArray => {
            let mut last = None;
            Value::BeanArray(read_bean_elements(nested, owner, &mut last, r)?)
        }
        T::BeanList => {
            read_container_header(r)?;
            let mut last = None;
            Value::BeanList(read_bean_elements(nested, owner, &mut last, r)?)
        }
        T::BeanArray2D => {
            let mut last = None;
            Value::BeanArray2D(read_rows(r, |r| {
                read_bean_elements(nested, owner, &mut last, r)
            })?)
        }
        T::BeanSet => {
            read_container_header(r)?;
            let mut last = None;
            let items = read_bean_elements(nested, owner, &mut last, r)?;
            Value::BeanSet(items.into_iter().flatten().collect())
        }
        T::StringList => {
            read_container_header(r)?;
            Value::StrList(read_opt_strings(r)?)
        }
        T::StringSet => {
            read_container_header(r)?;
            Value::StrSet(read_opt_strings(r)?.into_iter().flatten().collect())
        }
        T::Enum => Value::Enum(r.read()?),
        T::EnumSet => {
            let names: BTreeSet<String> = read_opt_strings(r)?.into_iter().flatten().collect();
            Value::EnumSet(names)
        }
        T::Object => Value::Object(read_byte_items(r)?),

        T::Int | T::Long | T::Float | T::Double | T::Boolean | T::Byte | T::Char | T::Short => {
            unreachable!("primitives are handled above")
        }
    };

    if def.is_none() {
        return Ok(Value::Null);
    }
    Ok(value)
}
