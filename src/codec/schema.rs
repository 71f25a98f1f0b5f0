//! The field accessor capability: per-type schemas and the [`Bean`] trait.
//!
//! A record type describes its persistent fields once, in a [`Schema`]
//! built at a well-defined initialization point (typically a `LazyLock`
//! static), and exposes get/set by field index through [`Bean`]. The codec
//! never inspects a record any other way.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use super::{FieldType, Value};

// ------------------------------------------------------------------------------------------------
// Bean traits
// ------------------------------------------------------------------------------------------------

/// Object-safe field accessor for a persistent record or nested record.
pub trait Bean: Any + Send + Sync + fmt::Debug {
    /// Static description of the persistent fields of this type.
    fn schema(&self) -> &'static Schema;

    /// Current value of the field with the given field index.
    ///
    /// Unknown indexes return [`Value::Null`].
    fn field(&self, index: u8) -> Value;

    /// Assigns a decoded value. Values of an unexpected shape are ignored.
    fn set_field(&mut self, index: u8, value: Value);

    fn clone_bean(&self) -> Box<dyn Bean>;

    fn as_any(&self) -> &dyn Any;
}

/// A concrete top-level record type that can be stored in a [`Dump`](crate::Dump).
pub trait BeanType: Bean + Default + Clone {
    /// The schema, available without an instance.
    fn bean_schema() -> &'static Schema;
}

impl Clone for Box<dyn Bean> {
    fn clone(&self) -> Self {
        self.clone_bean()
    }
}

/// Two beans are equal when they have the same type and all declared
/// fields compare equal.
impl PartialEq for dyn Bean {
    fn eq(&self, other: &Self) -> bool {
        let schema = self.schema();
        if schema.type_name() != other.schema().type_name() {
            return false;
        }
        schema
            .fields()
            .iter()
            .all(|def| self.field(def.index) == other.field(def.index))
    }
}

impl dyn Bean {
    pub fn downcast_ref<T: Bean>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

// ------------------------------------------------------------------------------------------------
// Nested type registration
// ------------------------------------------------------------------------------------------------

/// Creates instances of one nested bean type, identified by a stable tag
/// that is written to the stream in place of a type name.
#[derive(Clone, Copy)]
pub struct BeanFactory {
    pub tag: &'static str,
    pub create: fn() -> Box<dyn Bean>,
}

impl BeanFactory {
    /// Factory for `T`, tagged with its schema's type name.
    pub fn of<T: BeanType>() -> Self {
        Self {
            tag: T::bean_schema().type_name(),
            create: || Box::new(T::default()) as Box<dyn Bean>,
        }
    }
}

impl fmt::Debug for BeanFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanFactory").field("tag", &self.tag).finish()
    }
}

/// The closed set of types a nested-bean slot may hold.
#[derive(Debug, Clone)]
pub struct NestedDef {
    /// Type written without a tag.
    pub default: BeanFactory,
    /// Other accepted types, written with their tag.
    pub variants: Vec<BeanFactory>,
}

impl NestedDef {
    pub fn new(default: BeanFactory) -> Self {
        Self {
            default,
            variants: Vec::new(),
        }
    }

    pub fn with_variant(mut self, variant: BeanFactory) -> Self {
        self.variants.push(variant);
        self
    }

    /// Finds the factory registered under `tag`.
    pub fn resolve(&self, tag: &str) -> Option<BeanFactory> {
        if self.default.tag == tag {
            return Some(self.default);
        }
        self.variants.iter().find(|f| f.tag == tag).copied()
    }
}

// ------------------------------------------------------------------------------------------------
// Field and schema definitions
// ------------------------------------------------------------------------------------------------

/// One persistent field: stable index, name, declared type.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub index: u8,
    pub name: &'static str,
    pub ty: FieldType,
    pub nested: Option<NestedDef>,
    /// Variant names in declaration order, used to read legacy
    /// ordinal-encoded enums.
    pub enum_variants: &'static [&'static str],
}

impl FieldDef {
    pub fn new(index: u8, name: &'static str, ty: FieldType) -> Self {
        Self {
            index,
            name,
            ty,
            nested: None,
            enum_variants: &[],
        }
    }

    pub fn with_nested(mut self, nested: NestedDef) -> Self {
        self.nested = Some(nested);
        self
    }

    pub fn with_enum_variants(mut self, variants: &'static [&'static str]) -> Self {
        self.enum_variants = variants;
        self
    }
}

/// Ordered field table of one bean type.
pub struct Schema {
    type_name: &'static str,
    fields: Vec<FieldDef>,
    incompatible_logged: AtomicBool,
}

impl Schema {
    /// Builds a schema. Fields are sorted by index.
    ///
    /// # Panics
    ///
    /// Panics if two fields share an index or a name. Schemas are static
    /// definitions, so this is a programming error caught at first use.
    pub fn new(type_name: &'static str, mut fields: Vec<FieldDef>) -> Self {
        fields.sort_by_key(|f| f.index);
        for pair in fields.windows(2) {
            assert!(
                pair[0].index != pair[1].index,
                "{type_name}: field index {} used twice",
                pair[0].index
            );
        }
        for (i, a) in fields.iter().enumerate() {
            assert!(
                fields[i + 1..].iter().all(|b| b.name != a.name),
                "{type_name}: field name {} used twice",
                a.name
            );
        }
        Self {
            type_name,
            fields,
            incompatible_logged: AtomicBool::new(false),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Fields in ascending field-index order.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, index: u8) -> Option<&FieldDef> {
        self.fields
            .binary_search_by_key(&index, |f| f.index)
            .ok()
            .map(|i| &self.fields[i])
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Logs a schema-incompatibility notice the first time it happens for
    /// this type; later occurrences are silent.
    pub(crate) fn note_incompatible(&self, what: fmt::Arguments<'_>) {
        if !self.incompatible_logged.swap(true, Ordering::Relaxed) {
            warn!(
                type_name = self.type_name,
                "incompatible change detected, value discarded: {what}"
            );
        }
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("type_name", &self.type_name)
            .field("fields", &self.fields)
            .finish()
    }
}
