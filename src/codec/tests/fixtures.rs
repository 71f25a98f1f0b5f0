//! Hand-written bean types shared by the unit tests of every module.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::codec::{Bean, BeanFactory, BeanType, FieldDef, FieldType, NestedDef, Schema, Value};

// ------------------------------------------------------------------------------------------------
// Person — the record most store and index tests use
// ------------------------------------------------------------------------------------------------

static PERSON_SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new(
        "Person",
        vec![
            FieldDef::new(0, "id", FieldType::Int),
            FieldDef::new(1, "name", FieldType::String),
            FieldDef::new(2, "category", FieldType::String),
            FieldDef::new(3, "score", FieldType::Long),
        ],
    )
});

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Person {
    pub id: i32,
    pub name: Option<String>,
    pub category: Option<String>,
    pub score: i64,
}

impl Person {
    pub fn new(id: i32, name: &str, category: &str) -> Self {
        Self {
            id,
            name: Some(name.to_string()),
            category: Some(category.to_string()),
            score: id as i64 * 10,
        }
    }
}

impl Bean for Person {
    fn schema(&self) -> &'static Schema {
        &PERSON_SCHEMA
    }

    fn field(&self, index: u8) -> Value {
        match index {
            0 => Value::Int(self.id),
            1 => self.name.clone().into(),
            2 => self.category.clone().into(),
            3 => Value::Long(self.score),
            _ => Value::Null,
        }
    }

    fn set_field(&mut self, index: u8, value: Value) {
        match (index, value) {
            (0, Value::Int(v)) => self.id = v,
            (1, v) => self.name = v.into_string(),
            (2, v) => self.category = v.into_string(),
            (3, Value::Long(v)) => self.score = v,
            _ => {}
        }
    }

    fn clone_bean(&self) -> Box<dyn Bean> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl BeanType for Person {
    fn bean_schema() -> &'static Schema {
        &PERSON_SCHEMA
    }
}

// ------------------------------------------------------------------------------------------------
// PersonV2 — a later revision of Person
//
// Field 1 (`name`) removed, field 3 (`score`) retyped to String,
// field 4 (`email`) added.
// ------------------------------------------------------------------------------------------------

static PERSON_V2_SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new(
        "Person",
        vec![
            FieldDef::new(0, "id", FieldType::Int),
            FieldDef::new(2, "category", FieldType::String),
            FieldDef::new(3, "score", FieldType::String),
            FieldDef::new(4, "email", FieldType::String),
        ],
    )
});

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersonV2 {
    pub id: i32,
    pub category: Option<String>,
    pub score: Option<String>,
    pub email: Option<String>,
}

impl Bean for PersonV2 {
    fn schema(&self) -> &'static Schema {
        &PERSON_V2_SCHEMA
    }

    fn field(&self, index: u8) -> Value {
        match index {
            0 => Value::Int(self.id),
            2 => self.category.clone().into(),
            3 => self.score.clone().into(),
            4 => self.email.clone().into(),
            _ => Value::Null,
        }
    }

    fn set_field(&mut self, index: u8, value: Value) {
        match (index, value) {
            (0, Value::Int(v)) => self.id = v,
            (2, v) => self.category = v.into_string(),
            (3, v) => self.score = v.into_string(),
            (4, v) => self.email = v.into_string(),
            _ => {}
        }
    }

    fn clone_bean(&self) -> Box<dyn Bean> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl BeanType for PersonV2 {
    fn bean_schema() -> &'static Schema {
        &PERSON_V2_SCHEMA
    }
}

// ------------------------------------------------------------------------------------------------
// Point / Point3 — nested record variants
// ------------------------------------------------------------------------------------------------

static POINT_SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new(
        "Point",
        vec![
            FieldDef::new(0, "x", FieldType::Int),
            FieldDef::new(1, "y", FieldType::Int),
        ],
    )
});

static POINT3_SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new(
        "Point3",
        vec![
            FieldDef::new(0, "x", FieldType::Int),
            FieldDef::new(1, "y", FieldType::Int),
            FieldDef::new(2, "z", FieldType::Int),
        ],
    )
});

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Point3 {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Bean for Point {
    fn schema(&self) -> &'static Schema {
        &POINT_SCHEMA
    }

    fn field(&self, index: u8) -> Value {
        match index {
            0 => Value::Int(self.x),
            1 => Value::Int(self.y),
            _ => Value::Null,
        }
    }

    fn set_field(&mut self, index: u8, value: Value) {
        match (index, value) {
            (0, Value::Int(v)) => self.x = v,
            (1, Value::Int(v)) => self.y = v,
            _ => {}
        }
    }

    fn clone_bean(&self) -> Box<dyn Bean> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl BeanType for Point {
    fn bean_schema() -> &'static Schema {
        &POINT_SCHEMA
    }
}

impl Bean for Point3 {
    fn schema(&self) -> &'static Schema {
        &POINT3_SCHEMA
    }

    fn field(&self, index: u8) -> Value {
        match index {
            0 => Value::Int(self.x),
            1 => Value::Int(self.y),
            2 => Value::Int(self.z),
            _ => Value::Null,
        }
    }

    fn set_field(&mut self, index: u8, value: Value) {
        match (index, value) {
            (0, Value::Int(v)) => self.x = v,
            (1, Value::Int(v)) => self.y = v,
            (2, Value::Int(v)) => self.z = v,
            _ => {}
        }
    }

    fn clone_bean(&self) -> Box<dyn Bean> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl BeanType for Point3 {
    fn bean_schema() -> &'static Schema {
        &POINT3_SCHEMA
    }
}

pub fn point_slot() -> NestedDef {
    NestedDef::new(BeanFactory::of::<Point>()).with_variant(BeanFactory::of::<Point3>())
}

pub fn point(x: i32, y: i32) -> Box<dyn Bean> {
    Box::new(Point { x, y })
}

pub fn point3(x: i32, y: i32, z: i32) -> Box<dyn Bean> {
    Box::new(Point3 { x, y, z })
}

// ------------------------------------------------------------------------------------------------
// Shape — one field of every type, values held dynamically
// ------------------------------------------------------------------------------------------------

pub const COLORS: &[&str] = &["Red", "Green", "Blue"];

static SHAPE_SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
    let ty = |i: u8| FieldType::from_tag(i).unwrap_or(FieldType::Object);
    let mut fields = Vec::new();
    for tag in 0..=43u8 {
        let field_type = ty(tag);
        // Field index mirrors the tag, names are derived from it.
        let name: &'static str = Box::leak(format!("f{tag}").into_boxed_str());
        let mut def = FieldDef::new(tag, name, field_type);
        if field_type.is_bean() {
            def = def.with_nested(point_slot());
        }
        if matches!(field_type, FieldType::Enum | FieldType::EnumOrdinal) {
            def = def.with_enum_variants(COLORS);
        }
        fields.push(def);
    }
    Schema::new("Shape", fields)
});

/// A bean whose fields are stored as a map, so tests can set any value
/// into any slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Shape {
    pub values: BTreeMap<u8, Value>,
}

impl Shape {
    pub fn with(mut self, index: u8, value: Value) -> Self {
        self.values.insert(index, value);
        self
    }
}

fn primitive_default(ty: FieldType) -> Value {
    match ty {
        FieldType::Int => Value::Int(0),
        FieldType::Long => Value::Long(0),
        FieldType::Float => Value::Float(0.0),
        FieldType::Double => Value::Double(0.0),
        FieldType::Boolean => Value::Bool(false),
        FieldType::Byte => Value::Byte(0),
        FieldType::Char => Value::Char('\0'),
        FieldType::Short => Value::Short(0),
        _ => Value::Null,
    }
}

impl Bean for Shape {
    fn schema(&self) -> &'static Schema {
        &SHAPE_SCHEMA
    }

    fn field(&self, index: u8) -> Value {
        match self.values.get(&index) {
            Some(v) => v.clone(),
            None => SHAPE_SCHEMA
                .field(index)
                .map(|d| primitive_default(d.ty))
                .unwrap_or(Value::Null),
        }
    }

    fn set_field(&mut self, index: u8, value: Value) {
        self.values.insert(index, value);
    }

    fn clone_bean(&self) -> Box<dyn Bean> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl BeanType for Shape {
    fn bean_schema() -> &'static Schema {
        &SHAPE_SCHEMA
    }
}
