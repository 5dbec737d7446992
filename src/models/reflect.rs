//! # Build-time Reflection
//!
//! [`Reflect`] is the contract between native Rust types and the schema
//! synthesiser. `shape()` describes a type (scalars, lists, nullability and
//! records with their field metadata); `reflect()` turns a value into a
//! [`Reflected`] tree that the default field resolvers read from.
//!
//! ## Rust Learning Notes:
//!
//! ### Function pointers for recursive types
//! [`FieldShape::shape`] is a `fn() -> Shape` rather than a `Shape`. A record
//! that refers to itself (`struct Node { children: Vec<Node> }`) would otherwise
//! need an infinitely deep value; the pointer defers each level until the
//! synthesiser asks for it.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::Display;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use super::value::{Record, Reflected};
pub use graphkit_derive::Reflect;

/// Native types the schema synthesiser can describe.
pub trait Reflect: Send + Sync + 'static {
    fn shape() -> Shape;

    fn reflect(&self) -> Reflected;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    String,
    Int,
    Float,
    Boolean,
}

impl ScalarKind {
    pub fn graphql_name(self) -> &'static str {
        match self {
            ScalarKind::String => "String",
            ScalarKind::Int => "Int",
            ScalarKind::Float => "Float",
            ScalarKind::Boolean => "Boolean",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Shape {
    Scalar(ScalarKind),
    DateTime,
    /// Anything mapped to the `JSON` scalar (maps, interfaces, dynamic values)
    Opaque,
    List(Box<Shape>),
    Nullable(Box<Shape>),
    Record(RecordShape),
}

impl Shape {
    /// Name used when composing generic type names, e.g. `Page<User>` -> `PageUser`.
    pub fn type_name(&self) -> String {
        match self {
            Shape::Scalar(kind) => kind.graphql_name().to_owned(),
            Shape::DateTime => "DateTime".to_owned(),
            Shape::Opaque => "JSON".to_owned(),
            Shape::List(inner) => format!("{}List", inner.type_name()),
            Shape::Nullable(inner) => inner.type_name(),
            Shape::Record(record) => record
                .name
                .as_deref()
                .unwrap_or("Anonymous")
                .to_owned(),
        }
    }

    /// True when no record appears anywhere in the shape.
    pub fn is_primitive(&self) -> bool {
        match self {
            Shape::Scalar(_) | Shape::DateTime | Shape::Opaque => true,
            Shape::List(inner) | Shape::Nullable(inner) => inner.is_primitive(),
            Shape::Record(_) => false,
        }
    }

    /// The record at the core of the shape, looking through lists and options.
    pub fn record(&self) -> Option<&RecordShape> {
        match self {
            Shape::Record(record) => Some(record),
            Shape::List(inner) | Shape::Nullable(inner) => inner.record(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordShape {
    /// `None` for anonymous records, which are named after their parent field
    pub name: Option<Cow<'static, str>>,
    pub description: Option<&'static str>,
    pub fields: Vec<FieldShape>,
}

impl RecordShape {
    pub fn field(&self, ident: &str) -> Option<&FieldShape> {
        self.fields.iter().find(|f| f.ident == ident)
    }

    /// A response envelope carries `status`, `code` and `data` fields.
    pub fn is_wrapper(&self) -> bool {
        ["status", "code", "data"].iter().all(|wanted| {
            self.fields
                .iter()
                .any(|f| f.ident.eq_ignore_ascii_case(wanted))
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldShape {
    pub ident: &'static str,
    pub serde_name: Option<&'static str>,
    pub graphql_name: Option<&'static str>,
    pub required: bool,
    pub description: Option<&'static str>,
    /// Literal default, parsed as JSON (falling back to a plain string)
    pub default: Option<&'static str>,
    pub embedded: bool,
    pub serde_flatten: bool,
    pub shape: fn() -> Shape,
}

impl FieldShape {
    pub fn new(ident: &'static str, shape: fn() -> Shape) -> Self {
        Self {
            ident,
            serde_name: None,
            graphql_name: None,
            required: false,
            description: None,
            default: None,
            embedded: false,
            serde_flatten: false,
            shape,
        }
    }

    pub fn default_value(&self) -> Option<serde_json::Value> {
        self.default.map(|raw| {
            serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_owned()))
        })
    }

    /// Key serde uses for this field when deserialising arguments.
    pub fn serde_key(&self) -> &'static str {
        self.serde_name.unwrap_or(self.ident)
    }
}

macro_rules! reflect_int {
    ($($ty:ty),*) => {$(
        impl Reflect for $ty {
            fn shape() -> Shape {
                Shape::Scalar(ScalarKind::Int)
            }

            /// Unsigned values beyond `i64::MAX` keep their exact number as JSON.
            fn reflect(&self) -> Reflected {
                i64::try_from(*self)
                    .map(Reflected::Int)
                    .unwrap_or_else(|_| Reflected::Json(serde_json::Value::from(*self)))
            }
        }
    )*};
}

reflect_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

macro_rules! reflect_float {
    ($($ty:ty),*) => {$(
        impl Reflect for $ty {
            fn shape() -> Shape {
                Shape::Scalar(ScalarKind::Float)
            }

            fn reflect(&self) -> Reflected {
                Reflected::Float(f64::from(*self))
            }
        }
    )*};
}

reflect_float!(f32, f64);

impl Reflect for bool {
    fn shape() -> Shape {
        Shape::Scalar(ScalarKind::Boolean)
    }

    fn reflect(&self) -> Reflected {
        Reflected::Bool(*self)
    }
}

impl Reflect for String {
    fn shape() -> Shape {
        Shape::Scalar(ScalarKind::String)
    }

    fn reflect(&self) -> Reflected {
        Reflected::String(self.clone())
    }
}

impl Reflect for &'static str {
    fn shape() -> Shape {
        Shape::Scalar(ScalarKind::String)
    }

    fn reflect(&self) -> Reflected {
        Reflected::String((*self).to_owned())
    }
}

impl Reflect for char {
    fn shape() -> Shape {
        Shape::Scalar(ScalarKind::String)
    }

    fn reflect(&self) -> Reflected {
        Reflected::String(self.to_string())
    }
}

impl Reflect for Uuid {
    fn shape() -> Shape {
        Shape::Scalar(ScalarKind::String)
    }

    fn reflect(&self) -> Reflected {
        Reflected::String(self.to_string())
    }
}

impl Reflect for DateTime<Utc> {
    fn shape() -> Shape {
        Shape::DateTime
    }

    fn reflect(&self) -> Reflected {
        Reflected::DateTime(*self)
    }
}

impl Reflect for serde_json::Value {
    fn shape() -> Shape {
        Shape::Opaque
    }

    fn reflect(&self) -> Reflected {
        Reflected::Json(self.clone())
    }
}

impl Reflect for Reflected {
    fn shape() -> Shape {
        Shape::Opaque
    }

    fn reflect(&self) -> Reflected {
        self.clone()
    }
}

impl<T: Reflect> Reflect for Option<T> {
    fn shape() -> Shape {
        Shape::Nullable(Box::new(T::shape()))
    }

    fn reflect(&self) -> Reflected {
        match self {
            Some(value) => value.reflect(),
            None => Reflected::Null,
        }
    }
}

impl<T: Reflect> Reflect for Box<T> {
    fn shape() -> Shape {
        T::shape()
    }

    fn reflect(&self) -> Reflected {
        (**self).reflect()
    }
}

impl<T: Reflect> Reflect for Arc<T> {
    fn shape() -> Shape {
        T::shape()
    }

    fn reflect(&self) -> Reflected {
        (**self).reflect()
    }
}

macro_rules! reflect_sequence {
    ($($seq:ident),*) => {$(
        impl<T: Reflect> Reflect for $seq<T> {
            fn shape() -> Shape {
                Shape::List(Box::new(T::shape()))
            }

            fn reflect(&self) -> Reflected {
                Reflected::List(self.iter().map(Reflect::reflect).collect())
            }
        }
    )*};
}

reflect_sequence!(Vec, VecDeque, BTreeSet);

impl<T: Reflect, S: Send + Sync + 'static> Reflect for HashSet<T, S> {
    fn shape() -> Shape {
        Shape::List(Box::new(T::shape()))
    }

    fn reflect(&self) -> Reflected {
        Reflected::List(self.iter().map(Reflect::reflect).collect())
    }
}

impl<T: Reflect, const N: usize> Reflect for [T; N] {
    fn shape() -> Shape {
        Shape::List(Box::new(T::shape()))
    }

    fn reflect(&self) -> Reflected {
        Reflected::List(self.iter().map(Reflect::reflect).collect())
    }
}

fn map_to_json<'a, K, V, I>(entries: I) -> Reflected
where
    K: Display + 'a,
    V: Reflect,
    I: Iterator<Item = (&'a K, &'a V)>,
{
    Reflected::Json(serde_json::Value::Object(
        entries
            .map(|(k, v)| (k.to_string(), v.reflect().into_json()))
            .collect(),
    ))
}

impl<K, V, S> Reflect for HashMap<K, V, S>
where
    K: Display + Send + Sync + 'static,
    V: Reflect,
    S: Send + Sync + 'static,
{
    fn shape() -> Shape {
        Shape::Opaque
    }

    fn reflect(&self) -> Reflected {
        map_to_json(self.iter())
    }
}

impl<K, V> Reflect for BTreeMap<K, V>
where
    K: Display + Send + Sync + 'static,
    V: Reflect,
{
    fn shape() -> Shape {
        Shape::Opaque
    }

    fn reflect(&self) -> Reflected {
        map_to_json(self.iter())
    }
}
