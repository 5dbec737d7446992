use std::borrow::Cow;
use std::sync::Arc;

use async_graphql::{Name, Value as ConstValue};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;

use super::datetime::format_datetime;

/// A value produced by [`Reflect::reflect`](super::reflect::Reflect::reflect).
///
/// Records are shared behind an `Arc` because the executor hands the same
/// parent to every child field resolver.
#[derive(Debug, Clone, PartialEq)]
pub enum Reflected {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(DateTime<Utc>),
    Json(Value),
    List(Vec<Reflected>),
    Record(Arc<Record>),
}

/// Field values of a record, keyed by declared field identifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: IndexMap<Cow<'static, str>, Reflected>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, ident: impl Into<Cow<'static, str>>, value: Reflected) {
        self.fields.insert(ident.into(), value);
    }

    /// Hoists the fields of an embedded record; fields already present win.
    pub fn absorb(&mut self, embedded: Reflected) {
        if let Reflected::Record(inner) = embedded {
            for (ident, value) in inner.fields.iter() {
                self.fields
                    .entry(ident.clone())
                    .or_insert_with(|| value.clone());
            }
        }
    }

    pub fn get(&self, ident: &str) -> Option<&Reflected> {
        self.fields.get(ident)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Reflected)> {
        self.fields.iter().map(|(k, v)| (k.as_ref(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Reflected {
    pub fn from_record(record: Record) -> Self {
        Reflected::Record(Arc::new(record))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Reflected::Null | Reflected::Json(Value::Null))
    }

    /// Zero value in the Go sense: null, false, 0, empty string or list.
    pub fn is_zero(&self) -> bool {
        match self {
            Reflected::Null => true,
            Reflected::Bool(b) => !b,
            Reflected::Int(i) => *i == 0,
            Reflected::Float(f) => *f == 0.0,
            Reflected::String(s) => s.is_empty(),
            Reflected::DateTime(_) => false,
            Reflected::Json(v) => v.is_null(),
            Reflected::List(items) => items.is_empty(),
            Reflected::Record(record) => record.iter().all(|(_, v)| v.is_zero()),
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Reflected::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Reflected::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_json(self) -> Value {
        match self {
            Reflected::Null => Value::Null,
            Reflected::Bool(b) => Value::Bool(b),
            Reflected::Int(i) => Value::from(i),
            Reflected::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Reflected::String(s) => Value::String(s),
            Reflected::DateTime(dt) => Value::String(format_datetime(&dt)),
            Reflected::Json(v) => v,
            Reflected::List(items) => Value::Array(items.into_iter().map(Self::into_json).collect()),
            Reflected::Record(record) => Value::Object(
                record
                    .iter()
                    .map(|(k, v)| (k.to_owned(), v.clone().into_json()))
                    .collect(),
            ),
        }
    }

    pub fn into_const_value(self) -> ConstValue {
        match self {
            Reflected::Null => ConstValue::Null,
            Reflected::Bool(b) => ConstValue::Boolean(b),
            Reflected::Int(i) => ConstValue::Number(i.into()),
            Reflected::Float(f) => serde_json::Number::from_f64(f)
                .map(ConstValue::Number)
                .unwrap_or(ConstValue::Null),
            Reflected::String(s) => ConstValue::String(s),
            Reflected::DateTime(dt) => ConstValue::String(format_datetime(&dt)),
            Reflected::Json(v) => ConstValue::from_json(v).unwrap_or(ConstValue::Null),
            Reflected::List(items) => {
                ConstValue::List(items.into_iter().map(Self::into_const_value).collect())
            }
            Reflected::Record(record) => ConstValue::Object(
                record
                    .iter()
                    .map(|(k, v)| (Name::new(k), v.clone().into_const_value()))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for Reflected {
    fn from(value: Value) -> Self {
        Reflected::Json(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(pairs: &[(&'static str, Reflected)]) -> Record {
        let mut record = Record::new();
        for (k, v) in pairs {
            record.insert(*k, v.clone());
        }
        record
    }

    #[test]
    fn absorb_keeps_outer_fields() {
        let mut outer = record(&[("name", Reflected::String("outer".into()))]);
        let inner = record(&[
            ("name", Reflected::String("inner".into())),
            ("age", Reflected::Int(3)),
        ]);
        outer.absorb(Reflected::from_record(inner));

        assert_eq!(outer.get("name"), Some(&Reflected::String("outer".into())));
        assert_eq!(outer.get("age"), Some(&Reflected::Int(3)));
        assert_eq!(outer.len(), 2);
    }

    #[test]
    fn zero_values() {
        assert!(Reflected::String(String::new()).is_zero());
        assert!(Reflected::Int(0).is_zero());
        assert!(Reflected::List(vec![]).is_zero());
        assert!(!Reflected::String("x".into()).is_zero());
        assert!(!Reflected::Bool(true).is_zero());
    }

    #[test]
    fn record_converts_to_json_object() {
        let value = Reflected::from_record(record(&[
            ("id", Reflected::String("u1".into())),
            ("tags", Reflected::List(vec![Reflected::String("a".into())])),
        ]));
        assert_eq!(value.into_json(), json!({"id": "u1", "tags": ["a"]}));
    }
}
