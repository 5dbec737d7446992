//! Typed argument decoding.
//!
//! GraphQL argument names are derived from the record shape (see
//! [`field_name`](super::synth::field_name)); decoding walks the same shape to
//! put every value back under the key serde expects before handing the map to
//! `serde_json::from_value`.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::synth::field_name;
use crate::models::{parse_datetime, RecordShape, Reflect, Shape};
use crate::{GraphkitError, Result};

/// Decodes GraphQL arguments into `A`.
///
/// A record `A` maps one argument per field; any other `A` is read from the
/// single argument named `scalar_arg`.
pub fn decode_args<A>(args: &Map<String, Value>, scalar_arg: &str) -> Result<A>
where
    A: Reflect + DeserializeOwned,
{
    let shape = A::shape();
    let value = match unwrap_nullable(&shape) {
        Shape::Record(record) => Value::Object(record_to_serde(record, args)),
        other => to_serde(other, args.get(scalar_arg).cloned().unwrap_or(Value::Null)),
    };

    serde_json::from_value(value)
        .map_err(|err| GraphkitError::InvalidInput(format!("invalid arguments: {err}")))
}

fn unwrap_nullable(shape: &Shape) -> &Shape {
    match shape {
        Shape::Nullable(inner) => unwrap_nullable(inner),
        other => other,
    }
}

fn record_to_serde(record: &RecordShape, input: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();

    for field in &record.fields {
        let shape = (field.shape)();

        if field.embedded {
            if let Some(inner) = shape.record() {
                let nested = record_to_serde(inner, input);
                if field.serde_flatten {
                    for (key, value) in nested {
                        out.entry(key).or_insert(value);
                    }
                } else {
                    out.insert(field.serde_key().to_owned(), Value::Object(nested));
                }
                continue;
            }
        }

        let Some(name) = field_name(field) else {
            continue;
        };
        let value = match input.get(&name) {
            Some(value) => value.clone(),
            None => match field.default_value() {
                Some(default) => default,
                None => continue,
            },
        };
        out.insert(field.serde_key().to_owned(), to_serde(&shape, value));
    }

    out
}

fn to_serde(shape: &Shape, value: Value) -> Value {
    match (shape, value) {
        (_, Value::Null) => Value::Null,
        (Shape::Nullable(inner), value) => to_serde(inner, value),
        (Shape::List(inner), Value::Array(items)) => {
            Value::Array(items.into_iter().map(|item| to_serde(inner, item)).collect())
        }
        (Shape::DateTime, Value::String(raw)) => match parse_datetime(&raw) {
            Ok(parsed) => Value::String(parsed.to_rfc3339()),
            Err(_) => Value::String(raw),
        },
        (Shape::Record(record), Value::Object(map)) => Value::Object(record_to_serde(record, &map)),
        (_, value) => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Reflect;
    use chrono::{DateTime, TimeZone, Utc};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, Reflect)]
    struct Paging {
        #[graphql(default = "20")]
        limit: i32,
        offset: Option<i32>,
    }

    #[derive(Debug, Deserialize, Reflect)]
    struct Search {
        #[serde(rename = "q")]
        query: String,
        created_after: Option<DateTime<Utc>>,
        #[serde(flatten)]
        paging: Paging,
    }

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn maps_graphql_names_onto_serde_keys() {
        let decoded: Search = decode_args(
            &args(json!({"q": "rust", "createdAfter": "2024-01-02T03:04", "offset": 5})),
            "input",
        )
        .unwrap();

        assert_eq!(decoded.query, "rust");
        assert_eq!(
            decoded.created_after,
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 0).unwrap())
        );
        assert_eq!(decoded.paging.offset, Some(5));
        assert_eq!(decoded.paging.limit, 20);
    }

    #[test]
    fn primitives_read_the_scalar_argument() {
        let decoded: String = decode_args(&args(json!({"input": "hi"})), "input").unwrap();
        assert_eq!(decoded, "hi");

        let renamed: i32 = decode_args(&args(json!({"id": 4})), "id").unwrap();
        assert_eq!(renamed, 4);
    }

    #[test]
    fn reports_missing_required_arguments() {
        let err = decode_args::<Search>(&args(json!({})), "input").unwrap_err();
        assert!(matches!(err, GraphkitError::InvalidInput(_)));
    }
}
