//! # Schema Synthesiser
//!
//! Maps [`Shape`]s onto GraphQL types:
//!
//! | Shape | Output | Input |
//! |-------|--------|-------|
//! | `String`/`char`/`Uuid` | `String!` | `String!` |
//! | integers | `Int!` | `Int!` |
//! | floats | `Float!` | `Float!` |
//! | `bool` | `Boolean!` | `Boolean!` |
//! | `DateTime<Utc>` | `DateTime!` | `DateTime!` |
//! | maps, `serde_json::Value` | `JSON!` | `JSON!` |
//! | `Vec<T>` | `[T]!` | `[T]!` |
//! | `Option<T>` | `T` | `T` |
//! | record `User` | `User!` (object) | `UserInput!` (input object) |
//!
//! Field names come from the serde name, then `#[graphql(name)]`, then the
//! identifier in lowerCamelCase. `#[graphql(required)]` forces non-null, and
//! an input field with a default becomes nullable so clients may omit it.
//! Embedded fields are hoisted into the parent; the parent's own fields win.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use tracing::debug;

use super::registry::{ArgumentMap, FieldDef, FieldMap, InputType, InputValueDef, ObjectType, TypeRegistry};
use super::resolver::Resolver;
use super::types::{TypeExpr, BOOLEAN, DATETIME, INT, JSON, STRING};
use crate::models::{FieldShape, RecordShape, Reflect, Shape};
use crate::{GraphkitError, Result};

pub const PAGE_INFO: &str = "PageInfo";

/// Wrapper fields that always map to scalars.
const WRAPPER_SCALARS: [&str; 3] = ["status", "code", "message"];

#[derive(Clone)]
pub struct Synthesizer {
    registry: Arc<TypeRegistry>,
    detect_wrappers: bool,
}

impl Synthesizer {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            detect_wrappers: true,
        }
    }

    pub fn global() -> Self {
        Self::new(TypeRegistry::global())
    }

    pub fn detect_wrappers(mut self, enabled: bool) -> Self {
        self.detect_wrappers = enabled;
        self
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Output type of `T`; `name` overrides the record's declared name.
    pub fn output_of<T: Reflect>(&self, name: Option<&str>) -> Result<TypeExpr> {
        self.output_type(&T::shape(), name)
    }

    pub fn output_type(&self, shape: &Shape, name: Option<&str>) -> Result<TypeExpr> {
        match shape {
            Shape::Nullable(inner) => Ok(self.output_type(inner, name)?.nullable()),
            Shape::List(inner) => Ok(self.output_type(inner, name)?.list().non_null()),
            Shape::Record(record) => {
                let wrapper = self.detect_wrappers && record.is_wrapper();
                let type_name = match (name, record.name.as_deref()) {
                    (Some(name), _) => name.to_owned(),
                    (None, Some(declared)) => declared.to_owned(),
                    (None, None) => {
                        return Err(GraphkitError::Schema(
                            "an anonymous record needs an explicit type name".into(),
                        ))
                    }
                };
                if wrapper {
                    debug!(type_name = %type_name, "treating record as response wrapper");
                }
                self.object(record, &type_name);
                Ok(TypeExpr::named(type_name).non_null())
            }
            primitive => Ok(self.field_output(primitive, "", "")),
        }
    }

    /// Registers (or returns) the object synthesised from `record`.
    pub fn object(&self, record: &RecordShape, name: &str) -> Arc<ObjectType> {
        let weak = Arc::downgrade(&self.registry);
        let detect_wrappers = self.detect_wrappers;
        let record = record.clone();
        let object_name = name.to_owned();
        let description = record.description.map(str::to_owned);

        self.registry.object_or_create(name, move || {
            ObjectType::lazy(object_name.clone(), move || {
                match Synthesizer::upgrade(&weak, detect_wrappers) {
                    Some(synth) => synth.object_fields(&record, &object_name),
                    None => FieldMap::new(),
                }
            })
            .with_description(description)
        })
    }

    fn upgrade(weak: &Weak<TypeRegistry>, detect_wrappers: bool) -> Option<Self> {
        weak.upgrade().map(|registry| Synthesizer {
            registry,
            detect_wrappers,
        })
    }

    fn object_fields(&self, record: &RecordShape, object_name: &str) -> FieldMap {
        let wrapper = self.detect_wrappers && record.is_wrapper();
        let mut fields = FieldMap::new();

        for field in flatten_fields(record) {
            let Some(name) = field_name(&field) else {
                continue;
            };
            let shape = (field.shape)();
            let mut ty = if wrapper && is_wrapper_scalar(field.ident) {
                scalar_only(&shape)
            } else {
                self.field_output(&shape, object_name, &name)
            };
            if field.required {
                ty = ty.non_null();
            }

            fields.insert(
                name.clone(),
                FieldDef {
                    name,
                    source: Some(field.ident),
                    ty,
                    description: field.description.map(str::to_owned),
                    args: ArgumentMap::new(),
                    resolver: Resolver::source_field(field.ident),
                },
            );
        }

        fields
    }

    fn field_output(&self, shape: &Shape, parent: &str, field: &str) -> TypeExpr {
        match shape {
            Shape::Nullable(inner) => self.field_output(inner, parent, field).nullable(),
            Shape::List(inner) => self.field_output(inner, parent, field).list().non_null(),
            Shape::Scalar(kind) => TypeExpr::named(kind.graphql_name()).non_null(),
            Shape::DateTime => TypeExpr::named(DATETIME).non_null(),
            Shape::Opaque => TypeExpr::named(JSON).non_null(),
            Shape::Record(record) => {
                let name = match record.name.as_deref() {
                    Some(declared) => declared.to_owned(),
                    None => format!("{}{}", upper_first(parent), upper_first(field)),
                };
                self.object(record, &name);
                TypeExpr::named(name).non_null()
            }
        }
    }

    /// Input type for `shape`; anonymous records are named `<Parent><Field>Input`.
    pub fn input_type(&self, shape: &Shape, parent: &str, field: &str) -> TypeExpr {
        match shape {
            Shape::Nullable(inner) => self.input_type(inner, parent, field).nullable(),
            Shape::List(inner) => self.input_type(inner, parent, field).list().non_null(),
            Shape::Scalar(kind) => TypeExpr::named(kind.graphql_name()).non_null(),
            Shape::DateTime => TypeExpr::named(DATETIME).non_null(),
            Shape::Opaque => TypeExpr::named(JSON).non_null(),
            Shape::Record(record) => {
                let base = match record.name.as_deref() {
                    Some(declared) => declared.to_owned(),
                    None => format!("{}{}", upper_first(parent), upper_first(field)),
                };
                let name = format!("{base}Input");
                self.input_object(record, &base, &name);
                TypeExpr::named(name).non_null()
            }
        }
    }

    pub fn input_of<T: Reflect>(&self) -> TypeExpr {
        self.input_type(&T::shape(), "", "")
    }

    fn input_object(&self, record: &RecordShape, base: &str, name: &str) -> Arc<InputType> {
        let weak = Arc::downgrade(&self.registry);
        let detect_wrappers = self.detect_wrappers;
        let record = record.clone();
        let base = base.to_owned();
        let description = record.description.map(str::to_owned);

        self.registry.input_or_create(name, move || {
            InputType::lazy(name.to_owned(), move || {
                match Synthesizer::upgrade(&weak, detect_wrappers) {
                    Some(synth) => synth.input_fields(&record, &base),
                    None => ArgumentMap::new(),
                }
            })
            .with_description(description)
        })
    }

    fn input_fields(&self, record: &RecordShape, base: &str) -> ArgumentMap {
        let mut fields = ArgumentMap::new();

        for field in flatten_fields(record) {
            let Some(name) = field_name(&field) else {
                continue;
            };
            let mut ty = self.input_type(&(field.shape)(), base, &name);
            let default = field.default_value();
            if field.required {
                ty = ty.non_null();
            } else if default.is_some() {
                ty = ty.nullable();
            }

            let mut def = InputValueDef::new(name.clone(), ty);
            def.default = default;
            def.description = field.description.map(str::to_owned);
            fields.insert(name, def);
        }

        fields
    }

    /// Arguments of a field. Records map one argument per field; anything
    /// else becomes a single argument named `scalar_arg`.
    pub fn arguments(&self, shape: &Shape, scalar_arg: &str) -> ArgumentMap {
        let core = match shape {
            Shape::Nullable(inner) => inner.as_ref(),
            other => other,
        };

        match core {
            Shape::Record(record) => {
                let base = record.name.as_deref().unwrap_or("Argument").to_owned();
                self.input_fields(record, &base)
            }
            other => {
                let mut args = ArgumentMap::new();
                let ty = self.input_type(other, "", scalar_arg);
                args.insert(scalar_arg.to_owned(), InputValueDef::new(scalar_arg, ty));
                args
            }
        }
    }

    pub fn arguments_of<A: Reflect>(&self, scalar_arg: &str) -> ArgumentMap {
        self.arguments(&A::shape(), scalar_arg)
    }

    /// Registers `<Item>Connection` with `items`, `totalCount` and `pageInfo`.
    pub fn connection(&self, item: &TypeExpr) -> Arc<ObjectType> {
        let page_info = self.page_info();
        let item_name = item.named_type().to_owned();
        let name = format!("{item_name}Connection");

        self.registry.object_or_create(&name, || {
            let mut fields = FieldMap::new();
            fields.insert(
                "items".into(),
                source_def("items", "items", TypeExpr::named(item_name).non_null().list().non_null()),
            );
            fields.insert(
                "totalCount".into(),
                source_def("totalCount", "total_count", TypeExpr::named(INT).non_null()),
            );
            fields.insert(
                "pageInfo".into(),
                source_def("pageInfo", "page_info", TypeExpr::named(page_info.name()).non_null()),
            );
            ObjectType::new(name.clone(), fields)
        })
    }

    pub fn page_info(&self) -> Arc<ObjectType> {
        self.registry.object_or_create(PAGE_INFO, || {
            let mut fields = FieldMap::new();
            fields.insert(
                "hasNextPage".into(),
                source_def("hasNextPage", "has_next_page", TypeExpr::named(BOOLEAN).non_null()),
            );
            fields.insert(
                "hasPreviousPage".into(),
                source_def("hasPreviousPage", "has_previous_page", TypeExpr::named(BOOLEAN).non_null()),
            );
            fields.insert(
                "startCursor".into(),
                source_def("startCursor", "start_cursor", TypeExpr::named(STRING)),
            );
            fields.insert(
                "endCursor".into(),
                source_def("endCursor", "end_cursor", TypeExpr::named(STRING)),
            );
            ObjectType::new(PAGE_INFO, fields)
        })
    }
}

fn source_def(name: &str, ident: &'static str, ty: TypeExpr) -> FieldDef {
    FieldDef {
        name: name.to_owned(),
        source: Some(ident),
        ty,
        description: None,
        args: ArgumentMap::new(),
        resolver: Resolver::source_field(ident),
    }
}

/// GraphQL name of a field, or `None` when the field is suppressed with `-`.
pub fn field_name(field: &FieldShape) -> Option<String> {
    let name = field
        .serde_name
        .filter(|n| !n.is_empty())
        .or(field.graphql_name.filter(|n| !n.is_empty()))
        .map(str::to_owned)
        .unwrap_or_else(|| lower_camel(field.ident));

    (name != "-").then_some(name)
}

/// Fields of `record` with embedded records hoisted in.
///
/// An embedded field is dropped when its name or identifier collides with a
/// field of the outer record, matching how reflected values are absorbed.
pub fn flatten_fields(record: &RecordShape) -> Vec<FieldShape> {
    let mut out: Vec<FieldShape> = Vec::with_capacity(record.fields.len());
    let mut embedded = Vec::new();

    for field in &record.fields {
        if field.embedded {
            if let Some(inner) = (field.shape)().record() {
                embedded.push(inner.clone());
                continue;
            }
        }
        out.push(*field);
    }

    let mut names: HashSet<String> = out.iter().filter_map(field_name).collect();
    let mut idents: HashSet<&'static str> = out.iter().map(|f| f.ident).collect();

    for inner in embedded {
        for field in flatten_fields(&inner) {
            let name = field_name(&field);
            let clashes = idents.contains(field.ident)
                || name.as_ref().map(|n| names.contains(n)).unwrap_or(false);
            if clashes {
                continue;
            }
            idents.insert(field.ident);
            if let Some(name) = name {
                names.insert(name);
            }
            out.push(field);
        }
    }

    out
}

pub fn lower_camel(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len());
    let mut upper_next = false;
    for (i, ch) in ident.chars().enumerate() {
        if ch == '_' {
            upper_next = i > 0;
            continue;
        }
        if out.is_empty() {
            out.push(ch.to_ascii_lowercase());
        } else if upper_next {
            out.push(ch.to_ascii_uppercase());
        } else {
            out.push(ch);
        }
        upper_next = false;
    }
    out
}

pub fn upper_first(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

fn is_wrapper_scalar(ident: &str) -> bool {
    WRAPPER_SCALARS.iter().any(|w| ident.eq_ignore_ascii_case(w))
}

/// Primitive shapes keep their mapping; anything structured becomes `JSON`.
fn scalar_only(shape: &Shape) -> TypeExpr {
    match shape {
        Shape::Nullable(inner) => scalar_only(inner).nullable(),
        Shape::Scalar(kind) => TypeExpr::named(kind.graphql_name()).non_null(),
        Shape::DateTime => TypeExpr::named(DATETIME).non_null(),
        _ => TypeExpr::named(JSON).non_null(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Reflect;
    use chrono::{DateTime, Utc};
    use std::collections::HashMap;

    #[derive(Reflect)]
    struct Address {
        street: String,
        zip: Option<String>,
    }

    #[derive(Reflect)]
    struct Audit {
        created_at: DateTime<Utc>,
        name: String,
    }

    #[derive(Reflect)]
    struct Customer {
        #[graphql(required)]
        id: Option<String>,
        #[serde(rename = "fullName")]
        name: String,
        #[graphql(name = "-")]
        internal: String,
        tags: Vec<String>,
        address: Address,
        metadata: HashMap<String, String>,
        #[graphql(embed)]
        audit: Audit,
    }

    #[derive(Reflect)]
    struct Envelope {
        status: String,
        code: Address,
        data: Vec<Address>,
    }

    fn synth() -> Synthesizer {
        Synthesizer::new(Arc::new(TypeRegistry::new()))
    }

    fn types(object: &ObjectType) -> Vec<(String, String)> {
        object
            .fields()
            .iter()
            .map(|(name, def)| (name.clone(), def.ty.to_string()))
            .collect()
    }

    #[test]
    fn synthesises_object_fields() {
        let synth = synth();
        let ty = synth.output_of::<Customer>(None).unwrap();
        assert_eq!(ty.to_string(), "Customer!");

        let customer = synth.registry().object("Customer").unwrap();
        assert_eq!(
            types(&customer),
            [
                ("id".to_string(), "String!".to_string()),
                ("fullName".into(), "String!".into()),
                ("tags".into(), "[String!]!".into()),
                ("address".into(), "Address!".into()),
                ("metadata".into(), "JSON!".into()),
                ("createdAt".into(), "DateTime!".into()),
            ]
        );

        let address = synth.registry().object("Address").unwrap();
        assert_eq!(address.field("zip").unwrap().ty.to_string(), "String");
    }

    #[test]
    fn synthesis_is_idempotent() {
        let synth = synth();
        synth.output_of::<Customer>(None).unwrap();
        let first = synth.registry().object("Customer").unwrap();
        synth.output_of::<Customer>(None).unwrap();
        let second = synth.registry().object("Customer").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn wrappers_force_scalar_envelope_fields() {
        let synth = synth();
        synth.output_of::<Envelope>(Some("AddressResponse")).unwrap();
        let object = synth.registry().object("AddressResponse").unwrap();

        assert_eq!(object.field("status").unwrap().ty.to_string(), "String!");
        assert_eq!(object.field("code").unwrap().ty.to_string(), "JSON!");
        assert_eq!(object.field("data").unwrap().ty.to_string(), "[Address!]!");
    }

    #[test]
    fn input_objects_use_input_suffix() {
        let synth = synth();
        let ty = synth.input_of::<Address>();
        assert_eq!(ty.to_string(), "AddressInput!");

        let input = synth.registry().input("AddressInput").unwrap();
        assert_eq!(input.fields()["street"].ty.to_string(), "String!");
        assert_eq!(input.fields()["zip"].ty.to_string(), "String");
    }

    #[test]
    fn connection_types_have_pagination_fields() {
        let synth = synth();
        let item = synth.output_of::<Address>(None).unwrap();
        let connection = synth.connection(&item);

        assert_eq!(connection.name(), "AddressConnection");
        assert_eq!(
            types(&connection),
            [
                ("items".to_string(), "[Address!]!".to_string()),
                ("totalCount".into(), "Int!".into()),
                ("pageInfo".into(), "PageInfo!".into()),
            ]
        );
        let page_info = synth.registry().object(PAGE_INFO).unwrap();
        assert_eq!(page_info.field("endCursor").unwrap().ty.to_string(), "String");
    }

    #[test]
    fn camel_cases_identifiers() {
        assert_eq!(lower_camel("created_at"), "createdAt");
        assert_eq!(lower_camel("_private"), "private");
        assert_eq!(upper_first("address"), "Address");
    }
}
