//! # Schema Assembly
//!
//! [`SchemaBuilder`] collects root [`FieldDescriptor`]s, walks every type they
//! reach in the registry and registers it with the executor's dynamic schema.
//! The result, [`GraphkitSchema`], wraps the executable schema together with a
//! [`SchemaIndex`] of field types that validation rules use for list
//! detection.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_graphql::dynamic::{
    Field, FieldFuture, FieldValue, InputObject, InputValue, Object, Scalar, Schema,
    Subscription, SubscriptionField, SubscriptionFieldFuture,
};
use async_graphql::{Response, Value as ConstValue, Variables};
use futures::stream::BoxStream;
use futures::StreamExt;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info};

use super::context::RequestContext;
use super::registry::{ArgumentMap, FieldDef, InputValueDef, TypeRegistry};
use super::resolver::{into_field_value, ResolveParams, Resolver, StreamResolver};
use super::types::{is_builtin, OperationKind, TypeExpr, DATETIME, JSON};
use crate::models::parse_datetime;
use crate::{GraphkitError, Result};

/// How a root field produces its value.
#[derive(Debug, Clone)]
pub enum FieldResolver {
    Value(Resolver),
    Stream(StreamResolver),
}

/// A root field ready to be attached to `Query`, `Mutation` or `Subscription`.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub kind: OperationKind,
    pub name: String,
    pub ty: TypeExpr,
    pub description: Option<String>,
    pub args: ArgumentMap,
    pub resolver: FieldResolver,
}

/// Field types of every object in a schema, by type then field name.
#[derive(Debug, Clone, Default)]
pub struct SchemaIndex {
    types: HashMap<String, IndexMap<String, TypeExpr>>,
}

impl SchemaIndex {
    pub fn insert(&mut self, parent: &str, field: &str, ty: TypeExpr) {
        self.types
            .entry(parent.to_owned())
            .or_default()
            .insert(field.to_owned(), ty);
    }

    pub fn field_type(&self, parent: &str, field: &str) -> Option<&TypeExpr> {
        self.types.get(parent).and_then(|fields| fields.get(field))
    }

    pub fn has_type(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn fields(&self, parent: &str) -> impl Iterator<Item = (&str, &TypeExpr)> {
        self.types
            .get(parent)
            .into_iter()
            .flat_map(|fields| fields.iter().map(|(k, v)| (k.as_str(), v)))
    }
}

/// One operation to execute.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    pub query: String,
    pub variables: Option<Value>,
    pub operation_name: Option<String>,
    pub context: RequestContext,
}

impl ExecutionRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn variables(mut self, variables: Value) -> Self {
        self.variables = Some(variables);
        self
    }

    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    fn into_request(self) -> async_graphql::Request {
        let mut request = async_graphql::Request::new(self.query);
        if let Some(variables) = self.variables {
            request = request.variables(Variables::from_json(variables));
        }
        if let Some(name) = self.operation_name {
            request = request.operation_name(name);
        }
        request.data(self.context)
    }
}

/// An executable schema plus the field index used by validation.
#[derive(Clone)]
pub struct GraphkitSchema {
    executor: Schema,
    index: Arc<SchemaIndex>,
}

impl GraphkitSchema {
    pub async fn execute(&self, request: ExecutionRequest) -> Response {
        self.executor.execute(request.into_request()).await
    }

    /// Runs a subscription; each item is one response frame.
    pub fn subscribe(&self, request: ExecutionRequest) -> BoxStream<'static, Response> {
        self.executor.execute_stream(request.into_request()).boxed()
    }

    pub fn index(&self) -> &SchemaIndex {
        &self.index
    }

    pub fn has_subscriptions(&self) -> bool {
        self.index.has_type(OperationKind::Subscription.root_type())
    }

    /// Schema definition language of the executable schema.
    pub fn sdl(&self) -> String {
        self.executor.sdl()
    }
}

pub struct SchemaBuilder {
    registry: Arc<TypeRegistry>,
    query: Vec<FieldDescriptor>,
    mutation: Vec<FieldDescriptor>,
    subscription: Vec<FieldDescriptor>,
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::with_registry(TypeRegistry::global())
    }

    pub fn with_registry(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            query: Vec::new(),
            mutation: Vec::new(),
            subscription: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        match field.kind {
            OperationKind::Query => self.query.push(field),
            OperationKind::Mutation => self.mutation.push(field),
            OperationKind::Subscription => self.subscription.push(field),
        }
        self
    }

    pub fn fields(self, fields: impl IntoIterator<Item = FieldDescriptor>) -> Self {
        fields.into_iter().fold(self, SchemaBuilder::field)
    }

    pub fn build(self) -> Result<GraphkitSchema> {
        if self.query.is_empty() {
            return Err(GraphkitError::Schema(
                "a schema needs at least one query field".into(),
            ));
        }

        let mut index = SchemaIndex::default();
        let mut pending = VecDeque::new();

        let query = self.root_object(OperationKind::Query, &self.query, &mut index, &mut pending)?;
        let mutation = if self.mutation.is_empty() {
            None
        } else {
            Some(self.root_object(OperationKind::Mutation, &self.mutation, &mut index, &mut pending)?)
        };
        let subscription = if self.subscription.is_empty() {
            None
        } else {
            Some(self.subscription_root(&mut index, &mut pending)?)
        };

        let mut builder = Schema::build(
            OperationKind::Query.root_type(),
            mutation.as_ref().map(|_| OperationKind::Mutation.root_type()),
            subscription
                .as_ref()
                .map(|_| OperationKind::Subscription.root_type()),
        )
        .register(query);
        if let Some(mutation) = mutation {
            builder = builder.register(mutation);
        }
        if let Some(subscription) = subscription {
            builder = builder.register(subscription);
        }

        let mut seen = HashSet::new();
        let mut registered = 0usize;
        while let Some(name) = pending.pop_front() {
            if is_builtin(&name) || name == DATETIME || name == JSON || !seen.insert(name.clone()) {
                continue;
            }

            if let Some(object) = self.registry.object(&name) {
                let mut dynamic = Object::new(name.clone());
                if let Some(description) = object.description() {
                    dynamic = dynamic.description(description);
                }
                for def in object.effective_fields() {
                    enqueue(&mut pending, &def.ty, &def.args);
                    index.insert(&name, &def.name, def.ty.clone());
                    dynamic = dynamic.field(object_field(&def));
                }
                builder = builder.register(dynamic);
            } else if let Some(input) = self.registry.input(&name) {
                let mut dynamic = InputObject::new(name.clone());
                if let Some(description) = input.description() {
                    dynamic = dynamic.description(description);
                }
                for def in input.fields().values() {
                    pending.push_back(def.ty.named_type().to_owned());
                    dynamic = dynamic.field(input_value(def));
                }
                builder = builder.register(dynamic);
            } else {
                return Err(GraphkitError::Schema(format!(
                    "type `{name}` is referenced but not registered"
                )));
            }
            registered += 1;
        }

        let executor = builder
            .register(datetime_scalar())
            .register(json_scalar())
            .finish()
            .map_err(|err| GraphkitError::Schema(err.to_string()))?;

        info!(
            "🧩 Schema assembled: {} query, {} mutation, {} subscription fields, {} types",
            self.query.len(),
            self.mutation.len(),
            self.subscription.len(),
            registered
        );

        Ok(GraphkitSchema {
            executor,
            index: Arc::new(index),
        })
    }

    fn root_object(
        &self,
        kind: OperationKind,
        fields: &[FieldDescriptor],
        index: &mut SchemaIndex,
        pending: &mut VecDeque<String>,
    ) -> Result<Object> {
        let root = kind.root_type();
        let mut object = Object::new(root);
        for field in fields {
            let FieldResolver::Value(resolver) = &field.resolver else {
                return Err(GraphkitError::Schema(format!(
                    "{kind} field `{}` needs a value resolver",
                    field.name
                )));
            };
            enqueue(pending, &field.ty, &field.args);
            index.insert(root, &field.name, field.ty.clone());
            object = object.field(object_field(&FieldDef {
                name: field.name.clone(),
                source: None,
                ty: field.ty.clone(),
                description: field.description.clone(),
                args: field.args.clone(),
                resolver: resolver.clone(),
            }));
            debug!(root, field = %field.name, ty = %field.ty, "registered root field");
        }
        Ok(object)
    }

    fn subscription_root(
        &self,
        index: &mut SchemaIndex,
        pending: &mut VecDeque<String>,
    ) -> Result<Subscription> {
        let root = OperationKind::Subscription.root_type();
        let mut subscription = Subscription::new(root);
        for field in &self.subscription {
            let FieldResolver::Stream(stream) = &field.resolver else {
                return Err(GraphkitError::Schema(format!(
                    "subscription field `{}` needs a stream resolver",
                    field.name
                )));
            };
            enqueue(pending, &field.ty, &field.args);
            index.insert(root, &field.name, field.ty.clone());
            subscription = subscription.field(subscription_field(field, stream.clone()));
        }
        Ok(subscription)
    }
}

fn enqueue(pending: &mut VecDeque<String>, ty: &TypeExpr, args: &ArgumentMap) {
    pending.push_back(ty.named_type().to_owned());
    for arg in args.values() {
        pending.push_back(arg.ty.named_type().to_owned());
    }
}

fn object_field(def: &FieldDef) -> Field {
    let resolver = def.resolver.clone();
    let field_name = def.name.clone();

    let mut field = Field::new(def.name.clone(), def.ty.to_type_ref(), move |ctx| {
        let resolver = resolver.clone();
        let params = ResolveParams::from_resolver_context(&field_name, &ctx);
        FieldFuture::new(async move {
            let value = resolver
                .call(params)
                .await
                .map_err(GraphkitError::into_graphql)?;
            Ok::<_, async_graphql::Error>(into_field_value(value))
        })
    });

    if let Some(description) = &def.description {
        field = field.description(description.clone());
    }
    for arg in def.args.values() {
        field = field.argument(input_value(arg));
    }
    field
}

fn subscription_field(def: &FieldDescriptor, stream: StreamResolver) -> SubscriptionField {
    let field_name = def.name.clone();

    let mut field = SubscriptionField::new(def.name.clone(), def.ty.to_type_ref(), move |ctx| {
        let stream = stream.clone();
        let params = ResolveParams::from_resolver_context(&field_name, &ctx);
        SubscriptionFieldFuture::new(async move {
            let events = stream
                .call(params)
                .await
                .map_err(GraphkitError::into_graphql)?;
            Ok::<_, async_graphql::Error>(events.map(|event| {
                event
                    .map(|value| into_field_value(value).unwrap_or(FieldValue::NULL))
                    .map_err(GraphkitError::into_graphql)
            }))
        })
    });

    if let Some(description) = &def.description {
        field = field.description(description.clone());
    }
    for arg in def.args.values() {
        field = field.argument(input_value(arg));
    }
    field
}

fn input_value(def: &InputValueDef) -> InputValue {
    let mut input = InputValue::new(def.name.clone(), def.ty.to_type_ref());
    if let Some(description) = &def.description {
        input = input.description(description.clone());
    }
    if let Some(default) = &def.default {
        if let Ok(value) = ConstValue::from_json(default.clone()) {
            input = input.default_value(value);
        }
    }
    input
}

fn datetime_scalar() -> Scalar {
    Scalar::new(DATETIME)
        .description("UTC timestamp formatted as YYYY-MM-DDTHH:mm")
        .validator(|value| match value {
            ConstValue::String(raw) => parse_datetime(raw).is_ok(),
            _ => false,
        })
}

fn json_scalar() -> Scalar {
    Scalar::new(JSON).description("Arbitrary JSON value")
}
