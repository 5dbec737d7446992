//! # Resolver Builder
//!
//! Fluent assembly of one root field whose payload type is `T`:
//!
//! ```rust,ignore
//! let field = ResolverBuilder::<User>::query("users")
//!     .description("All users")
//!     .args_from::<UserFilter>()
//!     .list()
//!     .middleware(middleware::logging())
//!     .resolve_with_args(|ctx, filter: UserFilter| async move { load(ctx, filter).await })
//!     .computed_field("initials", TypeExpr::named("String"), |user| initials(user))
//!     .build()?;
//! ```
//!
//! Field customisations (overrides, per-field middleware, custom, lazy,
//! cached and async fields) attach to the shared registry entry of `T`, so
//! they apply wherever `T` appears in the schema.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;

use super::args::decode_args;
use super::context::RequestContext;
use super::middleware::cached;
use super::registry::{ArgumentMap, FieldDef, InputValueDef, ObjectType, TypeRegistry};
use super::resolver::{compose, spawned, EventStream, Middleware, ResolveParams, Resolver, StreamResolver};
use super::schema::{FieldDescriptor, FieldResolver};
use super::synth::Synthesizer;
use super::types::{OperationKind, TypeExpr};
use crate::models::{Record, Reflect, Shape};
use crate::{GraphkitError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultShape {
    Single,
    List,
    Paginated,
}

enum Customization {
    Override(String, Resolver),
    FieldMiddleware(String, Middleware),
    Custom(String, TypeExpr, Resolver),
    Lazy(String, TypeExpr, Resolver),
    Replace(String, TypeExpr, Resolver),
}

type TypedResolver = Box<dyn FnOnce(&str) -> Resolver + Send>;

pub struct ResolverBuilder<T> {
    registry: Arc<TypeRegistry>,
    name: String,
    kind: OperationKind,
    description: Option<String>,
    result_shape: ResultShape,
    args: ArgumentMap,
    args_shape: Option<fn() -> Shape>,
    input_args: Vec<(String, bool, fn() -> Shape)>,
    arg_name: String,
    resolver: Option<Resolver>,
    typed_resolver: Option<TypedResolver>,
    stream: Option<StreamResolver>,
    middlewares: Vec<Middleware>,
    type_name: Option<String>,
    detect_wrappers: bool,
    customizations: Vec<Customization>,
    _payload: PhantomData<fn() -> T>,
}

impl<T: Reflect> ResolverBuilder<T> {
    /// A query field named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            registry: TypeRegistry::global(),
            name: name.into(),
            kind: OperationKind::Query,
            description: None,
            result_shape: ResultShape::Single,
            args: ArgumentMap::new(),
            args_shape: None,
            input_args: Vec::new(),
            arg_name: "input".to_owned(),
            resolver: None,
            typed_resolver: None,
            stream: None,
            middlewares: Vec::new(),
            type_name: None,
            detect_wrappers: true,
            customizations: Vec::new(),
            _payload: PhantomData,
        }
    }

    pub fn query(name: impl Into<String>) -> Self {
        Self::new(name)
    }

    pub fn mutation(name: impl Into<String>) -> Self {
        Self::new(name).as_mutation()
    }

    pub fn subscription(name: impl Into<String>) -> Self {
        Self::new(name).as_subscription()
    }

    pub fn with_registry(mut self, registry: Arc<TypeRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Replaces the argument map wholesale.
    pub fn args(mut self, args: ArgumentMap) -> Self {
        self.args = args;
        self
    }

    pub fn arg(mut self, def: InputValueDef) -> Self {
        self.args.insert(def.name.clone(), def);
        self
    }

    /// Derives arguments from the record `A`, one per field.
    pub fn args_from<A: Reflect>(mut self) -> Self {
        self.args_shape = Some(A::shape);
        self
    }

    /// Adds one argument of input type `I` (records become `<Name>Input`).
    pub fn input_arg<I: Reflect>(mut self, name: impl Into<String>, nullable: bool) -> Self {
        self.input_args.push((name.into(), nullable, I::shape));
        self
    }

    /// Name of the single argument used when arguments are not a record.
    pub fn arg_name(mut self, name: impl Into<String>) -> Self {
        self.arg_name = name.into();
        self
    }

    pub fn list(mut self) -> Self {
        self.result_shape = ResultShape::List;
        self
    }

    /// Returns `<T>Connection` instead of `T`.
    pub fn paginated(mut self) -> Self {
        self.result_shape = ResultShape::Paginated;
        self
    }

    pub fn as_mutation(mut self) -> Self {
        self.kind = OperationKind::Mutation;
        self
    }

    pub fn as_subscription(mut self) -> Self {
        self.kind = OperationKind::Subscription;
        self
    }

    /// Overrides the GraphQL name of the payload type.
    pub fn type_name(mut self, name: impl Into<String>) -> Self {
        self.type_name = Some(name.into());
        self
    }

    pub fn wrapper_detection(mut self, enabled: bool) -> Self {
        self.detect_wrappers = enabled;
        self
    }

    /// Resolver-level middleware; for subscriptions it wraps each event.
    pub fn middleware(mut self, middleware: Middleware) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn resolve<F, Fut, R>(mut self, f: F) -> Self
    where
        F: Fn(ResolveParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Reflect,
    {
        self.resolver = Some(Resolver::from_fn(f));
        self.typed_resolver = None;
        self
    }

    /// Resolver receiving arguments decoded into `A`; also derives the
    /// argument map from `A` unless one was set already.
    pub fn resolve_with_args<A, F, Fut, R>(mut self, f: F) -> Self
    where
        A: Reflect + DeserializeOwned,
        F: Fn(RequestContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Reflect,
    {
        if self.args_shape.is_none() && self.args.is_empty() {
            self.args_shape = Some(A::shape);
        }
        let f = Arc::new(f);
        self.typed_resolver = Some(Box::new(move |arg_name: &str| {
            let arg_name = arg_name.to_owned();
            Resolver::new(move |params: ResolveParams| {
                let f = f.clone();
                let decoded = decode_args::<A>(&params.args, &arg_name);
                async move {
                    let value = f(params.context, decoded?).await?;
                    Ok(value.reflect())
                }
            })
        }));
        self.resolver = None;
        self
    }

    /// Subscription source: a stream of payloads, one response frame each.
    pub fn subscribe<F, Fut, S, R>(mut self, f: F) -> Self
    where
        F: Fn(ResolveParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S>> + Send + 'static,
        S: Stream<Item = Result<R>> + Send + 'static,
        R: Reflect,
    {
        let f = Arc::new(f);
        self.stream = Some(StreamResolver::new(move |params: ResolveParams| {
            let f = f.clone();
            async move {
                let events = f(params).await?;
                Ok::<EventStream, GraphkitError>(
                    events.map(|event| event.map(|value| value.reflect())).boxed(),
                )
            }
        }));
        self.as_subscription()
    }

    /// Replaces the resolver of a synthesised field of `T`; the default
    /// resolver runs if the override fails.
    pub fn field_override<F, Fut, R>(mut self, field: impl Into<String>, f: F) -> Self
    where
        F: Fn(ResolveParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Reflect,
    {
        self.customizations
            .push(Customization::Override(field.into(), Resolver::from_fn(f)));
        self
    }

    pub fn field_middleware(mut self, field: impl Into<String>, middleware: Middleware) -> Self {
        self.customizations
            .push(Customization::FieldMiddleware(field.into(), middleware));
        self
    }

    /// Adds a field that is not part of `T`.
    pub fn custom_field<F, Fut, R>(mut self, name: impl Into<String>, ty: TypeExpr, f: F) -> Self
    where
        F: Fn(ResolveParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Reflect,
    {
        self.customizations
            .push(Customization::Custom(name.into(), ty, Resolver::from_fn(f)));
        self
    }

    /// Adds a field computed synchronously from the parent record.
    pub fn computed_field<F, R>(mut self, name: impl Into<String>, ty: TypeExpr, f: F) -> Self
    where
        F: Fn(&Record) -> R + Send + Sync + 'static,
        R: Reflect,
    {
        let resolver = Resolver::new(move |params: ResolveParams| {
            let value = match params.source_record() {
                Some(record) => f(record).reflect(),
                None => crate::models::Reflected::Null,
            };
            futures::future::ready(Ok(value))
        });
        self.customizations
            .push(Customization::Custom(name.into(), ty, resolver));
        self
    }

    /// The resolver only runs when the field's own value is zero or absent.
    pub fn lazy_field<F, Fut, R>(mut self, name: impl Into<String>, ty: TypeExpr, f: F) -> Self
    where
        F: Fn(ResolveParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Reflect,
    {
        self.customizations
            .push(Customization::Lazy(name.into(), ty, Resolver::from_fn(f)));
        self
    }

    /// Memoises results by `key`.
    pub fn cached_field<K, F, Fut, R>(
        mut self,
        name: impl Into<String>,
        ty: TypeExpr,
        key: K,
        f: F,
    ) -> Self
    where
        K: Fn(&ResolveParams) -> String + Send + Sync + 'static,
        F: Fn(ResolveParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Reflect,
    {
        let resolver = cached(key).apply(Resolver::from_fn(f));
        self.customizations
            .push(Customization::Replace(name.into(), ty, resolver));
        self
    }

    /// Runs the resolver on its own task.
    pub fn async_field<F, Fut, R>(mut self, name: impl Into<String>, ty: TypeExpr, f: F) -> Self
    where
        F: Fn(ResolveParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Reflect,
    {
        let resolver = spawned(Resolver::from_fn(f));
        self.customizations
            .push(Customization::Replace(name.into(), ty, resolver));
        self
    }

    pub fn build(mut self) -> Result<FieldDescriptor> {
        let synth = Synthesizer::new(self.registry.clone()).detect_wrappers(self.detect_wrappers);
        let payload = T::shape();

        let base = synth.output_type(&payload, self.type_name.as_deref())?;
        let ty = match self.result_shape {
            ResultShape::Single => base.clone().nullable(),
            ResultShape::List => base.clone().non_null().list(),
            ResultShape::Paginated => {
                TypeExpr::named(synth.connection(&base).name().to_owned())
            }
        };

        if !self.customizations.is_empty() {
            let object = match payload.record() {
                Some(_) => self.registry.object(base.named_type()),
                None => None,
            };
            let Some(object) = object else {
                return Err(GraphkitError::Schema(format!(
                    "field `{}` customises fields of a non-record payload",
                    self.name
                )));
            };
            let mut stacks: HashMap<String, Vec<Middleware>> = HashMap::new();
            for customization in std::mem::take(&mut self.customizations) {
                apply(&object, customization, &mut stacks)?;
            }
            // Each build replaces a field's stack, so rebuilding never wraps twice.
            for (name, stack) in stacks {
                object.extend(|ext| ext.middlewares.insert(name, stack));
            }
        }

        let mut args = std::mem::take(&mut self.args);
        if let Some(shape) = self.args_shape {
            args.extend(synth.arguments(&shape(), &self.arg_name));
        }
        for (name, nullable, shape) in &self.input_args {
            let ty = synth.input_type(&shape(), "", name);
            let ty = if *nullable { ty.nullable() } else { ty.non_null() };
            args.insert(name.clone(), InputValueDef::new(name.clone(), ty));
        }

        let resolver = match self.kind {
            OperationKind::Subscription => {
                let Some(stream) = self.stream.take() else {
                    return Err(GraphkitError::Schema(format!(
                        "subscription field `{}` has no stream source",
                        self.name
                    )));
                };
                FieldResolver::Stream(stream.with_event_middleware(&self.middlewares))
            }
            OperationKind::Query | OperationKind::Mutation => {
                let resolver = match (self.typed_resolver.take(), self.resolver.take()) {
                    (Some(typed), _) => typed(&self.arg_name),
                    (None, Some(resolver)) => resolver,
                    (None, None) => {
                        return Err(GraphkitError::Schema(format!(
                            "field `{}` has no resolver",
                            self.name
                        )))
                    }
                };
                FieldResolver::Value(compose(&self.middlewares, resolver))
            }
        };

        Ok(FieldDescriptor {
            kind: self.kind,
            name: self.name,
            ty,
            description: self.description,
            args,
            resolver,
        })
    }
}

fn apply(
    object: &ObjectType,
    customization: Customization,
    stacks: &mut HashMap<String, Vec<Middleware>>,
) -> Result<()> {
    match customization {
        Customization::Override(name, resolver) => {
            if object.field(&name).is_none() {
                return Err(GraphkitError::Schema(format!(
                    "cannot override unknown field `{name}` of `{}`",
                    object.name()
                )));
            }
            object.extend(|ext| ext.overrides.insert(name, resolver));
        }
        Customization::FieldMiddleware(name, middleware) => {
            stacks.entry(name).or_default().push(middleware);
        }
        Customization::Custom(name, ty, resolver) => {
            object.extend(|ext| ext.extra.insert(name.clone(), custom_def(name, ty, resolver)));
        }
        Customization::Lazy(name, ty, resolver) => {
            if object.field(&name).is_some() {
                object.extend(|ext| ext.lazy.insert(name, resolver));
            } else {
                object.extend(|ext| ext.extra.insert(name.clone(), custom_def(name, ty, resolver)));
            }
        }
        Customization::Replace(name, ty, resolver) => {
            if object.field(&name).is_some() {
                object.extend(|ext| ext.overrides.insert(name, resolver));
            } else {
                object.extend(|ext| ext.extra.insert(name.clone(), custom_def(name, ty, resolver)));
            }
        }
    }
    Ok(())
}

fn custom_def(name: String, ty: TypeExpr, resolver: Resolver) -> FieldDef {
    FieldDef {
        name,
        source: None,
        ty,
        description: None,
        args: ArgumentMap::new(),
        resolver,
    }
}
