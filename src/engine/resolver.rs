//! # Resolvers and Middleware
//!
//! A [`Resolver`] is an async callback from [`ResolveParams`] to a
//! [`Reflected`] value. A [`Middleware`] takes the next resolver and returns a
//! wrapped one; a chain `[a, b, c]` runs `a` outermost, so `a` sees the call
//! first and the result last.
//!
//! ## Rust Learning Notes:
//!
//! ### Type-erased async callbacks
//! Every resolver is stored as `Arc<dyn Fn(..) -> BoxFuture<..>>`. The `Arc`
//! makes resolvers cheap to clone into executor closures, and boxing the
//! future hides each closure's unique future type behind one signature.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_graphql::dynamic::{FieldValue, ResolverContext};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use super::args::decode_args;
use super::context::RequestContext;
use crate::models::{Record, Reflect, Reflected};
use crate::{GraphkitError, Result};

/// Everything a resolver gets to see about one field invocation.
#[derive(Debug, Clone)]
pub struct ResolveParams {
    pub field_name: String,
    /// Parent value; `None` for root fields
    pub source: Option<Reflected>,
    /// Arguments keyed by GraphQL name
    pub args: Map<String, Value>,
    pub context: RequestContext,
}

impl ResolveParams {
    pub fn new(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            source: None,
            args: Map::new(),
            context: RequestContext::default(),
        }
    }

    pub fn with_source(mut self, source: Reflected) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_args(mut self, args: Map<String, Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn source_record(&self) -> Option<&Record> {
        self.source.as_ref().and_then(Reflected::as_record)
    }

    /// Deserialises a single argument; a missing argument reads as `null`.
    pub fn arg<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self.args.get(name).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value)
            .map_err(|err| GraphkitError::InvalidInput(format!("argument `{name}`: {err}")))
    }

    /// Decodes every argument into `A`, using the reflected shape of `A` to
    /// map GraphQL names back onto serde keys.
    pub fn decode_args<A: Reflect + DeserializeOwned>(&self) -> Result<A> {
        decode_args(&self.args, "input")
    }

    pub(crate) fn from_resolver_context(field_name: &str, ctx: &ResolverContext<'_>) -> Self {
        let source = ctx
            .parent_value
            .downcast_ref::<Arc<Record>>()
            .map(|record| Reflected::Record(record.clone()));
        let args = ctx
            .args
            .as_index_map()
            .iter()
            .map(|(name, value)| {
                let json = value.clone().into_json().unwrap_or(Value::Null);
                (name.to_string(), json)
            })
            .collect();
        let context = ctx
            .ctx
            .data_opt::<RequestContext>()
            .cloned()
            .unwrap_or_default();

        Self {
            field_name: field_name.to_owned(),
            source,
            args,
            context,
        }
    }
}

type ResolveFn = dyn Fn(ResolveParams) -> BoxFuture<'static, Result<Reflected>> + Send + Sync;

#[derive(Clone)]
pub struct Resolver(Arc<ResolveFn>);

impl Resolver {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(ResolveParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reflected>> + Send + 'static,
    {
        Resolver(Arc::new(move |params: ResolveParams| f(params).boxed()))
    }

    /// Resolver returning any reflectable value.
    pub fn from_fn<F, Fut, R>(f: F) -> Self
    where
        F: Fn(ResolveParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Reflect,
    {
        Resolver::new(move |params| f(params).map(|result| result.map(|value| value.reflect())))
    }

    /// Default resolver: reads the declared field from the parent record.
    pub fn source_field(ident: impl Into<Cow<'static, str>>) -> Self {
        let ident = ident.into();
        Resolver::new(move |params: ResolveParams| {
            let value = params
                .source_record()
                .and_then(|record| record.get(&ident).cloned())
                .unwrap_or(Reflected::Null);
            futures::future::ready(Ok(value))
        })
    }

    pub async fn call(&self, params: ResolveParams) -> Result<Reflected> {
        (self.0)(params).await
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Resolver")
    }
}

pub type EventStream = BoxStream<'static, Result<Reflected>>;

type StreamFn = dyn Fn(ResolveParams) -> BoxFuture<'static, Result<EventStream>> + Send + Sync;

/// Produces the event stream of a subscription field.
#[derive(Clone)]
pub struct StreamResolver(Arc<StreamFn>);

impl StreamResolver {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(ResolveParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<EventStream>> + Send + 'static,
    {
        StreamResolver(Arc::new(move |params: ResolveParams| f(params).boxed()))
    }

    pub async fn call(&self, params: ResolveParams) -> Result<EventStream> {
        (self.0)(params).await
    }

    /// Routes every event through `middlewares`, with the event as source.
    pub fn with_event_middleware(self, middlewares: &[Middleware]) -> Self {
        if middlewares.is_empty() {
            return self;
        }
        let per_event = compose(
            middlewares,
            Resolver::new(|params: ResolveParams| {
                futures::future::ready(Ok(params.source.unwrap_or(Reflected::Null)))
            }),
        );

        StreamResolver::new(move |params: ResolveParams| {
            let inner = self.clone();
            let per_event = per_event.clone();
            async move {
                let events = inner.call(params.clone()).await?;
                let mapped = events.then(move |event| {
                    let per_event = per_event.clone();
                    let params = params.clone();
                    async move {
                        match event {
                            Ok(value) => per_event.call(params.with_source(value)).await,
                            Err(err) => Err(err),
                        }
                    }
                });
                Ok::<EventStream, GraphkitError>(mapped.boxed())
            }
        })
    }
}

impl fmt::Debug for StreamResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StreamResolver")
    }
}

/// Wraps a resolver with cross-cutting behaviour.
#[derive(Clone)]
pub struct Middleware(Arc<dyn Fn(Resolver) -> Resolver + Send + Sync>);

impl Middleware {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Resolver) -> Resolver + Send + Sync + 'static,
    {
        Middleware(Arc::new(f))
    }

    /// Builds a middleware from an `around` function receiving the next resolver.
    pub fn around<F, Fut>(f: F) -> Self
    where
        F: Fn(ResolveParams, Resolver) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reflected>> + Send + 'static,
    {
        let f = Arc::new(f);
        Middleware::new(move |next| {
            let f = f.clone();
            Resolver::new(move |params| f(params, next.clone()))
        })
    }

    pub fn apply(&self, next: Resolver) -> Resolver {
        (self.0)(next)
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Middleware")
    }
}

/// First middleware in the slice ends up outermost.
pub fn compose(middlewares: &[Middleware], inner: Resolver) -> Resolver {
    middlewares
        .iter()
        .rev()
        .fold(inner, |next, middleware| middleware.apply(next))
}

/// Runs `primary`, falling back to `fallback` when it fails.
pub(crate) fn with_fallback(primary: Resolver, fallback: Resolver) -> Resolver {
    Resolver::new(move |params: ResolveParams| {
        let primary = primary.clone();
        let fallback = fallback.clone();
        async move {
            match primary.call(params.clone()).await {
                Ok(value) => Ok(value),
                Err(err) => {
                    debug!(field = %params.field_name, error = %err, "override failed, using default resolver");
                    fallback.call(params).await
                }
            }
        }
    })
}

/// Consults `lazy` only when `base` yields a zero value.
pub(crate) fn lazy(base: Resolver, lazy: Resolver) -> Resolver {
    Resolver::new(move |params: ResolveParams| {
        let base = base.clone();
        let lazy = lazy.clone();
        async move {
            let current = base.call(params.clone()).await?;
            if current.is_zero() {
                lazy.call(params).await
            } else {
                Ok(current)
            }
        }
    })
}

/// Runs the resolver on its own task.
pub(crate) fn spawned(resolver: Resolver) -> Resolver {
    Resolver::new(move |params: ResolveParams| {
        let resolver = resolver.clone();
        async move {
            tokio::spawn(async move { resolver.call(params).await })
                .await
                .map_err(|err| GraphkitError::Internal(format!("resolver task failed: {err}")))?
        }
    })
}

/// Converts a reflected value into what the executor expects for a field.
pub(crate) fn into_field_value(value: Reflected) -> Option<FieldValue<'static>> {
    match value {
        Reflected::Null | Reflected::Json(Value::Null) => None,
        Reflected::List(items) => Some(FieldValue::list(
            items
                .into_iter()
                .map(|item| into_field_value(item).unwrap_or(FieldValue::NULL)),
        )),
        Reflected::Record(record) => Some(FieldValue::owned_any(record)),
        scalar => Some(FieldValue::value(scalar.into_const_value())),
    }
}
