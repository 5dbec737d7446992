//! # Type Registry
//!
//! Name-keyed cache of every synthesised object and input type. Synthesis is
//! idempotent: asking for `User` twice returns the same `Arc<ObjectType>`, so
//! customisations attached through one builder are seen by every field that
//! returns `User`.
//!
//! ## Rust Learning Notes:
//!
//! ### Lazy field thunks
//! An object's fields are computed on first use through an `FnOnce` stored in
//! a `Mutex<Option<..>>` and memoised in a `OnceLock`. The object is visible in
//! the registry before its fields exist, so a type that refers to itself
//! finds its own (still pending) entry instead of recursing forever.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

use indexmap::IndexMap;
use lazy_static::lazy_static;
use serde_json::Value;

use super::resolver::{compose, lazy, with_fallback, Middleware, Resolver};
use super::types::TypeExpr;

/// Output field definition.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    /// Declared field identifier the default resolver reads; `None` for custom fields
    pub source: Option<&'static str>,
    pub ty: TypeExpr,
    pub description: Option<String>,
    pub args: ArgumentMap,
    pub resolver: Resolver,
}

/// Argument or input-object field definition.
#[derive(Debug, Clone, PartialEq)]
pub struct InputValueDef {
    pub name: String,
    pub ty: TypeExpr,
    pub default: Option<Value>,
    pub description: Option<String>,
}

impl InputValueDef {
    pub fn new(name: impl Into<String>, ty: TypeExpr) -> Self {
        Self {
            name: name.into(),
            ty,
            default: None,
            description: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

pub type FieldMap = IndexMap<String, FieldDef>;
pub type ArgumentMap = IndexMap<String, InputValueDef>;

type Thunk<V> = Box<dyn FnOnce() -> IndexMap<String, V> + Send>;

struct LazyFields<V> {
    pending: Mutex<Option<Thunk<V>>>,
    resolved: OnceLock<IndexMap<String, V>>,
}

impl<V> LazyFields<V> {
    fn ready(fields: IndexMap<String, V>) -> Self {
        Self {
            pending: Mutex::new(None),
            resolved: OnceLock::from(fields),
        }
    }

    fn deferred(thunk: Thunk<V>) -> Self {
        Self {
            pending: Mutex::new(Some(thunk)),
            resolved: OnceLock::new(),
        }
    }

    fn get(&self) -> &IndexMap<String, V> {
        self.resolved.get_or_init(|| {
            let thunk = self
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            thunk.map(|f| f()).unwrap_or_default()
        })
    }
}

/// Customisations attached to an object after synthesis.
#[derive(Clone, Default)]
pub struct FieldExtensions {
    pub overrides: HashMap<String, Resolver>,
    pub lazy: HashMap<String, Resolver>,
    pub middlewares: HashMap<String, Vec<Middleware>>,
    pub extra: IndexMap<String, FieldDef>,
}

pub struct ObjectType {
    name: String,
    description: Option<String>,
    fields: LazyFields<FieldDef>,
    extensions: RwLock<FieldExtensions>,
}

impl ObjectType {
    pub fn new(name: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            name: name.into(),
            description: None,
            fields: LazyFields::ready(fields),
            extensions: RwLock::default(),
        }
    }

    pub fn lazy<F>(name: impl Into<String>, thunk: F) -> Self
    where
        F: FnOnce() -> FieldMap + Send + 'static,
    {
        Self {
            name: name.into(),
            description: None,
            fields: LazyFields::deferred(Box::new(thunk)),
            extensions: RwLock::default(),
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Synthesised fields, without customisations.
    pub fn fields(&self) -> &FieldMap {
        self.fields.get()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields().get(name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields().contains_key(name)
            || self
                .extensions
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .extra
                .contains_key(name)
    }

    pub fn extend<R>(&self, f: impl FnOnce(&mut FieldExtensions) -> R) -> R {
        let mut extensions = self
            .extensions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut extensions)
    }

    /// Fields as the executor sees them.
    ///
    /// Per field: per-field middlewares wrap the override, which falls back
    /// to the default resolver on error. Extra fields replace synthesised
    /// fields of the same name and are appended in insertion order.
    pub fn effective_fields(&self) -> Vec<FieldDef> {
        let extensions = self
            .extensions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let middlewares = |name: &str| {
            extensions
                .middlewares
                .get(name)
                .map(Vec::as_slice)
                .unwrap_or_default()
        };

        let mut out = Vec::with_capacity(self.fields().len() + extensions.extra.len());
        for (name, base) in self.fields() {
            if extensions.extra.contains_key(name) {
                continue;
            }
            let default = match extensions.lazy.get(name) {
                Some(compute) => lazy(base.resolver.clone(), compute.clone()),
                None => base.resolver.clone(),
            };
            let resolver = match extensions.overrides.get(name) {
                Some(custom) => with_fallback(custom.clone(), default),
                None => default,
            };
            out.push(FieldDef {
                resolver: compose(middlewares(name), resolver),
                ..base.clone()
            });
        }
        for (name, extra) in &extensions.extra {
            out.push(FieldDef {
                resolver: compose(middlewares(name), extra.resolver.clone()),
                ..extra.clone()
            });
        }
        out
    }
}

pub struct InputType {
    name: String,
    description: Option<String>,
    fields: LazyFields<InputValueDef>,
}

impl InputType {
    pub fn new(name: impl Into<String>, fields: ArgumentMap) -> Self {
        Self {
            name: name.into(),
            description: None,
            fields: LazyFields::ready(fields),
        }
    }

    pub fn lazy<F>(name: impl Into<String>, thunk: F) -> Self
    where
        F: FnOnce() -> ArgumentMap + Send + 'static,
    {
        Self {
            name: name.into(),
            description: None,
            fields: LazyFields::deferred(Box::new(thunk)),
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn fields(&self) -> &ArgumentMap {
        self.fields.get()
    }
}

lazy_static! {
    static ref GLOBAL_REGISTRY: Arc<TypeRegistry> = Arc::new(TypeRegistry::new());
}

#[derive(Default)]
pub struct TypeRegistry {
    objects: RwLock<HashMap<String, Arc<ObjectType>>>,
    inputs: RwLock<HashMap<String, Arc<InputType>>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry shared by builders that are not given one.
    pub fn global() -> Arc<TypeRegistry> {
        GLOBAL_REGISTRY.clone()
    }

    pub fn object_or_create(&self, name: &str, create: impl FnOnce() -> ObjectType) -> Arc<ObjectType> {
        get_or_create(&self.objects, name, create)
    }

    pub fn input_or_create(&self, name: &str, create: impl FnOnce() -> InputType) -> Arc<InputType> {
        get_or_create(&self.inputs, name, create)
    }

    pub fn object(&self, name: &str) -> Option<Arc<ObjectType>> {
        read(&self.objects).get(name).cloned()
    }

    pub fn input(&self, name: &str) -> Option<Arc<InputType>> {
        read(&self.inputs).get(name).cloned()
    }

    pub fn object_names(&self) -> Vec<String> {
        read(&self.objects).keys().cloned().collect()
    }

    pub fn input_names(&self) -> Vec<String> {
        read(&self.inputs).keys().cloned().collect()
    }
}

fn read<T>(map: &RwLock<HashMap<String, Arc<T>>>) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<T>>> {
    map.read().unwrap_or_else(PoisonError::into_inner)
}

fn get_or_create<T>(
    map: &RwLock<HashMap<String, Arc<T>>>,
    name: &str,
    create: impl FnOnce() -> T,
) -> Arc<T> {
    if let Some(existing) = read(map).get(name) {
        return existing.clone();
    }

    let mut entries = map.write().unwrap_or_else(PoisonError::into_inner);
    entries
        .entry(name.to_owned())
        .or_insert_with(|| Arc::new(create()))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::resolver::ResolveParams;
    use crate::models::Reflected;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn constant(value: i64) -> Resolver {
        Resolver::new(move |_| futures::future::ready(Ok(Reflected::Int(value))))
    }

    fn field(name: &str, value: i64) -> FieldDef {
        FieldDef {
            name: name.to_owned(),
            source: None,
            ty: TypeExpr::named("Int"),
            description: None,
            args: ArgumentMap::new(),
            resolver: constant(value),
        }
    }

    #[test]
    fn creation_is_idempotent() {
        let registry = TypeRegistry::new();
        let calls = AtomicUsize::new(0);
        let first = registry.object_or_create("User", || {
            calls.fetch_add(1, Ordering::SeqCst);
            ObjectType::new("User", FieldMap::new())
        });
        let second = registry.object_or_create("User", || {
            calls.fetch_add(1, Ordering::SeqCst);
            ObjectType::new("User", FieldMap::new())
        });

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lazy_fields_are_computed_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let object = ObjectType::lazy("Thing", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let mut map = FieldMap::new();
            map.insert("a".into(), field("a", 1));
            map
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(object.field("a").is_some());
        assert!(object.field("a").is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn extensions_shape_effective_fields() {
        let mut base = FieldMap::new();
        base.insert("a".into(), field("a", 1));
        base.insert("b".into(), field("b", 2));
        let object = ObjectType::new("Thing", base);

        object.extend(|ext| {
            ext.overrides.insert("a".into(), constant(10));
            ext.extra.insert("b".into(), field("b", 20));
            ext.extra.insert("c".into(), field("c", 30));
        });

        let fields = object.effective_fields();
        let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);

        let mut values = Vec::new();
        for f in &fields {
            values.push(f.resolver.call(ResolveParams::new(&f.name)).await.unwrap());
        }
        assert_eq!(values, [Reflected::Int(10), Reflected::Int(20), Reflected::Int(30)]);
    }
}
