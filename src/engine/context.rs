use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::models::UserDetails;

/// Per-request root object handed to resolvers.
pub type RootObject = Map<String, Value>;

/// Request-scoped data threaded through every resolver.
///
/// Cloning is cheap; the maps are shared behind `Arc`s and copied on write.
#[derive(Clone, Default)]
pub struct RequestContext {
    user: Option<Arc<dyn UserDetails>>,
    token: Option<String>,
    root: Arc<RootObject>,
    values: Arc<HashMap<String, Value>>,
    cancel: CancellationToken,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user: Arc<dyn UserDetails>) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_root(mut self, root: RootObject) -> Self {
        self.root = Arc::new(root);
        self
    }

    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        Arc::make_mut(&mut self.values).insert(key.into(), value);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn user(&self) -> Option<&Arc<dyn UserDetails>> {
        self.user.as_ref()
    }

    pub fn user_details(&self) -> Option<&dyn UserDetails> {
        self.user.as_deref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn root(&self) -> &RootObject {
        &self.root
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Same data, with a cancellation token that is cancelled with this one.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            ..self.clone()
        }
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("user", &self.user)
            .field("has_token", &self.token.is_some())
            .field("root", &self.root)
            .field("values", &self.values)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
