//! Standard resolver middlewares.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tracing::debug;

use super::resolver::{Middleware, ResolveParams, Resolver};
use crate::models::Reflected;
use crate::GraphkitError;

/// Logs field name, latency and outcome of every call at debug level.
pub fn logging() -> Middleware {
    Middleware::around(|params: ResolveParams, next: Resolver| async move {
        let field = params.field_name.clone();
        let started = Instant::now();
        let result = next.call(params).await;
        debug!(
            field = %field,
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            ok = result.is_ok(),
            "resolved field"
        );
        result
    })
}

/// Fails with "insufficient permissions" unless the caller has `role`.
///
/// The role is read from the context value `role`, then from the
/// authenticated user's roles.
pub fn require_role(role: impl Into<String>) -> Middleware {
    let role: Arc<str> = Arc::from(role.into());
    Middleware::around(move |params: ResolveParams, next: Resolver| {
        let role = role.clone();
        async move {
            let from_value = params
                .context
                .value("role")
                .and_then(|v| v.as_str())
                .map(|r| r == &*role)
                .unwrap_or(false);
            let from_user = params
                .context
                .user_details()
                .map(|user| user.has_role(&role))
                .unwrap_or(false);

            if from_value || from_user {
                next.call(params).await
            } else {
                Err(GraphkitError::Authorization("insufficient permissions".into()))
            }
        }
    })
}

/// Memoises successful results under `key(params)`; errors are not cached.
pub fn cached<K>(key: K) -> Middleware
where
    K: Fn(&ResolveParams) -> String + Send + Sync + 'static,
{
    let store: Arc<DashMap<String, Reflected>> = Arc::new(DashMap::new());
    let key = Arc::new(key);

    Middleware::new(move |next: Resolver| {
        let store = store.clone();
        let key = key.clone();
        Resolver::new(move |params: ResolveParams| {
            let store = store.clone();
            let next = next.clone();
            let cache_key = key(&params);
            async move {
                let hit = store.get(&cache_key).map(|entry| entry.value().clone());
                if let Some(value) = hit {
                    return Ok(value);
                }
                let value = next.call(params).await?;
                store.insert(cache_key, value.clone());
                Ok(value)
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::RequestContext;
    use crate::models::BasicUser;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(calls: Arc<AtomicUsize>) -> Resolver {
        Resolver::new(move |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Ok(Reflected::Int(n as i64)))
        })
    }

    #[tokio::test]
    async fn cache_reuses_results_per_key() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = cached(|p: &ResolveParams| p.field_name.clone()).apply(counting(calls.clone()));

        resolver.call(ResolveParams::new("a")).await.unwrap();
        resolver.call(ResolveParams::new("a")).await.unwrap();
        resolver.call(ResolveParams::new("b")).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cache_skips_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let failing = Resolver::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Err(GraphkitError::resolver("nope")))
        });
        let resolver = cached(|_: &ResolveParams| "k".to_string()).apply(failing);

        assert!(resolver.call(ResolveParams::new("f")).await.is_err());
        assert!(resolver.call(ResolveParams::new("f")).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn require_role_accepts_user_roles() {
        let calls = Arc::new(AtomicUsize::new(0));
        let guarded = require_role("editor").apply(counting(calls));
        let user = BasicUser::new("u1").with_roles(["editor"]);
        let params = ResolveParams::new("f")
            .with_context(RequestContext::new().with_user(Arc::new(user)));

        assert!(guarded.call(params).await.is_ok());

        let err = guarded.call(ResolveParams::new("f")).await.unwrap_err();
        assert_eq!(err.to_string(), "insufficient permissions");
    }

    #[tokio::test]
    async fn logging_passes_results_through() {
        let calls = Arc::new(AtomicUsize::new(0));
        let logged = logging().apply(counting(calls));
        assert_eq!(logged.call(ResolveParams::new("f")).await.unwrap(), Reflected::Int(0));
    }
}
