//! Bearer token extraction and JWT-backed user details.

use std::sync::Arc;

use axum::http::{header::AUTHORIZATION, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::config::{user_details_fn, UserDetailsFn};
use crate::models::{BasicUser, UserDetails};
use crate::GraphkitError;

/// The token of an `Authorization: Bearer <token>` header, or an empty string.
pub fn bearer_token(headers: &HeaderMap) -> String {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(strip_bearer)
        .unwrap_or_default()
        .to_string()
}

/// Strips a case-insensitive `Bearer` scheme and trims the rest.
///
/// `None` when `value` uses another scheme.
pub fn strip_bearer(value: &str) -> Option<&str> {
    let value = value.trim();
    let scheme = value.get(..6)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let rest = &value[6..];
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.trim())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub exp: usize,
}

/// User details decoded from HS256 tokens signed with `secret`.
pub fn jwt_user_details(secret: &str) -> UserDetailsFn {
    let key = Arc::new(DecodingKey::from_secret(secret.as_bytes()));
    user_details_fn(move |ctx, token: String| {
        let key = key.clone();
        async move {
            let data = decode::<Claims>(&token, &key, &Validation::new(Algorithm::HS256))
                .map_err(|err| {
                    warn!("rejected bearer token: {}", err);
                    GraphkitError::Authentication("invalid token".into())
                })?;
            let claims = data.claims;
            let user: Arc<dyn UserDetails> = Arc::new(
                BasicUser::new(claims.sub)
                    .with_roles(claims.roles)
                    .with_permissions(claims.permissions),
            );
            Ok((ctx, user))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::RequestContext;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};

    #[test]
    fn bearer_extraction_boundaries() {
        assert_eq!(strip_bearer("Bearer"), Some(""));
        assert_eq!(strip_bearer("bearer \t tok "), Some("tok"));
        assert_eq!(strip_bearer("BEARER tok"), Some("tok"));
        assert_eq!(strip_bearer("Basic abc"), None);
        assert_eq!(strip_bearer("Bearertok"), None);

        assert_eq!(bearer_token(&HeaderMap::new()), "");
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), "abc");
    }

    #[tokio::test]
    async fn jwt_tokens_become_users() {
        let claims = Claims {
            sub: "u1".into(),
            roles: vec!["admin".into()],
            permissions: vec![],
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"s3cret"),
        )
        .unwrap();

        let lookup = jwt_user_details("s3cret");
        let (_, user) = lookup(RequestContext::new(), token).await.unwrap();
        assert_eq!(user.id(), Some("u1"));
        assert!(user.has_role("admin"));

        let err = lookup(RequestContext::new(), "garbage".into()).await.err().unwrap();
        assert!(matches!(err, GraphkitError::Authentication(_)));
    }
}
