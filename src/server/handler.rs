//! # GraphQL Request Handling
//!
//! [`GraphQLHandler`] runs one HTTP-style request end to end, independent of
//! the web framework: token extraction, user lookup, validation, execution
//! and sanitisation. The axum handlers in `graphql` only translate requests
//! and responses.

use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::auth::bearer_token;
use super::config::ServerConfig;
use super::sanitize::sanitize_response;
use crate::engine::context::RequestContext;
use crate::engine::schema::{ExecutionRequest, GraphkitSchema};
use crate::models::UserDetails;
use crate::validation::{self, presets, ValidationFailure, ValidationRule};
use crate::Result;

/// The body of a GraphQL request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphQLPayload {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub variables: Option<Value>,
    #[serde(default, rename = "operationName")]
    pub operation_name: Option<String>,
}

impl GraphQLPayload {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

pub struct GraphQLHandler {
    schema: GraphkitSchema,
    config: ServerConfig,
    rules: Vec<ValidationRule>,
}

impl GraphQLHandler {
    pub fn new(schema: GraphkitSchema, config: ServerConfig) -> Self {
        let rules = match &config.validation_rules {
            Some(rules) => rules.clone(),
            None if config.enable_validation => presets::security(),
            None => Vec::new(),
        };
        Self {
            schema,
            config,
            rules,
        }
    }

    pub fn schema(&self) -> &GraphkitSchema {
        &self.schema
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn rules(&self) -> &[ValidationRule] {
        &self.rules
    }

    /// The raw token of a request, via the configured extractor if any.
    pub fn extract_token(&self, headers: &HeaderMap) -> String {
        match &self.config.token_extractor {
            Some(extract) => extract(headers).trim().to_string(),
            None => bearer_token(headers),
        }
    }

    /// Request context carrying the configured root object.
    pub fn base_context(&self, headers: &HeaderMap) -> RequestContext {
        match &self.config.root_object {
            Some(root) => RequestContext::new().with_root(root(headers)),
            None => RequestContext::new(),
        }
    }

    /// Attaches the user behind `token`; an empty token stays anonymous.
    pub async fn authenticate(&self, ctx: RequestContext, token: &str) -> Result<RequestContext> {
        if token.is_empty() {
            return Ok(ctx);
        }
        let ctx = ctx.with_token(token);
        match &self.config.user_details {
            Some(lookup) => {
                let (ctx, user) = lookup(ctx, token.to_string()).await?;
                Ok(ctx.with_user(user))
            }
            None => Ok(ctx),
        }
    }

    /// Applies the configured rules; does nothing in debug mode when
    /// `skip_in_debug` is set.
    pub fn validate(
        &self,
        query: &str,
        user: Option<&dyn UserDetails>,
    ) -> std::result::Result<(), ValidationFailure> {
        let options = &self.config.validation_options;
        if self.config.debug && options.skip_in_debug {
            return Ok(());
        }
        validation::execute(query, Some(self.schema.index()), &self.rules, user, options)
    }

    /// Runs `payload` and returns the status code and JSON body.
    pub async fn process(&self, payload: GraphQLPayload, headers: &HeaderMap) -> (StatusCode, Value) {
        if payload.query.trim().is_empty() {
            return (StatusCode::BAD_REQUEST, error_body("query is required"));
        }

        let token = self.extract_token(headers);
        let ctx = match self.authenticate(self.base_context(headers), &token).await {
            Ok(ctx) => ctx,
            Err(err) => {
                warn!("authentication failed: {}", err);
                return (StatusCode::BAD_REQUEST, error_body("authentication failed"));
            }
        };

        if let Err(failure) = self.validate(&payload.query, ctx.user_details()) {
            debug!(errors = failure.errors().len(), "query rejected by validation");
            return (StatusCode::BAD_REQUEST, validation_body(&failure));
        }

        let mut request = ExecutionRequest::new(payload.query).context(ctx);
        if let Some(variables) = payload.variables.filter(|v| !v.is_null()) {
            request = request.variables(variables);
        }
        if let Some(name) = payload.operation_name.filter(|n| !n.is_empty()) {
            request = request.operation_name(name);
        }

        let response = self.schema.execute(request).await;
        let mut body = match serde_json::to_value(&response) {
            Ok(body) => body,
            Err(err) => {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_body(&format!("failed to encode response: {err}")),
                )
            }
        };
        if self.config.enable_sanitization && !self.config.debug {
            sanitize_response(&mut body);
        }
        (StatusCode::OK, body)
    }

    /// Encodes `body`, pretty-printed when configured.
    pub fn render(&self, body: &Value) -> String {
        let encoded = if self.config.pretty {
            serde_json::to_string_pretty(body)
        } else {
            serde_json::to_string(body)
        };
        encoded.unwrap_or_else(|_| r#"{"errors":[{"message":"failed to encode response"}]}"#.to_string())
    }
}

pub fn error_body(message: &str) -> Value {
    json!({ "errors": [{ "message": message }] })
}

/// `{"errors": [{message, rule, path?}, ..]}`
pub fn validation_body(failure: &ValidationFailure) -> Value {
    json!({ "errors": failure.errors() })
}

pub type SharedHandler = Arc<GraphQLHandler>;
