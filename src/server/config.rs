//! Server configuration.
//!
//! [`ServerSettings`] holds what can be written down (file, environment,
//! CLI). [`ServerConfig`] is what the handler actually runs with: the same
//! switches plus the code-level hooks.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use super::auth::jwt_user_details;
use crate::engine::context::{RequestContext, RootObject};
use crate::models::UserDetails;
use crate::pubsub::PubSub;
use crate::validation::{ValidationOptions, ValidationRule};
use crate::Result;

/// Pulls the raw token out of request headers.
pub type TokenExtractor = Arc<dyn Fn(&HeaderMap) -> String + Send + Sync>;

pub type UserDetailsFuture = BoxFuture<'static, Result<(RequestContext, Arc<dyn UserDetails>)>>;

/// Resolves a non-empty token into user details, possibly enriching the
/// request context on the way.
pub type UserDetailsFn = Arc<dyn Fn(RequestContext, String) -> UserDetailsFuture + Send + Sync>;

/// Builds the root object of a request from its headers.
pub type RootObjectFn = Arc<dyn Fn(&HeaderMap) -> RootObject + Send + Sync>;

/// Decides whether a WebSocket upgrade from these headers is allowed.
pub type OriginCheck = Arc<dyn Fn(&HeaderMap) -> bool + Send + Sync>;

pub fn user_details_fn<F, Fut>(f: F) -> UserDetailsFn
where
    F: Fn(RequestContext, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(RequestContext, Arc<dyn UserDetails>)>> + Send + 'static,
{
    Arc::new(move |ctx, token| f(ctx, token).boxed())
}

#[derive(Clone)]
pub struct ServerConfig {
    /// Bypasses validation (when `skip_in_debug`) and sanitisation
    pub debug: bool,
    pub playground: bool,
    pub pretty: bool,
    /// Applies the security preset unless explicit rules are set
    pub enable_validation: bool,
    pub validation_rules: Option<Vec<ValidationRule>>,
    pub validation_options: ValidationOptions,
    /// Strips `Did you mean "..."?` hints from error messages
    pub enable_sanitization: bool,
    pub enable_subscriptions: bool,
    pub cors_enabled: bool,
    pub keep_alive: Duration,
    pub connection_init_timeout: Duration,
    pub token_extractor: Option<TokenExtractor>,
    pub user_details: Option<UserDetailsFn>,
    pub root_object: Option<RootObjectFn>,
    pub check_origin: Option<OriginCheck>,
    pub pubsub: Option<Arc<dyn PubSub>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            debug: false,
            playground: false,
            pretty: false,
            enable_validation: true,
            validation_rules: None,
            validation_options: ValidationOptions::default(),
            enable_sanitization: true,
            enable_subscriptions: true,
            cors_enabled: true,
            keep_alive: Duration::from_secs(30),
            connection_init_timeout: Duration::from_secs(10),
            token_extractor: None,
            user_details: None,
            root_object: None,
            check_origin: None,
            pubsub: None,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &ServerSettings) -> Self {
        let mut config = Self {
            debug: settings.debug,
            playground: settings.playground,
            pretty: settings.pretty,
            enable_validation: settings.enable_validation,
            validation_options: settings.validation.clone(),
            enable_sanitization: settings.enable_sanitization,
            enable_subscriptions: settings.enable_subscriptions,
            cors_enabled: settings.cors_enabled,
            keep_alive: Duration::from_secs(settings.keep_alive_secs),
            connection_init_timeout: Duration::from_secs(settings.connection_init_timeout_secs),
            ..Self::default()
        };
        if let Some(secret) = settings.jwt_secret.as_deref().filter(|s| !s.is_empty()) {
            config.user_details = Some(jwt_user_details(secret));
        }
        config
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn playground(mut self, enabled: bool) -> Self {
        self.playground = enabled;
        self
    }

    pub fn pretty(mut self, enabled: bool) -> Self {
        self.pretty = enabled;
        self
    }

    pub fn enable_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = enabled;
        self
    }

    /// Replaces the preset with an explicit rule list.
    pub fn validation_rules(mut self, rules: Vec<ValidationRule>) -> Self {
        self.validation_rules = Some(rules);
        self
    }

    pub fn validation_options(mut self, options: ValidationOptions) -> Self {
        self.validation_options = options;
        self
    }

    pub fn enable_sanitization(mut self, enabled: bool) -> Self {
        self.enable_sanitization = enabled;
        self
    }

    pub fn enable_subscriptions(mut self, enabled: bool) -> Self {
        self.enable_subscriptions = enabled;
        self
    }

    pub fn keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = interval;
        self
    }

    pub fn connection_init_timeout(mut self, timeout: Duration) -> Self {
        self.connection_init_timeout = timeout;
        self
    }

    pub fn token_extractor<F>(mut self, f: F) -> Self
    where
        F: Fn(&HeaderMap) -> String + Send + Sync + 'static,
    {
        self.token_extractor = Some(Arc::new(f));
        self
    }

    pub fn user_details(mut self, f: UserDetailsFn) -> Self {
        self.user_details = Some(f);
        self
    }

    pub fn root_object<F>(mut self, f: F) -> Self
    where
        F: Fn(&HeaderMap) -> RootObject + Send + Sync + 'static,
    {
        self.root_object = Some(Arc::new(f));
        self
    }

    pub fn check_origin<F>(mut self, f: F) -> Self
    where
        F: Fn(&HeaderMap) -> bool + Send + Sync + 'static,
    {
        self.check_origin = Some(Arc::new(f));
        self
    }

    pub fn pubsub(mut self, pubsub: Arc<dyn PubSub>) -> Self {
        self.pubsub = Some(pubsub);
        self
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("debug", &self.debug)
            .field("playground", &self.playground)
            .field("pretty", &self.pretty)
            .field("enable_validation", &self.enable_validation)
            .field("validation_rules", &self.validation_rules)
            .field("validation_options", &self.validation_options)
            .field("enable_sanitization", &self.enable_sanitization)
            .field("enable_subscriptions", &self.enable_subscriptions)
            .field("keep_alive", &self.keep_alive)
            .field("connection_init_timeout", &self.connection_init_timeout)
            .field("has_user_details", &self.user_details.is_some())
            .finish()
    }
}

/// Settings read from `graphkit.toml` and `GRAPHKIT_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub debug: bool,
    pub playground: bool,
    pub pretty: bool,
    pub enable_validation: bool,
    pub enable_sanitization: bool,
    pub enable_subscriptions: bool,
    pub cors_enabled: bool,
    pub keep_alive_secs: u64,
    pub connection_init_timeout_secs: u64,
    pub jwt_secret: Option<String>,
    pub validation: ValidationOptions,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            debug: false,
            playground: true,
            pretty: false,
            enable_validation: true,
            enable_sanitization: true,
            enable_subscriptions: true,
            cors_enabled: true,
            keep_alive_secs: 30,
            connection_init_timeout_secs: 10,
            jwt_secret: None,
            validation: ValidationOptions::default(),
        }
    }
}

impl ServerSettings {
    /// Layers the optional file at `path` under `GRAPHKIT_` variables
    /// (`GRAPHKIT_VALIDATION__STOP_ON_FIRST_ERROR=true`).
    pub fn load(path: &str) -> Result<Self> {
        let builder = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("GRAPHKIT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        Self::from_builder(builder)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;
    use tokio_test::assert_ok;

    #[test]
    fn missing_file_yields_defaults() {
        let settings = assert_ok!(ServerSettings::load("does-not-exist"));
        assert_eq!(settings.keep_alive_secs, 30);
        assert!(settings.validation.skip_in_debug);
    }

    #[test]
    fn file_values_override_defaults() {
        let builder = Config::builder().add_source(File::from_str(
            "port = 8081\ndebug = true\n[validation]\nstop_on_first_error = true\n",
            FileFormat::Toml,
        ));
        let settings = assert_ok!(ServerSettings::from_builder(builder));

        assert_eq!(settings.address(), "0.0.0.0:8081");
        assert!(settings.debug);
        assert!(settings.validation.stop_on_first_error);
        assert!(settings.validation.skip_in_debug);
    }

    #[test]
    fn settings_carry_into_config() {
        let settings = ServerSettings {
            jwt_secret: Some("s3cret".into()),
            keep_alive_secs: 5,
            ..ServerSettings::default()
        };
        let config = ServerConfig::from_settings(&settings);

        assert!(config.user_details.is_some());
        assert_eq!(config.keep_alive, Duration::from_secs(5));
        assert!(config.playground);
    }
}
