// Graphkit
// A type-driven GraphQL server toolkit: schemas synthesised from native Rust
// types, pluggable validation rules and subscriptions over WebSocket

//! # Graphkit Library
//!
//! This is the library root for Graphkit. It wires together the layers that
//! turn plain Rust structs into a running GraphQL endpoint.
//!
//! ## Core Components
//!
//! ### Reflection (`models`)
//! - [`Reflect`]: build-time metadata for native record types (derived with
//!   `#[derive(Reflect)]`)
//! - [`UserDetails`]: the capability interface that authorisation rules consult
//!
//! ### Schema Engine (`engine`)
//! - [`TypeRegistry`]: process-wide, name-keyed cache of synthesised types
//! - [`Synthesizer`]: maps record shapes onto GraphQL object, input and
//!   argument definitions
//! - [`ResolverBuilder`]: fluent assembly of root fields with middleware and
//!   per-field customisations
//! - [`SchemaBuilder`]: assembles root fields into an executable schema
//!
//! ### Validation (`validation`)
//! Pre-execution rules (depth, complexity, aliases, introspection, tokens,
//! auth, roles, permissions, blocked fields, rate limits) plus presets.
//!
//! ### Pub/Sub (`pubsub`)
//! Topic based fan-out with bounded, non-blocking delivery.
//!
//! ### Server (`server`)
//! HTTP endpoint, GraphiQL playground and the WebSocket subscription
//! transport speaking `graphql-transport-ws` and the legacy `graphql-ws`.
//!
//! **Usage Example:**
//! ```rust,ignore
//! use graphkit::{Reflect, ResolverBuilder, SchemaBuilder};
//!
//! #[derive(Reflect, serde::Serialize)]
//! struct User { id: String, name: String }
//!
//! let users = ResolverBuilder::<User>::query("users")
//!     .list()
//!     .resolve(|_| async { Ok(vec![User { id: "1".into(), name: "Ada".into() }]) })
//!     .build()?;
//! let schema = SchemaBuilder::new().field(users).build()?;
//! ```
//!
//! ## Rust Learning Notes:
//!
//! ### `extern crate self`
//! The derive macro expands to paths like `::graphkit::Reflect`. Aliasing the
//! crate to its own name lets those paths resolve inside this crate as well,
//! so types in here can derive `Reflect` too.

extern crate self as graphkit;

// Reflection metadata, reflected values and user capabilities
pub mod models;

// Type registry, schema synthesis and resolver assembly
pub mod engine;

// Pre-execution validation rules and presets
pub mod validation;

// Topic based publish/subscribe fabric
pub mod pubsub;

// HTTP and WebSocket server
pub mod server;

// The derive macro expands to `::graphkit::reflect::..`
pub use models::reflect;

pub use models::{
    reflect::{Reflect, Reflected, Record, Shape},
    user::{BasicUser, UserDetails},
};

pub use engine::{
    builder::ResolverBuilder,
    context::RequestContext,
    defaults::default_schema,
    middleware,
    pagination::{Connection, PageInfo},
    registry::TypeRegistry,
    resolver::{Middleware, ResolveParams, Resolver, StreamResolver},
    schema::{ExecutionRequest, FieldDescriptor, GraphkitSchema, SchemaBuilder, SchemaIndex},
    synth::Synthesizer,
    types::{OperationKind, TypeExpr},
};

pub use pubsub::{memory::InMemoryPubSub, Message, PubSub, PubSubExt, Subscription};

pub use validation::{
    presets, ValidationError, ValidationFailure, ValidationOptions, ValidationRule,
};

pub use server::{
    config::{ServerConfig, ServerSettings},
    graphql::{GraphQLServer, GraphQLServerBuilder},
    handler::GraphQLHandler,
};

use thiserror::Error;

/// Error type shared by every Graphkit layer
///
/// ## Rust Learning Notes:
///
/// ### The `thiserror` Crate
/// - `#[derive(Error)]` implements `std::error::Error`
/// - `#[error("...")]` provides the display message
/// - `#[from]` enables `?` conversion from the wrapped error type
#[derive(Error, Debug)]
pub enum GraphkitError {
    /// A query document could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// One or more pre-execution validation rules rejected the query
    #[error(transparent)]
    Validation(#[from] ValidationFailure),

    /// Credentials were rejected by the user-details callback
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The caller lacks a role or permission
    #[error("{0}")]
    Authorization(String),

    /// A resolver reported a failure
    #[error("{0}")]
    Resolver(String),

    /// WebSocket framing or protocol violation
    #[error("Transport error: {0}")]
    Transport(String),

    /// The pub/sub fabric has been closed
    #[error("pub/sub fabric is closed")]
    PubSubClosed,

    /// No live subscription carries this id
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    /// The schema could not be assembled
    #[error("Schema error: {0}")]
    Schema(String),

    /// Arguments or payloads did not match the expected shape
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Settings could not be loaded
    #[error("Configuration error: {0}")]
    Configuration(#[from] config::ConfigError),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The owning context was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GraphkitError {
    pub fn resolver(message: impl Into<String>) -> Self {
        GraphkitError::Resolver(message.into())
    }

    /// Converts into the executor's error type, keeping the display message.
    pub fn into_graphql(self) -> async_graphql::Error {
        async_graphql::Error::new(self.to_string())
    }
}

impl From<std::io::Error> for GraphkitError {
    fn from(err: std::io::Error) -> Self {
        GraphkitError::Internal(err.to_string())
    }
}

/// Type alias for Results that use [`GraphkitError`]
pub type Result<T> = std::result::Result<T, GraphkitError>;
