// Graphkit server implementations
// Exposes a synthesised schema over HTTP and WebSocket

//! # Graphkit Server Module
//!
//! This module exposes a [`GraphkitSchema`](crate::engine::schema::GraphkitSchema)
//! to network clients. It sits on top of the engine and validation layers.
//!
//! ## Server Architecture
//!
//! ```text
//! Client
//!        ↓ HTTP POST/GET, WebSocket upgrade
//! graphql    ← axum router, GraphiQL, upgrade negotiation
//!        ↓
//! handler    ← token → user details → validation → execution → sanitisation
//! websocket  ← graphql-transport-ws / graphql-ws session per connection
//!        ↓
//! Engine Layer ← schema, resolvers, pub/sub
//! ```
//!
//! ## Rust Learning Notes:
//!
//! The HTTP logic lives in [`handler::GraphQLHandler`], which knows nothing
//! about axum extractors. The router only translates requests into
//! [`handler::GraphQLPayload`] values and bodies back into responses, which
//! keeps the behaviour testable without a socket.

pub mod auth;
pub mod config;
pub mod graphql;
pub mod handler;
pub mod sanitize;
pub mod websocket;

#[cfg(test)]
mod websocket_tests;

pub use config::{ServerConfig, ServerSettings};
pub use graphql::{router, GraphQLServer, GraphQLServerBuilder};
pub use handler::{GraphQLHandler, GraphQLPayload, SharedHandler};
