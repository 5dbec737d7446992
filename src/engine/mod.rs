// Graphkit schema engine
// Everything between a native Rust type and an executable GraphQL schema

//! # Engine Module
//!
//! The engine turns reflected record shapes into an executable schema.
//!
//! ## Engine Components
//!
//! ### Type Registry (`registry`)
//! - Name-keyed intern tables for object and input types
//! - Double-checked insertion so one name maps to one descriptor
//!
//! ### Schema Synthesiser (`synth`)
//! - Field naming, type mapping, embedding and wrapper detection
//! - Input objects, argument maps and `<T>Connection` envelopes
//!
//! ### Resolver Builder (`builder`)
//! - Fluent root-field assembly with middleware and per-field customisations
//! - Typed arguments decoded by `args`
//!
//! ### Schema Assembly (`schema`)
//! - Materialises root fields and every reachable type onto the executor
//!
//! ## Rust Learning Notes:
//!
//! ### Module Organization Pattern
//! Each concern lives in its own file and the commonly used types are
//! re-exported from the crate root, so callers rarely name these paths.

pub mod args;
pub mod builder;
pub mod context;
pub mod defaults;
pub mod middleware;
pub mod pagination;
pub mod registry;
pub mod resolver;
pub mod schema;
pub mod synth;
pub mod types;
