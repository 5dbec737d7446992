// Native type metadata for Graphkit
// These are the executor-neutral building blocks the schema engine consumes

//! # Models Module
//!
//! - `reflect`: the [`Reflect`](reflect::Reflect) trait, record shapes and
//!   the implementations for standard library types
//! - `value`: [`Reflected`](value::Reflected) values produced by `reflect()`
//! - `datetime`: the minute-precision wire format of the `DateTime` scalar
//! - `user`: the [`UserDetails`](user::UserDetails) capability interface

pub mod datetime;
pub mod reflect;
pub mod user;
pub mod value;

pub use datetime::{format_datetime, parse_datetime, DATETIME_FORMAT};
pub use reflect::{FieldShape, RecordShape, Reflect, ScalarKind, Shape};
pub use user::{BasicUser, UserDetails};
pub use value::{Record, Reflected};
