//! Derive support for `graphkit`.
//!
//! `#[derive(Reflect)]` records the metadata of a struct with named fields
//! (declared field names, serde renames, GraphQL options, doc comments and the
//! shape of every field type) so that the schema synthesiser can derive GraphQL
//! object, input and argument definitions from it at run time.
//!
//! ```ignore
//! #[derive(Reflect, Serialize, Deserialize)]
//! #[serde(rename_all = "camelCase")]
//! struct User {
//!     /// Unique identifier
//!     #[graphql(required)]
//!     id: String,
//!     display_name: Option<String>,
//!     #[serde(skip)]
//!     password_hash: String,
//! }
//! ```

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

mod attrs;
mod case;
mod expand;

#[proc_macro_derive(Reflect, attributes(graphql, serde))]
pub fn derive_reflect(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand::derive(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
