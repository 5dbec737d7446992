// Pre-execution validation of GraphQL operations

//! # Validation Module
//!
//! [`execute`] parses a query once, then runs an ordered list of
//! [`ValidationRule`]s over a shared [`ValidationContext`]. Failures are
//! collected in rule order and reported as a single error when there is one,
//! or as a [`MultiValidationError`] otherwise.
//!
//! ## Module Layout
//! - `walker`: flattens the document into per-field visits
//! - `rules`: the rule catalogue
//! - `presets`: ready-made rule bundles
//!
//! ## Rust Learning Notes:
//!
//! ### Sharing work between rules
//! The context walks the document once up front; every rule reads the same
//! `Vec<FieldVisit>` instead of re-traversing the syntax tree.

use std::fmt;

use async_graphql::parser::parse_query;
use async_graphql::parser::types::ExecutableDocument;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::engine::schema::SchemaIndex;
use crate::engine::types::OperationKind;
use crate::models::UserDetails;

pub mod presets;
pub mod rules;
pub mod walker;

pub use rules::{RateLimit, ValidationRule};
pub use walker::{FieldVisit, OperationVisit};

/// Rule id reported for documents that do not parse.
pub const PARSE_RULE: &str = "Parse";

/// How many items a list field is assumed to return without a page size.
pub const DEFAULT_LIST_SIZE: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationOptions {
    /// Return the first failure instead of collecting all of them
    pub stop_on_first_error: bool,
    /// Skip validation entirely when the server runs in debug mode
    pub skip_in_debug: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            stop_on_first_error: false,
            skip_in_debug: true,
        }
    }
}

/// One rule failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
    pub rule: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<String>>,
}

impl ValidationError {
    pub fn new(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            rule: rule.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: Vec<String>) -> Self {
        self.path = Some(path);
        self
    }
}

/// Several rule failures, in the order the rules ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MultiValidationError {
    pub errors: Vec<ValidationError>,
}

impl fmt::Display for MultiValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<&str> = self.errors.iter().map(|e| e.message.as_str()).collect();
        write!(f, "{}", messages.join("; "))
    }
}

impl std::error::Error for MultiValidationError {}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationFailure {
    #[error(transparent)]
    Single(ValidationError),

    #[error(transparent)]
    Multi(MultiValidationError),
}

impl ValidationFailure {
    pub fn errors(&self) -> &[ValidationError] {
        match self {
            ValidationFailure::Single(error) => std::slice::from_ref(error),
            ValidationFailure::Multi(multi) => &multi.errors,
        }
    }

    fn from_errors(mut errors: Vec<ValidationError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop().map(ValidationFailure::Single),
            _ => Some(ValidationFailure::Multi(MultiValidationError { errors })),
        }
    }
}

/// What every rule gets to look at.
pub struct ValidationContext<'a> {
    pub document: &'a ExecutableDocument,
    pub query: &'a str,
    pub schema: Option<&'a SchemaIndex>,
    pub user: Option<&'a dyn UserDetails>,
    pub options: &'a ValidationOptions,
    operations: Vec<OperationVisit>,
}

impl<'a> ValidationContext<'a> {
    pub fn new(
        document: &'a ExecutableDocument,
        query: &'a str,
        schema: Option<&'a SchemaIndex>,
        user: Option<&'a dyn UserDetails>,
        options: &'a ValidationOptions,
    ) -> Self {
        Self {
            document,
            query,
            schema,
            user,
            options,
            operations: walker::walk(document, schema),
        }
    }

    pub fn operations(&self) -> &[OperationVisit] {
        &self.operations
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldVisit> {
        self.operations.iter().flat_map(|op| op.fields.iter())
    }

    pub fn has_operation(&self, kind: OperationKind) -> bool {
        self.operations.iter().any(|op| op.kind == kind)
    }

    /// Deepest selection nesting over all operations.
    pub fn depth(&self) -> usize {
        self.operations.iter().map(OperationVisit::depth).max().unwrap_or(0)
    }

    pub fn alias_count(&self) -> usize {
        self.fields().filter(|f| f.alias.is_some()).count()
    }

    /// Cost of the document: 1 per plain field, and for list fields the
    /// number of selected sub-fields times the page size.
    pub fn complexity(&self) -> u64 {
        self.fields()
            .map(|field| {
                if field.is_list() {
                    let size = field.page_size().unwrap_or(DEFAULT_LIST_SIZE);
                    (field.children.max(1) as u64).saturating_mul(size)
                } else {
                    1
                }
            })
            .fold(0u64, u64::saturating_add)
    }

    pub fn token_count(&self) -> usize {
        self.query.split_whitespace().count()
    }
}

/// Parses `query` and applies the enabled `rules` in order.
pub fn execute(
    query: &str,
    schema: Option<&SchemaIndex>,
    rules: &[ValidationRule],
    user: Option<&dyn UserDetails>,
    options: &ValidationOptions,
) -> Result<(), ValidationFailure> {
    let document = parse_query(query)
        .map_err(|err| ValidationFailure::Single(ValidationError::new(PARSE_RULE, err.to_string())))?;
    let ctx = ValidationContext::new(&document, query, schema, user, options);

    let mut errors = Vec::new();
    for rule in rules.iter().filter(|rule| rule.is_enabled()) {
        if let Err(error) = rule.validate(&ctx) {
            debug!(rule = %error.rule, message = %error.message, "validation rule failed");
            if options.stop_on_first_error {
                return Err(ValidationFailure::Single(error));
            }
            errors.push(error);
        }
    }

    match ValidationFailure::from_errors(errors) {
        Some(failure) => Err(failure),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::rules;

    fn run(query: &str, rules: &[ValidationRule]) -> Result<(), ValidationFailure> {
        execute(query, None, rules, None, &ValidationOptions::default())
    }

    #[test]
    fn parse_errors_use_the_parse_rule() {
        let err = run("{ unclosed", &[]).unwrap_err();
        assert_eq!(err.errors().len(), 1);
        assert_eq!(err.errors()[0].rule, PARSE_RULE);
    }

    #[test]
    fn single_failures_are_not_wrapped() {
        let err = run("{ a { b { c } } }", &[rules::max_depth(2)]).unwrap_err();
        assert!(matches!(err, ValidationFailure::Single(_)));
    }

    #[test]
    fn collects_failures_in_rule_order() {
        let rules = [
            rules::no_introspection(),
            rules::max_aliases(0),
            rules::max_depth(1),
        ];
        let err = run("{ x: __schema { types { name } } }", &rules).unwrap_err();
        let ids: Vec<_> = err.errors().iter().map(|e| e.rule.as_str()).collect();
        assert_eq!(ids, vec![rules::NO_INTROSPECTION, rules::MAX_ALIASES, rules::MAX_DEPTH]);
        assert!(matches!(err, ValidationFailure::Multi(_)));
    }

    #[test]
    fn stop_on_first_error_returns_early() {
        let options = ValidationOptions {
            stop_on_first_error: true,
            ..ValidationOptions::default()
        };
        let rules = [rules::max_aliases(0), rules::max_depth(1)];
        let err = execute("{ x: a { b } }", None, &rules, None, &options).unwrap_err();
        assert_eq!(err.errors()[0].rule, rules::MAX_ALIASES);
        assert!(matches!(err, ValidationFailure::Single(_)));
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let rules = [rules::max_depth(1).enabled(false)];
        assert!(run("{ a { b } }", &rules).is_ok());
    }

    #[test]
    fn complexity_multiplies_list_fields() {
        let document = parse_query("{ a items(limit: 5) { id name } other(first: 2) { id } }").unwrap();
        let options = ValidationOptions::default();
        let query = "";
        let ctx = ValidationContext::new(&document, query, None, None, &options);
        // a = 1, items = 2 * 5, id + name = 2, other = 1 * 2, id = 1
        assert_eq!(ctx.complexity(), 16);
    }

    #[test]
    fn errors_serialise_with_rule_tags() {
        let error = ValidationError::new("MaxDepthRule", "too deep");
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            serde_json::json!({"message": "too deep", "rule": "MaxDepthRule"})
        );
    }
}
