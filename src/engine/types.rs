use std::fmt;

use async_graphql::dynamic::TypeRef;
use async_graphql::parser::types::OperationType;
use serde::{Deserialize, Serialize};

pub const STRING: &str = "String";
pub const INT: &str = "Int";
pub const FLOAT: &str = "Float";
pub const BOOLEAN: &str = "Boolean";
pub const ID: &str = "ID";
pub const DATETIME: &str = "DateTime";
pub const JSON: &str = "JSON";

/// Types the executor knows without registration.
pub fn is_builtin(name: &str) -> bool {
    matches!(name, STRING | INT | FLOAT | BOOLEAN | ID)
}

/// A GraphQL type expression such as `[User!]!`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeExpr {
    Named(String),
    NonNull(Box<TypeExpr>),
    List(Box<TypeExpr>),
}

impl TypeExpr {
    pub fn named(name: impl Into<String>) -> Self {
        TypeExpr::Named(name.into())
    }

    pub fn non_null(self) -> Self {
        match self {
            TypeExpr::NonNull(_) => self,
            other => TypeExpr::NonNull(Box::new(other)),
        }
    }

    pub fn nullable(self) -> Self {
        match self {
            TypeExpr::NonNull(inner) => *inner,
            other => other,
        }
    }

    pub fn list(self) -> Self {
        TypeExpr::List(Box::new(self))
    }

    pub fn is_non_null(&self) -> bool {
        matches!(self, TypeExpr::NonNull(_))
    }

    /// True when the outermost non-null-stripped type is a list.
    pub fn is_list(&self) -> bool {
        match self {
            TypeExpr::NonNull(inner) => inner.is_list(),
            TypeExpr::List(_) => true,
            TypeExpr::Named(_) => false,
        }
    }

    pub fn named_type(&self) -> &str {
        match self {
            TypeExpr::Named(name) => name,
            TypeExpr::NonNull(inner) | TypeExpr::List(inner) => inner.named_type(),
        }
    }

    pub fn to_type_ref(&self) -> TypeRef {
        match self {
            TypeExpr::Named(name) => TypeRef::named(name.clone()),
            TypeExpr::NonNull(inner) => TypeRef::NonNull(Box::new(inner.to_type_ref())),
            TypeExpr::List(inner) => TypeRef::List(Box::new(inner.to_type_ref())),
        }
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeExpr::Named(name) => write!(f, "{name}"),
            TypeExpr::NonNull(inner) => write!(f, "{inner}!"),
            TypeExpr::List(inner) => write!(f, "[{inner}]"),
        }
    }
}

/// Root operation a field is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub fn root_type(self) -> &'static str {
        match self {
            OperationKind::Query => "Query",
            OperationKind::Mutation => "Mutation",
            OperationKind::Subscription => "Subscription",
        }
    }
}

impl From<OperationType> for OperationKind {
    fn from(ty: OperationType) -> Self {
        match ty {
            OperationType::Query => OperationKind::Query,
            OperationType::Mutation => OperationKind::Mutation,
            OperationType::Subscription => OperationKind::Subscription,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
            OperationKind::Subscription => "subscription",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_type_expressions() {
        let expr = TypeExpr::named("User").non_null().list().non_null();
        assert_eq!(expr.to_string(), "[User!]!");
        assert!(expr.is_list());
        assert_eq!(expr.named_type(), "User");
        assert_eq!(expr.clone().nullable().to_string(), "[User!]");
    }

    #[test]
    fn non_null_is_idempotent() {
        let expr = TypeExpr::named("Int").non_null().non_null();
        assert_eq!(expr.to_string(), "Int!");
    }
}
