//! # Validation Rules
//!
//! Each constructor returns an enabled [`ValidationRule`]. Rule ids are the
//! `rule` tags clients see in error responses; the role and permission rules
//! append the guarded field name (`RoleRule:deleteUser`).

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use super::{ValidationContext, ValidationError};
use crate::engine::types::OperationKind;

pub const MAX_DEPTH: &str = "MaxDepthRule";
pub const MAX_COMPLEXITY: &str = "MaxComplexityRule";
pub const MAX_ALIASES: &str = "MaxAliasesRule";
pub const NO_INTROSPECTION: &str = "NoIntrospectionRule";
pub const MAX_TOKENS: &str = "MaxTokensRule";
pub const REQUIRE_AUTH: &str = "RequireAuthRule";
pub const ROLE: &str = "RoleRule";
pub const PERMISSION: &str = "PermissionRule";
pub const BLOCKED_FIELDS: &str = "BlockedFieldsRule";
pub const RATE_LIMIT: &str = "RateLimitRule";

type CheckFn = dyn Fn(&ValidationContext<'_>) -> Result<(), ValidationError> + Send + Sync;

#[derive(Clone)]
pub struct ValidationRule {
    id: String,
    enabled: bool,
    check: Arc<CheckFn>,
}

impl ValidationRule {
    pub fn new<F>(id: impl Into<String>, check: F) -> Self
    where
        F: Fn(&ValidationContext<'_>) -> Result<(), ValidationError> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            enabled: true,
            check: Arc::new(check),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn validate(&self, ctx: &ValidationContext<'_>) -> Result<(), ValidationError> {
        (self.check)(ctx)
    }
}

impl fmt::Debug for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationRule")
            .field("id", &self.id)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Rejects selection sets nested deeper than `limit`.
pub fn max_depth(limit: usize) -> ValidationRule {
    ValidationRule::new(MAX_DEPTH, move |ctx| {
        let depth = ctx.depth();
        if depth > limit {
            let path = ctx
                .fields()
                .find(|f| f.depth == depth)
                .map(|f| f.path.clone())
                .unwrap_or_default();
            return Err(ValidationError::new(
                MAX_DEPTH,
                format!("query depth {depth} exceeds maximum of {limit}"),
            )
            .with_path(path));
        }
        Ok(())
    })
}

pub fn max_complexity(limit: u64) -> ValidationRule {
    ValidationRule::new(MAX_COMPLEXITY, move |ctx| {
        let complexity = ctx.complexity();
        if complexity > limit {
            return Err(ValidationError::new(
                MAX_COMPLEXITY,
                format!("query complexity {complexity} exceeds maximum of {limit}"),
            ));
        }
        Ok(())
    })
}

pub fn max_aliases(limit: usize) -> ValidationRule {
    ValidationRule::new(MAX_ALIASES, move |ctx| {
        let aliases = ctx.alias_count();
        if aliases > limit {
            return Err(ValidationError::new(
                MAX_ALIASES,
                format!("query uses {aliases} aliases, maximum is {limit}"),
            ));
        }
        Ok(())
    })
}

/// Rejects any selection whose name starts with `__`, including `__typename`.
pub fn no_introspection() -> ValidationRule {
    ValidationRule::new(NO_INTROSPECTION, |ctx| {
        match ctx.fields().find(|f| f.name.starts_with("__")) {
            Some(field) => Err(ValidationError::new(
                NO_INTROSPECTION,
                format!("introspection is disabled (`{}`)", field.name),
            )
            .with_path(field.path.clone())),
            None => Ok(()),
        }
    })
}

/// Counts whitespace separated tokens of the raw query text.
pub fn max_tokens(limit: usize) -> ValidationRule {
    ValidationRule::new(MAX_TOKENS, move |ctx| {
        let tokens = ctx.token_count();
        if tokens > limit {
            return Err(ValidationError::new(
                MAX_TOKENS,
                format!("query has {tokens} tokens, maximum is {limit}"),
            ));
        }
        Ok(())
    })
}

/// Requires an authenticated user for the listed operation kinds and for
/// any selection of the listed fields.
pub fn require_auth<K, F, S>(kinds: K, fields: F) -> ValidationRule
where
    K: IntoIterator<Item = OperationKind>,
    F: IntoIterator<Item = S>,
    S: Into<String>,
{
    let kinds: HashSet<OperationKind> = kinds.into_iter().collect();
    let fields: HashSet<String> = fields.into_iter().map(Into::into).collect();

    ValidationRule::new(REQUIRE_AUTH, move |ctx| {
        if ctx.user.is_some() {
            return Ok(());
        }
        if let Some(op) = ctx.operations().iter().find(|op| kinds.contains(&op.kind)) {
            return Err(ValidationError::new(
                REQUIRE_AUTH,
                format!("authentication required for {}", op.kind),
            ));
        }
        if let Some(field) = ctx.fields().find(|f| fields.contains(&f.name)) {
            return Err(ValidationError::new(
                REQUIRE_AUTH,
                format!("authentication required for field `{}`", field.name),
            )
            .with_path(field.path.clone()));
        }
        Ok(())
    })
}

/// Selecting `field` requires at least one of `roles`.
pub fn role<I, S>(field: impl Into<String>, roles: I) -> ValidationRule
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let field = field.into();
    let roles: Vec<String> = roles.into_iter().map(Into::into).collect();
    let id = format!("{ROLE}:{field}");

    ValidationRule::new(id.clone(), move |ctx| {
        let Some(visit) = ctx.fields().find(|f| f.name == field) else {
            return Ok(());
        };
        let granted = ctx
            .user
            .and_then(|user| user.roles())
            .map(|held| held.iter().any(|r| roles.contains(r)))
            .unwrap_or(false);
        if granted {
            Ok(())
        } else {
            Err(ValidationError::new(
                id.clone(),
                format!("field `{field}` requires one of the roles: {}", roles.join(", ")),
            )
            .with_path(visit.path.clone()))
        }
    })
}

/// Selecting `field` requires at least one of `permissions`.
pub fn permission<I, S>(field: impl Into<String>, permissions: I) -> ValidationRule
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let field = field.into();
    let permissions: Vec<String> = permissions.into_iter().map(Into::into).collect();
    let id = format!("{PERMISSION}:{field}");

    ValidationRule::new(id.clone(), move |ctx| {
        let Some(visit) = ctx.fields().find(|f| f.name == field) else {
            return Ok(());
        };
        let granted = ctx
            .user
            .and_then(|user| user.permissions())
            .map(|held| held.iter().any(|p| permissions.contains(p)))
            .unwrap_or(false);
        if granted {
            Ok(())
        } else {
            Err(ValidationError::new(
                id.clone(),
                format!(
                    "field `{field}` requires one of the permissions: {}",
                    permissions.join(", ")
                ),
            )
            .with_path(visit.path.clone()))
        }
    })
}

/// Forbids the named fields; the optional reason is appended to the message.
pub fn blocked_fields<I, S>(fields: I) -> ValidationRule
where
    I: IntoIterator<Item = (S, Option<String>)>,
    S: Into<String>,
{
    let blocked: HashMap<String, Option<String>> = fields
        .into_iter()
        .map(|(name, reason)| (name.into(), reason))
        .collect();

    ValidationRule::new(BLOCKED_FIELDS, move |ctx| {
        for field in ctx.fields() {
            if let Some(reason) = blocked.get(&field.name) {
                let message = match reason {
                    Some(reason) => format!("field `{}` is blocked: {reason}", field.name),
                    None => format!("field `{}` is blocked", field.name),
                };
                return Err(ValidationError::new(BLOCKED_FIELDS, message).with_path(field.path.clone()));
            }
        }
        Ok(())
    })
}

type BudgetFn = dyn Fn(&str) -> u64 + Send + Sync;

/// Settings of [`rate_limit`].
#[derive(Clone)]
pub struct RateLimit {
    /// Cost of one unit of query complexity
    pub cost_per_unit: u64,
    /// Remaining budget of the user with the given id
    pub budget: Arc<BudgetFn>,
    /// Users holding any of these roles are never limited
    pub bypass_roles: Vec<String>,
}

impl RateLimit {
    pub fn new<F>(cost_per_unit: u64, budget: F) -> Self
    where
        F: Fn(&str) -> u64 + Send + Sync + 'static,
    {
        Self {
            cost_per_unit,
            budget: Arc::new(budget),
            bypass_roles: Vec::new(),
        }
    }

    pub fn bypass_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bypass_roles = roles.into_iter().map(Into::into).collect();
        self
    }
}

/// Rejects queries whose cost (complexity times cost per unit) exceeds the
/// caller's budget.
pub fn rate_limit(config: RateLimit) -> ValidationRule {
    ValidationRule::new(RATE_LIMIT, move |ctx| {
        let Some(user) = ctx.user else {
            return Err(ValidationError::new(RATE_LIMIT, "rate limiting requires an authenticated user"));
        };
        if config.bypass_roles.iter().any(|role| user.has_role(role)) {
            return Ok(());
        }
        let Some(id) = user.id() else {
            return Err(ValidationError::new(RATE_LIMIT, "rate limiting requires a user id"));
        };

        let cost = ctx.complexity().saturating_mul(config.cost_per_unit);
        let budget = (config.budget)(id);
        if cost > budget {
            return Err(ValidationError::new(
                RATE_LIMIT,
                format!("query cost {cost} exceeds remaining budget of {budget}"),
            ));
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BasicUser, UserDetails};
    use crate::validation::{execute, ValidationFailure, ValidationOptions};

    fn check(query: &str, rule: ValidationRule, user: Option<&dyn UserDetails>) -> Result<(), ValidationFailure> {
        execute(query, None, &[rule], user, &ValidationOptions::default())
    }

    fn nested(depth: usize) -> String {
        let mut query = String::new();
        for level in 0..depth {
            query.push_str(&format!("{{ f{level} "));
        }
        for _ in 0..depth {
            query.push('}');
        }
        query
    }

    #[test]
    fn depth_limit_is_inclusive() {
        assert!(check(&nested(10), max_depth(10), None).is_ok());

        let err = check(&nested(11), max_depth(10), None).unwrap_err();
        assert_eq!(err.errors()[0].rule, MAX_DEPTH);
        assert_eq!(err.errors()[0].path.as_ref().map(Vec::len), Some(11));
    }

    #[test]
    fn introspection_roots_are_rejected() {
        for query in ["{ __schema { types { name } } }", r#"{ __type(name: "Query") { name } }"#] {
            let err = check(query, no_introspection(), None).unwrap_err();
            assert_eq!(err.errors()[0].rule, NO_INTROSPECTION);
        }
        assert!(check("{ hello }", no_introspection(), None).is_ok());
    }

    #[test]
    fn aliases_and_tokens() {
        assert!(check("{ a: x b: x }", max_aliases(2), None).is_ok());
        assert!(check("{ a: x b: x c: x }", max_aliases(2), None).is_err());
        assert!(check("{ a b c }", max_tokens(5), None).is_ok());
        assert!(check("{ a b c d e }", max_tokens(5), None).is_err());
    }

    #[test]
    fn complexity_limit() {
        assert!(check("{ items(limit: 3) { id } }", max_complexity(4), None).is_ok());
        assert!(check("{ items(limit: 30) { id } }", max_complexity(4), None).is_err());
    }

    #[test]
    fn require_auth_by_kind_and_field() {
        let user = BasicUser::new("u1");
        let by_kind = || require_auth([OperationKind::Mutation], Vec::<String>::new());
        assert!(check("mutation { a }", by_kind(), None).is_err());
        assert!(check("mutation { a }", by_kind(), Some(&user)).is_ok());
        assert!(check("{ a }", by_kind(), None).is_ok());

        let by_field = || require_auth(Vec::<OperationKind>::new(), ["me"]);
        let err = check("{ me { id } }", by_field(), None).unwrap_err();
        assert_eq!(err.errors()[0].rule, REQUIRE_AUTH);
    }

    #[test]
    fn role_rule_is_tagged_with_the_field() {
        let member = BasicUser::new("u1").with_roles(["user"]);
        let admin = BasicUser::new("u2").with_roles(["admin"]);

        let err = check("{ deleteUser }", role("deleteUser", ["admin"]), Some(&member)).unwrap_err();
        assert_eq!(err.errors()[0].rule, "RoleRule:deleteUser");
        assert!(check("{ deleteUser }", role("deleteUser", ["admin"]), Some(&admin)).is_ok());
        assert!(check("{ other }", role("deleteUser", ["admin"]), None).is_ok());
    }

    #[test]
    fn permission_rule() {
        let reader = BasicUser::new("u1").with_permissions(["read"]);
        let err = check("{ purge }", permission("purge", ["write"]), Some(&reader)).unwrap_err();
        assert_eq!(err.errors()[0].rule, "PermissionRule:purge");
        assert!(check("{ purge }", permission("purge", ["read"]), Some(&reader)).is_ok());
    }

    #[test]
    fn blocked_fields_report_the_reason() {
        let rule = || blocked_fields([("legacy", Some("use `modern`".to_string()))]);
        let err = check("{ a { legacy } }", rule(), None).unwrap_err();
        assert_eq!(err.errors()[0].message, "field `legacy` is blocked: use `modern`");
        assert!(check("{ modern }", rule(), None).is_ok());
    }

    #[test]
    fn rate_limit_compares_cost_to_budget() {
        let limit = || RateLimit::new(2, |id| if id == "rich" { 1_000 } else { 3 }).bypass_roles(["admin"]);
        let rich = BasicUser::new("rich");
        let poor = BasicUser::new("poor");
        let admin = BasicUser::new("poor").with_roles(["admin"]);

        assert!(check("{ a b }", rate_limit(limit()), Some(&rich)).is_ok());
        let err = check("{ a b }", rate_limit(limit()), Some(&poor)).unwrap_err();
        assert_eq!(err.errors()[0].rule, RATE_LIMIT);
        assert!(check("{ a b }", rate_limit(limit()), Some(&admin)).is_ok());
        assert!(check("{ a }", rate_limit(limit()), None).is_err());
    }
}
