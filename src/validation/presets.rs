//! Ready-made rule bundles.

use super::rules::{self, ValidationRule};

/// Production defaults: depth 10, complexity 200, 4 aliases, no introspection.
pub fn security() -> Vec<ValidationRule> {
    vec![
        rules::max_depth(10),
        rules::max_complexity(200),
        rules::max_aliases(4),
        rules::no_introspection(),
    ]
}

pub fn strict_security() -> Vec<ValidationRule> {
    vec![
        rules::max_depth(8),
        rules::max_complexity(150),
        rules::max_aliases(3),
        rules::max_tokens(500),
        rules::no_introspection(),
    ]
}

/// Loose limits that keep introspection available.
pub fn development() -> Vec<ValidationRule> {
    vec![rules::max_depth(20), rules::max_complexity(500)]
}

/// Concatenates bundles, keeping their order.
pub fn combine<I>(bundles: I) -> Vec<ValidationRule>
where
    I: IntoIterator<Item = Vec<ValidationRule>>,
{
    bundles.into_iter().flatten().collect()
}
