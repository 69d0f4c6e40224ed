//! Shared validation predicates for domain types.
//!
//! This module contains validation functions used by nutype-based domain types
//! across the eventtable crate.

/// Validation predicate: accept only lower-case SQL identifiers.
///
/// Table and column names are interpolated into generated statements, so they
/// are restricted to `[a-z_][a-z0-9_]*`. Anything else is rejected before it
/// can reach a statement template.
pub(crate) fn is_sql_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) if first == '_' || first.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_lowercase() || c.is_ascii_digit())
}

/// Validation predicate: reject embedded whitespace.
pub(crate) fn has_no_whitespace(s: &str) -> bool {
    !s.chars().any(char::is_whitespace)
}
