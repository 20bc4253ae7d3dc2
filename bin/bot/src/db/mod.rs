//! PostgreSQL implementations of the bot's stores.
//!
//! This module provides data access for:
//! - Dialog sessions (`chat_session`)
//! - Action references behind rendered controls (`action_ref`)
//! - Profiles, rooms, members, tasks and votes
//!
//! Ids minted by the bot are stored as their prefixed text form; platform
//! user and chat ids as `BIGINT`.

pub mod action;
pub mod entity;
pub mod session;

pub use action::PgActionRegistry;
pub use entity::PgEntityStore;
pub use session::PgSessionStore;

use std::fmt;

/// Escapes `%`, `_` and `\` for use inside an `ILIKE ... ESCAPE '\'`
/// pattern and wraps the result for substring matching.
pub(crate) fn contains_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Converts a count column into the unsigned form the store traits use.
pub(crate) fn to_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

pub(crate) fn reason(e: impl fmt::Display) -> String {
    e.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_escapes_wildcards() {
        assert_eq!(contains_pattern("sprint"), "%sprint%");
        assert_eq!(contains_pattern("50%_done"), "%50\\%\\_done%");
        assert_eq!(contains_pattern("a\\b"), "%a\\\\b%");
    }

    #[test]
    fn negative_counts_clamp_to_zero() {
        assert_eq!(to_count(-1), 0);
        assert_eq!(to_count(7), 7);
    }
}
