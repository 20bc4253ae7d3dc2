//! Error handling foundation for planpoker.
//!
//! Each crate defines its own error enums in its own `error` module and
//! returns them wrapped in a rootcause [`Report`]. What every layer shares
//! is the coarse [`ErrorKind`] taxonomy: the bot decides how to recover
//! from a failure (stay silent, re-prompt, show a failure notice) purely
//! from the kind, never from the concrete variant.

use rootcause::Report;
use std::fmt;

/// A Result type alias using rootcause's Report for error handling.
///
/// Each layer adds its own context via `.context()` as errors propagate.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

/// How a failure should be treated by whoever handles the inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A referenced session, action reference, room or task does not exist.
    NotFound,
    /// The user supplied malformed input.
    Validation,
    /// The storage collaborator failed.
    Persistence,
    /// The chat platform rejected or failed an outbound call.
    Transport,
}

impl ErrorKind {
    /// Returns true if the failure leaves the session untouched and the
    /// user can simply try again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence | Self::Transport)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::Persistence => "persistence",
            Self::Transport => "transport",
        };
        f.write_str(name)
    }
}

/// Implemented by every error enum in the workspace.
pub trait Classify {
    /// Returns the coarse kind of this error.
    fn kind(&self) -> ErrorKind;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_type_works() {
        let ok: Result<i32> = Ok(42);
        assert_eq!(ok.expect("should be ok"), 42);
    }

    #[test]
    fn only_infrastructure_failures_are_retryable() {
        assert!(ErrorKind::Persistence.is_retryable());
        assert!(ErrorKind::Transport.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
    }

    #[test]
    fn kind_display() {
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
    }
}
