//! Error types for the conversation crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `SessionError`: Errors from session storage and flow decoding
//! - `ActionError`: Errors from the action registry

use planpoker_core::{Classify, ErrorKind};
use std::fmt;

/// Errors from session operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The persisted flow/step pair names no known step.
    UnknownStep { flow: String, step: String },
    /// A step's payload lacks a required key.
    MissingData {
        flow: String,
        step: String,
        key: &'static str,
    },
    /// A step's payload value could not be parsed.
    InvalidData { key: &'static str, reason: String },
    /// Storage operation failed.
    StorageFailed { reason: String },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownStep { flow, step } => {
                write!(f, "unknown step '{step}' in flow '{flow}'")
            }
            Self::MissingData { flow, step, key } => {
                write!(f, "step '{flow}/{step}' is missing '{key}'")
            }
            Self::InvalidData { key, reason } => {
                write!(f, "invalid session data '{key}': {reason}")
            }
            Self::StorageFailed { reason } => {
                write!(f, "session storage failed: {reason}")
            }
        }
    }
}

impl std::error::Error for SessionError {}

impl Classify for SessionError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownStep { .. } | Self::MissingData { .. } | Self::InvalidData { .. } => {
                ErrorKind::Validation
            }
            Self::StorageFailed { .. } => ErrorKind::Persistence,
        }
    }
}

/// Errors from action registry operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// No action reference with this id exists (unknown, deleted or forged).
    NotFound { id: String },
    /// The action's payload lacks a key or holds a malformed value.
    InvalidPayload { key: &'static str, reason: String },
    /// Storage operation failed.
    StorageFailed { reason: String },
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => write!(f, "action reference not found: {id}"),
            Self::InvalidPayload { key, reason } => {
                write!(f, "invalid action payload '{key}': {reason}")
            }
            Self::StorageFailed { reason } => {
                write!(f, "action registry storage failed: {reason}")
            }
        }
    }
}

impl std::error::Error for ActionError {}

impl Classify for ActionError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidPayload { .. } => ErrorKind::Validation,
            Self::StorageFailed { .. } => ErrorKind::Persistence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_error_display() {
        let err = SessionError::MissingData {
            flow: "ADD_TASK".to_string(),
            step: "URL".to_string(),
            key: "roomId",
        };
        assert_eq!(err.to_string(), "step 'ADD_TASK/URL' is missing 'roomId'");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn action_not_found_is_classified() {
        let err = ActionError::NotFound {
            id: "act_x".to_string(),
        };
        assert!(err.to_string().contains("not found"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
