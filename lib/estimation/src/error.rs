//! Error types for the estimation crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `StoreError`: Errors reported by a persistence backend
//! - `EstimationError`: Errors from aggregator and lifecycle operations,
//!   wrapping store reports with `.context()`

use planpoker_core::{Classify, ErrorKind};
use rootcause::Report;
use std::fmt;

/// Errors from entity store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The requested entity does not exist.
    NotFound { entity: &'static str, id: String },
    /// A stored row could not be decoded.
    Corrupt { entity: &'static str, reason: String },
    /// The backend failed.
    Backend { reason: String },
}

impl StoreError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Creates a backend error.
    #[must_use]
    pub fn backend(reason: impl ToString) -> Self {
        Self::Backend {
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::Corrupt { entity, reason } => write!(f, "corrupt {entity} row: {reason}"),
            Self::Backend { reason } => write!(f, "store backend failed: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl Classify for StoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Corrupt { .. } | Self::Backend { .. } => ErrorKind::Persistence,
        }
    }
}

/// Errors from estimation operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EstimationError {
    /// A referenced room, task or user does not exist.
    NotFound { entity: &'static str, id: String },
    /// A vote outside the allowed scale.
    InvalidVote { sum: i32 },
    /// Storage failed (use as context wrapper).
    Storage,
}

impl fmt::Display for EstimationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { entity, id } => write!(f, "{entity} '{id}' does not exist"),
            Self::InvalidVote { sum } => write!(f, "vote {sum} is not on the estimation scale"),
            Self::Storage => write!(f, "estimation storage operation failed"),
        }
    }
}

impl std::error::Error for EstimationError {}

impl Classify for EstimationError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidVote { .. } => ErrorKind::Validation,
            Self::Storage => ErrorKind::Persistence,
        }
    }
}

impl From<&StoreError> for EstimationError {
    fn from(err: &StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound {
                entity,
                id: id.clone(),
            },
            StoreError::Corrupt { .. } | StoreError::Backend { .. } => Self::Storage,
        }
    }
}

/// Lifts store reports into estimation reports, keeping the chain.
pub(crate) trait StoreResultExt<T> {
    fn lift(self) -> Result<T, Report<EstimationError>>;
}

impl<T> StoreResultExt<T> for Result<T, Report<StoreError>> {
    fn lift(self) -> Result<T, Report<EstimationError>> {
        self.map_err(|report| {
            let context = EstimationError::from(report.current_context());
            report.context(context)
        })
    }
}
