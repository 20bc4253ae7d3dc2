//! Handler errors and their user-facing form.

use planpoker_core::{Classify, ErrorKind};
use rootcause::Report;
use std::fmt;

/// Errors surfaced by event handlers.
///
/// Lower-layer reports are wrapped with `.context()` so the full chain is
/// logged while the user only sees [`BotError::user_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotError {
    /// Something the event refers to no longer exists.
    NotFound,
    /// The user's input was rejected; `message` says why.
    Invalid { message: String },
    /// Storage failed.
    Storage,
    /// The chat platform failed.
    Transport,
}

impl BotError {
    /// Creates a validation error shown to the user as is.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn from_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NotFound => Self::NotFound,
            ErrorKind::Validation => Self::invalid("That input was not accepted."),
            ErrorKind::Persistence => Self::Storage,
            ErrorKind::Transport => Self::Transport,
        }
    }

    /// Text safe to show to the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound => {
                "Could not complete the action: it refers to something that no longer exists."
                    .to_string()
            }
            Self::Invalid { message } => message.clone(),
            Self::Storage => "Something went wrong while saving. Please try again.".to_string(),
            Self::Transport => "Could not deliver the message. Please try again.".to_string(),
        }
    }
}

impl fmt::Display for BotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "referenced entity not found"),
            Self::Invalid { message } => write!(f, "invalid input: {message}"),
            Self::Storage => write!(f, "storage failure"),
            Self::Transport => write!(f, "transport failure"),
        }
    }
}

impl std::error::Error for BotError {}

impl Classify for BotError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound => ErrorKind::NotFound,
            Self::Invalid { .. } => ErrorKind::Validation,
            Self::Storage => ErrorKind::Persistence,
            Self::Transport => ErrorKind::Transport,
        }
    }
}

/// Wraps classified lower-layer reports into [`BotError`] reports.
pub trait BotResultExt<T> {
    fn or_bot(self) -> Result<T, Report<BotError>>;
}

impl<T, C> BotResultExt<T> for Result<T, Report<C>>
where
    C: Classify + fmt::Display + fmt::Debug + Send + Sync + 'static,
{
    fn or_bot(self) -> Result<T, Report<BotError>> {
        self.map_err(|report| {
            let context = BotError::from_kind(report.current_context().kind());
            report.context(context)
        })
    }
}
