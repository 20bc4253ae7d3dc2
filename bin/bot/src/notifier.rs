//! Outbound side of the bot.
//!
//! Handlers describe what to show as [`Outbound`] values and hand them to a
//! [`Notifier`]. Sends whose result matters are awaited directly; toasts and
//! other best-effort sends go through the [`Outbox`].

use async_trait::async_trait;
use planpoker_core::{ChatId, Classify, ErrorKind};
use rootcause::Report;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Errors from delivering an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The platform refused the call.
    Rejected { method: String, description: String },
    /// The platform could not be reached.
    Unreachable { reason: String },
    /// The platform answered with something unexpected.
    InvalidResponse { reason: String },
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected {
                method,
                description,
            } => write!(f, "{method} rejected: {description}"),
            Self::Unreachable { reason } => write!(f, "chat platform unreachable: {reason}"),
            Self::InvalidResponse { reason } => write!(f, "invalid platform response: {reason}"),
        }
    }
}

impl std::error::Error for NotifyError {}

impl Classify for NotifyError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Transport
    }
}

/// What a control does when pressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonAction {
    /// Sends the action token back to the bot.
    Callback(String),
    /// Opens inline mode in a chat of the user's choice with `query`.
    SwitchInline(String),
    Url(String),
}

/// One control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub action: ButtonAction,
}

impl Button {
    #[must_use]
    pub fn callback(label: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::Callback(token.into()),
        }
    }

    #[must_use]
    pub fn switch_inline(label: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::SwitchInline(query.into()),
        }
    }

    #[must_use]
    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::Url(url.into()),
        }
    }
}

/// Rows of controls under a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a row.
    #[must_use]
    pub fn row(mut self, buttons: Vec<Button>) -> Self {
        if !buttons.is_empty() {
            self.rows.push(buttons);
        }
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every control, row by row.
    pub fn buttons(&self) -> impl Iterator<Item = &Button> {
        self.rows.iter().flatten()
    }
}

/// A rendered message body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Screen {
    /// HTML-formatted text.
    pub text: String,
    pub keyboard: Keyboard,
}

impl Screen {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: Keyboard::new(),
        }
    }

    #[must_use]
    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = keyboard;
        self
    }
}

/// A message to replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageRef {
    Chat { chat_id: ChatId, message_id: i32 },
    /// A message posted through inline mode.
    Inline(String),
}

/// One result of an inline query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineArticle {
    pub id: String,
    pub title: String,
    pub description: String,
    pub screen: Screen,
}

/// Everything the bot can ask the platform to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Send { chat_id: ChatId, screen: Screen },
    Edit { message: MessageRef, screen: Screen },
    /// Answers a pressed control, optionally with a toast.
    Toast { query_id: String, text: String },
    InlineResults {
        query_id: String,
        articles: Vec<InlineArticle>,
    },
    Delete { chat_id: ChatId, message_id: i32 },
    /// Shows "typing…" in a chat; fails if the bot cannot post there.
    Typing { chat_id: ChatId },
}

impl Outbound {
    /// Short name used in logs.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::Send { .. } => "send",
            Self::Edit { .. } => "edit",
            Self::Toast { .. } => "toast",
            Self::InlineResults { .. } => "inline_results",
            Self::Delete { .. } => "delete",
            Self::Typing { .. } => "typing",
        }
    }
}

/// Delivers outbound messages to the chat platform.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers `outbound`. Returns the id of the message it created or
    /// edited, when the platform reports one.
    async fn send(&self, outbound: Outbound) -> Result<Option<i32>, Report<NotifyError>>;
}

/// Notifier that only logs. Used for dry runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, outbound: Outbound) -> Result<Option<i32>, Report<NotifyError>> {
        info!(method = outbound.method(), ?outbound, "dry run: outbound suppressed");
        Ok(None)
    }
}

/// Bounded queue of best-effort sends, drained by a background task.
///
/// Delivery order relative to directly awaited sends is not guaranteed.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Outbound>,
}

impl Outbox {
    /// Starts the draining task.
    ///
    /// The task ends once every `Outbox` clone is dropped and the queue is
    /// empty; awaiting the handle then waits for the last delivery.
    pub fn spawn(notifier: Arc<dyn Notifier>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Outbound>(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(outbound) = rx.recv().await {
                let method = outbound.method();
                if let Err(e) = notifier.send(outbound).await {
                    warn!(method, error = %e, "best-effort send failed");
                }
            }
        });
        (Self { tx }, handle)
    }

    /// Queues `outbound`. Drops it with a warning if the queue is full.
    pub fn push(&self, outbound: Outbound) {
        if let Err(e) = self.tx.try_send(outbound) {
            warn!(error = %e, "outbox full or closed, dropping send");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Notifier that records every send and can be told to fail.
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<Outbound>>,
        fail_sends_to: Mutex<Option<ChatId>>,
        next_id: Mutex<i32>,
    }

    impl RecordingNotifier {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Makes sends and typing probes into `chat_id` fail.
        pub fn fail_chat(&self, chat_id: ChatId) {
            *self.fail_sends_to.lock().expect("lock") = Some(chat_id);
        }

        pub fn sent(&self) -> Vec<Outbound> {
            self.sent.lock().expect("lock").clone()
        }

        /// Screens sent or edited, in order.
        pub fn screens(&self) -> Vec<Screen> {
            self.sent()
                .into_iter()
                .filter_map(|outbound| match outbound {
                    Outbound::Send { screen, .. } | Outbound::Edit { screen, .. } => Some(screen),
                    _ => None,
                })
                .collect()
        }

        pub fn last_screen(&self) -> Screen {
            self.screens().pop().expect("no screen was sent")
        }

        /// Texts of screens sent into `chat_id`.
        pub fn sent_to(&self, chat_id: ChatId) -> Vec<String> {
            self.sent()
                .into_iter()
                .filter_map(|outbound| match outbound {
                    Outbound::Send { chat_id: to, screen } if to == chat_id => Some(screen.text),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, outbound: Outbound) -> Result<Option<i32>, Report<NotifyError>> {
            let failing = *self.fail_sends_to.lock().expect("lock");
            if let Outbound::Send { chat_id, .. } | Outbound::Typing { chat_id } = &outbound {
                if Some(*chat_id) == failing {
                    return Err(NotifyError::Rejected {
                        method: outbound.method().to_string(),
                        description: "Forbidden: bot is not a member".to_string(),
                    }
                    .into());
                }
            }
            self.sent.lock().expect("lock").push(outbound);
            let mut next_id = self.next_id.lock().expect("lock");
            *next_id += 1;
            Ok(Some(100 + *next_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingNotifier;
    use super::*;

    #[tokio::test]
    async fn outbox_delivers_in_background() {
        let notifier = RecordingNotifier::new();
        let (outbox, handle) = Outbox::spawn(notifier.clone(), 4);

        outbox.push(Outbound::Toast {
            query_id: "q".to_string(),
            text: "Saved".to_string(),
        });
        drop(outbox);
        handle.await.expect("worker");

        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn outbox_survives_failed_sends() {
        let notifier = RecordingNotifier::new();
        notifier.fail_chat(ChatId::new(-1));
        let (outbox, handle) = Outbox::spawn(notifier.clone(), 4);

        outbox.push(Outbound::Typing {
            chat_id: ChatId::new(-1),
        });
        outbox.push(Outbound::Typing {
            chat_id: ChatId::new(2),
        });
        drop(outbox);
        handle.await.expect("worker");

        assert_eq!(notifier.sent().len(), 1);
    }

    #[test]
    fn empty_rows_are_skipped() {
        let keyboard = Keyboard::new()
            .row(vec![])
            .row(vec![Button::url("Open", "https://example.com")]);
        assert_eq!(keyboard.rows.len(), 1);
        assert_eq!(keyboard.buttons().count(), 1);
    }
}
