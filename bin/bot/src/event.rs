//! Transport-neutral inbound events.

use planpoker_core::{ChatId, User, UserId};

/// The command that opens the start screen.
pub const START_COMMAND: &str = "/start";

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A plain text message.
    Text(String),
    /// A control was pressed.
    Callback {
        query_id: String,
        token: String,
        /// Set when the control sits on a message posted through inline mode.
        inline_message_id: Option<String>,
    },
    /// The user is typing an inline query.
    InlineQuery { query_id: String, query: String },
    /// The bot was added to a group chat.
    BotAdded { chat_title: String },
    /// A message the user posted into a chat through the bot's inline mode.
    /// `token` is the token of its first control, if any.
    ViaBotPost {
        chat_title: String,
        token: Option<String>,
    },
}

/// One inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Who caused the event.
    pub sender: User,
    /// Where it happened. Equals the sender's id in a private chat.
    pub chat_id: ChatId,
    /// The message the event refers to, when there is one.
    pub message_id: Option<i32>,
    pub kind: EventKind,
}

impl InboundEvent {
    /// The user that caused the event.
    #[must_use]
    pub fn user(&self) -> UserId {
        self.sender.id
    }

    /// The sender's private chat.
    #[must_use]
    pub fn private_chat(&self) -> ChatId {
        ChatId::from(self.sender.id)
    }

    /// Text of a plain message.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    /// Returns true for the start command, with or without a bot mention
    /// or deep-link argument.
    #[must_use]
    pub fn is_start_command(&self) -> bool {
        self.text()
            .and_then(|text| text.split_whitespace().next())
            .is_some_and(|command| command.split('@').next() == Some(START_COMMAND))
    }

    /// Token of the pressed control.
    #[must_use]
    pub fn control_token(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Callback { token, .. } => Some(token.as_str()),
            _ => None,
        }
    }

    /// Callback query id, for controls.
    #[must_use]
    pub fn callback_id(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Callback { query_id, .. } => Some(query_id.as_str()),
            _ => None,
        }
    }

    /// Non-empty inline query text.
    #[must_use]
    pub fn inline_query(&self) -> Option<(&str, &str)> {
        match &self.kind {
            EventKind::InlineQuery { query_id, query } if !query.trim().is_empty() => {
                Some((query_id.as_str(), query.trim()))
            }
            _ => None,
        }
    }

    /// Returns true for events that may continue an open flow without
    /// carrying a control.
    #[must_use]
    pub fn continues_flow(&self) -> bool {
        matches!(
            self.kind,
            EventKind::Text(_) | EventKind::BotAdded { .. } | EventKind::ViaBotPost { .. }
        )
    }

    /// Returns true when the event happened in the sender's private chat.
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.chat_id == self.private_chat()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn user(id: i64) -> User {
        User::new(UserId::new(id), format!("User {id}"), format!("user{id}"))
    }

    pub fn text(user_id: i64, text: &str) -> InboundEvent {
        InboundEvent {
            sender: user(user_id),
            chat_id: ChatId::new(user_id),
            message_id: Some(1),
            kind: EventKind::Text(text.to_string()),
        }
    }

    pub fn press(user_id: i64, chat_id: i64, token: &str) -> InboundEvent {
        InboundEvent {
            sender: user(user_id),
            chat_id: ChatId::new(chat_id),
            message_id: Some(7),
            kind: EventKind::Callback {
                query_id: format!("q{user_id}"),
                token: token.to_string(),
                inline_message_id: None,
            },
        }
    }

    pub fn bot_added(user_id: i64, chat_id: i64) -> InboundEvent {
        InboundEvent {
            sender: user(user_id),
            chat_id: ChatId::new(chat_id),
            message_id: None,
            kind: EventKind::BotAdded {
                chat_title: "Team".to_string(),
            },
        }
    }

    pub fn via_bot(user_id: i64, chat_id: i64, token: &str) -> InboundEvent {
        InboundEvent {
            sender: user(user_id),
            chat_id: ChatId::new(chat_id),
            message_id: Some(40),
            kind: EventKind::ViaBotPost {
                chat_title: "Team".to_string(),
                token: Some(token.to_string()),
            },
        }
    }

    pub fn inline(user_id: i64, query: &str) -> InboundEvent {
        InboundEvent {
            sender: user(user_id),
            chat_id: ChatId::new(user_id),
            message_id: None,
            kind: EventKind::InlineQuery {
                query_id: "iq".to_string(),
                query: query.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures;

    #[test]
    fn start_command_variants() {
        assert!(fixtures::text(1, "/start").is_start_command());
        assert!(fixtures::text(1, "/start@poker_bot").is_start_command());
        assert!(fixtures::text(1, "/start abc").is_start_command());
        assert!(!fixtures::text(1, "/started").is_start_command());
        assert!(!fixtures::text(1, "start").is_start_command());
    }

    #[test]
    fn blank_inline_query_is_ignored() {
        assert!(fixtures::inline(1, "   ").inline_query().is_none());
        assert_eq!(
            fixtures::inline(1, " sprint ").inline_query(),
            Some(("iq", "sprint"))
        );
    }

    #[test]
    fn only_plain_events_continue_flows() {
        assert!(fixtures::text(1, "x").continues_flow());
        assert!(fixtures::bot_added(1, -5).continues_flow());
        assert!(!fixtures::press(1, 1, "t").continues_flow());
        assert!(!fixtures::inline(1, "q").continues_flow());
    }
}
