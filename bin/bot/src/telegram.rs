//! Telegram Bot API adapter.
//!
//! Inbound: long polling `getUpdates`, turning each update the bot cares
//! about into an [`InboundEvent`]. Outbound: [`TelegramClient`] implements
//! [`Notifier`] on top of `sendMessage`, `editMessageText`,
//! `answerCallbackQuery`, `answerInlineQuery`, `deleteMessage` and
//! `sendChatAction`. Messages use HTML parse mode.

use crate::config::TelegramConfig;
use crate::event::{EventKind, InboundEvent};
use crate::notifier::{
    ButtonAction, InlineArticle, Keyboard, MessageRef, Notifier, NotifyError, Outbound, Screen,
};
use async_trait::async_trait;
use planpoker_core::{ChatId, User, UserId};
use rootcause::Report;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, instrument};

/// Update kinds requested from `getUpdates`.
const ALLOWED_UPDATES: [&str; 4] = ["message", "callback_query", "inline_query", "my_chat_member"];

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl From<&WireUser> for User {
    fn from(user: &WireUser) -> Self {
        let display_name = match &user.last_name {
            Some(last) if !last.is_empty() => format!("{} {last}", user.first_name),
            _ => user.first_name.clone(),
        };
        User::new(
            UserId::new(user.id),
            display_name,
            user.username.clone().unwrap_or_default(),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireButton {
    pub text: String,
    pub callback_data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireMarkup {
    pub inline_keyboard: Vec<Vec<WireButton>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireMessage {
    pub message_id: i32,
    pub from: Option<WireUser>,
    pub chat: WireChat,
    pub text: Option<String>,
    pub via_bot: Option<WireUser>,
    pub reply_markup: Option<WireMarkup>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireCallbackQuery {
    pub id: String,
    pub from: WireUser,
    pub message: Option<WireMessage>,
    pub inline_message_id: Option<String>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireInlineQuery {
    pub id: String,
    pub from: WireUser,
    pub query: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireChatMember {
    pub status: String,
    pub user: WireUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireChatMemberUpdated {
    pub chat: WireChat,
    pub from: WireUser,
    pub old_chat_member: WireChatMember,
    pub new_chat_member: WireChatMember,
}

/// One `getUpdates` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<WireMessage>,
    pub callback_query: Option<WireCallbackQuery>,
    pub inline_query: Option<WireInlineQuery>,
    pub my_chat_member: Option<WireChatMemberUpdated>,
}

fn is_present(status: &str) -> bool {
    matches!(status, "member" | "administrator" | "creator" | "restricted")
}

impl Update {
    /// Converts the update into an event. Returns `None` for updates the
    /// bot does not react to.
    #[must_use]
    pub fn into_event(self, bot_id: i64) -> Option<InboundEvent> {
        if let Some(query) = self.callback_query {
            let token = query.data?;
            let (chat_id, message_id) = match &query.message {
                Some(message) => (message.chat.id, Some(message.message_id)),
                None => (query.from.id, None),
            };
            return Some(InboundEvent {
                sender: User::from(&query.from),
                chat_id: ChatId::new(chat_id),
                message_id,
                kind: EventKind::Callback {
                    query_id: query.id,
                    token,
                    inline_message_id: query.inline_message_id,
                },
            });
        }

        if let Some(query) = self.inline_query {
            return Some(InboundEvent {
                sender: User::from(&query.from),
                chat_id: ChatId::new(query.from.id),
                message_id: None,
                kind: EventKind::InlineQuery {
                    query_id: query.id,
                    query: query.query,
                },
            });
        }

        if let Some(update) = self.my_chat_member {
            let joined = update.new_chat_member.user.id == bot_id
                && is_present(&update.new_chat_member.status)
                && !is_present(&update.old_chat_member.status);
            if !joined || update.chat.kind == "private" {
                return None;
            }
            return Some(InboundEvent {
                sender: User::from(&update.from),
                chat_id: ChatId::new(update.chat.id),
                message_id: None,
                kind: EventKind::BotAdded {
                    chat_title: update.chat.title.unwrap_or_default(),
                },
            });
        }

        let message = self.message?;
        let from = message.from.as_ref().filter(|from| !from.is_bot)?;
        let kind = if message.via_bot.as_ref().is_some_and(|via| via.id == bot_id) {
            let token = message
                .reply_markup
                .as_ref()
                .and_then(|markup| markup.inline_keyboard.iter().flatten().next())
                .and_then(|button| button.callback_data.clone());
            EventKind::ViaBotPost {
                chat_title: message.chat.title.clone().unwrap_or_default(),
                token,
            }
        } else {
            EventKind::Text(message.text.clone()?)
        };
        Some(InboundEvent {
            sender: User::from(from),
            chat_id: ChatId::new(message.chat.id),
            message_id: Some(message.message_id),
            kind,
        })
    }
}

/// Renders a keyboard as `reply_markup`.
fn markup(keyboard: &Keyboard) -> Value {
    let rows: Vec<Vec<Value>> = keyboard
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|button| match &button.action {
                    ButtonAction::Callback(token) => {
                        json!({ "text": button.label, "callback_data": token })
                    }
                    ButtonAction::SwitchInline(query) => {
                        json!({ "text": button.label, "switch_inline_query": query })
                    }
                    ButtonAction::Url(url) => json!({ "text": button.label, "url": url }),
                })
                .collect()
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

/// Adds the text, parse mode and keyboard of `screen` to a request body.
fn with_screen(mut body: Value, screen: &Screen) -> Value {
    body["text"] = json!(screen.text);
    body["parse_mode"] = json!("HTML");
    body["disable_web_page_preview"] = json!(true);
    if !screen.keyboard.is_empty() {
        body["reply_markup"] = markup(&screen.keyboard);
    }
    body
}

fn article(article: &InlineArticle) -> Value {
    let mut result = json!({
        "type": "article",
        "id": article.id,
        "title": article.title,
        "description": article.description,
        "input_message_content": {
            "message_text": article.screen.text,
            "parse_mode": "HTML",
        },
    });
    if !article.screen.keyboard.is_empty() {
        result["reply_markup"] = markup(&article.screen.keyboard);
    }
    result
}

/// Builds the Bot API method and body for an outbound message.
fn request(outbound: &Outbound) -> (&'static str, Value) {
    match outbound {
        Outbound::Send { chat_id, screen } => (
            "sendMessage",
            with_screen(json!({ "chat_id": chat_id.get() }), screen),
        ),
        Outbound::Edit { message, screen } => {
            let target = match message {
                MessageRef::Chat {
                    chat_id,
                    message_id,
                } => json!({ "chat_id": chat_id.get(), "message_id": message_id }),
                MessageRef::Inline(id) => json!({ "inline_message_id": id }),
            };
            ("editMessageText", with_screen(target, screen))
        }
        Outbound::Toast { query_id, text } => {
            let mut body = json!({ "callback_query_id": query_id });
            if !text.is_empty() {
                body["text"] = json!(text);
            }
            ("answerCallbackQuery", body)
        }
        Outbound::InlineResults { query_id, articles } => (
            "answerInlineQuery",
            json!({
                "inline_query_id": query_id,
                "results": articles.iter().map(article).collect::<Vec<_>>(),
                "cache_time": 0,
                "is_personal": true,
            }),
        ),
        Outbound::Delete {
            chat_id,
            message_id,
        } => (
            "deleteMessage",
            json!({ "chat_id": chat_id.get(), "message_id": message_id }),
        ),
        Outbound::Typing { chat_id } => (
            "sendChatAction",
            json!({ "chat_id": chat_id.get(), "action": "typing" }),
        ),
    }
}

/// An edit that changes nothing is reported as an error by the API.
fn is_not_modified(err: &NotifyError) -> bool {
    matches!(err, NotifyError::Rejected { description, .. } if description.contains("message is not modified"))
}

/// Bot API client.
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    poll_timeout: Duration,
}

impl TelegramClient {
    /// Creates a client for the configured bot.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &TelegramConfig) -> Result<Self, Report<NotifyError>> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| NotifyError::Unreachable {
                reason: format!("HTTP client error: {e}"),
            })?;
        Ok(Self {
            http,
            base_url: format!(
                "{}/bot{}",
                config.api_url.trim_end_matches('/'),
                config.token
            ),
            poll_timeout: config.poll_timeout(),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        body: &Value,
    ) -> Result<T, Report<NotifyError>> {
        let response = self
            .http
            .post(format!("{}/{method}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|e| NotifyError::Unreachable {
                reason: format!("{method}: {}", e.without_url()),
            })?;
        let status = response.status();
        let envelope: ApiResponse<T> =
            response
                .json()
                .await
                .map_err(|e| NotifyError::InvalidResponse {
                    reason: format!("{method} ({status}): {}", e.without_url()),
                })?;

        if !envelope.ok {
            return Err(NotifyError::Rejected {
                method: method.to_string(),
                description: envelope
                    .description
                    .unwrap_or_else(|| status.to_string()),
            }
            .into());
        }
        envelope.result.ok_or_else(|| {
            NotifyError::InvalidResponse {
                reason: format!("{method}: missing result"),
            }
            .into()
        })
    }

    /// The bot's own user id.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is rejected or the API is unreachable.
    pub async fn bot_id(&self) -> Result<i64, Report<NotifyError>> {
        let me: WireUser = self.call("getMe", &json!({})).await?;
        Ok(me.id)
    }

    /// Waits for the next batch of updates after `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the API is unreachable or rejects the call.
    #[instrument(skip(self), level = "debug")]
    pub async fn updates(&self, offset: Option<i64>) -> Result<Vec<Update>, Report<NotifyError>> {
        let mut body = json!({
            "timeout": self.poll_timeout.as_secs(),
            "allowed_updates": ALLOWED_UPDATES,
        });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }
        self.call("getUpdates", &body).await
    }
}

#[async_trait]
impl Notifier for TelegramClient {
    #[instrument(skip_all, level = "debug", fields(method = outbound.method()))]
    async fn send(&self, outbound: Outbound) -> Result<Option<i32>, Report<NotifyError>> {
        let (method, body) = request(&outbound);
        let result: Result<Value, _> = self.call(method, &body).await;
        match result {
            Ok(value) => Ok(value
                .get("message_id")
                .and_then(Value::as_i64)
                .and_then(|id| i32::try_from(id).ok())),
            Err(report) if is_not_modified(report.current_context()) => {
                debug!("edit left the message unchanged");
                Ok(None)
            }
            Err(report) => Err(report),
        }
    }
}

/// Long-polling cursor over `getUpdates`.
pub struct Poller {
    bot_id: i64,
    offset: Option<i64>,
}

impl Poller {
    #[must_use]
    pub fn new(bot_id: i64) -> Self {
        Self {
            bot_id,
            offset: None,
        }
    }

    /// Fetches the next batch and converts it into events. Updates the bot
    /// does not react to are acknowledged and dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if fetching fails; the cursor is left unchanged.
    pub async fn next_batch(
        &mut self,
        client: &TelegramClient,
    ) -> Result<Vec<InboundEvent>, Report<NotifyError>> {
        let updates = client.updates(self.offset).await?;
        Ok(self.accept(updates))
    }

    fn accept(&mut self, updates: Vec<Update>) -> Vec<InboundEvent> {
        let mut events = Vec::with_capacity(updates.len());
        for update in updates {
            self.offset = Some(self.offset.unwrap_or(0).max(update.update_id + 1));
            let update_id = update.update_id;
            match update.into_event(self.bot_id) {
                Some(event) => events.push(event),
                None => debug!(update_id, "update ignored"),
            }
        }
        events
    }
}
