//! Action registry.
//!
//! Every interactive control the bot renders carries nothing but an opaque
//! token. The token is the id of an [`ActionRef`] stored when the control
//! was rendered; resolving it is the only way to learn what pressing the
//! control means.

use crate::error::ActionError;
use crate::flow::FlowKind;
use async_trait::async_trait;
use planpoker_core::{ActionRefId, RoomId, TaskId};
use rootcause::Report;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Well-known payload and step data keys.
pub mod keys {
    pub const ROOM_ID: &str = "roomId";
    pub const TASK_ID: &str = "taskId";
    pub const CHAT_ID: &str = "chatId";
    pub const CHAT_NAME: &str = "chatName";
    pub const MESSAGE_ID: &str = "messageId";
    pub const NAME: &str = "name";
    pub const URL: &str = "url";
    pub const SUM: &str = "sum";
    pub const PAGE: &str = "page";
}

/// What pressing a control means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    /// Back to the start screen.
    Start,
    /// Abandon whatever is in progress.
    Cancel,
    /// Begin room creation.
    CreateRoom,
    /// The bot was already a member of the planning group.
    BotAlreadyAdded,
    /// Confirm room settings.
    RoomSettings,
    ShowRooms,
    ShowRoom,
    JoinRoom,
    /// Bind a group chat to a room.
    BindChat,
    /// Close planning in a room.
    FinishRoom,
    /// Begin task creation.
    CreateTask,
    ShowTasks,
    ShowTask,
    /// Publish the oldest unfinished task.
    NextTask,
    SaveAndPublishTask,
    SaveAndNewTask,
    SaveAndCloseTask,
    /// Force the end of voting on a task.
    FinishTask,
    /// Cast a vote.
    AddVote,
    /// Discard all votes on a task.
    Revote,
    /// Begin final grade entry.
    EnterGrade,
}

impl ActionKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 21] = [
        Self::Start,
        Self::Cancel,
        Self::CreateRoom,
        Self::BotAlreadyAdded,
        Self::RoomSettings,
        Self::ShowRooms,
        Self::ShowRoom,
        Self::JoinRoom,
        Self::BindChat,
        Self::FinishRoom,
        Self::CreateTask,
        Self::ShowTasks,
        Self::ShowTask,
        Self::NextTask,
        Self::SaveAndPublishTask,
        Self::SaveAndNewTask,
        Self::SaveAndCloseTask,
        Self::FinishTask,
        Self::AddVote,
        Self::Revote,
        Self::EnterGrade,
    ];

    /// Returns the persisted tag.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::Cancel => "CANCEL",
            Self::CreateRoom => "NEW_ROOM",
            Self::BotAlreadyAdded => "BOT_ADDED",
            Self::RoomSettings => "SETTINGS_ROOM",
            Self::ShowRooms => "SHOW_ROOMS",
            Self::ShowRoom => "SHOW_ROOM",
            Self::JoinRoom => "JOIN_ROOM",
            Self::BindChat => "SET_GROUP_OF_ROOM",
            Self::FinishRoom => "FINISH_ROOM",
            Self::CreateTask => "ADD_TASK",
            Self::ShowTasks => "SHOW_TASKS",
            Self::ShowTask => "SHOW_TASK",
            Self::NextTask => "NEXT_TASK",
            Self::SaveAndPublishTask => "SAVE_AND_SEND_TASK",
            Self::SaveAndNewTask => "SAVE_AND_NEW_TASK",
            Self::SaveAndCloseTask => "SAVE_TASK_AND_CANCEL",
            Self::FinishTask => "FINISH_TASK",
            Self::AddVote => "TASK_RATE",
            Self::Revote => "REVOTE_TASK_RATE",
            Self::EnterGrade => "FINISH_TASK_RATE",
        }
    }

    /// Returns true for controls that lead back to the start screen.
    #[must_use]
    pub const fn is_go_to_start(&self) -> bool {
        matches!(self, Self::Start | Self::Cancel)
    }

    /// Returns the flow this control opens, if it is a flow entry.
    #[must_use]
    pub const fn entry_of(&self) -> Option<FlowKind> {
        match self {
            Self::CreateRoom => Some(FlowKind::CreateRoom),
            Self::CreateTask => Some(FlowKind::CreateTask),
            Self::EnterGrade => Some(FlowKind::EnterGrade),
            _ => None,
        }
    }

    /// Returns the flow this control belongs to, entry or step control.
    #[must_use]
    pub const fn flow(&self) -> Option<FlowKind> {
        match self {
            Self::CreateRoom | Self::BotAlreadyAdded | Self::RoomSettings => {
                Some(FlowKind::CreateRoom)
            }
            Self::CreateTask
            | Self::SaveAndPublishTask
            | Self::SaveAndNewTask
            | Self::SaveAndCloseTask => Some(FlowKind::CreateTask),
            Self::EnterGrade => Some(FlowKind::EnterGrade),
            _ => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown action kind '{s}'"))
    }
}

/// Free-form payload of an action reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionPayload(BTreeMap<String, String>);

impl ActionPayload {
    /// Creates an empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    /// Returns the raw value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Parses the value for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is absent or its value does not parse.
    pub fn parse<T>(&self, key: &'static str) -> Result<T, Report<ActionError>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let raw = self.get(key).ok_or_else(|| ActionError::InvalidPayload {
            key,
            reason: "missing".to_string(),
        })?;
        raw.parse::<T>().map_err(|e| {
            ActionError::InvalidPayload {
                key,
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// The room this action refers to.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload carries no valid room id.
    pub fn room_id(&self) -> Result<RoomId, Report<ActionError>> {
        self.parse(keys::ROOM_ID)
    }

    /// The task this action refers to.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload carries no valid task id.
    pub fn task_id(&self) -> Result<TaskId, Report<ActionError>> {
        self.parse(keys::TASK_ID)
    }

    /// Returns the entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl From<BTreeMap<String, String>> for ActionPayload {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl From<ActionPayload> for BTreeMap<String, String> {
    fn from(payload: ActionPayload) -> Self {
        payload.0
    }
}

/// A stored action reference. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRef {
    /// Opaque token embedded in the control.
    pub id: ActionRefId,
    /// What the control means.
    pub kind: ActionKind,
    /// Data the control carries.
    pub payload: ActionPayload,
}

impl ActionRef {
    /// Creates a new reference with a fresh id.
    #[must_use]
    pub fn new(kind: ActionKind, payload: ActionPayload) -> Self {
        Self {
            id: ActionRefId::new(),
            kind,
            payload,
        }
    }

    /// Returns the token to embed in a control.
    #[must_use]
    pub fn token(&self) -> String {
        self.id.to_string()
    }
}

/// Parses a token received from the transport.
///
/// A token that is not an id at all is indistinguishable from a forged
/// one and is reported as not found.
///
/// # Errors
///
/// Returns [`ActionError::NotFound`] if the token does not parse.
pub fn parse_token(token: &str) -> Result<ActionRefId, Report<ActionError>> {
    token.parse().map_err(|_| {
        ActionError::NotFound {
            id: token.to_string(),
        }
        .into()
    })
}

/// Trait for action reference storage.
#[async_trait]
pub trait ActionRegistry: Send + Sync {
    /// Stores a new action reference and returns it.
    async fn create(
        &self,
        kind: ActionKind,
        payload: ActionPayload,
    ) -> Result<ActionRef, Report<ActionError>>;

    /// Looks up an action reference.
    ///
    /// Fails with [`ActionError::NotFound`] for unknown ids.
    async fn resolve(&self, id: ActionRefId) -> Result<ActionRef, Report<ActionError>>;
}
