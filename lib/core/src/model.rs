//! Domain model: rooms, tasks, votes and their members.

use crate::id::{ChatId, RateId, RoomId, TaskId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a planning room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomStatus {
    /// Planning is in progress.
    Open,
    /// Planning was closed by the owner. Terminal.
    Finished,
}

impl RoomStatus {
    /// Returns the persisted representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "NEW",
            Self::Finished => "FINISHED",
        }
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" | "OPEN" => Ok(Self::Open),
            "FINISHED" => Ok(Self::Finished),
            other => Err(format!("unknown room status '{other}'")),
        }
    }
}

/// A planning room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    /// Unique room identifier.
    pub id: RoomId,
    /// Human-readable name.
    pub name: String,
    /// The user who created the room.
    pub owner: UserId,
    /// Group chat the room publishes to; `None` until bound.
    pub chat_id: Option<ChatId>,
    /// Planning status.
    pub status: RoomStatus,
    /// When the room was created.
    pub created_at: DateTime<Utc>,
}

impl Room {
    /// Creates a new open room.
    #[must_use]
    pub fn new(name: impl Into<String>, owner: UserId, chat_id: Option<ChatId>) -> Self {
        Self {
            id: RoomId::new(),
            name: name.into(),
            owner,
            chat_id,
            status: RoomStatus::Open,
            created_at: Utc::now(),
        }
    }

    /// Returns true if `user` created this room.
    #[must_use]
    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.owner == user
    }

    /// Returns true if planning was closed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status == RoomStatus::Finished
    }

    /// Returns true if the room has a group chat to publish tasks to.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.chat_id.is_some()
    }
}

/// A task under estimation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,
    /// Short task title.
    pub name: String,
    /// Link to the task in an external tracker.
    pub url: String,
    /// The room the task belongs to.
    pub room_id: RoomId,
    /// Whether voting on the task is over.
    pub finished: bool,
    /// Final grade. Meaningful only once set through the grading flow.
    pub grade: i32,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Creates a new open task.
    #[must_use]
    pub fn new(room_id: RoomId, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            name: name.into(),
            url: url.into(),
            room_id,
            finished: false,
            grade: 0,
            created_at: Utc::now(),
        }
    }
}

/// A single user's vote on a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rate {
    /// Unique vote identifier.
    pub id: RateId,
    /// The voter.
    pub user_id: UserId,
    /// The task voted on.
    pub task_id: TaskId,
    /// The estimate.
    pub sum: i32,
    /// When the vote was first cast.
    pub created_at: DateTime<Utc>,
}

impl Rate {
    /// Creates a new vote.
    #[must_use]
    pub fn new(user_id: UserId, task_id: TaskId, sum: i32) -> Self {
        Self {
            id: RateId::new(),
            user_id,
            task_id,
            sum,
            created_at: Utc::now(),
        }
    }
}

/// Membership of a user in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomMember {
    pub user_id: UserId,
    pub room_id: RoomId,
}

/// A chat-platform user profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Platform user id.
    pub id: UserId,
    /// Name shown in member lists.
    pub display_name: String,
    /// Platform handle, possibly empty.
    pub user_name: String,
}

impl User {
    /// Creates a user profile.
    #[must_use]
    pub fn new(id: UserId, display_name: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            user_name: user_name.into(),
        }
    }
}
