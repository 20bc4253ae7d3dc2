//! Entity store traits.
//!
//! Each trait covers one capability. Components hold only the stores they
//! need; [`Stores`] bundles one backend behind every trait.

use crate::error::StoreError;
use async_trait::async_trait;
use planpoker_core::{ChatId, Rate, Room, RoomId, RoomStatus, Task, TaskId, User, UserId};
use rootcause::Report;
use std::sync::Arc;

/// Storage for rooms.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Persists a new room.
    async fn insert_room(&self, room: &Room) -> Result<(), Report<StoreError>>;

    /// Loads a room. Fails with [`StoreError::NotFound`] for unknown ids.
    async fn get_room(&self, id: RoomId) -> Result<Room, Report<StoreError>>;

    /// Binds a group chat to a room.
    async fn set_room_chat(&self, id: RoomId, chat_id: ChatId) -> Result<(), Report<StoreError>>;

    async fn set_room_status(
        &self,
        id: RoomId,
        status: RoomStatus,
    ) -> Result<(), Report<StoreError>>;

    /// Rooms owned by `owner` whose name contains `query`, ignoring case.
    async fn search_rooms(&self, owner: UserId, query: &str)
    -> Result<Vec<Room>, Report<StoreError>>;

    /// Rooms `user` is a member of, newest first.
    async fn rooms_of_member(&self, user: UserId) -> Result<Vec<Room>, Report<StoreError>>;
}

/// Storage for tasks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert_task(&self, task: &Task) -> Result<(), Report<StoreError>>;

    /// Loads a task. Fails with [`StoreError::NotFound`] for unknown ids.
    async fn get_task(&self, id: TaskId) -> Result<Task, Report<StoreError>>;

    /// Tasks of a room in creation order.
    async fn list_tasks(
        &self,
        room_id: RoomId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Task>, Report<StoreError>>;

    /// The oldest task of a room that is not finished.
    async fn next_unfinished_task(&self, room_id: RoomId)
    -> Result<Option<Task>, Report<StoreError>>;

    /// Marks a task finished. Idempotent; returns true only for the call
    /// that changed the flag.
    async fn set_task_finished(&self, id: TaskId) -> Result<bool, Report<StoreError>>;

    /// Clears the finished flag so voting can resume.
    async fn reopen_task(&self, id: TaskId) -> Result<(), Report<StoreError>>;

    /// Removes a task that has no votes yet.
    async fn delete_task(&self, id: TaskId) -> Result<(), Report<StoreError>>;

    async fn set_task_grade(&self, id: TaskId, grade: i32) -> Result<(), Report<StoreError>>;
}

/// Storage for votes.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Stores `rate`, replacing the sum of an existing vote by the same
    /// user on the same task. Returns the stored vote.
    async fn upsert_rate(&self, rate: &Rate) -> Result<Rate, Report<StoreError>>;

    /// Votes on a task in casting order.
    async fn list_rates(&self, task_id: TaskId) -> Result<Vec<Rate>, Report<StoreError>>;

    /// Removes every vote on a task, returning how many were removed.
    async fn delete_rates(&self, task_id: TaskId) -> Result<u64, Report<StoreError>>;

    async fn voters_count(&self, task_id: TaskId) -> Result<u64, Report<StoreError>>;

    /// Most frequent vote on a task; ties go to the smallest value.
    /// `None` when nobody voted.
    async fn mode(&self, task_id: TaskId) -> Result<Option<i32>, Report<StoreError>>;
}

/// Storage for room membership.
#[async_trait]
pub trait MemberStore: Send + Sync {
    /// Adds `user` to a room. Adding an existing member has no effect.
    async fn add_member(&self, room_id: RoomId, user: UserId) -> Result<(), Report<StoreError>>;

    async fn is_member(&self, room_id: RoomId, user: UserId) -> Result<bool, Report<StoreError>>;

    async fn members_count(&self, room_id: RoomId) -> Result<u64, Report<StoreError>>;

    /// Profiles of a room's members. Members without a profile are skipped.
    async fn list_members(&self, room_id: RoomId) -> Result<Vec<User>, Report<StoreError>>;
}

/// Storage for user profiles.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Inserts or refreshes a profile.
    async fn save_user(&self, user: &User) -> Result<(), Report<StoreError>>;

    async fn get_user(&self, id: UserId) -> Result<User, Report<StoreError>>;
}

/// One backend behind every store trait.
#[derive(Clone)]
pub struct Stores {
    pub rooms: Arc<dyn RoomStore>,
    pub tasks: Arc<dyn TaskStore>,
    pub rates: Arc<dyn RateStore>,
    pub members: Arc<dyn MemberStore>,
    pub users: Arc<dyn UserStore>,
}

impl Stores {
    /// Uses `backend` for every capability.
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: RoomStore + TaskStore + RateStore + MemberStore + UserStore + 'static,
    {
        Self {
            rooms: backend.clone(),
            tasks: backend.clone(),
            rates: backend.clone(),
            members: backend.clone(),
            users: backend,
        }
    }
}
