//! Room and task status transitions.
//!
//! Ownership checks live here. A refused transition is an outcome, not an
//! error: callers show the refusal and nothing changes.

use crate::error::{EstimationError, StoreResultExt};
use crate::store::{MemberStore, RoomStore, Stores, TaskStore};
use planpoker_core::{ChatId, Room, RoomId, RoomStatus, Task, TaskId, User, UserId};
use rootcause::Report;
use std::sync::Arc;
use tracing::info;

/// Tasks shown per page.
pub const TASK_PAGE_SIZE: usize = 10;

/// Result of closing planning in a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Planning is closed; `tasks` are every task of the room.
    Closed { room: Room, tasks: Vec<Task> },
    /// The caller does not own the room.
    NotOwner,
    /// Planning was closed before.
    AlreadyFinished,
}

/// Result of forcing the end of voting on a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishOutcome {
    Finished(Task),
    /// Voting had already ended, by quorum or an earlier reveal.
    AlreadyFinished,
    NotOwner,
}

/// Result of asking for the next task to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextTaskOutcome {
    Ready { room: Room, task: Task },
    NotOwner,
    /// Every task of the room is finished.
    NoneLeft { room: Room },
}

/// Whether a room can take new tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskGate {
    Ready(Room),
    /// No group chat to publish to yet.
    NotBound(Room),
    Finished(Room),
}

/// Room transitions: creation, chat binding, membership and closing.
#[derive(Clone)]
pub struct RoomLifecycle {
    rooms: Arc<dyn RoomStore>,
    tasks: Arc<dyn TaskStore>,
    members: Arc<dyn MemberStore>,
}

impl RoomLifecycle {
    #[must_use]
    pub fn from_stores(stores: &Stores) -> Self {
        Self {
            rooms: stores.rooms.clone(),
            tasks: stores.tasks.clone(),
            members: stores.members.clone(),
        }
    }

    /// Creates an open room. The owner becomes its first member.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub async fn create_room(
        &self,
        name: &str,
        owner: UserId,
        chat_id: Option<ChatId>,
    ) -> Result<Room, Report<EstimationError>> {
        let room = Room::new(name.trim(), owner, chat_id);
        self.rooms.insert_room(&room).await.lift()?;
        self.members.add_member(room.id, owner).await.lift()?;
        info!(room_id = %room.id, owner = %owner, bound = room.is_bound(), "room created");
        Ok(room)
    }

    /// Loads a room.
    ///
    /// # Errors
    ///
    /// Returns an error if the room does not exist or storage fails.
    pub async fn room(&self, room_id: RoomId) -> Result<Room, Report<EstimationError>> {
        self.rooms.get_room(room_id).await.lift()
    }

    /// Binds a group chat to a room and returns the updated room.
    ///
    /// # Errors
    ///
    /// Returns an error if the room does not exist or storage fails.
    pub async fn bind_chat(
        &self,
        room_id: RoomId,
        chat_id: ChatId,
    ) -> Result<Room, Report<EstimationError>> {
        self.rooms.set_room_chat(room_id, chat_id).await.lift()?;
        info!(room_id = %room_id, chat_id = %chat_id, "chat bound");
        self.room(room_id).await
    }

    /// Adds `user` to a room. Joining twice has no further effect.
    ///
    /// # Errors
    ///
    /// Returns an error if the room does not exist or storage fails.
    pub async fn join(&self, room_id: RoomId, user: UserId) -> Result<Room, Report<EstimationError>> {
        let room = self.room(room_id).await?;
        self.members.add_member(room_id, user).await.lift()?;
        Ok(room)
    }

    /// Returns true if `user` joined the room.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub async fn is_member(&self, room_id: RoomId, user: UserId) -> Result<bool, Report<EstimationError>> {
        self.members.is_member(room_id, user).await.lift()
    }

    /// Members of a room with a known profile.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub async fn members(&self, room_id: RoomId) -> Result<Vec<User>, Report<EstimationError>> {
        self.members.list_members(room_id).await.lift()
    }

    /// Rooms `user` takes part in.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub async fn rooms_of(&self, user: UserId) -> Result<Vec<Room>, Report<EstimationError>> {
        self.rooms.rooms_of_member(user).await.lift()
    }

    /// Rooms owned by `owner` matching `query`.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub async fn search(
        &self,
        owner: UserId,
        query: &str,
    ) -> Result<Vec<Room>, Report<EstimationError>> {
        self.rooms.search_rooms(owner, query.trim()).await.lift()
    }

    /// Closes planning. Only the owner may close, and only once.
    ///
    /// # Errors
    ///
    /// Returns an error if the room does not exist or storage fails.
    pub async fn close_planning(
        &self,
        room_id: RoomId,
        caller: UserId,
    ) -> Result<CloseOutcome, Report<EstimationError>> {
        let mut room = self.room(room_id).await?;
        if !room.is_owned_by(caller) {
            info!(room_id = %room_id, caller = %caller, "close refused: not owner");
            return Ok(CloseOutcome::NotOwner);
        }
        if room.is_finished() {
            return Ok(CloseOutcome::AlreadyFinished);
        }

        let tasks = self.tasks.list_tasks(room_id, 0, usize::MAX).await.lift()?;
        self.rooms
            .set_room_status(room_id, RoomStatus::Finished)
            .await
            .lift()?;
        room.status = RoomStatus::Finished;
        info!(room_id = %room_id, tasks = tasks.len(), "planning closed");
        Ok(CloseOutcome::Closed { room, tasks })
    }
}

/// Task transitions: creation, forced finish, grading and publishing order.
#[derive(Clone)]
pub struct TaskLifecycle {
    rooms: Arc<dyn RoomStore>,
    tasks: Arc<dyn TaskStore>,
}

impl TaskLifecycle {
    #[must_use]
    pub fn from_stores(stores: &Stores) -> Self {
        Self {
            rooms: stores.rooms.clone(),
            tasks: stores.tasks.clone(),
        }
    }

    /// Loads a task.
    ///
    /// # Errors
    ///
    /// Returns an error if the task does not exist or storage fails.
    pub async fn task(&self, task_id: TaskId) -> Result<Task, Report<EstimationError>> {
        self.tasks.get_task(task_id).await.lift()
    }

    /// Checks whether a room can take new tasks.
    ///
    /// # Errors
    ///
    /// Returns an error if the room does not exist or storage fails.
    pub async fn gate(&self, room_id: RoomId) -> Result<TaskGate, Report<EstimationError>> {
        let room = self.rooms.get_room(room_id).await.lift()?;
        Ok(if room.is_finished() {
            TaskGate::Finished(room)
        } else if !room.is_bound() {
            TaskGate::NotBound(room)
        } else {
            TaskGate::Ready(room)
        })
    }

    /// Adds an open task to a room.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub async fn create_task(
        &self,
        room_id: RoomId,
        name: &str,
        url: &str,
    ) -> Result<Task, Report<EstimationError>> {
        let task = Task::new(room_id, name.trim(), url.trim());
        self.save_task(&task).await?;
        Ok(task)
    }

    /// Persists a task built by the caller.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub async fn save_task(&self, task: &Task) -> Result<(), Report<EstimationError>> {
        self.tasks.insert_task(task).await.lift()?;
        info!(room_id = %task.room_id, task_id = %task.id, "task created");
        Ok(())
    }

    /// One page of a room's tasks, `page` counted from zero.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub async fn page(&self, room_id: RoomId, page: usize) -> Result<Vec<Task>, Report<EstimationError>> {
        self.tasks
            .list_tasks(room_id, page.saturating_mul(TASK_PAGE_SIZE), TASK_PAGE_SIZE)
            .await
            .lift()
    }

    /// Ends voting on a task on the room owner's request.
    ///
    /// # Errors
    ///
    /// Returns an error if the task or room does not exist or storage fails.
    pub async fn force_finish(
        &self,
        task_id: TaskId,
        caller: UserId,
    ) -> Result<FinishOutcome, Report<EstimationError>> {
        let mut task = self.task(task_id).await?;
        let room = self.rooms.get_room(task.room_id).await.lift()?;
        if !room.is_owned_by(caller) {
            return Ok(FinishOutcome::NotOwner);
        }
        if !self.tasks.set_task_finished(task_id).await.lift()? {
            return Ok(FinishOutcome::AlreadyFinished);
        }
        task.finished = true;
        info!(task_id = %task_id, "voting finished by owner");
        Ok(FinishOutcome::Finished(task))
    }

    /// Opens a task for voting again. Pair with
    /// [`EstimationAggregator::cancel_voting`](crate::EstimationAggregator::cancel_voting)
    /// to restart an estimate.
    ///
    /// # Errors
    ///
    /// Returns an error if the task does not exist or storage fails.
    pub async fn reopen(&self, task_id: TaskId) -> Result<(), Report<EstimationError>> {
        self.tasks.reopen_task(task_id).await.lift()?;
        info!(task_id = %task_id, "voting reopened");
        Ok(())
    }

    /// Removes a task whose card never reached the room.
    ///
    /// # Errors
    ///
    /// Returns an error if the task does not exist or storage fails.
    pub async fn discard_task(&self, task_id: TaskId) -> Result<(), Report<EstimationError>> {
        self.tasks.delete_task(task_id).await.lift()?;
        info!(task_id = %task_id, "task discarded");
        Ok(())
    }

    /// Records the final grade of a task. Independent of voting status.
    ///
    /// # Errors
    ///
    /// Returns an error if the task does not exist or storage fails.
    pub async fn set_grade(&self, task_id: TaskId, grade: i32) -> Result<Task, Report<EstimationError>> {
        self.tasks.set_task_grade(task_id, grade).await.lift()?;
        info!(task_id = %task_id, grade, "grade set");
        self.task(task_id).await
    }

    /// Picks the oldest unfinished task of a room for publishing.
    ///
    /// # Errors
    ///
    /// Returns an error if the room does not exist or storage fails.
    pub async fn next_task(
        &self,
        room_id: RoomId,
        caller: UserId,
    ) -> Result<NextTaskOutcome, Report<EstimationError>> {
        let room = self.rooms.get_room(room_id).await.lift()?;
        if !room.is_owned_by(caller) {
            return Ok(NextTaskOutcome::NotOwner);
        }
        match self.tasks.next_unfinished_task(room_id).await.lift()? {
            Some(task) => Ok(NextTaskOutcome::Ready { room, task }),
            None => Ok(NextTaskOutcome::NoneLeft { room }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryEntityStore;

    fn lifecycles() -> (Arc<InMemoryEntityStore>, RoomLifecycle, TaskLifecycle) {
        let store = Arc::new(InMemoryEntityStore::new());
        let stores = Stores::from_backend(store.clone());
        (
            store,
            RoomLifecycle::from_stores(&stores),
            TaskLifecycle::from_stores(&stores),
        )
    }

    #[tokio::test]
    async fn owner_is_first_member() {
        let (store, rooms, _) = lifecycles();
        let room = rooms
            .create_room("  Sprint 7 ", UserId::new(1), None)
            .await
            .expect("create");

        assert_eq!(room.name, "Sprint 7");
        assert_eq!(store.members_count(room.id).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn joining_twice_counts_once() {
        let (store, rooms, _) = lifecycles();
        let room = rooms.create_room("R", UserId::new(1), None).await.expect("create");

        rooms.join(room.id, UserId::new(2)).await.expect("join");
        rooms.join(room.id, UserId::new(2)).await.expect("join again");

        assert_eq!(store.members_count(room.id).await.expect("count"), 2);
    }

    #[tokio::test]
    async fn non_owner_cannot_close_planning() {
        let (store, rooms, _) = lifecycles();
        let room = rooms.create_room("R", UserId::new(1), None).await.expect("create");

        let outcome = rooms
            .close_planning(room.id, UserId::new(2))
            .await
            .expect("close");

        assert_eq!(outcome, CloseOutcome::NotOwner);
        assert_eq!(
            store.get_room(room.id).await.expect("room").status,
            RoomStatus::Open
        );
    }

    #[tokio::test]
    async fn owner_closes_planning_once() {
        let (_, rooms, tasks) = lifecycles();
        let room = rooms.create_room("R", UserId::new(1), None).await.expect("create");
        tasks.create_task(room.id, "A", "").await.expect("task");

        let first = rooms.close_planning(room.id, UserId::new(1)).await.expect("close");
        let CloseOutcome::Closed { room: closed, tasks } = first else {
            panic!("expected planning to close");
        };
        assert!(closed.is_finished());
        assert_eq!(tasks.len(), 1);

        let second = rooms.close_planning(room.id, UserId::new(1)).await.expect("close");
        assert_eq!(second, CloseOutcome::AlreadyFinished);
    }

    #[tokio::test]
    async fn gate_requires_bound_open_room() {
        let (_, rooms, tasks) = lifecycles();
        let room = rooms.create_room("R", UserId::new(1), None).await.expect("create");
        assert!(matches!(tasks.gate(room.id).await.expect("gate"), TaskGate::NotBound(_)));

        rooms.bind_chat(room.id, ChatId::new(-100_42)).await.expect("bind");
        assert!(matches!(tasks.gate(room.id).await.expect("gate"), TaskGate::Ready(_)));

        rooms.close_planning(room.id, UserId::new(1)).await.expect("close");
        assert!(matches!(tasks.gate(room.id).await.expect("gate"), TaskGate::Finished(_)));
    }

    #[tokio::test]
    async fn next_task_walks_unfinished_in_order() {
        let (_, rooms, tasks) = lifecycles();
        let owner = UserId::new(1);
        let room = rooms.create_room("R", owner, None).await.expect("create");
        let first = tasks.create_task(room.id, "first", "").await.expect("task");
        let second = tasks.create_task(room.id, "second", "").await.expect("task");

        let NextTaskOutcome::Ready { task, .. } = tasks.next_task(room.id, owner).await.expect("next") else {
            panic!("expected a task");
        };
        assert_eq!(task.id, first.id);

        tasks.force_finish(first.id, owner).await.expect("finish");
        let NextTaskOutcome::Ready { task, .. } = tasks.next_task(room.id, owner).await.expect("next") else {
            panic!("expected a task");
        };
        assert_eq!(task.id, second.id);

        tasks.force_finish(second.id, owner).await.expect("finish");
        assert!(matches!(
            tasks.next_task(room.id, owner).await.expect("next"),
            NextTaskOutcome::NoneLeft { .. }
        ));
        assert_eq!(
            tasks.next_task(room.id, UserId::new(9)).await.expect("next"),
            NextTaskOutcome::NotOwner
        );
    }

    #[tokio::test]
    async fn only_owner_forces_finish() {
        let (_, rooms, tasks) = lifecycles();
        let room = rooms.create_room("R", UserId::new(1), None).await.expect("create");
        let task = tasks.create_task(room.id, "A", "").await.expect("task");

        let refused = tasks.force_finish(task.id, UserId::new(2)).await.expect("finish");
        assert_eq!(refused, FinishOutcome::NotOwner);
        assert!(!tasks.task(task.id).await.expect("task").finished);

        let done = tasks.force_finish(task.id, UserId::new(1)).await.expect("finish");
        assert!(matches!(done, FinishOutcome::Finished(t) if t.finished));

        let again = tasks.force_finish(task.id, UserId::new(1)).await.expect("finish");
        assert_eq!(again, FinishOutcome::AlreadyFinished);
    }

    #[tokio::test]
    async fn reopened_task_is_next_again() {
        let (_, rooms, tasks) = lifecycles();
        let owner = UserId::new(1);
        let room = rooms.create_room("R", owner, None).await.expect("create");
        let task = tasks.create_task(room.id, "A", "").await.expect("task");
        tasks.force_finish(task.id, owner).await.expect("finish");

        tasks.reopen(task.id).await.expect("reopen");

        assert!(!tasks.task(task.id).await.expect("task").finished);
        let NextTaskOutcome::Ready { task: next, .. } = tasks.next_task(room.id, owner).await.expect("next") else {
            panic!("expected the reopened task");
        };
        assert_eq!(next.id, task.id);
    }

    #[tokio::test]
    async fn discarded_task_leaves_the_room() {
        let (_, rooms, tasks) = lifecycles();
        let room = rooms.create_room("R", UserId::new(1), None).await.expect("create");
        let task = tasks.create_task(room.id, "A", "").await.expect("task");

        tasks.discard_task(task.id).await.expect("discard");

        assert!(tasks.page(room.id, 0).await.expect("page").is_empty());
        assert!(tasks.task(task.id).await.is_err());
    }

    #[tokio::test]
    async fn grade_is_independent_of_finished() {
        let (_, rooms, tasks) = lifecycles();
        let room = rooms.create_room("R", UserId::new(1), None).await.expect("create");
        let task = tasks.create_task(room.id, "A", "").await.expect("task");

        let graded = tasks.set_grade(task.id, 13).await.expect("grade");
        assert_eq!(graded.grade, 13);
        assert!(!graded.finished);
    }

    #[tokio::test]
    async fn pages_hold_ten_tasks() {
        let (_, rooms, tasks) = lifecycles();
        let room = rooms.create_room("R", UserId::new(1), None).await.expect("create");
        for n in 0..12 {
            tasks
                .create_task(room.id, &format!("task {n}"), "")
                .await
                .expect("task");
        }

        let first = tasks.page(room.id, 0).await.expect("page");
        let second = tasks.page(room.id, 1).await.expect("page");
        assert_eq!(first.len(), TASK_PAGE_SIZE);
        assert_eq!(first[0].name, "task 0");
        assert_eq!(second.len(), 2);
        assert_eq!(second[1].name, "task 11");
    }
}
