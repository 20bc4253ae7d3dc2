//! In-process entity store.

use crate::aggregator::mode_of;
use crate::error::StoreError;
use crate::store::{MemberStore, RateStore, RoomStore, TaskStore, UserStore};
use async_trait::async_trait;
use planpoker_core::{
    ChatId, Rate, Room, RoomId, RoomMember, RoomStatus, Task, TaskId, User, UserId,
};
use rootcause::Report;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Entities {
    rooms: Vec<Room>,
    tasks: Vec<Task>,
    rates: Vec<Rate>,
    members: HashSet<RoomMember>,
    users: HashMap<UserId, User>,
}

impl Entities {
    fn room_mut(&mut self, id: RoomId) -> Result<&mut Room, StoreError> {
        self.rooms
            .iter_mut()
            .find(|room| room.id == id)
            .ok_or_else(|| StoreError::not_found("room", id))
    }

    fn task_mut(&mut self, id: TaskId) -> Result<&mut Task, StoreError> {
        self.tasks
            .iter_mut()
            .find(|task| task.id == id)
            .ok_or_else(|| StoreError::not_found("task", id))
    }
}

/// Entity store keeping everything in memory, in insertion order.
///
/// Used when no database is configured and by tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEntityStore {
    entities: Arc<Mutex<Entities>>,
}

impl InMemoryEntityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entities(&self) -> Result<MutexGuard<'_, Entities>, StoreError> {
        self.entities
            .lock()
            .map_err(|_| StoreError::backend("entity store lock poisoned"))
    }
}

#[async_trait]
impl RoomStore for InMemoryEntityStore {
    async fn insert_room(&self, room: &Room) -> Result<(), Report<StoreError>> {
        self.entities()?.rooms.push(room.clone());
        Ok(())
    }

    async fn get_room(&self, id: RoomId) -> Result<Room, Report<StoreError>> {
        Ok(self.entities()?.room_mut(id)?.clone())
    }

    async fn set_room_chat(&self, id: RoomId, chat_id: ChatId) -> Result<(), Report<StoreError>> {
        self.entities()?.room_mut(id)?.chat_id = Some(chat_id);
        Ok(())
    }

    async fn set_room_status(
        &self,
        id: RoomId,
        status: RoomStatus,
    ) -> Result<(), Report<StoreError>> {
        self.entities()?.room_mut(id)?.status = status;
        Ok(())
    }

    async fn search_rooms(
        &self,
        owner: UserId,
        query: &str,
    ) -> Result<Vec<Room>, Report<StoreError>> {
        let needle = query.to_lowercase();
        let entities = self.entities()?;
        Ok(entities
            .rooms
            .iter()
            .filter(|room| room.owner == owner && room.name.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    async fn rooms_of_member(&self, user: UserId) -> Result<Vec<Room>, Report<StoreError>> {
        let entities = self.entities()?;
        Ok(entities
            .rooms
            .iter()
            .rev()
            .filter(|room| {
                entities.members.contains(&RoomMember {
                    user_id: user,
                    room_id: room.id,
                })
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TaskStore for InMemoryEntityStore {
    async fn insert_task(&self, task: &Task) -> Result<(), Report<StoreError>> {
        self.entities()?.tasks.push(task.clone());
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Task, Report<StoreError>> {
        Ok(self.entities()?.task_mut(id)?.clone())
    }

    async fn list_tasks(
        &self,
        room_id: RoomId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Task>, Report<StoreError>> {
        let entities = self.entities()?;
        Ok(entities
            .tasks
            .iter()
            .filter(|task| task.room_id == room_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn next_unfinished_task(
        &self,
        room_id: RoomId,
    ) -> Result<Option<Task>, Report<StoreError>> {
        let entities = self.entities()?;
        Ok(entities
            .tasks
            .iter()
            .find(|task| task.room_id == room_id && !task.finished)
            .cloned())
    }

    async fn set_task_finished(&self, id: TaskId) -> Result<bool, Report<StoreError>> {
        let mut entities = self.entities()?;
        let task = entities.task_mut(id)?;
        let changed = !task.finished;
        task.finished = true;
        Ok(changed)
    }

    async fn reopen_task(&self, id: TaskId) -> Result<(), Report<StoreError>> {
        self.entities()?.task_mut(id)?.finished = false;
        Ok(())
    }

    async fn delete_task(&self, id: TaskId) -> Result<(), Report<StoreError>> {
        let mut entities = self.entities()?;
        let before = entities.tasks.len();
        entities.tasks.retain(|task| task.id != id);
        if entities.tasks.len() == before {
            return Err(StoreError::not_found("task", id).into());
        }
        entities.rates.retain(|rate| rate.task_id != id);
        Ok(())
    }

    async fn set_task_grade(&self, id: TaskId, grade: i32) -> Result<(), Report<StoreError>> {
        self.entities()?.task_mut(id)?.grade = grade;
        Ok(())
    }
}

#[async_trait]
impl RateStore for InMemoryEntityStore {
    async fn upsert_rate(&self, rate: &Rate) -> Result<Rate, Report<StoreError>> {
        let mut entities = self.entities()?;
        let existing = entities
            .rates
            .iter()
            .position(|r| r.user_id == rate.user_id && r.task_id == rate.task_id);
        match existing {
            Some(index) => {
                entities.rates[index].sum = rate.sum;
                Ok(entities.rates[index].clone())
            }
            None => {
                entities.rates.push(rate.clone());
                Ok(rate.clone())
            }
        }
    }

    async fn list_rates(&self, task_id: TaskId) -> Result<Vec<Rate>, Report<StoreError>> {
        let entities = self.entities()?;
        Ok(entities
            .rates
            .iter()
            .filter(|rate| rate.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn delete_rates(&self, task_id: TaskId) -> Result<u64, Report<StoreError>> {
        let mut entities = self.entities()?;
        let before = entities.rates.len();
        entities.rates.retain(|rate| rate.task_id != task_id);
        Ok((before - entities.rates.len()) as u64)
    }

    async fn voters_count(&self, task_id: TaskId) -> Result<u64, Report<StoreError>> {
        let entities = self.entities()?;
        let voters: HashSet<UserId> = entities
            .rates
            .iter()
            .filter(|rate| rate.task_id == task_id)
            .map(|rate| rate.user_id)
            .collect();
        Ok(voters.len() as u64)
    }

    async fn mode(&self, task_id: TaskId) -> Result<Option<i32>, Report<StoreError>> {
        let entities = self.entities()?;
        let sums: Vec<i32> = entities
            .rates
            .iter()
            .filter(|rate| rate.task_id == task_id)
            .map(|rate| rate.sum)
            .collect();
        Ok(mode_of(&sums))
    }
}

#[async_trait]
impl MemberStore for InMemoryEntityStore {
    async fn add_member(&self, room_id: RoomId, user: UserId) -> Result<(), Report<StoreError>> {
        self.entities()?.members.insert(RoomMember {
            user_id: user,
            room_id,
        });
        Ok(())
    }

    async fn is_member(&self, room_id: RoomId, user: UserId) -> Result<bool, Report<StoreError>> {
        Ok(self.entities()?.members.contains(&RoomMember {
            user_id: user,
            room_id,
        }))
    }

    async fn members_count(&self, room_id: RoomId) -> Result<u64, Report<StoreError>> {
        let entities = self.entities()?;
        Ok(entities
            .members
            .iter()
            .filter(|member| member.room_id == room_id)
            .count() as u64)
    }

    async fn list_members(&self, room_id: RoomId) -> Result<Vec<User>, Report<StoreError>> {
        let entities = self.entities()?;
        let mut users: Vec<User> = entities
            .members
            .iter()
            .filter(|member| member.room_id == room_id)
            .filter_map(|member| entities.users.get(&member.user_id).cloned())
            .collect();
        users.sort_by_key(|user| user.id);
        Ok(users)
    }
}

#[async_trait]
impl UserStore for InMemoryEntityStore {
    async fn save_user(&self, user: &User) -> Result<(), Report<StoreError>> {
        self.entities()?.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<User, Report<StoreError>> {
        let entities = self.entities()?;
        entities
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("user", id).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_room_is_not_found() {
        let store = InMemoryEntityStore::new();
        let err = store.get_room(RoomId::new()).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            StoreError::NotFound { entity: "room", .. }
        ));
    }

    #[tokio::test]
    async fn search_matches_owner_and_name_ignoring_case() {
        let store = InMemoryEntityStore::new();
        let mine = Room::new("Backend Sprint", UserId::new(1), None);
        let other = Room::new("Backend Sprint", UserId::new(2), None);
        store.insert_room(&mine).await.expect("insert");
        store.insert_room(&other).await.expect("insert");

        let found = store.search_rooms(UserId::new(1), "sprint").await.expect("search");
        assert_eq!(found, vec![mine]);
    }

    #[tokio::test]
    async fn members_without_profile_are_skipped() {
        let store = InMemoryEntityStore::new();
        let room_id = RoomId::new();
        store.add_member(room_id, UserId::new(1)).await.expect("member");
        store.add_member(room_id, UserId::new(2)).await.expect("member");
        store
            .save_user(&User::new(UserId::new(2), "Ann", "ann"))
            .await
            .expect("user");

        let members = store.list_members(room_id).await.expect("members");
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].display_name, "Ann");
        assert_eq!(store.members_count(room_id).await.expect("count"), 2);
    }

    #[tokio::test]
    async fn only_the_first_finish_reports_a_change() {
        let store = InMemoryEntityStore::new();
        let task = Task::new(RoomId::new(), "Login", "");
        store.insert_task(&task).await.expect("insert");

        assert!(store.set_task_finished(task.id).await.expect("finish"));
        assert!(!store.set_task_finished(task.id).await.expect("finish again"));

        store.reopen_task(task.id).await.expect("reopen");
        assert!(!store.get_task(task.id).await.expect("task").finished);
        assert!(store.set_task_finished(task.id).await.expect("finish after reopen"));
    }

    #[tokio::test]
    async fn deleted_task_is_gone() {
        let store = InMemoryEntityStore::new();
        let task = Task::new(RoomId::new(), "Login", "");
        store.insert_task(&task).await.expect("insert");

        store.delete_task(task.id).await.expect("delete");

        let err = store.get_task(task.id).await.unwrap_err();
        assert!(matches!(err.current_context(), StoreError::NotFound { .. }));
        assert!(store.delete_task(task.id).await.is_err());
    }

    #[tokio::test]
    async fn rooms_of_member_lists_newest_first() {
        let store = InMemoryEntityStore::new();
        let older = Room::new("old", UserId::new(1), None);
        let newer = Room::new("new", UserId::new(1), None);
        store.insert_room(&older).await.expect("insert");
        store.insert_room(&newer).await.expect("insert");
        store.add_member(older.id, UserId::new(5)).await.expect("member");
        store.add_member(newer.id, UserId::new(5)).await.expect("member");

        let rooms = store.rooms_of_member(UserId::new(5)).await.expect("rooms");
        let names: Vec<&str> = rooms.iter().map(|room| room.name.as_str()).collect();
        assert_eq!(names, ["new", "old"]);
    }
}
