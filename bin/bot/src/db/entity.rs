//! Rooms, tasks, votes, members and profiles.

use super::{contains_pattern, reason, to_count};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use planpoker_core::{ChatId, Rate, RateId, Room, RoomId, RoomStatus, Task, TaskId, User, UserId};
use planpoker_estimation::{MemberStore, RateStore, RoomStore, StoreError, TaskStore, UserStore};
use rootcause::Report;
use sqlx::{FromRow, PgPool};
use std::fmt;
use std::str::FromStr;
use tracing::instrument;

fn corrupt(entity: &'static str, e: impl fmt::Display) -> StoreError {
    StoreError::Corrupt {
        entity,
        reason: reason(e),
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::backend(e)
}

/// Row type for room queries.
#[derive(FromRow)]
struct RoomRow {
    id: String,
    name: String,
    owner_id: i64,
    chat_id: Option<i64>,
    status: String,
    created_at: DateTime<Utc>,
}

impl RoomRow {
    fn try_into_room(self) -> Result<Room, StoreError> {
        let id = RoomId::from_str(&self.id).map_err(|e| corrupt("room", e))?;
        let status = RoomStatus::from_str(&self.status).map_err(|e| corrupt("room", e))?;
        Ok(Room {
            id,
            name: self.name,
            owner: UserId::new(self.owner_id),
            chat_id: self.chat_id.map(ChatId::new),
            status,
            created_at: self.created_at,
        })
    }
}

/// Row type for task queries.
#[derive(FromRow)]
struct TaskRow {
    id: String,
    room_id: String,
    name: String,
    url: String,
    finished: bool,
    grade: i32,
    created_at: DateTime<Utc>,
}

impl TaskRow {
    fn try_into_task(self) -> Result<Task, StoreError> {
        let id = TaskId::from_str(&self.id).map_err(|e| corrupt("task", e))?;
        let room_id = RoomId::from_str(&self.room_id).map_err(|e| corrupt("task", e))?;
        Ok(Task {
            id,
            name: self.name,
            url: self.url,
            room_id,
            finished: self.finished,
            grade: self.grade,
            created_at: self.created_at,
        })
    }
}

/// Row type for vote queries.
#[derive(FromRow)]
struct RateRow {
    id: String,
    user_id: i64,
    task_id: String,
    sum: i32,
    created_at: DateTime<Utc>,
}

impl RateRow {
    fn try_into_rate(self) -> Result<Rate, StoreError> {
        let id = RateId::from_str(&self.id).map_err(|e| corrupt("rate", e))?;
        let task_id = TaskId::from_str(&self.task_id).map_err(|e| corrupt("rate", e))?;
        Ok(Rate {
            id,
            user_id: UserId::new(self.user_id),
            task_id,
            sum: self.sum,
            created_at: self.created_at,
        })
    }
}

/// Row type for profile queries.
#[derive(FromRow)]
struct ProfileRow {
    user_id: i64,
    display_name: String,
    user_name: String,
}

impl From<ProfileRow> for User {
    fn from(row: ProfileRow) -> Self {
        User::new(UserId::new(row.user_id), row.display_name, row.user_name)
    }
}

fn collect<R, T>(
    rows: Vec<R>,
    convert: impl Fn(R) -> Result<T, StoreError>,
) -> Result<Vec<T>, Report<StoreError>> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(convert(row)?);
    }
    Ok(out)
}

/// Entity store backed by PostgreSQL.
#[derive(Clone)]
pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    /// Creates a new store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fails with not-found when an update touched no row.
    fn expect_row(
        result: sqlx::postgres::PgQueryResult,
        entity: &'static str,
        id: impl ToString,
    ) -> Result<(), Report<StoreError>> {
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(entity, id).into());
        }
        Ok(())
    }
}

#[async_trait]
impl RoomStore for PgEntityStore {
    #[instrument(skip_all, level = "debug", fields(room_id = %room.id))]
    async fn insert_room(&self, room: &Room) -> Result<(), Report<StoreError>> {
        sqlx::query(
            r#"
            INSERT INTO room (id, name, owner_id, chat_id, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(room.id.to_string())
        .bind(&room.name)
        .bind(room.owner.get())
        .bind(room.chat_id.map(|chat_id| chat_id.get()))
        .bind(room.status.as_str())
        .bind(room.created_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_room(&self, id: RoomId) -> Result<Room, Report<StoreError>> {
        let row: Option<RoomRow> = sqlx::query_as(
            r#"
            SELECT id, name, owner_id, chat_id, status, created_at
            FROM room
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(row) => Ok(row.try_into_room()?),
            None => Err(StoreError::not_found("room", id).into()),
        }
    }

    async fn set_room_chat(&self, id: RoomId, chat_id: ChatId) -> Result<(), Report<StoreError>> {
        let result = sqlx::query("UPDATE room SET chat_id = $2 WHERE id = $1")
            .bind(id.to_string())
            .bind(chat_id.get())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Self::expect_row(result, "room", id)
    }

    async fn set_room_status(
        &self,
        id: RoomId,
        status: RoomStatus,
    ) -> Result<(), Report<StoreError>> {
        let result = sqlx::query("UPDATE room SET status = $2 WHERE id = $1")
            .bind(id.to_string())
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Self::expect_row(result, "room", id)
    }

    #[instrument(skip(self), level = "debug")]
    async fn search_rooms(
        &self,
        owner: UserId,
        query: &str,
    ) -> Result<Vec<Room>, Report<StoreError>> {
        let rows: Vec<RoomRow> = sqlx::query_as(
            r#"
            SELECT id, name, owner_id, chat_id, status, created_at
            FROM room
            WHERE owner_id = $1 AND name ILIKE $2 ESCAPE '\'
            ORDER BY created_at DESC
            "#,
        )
        .bind(owner.get())
        .bind(contains_pattern(query))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        collect(rows, RoomRow::try_into_room)
    }

    async fn rooms_of_member(&self, user: UserId) -> Result<Vec<Room>, Report<StoreError>> {
        let rows: Vec<RoomRow> = sqlx::query_as(
            r#"
            SELECT r.id, r.name, r.owner_id, r.chat_id, r.status, r.created_at
            FROM room r
            JOIN room_member m ON m.room_id = r.id
            WHERE m.user_id = $1
            ORDER BY r.created_at DESC
            "#,
        )
        .bind(user.get())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        collect(rows, RoomRow::try_into_room)
    }
}

#[async_trait]
impl TaskStore for PgEntityStore {
    #[instrument(skip_all, level = "debug", fields(task_id = %task.id))]
    async fn insert_task(&self, task: &Task) -> Result<(), Report<StoreError>> {
        sqlx::query(
            r#"
            INSERT INTO task (id, room_id, name, url, finished, grade, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(task.id.to_string())
        .bind(task.room_id.to_string())
        .bind(&task.name)
        .bind(&task.url)
        .bind(task.finished)
        .bind(task.grade)
        .bind(task.created_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_task(&self, id: TaskId) -> Result<Task, Report<StoreError>> {
        let row: Option<TaskRow> = sqlx::query_as(
            r#"
            SELECT id, room_id, name, url, finished, grade, created_at
            FROM task
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(row) => Ok(row.try_into_task()?),
            None => Err(StoreError::not_found("task", id).into()),
        }
    }

    async fn list_tasks(
        &self,
        room_id: RoomId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Task>, Report<StoreError>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            r#"
            SELECT id, room_id, name, url, finished, grade, created_at
            FROM task
            WHERE room_id = $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(room_id.to_string())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        collect(rows, TaskRow::try_into_task)
    }

    async fn next_unfinished_task(
        &self,
        room_id: RoomId,
    ) -> Result<Option<Task>, Report<StoreError>> {
        let row: Option<TaskRow> = sqlx::query_as(
            r#"
            SELECT id, room_id, name, url, finished, grade, created_at
            FROM task
            WHERE room_id = $1 AND NOT finished
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(room_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.map(TaskRow::try_into_task).transpose()?)
    }

    /// Concurrent callers serialize on the row lock, so exactly one of
    /// them sees the row change.
    async fn set_task_finished(&self, id: TaskId) -> Result<bool, Report<StoreError>> {
        let result = sqlx::query("UPDATE task SET finished = TRUE WHERE id = $1 AND NOT finished")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM task WHERE id = $1)")
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        if !exists {
            return Err(StoreError::not_found("task", id).into());
        }
        Ok(false)
    }

    async fn reopen_task(&self, id: TaskId) -> Result<(), Report<StoreError>> {
        let result = sqlx::query("UPDATE task SET finished = FALSE WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Self::expect_row(result, "task", id)
    }

    /// Votes go with the task through the `rate` foreign key.
    async fn delete_task(&self, id: TaskId) -> Result<(), Report<StoreError>> {
        let result = sqlx::query("DELETE FROM task WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Self::expect_row(result, "task", id)
    }

    async fn set_task_grade(&self, id: TaskId, grade: i32) -> Result<(), Report<StoreError>> {
        let result = sqlx::query("UPDATE task SET grade = $2 WHERE id = $1")
            .bind(id.to_string())
            .bind(grade)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Self::expect_row(result, "task", id)
    }
}

#[async_trait]
impl RateStore for PgEntityStore {
    /// Atomic on the `(user_id, task_id)` unique constraint.
    #[instrument(skip_all, level = "debug", fields(task_id = %rate.task_id, user = %rate.user_id))]
    async fn upsert_rate(&self, rate: &Rate) -> Result<Rate, Report<StoreError>> {
        let row: RateRow = sqlx::query_as(
            r#"
            INSERT INTO rate (id, user_id, task_id, sum, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, task_id) DO UPDATE
            SET sum = EXCLUDED.sum
            RETURNING id, user_id, task_id, sum, created_at
            "#,
        )
        .bind(rate.id.to_string())
        .bind(rate.user_id.get())
        .bind(rate.task_id.to_string())
        .bind(rate.sum)
        .bind(rate.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.try_into_rate()?)
    }

    async fn list_rates(&self, task_id: TaskId) -> Result<Vec<Rate>, Report<StoreError>> {
        let rows: Vec<RateRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, task_id, sum, created_at
            FROM rate
            WHERE task_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        collect(rows, RateRow::try_into_rate)
    }

    async fn delete_rates(&self, task_id: TaskId) -> Result<u64, Report<StoreError>> {
        let result = sqlx::query("DELETE FROM rate WHERE task_id = $1")
            .bind(task_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn voters_count(&self, task_id: TaskId) -> Result<u64, Report<StoreError>> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT user_id) FROM rate WHERE task_id = $1")
                .bind(task_id.to_string())
                .fetch_one(&self.pool)
                .await
                .map_err(backend)?;
        Ok(to_count(count))
    }

    /// `mode()` returns the first most frequent value in sort order, so
    /// ties go to the smallest vote.
    async fn mode(&self, task_id: TaskId) -> Result<Option<i32>, Report<StoreError>> {
        let mode: Option<i32> = sqlx::query_scalar(
            "SELECT mode() WITHIN GROUP (ORDER BY sum) FROM rate WHERE task_id = $1",
        )
        .bind(task_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(mode)
    }
}

#[async_trait]
impl MemberStore for PgEntityStore {
    async fn add_member(&self, room_id: RoomId, user: UserId) -> Result<(), Report<StoreError>> {
        sqlx::query(
            r#"
            INSERT INTO room_member (room_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (room_id, user_id) DO NOTHING
            "#,
        )
        .bind(room_id.to_string())
        .bind(user.get())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn is_member(&self, room_id: RoomId, user: UserId) -> Result<bool, Report<StoreError>> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM room_member WHERE room_id = $1 AND user_id = $2)",
        )
        .bind(room_id.to_string())
        .bind(user.get())
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(exists)
    }

    async fn members_count(&self, room_id: RoomId) -> Result<u64, Report<StoreError>> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM room_member WHERE room_id = $1")
            .bind(room_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        Ok(to_count(count))
    }

    async fn list_members(&self, room_id: RoomId) -> Result<Vec<User>, Report<StoreError>> {
        let rows: Vec<ProfileRow> = sqlx::query_as(
            r#"
            SELECT p.user_id, p.display_name, p.user_name
            FROM room_member m
            JOIN profile p ON p.user_id = m.user_id
            WHERE m.room_id = $1
            ORDER BY p.user_id ASC
            "#,
        )
        .bind(room_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows.into_iter().map(User::from).collect())
    }
}

#[async_trait]
impl UserStore for PgEntityStore {
    async fn save_user(&self, user: &User) -> Result<(), Report<StoreError>> {
        sqlx::query(
            r#"
            INSERT INTO profile (user_id, display_name, user_name, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (user_id) DO UPDATE
            SET display_name = EXCLUDED.display_name,
                user_name = EXCLUDED.user_name,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user.id.get())
        .bind(&user.display_name)
        .bind(&user.user_name)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<User, Report<StoreError>> {
        let row: Option<ProfileRow> = sqlx::query_as(
            r#"
            SELECT user_id, display_name, user_name
            FROM profile
            WHERE user_id = $1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(User::from)
            .ok_or_else(|| StoreError::not_found("profile", id).into())
    }
}
