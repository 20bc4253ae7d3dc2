//! Session storage in `chat_session`.

use super::reason;
use async_trait::async_trait;
use planpoker_conversation::{ChatSession, SessionError, SessionStore};
use planpoker_core::UserId;
use rootcause::Report;
use sqlx::{FromRow, PgPool};
use std::collections::BTreeMap;
use tracing::instrument;

/// Row type for session queries.
#[derive(FromRow)]
struct SessionRow {
    user_id: i64,
    active_flow: String,
    active_step: String,
    step_data: serde_json::Value,
}

impl SessionRow {
    fn try_into_session(self) -> Result<ChatSession, SessionError> {
        let step_data: BTreeMap<String, String> =
            serde_json::from_value(self.step_data).map_err(|e| SessionError::StorageFailed {
                reason: format!("invalid step data for user {}: {e}", self.user_id),
            })?;
        Ok(ChatSession::from_parts(
            UserId::new(self.user_id),
            self.active_flow,
            self.active_step,
            step_data,
        ))
    }
}

fn storage_failed(e: sqlx::Error) -> SessionError {
    SessionError::StorageFailed { reason: reason(e) }
}

/// Session store backed by PostgreSQL.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    /// Creates a new store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    #[instrument(skip(self), level = "debug")]
    async fn get(&self, key: UserId) -> Result<ChatSession, Report<SessionError>> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT user_id, active_flow, active_step, step_data
            FROM chat_session
            WHERE user_id = $1
            "#,
        )
        .bind(key.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_failed)?;

        match row {
            Some(row) => Ok(row.try_into_session()?),
            None => Ok(ChatSession::new(key)),
        }
    }

    #[instrument(skip_all, level = "debug", fields(key = %session.key()))]
    async fn put(&self, session: &ChatSession) -> Result<(), Report<SessionError>> {
        let step_data =
            serde_json::to_value(session.step_data()).map_err(|e| SessionError::StorageFailed {
                reason: reason(e),
            })?;
        sqlx::query(
            r#"
            INSERT INTO chat_session (user_id, active_flow, active_step, step_data, updated_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (user_id) DO UPDATE
            SET active_flow = EXCLUDED.active_flow,
                active_step = EXCLUDED.active_step,
                step_data = EXCLUDED.step_data,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(session.key().get())
        .bind(session.active_flow())
        .bind(session.active_step())
        .bind(step_data)
        .execute(&self.pool)
        .await
        .map_err(storage_failed)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_decodes_step_data() {
        let row = SessionRow {
            user_id: 42,
            active_flow: "ADD_TASK".to_string(),
            active_step: "URL".to_string(),
            step_data: serde_json::json!({"roomId": "room_x", "name": "Login"}),
        };

        let session = row.try_into_session().expect("decode");

        assert_eq!(session.key(), UserId::new(42));
        assert_eq!(session.active_step(), "URL");
        assert_eq!(session.get_data("name"), Some("Login"));
    }

    #[test]
    fn non_string_step_data_is_rejected() {
        let row = SessionRow {
            user_id: 42,
            active_flow: "ADD_TASK".to_string(),
            active_step: "URL".to_string(),
            step_data: serde_json::json!({"page": 2}),
        };

        assert!(matches!(
            row.try_into_session(),
            Err(SessionError::StorageFailed { .. })
        ));
    }
}
