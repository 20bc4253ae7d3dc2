//! Action reference storage in `action_ref`. Rows are insert-only.

use super::reason;
use async_trait::async_trait;
use planpoker_conversation::{ActionError, ActionKind, ActionPayload, ActionRef, ActionRegistry};
use planpoker_core::ActionRefId;
use rootcause::Report;
use sqlx::{FromRow, PgPool};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::instrument;

/// Row type for action reference queries.
#[derive(FromRow)]
struct ActionRow {
    id: String,
    kind: String,
    payload: serde_json::Value,
}

impl ActionRow {
    fn try_into_action(self) -> Result<ActionRef, ActionError> {
        let corrupt = |what: String| ActionError::StorageFailed {
            reason: format!("corrupt action reference '{}': {what}", self.id),
        };
        let id = ActionRefId::from_str(&self.id).map_err(|e| corrupt(reason(e)))?;
        let kind = ActionKind::from_str(&self.kind).map_err(corrupt)?;
        let payload: BTreeMap<String, String> =
            serde_json::from_value(self.payload.clone()).map_err(|e| corrupt(reason(e)))?;
        Ok(ActionRef {
            id,
            kind,
            payload: payload.into(),
        })
    }
}

fn storage_failed(e: sqlx::Error) -> ActionError {
    ActionError::StorageFailed { reason: reason(e) }
}

/// Action registry backed by PostgreSQL.
#[derive(Clone)]
pub struct PgActionRegistry {
    pool: PgPool,
}

impl PgActionRegistry {
    /// Creates a new registry.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActionRegistry for PgActionRegistry {
    #[instrument(skip(self, payload), level = "debug")]
    async fn create(
        &self,
        kind: ActionKind,
        payload: ActionPayload,
    ) -> Result<ActionRef, Report<ActionError>> {
        let action = ActionRef::new(kind, payload);
        let payload = serde_json::to_value(&action.payload).map_err(|e| {
            ActionError::StorageFailed { reason: reason(e) }
        })?;
        sqlx::query(
            r#"
            INSERT INTO action_ref (id, kind, payload)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(action.id.to_string())
        .bind(action.kind.as_str())
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(storage_failed)?;

        Ok(action)
    }

    #[instrument(skip(self), level = "debug")]
    async fn resolve(&self, id: ActionRefId) -> Result<ActionRef, Report<ActionError>> {
        let row: Option<ActionRow> = sqlx::query_as(
            r#"
            SELECT id, kind, payload
            FROM action_ref
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_failed)?;

        match row {
            Some(row) => Ok(row.try_into_action()?),
            None => Err(ActionError::NotFound {
                id: id.to_string(),
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planpoker_conversation::keys;

    #[test]
    fn row_decodes_kind_and_payload() {
        let id = ActionRefId::new();
        let row = ActionRow {
            id: id.to_string(),
            kind: "TASK_RATE".to_string(),
            payload: serde_json::json!({"sum": "5"}),
        };

        let action = row.try_into_action().expect("decode");

        assert_eq!(action.id, id);
        assert_eq!(action.kind, ActionKind::AddVote);
        assert_eq!(action.payload.get(keys::SUM), Some("5"));
    }

    #[test]
    fn unknown_kind_is_a_storage_failure() {
        let row = ActionRow {
            id: ActionRefId::new().to_string(),
            kind: "DANCE".to_string(),
            payload: serde_json::json!({}),
        };

        assert!(matches!(
            row.try_into_action(),
            Err(ActionError::StorageFailed { .. })
        ));
    }
}
