//! In-process session and action stores.
//!
//! Used when the bot runs without a database and by tests. State lives as
//! long as the process.

use crate::action::{ActionKind, ActionPayload, ActionRef, ActionRegistry};
use crate::error::{ActionError, SessionError};
use crate::session::{ChatSession, SessionStore};
use async_trait::async_trait;
use planpoker_core::{ActionRefId, UserId};
use rootcause::Report;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Session store backed by a map.
#[derive(Debug, Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<Mutex<HashMap<UserId, ChatSession>>>,
}

impl InMemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> Result<MutexGuard<'_, HashMap<UserId, ChatSession>>, SessionError> {
        self.sessions.lock().map_err(|_| SessionError::StorageFailed {
            reason: "session map lock poisoned".to_string(),
        })
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, key: UserId) -> Result<ChatSession, Report<SessionError>> {
        let sessions = self.sessions()?;
        Ok(sessions
            .get(&key)
            .cloned()
            .unwrap_or_else(|| ChatSession::new(key)))
    }

    async fn put(&self, session: &ChatSession) -> Result<(), Report<SessionError>> {
        self.sessions()?.insert(session.key(), session.clone());
        Ok(())
    }
}

/// Action registry backed by a map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryActionRegistry {
    refs: Arc<Mutex<HashMap<ActionRefId, ActionRef>>>,
}

impl InMemoryActionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored references.
    #[must_use]
    pub fn len(&self) -> usize {
        self.refs.lock().map(|refs| refs.len()).unwrap_or(0)
    }

    /// Returns true if nothing was registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns every stored reference of `kind`.
    #[must_use]
    pub fn find(&self, kind: ActionKind) -> Vec<ActionRef> {
        self.refs
            .lock()
            .map(|refs| refs.values().filter(|r| r.kind == kind).cloned().collect())
            .unwrap_or_default()
    }

    fn refs(&self) -> Result<MutexGuard<'_, HashMap<ActionRefId, ActionRef>>, ActionError> {
        self.refs.lock().map_err(|_| ActionError::StorageFailed {
            reason: "action map lock poisoned".to_string(),
        })
    }
}

#[async_trait]
impl ActionRegistry for InMemoryActionRegistry {
    async fn create(
        &self,
        kind: ActionKind,
        payload: ActionPayload,
    ) -> Result<ActionRef, Report<ActionError>> {
        let action = ActionRef::new(kind, payload);
        self.refs()?.insert(action.id, action.clone());
        Ok(action)
    }

    async fn resolve(&self, id: ActionRefId) -> Result<ActionRef, Report<ActionError>> {
        let refs = self.refs()?;
        refs.get(&id).cloned().ok_or_else(|| {
            ActionError::NotFound {
                id: id.to_string(),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::keys;

    #[tokio::test]
    async fn absent_session_materializes_empty() {
        let store = InMemorySessionStore::new();
        let session = store.get(UserId::new(5)).await.expect("get");

        assert_eq!(session.key(), UserId::new(5));
        assert!(session.is_idle());
    }

    #[tokio::test]
    async fn put_then_get_returns_latest() {
        let store = InMemorySessionStore::new();
        let mut session = ChatSession::new(UserId::new(5));
        session.start_flow("NEW_ROOM");
        session.advance_to("NAME");
        store.put(&session).await.expect("put");

        session.advance_to("SETTING");
        store.put(&session).await.expect("put again");

        let loaded = store.get(UserId::new(5)).await.expect("get");
        assert_eq!(loaded.active_step(), "SETTING");
    }

    #[tokio::test]
    async fn created_action_resolves() {
        let registry = InMemoryActionRegistry::new();
        let created = registry
            .create(ActionKind::ShowTasks, ActionPayload::new().with(keys::PAGE, 0))
            .await
            .expect("create");

        let resolved = registry.resolve(created.id).await.expect("resolve");
        assert_eq!(resolved, created);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn unknown_action_is_not_found() {
        let registry = InMemoryActionRegistry::new();
        let err = registry.resolve(ActionRefId::new()).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            ActionError::NotFound { .. }
        ));
    }
}
