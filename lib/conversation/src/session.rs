//! Per-user dialog sessions.
//!
//! A session is the only memory a dialog has between two inbound events.
//! It is read eagerly at the start of every event and written back after
//! each transition.

use crate::error::SessionError;
use crate::flow::Flow;
use async_trait::async_trait;
use planpoker_core::UserId;
use rootcause::Report;
use std::collections::BTreeMap;

/// Persisted dialog context of one user.
///
/// Invariant: `active_step` is empty whenever `active_flow` is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSession {
    key: UserId,
    active_flow: String,
    active_step: String,
    step_data: BTreeMap<String, String>,
}

impl ChatSession {
    /// Creates an empty session.
    #[must_use]
    pub fn new(key: UserId) -> Self {
        Self {
            key,
            active_flow: String::new(),
            active_step: String::new(),
            step_data: BTreeMap::new(),
        }
    }

    /// Rebuilds a session from its stored fields.
    ///
    /// A step stored without a flow is dropped to restore the invariant.
    #[must_use]
    pub fn from_parts(
        key: UserId,
        active_flow: String,
        active_step: String,
        step_data: BTreeMap<String, String>,
    ) -> Self {
        let active_step = if active_flow.is_empty() {
            String::new()
        } else {
            active_step
        };
        Self {
            key,
            active_flow,
            active_step,
            step_data,
        }
    }

    /// The user this session belongs to.
    #[must_use]
    pub fn key(&self) -> UserId {
        self.key
    }

    #[must_use]
    pub fn active_flow(&self) -> &str {
        &self.active_flow
    }

    #[must_use]
    pub fn active_step(&self) -> &str {
        &self.active_step
    }

    #[must_use]
    pub fn step_data(&self) -> &BTreeMap<String, String> {
        &self.step_data
    }

    /// Returns true if no flow is active.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.active_flow.is_empty()
    }

    /// Opens a flow and clears any data left by a previous one.
    pub fn start_flow(&mut self, name: &str) {
        self.active_flow = name.to_string();
        self.step_data.clear();
    }

    /// Moves to `step`, keeping the collected data.
    ///
    /// Has no effect when no flow is active.
    pub fn advance_to(&mut self, step: &str) {
        if self.is_idle() {
            return;
        }
        self.active_step = step.to_string();
    }

    /// Stores a value for the current flow.
    pub fn set_data(&mut self, key: &str, value: impl Into<String>) {
        self.step_data.insert(key.to_string(), value.into());
    }

    /// Returns a value stored by the current flow.
    #[must_use]
    pub fn get_data(&self, key: &str) -> Option<&str> {
        self.step_data.get(key).map(String::as_str)
    }

    /// Closes the active flow, clearing flow, step and data together.
    pub fn finish(&mut self) {
        self.active_flow.clear();
        self.active_step.clear();
        self.step_data.clear();
    }

    /// Decodes the active flow and step.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored flow, step or data do not form a
    /// valid step.
    pub fn flow(&self) -> Result<Option<Flow>, Report<SessionError>> {
        Ok(Flow::decode(
            &self.active_flow,
            &self.active_step,
            &self.step_data,
        )?)
    }

    /// Positions the session at `flow`'s step.
    ///
    /// Entering a step of a different flow than the active one restarts;
    /// entering a step of the same flow replaces the step data with the
    /// step's own payload.
    pub fn enter(&mut self, flow: &Flow) {
        self.start_flow(flow.kind().as_str());
        self.advance_to(flow.step_name());
        for (key, value) in flow.data() {
            self.set_data(key, value);
        }
    }
}

/// Trait for session storage.
///
/// No isolation is assumed between a `get` and the following `put`; the
/// last writer wins.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads a session, materializing an empty one if none is stored.
    async fn get(&self, key: UserId) -> Result<ChatSession, Report<SessionError>>;

    /// Stores a session, replacing any previous version.
    async fn put(&self, session: &ChatSession) -> Result<(), Report<SessionError>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{CreateTaskStep, FlowKind};
    use planpoker_core::RoomId;

    #[test]
    fn start_then_finish_leaves_session_empty() {
        let mut session = ChatSession::new(UserId::new(10));
        session.start_flow("CREATE_ROOM");
        session.advance_to("NAME");
        session.set_data("name", "Team");

        session.finish();

        assert_eq!(session.active_flow(), "");
        assert_eq!(session.active_step(), "");
        assert!(session.step_data().is_empty());
        assert!(session.is_idle());
    }

    #[test]
    fn start_flow_clears_previous_data() {
        let mut session = ChatSession::new(UserId::new(10));
        session.start_flow("ADD_TASK");
        session.set_data("roomId", "r1");

        session.start_flow("NEW_ROOM");

        assert_eq!(session.active_flow(), "NEW_ROOM");
        assert_eq!(session.get_data("roomId"), None);
    }

    #[test]
    fn advance_keeps_data() {
        let mut session = ChatSession::new(UserId::new(10));
        session.start_flow("ADD_TASK");
        session.set_data("name", "Login");
        session.advance_to("URL");

        assert_eq!(session.active_step(), "URL");
        assert_eq!(session.get_data("name"), Some("Login"));
    }

    #[test]
    fn advance_without_flow_keeps_invariant() {
        let mut session = ChatSession::new(UserId::new(10));
        session.advance_to("NAME");
        assert_eq!(session.active_step(), "");
    }

    #[test]
    fn from_parts_drops_orphan_step() {
        let session =
            ChatSession::from_parts(UserId::new(1), String::new(), "URL".to_string(), BTreeMap::new());
        assert_eq!(session.active_step(), "");
    }

    #[test]
    fn enter_then_decode_returns_same_step() {
        let mut session = ChatSession::new(UserId::new(3));
        let flow = Flow::CreateTask(CreateTaskStep::Url {
            room_id: RoomId::new(),
            name: "Search".to_string(),
        });

        session.enter(&flow);

        assert_eq!(session.active_flow(), FlowKind::CreateTask.as_str());
        assert_eq!(session.active_step(), "URL");
        assert_eq!(session.flow().expect("decode"), Some(flow));
    }

    #[test]
    fn corrupt_session_reports_error() {
        let mut session = ChatSession::new(UserId::new(3));
        session.start_flow("ADD_TASK");
        session.advance_to("SETTING");

        let err = session.flow().unwrap_err();
        assert!(matches!(
            err.current_context(),
            SessionError::MissingData { .. }
        ));
    }
}
