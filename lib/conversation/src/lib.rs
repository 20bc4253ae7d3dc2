//! Conversation engine for planpoker.
//!
//! The chat transport is stateless: every inbound event is handled on its
//! own. This crate provides what lets such a transport hold a multi-step
//! dialog anyway:
//!
//! - **Sessions**: per-user persisted dialog context and the chain
//!   operations that move it between steps
//! - **Flows**: the typed view of a session, one payload per step
//! - **Action Registry**: opaque references that tie a rendered control
//!   back to the action and payload it stands for
//! - **Memory**: in-process implementations of both stores

pub mod action;
pub mod error;
pub mod flow;
pub mod memory;
pub mod session;

pub use action::{ActionKind, ActionPayload, ActionRef, ActionRegistry, keys, parse_token};
pub use error::{ActionError, SessionError};
pub use flow::{CreateRoomStep, CreateTaskStep, EnterGradeStep, Flow, FlowKind};
pub use memory::{InMemoryActionRegistry, InMemorySessionStore};
pub use session::{ChatSession, SessionStore};
