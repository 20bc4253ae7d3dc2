//! Core domain types and utilities for planpoker.
//!
//! This crate provides the foundational types shared by the conversation
//! engine, the estimation engine and the bot: strongly-typed identifiers,
//! the room/task/rate domain model and the `Result` alias used for error
//! propagation.

pub mod error;
pub mod id;
pub mod model;

pub use error::{Classify, ErrorKind, Result};
pub use id::{ActionRefId, ChatId, ParseIdError, RateId, RoomId, TaskId, UserId};
pub use model::{Rate, Room, RoomMember, RoomStatus, Task, User};
