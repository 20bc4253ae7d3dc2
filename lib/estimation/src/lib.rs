//! Estimation engine for planpoker.
//!
//! This crate provides:
//!
//! - **Stores**: narrow persistence traits, one per capability
//! - **Aggregator**: vote storage, quorum detection and consensus statistics
//! - **Lifecycle**: room and task status transitions with their ownership
//!   checks
//! - **Memory**: an in-process implementation of every store

pub mod aggregator;
pub mod error;
pub mod lifecycle;
pub mod memory;
pub mod store;

pub use aggregator::{
    Consensus, EstimationAggregator, VOTE_SCALE, VoteOutcome, compute_median, mode_of,
};
pub use error::{EstimationError, StoreError};
pub use lifecycle::{
    CloseOutcome, FinishOutcome, NextTaskOutcome, RoomLifecycle, TASK_PAGE_SIZE, TaskGate,
    TaskLifecycle,
};
pub use memory::InMemoryEntityStore;
pub use store::{MemberStore, RateStore, RoomStore, Stores, TaskStore, UserStore};
