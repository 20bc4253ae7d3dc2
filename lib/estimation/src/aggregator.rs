//! Vote aggregation.
//!
//! The aggregator stores votes, detects when every member of a room has
//! voted on a task, finalizes the task and computes the consensus
//! statistics shown once voting is over.

use crate::error::{EstimationError, StoreResultExt};
use crate::store::{MemberStore, RateStore, Stores, TaskStore};
use planpoker_core::{Rate, Task, TaskId, UserId};
use rootcause::Report;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Votes a member may cast. `0` doubles as the coffee-break card.
pub const VOTE_SCALE: [i32; 6] = [0, 1, 2, 3, 5, 8];

/// Result of recording a vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Some members have not voted yet.
    Pending { voters: u64, members: u64 },
    /// The vote completed the quorum; the task is now finished.
    Completed(Consensus),
    /// The quorum is complete, but another vote finished the task first.
    Settled(Consensus),
}

/// Statistics over the votes on a finished task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consensus {
    pub task: Task,
    /// Votes in casting order.
    pub rates: Vec<Rate>,
    pub median: i32,
    pub mode: i32,
}

/// Median of `votes`, with the two middle values of an even count
/// averaged by truncating division. Empty input yields `0`.
#[must_use]
pub fn compute_median(votes: &[i32]) -> i32 {
    if votes.is_empty() {
        return 0;
    }
    let mut sorted = votes.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2
    }
}

/// Most frequent value in `votes`, ties broken towards the smallest value.
#[must_use]
pub fn mode_of(votes: &[i32]) -> Option<i32> {
    let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
    for vote in votes {
        *counts.entry(*vote).or_default() += 1;
    }
    // BTreeMap iterates ascending; max_by_key keeps the last maximum, so
    // walk in reverse to keep the smallest.
    counts
        .into_iter()
        .rev()
        .max_by_key(|(_, count)| *count)
        .map(|(value, _)| value)
}

/// Stores votes and decides when voting on a task is over.
#[derive(Clone)]
pub struct EstimationAggregator {
    rates: Arc<dyn RateStore>,
    tasks: Arc<dyn TaskStore>,
    members: Arc<dyn MemberStore>,
}

impl EstimationAggregator {
    /// Creates an aggregator over explicit stores.
    pub fn new(
        rates: Arc<dyn RateStore>,
        tasks: Arc<dyn TaskStore>,
        members: Arc<dyn MemberStore>,
    ) -> Self {
        Self {
            rates,
            tasks,
            members,
        }
    }

    /// Creates an aggregator over a store bundle.
    #[must_use]
    pub fn from_stores(stores: &Stores) -> Self {
        Self::new(
            stores.rates.clone(),
            stores.tasks.clone(),
            stores.members.clone(),
        )
    }

    /// Casts or replaces `user`'s vote on a task.
    ///
    /// A second vote by the same user overwrites the sum and keeps the
    /// original creation time.
    ///
    /// # Errors
    ///
    /// Returns [`EstimationError::InvalidVote`] for values off the scale,
    /// or a storage error.
    pub async fn upsert_vote(
        &self,
        user: UserId,
        task_id: TaskId,
        sum: i32,
    ) -> Result<Rate, Report<EstimationError>> {
        if !VOTE_SCALE.contains(&sum) {
            return Err(EstimationError::InvalidVote { sum }.into());
        }
        let rate = self
            .rates
            .upsert_rate(&Rate::new(user, task_id, sum))
            .await
            .lift()?;
        debug!(task_id = %task_id, user = %user, sum, "vote stored");
        Ok(rate)
    }

    /// Returns true when the number of voters equals the number of
    /// members of the task's room.
    ///
    /// # Errors
    ///
    /// Returns an error if the task does not exist or storage fails.
    pub async fn is_quorum_reached(&self, task_id: TaskId) -> Result<bool, Report<EstimationError>> {
        let (voters, members) = self.tally(task_id).await?;
        Ok(voters == members)
    }

    /// Marks a task finished. Idempotent; returns true only for the call
    /// that finished it.
    ///
    /// # Errors
    ///
    /// Returns an error if the task does not exist or storage fails.
    pub async fn finalize(&self, task_id: TaskId) -> Result<bool, Report<EstimationError>> {
        let finished = self.tasks.set_task_finished(task_id).await.lift()?;
        if finished {
            info!(task_id = %task_id, "voting finished");
        }
        Ok(finished)
    }

    /// Most frequent vote on a task, `0` when nobody voted.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub async fn compute_mode(&self, task_id: TaskId) -> Result<i32, Report<EstimationError>> {
        Ok(self.rates.mode(task_id).await.lift()?.unwrap_or(0))
    }

    /// Discards every vote on a task.
    ///
    /// The task's finished flag is left as is; see
    /// [`TaskLifecycle::reopen`](crate::TaskLifecycle::reopen).
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub async fn cancel_voting(&self, task_id: TaskId) -> Result<u64, Report<EstimationError>> {
        let removed = self.rates.delete_rates(task_id).await.lift()?;
        info!(task_id = %task_id, removed, "votes discarded");
        Ok(removed)
    }

    /// Stores a vote and finalizes the task if it completed the quorum.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid votes, unknown tasks or storage
    /// failures.
    pub async fn record_vote(
        &self,
        user: UserId,
        task_id: TaskId,
        sum: i32,
    ) -> Result<VoteOutcome, Report<EstimationError>> {
        self.upsert_vote(user, task_id, sum).await?;

        let (voters, members) = self.tally(task_id).await?;
        if voters != members {
            return Ok(VoteOutcome::Pending { voters, members });
        }

        let finished_here = self.finalize(task_id).await?;
        let consensus = self.consensus(task_id).await?;
        if finished_here {
            Ok(VoteOutcome::Completed(consensus))
        } else {
            Ok(VoteOutcome::Settled(consensus))
        }
    }

    /// Collects the votes and statistics of a task.
    ///
    /// # Errors
    ///
    /// Returns an error if the task does not exist or storage fails.
    pub async fn consensus(&self, task_id: TaskId) -> Result<Consensus, Report<EstimationError>> {
        let task = self.tasks.get_task(task_id).await.lift()?;
        let rates = self.rates.list_rates(task_id).await.lift()?;
        let sums: Vec<i32> = rates.iter().map(|rate| rate.sum).collect();
        let mode = self.compute_mode(task_id).await?;
        Ok(Consensus {
            task,
            median: compute_median(&sums),
            mode,
            rates,
        })
    }

    async fn tally(&self, task_id: TaskId) -> Result<(u64, u64), Report<EstimationError>> {
        let task = self.tasks.get_task(task_id).await.lift()?;
        let voters = self.rates.voters_count(task_id).await.lift()?;
        let members = self.members.members_count(task.room_id).await.lift()?;
        Ok((voters, members))
    }
}
