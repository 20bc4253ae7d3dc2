//! Controls handled in a single step, outside any flow.

use super::{BotApp, EventContext};
use crate::error::{BotError, BotResultExt};
use crate::notifier::{Outbound, Screen};
use crate::view::escape;
use planpoker_conversation::{ActionKind, ActionRef, keys};
use planpoker_core::{ChatId, Room};
use planpoker_estimation::{CloseOutcome, Consensus, FinishOutcome, NextTaskOutcome, VoteOutcome};
use rootcause::Report;
use tracing::{debug, info, instrument, warn};

impl BotApp {
    #[instrument(skip_all, fields(kind = %action.kind))]
    pub(super) async fn one_shot(
        &self,
        ctx: &mut EventContext,
        action: ActionRef,
    ) -> Result<(), Report<BotError>> {
        match action.kind {
            ActionKind::ShowRooms => {
                let rooms = self.rooms.rooms_of(ctx.event.user()).await.or_bot()?;
                let screen = self.view.rooms(&rooms).await.or_bot()?;
                self.reply(ctx, screen).await?;
                Ok(())
            }
            ActionKind::ShowRoom => {
                let room = self.rooms.room(action.payload.room_id().or_bot()?).await.or_bot()?;
                self.show_room(ctx, &room, None).await
            }
            ActionKind::ShowTasks => {
                let room = self.rooms.room(action.payload.room_id().or_bot()?).await.or_bot()?;
                let page = action.payload.parse::<usize>(keys::PAGE).unwrap_or(0);
                let tasks = self.tasks.page(room.id, page).await.or_bot()?;
                let screen = self.view.task_list(&room, &tasks, page).await.or_bot()?;
                self.reply(ctx, screen).await?;
                Ok(())
            }
            ActionKind::ShowTask => {
                let task = self.tasks.task(action.payload.task_id().or_bot()?).await.or_bot()?;
                let room = self.rooms.room(task.room_id).await.or_bot()?;
                let rates = self.stores.rates.list_rates(task.id).await.or_bot()?;
                let screen = self.view.task_details(&room, &task, &rates).await.or_bot()?;
                self.reply(ctx, screen).await?;
                Ok(())
            }
            ActionKind::JoinRoom => self.join_room(ctx, &action).await,
            ActionKind::BindChat => self.bind_chat(ctx, &action).await,
            ActionKind::FinishRoom => self.finish_room(ctx, &action).await,
            ActionKind::NextTask => self.next_task(ctx, &action).await,
            ActionKind::FinishTask => self.reveal(ctx, &action).await,
            ActionKind::AddVote => self.add_vote(ctx, &action).await,
            ActionKind::Revote => self.revote(ctx, &action).await,
            other => {
                debug!(?other, "no single-step handler");
                Ok(())
            }
        }
    }

    async fn join_room(
        &self,
        ctx: &mut EventContext,
        action: &ActionRef,
    ) -> Result<(), Report<BotError>> {
        let room = self.rooms.room(action.payload.room_id().or_bot()?).await.or_bot()?;
        if room.is_finished() {
            ctx.toast("Planning in this room is finished.");
            return Ok(());
        }
        let user = ctx.event.user();
        if self.rooms.is_member(room.id, user).await.or_bot()? {
            ctx.toast("You are already in this room.");
            return Ok(());
        }
        self.rooms.join(room.id, user).await.or_bot()?;
        info!(room_id = %room.id, user = %user, "member joined");

        let members = self.rooms.members(room.id).await.or_bot()?;
        let screen = self.view.invitation(&room, &members).await.or_bot()?;
        self.refresh_pressed(ctx, screen);
        ctx.toast(format!("You joined {}", room.name));
        Ok(())
    }

    /// Binds the group the room card was shared to, once the bot proved it
    /// can post there.
    async fn bind_chat(
        &self,
        ctx: &mut EventContext,
        action: &ActionRef,
    ) -> Result<(), Report<BotError>> {
        let room = self.rooms.room(action.payload.room_id().or_bot()?).await.or_bot()?;
        let chat_id = action.payload.parse::<ChatId>(keys::CHAT_ID).or_bot()?;
        let chat_name = action.payload.get(keys::CHAT_NAME).unwrap_or_default();
        if !room.is_owned_by(ctx.event.user()) {
            return Err(BotError::invalid("Only the room owner can choose the group.").into());
        }

        if let Err(report) = self.notifier.send(Outbound::Typing { chat_id }).await {
            warn!(%chat_id, error = %report, "bot cannot post to the group");
            return Err(BotError::invalid(
                "The bot cannot post in that group. Add it to the group and try again.",
            )
            .into());
        }
        let room = self.rooms.bind_chat(room.id, chat_id).await.or_bot()?;
        ctx.toast(format!("Tasks will be published to {chat_name}"));
        self.show_room(ctx, &room, None).await
    }

    async fn finish_room(
        &self,
        ctx: &mut EventContext,
        action: &ActionRef,
    ) -> Result<(), Report<BotError>> {
        let room_id = action.payload.room_id().or_bot()?;
        match self
            .rooms
            .close_planning(room_id, ctx.event.user())
            .await
            .or_bot()?
        {
            CloseOutcome::Closed { room, tasks } => {
                if let Some(chat_id) = room.chat_id {
                    let screen = self.view.planning_summary(&room, &tasks);
                    self.outbox.push(Outbound::Send { chat_id, screen });
                }
                self.show_room(ctx, &room, None).await
            }
            CloseOutcome::NotOwner => {
                ctx.toast("Only the room owner can finish planning.");
                Ok(())
            }
            CloseOutcome::AlreadyFinished => {
                ctx.toast("Planning is already finished.");
                Ok(())
            }
        }
    }

    async fn next_task(
        &self,
        ctx: &mut EventContext,
        action: &ActionRef,
    ) -> Result<(), Report<BotError>> {
        let room_id = action.payload.room_id().or_bot()?;
        match self
            .tasks
            .next_task(room_id, ctx.event.user())
            .await
            .or_bot()?
        {
            NextTaskOutcome::Ready { room, task } => {
                if room.is_finished() {
                    ctx.toast("Planning in this room is finished.");
                    return Ok(());
                }
                let link = self.publish_task(&room, &task).await?;
                self.show_room(ctx, &room, link.as_deref()).await
            }
            NextTaskOutcome::NotOwner => {
                ctx.toast("Only the room owner can publish tasks.");
                Ok(())
            }
            NextTaskOutcome::NoneLeft { .. } => {
                ctx.toast("All tasks are estimated.");
                Ok(())
            }
        }
    }

    /// Ends voting on the owner's request and shows the votes.
    async fn reveal(
        &self,
        ctx: &mut EventContext,
        action: &ActionRef,
    ) -> Result<(), Report<BotError>> {
        let task_id = action.payload.task_id().or_bot()?;
        match self
            .tasks
            .force_finish(task_id, ctx.event.user())
            .await
            .or_bot()?
        {
            FinishOutcome::Finished(task) => {
                let consensus = self.aggregator.consensus(task.id).await.or_bot()?;
                let room = self.rooms.room(task.room_id).await.or_bot()?;
                self.show_finished(ctx, &room, &consensus).await
            }
            FinishOutcome::AlreadyFinished => {
                ctx.toast("Voting on this task is over.");
                Ok(())
            }
            FinishOutcome::NotOwner => {
                ctx.toast("Only the room owner can reveal the votes.");
                Ok(())
            }
        }
    }

    async fn add_vote(
        &self,
        ctx: &mut EventContext,
        action: &ActionRef,
    ) -> Result<(), Report<BotError>> {
        let task_id = action.payload.task_id().or_bot()?;
        let sum = action.payload.parse::<i32>(keys::SUM).or_bot()?;
        let task = self.tasks.task(task_id).await.or_bot()?;
        if task.finished {
            ctx.toast("Voting on this task is over.");
            return Ok(());
        }
        let user = ctx.event.user();
        let room = self.rooms.room(task.room_id).await.or_bot()?;
        if !self.rooms.is_member(room.id, user).await.or_bot()? {
            ctx.toast("Join the room first.");
            return Ok(());
        }

        match self
            .aggregator
            .record_vote(user, task_id, sum)
            .await
            .or_bot()?
        {
            VoteOutcome::Pending { voters, members } => {
                debug!(%task_id, voters, members, "waiting for more votes");
                let members = self.rooms.members(room.id).await.or_bot()?;
                let rates = self.stores.rates.list_rates(task_id).await.or_bot()?;
                let screen = self
                    .view
                    .vote_card(&room, &task, &members, &rates)
                    .await
                    .or_bot()?;
                self.refresh_pressed(ctx, screen);
            }
            VoteOutcome::Completed(consensus) => {
                self.show_finished(ctx, &room, &consensus).await?;
            }
            // Another vote finished the task and prompts the owner.
            VoteOutcome::Settled(consensus) => {
                self.show_results(ctx, &room, &consensus).await?;
            }
        }
        ctx.toast(format!("Your vote: {sum}"));
        Ok(())
    }

    /// Discards the votes on a task, reopens it and publishes a fresh vote
    /// card.
    async fn revote(
        &self,
        ctx: &mut EventContext,
        action: &ActionRef,
    ) -> Result<(), Report<BotError>> {
        let mut task = self.tasks.task(action.payload.task_id().or_bot()?).await.or_bot()?;
        let room = self.rooms.room(task.room_id).await.or_bot()?;
        if !room.is_owned_by(ctx.event.user()) {
            ctx.toast("Only the room owner can restart voting.");
            return Ok(());
        }
        if room.is_finished() {
            ctx.toast("Planning in this room is finished.");
            return Ok(());
        }

        self.aggregator.cancel_voting(task.id).await.or_bot()?;
        self.tasks.reopen(task.id).await.or_bot()?;
        task.finished = false;
        let link = self.publish_task(&room, &task).await?;
        let mut text = format!("Voting on <b>{}</b> starts over.", escape(&task.name));
        if let Some(link) = link {
            text.push('\n');
            text.push_str(&link);
        }
        self.reply(ctx, Screen::text(text)).await?;
        Ok(())
    }

    /// Replaces the pressed vote card with the results and asks the owner
    /// for the final grade.
    async fn show_finished(
        &self,
        ctx: &EventContext,
        room: &Room,
        consensus: &Consensus,
    ) -> Result<(), Report<BotError>> {
        self.show_results(ctx, room, consensus).await?;

        let prompt = self.view.grade_prompt(consensus).await.or_bot()?;
        self.outbox.push(Outbound::Send {
            chat_id: ChatId::from(room.owner),
            screen: prompt,
        });
        info!(
            task_id = %consensus.task.id,
            median = consensus.median,
            mode = consensus.mode,
            "voting results shown"
        );
        Ok(())
    }

    async fn show_results(
        &self,
        ctx: &EventContext,
        room: &Room,
        consensus: &Consensus,
    ) -> Result<(), Report<BotError>> {
        let members = self.rooms.members(room.id).await.or_bot()?;
        let screen = self
            .view
            .finished_task(room, consensus, &members)
            .await
            .or_bot()?;
        self.refresh_pressed(ctx, screen);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Harness;
    use crate::event::fixtures;
    use planpoker_conversation::{ActionKind, ActionPayload, ActionRegistry, keys};
    use planpoker_core::{ChatId, Room, RoomStatus, Task, UserId};
    use planpoker_estimation::{RateStore, RoomStore, TaskStore, UserStore};

    const GROUP: i64 = -1_001_009;

    struct Planning {
        harness: Harness,
        room: Room,
        task: Task,
    }

    impl Planning {
        /// Room owned by user 1 with user 2 as a second member.
        async fn new() -> Self {
            let harness = Harness::new();
            for id in [1, 2, 3] {
                harness
                    .store
                    .save_user(&fixtures::user(id))
                    .await
                    .expect("user");
            }
            let room = harness
                .app
                .rooms
                .create_room("Team", UserId::new(1), Some(ChatId::new(GROUP)))
                .await
                .expect("room");
            harness
                .app
                .rooms
                .join(room.id, UserId::new(2))
                .await
                .expect("join");
            let task = harness
                .app
                .tasks
                .create_task(room.id, "Checkout", "")
                .await
                .expect("task");
            Self {
                harness,
                room,
                task,
            }
        }

        async fn token(&self, kind: ActionKind, payload: ActionPayload) -> String {
            self.harness
                .actions
                .create(kind, payload)
                .await
                .expect("action")
                .token()
        }

        fn task_payload(&self) -> ActionPayload {
            ActionPayload::new()
                .with(keys::ROOM_ID, self.room.id)
                .with(keys::TASK_ID, self.task.id)
        }

        fn room_payload(&self) -> ActionPayload {
            ActionPayload::new().with(keys::ROOM_ID, self.room.id)
        }

        async fn vote(&self, user: i64, sum: i32) {
            let token = self
                .token(ActionKind::AddVote, self.task_payload().with(keys::SUM, sum))
                .await;
            self.harness
                .handle(fixtures::press(user, GROUP, &token))
                .await;
        }
    }

    #[tokio::test]
    async fn last_member_vote_finishes_the_task() {
        let planning = Planning::new().await;

        planning.vote(1, 3).await;
        let task = planning.harness.store.get_task(planning.task.id).await.expect("task");
        assert!(!task.finished);

        planning.vote(2, 5).await;
        let task = planning.harness.store.get_task(planning.task.id).await.expect("task");
        assert!(task.finished);

        let finished = planning.harness.notifier.screens();
        assert!(finished.iter().any(|s| s.text.contains("Median - <b>4</b>")));
        let owner = planning.harness.notifier.sent_to(ChatId::new(1));
        assert!(owner.iter().any(|text| text.contains("Voting on <b>Checkout</b> is over")));
    }

    #[tokio::test]
    async fn repeated_vote_replaces_the_previous_one() {
        let planning = Planning::new().await;

        planning.vote(1, 3).await;
        planning.vote(1, 8).await;

        let rates = planning
            .harness
            .store
            .list_rates(planning.task.id)
            .await
            .expect("rates");
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[0].sum, 8);
    }

    #[tokio::test]
    async fn outsiders_and_off_scale_votes_are_refused() {
        let planning = Planning::new().await;

        planning.vote(3, 5).await;
        planning.vote(1, 4).await;

        let rates = planning
            .harness
            .store
            .list_rates(planning.task.id)
            .await
            .expect("rates");
        assert!(rates.is_empty());
        let toasts = planning.harness.toasts();
        assert_eq!(toasts[0], "Join the room first.");
        assert_eq!(toasts.len(), 2);
    }

    #[tokio::test]
    async fn reveal_is_owner_only() {
        let planning = Planning::new().await;
        planning.vote(2, 2).await;
        let token = planning
            .token(ActionKind::FinishTask, planning.task_payload())
            .await;

        planning.harness.handle(fixtures::press(2, GROUP, &token)).await;
        let task = planning.harness.store.get_task(planning.task.id).await.expect("task");
        assert!(!task.finished);

        planning.harness.handle(fixtures::press(1, GROUP, &token)).await;
        let task = planning.harness.store.get_task(planning.task.id).await.expect("task");
        assert!(task.finished);
    }

    #[tokio::test]
    async fn revote_clears_votes_and_republishes() {
        let planning = Planning::new().await;
        planning.vote(1, 1).await;
        planning.vote(2, 2).await;
        let cards_before = planning.harness.notifier.sent_to(ChatId::new(GROUP)).len();
        let token = planning.token(ActionKind::Revote, planning.task_payload()).await;

        planning.harness.handle(fixtures::press(1, 1, &token)).await;

        let rates = planning
            .harness
            .store
            .list_rates(planning.task.id)
            .await
            .expect("rates");
        assert!(rates.is_empty());
        assert!(
            !planning
                .harness
                .app
                .aggregator
                .is_quorum_reached(planning.task.id)
                .await
                .expect("quorum")
        );
        let cards = planning.harness.notifier.sent_to(ChatId::new(GROUP));
        assert_eq!(cards.len(), cards_before + 1);
    }

    #[tokio::test]
    async fn votes_after_revote_reach_quorum_again() {
        let planning = Planning::new().await;
        planning.vote(1, 3).await;
        planning.vote(2, 5).await;
        let token = planning.token(ActionKind::Revote, planning.task_payload()).await;

        planning.harness.handle(fixtures::press(1, 1, &token)).await;
        let task = planning.harness.store.get_task(planning.task.id).await.expect("task");
        assert!(!task.finished);

        planning.vote(1, 8).await;
        planning.vote(2, 8).await;

        let task = planning.harness.store.get_task(planning.task.id).await.expect("task");
        assert!(task.finished);
        let rates = planning
            .harness
            .store
            .list_rates(planning.task.id)
            .await
            .expect("rates");
        assert_eq!(rates.iter().map(|rate| rate.sum).collect::<Vec<_>>(), [8, 8]);
        assert!(!planning.harness.toasts().iter().any(|t| t.contains("is over")));
        let prompts = planning
            .harness
            .notifier
            .sent_to(ChatId::new(1))
            .into_iter()
            .filter(|text| text.contains("Voting on <b>Checkout</b> is over"))
            .count();
        assert_eq!(prompts, 2);
    }

    #[tokio::test]
    async fn reveal_after_quorum_sends_no_second_prompt() {
        let planning = Planning::new().await;
        planning.vote(1, 3).await;
        planning.vote(2, 5).await;
        let token = planning
            .token(ActionKind::FinishTask, planning.task_payload())
            .await;

        planning.harness.handle(fixtures::press(1, GROUP, &token)).await;

        let prompts = planning
            .harness
            .notifier
            .sent_to(ChatId::new(1))
            .into_iter()
            .filter(|text| text.contains("is over"))
            .count();
        assert_eq!(prompts, 1);
        assert_eq!(
            planning.harness.toasts().last().map(String::as_str),
            Some("Voting on this task is over.")
        );
    }

    #[tokio::test]
    async fn only_the_owner_closes_planning() {
        let planning = Planning::new().await;
        let token = planning
            .token(ActionKind::FinishRoom, planning.room_payload())
            .await;

        planning.harness.handle(fixtures::press(2, 2, &token)).await;
        let room = planning.harness.store.get_room(planning.room.id).await.expect("room");
        assert_eq!(room.status, RoomStatus::Open);

        planning.harness.handle(fixtures::press(1, 1, &token)).await;
        let room = planning.harness.store.get_room(planning.room.id).await.expect("room");
        assert_eq!(room.status, RoomStatus::Finished);
        let summary = planning.harness.notifier.sent_to(ChatId::new(GROUP));
        assert!(summary.last().expect("summary").contains("❌ Checkout"));
    }

    #[tokio::test]
    async fn next_task_publishes_the_oldest_open_task() {
        let planning = Planning::new().await;
        let token = planning.token(ActionKind::NextTask, planning.room_payload()).await;

        planning.harness.handle(fixtures::press(1, 1, &token)).await;

        let cards = planning.harness.notifier.sent_to(ChatId::new(GROUP));
        assert!(cards.last().expect("card").contains("Checkout"));
        assert!(
            planning
                .harness
                .notifier
                .last_screen()
                .text
                .contains("https://t.me/c/1009/")
        );
    }

    #[tokio::test]
    async fn finished_room_cannot_be_joined() {
        let planning = Planning::new().await;
        planning
            .harness
            .store
            .set_room_status(planning.room.id, RoomStatus::Finished)
            .await
            .expect("status");
        let token = planning.token(ActionKind::JoinRoom, planning.room_payload()).await;

        planning.harness.handle(fixtures::press(3, GROUP, &token)).await;

        let members = planning.harness.app.rooms.members(planning.room.id).await.expect("members");
        assert_eq!(members.len(), 2);
        assert!(planning.harness.toasts()[0].contains("finished"));
    }

    #[tokio::test]
    async fn bind_chat_requires_the_bot_in_the_group() {
        let planning = Planning::new().await;
        let token = planning
            .token(
                ActionKind::BindChat,
                planning
                    .room_payload()
                    .with(keys::CHAT_ID, -4_242)
                    .with(keys::CHAT_NAME, "Other"),
            )
            .await;
        planning.harness.notifier.fail_chat(ChatId::new(-4_242));

        planning.harness.handle(fixtures::press(1, 1, &token)).await;

        let room = planning.harness.store.get_room(planning.room.id).await.expect("room");
        assert_eq!(room.chat_id, Some(ChatId::new(GROUP)));
        assert!(planning.harness.toasts()[0].contains("cannot post"));
    }

    #[tokio::test]
    async fn show_rooms_lists_memberships() {
        let planning = Planning::new().await;
        let token = planning.token(ActionKind::ShowRooms, ActionPayload::new()).await;

        planning.harness.handle(fixtures::press(2, 2, &token)).await;

        let screen = planning.harness.notifier.last_screen();
        assert_eq!(screen.text, "Your rooms");
        assert!(screen.keyboard.buttons().any(|b| b.label.contains("Team")));
    }
}
