//! Final grade entry for a finished task.

use super::{BotApp, EventContext};
use crate::error::{BotError, BotResultExt};
use planpoker_conversation::{ActionRef, EnterGradeStep, Flow};
use rootcause::Report;

impl BotApp {
    pub(super) async fn enter_grade(
        &self,
        ctx: &mut EventContext,
        action: &ActionRef,
    ) -> Result<(), Report<BotError>> {
        let task_id = action.payload.task_id().or_bot()?;
        let task = self.tasks.task(task_id).await.or_bot()?;
        let room = self.rooms.room(task.room_id).await.or_bot()?;
        if !room.is_owned_by(ctx.event.user()) {
            return Err(BotError::invalid("Only the room owner can set the grade.").into());
        }

        let screen = self.view.grade_input_prompt(&task).await.or_bot()?;
        self.reply(ctx, screen).await?;
        ctx.session.enter(&Flow::EnterGrade(EnterGradeStep::SetGrade {
            room_id: room.id,
            task_id,
        }));
        Ok(())
    }

    pub(super) async fn continue_grade(
        &self,
        ctx: &mut EventContext,
        step: EnterGradeStep,
    ) -> Result<(), Report<BotError>> {
        let EnterGradeStep::SetGrade { room_id, task_id } = step;
        let Some(text) = ctx.event.text().filter(|_| ctx.event.is_private()) else {
            return Ok(());
        };
        let grade = match text.trim().parse::<i32>() {
            Ok(grade) if grade >= 0 => grade,
            _ => {
                return Err(
                    BotError::invalid("The grade must be a whole number, e.g. 5.").into(),
                );
            }
        };

        self.tasks.set_grade(task_id, grade).await.or_bot()?;
        let room = self.rooms.room(room_id).await.or_bot()?;
        ctx.session.finish();
        self.show_room(ctx, &room, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Harness;
    use crate::event::fixtures;
    use planpoker_conversation::{ActionKind, ActionPayload, ActionRegistry, keys};
    use planpoker_core::{ChatId, Task, UserId};
    use planpoker_estimation::TaskStore;

    async fn grade_token(harness: &Harness) -> (Task, String) {
        let room = harness
            .app
            .rooms
            .create_room("Team", UserId::new(1), Some(ChatId::new(-77)))
            .await
            .expect("room");
        let task = harness
            .app
            .tasks
            .create_task(room.id, "Search", "")
            .await
            .expect("task");
        let action = harness
            .actions
            .create(
                ActionKind::EnterGrade,
                ActionPayload::new()
                    .with(keys::ROOM_ID, room.id)
                    .with(keys::TASK_ID, task.id),
            )
            .await
            .expect("action");
        (task, action.token())
    }

    #[tokio::test]
    async fn numeric_grade_is_stored() {
        let harness = Harness::new();
        let (task, token) = grade_token(&harness).await;

        harness.handle(fixtures::press(1, 1, &token)).await;
        assert_eq!(harness.session(1).await.active_step(), "SET_GRADE");

        harness.handle(fixtures::text(1, " 8 ")).await;

        assert!(harness.session(1).await.is_idle());
        let stored = harness.store.get_task(task.id).await.expect("task");
        assert_eq!(stored.grade, 8);
    }

    #[tokio::test]
    async fn non_numeric_grade_reprompts() {
        let harness = Harness::new();
        let (task, token) = grade_token(&harness).await;
        harness.handle(fixtures::press(1, 1, &token)).await;

        harness.handle(fixtures::text(1, "a lot")).await;

        assert_eq!(harness.session(1).await.active_step(), "SET_GRADE");
        let stored = harness.store.get_task(task.id).await.expect("task");
        assert_eq!(stored.grade, 0);
        let texts = harness.notifier.sent_to(ChatId::new(1));
        assert!(texts.last().expect("notice").contains("whole number"));
    }

    #[tokio::test]
    async fn only_the_owner_grades() {
        let harness = Harness::new();
        let (_, token) = grade_token(&harness).await;

        harness.handle(fixtures::press(2, 2, &token)).await;

        assert!(harness.session(2).await.is_idle());
        assert!(harness.toasts()[0].contains("owner"));
    }
}
