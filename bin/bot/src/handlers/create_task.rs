//! Task creation: name, link, then one of three ways to save.

use super::{BotApp, EventContext};
use crate::error::{BotError, BotResultExt};
use crate::view::escape;
use planpoker_conversation::{ActionKind, ActionRef, CreateTaskStep, Flow};
use planpoker_core::{RoomId, Task};
use planpoker_estimation::TaskGate;
use rootcause::Report;
use tracing::{debug, info, warn};

impl BotApp {
    pub(super) async fn enter_create_task(
        &self,
        ctx: &mut EventContext,
        action: &ActionRef,
    ) -> Result<(), Report<BotError>> {
        let room_id = action.payload.room_id().or_bot()?;
        match self.tasks.gate(room_id).await.or_bot()? {
            TaskGate::Ready(_) => {}
            TaskGate::NotBound(_) => {
                return Err(
                    BotError::invalid("Share the room to a group before adding tasks.").into(),
                );
            }
            TaskGate::Finished(_) => {
                return Err(BotError::invalid("Planning in this room is finished.").into());
            }
        }
        self.ask_task_name(ctx, room_id).await
    }

    pub(super) async fn continue_create_task(
        &self,
        ctx: &mut EventContext,
        step: CreateTaskStep,
        action: Option<ActionRef>,
    ) -> Result<(), Report<BotError>> {
        let kind = action.as_ref().map(|action| action.kind);
        match (step, kind) {
            (CreateTaskStep::Name { room_id }, None) => {
                let Some(name) = private_text(ctx)? else {
                    return Ok(());
                };
                let screen = self.view.task_url_prompt().await.or_bot()?;
                self.reply(ctx, screen).await?;
                ctx.session
                    .enter(&Flow::CreateTask(CreateTaskStep::Url { room_id, name }));
                Ok(())
            }
            (CreateTaskStep::Url { room_id, name }, None) => {
                let Some(url) = private_text(ctx)? else {
                    return Ok(());
                };
                let prefix = format!("Task <b>{}</b>\n{}\n\n", escape(&name), escape(&url));
                let screen = self.view.task_settings(&prefix).await.or_bot()?;
                self.reply(ctx, screen).await?;
                ctx.session.enter(&Flow::CreateTask(CreateTaskStep::Setting {
                    room_id,
                    name,
                    url,
                }));
                Ok(())
            }
            (CreateTaskStep::Setting { room_id, name, url }, Some(kind)) => {
                let task = Task::new(room_id, name, url);
                match kind {
                    ActionKind::SaveAndPublishTask => self.save_and_publish(ctx, task).await,
                    ActionKind::SaveAndNewTask => {
                        self.tasks.save_task(&task).await.or_bot()?;
                        ctx.session.finish();
                        self.ask_task_name(ctx, room_id).await
                    }
                    ActionKind::SaveAndCloseTask => {
                        self.tasks.save_task(&task).await.or_bot()?;
                        ctx.session.finish();
                        let room = self.rooms.room(room_id).await.or_bot()?;
                        self.show_room(ctx, &room, None).await
                    }
                    other => {
                        debug!(?other, "not a save control");
                        Ok(())
                    }
                }
            }
            (step, kind) => {
                debug!(?step, ?kind, "event does not match the task creation step");
                Ok(())
            }
        }
    }

    async fn ask_task_name(
        &self,
        ctx: &mut EventContext,
        room_id: RoomId,
    ) -> Result<(), Report<BotError>> {
        let screen = self.view.task_name_prompt().await.or_bot()?;
        self.reply(ctx, screen).await?;
        ctx.session
            .enter(&Flow::CreateTask(CreateTaskStep::Name { room_id }));
        Ok(())
    }

    /// Stores the task, then posts its vote card. A task whose card could
    /// not be posted is removed again, so the step can be retried.
    async fn save_and_publish(
        &self,
        ctx: &mut EventContext,
        task: Task,
    ) -> Result<(), Report<BotError>> {
        let room = self.rooms.room(task.room_id).await.or_bot()?;
        if room.is_finished() {
            return Err(BotError::invalid("Planning in this room is finished.").into());
        }
        self.tasks.save_task(&task).await.or_bot()?;
        let link = match self.publish_task(&room, &task).await {
            Ok(link) => link,
            Err(e) => {
                if let Err(discard) = self.tasks.discard_task(task.id).await {
                    warn!(task_id = %task.id, error = %discard, "unpublished task left behind");
                }
                return Err(e);
            }
        };
        info!(task_id = %task.id, room_id = %room.id, "task published");
        ctx.session.finish();
        self.show_room(ctx, &room, link.as_deref()).await
    }
}

/// Trimmed text of a private message. Blank text is rejected.
fn private_text(ctx: &EventContext) -> Result<Option<String>, Report<BotError>> {
    let Some(text) = ctx.event.text().filter(|_| ctx.event.is_private()) else {
        return Ok(None);
    };
    let text = text.trim();
    if text.is_empty() {
        return Err(BotError::invalid("Please enter some text.").into());
    }
    Ok(Some(text.to_string()))
}
