//! Room creation: name, planning group, settings, then sharing.

use super::{BotApp, EventContext};
use crate::error::{BotError, BotResultExt};
use crate::event::EventKind;
use crate::notifier::Outbound;
use planpoker_conversation::{ActionKind, ActionRef, CreateRoomStep, Flow, parse_token};
use planpoker_core::{ChatId, RoomId};
use rootcause::Report;
use tracing::{debug, info};

impl BotApp {
    pub(super) async fn enter_create_room(
        &self,
        ctx: &mut EventContext,
    ) -> Result<(), Report<BotError>> {
        ctx.session.enter(&Flow::CreateRoom(CreateRoomStep::Name));
        let screen = self.view.room_name_prompt().await.or_bot()?;
        self.reply(ctx, screen).await?;
        Ok(())
    }

    pub(super) async fn continue_create_room(
        &self,
        ctx: &mut EventContext,
        step: CreateRoomStep,
        action: Option<ActionRef>,
    ) -> Result<(), Report<BotError>> {
        let kind = action.as_ref().map(|action| action.kind);
        match (step, kind) {
            (CreateRoomStep::Name, None) => self.room_name_entered(ctx).await,
            (
                CreateRoomStep::SetChatForRoom {
                    name,
                    prompt_message_id,
                },
                None,
            ) => self.bot_added(ctx, name, prompt_message_id).await,
            (CreateRoomStep::SetChatForRoom { name, .. }, Some(ActionKind::BotAlreadyAdded)) => {
                ctx.session
                    .enter(&Flow::CreateRoom(CreateRoomStep::Setting { name, chat_id: None }));
                let screen = self.view.room_settings(None).await.or_bot()?;
                self.reply(ctx, screen).await?;
                Ok(())
            }
            (CreateRoomStep::Setting { name, chat_id }, Some(ActionKind::RoomSettings)) => {
                self.save_room(ctx, &name, chat_id).await
            }
            (CreateRoomStep::SendToChat { room_id, .. }, None) => {
                self.room_card_posted(ctx, room_id).await
            }
            (step, kind) => {
                debug!(?step, ?kind, "event does not match the room creation step");
                Ok(())
            }
        }
    }

    async fn room_name_entered(&self, ctx: &mut EventContext) -> Result<(), Report<BotError>> {
        let Some(text) = ctx.event.text().filter(|_| ctx.event.is_private()) else {
            return Ok(());
        };
        let name = text.trim().to_string();
        if name.is_empty() {
            return Err(BotError::invalid("The room name cannot be empty.").into());
        }
        let screen = self.view.chat_prompt().await.or_bot()?;
        let prompt_message_id = self.reply(ctx, screen).await?;
        ctx.session
            .enter(&Flow::CreateRoom(CreateRoomStep::SetChatForRoom {
                name,
                prompt_message_id,
            }));
        Ok(())
    }

    async fn bot_added(
        &self,
        ctx: &mut EventContext,
        name: String,
        prompt_message_id: Option<i32>,
    ) -> Result<(), Report<BotError>> {
        let EventKind::BotAdded { chat_title } = &ctx.event.kind else {
            return Ok(());
        };
        let chat_id = ctx.event.chat_id;
        let screen = self.view.room_settings(Some(chat_title)).await.or_bot()?;
        self.reply(ctx, screen).await?;
        if let Some(message_id) = prompt_message_id {
            self.outbox.push(Outbound::Delete {
                chat_id: ctx.event.private_chat(),
                message_id,
            });
        }
        ctx.session.enter(&Flow::CreateRoom(CreateRoomStep::Setting {
            name,
            chat_id: Some(chat_id),
        }));
        Ok(())
    }

    async fn save_room(
        &self,
        ctx: &mut EventContext,
        name: &str,
        chat_id: Option<ChatId>,
    ) -> Result<(), Report<BotError>> {
        let room = self
            .rooms
            .create_room(name, ctx.event.user(), chat_id)
            .await
            .or_bot()?;
        if let Some(chat_id) = room.chat_id {
            let members = self.rooms.members(room.id).await.or_bot()?;
            let screen = self.view.invitation(&room, &members).await.or_bot()?;
            self.outbox.push(Outbound::Send { chat_id, screen });
        }

        let members = self.rooms.members(room.id).await.or_bot()?;
        let screen = self.view.room_card(&room, &members, None).await.or_bot()?;
        let card_message_id = self.reply(ctx, screen).await?;
        if room.is_bound() {
            ctx.session.finish();
        } else {
            ctx.session
                .enter(&Flow::CreateRoom(CreateRoomStep::SendToChat {
                    room_id: room.id,
                    card_message_id,
                }));
        }
        Ok(())
    }

    /// The owner posted a room invitation into a group through inline mode.
    async fn room_card_posted(
        &self,
        ctx: &mut EventContext,
        expected: RoomId,
    ) -> Result<(), Report<BotError>> {
        let EventKind::ViaBotPost {
            chat_title,
            token: Some(token),
        } = &ctx.event.kind
        else {
            return Ok(());
        };
        if ctx.event.is_private() {
            return Ok(());
        }
        let action = match parse_token(token) {
            Ok(id) => self.actions.resolve(id).await,
            Err(report) => Err(report),
        };
        let Ok(action) = action else {
            debug!(%token, "posted card carries no known control");
            return Ok(());
        };
        if action.kind != ActionKind::JoinRoom {
            return Ok(());
        }
        let room_id = action.payload.room_id().or_bot()?;
        if room_id != expected {
            info!(%room_id, %expected, "another room was shared");
        }

        let room = self.rooms.room(room_id).await.or_bot()?;
        if room.chat_id == Some(ctx.event.chat_id) {
            return Ok(());
        }
        let screen = self
            .view
            .bind_chat_prompt(&room, ctx.event.chat_id, chat_title)
            .await
            .or_bot()?;
        self.notifier
            .send(Outbound::Send {
                chat_id: ctx.event.private_chat(),
                screen,
            })
            .await
            .or_bot()?;
        ctx.session.finish();
        Ok(())
    }
}
