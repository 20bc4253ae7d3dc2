//! Event handling.
//!
//! [`BotApp::handle`] runs one inbound event to completion: it loads the
//! sender's session and the pressed control up front, routes the event,
//! runs the handler and writes the session back only if the handler
//! succeeded. A failed step therefore stays where it was and the user's
//! next message retries it.

mod create_room;
mod create_task;
mod grade;
mod one_shot;

use crate::dispatch::{self, Route};
use crate::error::{BotError, BotResultExt};
use crate::event::InboundEvent;
use crate::notifier::{MessageRef, Notifier, Outbound, Outbox, Screen};
use crate::view::{View, message_link};
use planpoker_conversation::{
    ActionError, ActionRef, ActionRegistry, ChatSession, Flow, FlowKind, SessionStore,
    parse_token,
};
use planpoker_core::{Classify, Room, Task};
use planpoker_estimation::{EstimationAggregator, RoomLifecycle, Stores, TaskLifecycle};
use rootcause::Report;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

/// Everything known about an event before its handler runs.
#[derive(Debug)]
pub struct EventContext {
    pub event: InboundEvent,
    /// The sender's session, as the handler leaves it.
    pub session: ChatSession,
    /// The pressed control, if it resolved.
    pub action: Option<ActionRef>,
    /// Text for the toast answering a pressed control.
    pub toast: Option<String>,
    loaded: ChatSession,
}

impl EventContext {
    fn new(event: InboundEvent, session: ChatSession, action: Option<ActionRef>) -> Self {
        Self {
            event,
            loaded: session.clone(),
            session,
            action,
            toast: None,
        }
    }

    /// Sets the toast shown for the pressed control.
    pub fn toast(&mut self, text: impl Into<String>) {
        self.toast = Some(text.into());
    }

    fn session_changed(&self) -> bool {
        self.session != self.loaded
    }
}

/// The bot's event handlers and their collaborators.
#[derive(Clone)]
pub struct BotApp {
    sessions: Arc<dyn SessionStore>,
    actions: Arc<dyn ActionRegistry>,
    stores: Stores,
    aggregator: EstimationAggregator,
    rooms: RoomLifecycle,
    tasks: TaskLifecycle,
    view: View,
    notifier: Arc<dyn Notifier>,
    outbox: Outbox,
}

impl BotApp {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        actions: Arc<dyn ActionRegistry>,
        stores: Stores,
        notifier: Arc<dyn Notifier>,
        outbox: Outbox,
    ) -> Self {
        Self {
            view: View::new(actions.clone()),
            aggregator: EstimationAggregator::from_stores(&stores),
            rooms: RoomLifecycle::from_stores(&stores),
            tasks: TaskLifecycle::from_stores(&stores),
            sessions,
            actions,
            stores,
            notifier,
            outbox,
        }
    }

    /// Handles one inbound event. Never fails; errors are logged and shown
    /// to the user.
    #[instrument(skip_all, fields(user = %event.user(), chat = %event.chat_id))]
    pub async fn handle(&self, event: InboundEvent) {
        if let Err(e) = self.stores.users.save_user(&event.sender).await {
            warn!(error = %e, "failed to store user profile");
        }

        let session = match self.sessions.get(event.user()).await.or_bot() {
            Ok(session) => session,
            Err(report) => {
                let session = ChatSession::new(event.user());
                let mut ctx = EventContext::new(event, session, None);
                self.report(&mut ctx, &report);
                self.answer_control(&mut ctx);
                return;
            }
        };
        let (action, stale_control) = self.resolve_control(&event).await;
        let mut ctx = EventContext::new(event, session, action);

        let open_flow = self.open_flow(&mut ctx);
        let route = dispatch::resolve(
            &ctx.event,
            open_flow.as_ref(),
            ctx.action.as_ref(),
            stale_control,
        );
        debug!(?route, "routed");

        match self.run(&mut ctx, route).await {
            Ok(()) => {
                if ctx.session_changed() {
                    if let Err(report) = self.sessions.put(&ctx.session).await.or_bot() {
                        self.report(&mut ctx, &report);
                    }
                }
            }
            Err(report) => self.report(&mut ctx, &report),
        }

        if let Some((query_id, query)) = dispatch::search_query(&ctx.event) {
            if let Err(report) = self.search_rooms(&ctx.event, query_id, query).await {
                error!(error = ?report, "room search failed");
            }
        }

        self.answer_control(&mut ctx);
    }

    async fn run(&self, ctx: &mut EventContext, route: Route) -> Result<(), Report<BotError>> {
        match route {
            Route::Start => self.show_start(ctx).await,
            Route::EnterFlow { flow, action } => match flow {
                FlowKind::CreateRoom => self.enter_create_room(ctx).await,
                FlowKind::CreateTask => self.enter_create_task(ctx, &action).await,
                FlowKind::EnterGrade => self.enter_grade(ctx, &action).await,
            },
            Route::ContinueFlow { flow, action } => match flow {
                Flow::CreateRoom(step) => self.continue_create_room(ctx, step, action).await,
                Flow::CreateTask(step) => self.continue_create_task(ctx, step, action).await,
                Flow::EnterGrade(step) => self.continue_grade(ctx, step).await,
            },
            Route::OneShot(action) => self.one_shot(ctx, action).await,
            Route::Ignore => Ok(()),
        }
    }

    /// Resolves the pressed control. Returns whether a control was pressed
    /// but could not be resolved.
    async fn resolve_control(&self, event: &InboundEvent) -> (Option<ActionRef>, bool) {
        let Some(token) = event.control_token() else {
            return (None, false);
        };
        let resolved = match parse_token(token) {
            Ok(id) => self.actions.resolve(id).await,
            Err(report) => Err(report),
        };
        match resolved {
            Ok(action) => (Some(action), false),
            Err(report) => {
                if matches!(report.current_context(), ActionError::NotFound { .. }) {
                    debug!(token, "control no longer resolves");
                } else {
                    error!(token, error = ?report, "failed to resolve control");
                }
                (None, true)
            }
        }
    }

    /// Decodes the open flow. A session that does not decode is cleared.
    fn open_flow(&self, ctx: &mut EventContext) -> Option<Flow> {
        match ctx.session.flow() {
            Ok(flow) => flow,
            Err(report) => {
                warn!(error = ?report, "discarding undecodable session");
                ctx.session.finish();
                None
            }
        }
    }

    /// Logs a handler failure and tells the user.
    fn report(&self, ctx: &mut EventContext, report: &Report<BotError>) {
        let err = report.current_context();
        if err.kind().is_retryable() {
            error!(kind = %err.kind(), error = ?report, "event handling failed");
        } else {
            warn!(kind = %err.kind(), error = ?report, "event rejected");
        }
        let message = err.user_message();
        if ctx.event.callback_id().is_some() {
            ctx.toast(message);
        } else if ctx.event.inline_query().is_none() {
            self.outbox.push(Outbound::Send {
                chat_id: ctx.event.private_chat(),
                screen: Screen::text(format!("❗️ {}", crate::view::escape(&message))),
            });
        }
    }

    /// Answers a pressed control so the client stops its spinner.
    fn answer_control(&self, ctx: &mut EventContext) {
        if let Some(query_id) = ctx.event.callback_id() {
            self.outbox.push(Outbound::Toast {
                query_id: query_id.to_string(),
                text: ctx.toast.take().unwrap_or_default(),
            });
        }
    }

    /// Shows `screen` to the sender: replaces the pressed message in a
    /// private chat, otherwise sends a new private message.
    async fn reply(
        &self,
        ctx: &EventContext,
        screen: Screen,
    ) -> Result<Option<i32>, Report<BotError>> {
        let outbound = match (ctx.event.callback_id(), ctx.event.message_id) {
            (Some(_), Some(message_id)) if ctx.event.is_private() => Outbound::Edit {
                message: MessageRef::Chat {
                    chat_id: ctx.event.chat_id,
                    message_id,
                },
                screen,
            },
            _ => Outbound::Send {
                chat_id: ctx.event.private_chat(),
                screen,
            },
        };
        self.notifier.send(outbound).await.or_bot()
    }

    /// Replaces the message the pressed control sits on. Best effort.
    fn refresh_pressed(&self, ctx: &EventContext, screen: Screen) {
        let message = match (&ctx.event.kind, ctx.event.message_id) {
            (
                crate::event::EventKind::Callback {
                    inline_message_id: Some(id),
                    ..
                },
                _,
            ) => MessageRef::Inline(id.clone()),
            (_, Some(message_id)) => MessageRef::Chat {
                chat_id: ctx.event.chat_id,
                message_id,
            },
            _ => return,
        };
        self.outbox.push(Outbound::Edit { message, screen });
    }

    async fn show_start(&self, ctx: &mut EventContext) -> Result<(), Report<BotError>> {
        ctx.session.finish();
        let screen = self.view.start().await.or_bot()?;
        self.reply(ctx, screen).await?;
        Ok(())
    }

    /// Shows the room card to the sender.
    async fn show_room(
        &self,
        ctx: &EventContext,
        room: &Room,
        published: Option<&str>,
    ) -> Result<(), Report<BotError>> {
        let members = self.rooms.members(room.id).await.or_bot()?;
        let screen = self
            .view
            .room_card(room, &members, published)
            .await
            .or_bot()?;
        self.reply(ctx, screen).await?;
        Ok(())
    }

    /// Posts a task's vote card to the room's group and returns a link to it.
    async fn publish_task(
        &self,
        room: &Room,
        task: &Task,
    ) -> Result<Option<String>, Report<BotError>> {
        let chat_id = room.chat_id.ok_or_else(|| {
            BotError::invalid("Share the room to a group before publishing tasks.")
        })?;
        let members = self.rooms.members(room.id).await.or_bot()?;
        let rates = self.stores.rates.list_rates(task.id).await.or_bot()?;
        let screen = self
            .view
            .vote_card(room, task, &members, &rates)
            .await
            .or_bot()?;
        let message_id = self
            .notifier
            .send(Outbound::Send { chat_id, screen })
            .await
            .or_bot()?;
        Ok(message_id.map(|id| message_link(chat_id, id)))
    }

    #[instrument(skip(self, event))]
    async fn search_rooms(
        &self,
        event: &InboundEvent,
        query_id: &str,
        query: &str,
    ) -> Result<(), Report<BotError>> {
        let rooms = self.rooms.search(event.user(), query).await.or_bot()?;
        let mut articles = Vec::with_capacity(rooms.len());
        for room in rooms.iter().filter(|room| !room.is_finished()) {
            let members = self.rooms.members(room.id).await.or_bot()?;
            articles.push(self.view.room_article(room, &members).await.or_bot()?);
        }
        self.notifier
            .send(Outbound::InlineResults {
                query_id: query_id.to_string(),
                articles,
            })
            .await
            .or_bot()?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::Harness;
    use crate::event::fixtures;
    use crate::notifier::Outbound;
    use planpoker_conversation::SessionStore;

    #[tokio::test]
    async fn start_command_clears_open_flow() {
        let harness = Harness::new();
        let mut session = harness.session(1).await;
        session.start_flow("ADD_TASK");
        session.advance_to("URL");
        session.set_data("roomId", planpoker_core::RoomId::new().to_string());
        harness.sessions.put(&session).await.expect("put");

        harness.handle(fixtures::text(1, "/start")).await;

        assert!(harness.session(1).await.is_idle());
        assert!(harness.notifier.last_screen().text.contains("Planning poker"));
    }

    #[tokio::test]
    async fn undecodable_session_is_cleared() {
        let harness = Harness::new();
        let mut session = harness.session(1).await;
        session.start_flow("ADD_TASK");
        session.advance_to("SETTING");
        harness.sessions.put(&session).await.expect("put");

        harness.handle(fixtures::text(1, "hello")).await;

        assert!(harness.session(1).await.is_idle());
    }

    #[tokio::test]
    async fn unknown_control_is_a_quiet_no_op() {
        let harness = Harness::new();
        harness.handle(fixtures::press(1, 1, "act_01J00000000000000000000000")).await;

        let sent = harness.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0], Outbound::Toast { text, .. } if text.is_empty()));
    }

    #[tokio::test]
    async fn every_event_stores_the_sender() {
        use planpoker_estimation::UserStore;
        let harness = Harness::new();
        harness.handle(fixtures::text(9, "hi")).await;
        let user = harness.store.get_user(9.into()).await.expect("user");
        assert_eq!(user.display_name, "User 9");
    }
}
