//! Screen rendering.
//!
//! Every interactive control is backed by an action reference created while
//! the screen is rendered, so rendering needs the registry.

use crate::notifier::{Button, InlineArticle, Keyboard, Screen};
use planpoker_conversation::{ActionError, ActionKind, ActionPayload, ActionRegistry, keys};
use planpoker_core::{ChatId, Rate, Room, Task, User, UserId};
use planpoker_estimation::{Consensus, TASK_PAGE_SIZE};
use rootcause::Report;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

/// Vote cards: label and value.
const VOTE_CARDS: [(&str, i32); 7] = [
    ("☕", 0),
    ("0", 0),
    ("1", 1),
    ("2", 2),
    ("3", 3),
    ("5", 5),
    ("8", 8),
];

/// Escapes text for HTML parse mode.
#[must_use]
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Public link to a message in a group chat.
#[must_use]
pub fn message_link(chat_id: ChatId, message_id: i32) -> String {
    format!("https://t.me/c/{}/{message_id}", chat_id.link_component())
}

fn user_link(user: &User) -> String {
    format!(
        "<a href=\"tg://user?id={}\">{}</a>",
        user.id,
        escape(&user.display_name)
    )
}

fn room_payload(room: &Room) -> ActionPayload {
    ActionPayload::new().with(keys::ROOM_ID, room.id)
}

fn task_payload(task: &Task) -> ActionPayload {
    ActionPayload::new()
        .with(keys::ROOM_ID, task.room_id)
        .with(keys::TASK_ID, task.id)
}

fn task_heading(room: &Room, task: &Task) -> String {
    let mut text = format!(
        "Room: <b>{}</b>\nTask: <b>{}</b>\n",
        escape(&room.name),
        escape(&task.name)
    );
    if !task.url.is_empty() {
        let _ = writeln!(text, "{}", escape(&task.url));
    }
    text
}

/// Renders screens.
#[derive(Clone)]
pub struct View {
    actions: Arc<dyn ActionRegistry>,
}

impl View {
    pub fn new(actions: Arc<dyn ActionRegistry>) -> Self {
        Self { actions }
    }

    async fn button(
        &self,
        label: &str,
        kind: ActionKind,
        payload: ActionPayload,
    ) -> Result<Button, Report<ActionError>> {
        let action = self.actions.create(kind, payload).await?;
        Ok(Button::callback(label, action.token()))
    }

    async fn cancel_row(&self) -> Result<Vec<Button>, Report<ActionError>> {
        Ok(vec![
            self.button("✖️ Cancel", ActionKind::Cancel, ActionPayload::new())
                .await?,
        ])
    }

    /// The start screen.
    pub async fn start(&self) -> Result<Screen, Report<ActionError>> {
        let keyboard = Keyboard::new()
            .row(vec![
                self.button("➕ New room", ActionKind::CreateRoom, ActionPayload::new())
                    .await?,
            ])
            .row(vec![
                self.button("🗂 My rooms", ActionKind::ShowRooms, ActionPayload::new())
                    .await?,
            ]);
        Ok(Screen::text(
            "<b>Planning poker</b>\n\nCreate a room for your team or open one you take part in.",
        )
        .with_keyboard(keyboard))
    }

    pub async fn room_name_prompt(&self) -> Result<Screen, Report<ActionError>> {
        Ok(Screen::text("Enter the room name")
            .with_keyboard(Keyboard::new().row(self.cancel_row().await?)))
    }

    /// Asks the owner to add the bot to the planning group.
    pub async fn chat_prompt(&self) -> Result<Screen, Report<ActionError>> {
        let keyboard = Keyboard::new()
            .row(vec![
                self.button(
                    "The bot was added earlier",
                    ActionKind::BotAlreadyAdded,
                    ActionPayload::new(),
                )
                .await?,
            ])
            .row(self.cancel_row().await?);
        Ok(
            Screen::text("Add the bot to the group where the planning will take place")
                .with_keyboard(keyboard),
        )
    }

    pub async fn room_settings(
        &self,
        chat_title: Option<&str>,
    ) -> Result<Screen, Report<ActionError>> {
        let mut text = String::new();
        if let Some(title) = chat_title {
            let _ = writeln!(text, "Group <b>{}</b> selected.\n", escape(title));
        }
        text.push_str("Confirm the room settings");
        let keyboard = Keyboard::new()
            .row(vec![
                self.button("✅ Create room", ActionKind::RoomSettings, ActionPayload::new())
                    .await?,
            ])
            .row(self.cancel_row().await?);
        Ok(Screen::text(text).with_keyboard(keyboard))
    }

    /// The room card shown to members in their private chat.
    pub async fn room_card(
        &self,
        room: &Room,
        members: &[User],
        published: Option<&str>,
    ) -> Result<Screen, Report<ActionError>> {
        let mut text = format!(
            "Room <b>{}</b>\n🗓 {}\n\nMembers:\n",
            escape(&room.name),
            room.created_at.format("%d %B %Y")
        );
        for member in members {
            let _ = writeln!(text, "- {}", user_link(member));
        }
        if room.is_finished() {
            text.push_str("\n🏁 Planning is finished");
        } else if !room.is_bound() {
            text.push_str("\nShare the room to the planning group to bind it.");
        }
        if let Some(link) = published {
            let _ = write!(text, "\n\nTask published: {link}");
        }

        let payload = room_payload(room);
        let mut keyboard = Keyboard::new();
        if !room.is_finished() {
            keyboard = keyboard
                .row(vec![
                    self.button("➕ Add task", ActionKind::CreateTask, payload.clone())
                        .await?,
                    Button::switch_inline("📣 Share", room.name.clone()),
                ])
                .row(vec![
                    self.button(
                        "📋 Tasks",
                        ActionKind::ShowTasks,
                        payload.clone().with(keys::PAGE, 0),
                    )
                    .await?,
                    self.button("🔜 Next task", ActionKind::NextTask, payload.clone())
                        .await?,
                ])
                .row(vec![
                    self.button("🏁 Finish planning", ActionKind::FinishRoom, payload)
                        .await?,
                ]);
        } else {
            keyboard = keyboard.row(vec![
                self.button("📋 Tasks", ActionKind::ShowTasks, payload.with(keys::PAGE, 0))
                    .await?,
            ]);
        }
        keyboard = keyboard.row(vec![
            self.button("⬅️ Back", ActionKind::Start, ActionPayload::new())
                .await?,
        ]);
        Ok(Screen::text(text).with_keyboard(keyboard))
    }

    /// Rooms the user takes part in.
    pub async fn rooms(&self, rooms: &[Room]) -> Result<Screen, Report<ActionError>> {
        let text = if rooms.is_empty() {
            "You are not in any room yet."
        } else {
            "Your rooms"
        };
        let mut keyboard = Keyboard::new();
        for room in rooms {
            let marker = if room.is_finished() { "🏁" } else { "🟢" };
            keyboard = keyboard.row(vec![
                self.button(
                    &format!("{marker} {}", room.name),
                    ActionKind::ShowRoom,
                    room_payload(room),
                )
                .await?,
            ]);
        }
        keyboard = keyboard.row(vec![
            self.button("⬅️ Back", ActionKind::Start, ActionPayload::new())
                .await?,
        ]);
        Ok(Screen::text(text).with_keyboard(keyboard))
    }

    /// Invitation posted into a group. Its first control joins the room.
    pub async fn invitation(
        &self,
        room: &Room,
        members: &[User],
    ) -> Result<Screen, Report<ActionError>> {
        let mut text = format!(
            "Room <b>{}</b>\n🗓 {}\n\nMembers:\n",
            escape(&room.name),
            room.created_at.format("%d %B %Y")
        );
        for member in members {
            let _ = writeln!(text, "- {}", user_link(member));
        }
        let keyboard = Keyboard::new().row(vec![
            self.button("🙋 Join", ActionKind::JoinRoom, room_payload(room))
                .await?,
        ]);
        Ok(Screen::text(text).with_keyboard(keyboard))
    }

    /// Inline query result for a room.
    pub async fn room_article(
        &self,
        room: &Room,
        members: &[User],
    ) -> Result<InlineArticle, Report<ActionError>> {
        Ok(InlineArticle {
            id: room.id.to_string(),
            title: room.name.clone(),
            description: format!("Created {}", room.created_at.format("%d %B %Y")),
            screen: self.invitation(room, members).await?,
        })
    }

    /// Asks the owner to confirm planning in the group the room was shared to.
    pub async fn bind_chat_prompt(
        &self,
        room: &Room,
        chat_id: ChatId,
        chat_title: &str,
    ) -> Result<Screen, Report<ActionError>> {
        let payload = room_payload(room)
            .with(keys::CHAT_ID, chat_id)
            .with(keys::CHAT_NAME, chat_title);
        let keyboard = Keyboard::new()
            .row(vec![
                self.button("✅ Plan in this group", ActionKind::BindChat, payload)
                    .await?,
            ])
            .row(vec![
                self.button("⬅️ Back", ActionKind::Start, ActionPayload::new())
                    .await?,
            ]);
        Ok(Screen::text(format!(
            "Room <b>{}</b> was shared to <b>{}</b>. Publish tasks there?",
            escape(&room.name),
            escape(chat_title)
        ))
        .with_keyboard(keyboard))
    }

    pub async fn task_name_prompt(&self) -> Result<Screen, Report<ActionError>> {
        Ok(Screen::text("Enter the task name")
            .with_keyboard(Keyboard::new().row(self.cancel_row().await?)))
    }

    pub async fn task_url_prompt(&self) -> Result<Screen, Report<ActionError>> {
        Ok(Screen::text("Enter a link to the task")
            .with_keyboard(Keyboard::new().row(self.cancel_row().await?)))
    }

    /// The three ways to save a new task.
    pub async fn task_settings(&self, prefix: &str) -> Result<Screen, Report<ActionError>> {
        let keyboard = Keyboard::new()
            .row(vec![
                self.button(
                    "💾 Save and 🏹 publish",
                    ActionKind::SaveAndPublishTask,
                    ActionPayload::new(),
                )
                .await?,
            ])
            .row(vec![
                self.button(
                    "💾 Save and 🔄 add another",
                    ActionKind::SaveAndNewTask,
                    ActionPayload::new(),
                )
                .await?,
            ])
            .row(vec![
                self.button(
                    "💾 Save and close",
                    ActionKind::SaveAndCloseTask,
                    ActionPayload::new(),
                )
                .await?,
            ]);
        Ok(Screen::text(format!("{prefix}Choose how to save the task")).with_keyboard(keyboard))
    }

    /// The card members vote on.
    pub async fn vote_card(
        &self,
        room: &Room,
        task: &Task,
        members: &[User],
        rates: &[Rate],
    ) -> Result<Screen, Report<ActionError>> {
        let voted: HashMap<UserId, i32> = rates.iter().map(|r| (r.user_id, r.sum)).collect();
        let mut text = task_heading(room, task);
        text.push('\n');
        for member in members {
            let marker = if voted.contains_key(&member.id) {
                "✅"
            } else {
                "⏳"
            };
            let _ = writeln!(text, "{marker} {}", user_link(member));
        }

        let payload = task_payload(task);
        let mut cards = Vec::with_capacity(VOTE_CARDS.len());
        for (label, sum) in VOTE_CARDS {
            cards.push(
                self.button(label, ActionKind::AddVote, payload.clone().with(keys::SUM, sum))
                    .await?,
            );
        }
        let keyboard = Keyboard::new().row(cards).row(vec![
            self.button("👀 Reveal", ActionKind::FinishTask, payload)
                .await?,
        ]);
        Ok(Screen::text(text).with_keyboard(keyboard))
    }

    /// Votes and statistics of a finished task.
    pub async fn finished_task(
        &self,
        room: &Room,
        consensus: &Consensus,
        members: &[User],
    ) -> Result<Screen, Report<ActionError>> {
        let voted: HashMap<UserId, i32> = consensus
            .rates
            .iter()
            .map(|r| (r.user_id, r.sum))
            .collect();
        let mut text = task_heading(room, &consensus.task);
        text.push_str("\nVotes:\n");
        for member in members {
            let vote = voted
                .get(&member.id)
                .map_or_else(|| "❓".to_string(), ToString::to_string);
            let _ = writeln!(text, "{vote} - {}", user_link(member));
        }
        let _ = write!(
            text,
            "\nMedian - <b>{}</b>\nMode - <b>{}</b>",
            consensus.median, consensus.mode
        );

        let keyboard = Keyboard::new().row(vec![
            self.button("🔜 Next task", ActionKind::NextTask, room_payload(room))
                .await?,
        ]);
        Ok(Screen::text(text).with_keyboard(keyboard))
    }

    /// Sent privately to the owner once voting on a task is over.
    pub async fn grade_prompt(&self, consensus: &Consensus) -> Result<Screen, Report<ActionError>> {
        let payload = task_payload(&consensus.task);
        let keyboard = Keyboard::new()
            .row(vec![
                self.button("✍️ Enter grade", ActionKind::EnterGrade, payload.clone())
                    .await?,
            ])
            .row(vec![
                self.button("🔄 Revote", ActionKind::Revote, payload)
                    .await?,
            ]);
        Ok(Screen::text(format!(
            "Voting on <b>{}</b> is over.\nMedian - <b>{}</b>, mode - <b>{}</b>.\n\nEnter the final grade or start the vote over.",
            escape(&consensus.task.name),
            consensus.median,
            consensus.mode
        ))
        .with_keyboard(keyboard))
    }

    pub async fn grade_input_prompt(&self, task: &Task) -> Result<Screen, Report<ActionError>> {
        Ok(Screen::text(format!(
            "Enter the final grade for <b>{}</b>",
            escape(&task.name)
        ))
        .with_keyboard(Keyboard::new().row(self.cancel_row().await?)))
    }

    /// One page of a room's tasks.
    pub async fn task_list(
        &self,
        room: &Room,
        tasks: &[Task],
        page: usize,
    ) -> Result<Screen, Report<ActionError>> {
        let mut keyboard = Keyboard::new();
        for task in tasks {
            let label = if task.finished {
                format!("✅ {} {}", task.grade, task.name)
            } else {
                format!("❌ {}", task.name)
            };
            keyboard = keyboard.row(vec![
                self.button(&label, ActionKind::ShowTask, task_payload(task))
                    .await?,
            ]);
        }

        let mut nav = Vec::new();
        if page > 0 {
            nav.push(
                self.button(
                    "⬅️",
                    ActionKind::ShowTasks,
                    room_payload(room).with(keys::PAGE, page - 1),
                )
                .await?,
            );
        }
        nav.push(
            self.button("Back", ActionKind::ShowRoom, room_payload(room))
                .await?,
        );
        if tasks.len() == TASK_PAGE_SIZE {
            nav.push(
                self.button(
                    "➡️",
                    ActionKind::ShowTasks,
                    room_payload(room).with(keys::PAGE, page + 1),
                )
                .await?,
            );
        }
        keyboard = keyboard.row(nav);

        let text = if tasks.is_empty() {
            format!("No tasks in room <b>{}</b>", escape(&room.name))
        } else {
            format!("Tasks in room <b>{}</b>", escape(&room.name))
        };
        Ok(Screen::text(text).with_keyboard(keyboard))
    }

    /// Details of one task, shown privately.
    pub async fn task_details(
        &self,
        room: &Room,
        task: &Task,
        rates: &[Rate],
    ) -> Result<Screen, Report<ActionError>> {
        let mut text = task_heading(room, task);
        if task.finished {
            let _ = write!(text, "\n✅ Voting finished, grade <b>{}</b>", task.grade);
        } else {
            let _ = write!(text, "\n⏳ Voting in progress, {} vote(s)", rates.len());
        }
        let keyboard = Keyboard::new().row(vec![
            self.button(
                "⬅️ Back",
                ActionKind::ShowTasks,
                room_payload(room).with(keys::PAGE, 0),
            )
            .await?,
        ]);
        Ok(Screen::text(text).with_keyboard(keyboard))
    }

    /// Posted to the room's group when planning is closed.
    #[must_use]
    pub fn planning_summary(&self, room: &Room, tasks: &[Task]) -> Screen {
        let mut text = format!(
            "🏁 Planning in <b>{}</b> is finished\n\n",
            escape(&room.name)
        );
        if tasks.is_empty() {
            text.push_str("No tasks were estimated.");
        }
        for task in tasks {
            if task.finished {
                let _ = writeln!(text, "✅ {} - {}", task.grade, escape(&task.name));
            } else {
                let _ = writeln!(text, "❌ {}", escape(&task.name));
            }
        }
        Screen::text(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::ButtonAction;
    use planpoker_conversation::{InMemoryActionRegistry, parse_token};

    fn view() -> (InMemoryActionRegistry, View) {
        let registry = InMemoryActionRegistry::new();
        (registry.clone(), View::new(Arc::new(registry)))
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape("<b>&\"x\""), "&lt;b&gt;&amp;&quot;x&quot;");
    }

    #[test]
    fn link_strips_supergroup_prefix() {
        assert_eq!(
            message_link(ChatId::new(-1_001_234_567), 42),
            "https://t.me/c/1234567/42"
        );
    }

    #[tokio::test]
    async fn every_callback_control_is_registered() {
        let (registry, view) = view();
        let room = Room::new("R", UserId::new(1), Some(ChatId::new(-100_1)));
        let screen = view.room_card(&room, &[], None).await.expect("card");

        let tokens: Vec<String> = screen
            .keyboard
            .buttons()
            .filter_map(|b| match &b.action {
                ButtonAction::Callback(token) => Some(token.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(tokens.len(), registry.len());
        for token in tokens {
            let id = parse_token(&token).expect("token");
            assert!(registry.resolve(id).await.is_ok());
        }
    }

    #[tokio::test]
    async fn vote_card_offers_the_scale() {
        let (registry, view) = view();
        let room = Room::new("R", UserId::new(1), Some(ChatId::new(-100_1)));
        let task = Task::new(room.id, "T", "");
        view.vote_card(&room, &task, &[], &[]).await.expect("card");

        let mut sums: Vec<i32> = registry
            .find(ActionKind::AddVote)
            .iter()
            .map(|a| a.payload.parse::<i32>(keys::SUM).expect("sum"))
            .collect();
        sums.sort_unstable();
        assert_eq!(sums, vec![0, 0, 1, 2, 3, 5, 8]);
    }

    #[tokio::test]
    async fn invitation_starts_with_join() {
        let (registry, view) = view();
        let room = Room::new("R", UserId::new(1), None);
        let screen = view.invitation(&room, &[]).await.expect("invite");

        let Some(ButtonAction::Callback(token)) =
            screen.keyboard.buttons().next().map(|b| b.action.clone())
        else {
            panic!("expected a callback control");
        };
        let action = registry
            .resolve(parse_token(&token).expect("token"))
            .await
            .expect("resolve");
        assert_eq!(action.kind, ActionKind::JoinRoom);
    }

    #[tokio::test]
    async fn last_page_has_no_forward_control() {
        let (registry, view) = view();
        let room = Room::new("R", UserId::new(1), None);
        let tasks = vec![Task::new(room.id, "only", "")];
        view.task_list(&room, &tasks, 0).await.expect("list");
        assert!(registry.find(ActionKind::ShowTasks).is_empty());
    }
}
