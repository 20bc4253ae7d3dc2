//! Typed multi-step flows.
//!
//! A session persists its dialog position as a loosely typed triple
//! (flow name, step name, string map). Handlers never touch that triple
//! directly: they decode it into a [`Flow`], where every step carries
//! exactly the data collected so far, and encode the next step back.

use crate::action::keys;
use crate::error::SessionError;
use planpoker_core::{ChatId, RoomId, TaskId};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The named multi-step dialogs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKind {
    /// Room creation.
    CreateRoom,
    /// Task creation inside a room.
    CreateTask,
    /// Entering the final grade of a finished task.
    EnterGrade,
}

impl FlowKind {
    /// Returns the persisted flow name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CreateRoom => "NEW_ROOM",
            Self::CreateTask => "ADD_TASK",
            Self::EnterGrade => "FINISH_TASK_RATE",
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowKind {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW_ROOM" => Ok(Self::CreateRoom),
            "ADD_TASK" => Ok(Self::CreateTask),
            "FINISH_TASK_RATE" => Ok(Self::EnterGrade),
            other => Err(SessionError::UnknownStep {
                flow: other.to_string(),
                step: String::new(),
            }),
        }
    }
}

/// Steps of room creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateRoomStep {
    /// Waiting for the room name.
    Name,
    /// Waiting for the bot to be added to a group chat.
    SetChatForRoom {
        name: String,
        prompt_message_id: Option<i32>,
    },
    /// Waiting for the room settings to be confirmed.
    Setting {
        name: String,
        chat_id: Option<ChatId>,
    },
    /// Room saved without a chat; waiting for its card to be posted in one.
    SendToChat {
        room_id: RoomId,
        card_message_id: Option<i32>,
    },
}

/// Steps of task creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateTaskStep {
    /// Waiting for the task name.
    Name { room_id: RoomId },
    /// Waiting for the task link.
    Url { room_id: RoomId, name: String },
    /// Waiting for one of the save controls.
    Setting {
        room_id: RoomId,
        name: String,
        url: String,
    },
}

/// Steps of final grade entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnterGradeStep {
    /// Waiting for a numeric grade.
    SetGrade { room_id: RoomId, task_id: TaskId },
}

/// A flow positioned at one of its steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    CreateRoom(CreateRoomStep),
    CreateTask(CreateTaskStep),
    EnterGrade(EnterGradeStep),
}

impl Flow {
    /// Returns which flow this is.
    #[must_use]
    pub fn kind(&self) -> FlowKind {
        match self {
            Self::CreateRoom(_) => FlowKind::CreateRoom,
            Self::CreateTask(_) => FlowKind::CreateTask,
            Self::EnterGrade(_) => FlowKind::EnterGrade,
        }
    }

    /// Returns the persisted step name.
    #[must_use]
    pub fn step_name(&self) -> &'static str {
        match self {
            Self::CreateRoom(CreateRoomStep::Name) | Self::CreateTask(CreateTaskStep::Name { .. }) => {
                "NAME"
            }
            Self::CreateRoom(CreateRoomStep::SetChatForRoom { .. }) => "SET_CHAT_FOR_ROOM",
            Self::CreateRoom(CreateRoomStep::Setting { .. })
            | Self::CreateTask(CreateTaskStep::Setting { .. }) => "SETTING",
            Self::CreateRoom(CreateRoomStep::SendToChat { .. }) => "SEND_TO_CHAT",
            Self::CreateTask(CreateTaskStep::Url { .. }) => "URL",
            Self::EnterGrade(EnterGradeStep::SetGrade { .. }) => "SET_GRADE",
        }
    }

    /// Returns the step payload as persisted key/value pairs.
    #[must_use]
    pub fn data(&self) -> Vec<(&'static str, String)> {
        let mut data = Vec::new();
        match self {
            Self::CreateRoom(CreateRoomStep::Name) => {}
            Self::CreateRoom(CreateRoomStep::SetChatForRoom {
                name,
                prompt_message_id,
            }) => {
                data.push((keys::NAME, name.clone()));
                if let Some(id) = prompt_message_id {
                    data.push((keys::MESSAGE_ID, id.to_string()));
                }
            }
            Self::CreateRoom(CreateRoomStep::Setting { name, chat_id }) => {
                data.push((keys::NAME, name.clone()));
                if let Some(chat_id) = chat_id {
                    data.push((keys::CHAT_ID, chat_id.to_string()));
                }
            }
            Self::CreateRoom(CreateRoomStep::SendToChat {
                room_id,
                card_message_id,
            }) => {
                data.push((keys::ROOM_ID, room_id.to_string()));
                if let Some(id) = card_message_id {
                    data.push((keys::MESSAGE_ID, id.to_string()));
                }
            }
            Self::CreateTask(CreateTaskStep::Name { room_id }) => {
                data.push((keys::ROOM_ID, room_id.to_string()));
            }
            Self::CreateTask(CreateTaskStep::Url { room_id, name }) => {
                data.push((keys::ROOM_ID, room_id.to_string()));
                data.push((keys::NAME, name.clone()));
            }
            Self::CreateTask(CreateTaskStep::Setting { room_id, name, url }) => {
                data.push((keys::ROOM_ID, room_id.to_string()));
                data.push((keys::NAME, name.clone()));
                data.push((keys::URL, url.clone()));
            }
            Self::EnterGrade(EnterGradeStep::SetGrade { room_id, task_id }) => {
                data.push((keys::ROOM_ID, room_id.to_string()));
                data.push((keys::TASK_ID, task_id.to_string()));
            }
        }
        data
    }

    /// Decodes a persisted triple.
    ///
    /// Returns `Ok(None)` when no flow is active.
    ///
    /// # Errors
    ///
    /// Returns an error if the flow or step is unknown, or a value the step
    /// requires is missing or malformed.
    pub fn decode(
        flow: &str,
        step: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<Option<Self>, SessionError> {
        if flow.is_empty() {
            return Ok(None);
        }
        let reader = StepData { flow, step, data };
        let kind: FlowKind = flow.parse().map_err(|_| reader.unknown())?;

        let decoded = match (kind, step) {
            (FlowKind::CreateRoom, "NAME") => Self::CreateRoom(CreateRoomStep::Name),
            (FlowKind::CreateRoom, "SET_CHAT_FOR_ROOM") => {
                Self::CreateRoom(CreateRoomStep::SetChatForRoom {
                    name: reader.required(keys::NAME)?.to_string(),
                    prompt_message_id: reader.optional(keys::MESSAGE_ID)?,
                })
            }
            (FlowKind::CreateRoom, "SETTING") => Self::CreateRoom(CreateRoomStep::Setting {
                name: reader.required(keys::NAME)?.to_string(),
                chat_id: reader.optional(keys::CHAT_ID)?,
            }),
            (FlowKind::CreateRoom, "SEND_TO_CHAT") => {
                Self::CreateRoom(CreateRoomStep::SendToChat {
                    room_id: reader.parsed(keys::ROOM_ID)?,
                    card_message_id: reader.optional(keys::MESSAGE_ID)?,
                })
            }
            (FlowKind::CreateTask, "NAME") => Self::CreateTask(CreateTaskStep::Name {
                room_id: reader.parsed(keys::ROOM_ID)?,
            }),
            (FlowKind::CreateTask, "URL") => Self::CreateTask(CreateTaskStep::Url {
                room_id: reader.parsed(keys::ROOM_ID)?,
                name: reader.required(keys::NAME)?.to_string(),
            }),
            (FlowKind::CreateTask, "SETTING") => Self::CreateTask(CreateTaskStep::Setting {
                room_id: reader.parsed(keys::ROOM_ID)?,
                name: reader.required(keys::NAME)?.to_string(),
                url: reader.required(keys::URL)?.to_string(),
            }),
            (FlowKind::EnterGrade, "SET_GRADE") => Self::EnterGrade(EnterGradeStep::SetGrade {
                room_id: reader.parsed(keys::ROOM_ID)?,
                task_id: reader.parsed(keys::TASK_ID)?,
            }),
            _ => return Err(reader.unknown()),
        };
        Ok(Some(decoded))
    }
}

/// Read access to one persisted step payload.
struct StepData<'a> {
    flow: &'a str,
    step: &'a str,
    data: &'a BTreeMap<String, String>,
}

impl StepData<'_> {
    fn unknown(&self) -> SessionError {
        SessionError::UnknownStep {
            flow: self.flow.to_string(),
            step: self.step.to_string(),
        }
    }

    fn required(&self, key: &'static str) -> Result<&str, SessionError> {
        self.data
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| SessionError::MissingData {
                flow: self.flow.to_string(),
                step: self.step.to_string(),
                key,
            })
    }

    fn parsed<T>(&self, key: &'static str) -> Result<T, SessionError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let raw = self.required(key)?;
        raw.parse::<T>().map_err(|e| SessionError::InvalidData {
            key,
            reason: e.to_string(),
        })
    }

    fn optional<T>(&self, key: &'static str) -> Result<Option<T>, SessionError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.data.get(key) {
            None => Ok(None),
            Some(raw) if raw.is_empty() => Ok(None),
            Some(_) => self.parsed(key).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(flow: &Flow) -> BTreeMap<String, String> {
        flow.data()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn no_active_flow_decodes_to_none() {
        let decoded = Flow::decode("", "", &BTreeMap::new()).expect("decode");
        assert!(decoded.is_none());
    }

    #[test]
    fn task_setting_step_decodes_with_all_fields() {
        let room_id = RoomId::new();
        let flow = Flow::CreateTask(CreateTaskStep::Setting {
            room_id,
            name: "Checkout".to_string(),
            url: "https://tracker/7".to_string(),
        });

        let decoded = Flow::decode("ADD_TASK", "SETTING", &encode(&flow))
            .expect("decode")
            .expect("flow");

        assert_eq!(decoded, flow);
        assert_eq!(decoded.step_name(), "SETTING");
        assert_eq!(decoded.kind(), FlowKind::CreateTask);
    }

    #[test]
    fn optional_chat_id_may_be_absent() {
        let mut data = BTreeMap::new();
        data.insert("name".to_string(), "Team A".to_string());

        let decoded = Flow::decode("NEW_ROOM", "SETTING", &data)
            .expect("decode")
            .expect("flow");

        assert_eq!(
            decoded,
            Flow::CreateRoom(CreateRoomStep::Setting {
                name: "Team A".to_string(),
                chat_id: None,
            })
        );
    }

    #[test]
    fn missing_required_key_is_reported() {
        let err = Flow::decode("ADD_TASK", "URL", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, SessionError::MissingData { key: "roomId", .. }));
    }

    #[test]
    fn malformed_id_is_reported() {
        let mut data = BTreeMap::new();
        data.insert("roomId".to_string(), "garbage".to_string());
        data.insert("taskId".to_string(), TaskId::new().to_string());

        let err = Flow::decode("FINISH_TASK_RATE", "SET_GRADE", &data).unwrap_err();
        assert!(matches!(err, SessionError::InvalidData { key: "roomId", .. }));
    }

    #[test]
    fn step_from_another_flow_is_unknown() {
        let err = Flow::decode("FINISH_TASK_RATE", "URL", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, SessionError::UnknownStep { .. }));

        let err = Flow::decode("PAINT_ROOM", "NAME", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, SessionError::UnknownStep { .. }));
    }
}
