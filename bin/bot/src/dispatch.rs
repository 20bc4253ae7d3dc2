//! Routing of inbound events.
//!
//! Routing is a pure function of the event, the open flow and the resolved
//! action; handlers run afterwards. Rules are tried in order and the first
//! match wins:
//!
//! 1. the start command or a go-to-start control
//! 2. a flow's entry control, a step control of the open flow, or a
//!    control-less event while a flow is open
//! 3. any other control, handled in one shot
//!
//! Inline queries are routed separately by [`search_query`].

use crate::event::InboundEvent;
use planpoker_conversation::{ActionRef, Flow, FlowKind};

/// Where an event goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Reset any open flow and show the start screen.
    Start,
    /// (Re)start a flow from its entry control.
    EnterFlow { flow: FlowKind, action: ActionRef },
    /// Feed the event to the open flow's current step.
    ContinueFlow {
        flow: Flow,
        action: Option<ActionRef>,
    },
    /// A single-shot control.
    OneShot(ActionRef),
    /// Nothing to do.
    Ignore,
}

/// Routes one event.
///
/// `action` is the resolved control of the event, if it carried one that
/// resolved. A control whose token did not resolve is passed as `None` with
/// `stale_control` set and is ignored rather than fed to an open flow.
#[must_use]
pub fn resolve(
    event: &InboundEvent,
    open_flow: Option<&Flow>,
    action: Option<&ActionRef>,
    stale_control: bool,
) -> Route {
    if event.is_start_command() {
        return Route::Start;
    }
    if let Some(action) = action {
        if action.kind.is_go_to_start() {
            return Route::Start;
        }
        if let Some(flow) = action.kind.entry_of() {
            return Route::EnterFlow {
                flow,
                action: action.clone(),
            };
        }
        if let Some(flow_kind) = action.kind.flow() {
            return match open_flow {
                Some(open) if open.kind() == flow_kind => Route::ContinueFlow {
                    flow: open.clone(),
                    action: Some(action.clone()),
                },
                _ => Route::Ignore,
            };
        }
        return Route::OneShot(action.clone());
    }
    if stale_control {
        return Route::Ignore;
    }
    match open_flow {
        Some(open) if event.continues_flow() => Route::ContinueFlow {
            flow: open.clone(),
            action: None,
        },
        _ => Route::Ignore,
    }
}

/// Returns the inline query to search rooms for, if any.
#[must_use]
pub fn search_query(event: &InboundEvent) -> Option<(&str, &str)> {
    event.inline_query()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::fixtures;
    use planpoker_conversation::{
        ActionKind, ActionPayload, CreateRoomStep, CreateTaskStep, keys,
    };
    use planpoker_core::RoomId;

    fn action(kind: ActionKind) -> ActionRef {
        ActionRef::new(kind, ActionPayload::new())
    }

    fn task_flow() -> Flow {
        Flow::CreateTask(CreateTaskStep::Name {
            room_id: RoomId::new(),
        })
    }

    #[test]
    fn start_command_beats_open_flow() {
        let event = fixtures::text(1, "/start");
        let flow = task_flow();
        assert_eq!(resolve(&event, Some(&flow), None, false), Route::Start);
    }

    #[test]
    fn cancel_control_goes_to_start() {
        let event = fixtures::press(1, 1, "t");
        let flow = task_flow();
        let cancel = action(ActionKind::Cancel);
        assert_eq!(
            resolve(&event, Some(&flow), Some(&cancel), false),
            Route::Start
        );
    }

    #[test]
    fn entry_control_restarts_flow() {
        let event = fixtures::press(1, 1, "t");
        let flow = task_flow();
        let entry = action(ActionKind::CreateRoom);
        assert_eq!(
            resolve(&event, Some(&flow), Some(&entry), false),
            Route::EnterFlow {
                flow: FlowKind::CreateRoom,
                action: entry
            }
        );
    }

    #[test]
    fn step_control_continues_only_its_flow() {
        let event = fixtures::press(1, 1, "t");
        let save = action(ActionKind::SaveAndNewTask);
        let task = task_flow();
        let room = Flow::CreateRoom(CreateRoomStep::Name);

        assert!(matches!(
            resolve(&event, Some(&task), Some(&save), false),
            Route::ContinueFlow { action: Some(_), .. }
        ));
        assert_eq!(resolve(&event, Some(&room), Some(&save), false), Route::Ignore);
        assert_eq!(resolve(&event, None, Some(&save), false), Route::Ignore);
    }

    #[test]
    fn text_continues_open_flow() {
        let event = fixtures::text(1, "Login page");
        let flow = task_flow();
        assert_eq!(
            resolve(&event, Some(&flow), None, false),
            Route::ContinueFlow {
                flow: flow.clone(),
                action: None
            }
        );
        assert_eq!(resolve(&event, None, None, false), Route::Ignore);
    }

    #[test]
    fn one_shot_controls_leave_flow_alone() {
        let event = fixtures::press(1, -100, "t");
        let vote = ActionRef::new(
            ActionKind::AddVote,
            ActionPayload::new().with(keys::SUM, 3),
        );
        let flow = task_flow();
        assert_eq!(
            resolve(&event, Some(&flow), Some(&vote), false),
            Route::OneShot(vote)
        );
    }

    #[test]
    fn stale_control_is_ignored() {
        let event = fixtures::press(1, 1, "gone");
        let flow = task_flow();
        assert_eq!(resolve(&event, Some(&flow), None, true), Route::Ignore);
    }

    #[test]
    fn inline_query_routes_to_search_only() {
        let event = fixtures::inline(1, "sprint");
        let flow = task_flow();
        assert_eq!(resolve(&event, Some(&flow), None, false), Route::Ignore);
        assert_eq!(search_query(&event), Some(("iq", "sprint")));
    }
}
