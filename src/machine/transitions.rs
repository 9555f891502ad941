//! Run-state transition tables.
//!
//! Two pure total functions reconcile the host-side job lifecycle with its
//! two inputs: observed controller status and user pause/resume actions.
//! `None` means "no change" so callers can tell a deliberate stay apart
//! from a transition.

use crate::parser::Status;
use serde::{Deserialize, Serialize};

/// Host-side job lifecycle. Distinct from the firmware's observed
/// [`Status`]: the firmware only knows run/hold/door, while the host also
/// tracks the in-between pausing/resuming phases its own commands create.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Running,
    Pausing,
    PausedDoorOpen,
    Paused,
    Resuming,
}

/// User-initiated action applied through [`action_transition`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Pause,
    Resume,
}

/// Next run state after observing a firmware status, or `None` to stay.
pub fn status_transition(state: RunState, status: &Status) -> Option<RunState> {
    use RunState::*;
    match (state, status) {
        (Pausing, Status::Hold) => Some(Paused),
        (Pausing, Status::Door) => Some(PausedDoorOpen),
        (Paused, Status::Run) => Some(Running),
        (Paused, Status::Door) => Some(PausedDoorOpen),
        (PausedDoorOpen, Status::Hold) => Some(Paused),
        (PausedDoorOpen, Status::Run) => Some(Running),
        (Resuming, Status::Run) => Some(Running),
        (Resuming, Status::Door) => Some(PausedDoorOpen),
        (Running, Status::Hold) => Some(Paused),
        (Running, Status::Door) => Some(PausedDoorOpen),
        _ => None,
    }
}

/// Next run state after a user action, or `None` to stay.
pub fn action_transition(state: RunState, action: Action) -> Option<RunState> {
    use RunState::*;
    match (state, action) {
        (Paused, Action::Resume) => Some(Resuming),
        (Running, Action::Pause) => Some(Pausing),
        (Pausing, Action::Resume) => Some(Resuming),
        (Resuming, Action::Pause) => Some(Pausing),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RunState::*;

    #[test]
    fn test_status_transition_table() {
        let rows = [
            (Pausing, Status::Hold, Paused),
            (Pausing, Status::Door, PausedDoorOpen),
            (Paused, Status::Run, Running),
            (Paused, Status::Door, PausedDoorOpen),
            (PausedDoorOpen, Status::Hold, Paused),
            (PausedDoorOpen, Status::Run, Running),
            (Resuming, Status::Run, Running),
            (Resuming, Status::Door, PausedDoorOpen),
            (Running, Status::Hold, Paused),
            (Running, Status::Door, PausedDoorOpen),
        ];
        for (state, status, next) in rows {
            assert_eq!(status_transition(state, &status), Some(next));
        }
    }

    #[test]
    fn test_status_transition_unlisted_rows_stay() {
        assert_eq!(status_transition(Running, &Status::Run), None);
        assert_eq!(status_transition(Running, &Status::Idle), None);
        assert_eq!(status_transition(Paused, &Status::Hold), None);
        assert_eq!(status_transition(Pausing, &Status::Run), None);
        assert_eq!(
            status_transition(Running, &Status::Unknown("check".to_string())),
            None
        );
    }

    #[test]
    fn test_action_transition_table() {
        assert_eq!(action_transition(Paused, Action::Resume), Some(Resuming));
        assert_eq!(action_transition(Running, Action::Pause), Some(Pausing));
        assert_eq!(action_transition(Pausing, Action::Resume), Some(Resuming));
        assert_eq!(action_transition(Resuming, Action::Pause), Some(Pausing));
    }

    #[test]
    fn test_action_transition_unlisted_rows_stay() {
        assert_eq!(action_transition(Running, Action::Resume), None);
        assert_eq!(action_transition(Paused, Action::Pause), None);
        assert_eq!(action_transition(PausedDoorOpen, Action::Pause), None);
        assert_eq!(action_transition(PausedDoorOpen, Action::Resume), None);
    }

    #[test]
    fn test_pause_resume_cycle_returns_to_running() {
        // User pauses, firmware holds, user resumes, firmware runs.
        let mut state = Running;
        state = action_transition(state, Action::Pause).unwrap();
        state = status_transition(state, &Status::Hold).unwrap();
        state = action_transition(state, Action::Resume).unwrap();
        state = status_transition(state, &Status::Run).unwrap();
        assert_eq!(state, Running);
    }

    #[test]
    fn test_run_state_serializes_screaming_snake_case() {
        assert_eq!(
            serde_json::to_string(&PausedDoorOpen).unwrap(),
            "\"PAUSED_DOOR_OPEN\""
        );
        assert_eq!(serde_json::to_string(&Running).unwrap(), "\"RUNNING\"");
    }
}
