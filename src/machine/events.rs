//! Outbound domain events and the machine-state snapshot.
//!
//! One tagged union; subscribers pattern-match. The set is open for
//! forward compatibility, hence `#[non_exhaustive]`.

use crate::machine::transitions::RunState;
use crate::parser::{Point, Status};
use serde::Serialize;
use std::time::SystemTime;

/// Machine and work coordinates from one status report. Replaced wholesale
/// on every report, never mutated in place.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Position {
    pub machine: Point,
    pub work: Point,
}

/// Product/revision pair from a build-info block.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MachineType {
    pub product: String,
    pub revision: String,
}

/// Deep snapshot of the core's job state. Immutable once returned.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MachineState {
    pub completed_commands: usize,
    /// Console + g-code lines not yet handed to the firmware.
    pub pending_commands: usize,
    pub current_position: Position,
    /// Most recently acknowledged line.
    pub last_instruction: String,
    /// Lines the firmware currently holds, oldest first.
    pub active_buffer: Vec<String>,
    pub running: bool,
    pub paused: bool,
    pub stopping: bool,
}

/// Everything the core tells the outside world.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
#[non_exhaustive]
pub enum Event {
    /// Firmware alarm line, verbatim.
    Alarm { message: String },
    /// Firmware error line, verbatim.
    Error { message: String },
    MachineType { machine_type: MachineType },
    SerialNumber { serial_number: String },
    /// Boot banner seen; heartbeat started.
    Connected,
    Status { status: Status },
    Position { position: Position },
    /// Connected and idle: no job, not stopping.
    Ready,
    Settings { settings: String },
    /// Transport gone unexpectedly; carries the pre-reset snapshot.
    PortLost { state: MachineState, note: String },
    Progress { percent_complete: f64 },
    RunState { run_state: RunState },
    /// Wall-clock range of the job segment that just ended.
    RunTime { start: SystemTime, end: SystemTime },
    Paused { percent_complete: f64 },
    Resumed { percent_complete: f64 },
    Stopping,
    /// This host is busy; a coordinator asked for it at `timestamp`.
    Release { timestamp: SystemTime },
}
