//! Job-execution core for GRBL-family controllers.
//!
//! **Public API:** [`Machine`] — spawn against a transport writer and a
//! line stream, then stream jobs, pause/resume/stop, enqueue console
//! commands, and read state; domain [`Event`]s arrive on the bounded
//! receiver returned from [`Machine::spawn`].
//!
//! Supporting types (events, instructions, run-state transitions) are
//! re-exported.

mod core;
mod events;
mod instructions;
mod transitions;

pub use self::core::{
    Machine, MachineError, Transport, HEARTBEAT_INTERVAL, MAX_BUFFER_BYTES, STOP_STEP_DELAY,
};
pub use self::events::{Event, MachineState, MachineType, Position};
pub use self::instructions::Instruction;
pub use self::transitions::{action_transition, status_transition, Action, RunState};
