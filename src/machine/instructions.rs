//! Symbolic instruction set.
//!
//! Instructions name entries in the config's gcode map; the map supplies
//! the actual bytes per controller profile. Pause, resume and status are
//! realtime: their bytes go straight to the port with no terminator and no
//! buffer accounting. Flush additionally clears all queues.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Instruction {
    Flush,
    Pause,
    Resume,
    Settings,
    LiftToSafeHeight,
    SpindleOff,
    Park,
    Status,
    ReadSerialNumber,
}

impl Instruction {
    /// Config map key for this instruction.
    pub fn as_str(&self) -> &'static str {
        match self {
            Instruction::Flush => "flush",
            Instruction::Pause => "pause",
            Instruction::Resume => "resume",
            Instruction::Settings => "settings",
            Instruction::LiftToSafeHeight => "liftToSafeHeight",
            Instruction::SpindleOff => "spindleOff",
            Instruction::Park => "park",
            Instruction::Status => "status",
            Instruction::ReadSerialNumber => "readSerialNumber",
        }
    }

    /// Realtime instructions bypass the queue entirely.
    pub fn is_realtime(&self) -> bool {
        matches!(
            self,
            Instruction::Pause | Instruction::Resume | Instruction::Status
        )
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
