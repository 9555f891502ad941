//! Controller profile: which bytes each symbolic instruction maps to, which
//! banner lines mean "booted", and which substring acknowledges a line.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Profile for one controller family. Immutable once handed to the parser or
/// machine; swap the whole value to change it.
///
/// The `gcode` map is keyed by instruction name (see
/// [`Instruction::as_str`](crate::machine::Instruction::as_str)). Realtime
/// instructions (pause/resume/status) map to the raw bytes written to the
/// port with no terminator; all others map to a queued command line.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Profile name, e.g. "grbl".
    pub name: String,
    /// Serial baud rate. Carried for the transport adapter; unused here.
    pub baud: u32,
    /// Line separator the transport adapter frames inbound data with.
    pub separator: String,
    /// Instruction name -> literal bytes/line to emit.
    pub gcode: HashMap<String, String>,
    /// Substrings identifying controller boot banners.
    pub ready_responses: Vec<String>,
    /// Substring acknowledging one consumed line (GRBL: "ok").
    pub success_response: String,
}

impl Config {
    /// Stock GRBL profile: `!`/`~`/`?` realtime bytes, Ctrl-X flush, `$$`
    /// settings dump, `$I` build info, and conservative end-of-job moves.
    pub fn grbl() -> Self {
        Config {
            name: "grbl".to_string(),
            baud: 115_200,
            separator: "\n".to_string(),
            gcode: HashMap::from([
                ("flush".to_string(), "\u{18}".to_string()),
                ("pause".to_string(), "!".to_string()),
                ("resume".to_string(), "~".to_string()),
                ("status".to_string(), "?".to_string()),
                ("settings".to_string(), "$$".to_string()),
                ("liftToSafeHeight".to_string(), "G90 G0 Z5".to_string()),
                ("spindleOff".to_string(), "M5".to_string()),
                ("park".to_string(), "G90 G0 X0 Y0".to_string()),
                ("readSerialNumber".to_string(), "$I".to_string()),
            ]),
            ready_responses: vec!["Grbl".to_string()],
            success_response: "ok".to_string(),
        }
    }
}
