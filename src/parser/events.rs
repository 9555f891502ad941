//! Protocol-level types: coordinates, observed controller status, and the
//! tagged event emitted per classified line.

use serde::{Deserialize, Serialize};
use std::fmt;

/// XYZ coordinate triple, millimeters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Controller state as reported in a status line. Tokens are lower-cased on
/// the way in; anything outside the four GRBL states is carried verbatim in
/// `Unknown` so a report with e.g. `Check` still flows through.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Idle,
    Run,
    Hold,
    Door,
    Unknown(String),
}

impl Status {
    /// Normalizes a wire token (`Idle`, `RUN`, ...) into a status.
    pub fn from_wire(token: &str) -> Self {
        match token.to_ascii_lowercase().as_str() {
            "idle" => Status::Idle,
            "run" => Status::Run,
            "hold" => Status::Hold,
            "door" => Status::Door,
            other => Status::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Idle => write!(f, "idle"),
            Status::Run => write!(f, "run"),
            Status::Hold => write!(f, "hold"),
            Status::Door => write!(f, "door"),
            Status::Unknown(s) => write!(f, "{}", s),
        }
    }
}

/// One event per classified line. Structured lines that fail their inner
/// parse (report, build info) produce no event at all.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ParseEvent {
    /// The configured success substring: one line consumed by the firmware.
    Ok,
    /// A boot banner matched one of the configured ready substrings.
    Ready { identifier: String },
    /// `<status,MPos:...,WPos:...>` realtime report.
    Report {
        status: Status,
        machine_pos: Point,
        work_pos: Point,
    },
    /// `$n=value` settings line, kept raw.
    Settings { settings: String },
    /// `[...:serial]` build info block.
    BuildInfo {
        serial_number: String,
        product: String,
        revision: String,
    },
    /// Line containing `error:`.
    Error { message: String },
    /// Line containing `ALARM:`.
    Alarm { message: String },
    /// Anything else; informational only.
    Unknown { data: String },
}
