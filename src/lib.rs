//! Host-side controller core for GRBL-family CNC firmware.
//!
//! Two components: [`parser`] classifies the firmware's line protocol into
//! typed events; [`machine`] streams G-code under the controller's
//! 127-byte receive-buffer bound, reconciles pause/resume with observed
//! status, and publishes domain events. Serial-port handling and line
//! framing belong to an upstream adapter: the machine consumes a plain
//! `AsyncWrite` writer half and an `mpsc` stream of framed lines.

pub mod machine;
pub mod parser;
