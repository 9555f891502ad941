//! Minimal binary: classifies a canned GRBL session (no serial port).
//! Confirms the classifier and event types are wired correctly.

use grbl_host::parser::{classify, Config};

fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::grbl();
    let session = [
        "Grbl 1.1f ['$' for help]",
        "[0.9g.20140905:Carvey:1.0:12345-67]",
        "<Idle,MPos:0.000,0.000,0.000,WPos:0.000,0.000,0.000>",
        "$110=500.000",
        "ok",
        "error:20",
        "something unexpected",
    ];

    for line in session {
        match classify(line, &config) {
            Some(event) => println!(
                "{} -> {}",
                line,
                serde_json::to_string(&event).expect("event serializes")
            ),
            None => println!("{} -> (dropped)", line),
        }
    }
}
