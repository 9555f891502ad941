//! Line parser for the GRBL text protocol.
//!
//! A stand-alone task consumes framed lines from an `mpsc` channel,
//! classifies each one (see [`classify`]), and emits [`ParseEvent`]s on a
//! bounded channel. The machine core treats that channel as just another
//! event source, so the parser stays independently testable.
//!
//! Config swaps arrive on a dedicated channel and take effect between
//! lines, never mid-classification.

mod classify;
mod config;
mod events;

pub use classify::classify;
pub use config::Config;
pub use events::{ParseEvent, Point, Status};

use tokio::sync::mpsc;
use tracing::debug;

/// Capacity of the outbound parse-event channel.
const EVENT_CAPACITY: usize = 100;

/// Handle for swapping the active config. Dropping it leaves the parser
/// running with its current config.
#[derive(Clone)]
pub struct ParserHandle {
    config_tx: mpsc::Sender<Config>,
}

impl ParserHandle {
    /// Replaces the parser's config; applies from the next line on.
    pub async fn set_config(&self, config: Config) {
        if self.config_tx.send(config).await.is_err() {
            debug!("parser: config update dropped, task gone");
        }
    }
}

/// Spawns the parser task over a stream of framed lines. Returns the config
/// handle and the parse-event receiver. The task ends when the line channel
/// closes (transport gone) or the event receiver is dropped.
pub fn spawn(
    lines: mpsc::Receiver<String>,
    config: Config,
) -> (ParserHandle, mpsc::Receiver<ParseEvent>) {
    let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
    let (config_tx, config_rx) = mpsc::channel(1);
    tokio::spawn(run(lines, config_rx, events_tx, config));
    (ParserHandle { config_tx }, events_rx)
}

async fn run(
    mut lines: mpsc::Receiver<String>,
    mut config_rx: mpsc::Receiver<Config>,
    events: mpsc::Sender<ParseEvent>,
    mut config: Config,
) {
    loop {
        tokio::select! {
            Some(next) = config_rx.recv() => {
                config = next;
            }
            line = lines.recv() => match line {
                Some(line) => {
                    if let Some(event) = classify(&line, &config) {
                        if events.send(event).await.is_err() {
                            debug!("parser: event receiver dropped, stopping");
                            return;
                        }
                    }
                }
                None => {
                    debug!("parser: line stream closed, stopping");
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{self, Duration};

    #[tokio::test]
    async fn test_parser_emits_events_in_order() {
        let (line_tx, line_rx) = mpsc::channel(16);
        let (_handle, mut events) = spawn(line_rx, Config::grbl());

        line_tx.send("ok".to_string()).await.unwrap();
        line_tx
            .send("<Idle,MPos:0,0,0,WPos:0,0,0>".to_string())
            .await
            .unwrap();
        line_tx.send("hello".to_string()).await.unwrap();

        assert_eq!(events.recv().await.unwrap(), ParseEvent::Ok);
        assert!(matches!(
            events.recv().await.unwrap(),
            ParseEvent::Report { .. }
        ));
        assert_eq!(
            events.recv().await.unwrap(),
            ParseEvent::Unknown {
                data: "hello".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_parser_drops_malformed_report() {
        let (line_tx, line_rx) = mpsc::channel(16);
        let (_handle, mut events) = spawn(line_rx, Config::grbl());

        line_tx.send("<broken>".to_string()).await.unwrap();
        line_tx.send("ok".to_string()).await.unwrap();

        // The malformed report produced nothing; the ack is next.
        assert_eq!(events.recv().await.unwrap(), ParseEvent::Ok);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parser_config_swap_applies_between_lines() {
        let (line_tx, line_rx) = mpsc::channel(16);
        let (handle, mut events) = spawn(line_rx, Config::grbl());

        let mut swapped = Config::grbl();
        swapped.success_response = "done".to_string();
        handle.set_config(swapped).await;
        // Let the parser pick up the config before the next line lands.
        time::sleep(Duration::from_millis(10)).await;

        line_tx.send("done".to_string()).await.unwrap();
        line_tx.send("ok".to_string()).await.unwrap();

        assert_eq!(events.recv().await.unwrap(), ParseEvent::Ok);
        assert_eq!(
            events.recv().await.unwrap(),
            ParseEvent::Unknown {
                data: "ok".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_parser_stops_when_line_stream_closes() {
        let (line_tx, line_rx) = mpsc::channel(16);
        let (_handle, mut events) = spawn(line_rx, Config::grbl());

        line_tx.send("ok".to_string()).await.unwrap();
        drop(line_tx);

        assert_eq!(events.recv().await.unwrap(), ParseEvent::Ok);
        assert!(events.recv().await.is_none());
    }
}
