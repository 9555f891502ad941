//! Pure line classification for the GRBL text protocol.
//!
//! No async, no I/O — a single function from trimmed line + config to an
//! optional [`ParseEvent`]. The parser task in `mod.rs` drives it; tests
//! drive it directly.

use super::config::Config;
use super::events::{ParseEvent, Point, Status};
use regex::Regex;
use std::sync::OnceLock;

fn report_shape() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r"^<.*>$").expect("invalid report shape regex"))
}

fn report_fields() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| {
        Regex::new(
            r"(\w+),MPos:([-+]?[0-9]*\.?[0-9]+),([-+]?[0-9]*\.?[0-9]+),([-+]?[0-9]*\.?[0-9]+),WPos:([-+]?[0-9]*\.?[0-9]+),([-+]?[0-9]*\.?[0-9]+),([-+]?[0-9]*\.?[0-9]+)",
        )
        .expect("invalid report fields regex")
    })
}

fn settings_shape() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r"^\$\d+\s*=").expect("invalid settings regex"))
}

fn build_info_shape() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r"^\[.+:[\d-]+\]$").expect("invalid build info shape regex"))
}

fn build_info_fields() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r"^\[(.+)\]$").expect("invalid build info fields regex"))
}

fn error_shape() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r"error:(.*)").expect("invalid error regex"))
}

fn alarm_shape() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r"ALARM:(.*)").expect("invalid alarm regex"))
}

/// Classifies one inbound line. First match wins: ready banner, ack,
/// report, settings, build info, error, alarm, unknown. Returns `None`
/// only for structured lines (report, build info) whose inner parse fails;
/// the firmware emits partial output during reset and those are dropped.
pub fn classify(line: &str, config: &Config) -> Option<ParseEvent> {
    let line = line.trim();
    if config.ready_responses.iter().any(|r| line.contains(r.as_str())) {
        return Some(ParseEvent::Ready {
            identifier: line.to_string(),
        });
    }
    if line.contains(&config.success_response) {
        return Some(ParseEvent::Ok);
    }
    if report_shape().is_match(line) {
        return parse_report(line);
    }
    if settings_shape().is_match(line) {
        return Some(ParseEvent::Settings {
            settings: line.to_string(),
        });
    }
    if build_info_shape().is_match(line) {
        return parse_build_info(line);
    }
    if error_shape().is_match(line) {
        return Some(ParseEvent::Error {
            message: line.to_string(),
        });
    }
    if alarm_shape().is_match(line) {
        return Some(ParseEvent::Alarm {
            message: line.to_string(),
        });
    }
    Some(ParseEvent::Unknown {
        data: line.to_string(),
    })
}

/// Parses `<status,MPos:x,y,z,WPos:x,y,z>`. All six coordinates must parse
/// as floats; any failure yields no event.
fn parse_report(line: &str) -> Option<ParseEvent> {
    let caps = report_fields().captures(line)?;
    let coord = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<f64>().ok());
    Some(ParseEvent::Report {
        status: Status::from_wire(caps.get(1)?.as_str()),
        machine_pos: Point {
            x: coord(2)?,
            y: coord(3)?,
            z: coord(4)?,
        },
        work_pos: Point {
            x: coord(5)?,
            y: coord(6)?,
            z: coord(7)?,
        },
    })
}

/// Parses `[f1:f2:...:fn]`. With at least four fields the product and
/// revision are fields 1 and 2; the serial number is always the last field.
fn parse_build_info(line: &str) -> Option<ParseEvent> {
    let caps = build_info_fields().captures(line)?;
    let fields: Vec<&str> = caps.get(1)?.as_str().split(':').collect();
    let (product, revision) = if fields.len() >= 4 {
        (fields[1].to_string(), fields[2].to_string())
    } else {
        (String::new(), String::new())
    };
    Some(ParseEvent::BuildInfo {
        serial_number: fields.last().copied().unwrap_or_default().to_string(),
        product,
        revision,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::grbl()
    }

    #[test]
    fn test_classify_ready_banner() {
        let event = classify("Grbl 1.1f ['$' for help]", &config()).unwrap();
        assert_eq!(
            event,
            ParseEvent::Ready {
                identifier: "Grbl 1.1f ['$' for help]".to_string()
            }
        );
    }

    #[test]
    fn test_classify_ready_wins_over_ack() {
        // A banner containing "ok" is still a banner: first match wins.
        let c = Config {
            ready_responses: vec!["Boot".to_string()],
            ..config()
        };
        let event = classify("Boot ok", &c).unwrap();
        assert!(matches!(event, ParseEvent::Ready { .. }));
    }

    #[test]
    fn test_classify_ack() {
        assert_eq!(classify("ok", &config()).unwrap(), ParseEvent::Ok);
    }

    #[test]
    fn test_classify_trims_surrounding_whitespace() {
        assert_eq!(classify("  ok \r", &config()).unwrap(), ParseEvent::Ok);
    }

    #[test]
    fn test_classify_report() {
        let event = classify("<Idle,MPos:1.5,-2.0,0.25,WPos:0.5,0,3>", &config()).unwrap();
        assert_eq!(
            event,
            ParseEvent::Report {
                status: Status::Idle,
                machine_pos: Point {
                    x: 1.5,
                    y: -2.0,
                    z: 0.25
                },
                work_pos: Point { x: 0.5, y: 0.0, z: 3.0 },
            }
        );
    }

    #[test]
    fn test_classify_report_lowercases_status() {
        let event = classify("<Hold,MPos:0,0,0,WPos:0,0,0>", &config()).unwrap();
        assert!(matches!(
            event,
            ParseEvent::Report {
                status: Status::Hold,
                ..
            }
        ));
    }

    #[test]
    fn test_classify_report_unknown_status_carried() {
        let event = classify("<Check,MPos:0,0,0,WPos:0,0,0>", &config()).unwrap();
        assert!(matches!(
            event,
            ParseEvent::Report { status: Status::Unknown(ref s), .. } if s == "check"
        ));
    }

    #[test]
    fn test_classify_malformed_report_dropped() {
        // Angle brackets but no parseable coordinate block.
        assert_eq!(classify("<Idle,MPos:garbage>", &config()), None);
        assert_eq!(classify("<>", &config()), None);
    }

    #[test]
    fn test_classify_settings() {
        let event = classify("$110=500.000", &config()).unwrap();
        assert_eq!(
            event,
            ParseEvent::Settings {
                settings: "$110=500.000".to_string()
            }
        );
    }

    #[test]
    fn test_classify_settings_allows_space_before_equals() {
        assert!(matches!(
            classify("$1 =25", &config()).unwrap(),
            ParseEvent::Settings { .. }
        ));
    }

    #[test]
    fn test_classify_build_info() {
        let event = classify("[0.9g.20140905:Carvey:1.0:12345-67]", &config()).unwrap();
        assert_eq!(
            event,
            ParseEvent::BuildInfo {
                serial_number: "12345-67".to_string(),
                product: "Carvey".to_string(),
                revision: "1.0".to_string(),
            }
        );
    }

    #[test]
    fn test_classify_build_info_short_form() {
        // Fewer than four fields: product/revision empty, serial from last.
        let event = classify("[VER:1234]", &config()).unwrap();
        assert_eq!(
            event,
            ParseEvent::BuildInfo {
                serial_number: "1234".to_string(),
                product: String::new(),
                revision: String::new(),
            }
        );
    }

    #[test]
    fn test_classify_error() {
        let event = classify("error:20", &config()).unwrap();
        assert_eq!(
            event,
            ParseEvent::Error {
                message: "error:20".to_string()
            }
        );
    }

    #[test]
    fn test_classify_alarm() {
        let event = classify("ALARM:1", &config()).unwrap();
        assert_eq!(
            event,
            ParseEvent::Alarm {
                message: "ALARM:1".to_string()
            }
        );
    }

    #[test]
    fn test_classify_unknown() {
        let event = classify("something else", &config()).unwrap();
        assert_eq!(
            event,
            ParseEvent::Unknown {
                data: "something else".to_string()
            }
        );
    }

    #[test]
    fn test_classify_empty_line_is_unknown() {
        assert_eq!(
            classify("", &config()).unwrap(),
            ParseEvent::Unknown {
                data: String::new()
            }
        );
    }

    #[test]
    fn test_report_round_trips_through_classifier() {
        let event = classify("<Run,MPos:10.5,20,0,WPos:10.5,20,0>", &config()).unwrap();
        let ParseEvent::Report {
            status,
            machine_pos,
            work_pos,
        } = event.clone()
        else {
            panic!("expected report");
        };
        let line = format!(
            "<{},MPos:{},{},{},WPos:{},{},{}>",
            status, machine_pos.x, machine_pos.y, machine_pos.z, work_pos.x, work_pos.y, work_pos.z
        );
        assert_eq!(classify(&line, &config()).unwrap(), event);
    }
}
