//! Push-channel wire contract: `{type, data}` JSON frames plus bare
//! heartbeat sentinel text frames, and the close-code reconnect policy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fleet::Severity;

/// Normal closure; sent by the client on explicit disconnect.
pub const CLOSE_NORMAL: u16 = 1000;
/// Server rejected the connection: token missing.
pub const CLOSE_TOKEN_REQUIRED: u16 = 4001;
/// Server rejected the connection: token invalid.
pub const CLOSE_TOKEN_INVALID: u16 = 4002;

/// Every close code outside the normal/auth-rejected set drives a
/// reconnect attempt.
pub fn should_reconnect(code: u16) -> bool {
    !matches!(code, CLOSE_NORMAL | CLOSE_TOKEN_REQUIRED | CLOSE_TOKEN_INVALID)
}

/// Heartbeat sentinels are consumed by the channel, never forwarded.
pub fn is_heartbeat(frame: &str) -> bool {
    frame == "ping" || frame == "pong"
}

/// Condensed anomaly rows carried on `stats_update` frames. These are a
/// hint that new anomalies exist, not a delta to apply; the roster is
/// re-fetched through the poll path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnomalySummary {
    pub anomaly_id: String,
    pub vehicle_id: String,
    #[serde(default)]
    pub anomaly_type: String,
    pub severity: Severity,
    #[serde(default)]
    pub detected_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StatsUpdate {
    #[serde(default)]
    pub events_per_5s: u64,
    #[serde(default)]
    pub avg_speed: f64,
    #[serde(default)]
    pub max_speed: f64,
    #[serde(default)]
    pub avg_temp: f64,
    #[serde(default)]
    pub max_temp: f64,
    #[serde(default)]
    pub active_vehicles: u64,
    #[serde(default)]
    pub recent_anomalies: Vec<AnomalySummary>,
}

/// Typed server-pushed events. Closed over the known tags, with an
/// explicit unknown fallback that the channel logs and drops.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    StatsUpdate(StatsUpdate),
    Error { message: String },
    Unknown { event_type: String },
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("invalid frame: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    message: Option<String>,
}

/// What the channel should do with an inbound text frame.
#[derive(Debug)]
pub enum FrameOutcome {
    Heartbeat,
    Event(PushEvent),
    Malformed(FrameError),
}

pub fn decode_frame(frame: &str) -> FrameOutcome {
    if is_heartbeat(frame) {
        return FrameOutcome::Heartbeat;
    }
    let raw: RawFrame = match serde_json::from_str(frame) {
        Ok(raw) => raw,
        Err(err) => {
            if !frame.trim_start().starts_with('{') {
                return FrameOutcome::Malformed(FrameError::NotAnObject);
            }
            return FrameOutcome::Malformed(err.into());
        }
    };
    let event = match raw.event_type.as_str() {
        "stats_update" => match serde_json::from_value(raw.data) {
            Ok(stats) => PushEvent::StatsUpdate(stats),
            Err(err) => return FrameOutcome::Malformed(err.into()),
        },
        "error" => PushEvent::Error {
            message: raw.message.unwrap_or_else(|| "unspecified".to_string()),
        },
        other => PushEvent::Unknown {
            event_type: other.to_string(),
        },
    };
    FrameOutcome::Event(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_sentinels_are_consumed() {
        assert!(matches!(decode_frame("ping"), FrameOutcome::Heartbeat));
        assert!(matches!(decode_frame("pong"), FrameOutcome::Heartbeat));
    }

    #[test]
    fn decodes_stats_update() {
        let frame = serde_json::json!({
            "type": "stats_update",
            "data": {
                "events_per_5s": 42,
                "avg_speed": 48.2,
                "max_speed": 81.0,
                "avg_temp": 201.4,
                "max_temp": 228.0,
                "active_vehicles": 17,
                "recent_anomalies": [{
                    "anomaly_id": "ANOM-1",
                    "vehicle_id": "VEH-001",
                    "anomaly_type": "LOW_FUEL",
                    "severity": "warning",
                    "detected_at": "2026-08-23T09:00:00"
                }]
            }
        })
        .to_string();

        match decode_frame(&frame) {
            FrameOutcome::Event(PushEvent::StatsUpdate(stats)) => {
                assert_eq!(stats.active_vehicles, 17);
                assert_eq!(stats.recent_anomalies.len(), 1);
                assert_eq!(stats.recent_anomalies[0].severity, Severity::Warning);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn stats_update_tolerates_missing_fields() {
        let frame = r#"{"type":"stats_update","data":{"active_vehicles":3}}"#;
        match decode_frame(frame) {
            FrameOutcome::Event(PushEvent::StatsUpdate(stats)) => {
                assert_eq!(stats.active_vehicles, 3);
                assert!(stats.recent_anomalies.is_empty());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn error_frames_carry_the_message() {
        let frame = r#"{"type":"error","message":"query timed out"}"#;
        match decode_frame(frame) {
            FrameOutcome::Event(PushEvent::Error { message }) => {
                assert_eq!(message, "query timed out");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn unknown_tags_fall_back_instead_of_failing() {
        let frame = r#"{"type":"route_update","data":{"route_id":"R1"}}"#;
        match decode_frame(frame) {
            FrameOutcome::Event(PushEvent::Unknown { event_type }) => {
                assert_eq!(event_type, "route_update");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn malformed_frames_are_reported_not_panicked() {
        assert!(matches!(
            decode_frame("not json at all"),
            FrameOutcome::Malformed(_)
        ));
        assert!(matches!(
            decode_frame(r#"{"data":{}}"#),
            FrameOutcome::Malformed(_)
        ));
    }

    #[test]
    fn close_code_policy() {
        assert!(!should_reconnect(CLOSE_NORMAL));
        assert!(!should_reconnect(CLOSE_TOKEN_REQUIRED));
        assert!(!should_reconnect(CLOSE_TOKEN_INVALID));
        assert!(should_reconnect(1006));
        assert!(should_reconnect(1011));
    }
}
