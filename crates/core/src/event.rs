//! Append-only process lifecycle events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to a process. Stored as the single-letter codes A..G so
/// the event table stays compact; the JSON form is the snake_case name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Seen,
    CaughtSignal,
    CpuThresholdReached,
    MemoryThresholdReached,
    SuspectedHangCaught,
    Exited,
    NotFound,
}

impl EventKind {
    pub fn code(&self) -> &'static str {
        match self {
            EventKind::Seen => "A",
            EventKind::CaughtSignal => "B",
            EventKind::CpuThresholdReached => "C",
            EventKind::MemoryThresholdReached => "D",
            EventKind::SuspectedHangCaught => "E",
            EventKind::Exited => "F",
            EventKind::NotFound => "G",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "A" => Some(EventKind::Seen),
            "B" => Some(EventKind::CaughtSignal),
            "C" => Some(EventKind::CpuThresholdReached),
            "D" => Some(EventKind::MemoryThresholdReached),
            "E" => Some(EventKind::SuspectedHangCaught),
            "F" => Some(EventKind::Exited),
            "G" => Some(EventKind::NotFound),
            _ => None,
        }
    }
}

/// Kind-dependent details. All optional: a `Seen` event carries none, a
/// `CaughtSignal` carries the signal number, threshold events carry the
/// sampled usage, an `Exited` may carry exit code and core dump location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caught_signal: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_usage: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_dump_location: Option<String>,
}

/// One immutable log entry. `seq` is the storage-assigned monotonic
/// sequence; it breaks ordering ties when two events land on the same
/// `created_at` timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEvent {
    pub id: String,
    pub process_id: String,
    pub kind: EventKind,
    pub created_at: DateTime<Utc>,
    pub seq: i64,
    #[serde(flatten)]
    pub payload: EventPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_codes_round_trip() {
        let kinds = [
            EventKind::Seen,
            EventKind::CaughtSignal,
            EventKind::CpuThresholdReached,
            EventKind::MemoryThresholdReached,
            EventKind::SuspectedHangCaught,
            EventKind::Exited,
            EventKind::NotFound,
        ];
        for kind in kinds {
            assert_eq!(EventKind::from_code(kind.code()), Some(kind));
        }
        assert!(EventKind::from_code("Q").is_none());
    }

    #[test]
    fn payload_omits_absent_fields_in_json() {
        let event = ProcessEvent {
            id: "evt-1".into(),
            process_id: "proc-1".into(),
            kind: EventKind::CaughtSignal,
            created_at: Utc::now(),
            seq: 7,
            payload: EventPayload {
                caught_signal: Some(11),
                ..Default::default()
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "caught_signal");
        assert_eq!(json["caught_signal"], 11);
        assert!(json.get("cpu_usage").is_none());
        assert!(json.get("exit_code").is_none());
    }
}
