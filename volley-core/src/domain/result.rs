//! Execution result types
//!
//! Every operation an execution engine performs yields a lazy sequence of
//! [`ExecEvent`]s, one per host outcome (or per announcement).

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Execution state of a single host outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecStatus {
    /// Informational, no action on any host
    Announce,
    Ok,
    Skipped,
    Failed,
    Unreachable,
    Changed,
    /// Synthetic status for a host the engine could not match
    NoMatch,
}

impl ExecStatus {
    /// Returns true for `OK`, `SKIPPED`, `CHANGED` and `ANNOUNCE`
    pub fn is_success(self) -> bool {
        matches!(
            self,
            ExecStatus::Ok | ExecStatus::Skipped | ExecStatus::Changed | ExecStatus::Announce
        )
    }

    /// Returns true for `FAILED`, `UNREACHABLE` and `NO_MATCH`
    pub fn is_failure(self) -> bool {
        !self.is_success()
    }

    pub fn is_announce(self) -> bool {
        self == ExecStatus::Announce
    }

    /// Wire name of the status, as it appears in stored records
    pub fn name(self) -> &'static str {
        match self {
            ExecStatus::Announce => "ANNOUNCE",
            ExecStatus::Ok => "OK",
            ExecStatus::Skipped => "SKIPPED",
            ExecStatus::Failed => "FAILED",
            ExecStatus::Unreachable => "UNREACHABLE",
            ExecStatus::Changed => "CHANGED",
            ExecStatus::NoMatch => "NO_MATCH",
        }
    }
}

impl std::fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One outcome for one host for one operation step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub status: ExecStatus,
    /// Sub-step name (e.g. a deploy step), absent for single-shot operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Operation-specific return data
    #[serde(default)]
    pub payload: JsonValue,
}

impl ResultRecord {
    pub fn new(status: ExecStatus, payload: JsonValue) -> Self {
        Self {
            status,
            name: None,
            payload,
        }
    }

    pub fn step(status: ExecStatus, name: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            status,
            name: Some(name.into()),
            payload,
        }
    }
}

/// Where an execution event originated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Outcome produced on a remote host
    Host(String),
    /// Announcement not tied to any host (e.g. a step boundary)
    Announce,
}

/// A single event yielded by an execution engine
#[derive(Debug, Clone, PartialEq)]
pub struct ExecEvent {
    pub origin: Origin,
    pub record: ResultRecord,
}

impl ExecEvent {
    pub fn host(host: impl Into<String>, record: ResultRecord) -> Self {
        Self {
            origin: Origin::Host(host.into()),
            record,
        }
    }

    pub fn announce(name: impl Into<String>) -> Self {
        Self {
            origin: Origin::Announce,
            record: ResultRecord::step(ExecStatus::Announce, name, JsonValue::Null),
        }
    }

    /// Host this event belongs to, `None` for announcements
    pub fn target(&self) -> Option<&str> {
        match &self.origin {
            Origin::Host(host) => Some(host),
            Origin::Announce => None,
        }
    }

    /// Renders the event as `{host: record}`, the shape returned by
    /// synchronous operations
    pub fn to_json(&self) -> JsonValue {
        let host = self.target().unwrap_or("__ANNOUNCE__");
        let mut map = serde_json::Map::new();
        map.insert(
            host.to_string(),
            serde_json::to_value(&self.record).unwrap_or(JsonValue::Null),
        );
        JsonValue::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        for status in [
            ExecStatus::Ok,
            ExecStatus::Skipped,
            ExecStatus::Changed,
            ExecStatus::Announce,
        ] {
            assert!(status.is_success(), "{} should be a success", status);
        }
        for status in [
            ExecStatus::Failed,
            ExecStatus::Unreachable,
            ExecStatus::NoMatch,
        ] {
            assert!(status.is_failure(), "{} should be a failure", status);
        }
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_value(ExecStatus::NoMatch).unwrap(),
            serde_json::json!("NO_MATCH")
        );
        assert_eq!(
            serde_json::from_str::<ExecStatus>("\"UNREACHABLE\"").unwrap(),
            ExecStatus::Unreachable
        );
    }

    #[test]
    fn test_record_without_name_omits_field() {
        let record = ResultRecord::new(ExecStatus::Ok, serde_json::json!({"rc": 0}));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json, serde_json::json!({"status": "OK", "payload": {"rc": 0}}));
    }

    #[test]
    fn test_event_to_json() {
        let event = ExecEvent::host("h1", ResultRecord::new(ExecStatus::Ok, JsonValue::Null));
        assert_eq!(event.to_json()["h1"]["status"], "OK");
        assert_eq!(ExecEvent::announce("step").target(), None);
    }
}
