//! Bus events and the persisted audit record.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An in-process gateway event.
///
/// Names are dotted topics (`iam.access.denied`, `delegation.sent`); the
/// payload is a flat string map so every frontend can render it without a
/// schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    pub id: String,
    pub name: String,
    pub payload: IndexMap<String, String>,
    /// Seconds since the UNIX epoch.
    pub timestamp: f64,
    /// Subsystem that published the event.
    pub source: String,
}

/// A persisted row from the critical-event audit table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEventRecord {
    pub id: i64,
    pub topic: String,
    pub payload_json: String,
    pub source: String,
    pub severity: Severity,
    pub timestamp: f64,
}

/// Severity attached to persisted critical events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "info" => Some(Severity::Info),
            "warning" => Some(Severity::Warning),
            "error" => Some(Severity::Error),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }

    /// Severity derived from a topic name's keywords.
    pub fn for_topic(topic: &str) -> Severity {
        if topic.contains("security") || topic.contains("failure") {
            Severity::Critical
        } else if topic.contains("error") {
            Severity::Error
        } else if topic.contains("access") || topic.contains("forget") {
            Severity::Warning
        } else {
            Severity::Info
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_derivation_follows_keywords() {
        assert_eq!(Severity::for_topic("security.intrusion"), Severity::Critical);
        assert_eq!(Severity::for_topic("delegation.failure"), Severity::Critical);
        assert_eq!(Severity::for_topic("agent.error"), Severity::Error);
        assert_eq!(Severity::for_topic("iam.access.denied"), Severity::Warning);
        assert_eq!(Severity::for_topic("memory.forget"), Severity::Warning);
        assert_eq!(Severity::for_topic("commitment.made"), Severity::Info);
    }

    #[test]
    fn bus_event_payload_keeps_insertion_order() {
        let mut payload = IndexMap::new();
        payload.insert("agent_id".to_owned(), "torbo".to_owned());
        payload.insert("resource".to_owned(), "tool:run_command".to_owned());
        let event = BusEvent {
            id: "evt-1".to_owned(),
            name: "iam.access.denied".to_owned(),
            payload,
            timestamp: 1_700_000_000.0,
            source: "iam".to_owned(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let agent_pos = json.find("agent_id").unwrap();
        let resource_pos = json.find("resource").unwrap();
        assert!(agent_pos < resource_pos);
    }

    #[test]
    fn severity_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&Severity::Critical).unwrap(), "\"critical\"");
        assert_eq!(Severity::parse("warning"), Some(Severity::Warning));
        assert_eq!(Severity::parse("shrug"), None);
    }
}
