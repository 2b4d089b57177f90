//! IAM data model.

use serde::{Deserialize, Serialize};
use std::fmt;
use torbo_protocol::Action;

/// An identity row. IAM may hold identities the registry has never seen
/// (peer agents, migrated leftovers); an empty owner means local.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub id: String,
    pub owner: String,
    pub purpose: String,
    /// Seconds since the UNIX epoch.
    pub created_at: f64,
    /// Current danger estimate in [0.0, 1.0].
    pub risk_score: f64,
}

/// One granted permission row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub agent_id: String,
    pub resource: String,
    pub actions: Vec<Action>,
    pub granted_at: f64,
    pub granted_by: String,
}

impl Permission {
    pub fn allows(&self, action: Action) -> bool {
        self.actions.contains(&action) || self.actions.contains(&Action::Any)
    }
}

/// One row of the append-only access log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub agent_id: String,
    pub resource: String,
    pub action: String,
    pub timestamp: f64,
    pub allowed: bool,
    pub reason: Option<String>,
}

/// A suspicious behavior pattern derived from the access log. Never
/// persisted; recomputed on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub agent_id: String,
    #[serde(rename = "type")]
    pub kind: AnomalyType,
    pub description: String,
    pub severity: AnomalySeverity,
    pub detected_at: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    RapidAccess,
    DeniedSpike,
    UnusualResource,
    PrivilegeEscalation,
}

impl AnomalyType {
    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyType::RapidAccess => "rapid_access",
            AnomalyType::DeniedSpike => "denied_spike",
            AnomalyType::UnusualResource => "unusual_resource",
            AnomalyType::PrivilegeEscalation => "privilege_escalation",
        }
    }
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AnomalySeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            AnomalySeverity::Low => "low",
            AnomalySeverity::Medium => "medium",
            AnomalySeverity::High => "high",
            AnomalySeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for AnomalySeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
