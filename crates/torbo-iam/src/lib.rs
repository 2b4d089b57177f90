//! # torbo-iam — the IAM engine
//!
//! The authoritative access-control store: agent identities, fine-grained
//! permissions (resource glob × action set × grantor), the append-only
//! access log, and per-agent risk scores, all in one SQLite database opened
//! in WAL mode.
//!
//! The hot path is [`IamEngine::check_and_log`]; permissions and identities
//! are cached per agent and every permission write drops both cache entries
//! before returning, so a `grant` is visible to the very next `check`.
//! Anomaly detection runs on demand over the access log.

pub mod analytics;
pub mod engine;
pub mod matching;
pub mod types;

pub use engine::IamEngine;
pub use matching::resource_matches;
pub use types::{
    AccessLogEntry, AgentIdentity, Anomaly, AnomalySeverity, AnomalyType, Permission,
};
