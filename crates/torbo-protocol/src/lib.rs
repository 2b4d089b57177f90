//! # torbo-protocol — Torbo Base gateway contract
//!
//! Shared types that every Torbo Base component depends on: the agent
//! document, access levels and actions, delegation wire payloads, bus
//! events, and the gateway configuration.
//!
//! Intentionally dependency-light (no tokio, no HTTP, no SQLite) so it can
//! be used as a pure contract crate by frontends and bridges.
//!
//! ## Module Overview
//!
//! - [`ids`] — Typed ID wrappers (AgentId, TaskId, NodeId)
//! - [`access`] — AccessLevel ladder, Action set, default permission grants
//! - [`agent`] — AgentConfig, the persisted per-agent persona document
//! - [`event`] — BusEvent, audit records, severity derivation
//! - [`delegation`] — DelegatedTask, DelegatedTaskResult, NodeCapabilities
//! - [`config`] — GatewayConfig, the recognized tuning knobs
//! - [`error`] — GatewayError taxonomy

pub mod access;
pub mod agent;
pub mod config;
pub mod delegation;
pub mod error;
pub mod event;
pub mod ids;

// Re-export the most commonly used types at the crate root.
pub use access::{AccessLevel, Action, PermissionGrant, actions_from_csv, actions_to_csv};
pub use agent::AgentConfig;
pub use config::GatewayConfig;
pub use delegation::{
    DelegatedTask, DelegatedTaskResult, NodeCapabilities, ResultResponse, SubmitResponse,
    TASK_STATUS_COMPLETED, TASK_STATUS_FAILED,
};
pub use error::{GatewayError, GatewayResult};
pub use event::{AuditEventRecord, BusEvent, Severity};
pub use ids::{AgentId, NodeId, TaskId};
