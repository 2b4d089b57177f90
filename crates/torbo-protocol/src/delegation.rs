//! Wire payloads for cross-node delegation.
//!
//! These structs are the exact JSON bodies exchanged over
//! `POST /delegation/submit` and `POST /delegation/result`, and the
//! capability document served from `/capabilities`.

use crate::ids::{NodeId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result status for a completed delegation.
pub const TASK_STATUS_COMPLETED: &str = "completed";
/// Result status for a failed delegation.
pub const TASK_STATUS_FAILED: &str = "failed";

/// A task shipped to a peer node for execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegatedTask {
    pub task_id: TaskId,
    pub origin_node_id: NodeId,
    pub origin_host: String,
    pub origin_port: u16,
    pub title: String,
    pub description: String,
    pub priority: String,
    #[serde(default)]
    pub required_skill_ids: Vec<String>,
    pub required_access_level: u8,
    pub timeout_seconds: u64,
    /// Base64 Ed25519 signature over `"<task_id>|<title>|<node_id>"`.
    pub signature: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// The signed outcome a peer delivers back to the origin node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegatedTaskResult {
    pub task_id: TaskId,
    pub executor_node_id: NodeId,
    /// `completed` or `failed`; anything else is treated as failed.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_seconds: f64,
    /// Base64 Ed25519 signature over `"<task_id>|<status>|<node_id>"`.
    pub signature: String,
    pub completed_at: DateTime<Utc>,
}

/// What a node advertises about itself to the mesh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCapabilities {
    pub node_id: NodeId,
    pub display_name: String,
    #[serde(default)]
    pub skill_ids: Vec<String>,
    #[serde(default)]
    pub agent_ids: Vec<String>,
    pub max_access_level: u8,
    pub accepts_delegation: bool,
    pub current_load: u32,
    pub max_concurrent_delegated: u32,
    pub updated_at: DateTime<Utc>,
}

/// Response body for `POST /delegation/submit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SubmitResponse {
    pub fn accepted(task_id: TaskId, local_task_id: impl Into<String>) -> Self {
        Self {
            status: "accepted".to_owned(),
            task_id: Some(task_id),
            local_task_id: Some(local_task_id.into()),
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            status: "rejected".to_owned(),
            task_id: None,
            local_task_id: None,
            reason: Some(reason.into()),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == "accepted"
    }
}

/// Response body for `POST /delegation/result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ResultResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_owned(),
            reason: None,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            status: "error".to_owned(),
            reason: Some(reason.into()),
        }
    }
}
