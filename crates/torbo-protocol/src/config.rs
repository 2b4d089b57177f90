//! Gateway configuration.
//!
//! Exactly the recognized tuning knobs; no other inputs are consulted.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Root directory for every persisted store.
    pub data_dir: PathBuf,
    pub iam_db_name: String,
    pub audit_db_name: String,
    pub ring_buffer_capacity: usize,
    pub delegation_timeout_default_seconds: u64,
    pub delegation_capability_ttl_seconds: u64,
    pub delegation_max_concurrent_inbound: u32,
    pub delegation_max_accepted_access_level: u8,
    pub peer_request_timeout_seconds: u64,
    pub watchdog_interval_seconds: u64,
    pub log_prune_retention_days: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".torbo"),
            iam_db_name: "iam.sqlite".to_owned(),
            audit_db_name: "audit_events.sqlite".to_owned(),
            ring_buffer_capacity: 1000,
            delegation_timeout_default_seconds: 300,
            delegation_capability_ttl_seconds: 300,
            delegation_max_concurrent_inbound: 2,
            delegation_max_accepted_access_level: 2,
            peer_request_timeout_seconds: 10,
            watchdog_interval_seconds: 30,
            log_prune_retention_days: 30,
        }
    }
}

impl GatewayConfig {
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn iam_db_path(&self) -> PathBuf {
        self.data_dir.join(&self.iam_db_name)
    }

    pub fn audit_db_path(&self) -> PathBuf {
        self.data_dir.join(&self.audit_db_name)
    }

    pub fn agents_dir(&self) -> PathBuf {
        self.data_dir.join("agents")
    }

    pub fn delegation_state_path(&self) -> PathBuf {
        self.data_dir.join("delegated_tasks.json")
    }
}
