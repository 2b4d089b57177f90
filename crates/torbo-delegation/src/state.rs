//! Delegation tracking tables and their persisted document.
//!
//! The engine is the sole writer of `delegated_tasks.json`; the file is
//! rewritten (stage-and-rename) after every mutation so a restart resumes
//! watching in-flight delegations.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use torbo_protocol::{GatewayError, GatewayResult, NodeId, TaskId};
use tracing::warn;

/// One task this node has shipped to a peer and is awaiting a result for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundEntry {
    pub task_id: TaskId,
    pub title: String,
    pub target_node_id: NodeId,
    pub target_host: String,
    pub target_port: u16,
    pub required_access_level: u8,
    pub sent_at: DateTime<Utc>,
    pub timeout_seconds: u64,
    pub local_task_id: String,
}

/// One task this node accepted from a peer and is executing locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEntry {
    pub task_id: TaskId,
    pub title: String,
    pub origin_node_id: NodeId,
    pub origin_host: String,
    pub origin_port: u16,
    pub received_at: DateTime<Utc>,
    pub local_task_id: String,
}

/// The persisted shape of the tracking tables.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DelegationStateFile {
    pub outbound: Vec<OutboundEntry>,
    pub inbound: Vec<InboundEntry>,
}

/// In-memory tracking tables.
#[derive(Debug, Default)]
pub struct TrackingTables {
    pub outbound: HashMap<TaskId, OutboundEntry>,
    pub inbound: HashMap<TaskId, InboundEntry>,
}

impl TrackingTables {
    pub fn to_file(&self) -> DelegationStateFile {
        let mut outbound: Vec<OutboundEntry> = self.outbound.values().cloned().collect();
        outbound.sort_by(|a, b| a.sent_at.cmp(&b.sent_at));
        let mut inbound: Vec<InboundEntry> = self.inbound.values().cloned().collect();
        inbound.sort_by(|a, b| a.received_at.cmp(&b.received_at));
        DelegationStateFile { outbound, inbound }
    }

    pub fn from_file(file: DelegationStateFile) -> Self {
        Self {
            outbound: file
                .outbound
                .into_iter()
                .map(|entry| (entry.task_id.clone(), entry))
                .collect(),
            inbound: file
                .inbound
                .into_iter()
                .map(|entry| (entry.task_id.clone(), entry))
                .collect(),
        }
    }

    pub fn inbound_by_local_task(&self, local_task_id: &str) -> Option<InboundEntry> {
        self.inbound
            .values()
            .find(|entry| entry.local_task_id == local_task_id)
            .cloned()
    }
}

/// Load the tracking tables, tolerating a missing or unreadable file.
pub(crate) async fn load_tables(path: &Path) -> TrackingTables {
    match fs::read_to_string(path).await {
        Ok(text) => match serde_json::from_str::<DelegationStateFile>(&text) {
            Ok(file) => TrackingTables::from_file(file),
            Err(error) => {
                warn!(%error, path = %path.display(), "delegation state undecodable, starting empty");
                TrackingTables::default()
            }
        },
        Err(_) => TrackingTables::default(),
    }
}

/// Persist the tracking tables atomically.
pub(crate) async fn persist_tables(path: &Path, tables: &TrackingTables) -> GatewayResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| GatewayError::Storage(e.to_string()))?;
    }
    let text = serde_json::to_string_pretty(&tables.to_file())?;
    let staged = path.with_extension("json.tmp");
    fs::write(&staged, text)
        .await
        .map_err(|e| GatewayError::Storage(e.to_string()))?;
    fs::rename(&staged, path)
        .await
        .map_err(|e| GatewayError::Storage(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    fn outbound(task_id: &str) -> OutboundEntry {
        OutboundEntry {
            task_id: TaskId::from_string(task_id),
            title: "t".to_owned(),
            target_node_id: NodeId::from_string("node-b"),
            target_host: "127.0.0.1".to_owned(),
            target_port: 9000,
            required_access_level: 2,
            sent_at: Utc::now(),
            timeout_seconds: 300,
            local_task_id: "task-1".to_owned(),
        }
    }

    #[tokio::test]
    async fn tables_roundtrip_through_the_state_file() -> anyhow::Result<()> {
        let root = unique_test_root("torbo-delegation-state");
        let path = root.join("delegated_tasks.json");

        let mut tables = TrackingTables::default();
        let entry = outbound("t1");
        tables.outbound.insert(entry.task_id.clone(), entry);
        persist_tables(&path, &tables).await?;

        let text = fs::read_to_string(&path).await?;
        assert!(text.contains("\"outbound\""));
        assert!(text.contains("\"inbound\""));

        let loaded = load_tables(&path).await;
        assert_eq!(loaded.outbound.len(), 1);
        assert!(loaded.outbound.contains_key(&TaskId::from_string("t1")));

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn missing_or_corrupt_file_starts_empty() -> anyhow::Result<()> {
        let root = unique_test_root("torbo-delegation-state-corrupt");
        let path = root.join("delegated_tasks.json");
        assert!(load_tables(&path).await.outbound.is_empty());

        fs::create_dir_all(&root).await?;
        fs::write(&path, "not json").await?;
        assert!(load_tables(&path).await.inbound.is_empty());

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }
}
