//! Collaborator seams: the local task queue, the node directory, the skill
//! catalogue, and a static key resolver for tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use torbo_crypto::{CryptoResult, PeerKeyResolver};

/// Address of a peer node in the directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The node directory this gateway consults for peers.
#[async_trait]
pub trait PeerDirectory: Send + Sync {
    async fn peers(&self) -> Vec<PeerAddr>;
}

/// Fixed peer list.
#[derive(Debug, Default)]
pub struct StaticPeerDirectory {
    peers: Mutex<Vec<PeerAddr>>,
}

impl StaticPeerDirectory {
    pub fn new(peers: Vec<PeerAddr>) -> Self {
        Self {
            peers: Mutex::new(peers),
        }
    }

    pub fn set_peers(&self, peers: Vec<PeerAddr>) {
        *self.peers.lock() = peers;
    }
}

#[async_trait]
impl PeerDirectory for StaticPeerDirectory {
    async fn peers(&self) -> Vec<PeerAddr> {
        self.peers.lock().clone()
    }
}

/// Skill packages installed on this node.
pub trait SkillCatalog: Send + Sync {
    fn installed_skill_ids(&self) -> Vec<String>;
}

/// Fixed skill list.
#[derive(Debug, Default)]
pub struct StaticSkillCatalog {
    skills: Vec<String>,
}

impl StaticSkillCatalog {
    pub fn new(skills: Vec<String>) -> Self {
        Self { skills }
    }
}

impl SkillCatalog for StaticSkillCatalog {
    fn installed_skill_ids(&self) -> Vec<String> {
        self.skills.clone()
    }
}

/// The local task queue the gateway tracks work in. Delegations create
/// tracking tasks here on both the origin and the executor side.
#[async_trait]
pub trait TaskSink: Send + Sync {
    /// Create a tracking task; returns its local id.
    async fn create_task(&self, title: &str, description: &str, outbound_delegation: bool)
    -> String;
    async fn complete_task(&self, local_task_id: &str, result: Option<&str>);
    async fn fail_task(&self, local_task_id: &str, error: &str);
    /// Number of currently active tasks; advertised as node load.
    async fn active_count(&self) -> u32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalTaskStatus {
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct LocalTask {
    pub title: String,
    pub description: String,
    pub outbound_delegation: bool,
    pub status: LocalTaskStatus,
    pub result: Option<String>,
    pub error: Option<String>,
}

/// In-memory task queue used by the demo daemon and tests.
#[derive(Debug, Default)]
pub struct InMemoryTaskSink {
    next_id: AtomicU64,
    tasks: Mutex<HashMap<String, LocalTask>>,
}

impl InMemoryTaskSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, local_task_id: &str) -> Option<LocalTask> {
        self.tasks.lock().get(local_task_id).cloned()
    }
}

#[async_trait]
impl TaskSink for InMemoryTaskSink {
    async fn create_task(
        &self,
        title: &str,
        description: &str,
        outbound_delegation: bool,
    ) -> String {
        let id = format!("task-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.tasks.lock().insert(
            id.clone(),
            LocalTask {
                title: title.to_owned(),
                description: description.to_owned(),
                outbound_delegation,
                status: LocalTaskStatus::Active,
                result: None,
                error: None,
            },
        );
        id
    }

    async fn complete_task(&self, local_task_id: &str, result: Option<&str>) {
        if let Some(task) = self.tasks.lock().get_mut(local_task_id) {
            task.status = LocalTaskStatus::Completed;
            task.result = result.map(str::to_owned);
        }
    }

    async fn fail_task(&self, local_task_id: &str, error: &str) {
        if let Some(task) = self.tasks.lock().get_mut(local_task_id) {
            task.status = LocalTaskStatus::Failed;
            task.error = Some(error.to_owned());
        }
    }

    async fn active_count(&self) -> u32 {
        let count = self
            .tasks
            .lock()
            .values()
            .filter(|task| task.status == LocalTaskStatus::Active)
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }
}

/// Key resolver backed by a fixed `host:port → public key` map.
#[derive(Debug, Default)]
pub struct StaticKeyResolver {
    keys: Mutex<HashMap<String, [u8; 32]>>,
}

impl StaticKeyResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, addr: &PeerAddr, key: [u8; 32]) {
        self.keys.lock().insert(addr.key(), key);
    }
}

#[async_trait]
impl PeerKeyResolver for StaticKeyResolver {
    async fn public_key(&self, host: &str, port: u16) -> CryptoResult<Option<[u8; 32]>> {
        Ok(self.keys.lock().get(&format!("{host}:{port}")).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn task_sink_tracks_lifecycle_and_load() {
        let sink = InMemoryTaskSink::new();
        let a = sink.create_task("a", "first", false).await;
        let b = sink.create_task("b", "second", true).await;
        assert_eq!(sink.active_count().await, 2);

        sink.complete_task(&a, Some("done")).await;
        sink.fail_task(&b, "broke").await;
        assert_eq!(sink.active_count().await, 0);

        assert_eq!(sink.get(&a).unwrap().status, LocalTaskStatus::Completed);
        assert_eq!(sink.get(&a).unwrap().result.as_deref(), Some("done"));
        assert_eq!(sink.get(&b).unwrap().error.as_deref(), Some("broke"));
        assert!(sink.get(&b).unwrap().outbound_delegation);
    }

    #[tokio::test]
    async fn static_resolver_returns_known_keys_only() {
        let resolver = StaticKeyResolver::new();
        let addr = PeerAddr::new("10.0.0.2", 8787);
        resolver.insert(&addr, [7u8; 32]);

        assert_eq!(
            resolver.public_key("10.0.0.2", 8787).await.unwrap(),
            Some([7u8; 32])
        );
        assert_eq!(resolver.public_key("10.0.0.3", 8787).await.unwrap(), None);
    }
}
