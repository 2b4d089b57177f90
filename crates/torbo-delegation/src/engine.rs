//! The delegation engine.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use indexmap::IndexMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use torbo_crypto::{
    NodeIdentity, PeerKeyResolver, result_signing_string, submit_signing_string, verify_detached,
};
use torbo_events::EventBus;
use torbo_protocol::{
    DelegatedTask, DelegatedTaskResult, GatewayConfig, GatewayError, GatewayResult,
    NodeCapabilities, NodeId, ResultResponse, SubmitResponse, TASK_STATUS_COMPLETED, TaskId,
};
use torbo_registry::AgentRegistry;
use tracing::{error, info, instrument, warn};

use crate::client::{PeerClient, retry_with_backoff};
use crate::state::{self, InboundEntry, OutboundEntry, TrackingTables};
use crate::traits::{PeerAddr, PeerDirectory, SkillCatalog, TaskSink};

const SUBMIT_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Tuning knobs for one engine instance.
#[derive(Debug, Clone)]
pub struct DelegationSettings {
    pub state_path: PathBuf,
    /// Host and port peers should reach this node on.
    pub local_host: String,
    pub local_port: u16,
    pub accepts_delegation: bool,
    pub timeout_default_seconds: u64,
    pub capability_ttl_seconds: u64,
    pub max_concurrent_inbound: u32,
    pub max_accepted_access_level: u8,
    pub peer_request_timeout_seconds: u64,
    pub watchdog_interval_seconds: u64,
}

impl DelegationSettings {
    pub fn from_config(config: &GatewayConfig, local_host: impl Into<String>, local_port: u16) -> Self {
        Self {
            state_path: config.delegation_state_path(),
            local_host: local_host.into(),
            local_port,
            accepts_delegation: true,
            timeout_default_seconds: config.delegation_timeout_default_seconds,
            capability_ttl_seconds: config.delegation_capability_ttl_seconds,
            max_concurrent_inbound: config.delegation_max_concurrent_inbound,
            max_accepted_access_level: config.delegation_max_accepted_access_level,
            peer_request_timeout_seconds: config.peer_request_timeout_seconds,
            watchdog_interval_seconds: config.watchdog_interval_seconds,
        }
    }
}

struct PeerCacheEntry {
    caps: NodeCapabilities,
    cached_at: Instant,
}

/// Cross-node delegation component. Owns the tracking tables and the peer
/// capability cache; every collaborator comes in through a trait.
pub struct DelegationEngine {
    settings: DelegationSettings,
    identity: Option<Arc<NodeIdentity>>,
    registry: Arc<AgentRegistry>,
    tasks: Arc<dyn TaskSink>,
    peers: Arc<dyn PeerDirectory>,
    skills: Arc<dyn SkillCatalog>,
    keys: Arc<dyn PeerKeyResolver>,
    client: PeerClient,
    bus: Arc<EventBus>,
    tables: Mutex<TrackingTables>,
    peer_cache: Mutex<HashMap<String, PeerCacheEntry>>,
    watchdog: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl DelegationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: DelegationSettings,
        identity: Option<Arc<NodeIdentity>>,
        registry: Arc<AgentRegistry>,
        tasks: Arc<dyn TaskSink>,
        peers: Arc<dyn PeerDirectory>,
        skills: Arc<dyn SkillCatalog>,
        keys: Arc<dyn PeerKeyResolver>,
        bus: Arc<EventBus>,
    ) -> Self {
        let client = PeerClient::new(settings.peer_request_timeout_seconds);
        Self {
            settings,
            identity,
            registry,
            tasks,
            peers,
            skills,
            keys,
            client,
            bus,
            tables: Mutex::new(TrackingTables::default()),
            peer_cache: Mutex::new(HashMap::new()),
            watchdog: parking_lot::Mutex::new(None),
        }
    }

    /// Load the persisted tracking tables. Called once during bootstrap.
    pub async fn initialize(&self) {
        let loaded = state::load_tables(&self.settings.state_path).await;
        let mut tables = self.tables.lock().await;
        *tables = loaded;
        info!(
            outbound = tables.outbound.len(),
            inbound = tables.inbound.len(),
            "delegation state loaded"
        );
    }

    /// Spawn the timeout watchdog. Safe to call once per engine.
    pub fn start_watchdog(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let interval = Duration::from_secs(self.settings.watchdog_interval_seconds);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                engine.watchdog_tick().await;
            }
        });
        *self.watchdog.lock() = Some(handle);
    }

    /// Stop the watchdog. Idempotent.
    pub fn shutdown(&self) {
        if let Some(handle) = self.watchdog.lock().take() {
            handle.abort();
        }
    }

    /// This node's current capability advertisement.
    pub async fn get_capabilities(&self) -> NodeCapabilities {
        let (node_id, display_name) = match &self.identity {
            Some(identity) => (identity.node_id.clone(), identity.display_name.clone()),
            None => (NodeId::from_string("unidentified"), String::new()),
        };
        let agent_ids = self
            .registry
            .list()
            .await
            .into_iter()
            .map(|agent| agent.id.to_string())
            .collect();
        NodeCapabilities {
            node_id,
            display_name,
            skill_ids: self.skills.installed_skill_ids(),
            agent_ids,
            max_access_level: self.settings.max_accepted_access_level,
            accepts_delegation: self.settings.accepts_delegation,
            current_load: self.tasks.active_count().await,
            max_concurrent_delegated: self.settings.max_concurrent_inbound,
            updated_at: Utc::now(),
        }
    }

    /// Refresh the capability cache for every directory peer.
    #[instrument(skip(self))]
    pub async fn refresh_peer_capabilities(&self) {
        for addr in self.peers.peers().await {
            self.fetch_and_cache(&addr).await;
        }
    }

    async fn fetch_and_cache(&self, addr: &PeerAddr) -> Option<NodeCapabilities> {
        match self.client.capabilities(&addr.host, addr.port).await {
            Ok(caps) => {
                self.peer_cache.lock().await.insert(
                    addr.key(),
                    PeerCacheEntry {
                        caps: caps.clone(),
                        cached_at: Instant::now(),
                    },
                );
                Some(caps)
            }
            Err(error) => {
                warn!(%error, peer = %addr.key(), "capability fetch failed");
                self.peer_cache.lock().await.remove(&addr.key());
                None
            }
        }
    }

    /// The least-loaded peer satisfying the requirement, refreshing stale
    /// cache entries along the way.
    pub async fn find_best_peer(
        &self,
        required_skills: &[String],
        required_access_level: u8,
    ) -> Option<(PeerAddr, NodeCapabilities)> {
        let ttl = Duration::from_secs(self.settings.capability_ttl_seconds);
        let mut candidates = Vec::new();

        for addr in self.peers.peers().await {
            let cached = {
                let cache = self.peer_cache.lock().await;
                cache
                    .get(&addr.key())
                    .filter(|entry| entry.cached_at.elapsed() <= ttl)
                    .map(|entry| entry.caps.clone())
            };
            let caps = match cached {
                Some(caps) => Some(caps),
                None => self.fetch_and_cache(&addr).await,
            };
            if let Some(caps) = caps {
                candidates.push((addr, caps));
            }
        }

        candidates
            .into_iter()
            .filter(|(_, caps)| {
                caps.accepts_delegation
                    && caps.max_access_level >= required_access_level
                    && caps.current_load < caps.max_concurrent_delegated
                    && required_skills
                        .iter()
                        .all(|skill| caps.skill_ids.contains(skill))
            })
            .min_by_key(|(_, caps)| caps.current_load)
    }

    /// Ship a task to the best available peer. Returns the delegated task
    /// id once the peer accepts.
    #[instrument(skip(self, description, context))]
    pub async fn delegate_task(
        &self,
        title: &str,
        description: &str,
        priority: &str,
        required_skills: &[String],
        required_access_level: u8,
        context: Option<String>,
    ) -> GatewayResult<TaskId> {
        let identity = self.identity.as_ref().ok_or(GatewayError::NoIdentity)?;
        let (addr, caps) = self
            .find_best_peer(required_skills, required_access_level)
            .await
            .ok_or(GatewayError::NoPeerAvailable)?;

        let task_id = TaskId::new_uuid();
        let signature = identity.keypair.sign(
            submit_signing_string(&task_id, title, &identity.node_id).as_bytes(),
        );
        let task = DelegatedTask {
            task_id: task_id.clone(),
            origin_node_id: identity.node_id.clone(),
            origin_host: self.settings.local_host.clone(),
            origin_port: self.settings.local_port,
            title: title.to_owned(),
            description: description.to_owned(),
            priority: priority.to_owned(),
            required_skill_ids: required_skills.to_vec(),
            required_access_level,
            timeout_seconds: self.settings.timeout_default_seconds,
            signature,
            created_at: Utc::now(),
            context,
        };

        let response = retry_with_backoff(SUBMIT_ATTEMPTS, RETRY_BASE_DELAY, || {
            self.client.submit(&addr.host, addr.port, &task)
        })
        .await?;
        if !response.is_accepted() {
            return Err(GatewayError::PeerRejected(
                response.reason.unwrap_or_else(|| "rejected".to_owned()),
            ));
        }

        let local_task_id = self.tasks.create_task(title, description, true).await;
        {
            let mut tables = self.tables.lock().await;
            tables.outbound.insert(
                task_id.clone(),
                OutboundEntry {
                    task_id: task_id.clone(),
                    title: title.to_owned(),
                    target_node_id: caps.node_id.clone(),
                    target_host: addr.host.clone(),
                    target_port: addr.port,
                    required_access_level,
                    sent_at: Utc::now(),
                    timeout_seconds: self.settings.timeout_default_seconds,
                    local_task_id: local_task_id.clone(),
                },
            );
            self.persist(&tables).await;
        }

        self.publish(
            "delegation.sent",
            &[
                ("task_id", task_id.as_str()),
                ("target_node_id", caps.node_id.as_str()),
                ("local_task_id", &local_task_id),
            ],
        )
        .await;
        Ok(task_id)
    }

    /// Decide whether to accept a task submitted by a peer.
    ///
    /// Rejections carry a reason and change no state. An unresolvable
    /// sender key is treated as an invalid signature.
    #[instrument(skip(self, task), fields(task_id = %task.task_id, origin = %task.origin_node_id))]
    pub async fn handle_incoming_task(
        &self,
        task: DelegatedTask,
        sender_ip: &str,
    ) -> SubmitResponse {
        if task.task_id.as_str().is_empty()
            || task.origin_node_id.as_str().is_empty()
            || task.origin_host.is_empty()
            || task.title.is_empty()
            || task.signature.is_empty()
        {
            return SubmitResponse::rejected("missing fields");
        }

        let message = submit_signing_string(&task.task_id, &task.title, &task.origin_node_id);
        match self
            .keys
            .public_key(&task.origin_host, task.origin_port)
            .await
        {
            Ok(Some(key)) => {
                if verify_detached(&key, &message, &task.signature).is_err() {
                    warn!(origin = %task.origin_node_id, "rejecting task with invalid signature");
                    return SubmitResponse::rejected("invalid signature");
                }
            }
            Ok(None) => {
                warn!(origin = %task.origin_node_id, "rejecting task: sender key unavailable");
                return SubmitResponse::rejected("invalid signature: sender key unavailable");
            }
            Err(error) => {
                warn!(%error, origin = %task.origin_node_id, "rejecting task: key lookup failed");
                return SubmitResponse::rejected("invalid signature: sender key unavailable");
            }
        }

        if task.required_access_level > self.settings.max_accepted_access_level {
            return SubmitResponse::rejected(format!(
                "required access level {} exceeds accepted maximum {}",
                task.required_access_level, self.settings.max_accepted_access_level
            ));
        }

        let inbound_count = self.tables.lock().await.inbound.len();
        if inbound_count >= self.settings.max_concurrent_inbound as usize {
            return SubmitResponse::rejected("delegation capacity reached");
        }

        let installed = self.skills.installed_skill_ids();
        let missing: Vec<String> = task
            .required_skill_ids
            .iter()
            .filter(|skill| !installed.contains(skill))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return SubmitResponse::rejected(format!("missing skills: {}", missing.join(", ")));
        }

        let description = match &task.context {
            Some(context) => format!("{}\n\nContext: {context}", task.description),
            None => task.description.clone(),
        };
        let local_task_id = self.tasks.create_task(&task.title, &description, false).await;
        {
            let mut tables = self.tables.lock().await;
            tables.inbound.insert(
                task.task_id.clone(),
                InboundEntry {
                    task_id: task.task_id.clone(),
                    title: task.title.clone(),
                    origin_node_id: task.origin_node_id.clone(),
                    origin_host: task.origin_host.clone(),
                    origin_port: task.origin_port,
                    received_at: Utc::now(),
                    local_task_id: local_task_id.clone(),
                },
            );
            self.persist(&tables).await;
        }

        self.publish(
            "delegation.received",
            &[
                ("task_id", task.task_id.as_str()),
                ("origin_node_id", task.origin_node_id.as_str()),
                ("sender_ip", sender_ip),
                ("local_task_id", &local_task_id),
            ],
        )
        .await;
        SubmitResponse::accepted(task.task_id, local_task_id)
    }

    /// Deliver the signed outcome of a locally executed inbound delegation
    /// back to its origin node.
    #[instrument(skip(self, result, error))]
    pub async fn deliver_result(
        &self,
        local_task_id: &str,
        status: &str,
        result: Option<String>,
        error: Option<String>,
    ) -> GatewayResult<()> {
        let identity = self.identity.as_ref().ok_or(GatewayError::NoIdentity)?;
        let entry = self
            .tables
            .lock()
            .await
            .inbound_by_local_task(local_task_id)
            .ok_or_else(|| GatewayError::UnknownTask(local_task_id.to_owned()))?;

        let signature = identity.keypair.sign(
            result_signing_string(&entry.task_id, status, &identity.node_id).as_bytes(),
        );
        let execution_time_seconds = (Utc::now() - entry.received_at)
            .num_milliseconds()
            .max(0) as f64
            / 1000.0;
        let payload = DelegatedTaskResult {
            task_id: entry.task_id.clone(),
            executor_node_id: identity.node_id.clone(),
            status: status.to_owned(),
            result,
            error,
            execution_time_seconds,
            signature,
            completed_at: Utc::now(),
        };

        retry_with_backoff(SUBMIT_ATTEMPTS, RETRY_BASE_DELAY, || {
            self.client
                .deliver_result(&entry.origin_host, entry.origin_port, &payload)
        })
        .await?;

        let mut tables = self.tables.lock().await;
        tables.inbound.remove(&entry.task_id);
        self.persist(&tables).await;
        Ok(())
    }

    /// Process a result a peer delivered for one of our outbound tasks.
    #[instrument(skip(self, result), fields(task_id = %result.task_id, status = %result.status))]
    pub async fn handle_task_result(&self, result: DelegatedTaskResult) -> ResultResponse {
        let entry = {
            let tables = self.tables.lock().await;
            tables.outbound.get(&result.task_id).cloned()
        };
        let Some(entry) = entry else {
            return ResultResponse::error("unknown task");
        };

        let message =
            result_signing_string(&result.task_id, &result.status, &result.executor_node_id);
        match self
            .keys
            .public_key(&entry.target_host, entry.target_port)
            .await
        {
            Ok(Some(key)) => {
                if verify_detached(&key, &message, &result.signature).is_err() {
                    warn!(executor = %result.executor_node_id, "rejecting result with invalid signature");
                    return ResultResponse::error("invalid signature");
                }
            }
            Ok(None) | Err(_) => {
                warn!(executor = %result.executor_node_id, "rejecting result: executor key unavailable");
                return ResultResponse::error("invalid signature: executor key unavailable");
            }
        }

        let completed = result.status == TASK_STATUS_COMPLETED;
        if completed {
            self.tasks
                .complete_task(&entry.local_task_id, result.result.as_deref())
                .await;
        } else {
            self.tasks
                .fail_task(
                    &entry.local_task_id,
                    result.error.as_deref().unwrap_or("delegation failed"),
                )
                .await;
        }

        {
            let mut tables = self.tables.lock().await;
            tables.outbound.remove(&result.task_id);
            self.persist(&tables).await;
        }

        let topic = if completed {
            "delegation.completed"
        } else {
            "delegation.failed"
        };
        self.publish(
            topic,
            &[
                ("task_id", result.task_id.as_str()),
                ("executor_node_id", result.executor_node_id.as_str()),
                ("local_task_id", &entry.local_task_id),
            ],
        )
        .await;
        ResultResponse::ok()
    }

    /// One watchdog pass: fail every outbound entry past its deadline.
    pub async fn watchdog_tick(&self) {
        let now = Utc::now();
        let expired: Vec<OutboundEntry> = {
            let tables = self.tables.lock().await;
            tables
                .outbound
                .values()
                .filter(|entry| {
                    (now - entry.sent_at).num_seconds() > entry.timeout_seconds as i64
                })
                .cloned()
                .collect()
        };

        for entry in expired {
            let reason = format!("Delegation timed out after {}s", entry.timeout_seconds);
            error!(task_id = %entry.task_id, %reason, "delegation timed out");
            self.tasks.fail_task(&entry.local_task_id, &reason).await;
            {
                let mut tables = self.tables.lock().await;
                tables.outbound.remove(&entry.task_id);
                self.persist(&tables).await;
            }
            self.publish(
                "delegation.timeout",
                &[
                    ("task_id", entry.task_id.as_str()),
                    ("local_task_id", &entry.local_task_id),
                    ("timeout_seconds", &entry.timeout_seconds.to_string()),
                ],
            )
            .await;
        }
    }

    /// Snapshot of the tracking tables for dashboards and tests.
    pub async fn tracking_snapshot(&self) -> (Vec<OutboundEntry>, Vec<InboundEntry>) {
        let tables = self.tables.lock().await;
        let file = tables.to_file();
        (file.outbound, file.inbound)
    }

    async fn persist(&self, tables: &TrackingTables) {
        if let Err(error) = state::persist_tables(&self.settings.state_path, tables).await {
            error!(%error, "failed to persist delegation state");
        }
    }

    async fn publish(&self, topic: &str, pairs: &[(&str, &str)]) {
        let payload: IndexMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        self.bus.publish(topic, payload, "delegation").await;
    }
}

impl std::fmt::Debug for DelegationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegationEngine")
            .field("local", &format!(
                "{}:{}",
                self.settings.local_host, self.settings.local_port
            ))
            .finish_non_exhaustive()
    }
}
