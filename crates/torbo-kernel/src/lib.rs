//! # torbo-kernel — the gateway composition root
//!
//! Builds and wires the four core components — event bus, agent registry,
//! IAM engine, delegation engine — with an explicit
//! [`initialize`](TorboKernel::initialize) / [`shutdown`](TorboKernel::shutdown)
//! lifecycle. The HTTP layer and other collaborators only ever talk to the
//! kernel's component handles; nothing in here is a global.

use std::sync::Arc;

use indexmap::IndexMap;
use torbo_crypto::{NodeIdentity, PeerKeyResolver};
use torbo_delegation::{
    DelegationEngine, DelegationSettings, HttpPeerKeyResolver, InMemoryTaskSink, PeerDirectory,
    SkillCatalog, StaticPeerDirectory, StaticSkillCatalog, TaskSink,
};
use torbo_events::EventBus;
use torbo_iam::IamEngine;
use torbo_protocol::{AccessLevel, Action, GatewayConfig, GatewayResult};
use torbo_registry::AgentRegistry;
use tracing::{error, info, instrument};

/// Step-by-step construction of a [`TorboKernel`].
///
/// Collaborator seams default to local stubs (in-memory task queue, empty
/// peer directory and skill catalogue, HTTP key discovery) so a kernel is
/// usable out of the box and tests can substitute their own.
pub struct KernelBuilder {
    config: GatewayConfig,
    max_access_level: AccessLevel,
    identity: Option<NodeIdentity>,
    local_host: String,
    local_port: u16,
    tasks: Option<Arc<dyn TaskSink>>,
    peers: Option<Arc<dyn PeerDirectory>>,
    skills: Option<Arc<dyn SkillCatalog>>,
    keys: Option<Arc<dyn PeerKeyResolver>>,
}

impl KernelBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            max_access_level: AccessLevel::Full,
            identity: None,
            local_host: "127.0.0.1".to_owned(),
            local_port: 8787,
            tasks: None,
            peers: None,
            skills: None,
            keys: None,
        }
    }

    /// Process-wide cap on agent access levels.
    pub fn max_access_level(mut self, level: AccessLevel) -> Self {
        self.max_access_level = level;
        self
    }

    /// Node identity used to sign delegation traffic. Without one the
    /// kernel runs, but outbound delegation fails with `NoIdentity`.
    pub fn identity(mut self, identity: NodeIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Host and port peers reach this node on.
    pub fn listen(mut self, host: impl Into<String>, port: u16) -> Self {
        self.local_host = host.into();
        self.local_port = port;
        self
    }

    pub fn task_sink(mut self, tasks: Arc<dyn TaskSink>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn peer_directory(mut self, peers: Arc<dyn PeerDirectory>) -> Self {
        self.peers = Some(peers);
        self
    }

    pub fn skill_catalog(mut self, skills: Arc<dyn SkillCatalog>) -> Self {
        self.skills = Some(skills);
        self
    }

    pub fn key_resolver(mut self, keys: Arc<dyn PeerKeyResolver>) -> Self {
        self.keys = Some(keys);
        self
    }

    /// Wire everything up. A broken IAM database falls back to an
    /// in-memory store so the gateway degrades instead of crashing; the
    /// failure is published as `system.error` during `initialize`.
    pub fn build(self) -> GatewayResult<TorboKernel> {
        if let Err(error) = std::fs::create_dir_all(&self.config.data_dir) {
            error!(%error, dir = %self.config.data_dir.display(), "cannot create data dir");
        }

        let bus = Arc::new(EventBus::with_audit(
            self.config.ring_buffer_capacity,
            self.config.audit_db_path(),
        ));

        let registry = Arc::new(AgentRegistry::new(
            self.config.agents_dir(),
            self.max_access_level,
            bus.clone(),
        ));

        let (iam, iam_degraded) = match IamEngine::open(self.config.iam_db_path(), bus.clone()) {
            Ok(engine) => (Arc::new(engine), false),
            Err(open_error) => {
                error!(error = %open_error, "IAM store unavailable, continuing in memory");
                (Arc::new(IamEngine::in_memory(bus.clone())?), true)
            }
        };

        let settings =
            DelegationSettings::from_config(&self.config, self.local_host, self.local_port);
        let delegation = Arc::new(DelegationEngine::new(
            settings,
            self.identity.map(Arc::new),
            registry.clone(),
            self.tasks.unwrap_or_else(|| InMemoryTaskSink::new()),
            self.peers
                .unwrap_or_else(|| Arc::new(StaticPeerDirectory::default())),
            self.skills
                .unwrap_or_else(|| Arc::new(StaticSkillCatalog::default())),
            self.keys
                .unwrap_or_else(|| Arc::new(HttpPeerKeyResolver::new())),
            bus.clone(),
        ));

        Ok(TorboKernel {
            config: self.config,
            bus,
            registry,
            iam,
            delegation,
            iam_degraded,
        })
    }
}

/// Handle to the wired gateway core.
#[derive(Clone)]
pub struct TorboKernel {
    config: GatewayConfig,
    bus: Arc<EventBus>,
    registry: Arc<AgentRegistry>,
    iam: Arc<IamEngine>,
    delegation: Arc<DelegationEngine>,
    iam_degraded: bool,
}

impl TorboKernel {
    /// Bootstrap every component in dependency order: registry documents,
    /// IAM auto-migration of registry agents, delegation state, watchdog.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> GatewayResult<()> {
        if self.iam_degraded {
            let payload = IndexMap::from([(
                "message".to_owned(),
                "IAM store unavailable, running in memory".to_owned(),
            )]);
            self.bus.publish("system.error", payload, "kernel").await;
        }

        self.registry.bootstrap().await?;
        let agents = self.registry.list().await;
        let migrated = self.iam.auto_migrate_existing_agents(&agents).await?;
        if migrated > 0 {
            info!(migrated, "installed default permissions for registry agents");
        }

        self.delegation.initialize().await;
        self.delegation.start_watchdog();

        self.bus
            .publish("system.started", IndexMap::new(), "kernel")
            .await;
        Ok(())
    }

    /// Stop background work. Idempotent.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.delegation.shutdown();
        self.bus
            .publish("system.stopped", IndexMap::new(), "kernel")
            .await;
    }

    /// The request-path authorization check: IAM check-and-log.
    pub async fn check_access(&self, agent_id: &str, resource: &str, action: Action) -> bool {
        self.iam.check_and_log(agent_id, resource, action).await
    }

    /// Prune the access log to the configured retention.
    pub async fn prune_access_log(&self) -> GatewayResult<usize> {
        self.iam.prune(self.config.log_prune_retention_days).await
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn registry(&self) -> Arc<AgentRegistry> {
        self.registry.clone()
    }

    pub fn iam(&self) -> Arc<IamEngine> {
        self.iam.clone()
    }

    pub fn delegation(&self) -> Arc<DelegationEngine> {
        self.delegation.clone()
    }
}

impl std::fmt::Debug for TorboKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TorboKernel")
            .field("data_dir", &self.config.data_dir)
            .finish_non_exhaustive()
    }
}
