//! The agent registry component.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use tokio::fs;
use tokio::sync::RwLock;
use torbo_events::EventBus;
use torbo_protocol::{AccessLevel, AgentConfig, AgentId, GatewayError, GatewayResult};
use tracing::{info, instrument, warn};

use crate::defaults::{BUILT_IN_AGENT_ID, built_in_template, upgrade_stale_defaults};
use crate::store;

/// Pre-layout single-document config file migrated at startup.
const LEGACY_FILE_NAME: &str = "agent_config.json";

/// Owns the agent persona documents and the in-memory catalogue.
///
/// The registry is the sole writer of the agents directory. All methods
/// serialize through one internal lock, so a `create` followed by a `get`
/// observes the new agent.
pub struct AgentRegistry {
    agents_dir: PathBuf,
    max_access_level: AccessLevel,
    bus: Arc<EventBus>,
    agents: RwLock<HashMap<AgentId, AgentConfig>>,
}

impl AgentRegistry {
    pub fn new(
        agents_dir: impl Into<PathBuf>,
        max_access_level: AccessLevel,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            agents_dir: agents_dir.into(),
            max_access_level,
            bus,
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Load the catalogue from disk and guarantee the built-in agent.
    ///
    /// Order matters: directory creation, legacy migration, document scan
    /// (corrupt files are skipped with a warning), built-in insertion, then
    /// the stale-default upgrade pass.
    #[instrument(skip(self))]
    pub async fn bootstrap(&self) -> GatewayResult<()> {
        fs::create_dir_all(&self.agents_dir)
            .await
            .map_err(|e| GatewayError::Storage(format!("create agents dir: {e}")))?;

        self.migrate_legacy_file().await;

        let loaded = store::load_documents(&self.agents_dir).await?;
        let mut agents = self.agents.write().await;
        agents.clear();
        for agent in loaded {
            agents.insert(agent.id.clone(), agent);
        }

        let built_in_id = AgentId::from_string(BUILT_IN_AGENT_ID);
        match agents.remove(&built_in_id) {
            None => {
                let template = built_in_template();
                store::write_document(&self.agents_dir, &template).await?;
                info!(agent_id = BUILT_IN_AGENT_ID, "installed built-in agent");
                agents.insert(built_in_id, template);
            }
            Some(mut existing) => {
                existing.is_built_in = true;
                if upgrade_stale_defaults(&mut existing) {
                    info!(agent_id = BUILT_IN_AGENT_ID, "upgraded stale built-in defaults");
                    store::write_document(&self.agents_dir, &existing).await?;
                }
                agents.insert(built_in_id, existing);
            }
        }
        Ok(())
    }

    /// One-shot migration of the legacy single-document layout.
    async fn migrate_legacy_file(&self) {
        let legacy_path = match self.agents_dir.parent() {
            Some(parent) => parent.join(LEGACY_FILE_NAME),
            None => return,
        };
        if !fs::try_exists(&legacy_path).await.unwrap_or(false) {
            return;
        }
        let target = store::document_path(&self.agents_dir, BUILT_IN_AGENT_ID);
        if fs::try_exists(&target).await.unwrap_or(false) {
            return;
        }

        let text = match fs::read_to_string(&legacy_path).await {
            Ok(text) => text,
            Err(error) => {
                warn!(%error, "legacy agent config unreadable, skipping migration");
                return;
            }
        };
        let legacy: AgentConfig = match serde_json::from_str(&text) {
            Ok(legacy) => legacy,
            Err(error) => {
                warn!(%error, "legacy agent config undecodable, skipping migration");
                return;
            }
        };

        let mut migrated = built_in_template();
        migrated.name = non_empty_or(legacy.name, migrated.name);
        migrated.pronouns = non_empty_or(legacy.pronouns, migrated.pronouns);
        migrated.role = non_empty_or(legacy.role, migrated.role);
        migrated.voice_tone = non_empty_or(legacy.voice_tone, migrated.voice_tone);
        migrated.core_values = non_empty_or(legacy.core_values, migrated.core_values);
        migrated.custom_instructions =
            non_empty_or(legacy.custom_instructions, migrated.custom_instructions);
        migrated.background_knowledge =
            non_empty_or(legacy.background_knowledge, migrated.background_knowledge);
        migrated.eleven_labs_voice_id =
            non_empty_or(legacy.eleven_labs_voice_id, migrated.eleven_labs_voice_id);
        migrated.fallback_tts_voice =
            non_empty_or(legacy.fallback_tts_voice, migrated.fallback_tts_voice);
        migrated.topics_to_avoid = legacy.topics_to_avoid;
        migrated.access_level = legacy.access_level.capped(self.max_access_level);
        migrated.directory_scopes = legacy.directory_scopes;
        migrated.enabled_skill_ids = legacy.enabled_skill_ids;
        migrated.enabled_capabilities = legacy.enabled_capabilities;

        if let Err(error) = store::write_document(&self.agents_dir, &migrated).await {
            warn!(%error, "failed to write migrated agent document");
            return;
        }
        if let Err(error) = fs::remove_file(&legacy_path).await {
            warn!(%error, "failed to delete legacy agent config");
        }
        info!("migrated legacy agent config into per-agent layout");
    }

    /// Every agent: built-in first, then case-insensitive by display name.
    pub async fn list(&self) -> Vec<AgentConfig> {
        let agents = self.agents.read().await;
        let mut all: Vec<AgentConfig> = agents.values().cloned().collect();
        all.sort_by(|a, b| {
            b.is_built_in
                .cmp(&a.is_built_in)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });
        all
    }

    pub async fn get(&self, id: &AgentId) -> Option<AgentConfig> {
        self.agents.read().await.get(id).cloned()
    }

    #[instrument(skip(self, agent), fields(agent_id = %agent.id))]
    pub async fn create(&self, mut agent: AgentConfig) -> GatewayResult<AgentConfig> {
        if !agent.id.is_valid() {
            return Err(GatewayError::InvalidId(agent.id.to_string()));
        }
        let mut agents = self.agents.write().await;
        if agents.contains_key(&agent.id) {
            return Err(GatewayError::AlreadyExists(agent.id.to_string()));
        }
        agent.is_built_in = false;
        agent.access_level = agent.access_level.capped(self.max_access_level);
        store::write_document(&self.agents_dir, &agent).await?;
        agents.insert(agent.id.clone(), agent.clone());
        drop(agents);

        self.publish("agent.created", &agent.id).await;
        Ok(agent)
    }

    /// Replace an agent document. The stored built-in flag and creation
    /// timestamp always win over the caller's copy.
    #[instrument(skip(self, agent), fields(agent_id = %agent.id))]
    pub async fn update(&self, mut agent: AgentConfig) -> GatewayResult<AgentConfig> {
        let mut agents = self.agents.write().await;
        let existing = agents
            .get(&agent.id)
            .ok_or_else(|| GatewayError::AgentNotFound(agent.id.to_string()))?;
        agent.is_built_in = existing.is_built_in;
        agent.created_at = existing.created_at;
        agent.access_level = agent.access_level.capped(self.max_access_level);
        store::write_document(&self.agents_dir, &agent).await?;
        agents.insert(agent.id.clone(), agent.clone());
        drop(agents);

        self.publish("agent.updated", &agent.id).await;
        Ok(agent)
    }

    #[instrument(skip(self), fields(agent_id = %id))]
    pub async fn delete(&self, id: &AgentId) -> GatewayResult<()> {
        let mut agents = self.agents.write().await;
        let existing = agents
            .get(id)
            .ok_or_else(|| GatewayError::AgentNotFound(id.to_string()))?;
        if existing.is_built_in {
            return Err(GatewayError::CannotDeleteBuiltIn);
        }
        store::remove_document(&self.agents_dir, id.as_str()).await?;
        agents.remove(id);
        drop(agents);

        self.publish("agent.deleted", id).await;
        Ok(())
    }

    /// Restore persona defaults, keeping access level, scopes, skills, and
    /// capability toggles.
    #[instrument(skip(self), fields(agent_id = %id))]
    pub async fn reset(&self, id: &AgentId) -> GatewayResult<AgentConfig> {
        let mut agents = self.agents.write().await;
        let existing = agents
            .get(id)
            .ok_or_else(|| GatewayError::AgentNotFound(id.to_string()))?;

        let persona = if existing.is_built_in {
            built_in_template()
        } else {
            AgentConfig::default()
        };
        let reset = AgentConfig {
            id: existing.id.clone(),
            is_built_in: existing.is_built_in,
            created_at: existing.created_at,
            access_level: existing.access_level,
            directory_scopes: existing.directory_scopes.clone(),
            enabled_skill_ids: existing.enabled_skill_ids.clone(),
            enabled_capabilities: existing.enabled_capabilities.clone(),
            name: persona.name,
            pronouns: persona.pronouns,
            role: persona.role,
            voice_tone: persona.voice_tone,
            personality_preset: persona.personality_preset,
            core_values: persona.core_values,
            topics_to_avoid: persona.topics_to_avoid,
            custom_instructions: persona.custom_instructions,
            background_knowledge: persona.background_knowledge,
            eleven_labs_voice_id: persona.eleven_labs_voice_id,
            fallback_tts_voice: persona.fallback_tts_voice,
        };
        store::write_document(&self.agents_dir, &reset).await?;
        agents.insert(reset.id.clone(), reset.clone());
        drop(agents);

        self.publish("agent.updated", id).await;
        Ok(reset)
    }

    /// The canonical document bytes for an agent.
    pub async fn export(&self, id: &AgentId) -> GatewayResult<Vec<u8>> {
        let agents = self.agents.read().await;
        let agent = agents
            .get(id)
            .ok_or_else(|| GatewayError::AgentNotFound(id.to_string()))?;
        Ok(store::encode_document(agent)?.into_bytes())
    }

    /// Import a document, creating or replacing the agent. Unknown fields
    /// are dropped; missing optional fields take their defaults.
    pub async fn import(&self, bytes: &[u8]) -> GatewayResult<AgentId> {
        let agent: AgentConfig = serde_json::from_slice(bytes)?;
        if !agent.id.is_valid() {
            return Err(GatewayError::InvalidId(agent.id.to_string()));
        }
        let id = agent.id.clone();
        let exists = self.agents.read().await.contains_key(&id);
        if exists {
            self.update(agent).await?;
        } else {
            self.create(agent).await?;
        }
        Ok(id)
    }

    async fn publish(&self, topic: &str, id: &AgentId) {
        let payload = IndexMap::from([("agent_id".to_owned(), id.to_string())]);
        self.bus.publish(topic, payload, "registry").await;
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents_dir", &self.agents_dir)
            .field("max_access_level", &self.max_access_level)
            .finish_non_exhaustive()
    }
}

fn non_empty_or(candidate: String, fallback: String) -> String {
    if candidate.is_empty() { fallback } else { candidate }
}
