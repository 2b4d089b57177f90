//! The IAM engine: identities, permissions, and the access log.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::Mutex;
use torbo_events::EventBus;
use torbo_protocol::{
    Action, AgentConfig, GatewayError, GatewayResult, actions_from_csv, actions_to_csv,
};
use tracing::{debug, error, instrument, warn};

use crate::matching::resource_matches;
use crate::types::{AccessLogEntry, AgentIdentity, Permission};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS agent_identities (
    id TEXT PRIMARY KEY,
    owner TEXT NOT NULL DEFAULT '',
    purpose TEXT NOT NULL DEFAULT '',
    created_at REAL NOT NULL,
    risk_score REAL NOT NULL DEFAULT 0.0
);
CREATE TABLE IF NOT EXISTS iam_permissions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id TEXT NOT NULL REFERENCES agent_identities(id) ON DELETE CASCADE,
    resource TEXT NOT NULL,
    actions TEXT NOT NULL,
    granted_at REAL NOT NULL,
    granted_by TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_iam_permissions_agent ON iam_permissions(agent_id);
CREATE INDEX IF NOT EXISTS idx_iam_permissions_resource ON iam_permissions(resource);
CREATE TABLE IF NOT EXISTS iam_access_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id TEXT NOT NULL,
    resource TEXT NOT NULL,
    action TEXT NOT NULL,
    timestamp REAL NOT NULL,
    allowed INTEGER NOT NULL,
    reason TEXT
);
CREATE INDEX IF NOT EXISTS idx_iam_access_log_agent ON iam_access_log(agent_id);
CREATE INDEX IF NOT EXISTS idx_iam_access_log_timestamp ON iam_access_log(timestamp);
CREATE INDEX IF NOT EXISTS idx_iam_access_log_resource ON iam_access_log(resource);
";

pub(crate) fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

pub(crate) struct EngineState {
    pub(crate) conn: Connection,
    identities: HashMap<String, AgentIdentity>,
    permissions: HashMap<String, Vec<Permission>>,
}

impl EngineState {
    /// Drop both cache entries for an agent. Called before any write result
    /// is surfaced, so a failed write still forces a reload.
    fn invalidate(&mut self, agent_id: &str) {
        self.identities.remove(agent_id);
        self.permissions.remove(agent_id);
    }

    /// Rebuild the identity cache entry from the durable row.
    pub(crate) fn refresh_identity(&mut self, agent_id: &str) {
        self.identities.remove(agent_id);
        self.load_identity(agent_id);
    }

    fn load_identity(&mut self, agent_id: &str) -> Option<AgentIdentity> {
        if let Some(identity) = self.identities.get(agent_id) {
            return Some(identity.clone());
        }
        let loaded = self
            .conn
            .query_row(
                "SELECT id, owner, purpose, created_at, risk_score
                 FROM agent_identities WHERE id = ?1",
                params![agent_id],
                |row| {
                    Ok(AgentIdentity {
                        id: row.get(0)?,
                        owner: row.get(1)?,
                        purpose: row.get(2)?,
                        created_at: row.get(3)?,
                        risk_score: row.get(4)?,
                    })
                },
            )
            .optional();
        match loaded {
            Ok(Some(identity)) => {
                self.identities
                    .insert(agent_id.to_owned(), identity.clone());
                Some(identity)
            }
            Ok(None) => None,
            Err(e) => {
                error!(error = %e, agent_id, "identity lookup failed");
                None
            }
        }
    }

    pub(crate) fn load_permissions(&mut self, agent_id: &str) -> Vec<Permission> {
        if let Some(perms) = self.permissions.get(agent_id) {
            debug!(agent_id, "permission cache hit");
            return perms.clone();
        }
        let result: rusqlite::Result<Vec<Permission>> = (|| {
            let mut stmt = self.conn.prepare(
                "SELECT agent_id, resource, actions, granted_at, granted_by
                 FROM iam_permissions WHERE agent_id = ?1",
            )?;
            let rows = stmt.query_map(params![agent_id], |row| {
                let csv: String = row.get(2)?;
                Ok(Permission {
                    agent_id: row.get(0)?,
                    resource: row.get(1)?,
                    actions: actions_from_csv(&csv),
                    granted_at: row.get(3)?,
                    granted_by: row.get(4)?,
                })
            })?;
            rows.collect()
        })();
        match result {
            Ok(perms) => {
                self.permissions.insert(agent_id.to_owned(), perms.clone());
                perms
            }
            Err(e) => {
                error!(error = %e, agent_id, "permission load failed");
                Vec::new()
            }
        }
    }

    pub(crate) fn check(&mut self, agent_id: &str, resource: &str, action: Action) -> bool {
        self.load_permissions(agent_id)
            .iter()
            .any(|perm| resource_matches(&perm.resource, resource) && perm.allows(action))
    }

    fn append_log(
        &mut self,
        agent_id: &str,
        resource: &str,
        action: &str,
        allowed: bool,
        reason: Option<&str>,
    ) -> GatewayResult<()> {
        self.conn
            .execute(
                "INSERT INTO iam_access_log (agent_id, resource, action, timestamp, allowed, reason)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![agent_id, resource, action, unix_now(), allowed as i64, reason],
            )
            .map_err(|e| GatewayError::Storage(e.to_string()))?;
        Ok(())
    }

    fn ensure_identity(&mut self, agent_id: &str, owner: &str, purpose: &str) -> GatewayResult<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO agent_identities (id, owner, purpose, created_at, risk_score)
                 VALUES (?1, ?2, ?3, ?4, 0.0)",
                params![agent_id, owner, purpose, unix_now()],
            )
            .map_err(|e| GatewayError::Storage(e.to_string()))?;
        Ok(())
    }
}

/// SQLite-backed access-control component. One connection, one lock; every
/// operation observes a strict total order.
pub struct IamEngine {
    pub(crate) state: Mutex<EngineState>,
    bus: Arc<EventBus>,
}

impl IamEngine {
    /// Open (or create) the IAM database at `path`.
    pub fn open(path: impl AsRef<Path>, bus: Arc<EventBus>) -> GatewayResult<Self> {
        let conn = Connection::open(path).map_err(|e| GatewayError::Storage(e.to_string()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| GatewayError::Storage(e.to_string()))?;
        Self::from_connection(conn, bus)
    }

    /// In-memory engine for tests.
    pub fn in_memory(bus: Arc<EventBus>) -> GatewayResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| GatewayError::Storage(e.to_string()))?;
        Self::from_connection(conn, bus)
    }

    fn from_connection(conn: Connection, bus: Arc<EventBus>) -> GatewayResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| GatewayError::Storage(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| GatewayError::Storage(e.to_string()))?;
        Ok(Self {
            state: Mutex::new(EngineState {
                conn,
                identities: HashMap::new(),
                permissions: HashMap::new(),
            }),
            bus,
        })
    }

    /// Register an agent identity. Idempotent: a second call is a no-op
    /// that warms the cache.
    #[instrument(skip(self))]
    pub async fn register(&self, agent_id: &str, owner: &str, purpose: &str) -> GatewayResult<()> {
        let mut state = self.state.lock().await;
        state.ensure_identity(agent_id, owner, purpose)?;
        state.load_identity(agent_id);
        Ok(())
    }

    /// Grant `actions` on `resource`, replacing any prior grant for exactly
    /// this `(agent, resource)` pair. Empty inputs are rejected silently.
    #[instrument(skip(self, actions), fields(actions = %actions_to_csv(actions)))]
    pub async fn grant(
        &self,
        agent_id: &str,
        resource: &str,
        actions: &[Action],
        granted_by: &str,
    ) -> GatewayResult<()> {
        if agent_id.is_empty() || resource.is_empty() || actions.is_empty() {
            debug!("ignoring empty grant");
            return Ok(());
        }
        let mut state = self.state.lock().await;
        state.invalidate(agent_id);
        state.ensure_identity(agent_id, "", "")?;
        state
            .conn
            .execute(
                "DELETE FROM iam_permissions WHERE agent_id = ?1 AND resource = ?2",
                params![agent_id, resource],
            )
            .map_err(|e| GatewayError::Storage(e.to_string()))?;
        state
            .conn
            .execute(
                "INSERT INTO iam_permissions (agent_id, resource, actions, granted_at, granted_by)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    agent_id,
                    resource,
                    actions_to_csv(actions),
                    unix_now(),
                    granted_by
                ],
            )
            .map_err(|e| GatewayError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Remove the grant for exactly this `(agent, resource)` pair.
    #[instrument(skip(self))]
    pub async fn revoke(&self, agent_id: &str, resource: &str) -> GatewayResult<()> {
        let mut state = self.state.lock().await;
        state.invalidate(agent_id);
        state
            .conn
            .execute(
                "DELETE FROM iam_permissions WHERE agent_id = ?1 AND resource = ?2",
                params![agent_id, resource],
            )
            .map_err(|e| GatewayError::Storage(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn revoke_all(&self, agent_id: &str) -> GatewayResult<()> {
        let mut state = self.state.lock().await;
        state.invalidate(agent_id);
        state
            .conn
            .execute(
                "DELETE FROM iam_permissions WHERE agent_id = ?1",
                params![agent_id],
            )
            .map_err(|e| GatewayError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Delete the identity; permissions cascade.
    #[instrument(skip(self))]
    pub async fn remove(&self, agent_id: &str) -> GatewayResult<()> {
        let mut state = self.state.lock().await;
        state.invalidate(agent_id);
        state
            .conn
            .execute(
                "DELETE FROM agent_identities WHERE id = ?1",
                params![agent_id],
            )
            .map_err(|e| GatewayError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Whether any of the agent's permissions covers `resource` and lists
    /// `action` (or the `*` action).
    pub async fn check(&self, agent_id: &str, resource: &str, action: Action) -> bool {
        let mut state = self.state.lock().await;
        state.check(agent_id, resource, action)
    }

    /// `check`, then append the outcome to the access log. Denials carry a
    /// reason and are published to the bus as warnings.
    pub async fn check_and_log(&self, agent_id: &str, resource: &str, action: Action) -> bool {
        let allowed = {
            let mut state = self.state.lock().await;
            let allowed = state.check(agent_id, resource, action);
            let reason = if allowed {
                None
            } else {
                Some(format!("No matching permission for {action} on {resource}"))
            };
            if let Err(error) =
                state.append_log(agent_id, resource, action.as_str(), allowed, reason.as_deref())
            {
                error!(%error, agent_id, "failed to append access log entry");
            }
            allowed
        };

        if !allowed {
            warn!(agent_id, resource, action = %action, "access denied");
            let payload = IndexMap::from([
                ("agent_id".to_owned(), agent_id.to_owned()),
                ("resource".to_owned(), resource.to_owned()),
                ("action".to_owned(), action.to_string()),
            ]);
            self.bus.publish("iam.access.denied", payload, "iam").await;
        }
        allowed
    }

    /// Raw access-log append.
    pub async fn log(
        &self,
        agent_id: &str,
        resource: &str,
        action: &str,
        allowed: bool,
        reason: Option<&str>,
    ) -> GatewayResult<()> {
        let mut state = self.state.lock().await;
        state.append_log(agent_id, resource, action, allowed, reason)
    }

    /// All identities, optionally filtered by owner.
    pub async fn list_agents(&self, owner: Option<&str>) -> Vec<AgentIdentity> {
        let state = self.state.lock().await;
        let result: rusqlite::Result<Vec<AgentIdentity>> = (|| {
            let mut query = String::from(
                "SELECT id, owner, purpose, created_at, risk_score FROM agent_identities",
            );
            if owner.is_some() {
                query.push_str(" WHERE owner = ?1");
            }
            query.push_str(" ORDER BY id");
            let mut stmt = state.conn.prepare(&query)?;
            let map_row = |row: &rusqlite::Row<'_>| {
                Ok(AgentIdentity {
                    id: row.get(0)?,
                    owner: row.get(1)?,
                    purpose: row.get(2)?,
                    created_at: row.get(3)?,
                    risk_score: row.get(4)?,
                })
            };
            match owner {
                Some(owner) => stmt.query_map(params![owner], map_row)?.collect(),
                None => stmt.query_map([], map_row)?.collect(),
            }
        })();
        match result {
            Ok(agents) => agents,
            Err(e) => {
                error!(error = %e, "agent listing failed");
                Vec::new()
            }
        }
    }

    /// Fetch one identity. Always refreshes the permission cache from disk,
    /// even when the identity itself is cached.
    pub async fn get(&self, agent_id: &str) -> Option<AgentIdentity> {
        let mut state = self.state.lock().await;
        state.permissions.remove(agent_id);
        state.load_permissions(agent_id);
        state.load_identity(agent_id)
    }

    /// The agent's current permission rows.
    pub async fn permissions(&self, agent_id: &str) -> Vec<Permission> {
        let mut state = self.state.lock().await;
        state.load_permissions(agent_id)
    }

    /// Agents holding any access to `resource`, via any action.
    pub async fn find_agents_with_access(&self, resource: &str) -> Vec<String> {
        const PROBES: [Action; 5] = [
            Action::Read,
            Action::Write,
            Action::Execute,
            Action::Use,
            Action::Any,
        ];
        let mut state = self.state.lock().await;
        let ids: Vec<String> = {
            let result: rusqlite::Result<Vec<String>> = (|| {
                let mut stmt = state
                    .conn
                    .prepare("SELECT DISTINCT agent_id FROM iam_permissions ORDER BY agent_id")?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect()
            })();
            match result {
                Ok(ids) => ids,
                Err(e) => {
                    error!(error = %e, "agent enumeration failed");
                    return Vec::new();
                }
            }
        };
        ids.into_iter()
            .filter(|id| PROBES.iter().any(|&action| state.check(id, resource, action)))
            .collect()
    }

    /// Access-log query, newest first. `resource` is a SQL-LIKE filter with
    /// `*` translated to `%`.
    pub async fn get_access_log(
        &self,
        agent_id: Option<&str>,
        resource: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Vec<AccessLogEntry> {
        let state = self.state.lock().await;
        let like = resource.map(|r| r.replace('*', "%"));

        let mut query = String::from(
            "SELECT agent_id, resource, action, timestamp, allowed, reason FROM iam_access_log",
        );
        let mut clauses = Vec::new();
        let mut args: Vec<&dyn rusqlite::ToSql> = Vec::new();
        if let Some(agent) = &agent_id {
            clauses.push(format!("agent_id = ?{}", args.len() + 1));
            args.push(agent);
        }
        if let Some(like) = &like {
            clauses.push(format!("resource LIKE ?{}", args.len() + 1));
            args.push(like);
        }
        if !clauses.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&clauses.join(" AND "));
        }
        query.push_str(&format!(
            " ORDER BY timestamp DESC, id DESC LIMIT {limit} OFFSET {offset}"
        ));

        let result: rusqlite::Result<Vec<AccessLogEntry>> = (|| {
            let mut stmt = state.conn.prepare(&query)?;
            let rows = stmt.query_map(args.as_slice(), |row| {
                let allowed: i64 = row.get(4)?;
                Ok(AccessLogEntry {
                    agent_id: row.get(0)?,
                    resource: row.get(1)?,
                    action: row.get(2)?,
                    timestamp: row.get(3)?,
                    allowed: allowed != 0,
                    reason: row.get(5)?,
                })
            })?;
            rows.collect()
        })();
        match result {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "access log query failed");
                Vec::new()
            }
        }
    }

    /// Delete access-log rows older than the retention window.
    #[instrument(skip(self))]
    pub async fn prune(&self, older_than_days: u32) -> GatewayResult<usize> {
        let cutoff = unix_now() - f64::from(older_than_days) * 86_400.0;
        let state = self.state.lock().await;
        let deleted = state
            .conn
            .execute(
                "DELETE FROM iam_access_log WHERE timestamp < ?1",
                params![cutoff],
            )
            .map_err(|e| GatewayError::Storage(e.to_string()))?;
        debug!(deleted, older_than_days, "pruned access log");
        Ok(deleted)
    }

    /// One-shot bootstrap step: register every registry agent absent from
    /// the identity table and install its access-level default grants with
    /// grantor `migration`, then score it. Existing identities are left
    /// untouched. Returns the number of agents migrated.
    #[instrument(skip(self, agents), fields(candidates = agents.len()))]
    pub async fn auto_migrate_existing_agents(
        &self,
        agents: &[AgentConfig],
    ) -> GatewayResult<usize> {
        let mut migrated = 0;
        for agent in agents {
            let id = agent.id.as_str();
            let exists = {
                let mut state = self.state.lock().await;
                state.load_identity(id).is_some()
            };
            if exists {
                continue;
            }
            self.register(id, "", "registry agent").await?;
            for grant in agent.access_level.default_grants() {
                self.grant(id, &grant.resource, &grant.actions, "migration")
                    .await?;
            }
            self.calculate_risk(id).await;
            migrated += 1;
        }
        Ok(migrated)
    }

}

impl std::fmt::Debug for IamEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IamEngine").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn engine() -> IamEngine {
        IamEngine::in_memory(Arc::new(EventBus::in_memory(100))).unwrap()
    }

    #[tokio::test]
    async fn register_is_idempotent() -> anyhow::Result<()> {
        let iam = engine().await;
        iam.register("a1", "", "test").await?;
        iam.register("a1", "other", "changed").await?;

        let agents = iam.list_agents(None).await;
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].owner, "");
        Ok(())
    }

    #[tokio::test]
    async fn grant_is_visible_to_the_next_check() -> anyhow::Result<()> {
        let iam = engine().await;
        iam.register("a1", "", "test").await?;
        assert!(!iam.check("a1", "tool:web_search", Action::Use).await);

        iam.grant("a1", "tool:*", &[Action::Use], "tester").await?;
        assert!(iam.check("a1", "tool:web_search", Action::Use).await);
        assert!(!iam.check("a1", "tool:web_search", Action::Execute).await);
        Ok(())
    }

    #[tokio::test]
    async fn grant_replaces_prior_actions_for_same_resource() -> anyhow::Result<()> {
        let iam = engine().await;
        iam.grant("a1", "file:*", &[Action::Read], "tester").await?;
        iam.grant("a1", "file:*", &[Action::Write], "tester").await?;

        let perms = iam.permissions("a1").await;
        assert_eq!(perms.len(), 1);
        assert_eq!(perms[0].actions, vec![Action::Write]);
        assert!(!iam.check("a1", "file:/notes", Action::Read).await);
        assert!(iam.check("a1", "file:/notes", Action::Write).await);
        Ok(())
    }

    #[tokio::test]
    async fn empty_grant_inputs_are_ignored() -> anyhow::Result<()> {
        let iam = engine().await;
        iam.grant("", "file:*", &[Action::Read], "t").await?;
        iam.grant("a1", "", &[Action::Read], "t").await?;
        iam.grant("a1", "file:*", &[], "t").await?;
        assert!(iam.permissions("a1").await.is_empty());
        assert!(iam.list_agents(None).await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn revoke_removes_the_row_and_the_access() -> anyhow::Result<()> {
        let iam = engine().await;
        iam.grant("a1", "file:*", &[Action::Read], "t").await?;
        iam.revoke("a1", "file:*").await?;
        assert!(iam.permissions("a1").await.is_empty());
        assert!(!iam.check("a1", "file:/notes", Action::Read).await);
        Ok(())
    }

    #[tokio::test]
    async fn remove_cascades_permissions() -> anyhow::Result<()> {
        let iam = engine().await;
        iam.grant("a1", "file:*", &[Action::Read], "t").await?;
        iam.remove("a1").await?;
        assert!(iam.get("a1").await.is_none());
        assert!(iam.permissions("a1").await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn denied_check_is_logged_with_reason() -> anyhow::Result<()> {
        let iam = engine().await;
        iam.register("a1", "", "test").await?;

        let allowed = iam.check_and_log("a1", "tool:run_command", Action::Execute).await;
        assert!(!allowed);

        let log = iam.get_access_log(Some("a1"), None, 10, 0).await;
        assert_eq!(log.len(), 1);
        assert!(!log[0].allowed);
        assert_eq!(
            log[0].reason.as_deref(),
            Some("No matching permission for execute on tool:run_command")
        );
        Ok(())
    }

    #[tokio::test]
    async fn denied_check_publishes_a_bus_warning() -> anyhow::Result<()> {
        let bus = Arc::new(EventBus::in_memory(100));
        let iam = IamEngine::in_memory(bus.clone())?;
        iam.check_and_log("a1", "file:/secret", Action::Read).await;

        let events = bus.recent_events(10, Some("iam.access.denied"));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["agent_id"], "a1");
        Ok(())
    }

    #[tokio::test]
    async fn full_level_wildcard_allows_everything() -> anyhow::Result<()> {
        let iam = engine().await;
        iam.grant("root", "*", &[Action::Any], "t").await?;
        assert!(iam.check("root", "anything:at-all", Action::Execute).await);
        assert!(iam.check("root", "*", Action::Any).await);
        Ok(())
    }

    #[tokio::test]
    async fn find_agents_with_access_probes_all_actions() -> anyhow::Result<()> {
        let iam = engine().await;
        iam.grant("reader", "file:*", &[Action::Read], "t").await?;
        iam.grant("runner", "tool:*", &[Action::Use], "t").await?;
        iam.grant("admin", "*", &[Action::Any], "t").await?;

        let mut with_file = iam.find_agents_with_access("file:/notes").await;
        with_file.sort();
        assert_eq!(with_file, ["admin", "reader"]);

        let with_tool = iam.find_agents_with_access("tool:clipboard").await;
        assert_eq!(with_tool, ["admin", "runner"]);
        Ok(())
    }

    #[tokio::test]
    async fn access_log_filters_translate_star_to_like() -> anyhow::Result<()> {
        let iam = engine().await;
        iam.log("a1", "tool:web_search", "use", true, None).await?;
        iam.log("a1", "file:/notes", "read", true, None).await?;
        iam.log("a2", "tool:clipboard", "use", false, Some("nope")).await?;

        let tools = iam.get_access_log(None, Some("tool:*"), 10, 0).await;
        assert_eq!(tools.len(), 2);

        let a1_tools = iam.get_access_log(Some("a1"), Some("tool:*"), 10, 0).await;
        assert_eq!(a1_tools.len(), 1);
        assert_eq!(a1_tools[0].resource, "tool:web_search");

        let paged = iam.get_access_log(None, None, 2, 2).await;
        assert_eq!(paged.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn prune_deletes_only_old_rows() -> anyhow::Result<()> {
        let iam = engine().await;
        {
            let state = iam.state.lock().await;
            state.conn.execute(
                "INSERT INTO iam_access_log (agent_id, resource, action, timestamp, allowed, reason)
                 VALUES ('a1', 'file:/x', 'read', ?1, 1, NULL)",
                params![unix_now() - 40.0 * 86_400.0],
            )?;
        }
        iam.log("a1", "file:/y", "read", true, None).await?;

        let deleted = iam.prune(30).await?;
        assert_eq!(deleted, 1);
        let rest = iam.get_access_log(None, None, 10, 0).await;
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].resource, "file:/y");
        Ok(())
    }

    #[tokio::test]
    async fn migration_installs_exec_defaults() -> anyhow::Result<()> {
        use torbo_protocol::{AccessLevel, AgentId};
        let iam = engine().await;
        let agent = AgentConfig {
            id: AgentId::from_string("a1"),
            access_level: AccessLevel::Exec,
            ..AgentConfig::default()
        };

        let migrated = iam.auto_migrate_existing_agents(&[agent.clone()]).await?;
        assert_eq!(migrated, 1);
        assert!(iam.check("a1", "tool:execute_code", Action::Execute).await);
        assert!(!iam.check("a1", "*", Action::Any).await);

        let perms = iam.permissions("a1").await;
        assert!(perms.iter().all(|p| p.granted_by == "migration"));
        let identity = iam.get("a1").await.unwrap();
        assert!(identity.risk_score > 0.0);

        // Second run skips the existing identity.
        let migrated_again = iam.auto_migrate_existing_agents(&[agent]).await?;
        assert_eq!(migrated_again, 0);
        Ok(())
    }

    #[tokio::test]
    async fn off_level_yields_no_grants_and_denies_everything() -> anyhow::Result<()> {
        use torbo_protocol::{AccessLevel, AgentId};
        let iam = engine().await;
        let agent = AgentConfig {
            id: AgentId::from_string("muted"),
            access_level: AccessLevel::Off,
            ..AgentConfig::default()
        };
        iam.auto_migrate_existing_agents(&[agent]).await?;
        assert!(iam.permissions("muted").await.is_empty());
        assert!(!iam.check("muted", "tool:web_search", Action::Use).await);
        Ok(())
    }
}
