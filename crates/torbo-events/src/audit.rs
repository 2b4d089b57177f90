//! Durable storage for the critical-event subset.

use rusqlite::{Connection, params};
use tokio::sync::Mutex;
use torbo_protocol::{AuditEventRecord, BusEvent, GatewayError, GatewayResult, Severity};
use tracing::instrument;

/// SQLite-backed audit table. All access is serialized through one
/// connection owned by this store.
pub struct AuditStore {
    conn: Mutex<Connection>,
}

impl AuditStore {
    /// Open (or create) the audit database at `path`.
    pub fn open(path: impl AsRef<std::path::Path>) -> GatewayResult<Self> {
        let conn =
            Connection::open(path).map_err(|e| GatewayError::Storage(e.to_string()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| GatewayError::Storage(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS audit_events (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 topic TEXT NOT NULL,
                 payload_json TEXT NOT NULL,
                 source TEXT NOT NULL,
                 severity TEXT NOT NULL,
                 timestamp REAL NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_audit_events_topic ON audit_events(topic);
             CREATE INDEX IF NOT EXISTS idx_audit_events_timestamp ON audit_events(timestamp);",
        )
        .map_err(|e| GatewayError::Storage(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn in_memory() -> GatewayResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| GatewayError::Storage(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS audit_events (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 topic TEXT NOT NULL,
                 payload_json TEXT NOT NULL,
                 source TEXT NOT NULL,
                 severity TEXT NOT NULL,
                 timestamp REAL NOT NULL
             );",
        )
        .map_err(|e| GatewayError::Storage(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Persist one critical event with its derived severity.
    #[instrument(skip(self, event), fields(topic = %event.name))]
    pub async fn record(&self, event: &BusEvent, severity: Severity) -> GatewayResult<()> {
        let payload_json = serde_json::to_string(&event.payload)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO audit_events (topic, payload_json, source, severity, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.name,
                payload_json,
                event.source,
                severity.as_str(),
                event.timestamp
            ],
        )
        .map_err(|e| GatewayError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Most recent persisted records, optionally filtered by exact topic.
    pub async fn recent(
        &self,
        limit: usize,
        topic: Option<&str>,
    ) -> GatewayResult<Vec<AuditEventRecord>> {
        let conn = self.conn.lock().await;
        let mut query = String::from(
            "SELECT id, topic, payload_json, source, severity, timestamp FROM audit_events",
        );
        if topic.is_some() {
            query.push_str(" WHERE topic = ?1");
        }
        query.push_str(" ORDER BY timestamp DESC, id DESC LIMIT ");
        query.push_str(&limit.to_string());

        let mut stmt = conn
            .prepare(&query)
            .map_err(|e| GatewayError::Storage(e.to_string()))?;

        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<AuditEventRecord> {
            let severity: String = row.get(4)?;
            Ok(AuditEventRecord {
                id: row.get(0)?,
                topic: row.get(1)?,
                payload_json: row.get(2)?,
                source: row.get(3)?,
                severity: Severity::parse(&severity).unwrap_or(Severity::Info),
                timestamp: row.get(5)?,
            })
        };

        let rows = match topic {
            Some(name) => stmt.query_map(params![name], map_row),
            None => stmt.query_map([], map_row),
        }
        .map_err(|e| GatewayError::Storage(e.to_string()))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(|e| GatewayError::Storage(e.to_string()))?);
        }
        Ok(records)
    }
}

impl std::fmt::Debug for AuditStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditStore").finish_non_exhaustive()
    }
}
