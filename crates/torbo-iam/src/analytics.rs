//! Risk scoring and anomaly detection over the access log.

use rusqlite::params;
use torbo_protocol::Action;
use tracing::{error, instrument};

use crate::engine::{IamEngine, unix_now};
use crate::types::{Anomaly, AnomalySeverity, AnomalyType};

const DAY_SECONDS: f64 = 86_400.0;

impl IamEngine {
    /// Recompute and persist the agent's risk score in [0.0, 1.0].
    ///
    /// Additive factors, clamped: wildcard resource grant, permission
    /// count, execute/write capability, recent denial volume, recent total
    /// volume. The identity cache entry is rebuilt with the new value.
    #[instrument(skip(self))]
    pub async fn calculate_risk(&self, agent_id: &str) -> f64 {
        let mut state = self.state.lock().await;
        let perms = state.load_permissions(agent_id);

        let mut score: f64 = 0.0;
        if perms.iter().any(|p| p.resource == "*") {
            score += 0.30;
        }
        if perms.len() > 10 {
            score += 0.15;
        } else if perms.len() > 5 {
            score += 0.10;
        }
        if perms.iter().any(|p| p.actions.contains(&Action::Execute)) {
            score += 0.20;
        }
        if perms.iter().any(|p| p.actions.contains(&Action::Write)) {
            score += 0.10;
        }

        let day_ago = unix_now() - DAY_SECONDS;
        let denied = count_rows(
            &state.conn,
            "SELECT COUNT(*) FROM iam_access_log
             WHERE agent_id = ?1 AND allowed = 0 AND timestamp > ?2",
            agent_id,
            day_ago,
        );
        if denied > 20 {
            score += 0.20;
        } else if denied > 5 {
            score += 0.10;
        }

        let total = count_rows(
            &state.conn,
            "SELECT COUNT(*) FROM iam_access_log
             WHERE agent_id = ?1 AND timestamp > ?2",
            agent_id,
            day_ago,
        );
        if total > 1000 {
            score += 0.10;
        }

        let score = score.clamp(0.0, 1.0);
        if let Err(e) = state.conn.execute(
            "UPDATE agent_identities SET risk_score = ?1 WHERE id = ?2",
            params![score, agent_id],
        ) {
            error!(error = %e, agent_id, "failed to persist risk score");
        }
        state.refresh_identity(agent_id);
        score
    }

    /// Scan the access log for the four anomaly patterns. Pull-based and
    /// side-effect free; nothing is persisted or published.
    #[instrument(skip(self))]
    pub async fn detect_anomalies(&self) -> Vec<Anomaly> {
        let state = self.state.lock().await;
        let now = unix_now();
        let mut anomalies = Vec::new();

        // Rapid access: more than 100 log entries per agent in 60 seconds.
        collect_grouped(
            &state.conn,
            "SELECT agent_id, COUNT(*) FROM iam_access_log
             WHERE timestamp > ?1 GROUP BY agent_id HAVING COUNT(*) > 100",
            now - 60.0,
            &mut anomalies,
            |agent_id, count| Anomaly {
                agent_id,
                kind: AnomalyType::RapidAccess,
                description: format!("{count} accesses in the last 60 seconds"),
                severity: if count > 500 {
                    AnomalySeverity::Critical
                } else {
                    AnomalySeverity::High
                },
                detected_at: now,
            },
        );

        // Denied spike: more than 10 denials per agent in 5 minutes.
        collect_grouped(
            &state.conn,
            "SELECT agent_id, COUNT(*) FROM iam_access_log
             WHERE allowed = 0 AND timestamp > ?1
             GROUP BY agent_id HAVING COUNT(*) > 10",
            now - 300.0,
            &mut anomalies,
            |agent_id, count| Anomaly {
                agent_id,
                kind: AnomalyType::DeniedSpike,
                description: format!("{count} denied accesses in the last 5 minutes"),
                severity: if count > 50 {
                    AnomalySeverity::Critical
                } else {
                    AnomalySeverity::Medium
                },
                detected_at: now,
            },
        );

        // Unusual resource: first-ever access inside the last 24 hours.
        let result: rusqlite::Result<()> = (|| {
            let mut stmt = state.conn.prepare(
                "SELECT agent_id, resource, MIN(timestamp) AS first_seen
                 FROM iam_access_log
                 GROUP BY agent_id, resource
                 HAVING first_seen > ?1",
            )?;
            let rows = stmt.query_map(params![now - DAY_SECONDS], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (agent_id, resource) = row?;
                anomalies.push(Anomaly {
                    agent_id,
                    kind: AnomalyType::UnusualResource,
                    description: format!("first access to {resource} in the last 24 hours"),
                    severity: AnomalySeverity::Low,
                    detected_at: now,
                });
            }
            Ok(())
        })();
        if let Err(e) = result {
            error!(error = %e, "unusual resource scan failed");
        }

        // Privilege escalation: repeated denied attempts at execution
        // surfaces within the last hour.
        collect_grouped(
            &state.conn,
            "SELECT agent_id, COUNT(*) FROM iam_access_log
             WHERE allowed = 0 AND timestamp > ?1
               AND (resource LIKE 'tool:execute_%'
                    OR resource LIKE 'tool:run_%'
                    OR action = 'execute')
             GROUP BY agent_id HAVING COUNT(*) > 5",
            now - 3_600.0,
            &mut anomalies,
            |agent_id, count| Anomaly {
                agent_id,
                kind: AnomalyType::PrivilegeEscalation,
                description: format!("{count} denied execution attempts in the last hour"),
                severity: AnomalySeverity::High,
                detected_at: now,
            },
        );

        anomalies
    }
}

fn count_rows(conn: &rusqlite::Connection, sql: &str, agent_id: &str, since: f64) -> i64 {
    match conn.query_row(sql, params![agent_id, since], |row| row.get(0)) {
        Ok(count) => count,
        Err(e) => {
            error!(error = %e, agent_id, "access log count failed");
            0
        }
    }
}

fn collect_grouped(
    conn: &rusqlite::Connection,
    sql: &str,
    since: f64,
    out: &mut Vec<Anomaly>,
    build: impl Fn(String, i64) -> Anomaly,
) {
    let result: rusqlite::Result<()> = (|| {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![since], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (agent_id, count) = row?;
            out.push(build(agent_id, count));
        }
        Ok(())
    })();
    if let Err(e) = result {
        error!(error = %e, "anomaly scan failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use torbo_events::EventBus;

    async fn engine() -> IamEngine {
        IamEngine::in_memory(Arc::new(EventBus::in_memory(100))).unwrap()
    }

    async fn insert_log(
        iam: &IamEngine,
        agent: &str,
        resource: &str,
        action: &str,
        age_seconds: f64,
        allowed: bool,
    ) {
        let state = iam.state.lock().await;
        state
            .conn
            .execute(
                "INSERT INTO iam_access_log (agent_id, resource, action, timestamp, allowed, reason)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
                params![agent, resource, action, unix_now() - age_seconds, allowed as i64],
            )
            .unwrap();
    }

    #[tokio::test]
    async fn risk_adds_wildcard_execute_and_write_factors() -> anyhow::Result<()> {
        let iam = engine().await;
        iam.grant("a1", "*", &[Action::Any], "t").await?;
        iam.grant("a1", "tool:run_command", &[Action::Execute], "t").await?;
        iam.grant("a1", "file:*", &[Action::Write], "t").await?;

        let score = iam.calculate_risk("a1").await;
        assert!((score - 0.60).abs() < 1e-9);

        let identity = iam.get("a1").await.unwrap();
        assert!((identity.risk_score - 0.60).abs() < 1e-9);
        Ok(())
    }

    #[tokio::test]
    async fn risk_counts_recent_denials() -> anyhow::Result<()> {
        let iam = engine().await;
        iam.register("a1", "", "t").await?;
        for _ in 0..6 {
            insert_log(&iam, "a1", "tool:x", "use", 10.0, false).await;
        }
        let score = iam.calculate_risk("a1").await;
        assert!((score - 0.10).abs() < 1e-9);

        for _ in 0..15 {
            insert_log(&iam, "a1", "tool:x", "use", 10.0, false).await;
        }
        let score = iam.calculate_risk("a1").await;
        assert!((score - 0.20).abs() < 1e-9);
        Ok(())
    }

    #[tokio::test]
    async fn risk_is_clamped_to_one() -> anyhow::Result<()> {
        let iam = engine().await;
        iam.grant("a1", "*", &[Action::Any], "t").await?;
        iam.grant("a1", "tool:run", &[Action::Execute], "t").await?;
        iam.grant("a1", "file:*", &[Action::Write], "t").await?;
        for i in 0..9 {
            iam.grant("a1", &format!("tool:extra_{i}"), &[Action::Use], "t").await?;
        }
        for _ in 0..25 {
            insert_log(&iam, "a1", "tool:x", "use", 5.0, false).await;
        }
        for _ in 0..1000 {
            insert_log(&iam, "a1", "tool:y", "use", 5.0, true).await;
        }

        let score = iam.calculate_risk("a1").await;
        assert!((score - 1.0).abs() < 1e-9);
        Ok(())
    }

    #[tokio::test]
    async fn rapid_access_fires_above_one_hundred() -> anyhow::Result<()> {
        let iam = engine().await;
        for _ in 0..100 {
            insert_log(&iam, "a1", "tool:x", "use", 1.0, true).await;
        }
        let none = iam.detect_anomalies().await;
        assert!(none.iter().all(|a| a.kind != AnomalyType::RapidAccess));

        insert_log(&iam, "a1", "tool:x", "use", 1.0, true).await;
        let anomalies = iam.detect_anomalies().await;
        let rapid = anomalies
            .iter()
            .find(|a| a.kind == AnomalyType::RapidAccess)
            .expect("rapid access flagged");
        assert_eq!(rapid.agent_id, "a1");
        assert_eq!(rapid.severity, AnomalySeverity::High);
        Ok(())
    }

    #[tokio::test]
    async fn denied_spike_escalates_to_critical() -> anyhow::Result<()> {
        let iam = engine().await;
        for _ in 0..51 {
            insert_log(&iam, "a1", "file:/vault", "read", 30.0, false).await;
        }
        let anomalies = iam.detect_anomalies().await;
        let spike = anomalies
            .iter()
            .find(|a| a.kind == AnomalyType::DeniedSpike)
            .expect("denied spike flagged");
        assert_eq!(spike.severity, AnomalySeverity::Critical);
        Ok(())
    }

    #[tokio::test]
    async fn unusual_resource_requires_no_prior_history() -> anyhow::Result<()> {
        let iam = engine().await;
        insert_log(&iam, "a1", "file:/old", "read", 2.0 * 86_400.0, true).await;
        insert_log(&iam, "a1", "file:/old", "read", 10.0, true).await;
        insert_log(&iam, "a1", "file:/new", "read", 10.0, true).await;

        let anomalies = iam.detect_anomalies().await;
        let unusual: Vec<&Anomaly> = anomalies
            .iter()
            .filter(|a| a.kind == AnomalyType::UnusualResource)
            .collect();
        assert_eq!(unusual.len(), 1);
        assert!(unusual[0].description.contains("file:/new"));
        assert_eq!(unusual[0].severity, AnomalySeverity::Low);
        Ok(())
    }

    #[tokio::test]
    async fn privilege_escalation_flags_denied_execution_probes() -> anyhow::Result<()> {
        let iam = engine().await;
        iam.register("a1", "", "t").await?;
        for _ in 0..6 {
            insert_log(&iam, "a1", "tool:execute_code", "execute", 60.0, false).await;
        }

        let anomalies = iam.detect_anomalies().await;
        let escalation = anomalies
            .iter()
            .find(|a| a.kind == AnomalyType::PrivilegeEscalation)
            .expect("escalation flagged");
        assert_eq!(escalation.agent_id, "a1");
        assert_eq!(escalation.severity, AnomalySeverity::High);
        Ok(())
    }
}
