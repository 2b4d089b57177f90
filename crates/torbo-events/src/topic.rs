//! Topic pattern matching and the critical-event allow-list.

/// Whether a subscription pattern matches an event name.
///
/// Three forms only: `*` matches everything, `prefix.*` matches `prefix`
/// and every name under it, anything else is an exact match.
pub fn topic_matches(pattern: &str, name: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return name == prefix || name.starts_with(&format!("{prefix}."));
    }
    pattern == name
}

/// Exact topic names that are always persisted to the audit table.
const CRITICAL_EXACT: &[&str] = &[
    "iam.access.denied",
    "commitment.made",
    "homekit.anomaly",
    "agent.error",
    "relationship.flag",
    "memory.forget",
    "delegation.failed",
    "delegation.timeout",
    "system.error",
];

/// Topic prefixes whose whole subtree is persisted.
const CRITICAL_PREFIXES: &[&str] = &["security.", "escalation.", "iam.anomaly."];

/// Whether an event name belongs to the audit-worthy critical set.
pub fn is_critical_topic(name: &str) -> bool {
    CRITICAL_EXACT.contains(&name)
        || CRITICAL_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
}
