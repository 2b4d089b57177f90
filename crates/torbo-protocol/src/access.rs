//! Access levels, actions, and the default permission table.
//!
//! An access level is a coarse capability tier assigned to an agent; the
//! IAM engine expands it into concrete `(resource, actions)` grants when an
//! agent is first migrated into the permission store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The capability ladder: 0 OFF … 5 FULL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum AccessLevel {
    Off = 0,
    Chat = 1,
    Read = 2,
    Write = 3,
    Exec = 4,
    Full = 5,
}

impl AccessLevel {
    /// All levels in ascending order.
    pub const ALL: [AccessLevel; 6] = [
        AccessLevel::Off,
        AccessLevel::Chat,
        AccessLevel::Read,
        AccessLevel::Write,
        AccessLevel::Exec,
        AccessLevel::Full,
    ];

    /// Numeric tier (0..=5).
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// The level for a numeric tier, if in range.
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(usize::from(value)).copied()
    }

    /// User-visible name of this level.
    pub fn name(self) -> &'static str {
        match self {
            AccessLevel::Off => "OFF",
            AccessLevel::Chat => "CHAT",
            AccessLevel::Read => "READ",
            AccessLevel::Write => "WRITE",
            AccessLevel::Exec => "EXEC",
            AccessLevel::Full => "FULL",
        }
    }

    /// User-visible name for an arbitrary index; `UNKNOWN` outside 0..=5.
    pub fn name_for_index(index: i64) -> &'static str {
        u8::try_from(index)
            .ok()
            .and_then(Self::from_u8)
            .map_or("UNKNOWN", Self::name)
    }

    /// This level clamped to a process-wide maximum.
    pub fn capped(self, max: AccessLevel) -> AccessLevel {
        self.min(max)
    }
}

impl From<AccessLevel> for u8 {
    fn from(level: AccessLevel) -> u8 {
        level.as_u8()
    }
}

impl TryFrom<u8> for AccessLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_u8(value).ok_or_else(|| format!("access level out of range: {value}"))
    }
}

impl Default for AccessLevel {
    fn default() -> Self {
        AccessLevel::Chat
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One of the recognized actions on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Write,
    Execute,
    Use,
    /// Wildcard: every action.
    #[serde(rename = "*")]
    Any,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::Execute => "execute",
            Action::Use => "use",
            Action::Any => "*",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "read" => Some(Action::Read),
            "write" => Some(Action::Write),
            "execute" => Some(Action::Execute),
            "use" => Some(Action::Use),
            "*" => Some(Action::Any),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Serialize an action set as the stored wire form: sorted, comma-separated.
pub fn actions_to_csv(actions: &[Action]) -> String {
    let mut names: Vec<&str> = actions.iter().map(|a| a.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    names.join(",")
}

/// Parse the stored comma-separated form, skipping unrecognized entries.
pub fn actions_from_csv(csv: &str) -> Vec<Action> {
    csv.split(',')
        .filter_map(|part| Action::parse(part.trim()))
        .collect()
}

/// A `(resource pattern, actions)` pair in the default permission table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub resource: String,
    pub actions: Vec<Action>,
}

impl PermissionGrant {
    pub fn new(resource: impl Into<String>, actions: impl Into<Vec<Action>>) -> Self {
        Self {
            resource: resource.into(),
            actions: actions.into(),
        }
    }
}

impl AccessLevel {
    /// The default grants installed for an agent at this level.
    ///
    /// Levels 1..=4 are cumulative; FULL collapses to the single wildcard
    /// grant. Grants for the same resource are merged so later installs
    /// never clobber an earlier action set.
    pub fn default_grants(self) -> Vec<PermissionGrant> {
        use Action::{Any, Execute, Read, Use, Write};

        match self {
            AccessLevel::Off => Vec::new(),
            AccessLevel::Full => vec![PermissionGrant::new("*", [Any])],
            level => {
                let mut grants = vec![
                    PermissionGrant::new("tool:web_search", [Use]),
                    PermissionGrant::new("tool:web_fetch", [Use]),
                ];
                if level >= AccessLevel::Read {
                    let file_actions = if level >= AccessLevel::Write {
                        vec![Read, Write]
                    } else {
                        vec![Read]
                    };
                    grants.push(PermissionGrant::new("file:*", file_actions));
                    grants.push(PermissionGrant::new("tool:list_directory", [Use]));
                    grants.push(PermissionGrant::new("tool:read_file", [Use]));
                    grants.push(PermissionGrant::new("tool:search_files", [Use]));
                    grants.push(PermissionGrant::new("tool:screenshot", [Use]));
                }
                if level >= AccessLevel::Write {
                    grants.push(PermissionGrant::new("tool:write_file", [Use]));
                    grants.push(PermissionGrant::new("tool:clipboard", [Use]));
                }
                if level >= AccessLevel::Exec {
                    grants.push(PermissionGrant::new("tool:*", [Use]));
                    grants.push(PermissionGrant::new("tool:run_command", [Use, Execute]));
                    grants.push(PermissionGrant::new("tool:execute_code", [Use, Execute]));
                }
                grants
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_cover_the_table() {
        let names: Vec<&str> = AccessLevel::ALL.iter().map(|l| l.name()).collect();
        assert_eq!(names, ["OFF", "CHAT", "READ", "WRITE", "EXEC", "FULL"]);
    }

    #[test]
    fn name_for_index_out_of_range_is_unknown() {
        assert_eq!(AccessLevel::name_for_index(-1), "UNKNOWN");
        assert_eq!(AccessLevel::name_for_index(6), "UNKNOWN");
        assert_eq!(AccessLevel::name_for_index(4), "EXEC");
    }

    #[test]
    fn level_serde_is_numeric() {
        let json = serde_json::to_string(&AccessLevel::Exec).unwrap();
        assert_eq!(json, "4");
        let back: AccessLevel = serde_json::from_str("2").unwrap();
        assert_eq!(back, AccessLevel::Read);
        assert!(serde_json::from_str::<AccessLevel>("9").is_err());
    }

    #[test]
    fn capped_never_raises() {
        assert_eq!(
            AccessLevel::Full.capped(AccessLevel::Write),
            AccessLevel::Write
        );
        assert_eq!(
            AccessLevel::Chat.capped(AccessLevel::Write),
            AccessLevel::Chat
        );
    }

    #[test]
    fn actions_csv_is_sorted_and_deduped() {
        let csv = actions_to_csv(&[Action::Write, Action::Read, Action::Write]);
        assert_eq!(csv, "read,write");
        let csv = actions_to_csv(&[Action::Use, Action::Any, Action::Execute]);
        assert_eq!(csv, "*,execute,use");
    }

    #[test]
    fn actions_csv_roundtrip_skips_junk() {
        let actions = actions_from_csv("read, write,launch_missiles,*");
        assert_eq!(actions, vec![Action::Read, Action::Write, Action::Any]);
    }

    #[test]
    fn off_grants_nothing() {
        assert!(AccessLevel::Off.default_grants().is_empty());
    }

    #[test]
    fn full_is_the_single_wildcard_grant() {
        let grants = AccessLevel::Full.default_grants();
        assert_eq!(grants, vec![PermissionGrant::new("*", [Action::Any])]);
    }

    #[test]
    fn write_level_merges_file_actions() {
        let grants = AccessLevel::Write.default_grants();
        let file = grants
            .iter()
            .find(|g| g.resource == "file:*")
            .expect("file grant present");
        assert_eq!(file.actions, vec![Action::Read, Action::Write]);
        assert!(grants.iter().all(|g| g.resource != "tool:run_command"));
    }

    #[test]
    fn exec_level_includes_command_tools() {
        let grants = AccessLevel::Exec.default_grants();
        let run = grants
            .iter()
            .find(|g| g.resource == "tool:run_command")
            .expect("run_command grant present");
        assert_eq!(run.actions, vec![Action::Use, Action::Execute]);
        assert!(grants.iter().any(|g| g.resource == "tool:*"));
        assert!(grants.iter().all(|g| g.resource != "*"));
    }
}
