//! The persisted per-agent persona document.
//!
//! One JSON document per agent under `agents/<id>.json`. Readers tolerate
//! missing optional fields; unknown fields are dropped on re-write.

use crate::access::AccessLevel;
use crate::ids::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An agent persona: identity, voice, access level, and scoping.
///
/// Capability toggles are a name → bool map; a missing key means the
/// capability is enabled. Empty `directory_scopes` means unrestricted within
/// the sandbox; empty `enabled_skill_ids` means all skills.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    pub id: AgentId,
    pub is_built_in: bool,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub pronouns: String,
    pub role: String,
    pub voice_tone: String,
    pub personality_preset: String,
    pub core_values: String,
    pub topics_to_avoid: Vec<String>,
    pub custom_instructions: String,
    pub background_knowledge: String,
    #[serde(rename = "elevenLabsVoiceID")]
    pub eleven_labs_voice_id: String,
    #[serde(rename = "fallbackTTSVoice")]
    pub fallback_tts_voice: String,
    pub access_level: AccessLevel,
    pub directory_scopes: Vec<String>,
    #[serde(rename = "enabledSkillIDs")]
    pub enabled_skill_ids: Vec<String>,
    pub enabled_capabilities: BTreeMap<String, bool>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: AgentId::from_string(""),
            is_built_in: false,
            created_at: Utc::now(),
            name: String::new(),
            pronouns: String::new(),
            role: String::new(),
            voice_tone: String::new(),
            personality_preset: String::new(),
            core_values: String::new(),
            topics_to_avoid: Vec::new(),
            custom_instructions: String::new(),
            background_knowledge: String::new(),
            eleven_labs_voice_id: String::new(),
            fallback_tts_voice: String::new(),
            access_level: AccessLevel::default(),
            directory_scopes: Vec::new(),
            enabled_skill_ids: Vec::new(),
            enabled_capabilities: BTreeMap::new(),
        }
    }
}

impl AgentConfig {
    /// Whether a capability category is enabled. Missing keys are enabled.
    pub fn capability_enabled(&self, category: &str) -> bool {
        self.enabled_capabilities.get(category).copied().unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_uses_the_external_key_names() {
        let mut agent = AgentConfig {
            id: AgentId::from_string("torbo"),
            name: "Torbo".to_owned(),
            eleven_labs_voice_id: "voice-1".to_owned(),
            fallback_tts_voice: "samantha".to_owned(),
            enabled_skill_ids: vec!["s1".to_owned()],
            ..AgentConfig::default()
        };
        agent.enabled_capabilities.insert("homekit".to_owned(), false);

        let json = serde_json::to_value(&agent).unwrap();
        assert_eq!(json["id"], "torbo");
        assert!(json["elevenLabsVoiceID"].is_string());
        assert!(json["fallbackTTSVoice"].is_string());
        assert!(json["enabledSkillIDs"].is_array());
        assert!(json["isBuiltIn"].is_boolean());
        assert!(json["accessLevel"].is_number());
        assert_eq!(json["enabledCapabilities"]["homekit"], false);
    }

    #[test]
    fn missing_optional_fields_are_tolerated() {
        let agent: AgentConfig =
            serde_json::from_str(r#"{"id": "minimal", "accessLevel": 3}"#).unwrap();
        assert_eq!(agent.id.as_str(), "minimal");
        assert_eq!(agent.access_level, AccessLevel::Write);
        assert!(agent.directory_scopes.is_empty());
        assert!(agent.enabled_capabilities.is_empty());
        assert!(!agent.is_built_in);
    }

    #[test]
    fn capability_defaults_to_enabled() {
        let mut agent = AgentConfig::default();
        assert!(agent.capability_enabled("calendar"));
        agent.enabled_capabilities.insert("calendar".to_owned(), false);
        assert!(!agent.capability_enabled("calendar"));
    }
}
