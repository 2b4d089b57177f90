//! The built-in agent template and the history of its shipped defaults.
//!
//! When bootstrap finds the built-in agent on disk with a persona field
//! that exactly matches a *previous* shipped default, the user never
//! customized it and it is upgraded to the current wording. Anything else
//! is user text and is left alone.

use chrono::Utc;
use torbo_protocol::{AccessLevel, AgentConfig, AgentId};

/// The undeletable default agent.
pub const BUILT_IN_AGENT_ID: &str = "torbo";

pub const DEFAULT_NAME: &str = "Torbo";
pub const DEFAULT_PRONOUNS: &str = "they/them";

pub const DEFAULT_ROLE: &str =
    "Personal gateway assistant. You coordinate tools, schedules, and messages on the user's \
     local machine and keep their data on their machine.";

pub const DEFAULT_TONE: &str = "warm, direct, unhurried";

pub const DEFAULT_VALUES: &str =
    "Privacy first. Ask before acting outside the sandbox. Admit uncertainty plainly.";

pub const DEFAULT_INSTRUCTIONS: &str =
    "Prefer local tools over network calls. Summarize long results instead of pasting them. \
     Never send messages on the user's behalf without an explicit go-ahead.";

/// Previous shipped wordings, one list per upgradeable field.
pub const PREVIOUS_ROLES: &[&str] = &[
    "Personal assistant running on the user's machine.",
    "Local-first assistant that coordinates tools and schedules for the user.",
];

pub const PREVIOUS_TONES: &[&str] = &["friendly and concise", "warm, direct"];

pub const PREVIOUS_VALUES: &[&str] = &[
    "Privacy first. Be honest about uncertainty.",
    "Keep user data local. Ask before acting.",
];

pub const PREVIOUS_INSTRUCTIONS: &[&str] = &[
    "Prefer local tools. Ask before sending anything on the user's behalf.",
];

/// A fresh copy of the built-in agent document.
pub fn built_in_template() -> AgentConfig {
    AgentConfig {
        id: AgentId::from_string(BUILT_IN_AGENT_ID),
        is_built_in: true,
        created_at: Utc::now(),
        name: DEFAULT_NAME.to_owned(),
        pronouns: DEFAULT_PRONOUNS.to_owned(),
        role: DEFAULT_ROLE.to_owned(),
        voice_tone: DEFAULT_TONE.to_owned(),
        personality_preset: "balanced".to_owned(),
        core_values: DEFAULT_VALUES.to_owned(),
        custom_instructions: DEFAULT_INSTRUCTIONS.to_owned(),
        access_level: AccessLevel::Read,
        ..AgentConfig::default()
    }
}

/// Upgrade un-customized persona fields to the current defaults.
///
/// Returns true when anything changed.
pub fn upgrade_stale_defaults(agent: &mut AgentConfig) -> bool {
    let mut changed = false;
    changed |= upgrade_field(&mut agent.role, DEFAULT_ROLE, PREVIOUS_ROLES);
    changed |= upgrade_field(&mut agent.voice_tone, DEFAULT_TONE, PREVIOUS_TONES);
    changed |= upgrade_field(&mut agent.core_values, DEFAULT_VALUES, PREVIOUS_VALUES);
    changed |= upgrade_field(
        &mut agent.custom_instructions,
        DEFAULT_INSTRUCTIONS,
        PREVIOUS_INSTRUCTIONS,
    );
    changed
}

fn upgrade_field(field: &mut String, current: &str, previous: &[&str]) -> bool {
    if field != current && previous.contains(&field.as_str()) {
        *field = current.to_owned();
        return true;
    }
    false
}
