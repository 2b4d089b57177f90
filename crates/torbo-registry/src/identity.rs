//! Identity block assembly.
//!
//! Builds the structured text block the LLM layer embeds into every system
//! prompt. Pure function of the agent document and its arguments.

use torbo_protocol::{AccessLevel, AgentConfig};

/// Render the identity block for an agent at an effective access level with
/// the tools currently available to it.
pub fn identity_block(
    agent: &AgentConfig,
    access_level: AccessLevel,
    available_tool_names: &[String],
) -> String {
    let mut block = String::new();

    block.push_str("## Identity\n");
    if agent.pronouns.is_empty() {
        block.push_str(&format!("You are {}.\n", agent.name));
    } else {
        block.push_str(&format!("You are {} ({}).\n", agent.name, agent.pronouns));
    }
    if !agent.role.is_empty() {
        block.push_str(&format!("{}\n", agent.role));
    }
    if !agent.voice_tone.is_empty() {
        block.push_str(&format!("Tone: {}.\n", agent.voice_tone));
    }
    if !agent.core_values.is_empty() {
        block.push_str(&format!("Core values: {}\n", agent.core_values));
    }

    block.push_str("\n## Behavior\n");
    block.push_str("Stay within the directory scopes and tools listed below.\n");
    block.push_str(
        "When an action needs a higher access level, say so instead of working around it.\n",
    );

    block.push_str("\n## Access\n");
    block.push_str(&format!(
        "Access level: {} ({})\n",
        access_level.name(),
        access_level.as_u8()
    ));
    if available_tool_names.is_empty() {
        block.push_str("Available tools: none\n");
    } else {
        block.push_str(&format!(
            "Available tools: {}\n",
            available_tool_names.join(", ")
        ));
    }
    if !agent.directory_scopes.is_empty() {
        block.push_str(&format!(
            "Directory scopes: {}\n",
            agent.directory_scopes.join(", ")
        ));
    }

    if !agent.topics_to_avoid.is_empty() {
        block.push_str("\n## Topics to avoid\n");
        for topic in &agent.topics_to_avoid {
            block.push_str(&format!("- {topic}\n"));
        }
    }
    if !agent.custom_instructions.is_empty() {
        block.push_str("\n## Instructions\n");
        block.push_str(&format!("{}\n", agent.custom_instructions));
    }
    if !agent.background_knowledge.is_empty() {
        block.push_str("\n## Background\n");
        block.push_str(&format!("{}\n", agent.background_knowledge));
    }

    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use torbo_protocol::AgentId;

    fn sample() -> AgentConfig {
        AgentConfig {
            id: AgentId::from_string("sample"),
            name: "Sample".to_owned(),
            pronouns: "she/her".to_owned(),
            role: "Test persona.".to_owned(),
            voice_tone: "dry".to_owned(),
            ..AgentConfig::default()
        }
    }

    #[test]
    fn block_names_the_access_level() {
        let block = identity_block(&sample(), AccessLevel::Exec, &["run_command".to_owned()]);
        assert!(block.contains("You are Sample (she/her)."));
        assert!(block.contains("Access level: EXEC (4)"));
        assert!(block.contains("Available tools: run_command"));
    }

    #[test]
    fn optional_sections_only_appear_when_populated() {
        let mut agent = sample();
        let bare = identity_block(&agent, AccessLevel::Chat, &[]);
        assert!(!bare.contains("## Topics to avoid"));
        assert!(!bare.contains("## Background"));
        assert!(bare.contains("Available tools: none"));

        agent.topics_to_avoid = vec!["politics".to_owned()];
        agent.background_knowledge = "Knows the house layout.".to_owned();
        let full = identity_block(&agent, AccessLevel::Chat, &[]);
        assert!(full.contains("- politics"));
        assert!(full.contains("Knows the house layout."));
    }

    #[test]
    fn block_is_deterministic() {
        let agent = sample();
        let tools = vec!["a".to_owned(), "b".to_owned()];
        assert_eq!(
            identity_block(&agent, AccessLevel::Read, &tools),
            identity_block(&agent, AccessLevel::Read, &tools)
        );
    }
}
