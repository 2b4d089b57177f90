//! Slug generation for agent identifiers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Derive a slug from a display name: lowercase, spaces to `-`, anything
/// outside `[a-z0-9-]` dropped. Falls back to `agent-<unix-seconds>` when
/// nothing survives.
pub fn slugify(name: &str) -> String {
    let slug: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' { '-' } else { c })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect();

    if slug.is_empty() {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        return format!("agent-{seconds}");
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_dashes_spaces() {
        assert_eq!(slugify("Night Owl"), "night-owl");
    }

    #[test]
    fn drops_punctuation_and_unicode() {
        assert_eq!(slugify("Ada L. (v2)!"), "ada-l-v2");
        assert_eq!(slugify("café"), "caf");
    }

    #[test]
    fn falls_back_when_nothing_survives() {
        let slug = slugify("!!! ???");
        assert!(slug.starts_with("agent-"));
        assert!(slug.len() > "agent-".len());
    }

    #[test]
    fn output_is_always_slug_safe() {
        for name in ["Night Owl", "  spaced  ", "MiXeD-123", "日本語"] {
            let slug = slugify(name);
            assert!(!slug.is_empty());
            assert!(
                slug.chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            );
        }
    }
}
