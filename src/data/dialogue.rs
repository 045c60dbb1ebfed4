//! Dialogue content loading and caching

use once_cell::sync::Lazy;
use std::fs;
use std::path::Path;

use crate::game::dialogue::{validate_dialogue_content, DialogueContent};

/// On-disk location of the dialogue tree content, relative to the
/// process working directory.
pub const DIALOGUE_CONTENT_FILE: &str = "data/world/dialogue_trees.json";

/// The content shipped with the crate; also the schema reference.
const BUNDLED_CONTENT: &str = include_str!("../../data/world/dialogue_trees.json");

static CONTENT_CACHE: Lazy<DialogueContent> = Lazy::new(|| load_dialogue_content(DIALOGUE_CONTENT_FILE));

/// The bundled default tree. Guaranteed to validate.
pub fn default_dialogue_content() -> DialogueContent {
    parse_validated(BUNDLED_CONTENT).unwrap_or_else(|| {
        // The bundled file is covered by tests; an invalid build falls back
        // to the minimal empty tree rather than failing the whole engine.
        tracing::warn!("bundled dialogue content failed validation");
        DialogueContent::empty()
    })
}

/// Load and validate dialogue content from a path, falling back to the
/// bundled default, then to the empty tree.
pub fn load_dialogue_content(path: impl AsRef<Path>) -> DialogueContent {
    match fs::read_to_string(path.as_ref()) {
        Ok(raw) => match parse_validated(&raw) {
            Some(content) => content,
            None => {
                tracing::warn!(path = %path.as_ref().display(), "dialogue content invalid; using bundled default");
                default_dialogue_content()
            }
        },
        Err(_) => default_dialogue_content(),
    }
}

/// Process-wide cached copy; loaded once on first use.
pub fn load_dialogue_content_cached() -> DialogueContent {
    CONTENT_CACHE.clone()
}

fn parse_validated(raw: &str) -> Option<DialogueContent> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let errors = validate_dialogue_content(&value);
    if !errors.is_empty() {
        return None;
    }
    serde_json::from_value(value).ok()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_content_parses_and_validates() {
        let content = default_dialogue_content();
        assert!(content.npcs.contains_key("broker_silas"));
        assert!(content.npcs.contains_key("captain_ren"));
        let value = serde_json::to_value(&content).unwrap();
        assert!(validate_dialogue_content(&value).is_empty());
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let content = load_dialogue_content("no/such/path.json");
        assert_eq!(content, default_dialogue_content());
    }

    #[test]
    fn cached_load_is_stable() {
        assert_eq!(load_dialogue_content_cached(), load_dialogue_content_cached());
    }
}
