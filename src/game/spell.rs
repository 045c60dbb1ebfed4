//! Spell rows and combat spell definitions

use serde::{Deserialize, Serialize};

/// How a spell resolves against its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpellResolution {
    SpellAttack,
    Save,
    Auto,
}

/// A spell row as persisted by the spell repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spell {
    pub slug: String,
    pub name: String,
    pub level_int: u32,
    #[serde(default)]
    pub school: String,
    pub resolution: SpellResolution,
    #[serde(default)]
    pub damage_dice: String,
    #[serde(default)]
    pub damage_type: String,
    #[serde(default)]
    pub save_ability: Option<String>,
    #[serde(default)]
    pub range: String,
}

/// Combat-facing definition: just what the resolver needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpellDefinition {
    pub slug: &'static str,
    pub resolution: SpellResolution,
    pub damage_dice: &'static str,
    pub damage_type: &'static str,
    pub save_ability: Option<&'static str>,
}

/// The spells the resolver knows how to execute. Anything outside this table
/// is reported as not yet implemented in combat.
pub const SPELL_DEFINITIONS: &[SpellDefinition] = &[
    SpellDefinition {
        slug: "fire_bolt",
        resolution: SpellResolution::SpellAttack,
        damage_dice: "1d10",
        damage_type: "fire",
        save_ability: None,
    },
    SpellDefinition {
        slug: "ray_of_frost",
        resolution: SpellResolution::SpellAttack,
        damage_dice: "1d8",
        damage_type: "cold",
        save_ability: None,
    },
    SpellDefinition {
        slug: "eldritch_blast",
        resolution: SpellResolution::SpellAttack,
        damage_dice: "1d10",
        damage_type: "force",
        save_ability: None,
    },
    SpellDefinition {
        slug: "vicious_mockery",
        resolution: SpellResolution::Save,
        damage_dice: "1d4",
        damage_type: "psychic",
        save_ability: Some("wisdom"),
    },
    SpellDefinition {
        slug: "sacred_flame",
        resolution: SpellResolution::Save,
        damage_dice: "1d8",
        damage_type: "radiant",
        save_ability: Some("dexterity"),
    },
    SpellDefinition {
        slug: "poison_spray",
        resolution: SpellResolution::Save,
        damage_dice: "1d12",
        damage_type: "poison",
        save_ability: Some("constitution"),
    },
    SpellDefinition {
        slug: "burning_hands",
        resolution: SpellResolution::Save,
        damage_dice: "3d6",
        damage_type: "fire",
        save_ability: Some("dexterity"),
    },
    SpellDefinition {
        slug: "magic_missile",
        resolution: SpellResolution::Auto,
        damage_dice: "3d4",
        damage_type: "force",
        save_ability: None,
    },
    SpellDefinition {
        slug: "cure_wounds",
        resolution: SpellResolution::Auto,
        damage_dice: "1d8",
        damage_type: "healing",
        save_ability: None,
    },
    SpellDefinition {
        slug: "healing_word",
        resolution: SpellResolution::Auto,
        damage_dice: "1d4",
        damage_type: "healing",
        save_ability: None,
    },
    SpellDefinition {
        slug: "shield",
        resolution: SpellResolution::Auto,
        damage_dice: "",
        damage_type: "",
        save_ability: None,
    },
    SpellDefinition {
        slug: "inflict_wounds",
        resolution: SpellResolution::SpellAttack,
        damage_dice: "3d10",
        damage_type: "necrotic",
        save_ability: None,
    },
    SpellDefinition {
        slug: "thunderwave",
        resolution: SpellResolution::Save,
        damage_dice: "2d8",
        damage_type: "thunder",
        save_ability: Some("constitution"),
    },
];

/// Find a combat definition by slug.
pub fn spell_definition(slug: &str) -> Option<&'static SpellDefinition> {
    let normalized = slug.trim().to_ascii_lowercase();
    SPELL_DEFINITIONS.iter().find(|row| row.slug == normalized)
}

/// Reduce a display name to the registry slug: lowercase, spaces and
/// apostrophes collapsed to underscores.
pub fn slugify_spell_name(name: &str) -> String {
    name.trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// True when a slug resolves to a healing definition.
pub fn is_healing_spell(slug: &str) -> bool {
    spell_definition(slug).is_some_and(|row| row.damage_type == "healing")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(slugify_spell_name("Fire Bolt"), "fire_bolt");
        assert_eq!(slugify_spell_name("  Ray of Frost "), "ray_of_frost");
        assert_eq!(slugify_spell_name("Hunter's Mark"), "hunter_s_mark");
    }

    #[test]
    fn definitions_resolve_by_slug() {
        let definition = spell_definition("fire_bolt").unwrap();
        assert_eq!(definition.resolution, SpellResolution::SpellAttack);
        assert!(spell_definition("made_up_spell").is_none());
    }

    #[test]
    fn healing_detection_reads_damage_type() {
        assert!(is_healing_spell("cure_wounds"));
        assert!(is_healing_spell("healing_word"));
        assert!(!is_healing_spell("fire_bolt"));
    }
}
