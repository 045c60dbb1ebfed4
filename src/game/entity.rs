//! Enemies and other hostile entities

use serde::{Deserialize, Serialize};

use super::status::{Status, TacticalTags};

/// Broad creature category; drives default combat intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Beast,
    Humanoid,
    Undead,
    Fiend,
    Construct,
    Dragon,
    Elemental,
    Aberration,
    Other,
}

impl Default for EntityKind {
    fn default() -> Self {
        Self::Other
    }
}

impl EntityKind {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "beast" => Self::Beast,
            "humanoid" => Self::Humanoid,
            "undead" => Self::Undead,
            "fiend" => Self::Fiend,
            "construct" => Self::Construct,
            "dragon" => Self::Dragon,
            "elemental" => Self::Elemental,
            "aberration" => Self::Aberration,
            _ => Self::Other,
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Self::Beast => "beast",
            Self::Humanoid => "humanoid",
            Self::Undead => "undead",
            Self::Fiend => "fiend",
            Self::Construct => "construct",
            Self::Dragon => "dragon",
            Self::Elemental => "elemental",
            Self::Aberration => "aberration",
            Self::Other => "creature",
        }
    }
}

/// A hostile actor. Instantiated per encounter as a copy; combat mutations
/// never flow back into the repository row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub name: String,
    pub level: u32,
    pub hp_max: i32,
    pub hp_current: i32,
    pub armour_class: i32,
    pub attack_bonus: i32,
    #[serde(default = "Entity::default_damage_die")]
    pub damage_die: String,
    #[serde(default)]
    pub kind: EntityKind,
    #[serde(default)]
    pub faction_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub resistances: Vec<String>,
    #[serde(default)]
    pub loot_tags: Vec<String>,
    /// AI disposition override; derived from `kind` when absent.
    #[serde(default)]
    pub intent: Option<String>,
    /// Transient combat state, never persisted.
    #[serde(skip)]
    pub combat_statuses: Vec<Status>,
    #[serde(skip)]
    pub combat_tactical_tags: TacticalTags,
}

impl Entity {
    fn default_damage_die() -> String {
        "d4".to_string()
    }

    pub fn new(id: i64, name: &str, level: u32, hp: i32) -> Self {
        Self {
            id,
            name: name.to_string(),
            level: level.max(1),
            hp_max: hp.max(1),
            hp_current: hp.max(1),
            armour_class: 10,
            attack_bonus: 2,
            damage_die: Self::default_damage_die(),
            kind: EntityKind::Other,
            faction_id: None,
            tags: Vec::new(),
            resistances: Vec::new(),
            loot_tags: Vec::new(),
            intent: None,
            combat_statuses: Vec::new(),
            combat_tactical_tags: TacticalTags::new(),
        }
    }

    /// A fresh combat copy with full hp and no transient state.
    pub fn combat_copy(&self) -> Self {
        let mut copy = self.clone();
        copy.hp_current = copy.hp_max.max(1);
        copy.combat_statuses.clear();
        copy.combat_tactical_tags.clear();
        copy
    }

    pub fn is_alive(&self) -> bool {
        self.hp_current > 0
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|row| row.eq_ignore_ascii_case(tag))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::status::StatusId;

    #[test]
    fn combat_copy_resets_hp_and_transient_state() {
        let mut enemy = Entity::new(99, "Goblin", 1, 7);
        enemy.hp_current = 2;
        enemy.combat_statuses.push(Status::new(StatusId::Burning, 2, 1));

        let copy = enemy.combat_copy();
        assert_eq!(copy.hp_current, 7);
        assert!(copy.combat_statuses.is_empty());
        // The source row is untouched.
        assert_eq!(enemy.hp_current, 2);
    }

    #[test]
    fn transient_state_is_not_serialized() {
        let mut enemy = Entity::new(5, "Wolf", 2, 11);
        enemy.combat_statuses.push(Status::new(StatusId::Poisoned, 1, 1));
        let encoded = serde_json::to_string(&enemy).unwrap();
        assert!(!encoded.contains("combat_statuses"));

        let decoded: Entity = serde_json::from_str(&encoded).unwrap();
        assert!(decoded.combat_statuses.is_empty());
    }
}
