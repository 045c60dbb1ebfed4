//! Player character and companions

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::dice::ability_mod;
use super::status::{Status, TacticalTags};

/// The six canonical ability scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    pub strength: i32,
    pub dexterity: i32,
    pub constitution: i32,
    pub intelligence: i32,
    pub wisdom: i32,
    pub charisma: i32,
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            strength: 10,
            dexterity: 10,
            constitution: 10,
            intelligence: 10,
            wisdom: 10,
            charisma: 10,
        }
    }
}

impl Attributes {
    pub fn strength_mod(&self) -> i32 {
        ability_mod(self.strength)
    }

    pub fn dexterity_mod(&self) -> i32 {
        ability_mod(self.dexterity)
    }

    pub fn constitution_mod(&self) -> i32 {
        ability_mod(self.constitution)
    }

    pub fn intelligence_mod(&self) -> i32 {
        ability_mod(self.intelligence)
    }

    pub fn wisdom_mod(&self) -> i32 {
        ability_mod(self.wisdom)
    }

    pub fn charisma_mod(&self) -> i32 {
        ability_mod(self.charisma)
    }

    /// Initiative modifier is just dexterity.
    pub fn initiative(&self) -> i32 {
        self.dexterity_mod()
    }

    /// Look up a modifier by ability name (lowercase slug).
    pub fn mod_by_name(&self, ability: &str) -> i32 {
        match ability {
            "strength" => self.strength_mod(),
            "dexterity" => self.dexterity_mod(),
            "constitution" => self.constitution_mod(),
            "intelligence" => self.intelligence_mod(),
            "wisdom" => self.wisdom_mod(),
            "charisma" => self.charisma_mod(),
            _ => 0,
        }
    }

    pub fn score_by_name(&self, ability: &str) -> i32 {
        match ability {
            "strength" => self.strength,
            "dexterity" => self.dexterity,
            "constitution" => self.constitution,
            "intelligence" => self.intelligence,
            "wisdom" => self.wisdom,
            "charisma" => self.charisma,
            _ => 10,
        }
    }
}

/// Equipment loadout stored on the character.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equipment {
    #[serde(default)]
    pub weapon: Option<String>,
    #[serde(default)]
    pub armor: Option<String>,
    #[serde(default)]
    pub trinket: Option<String>,
}

impl Equipment {
    pub fn is_empty(&self) -> bool {
        self.weapon.is_none() && self.armor.is_none() && self.trinket.is_none()
    }

    pub fn slot(&self, name: &str) -> Option<&str> {
        match name {
            "weapon" => self.weapon.as_deref(),
            "armor" => self.armor.as_deref(),
            "trinket" => self.trinket.as_deref(),
            _ => None,
        }
    }
}

/// Per-NPC dialogue session state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DialogueSession {
    #[serde(default)]
    pub stage_id: String,
    #[serde(default)]
    pub last_turn: u64,
    #[serde(default)]
    pub last_approach: String,
    #[serde(default)]
    pub last_success: bool,
    #[serde(default)]
    pub last_resolved_turn: Option<u64>,
    #[serde(default)]
    pub challenge_progress: u32,
    #[serde(default)]
    pub challenge_completed_turn: Option<u64>,
}

/// Dialogue state container mirrored into world flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DialogueState {
    #[serde(default = "DialogueState::default_version")]
    pub version: u32,
    #[serde(default)]
    pub npc_sessions: BTreeMap<String, DialogueSession>,
}

impl DialogueState {
    fn default_version() -> u32 {
        1
    }
}

/// One row of progression history, appended at each growth commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressionRecord {
    pub level: u32,
    pub choice: String,
    #[serde(default)]
    pub option: Option<String>,
    pub turn: u64,
}

/// Recovery debt applied after a defeat or retreat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryState {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub remaining_turns: u32,
}

/// Typed replacement for the old free-form flag bag.
///
/// Known channels get real fields; anything the engine does not understand
/// round-trips through `extras` untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterFlags {
    #[serde(default)]
    pub equipment: Equipment,
    #[serde(default)]
    pub faction_heat: BTreeMap<String, i32>,
    #[serde(default)]
    pub interaction_unlocks: BTreeMap<String, bool>,
    #[serde(default)]
    pub combat_statuses: Vec<Status>,
    #[serde(default)]
    pub combat_tactical_tags: TacticalTags,
    #[serde(default)]
    pub combat_lane: Option<String>,
    #[serde(default)]
    pub dialogue_state: DialogueState,
    #[serde(default)]
    pub progression_messages: Vec<String>,
    #[serde(default)]
    pub progression_history: Vec<ProgressionRecord>,
    #[serde(default)]
    pub pending_growth_choices: u32,
    #[serde(default)]
    pub codex_entries: BTreeMap<String, String>,
    #[serde(default)]
    pub last_explore_event: Option<String>,
    #[serde(default)]
    pub last_travel_event: Option<String>,
    #[serde(default)]
    pub travel_prep: Option<String>,
    #[serde(default)]
    pub next_explore_surprise: Option<String>,
    #[serde(default)]
    pub recovery_state: Option<RecoveryState>,
    #[serde(default)]
    pub rage_rounds: u32,
    #[serde(default)]
    pub temp_ac_bonus: i32,
    #[serde(default)]
    pub shield_rounds: u32,
    /// Forward-compatibility bucket for channels this build does not know.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extras: serde_json::Map<String, serde_json::Value>,
}

/// The player or a companion actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub race_name: String,
    pub level: u32,
    pub xp: u64,
    pub money: i64,
    #[serde(default)]
    pub location_id: Option<i64>,
    pub hp_current: i32,
    pub hp_max: i32,
    pub armour_class: i32,
    pub attack_bonus: i32,
    #[serde(default = "Character::default_damage_die")]
    pub damage_die: String,
    #[serde(default = "Character::default_speed")]
    pub speed: i32,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub inventory: Vec<String>,
    #[serde(default)]
    pub race_traits: Vec<String>,
    #[serde(default)]
    pub background_features: Vec<String>,
    #[serde(default)]
    pub proficiencies: Vec<String>,
    #[serde(default)]
    pub cantrips: Vec<String>,
    #[serde(default)]
    pub known_spells: Vec<String>,
    #[serde(default)]
    pub spell_slots_current: u32,
    #[serde(default)]
    pub spell_slots_max: u32,
    pub alive: bool,
    #[serde(default)]
    pub difficulty: String,
    #[serde(default = "Character::default_multiplier")]
    pub incoming_damage_multiplier: f32,
    #[serde(default = "Character::default_multiplier")]
    pub outgoing_damage_multiplier: f32,
    #[serde(default)]
    pub flags: CharacterFlags,
}

impl Character {
    fn default_damage_die() -> String {
        "d6".to_string()
    }

    fn default_speed() -> i32 {
        30
    }

    fn default_multiplier() -> f32 {
        1.0
    }

    /// A bare level-1 character; tests and companions start here.
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            class_name: String::new(),
            race_name: String::new(),
            level: 1,
            xp: 0,
            money: 0,
            location_id: None,
            hp_current: 10,
            hp_max: 10,
            armour_class: 10,
            attack_bonus: 2,
            damage_die: Self::default_damage_die(),
            speed: Self::default_speed(),
            attributes: Attributes::default(),
            inventory: Vec::new(),
            race_traits: Vec::new(),
            background_features: Vec::new(),
            proficiencies: Vec::new(),
            cantrips: Vec::new(),
            known_spells: Vec::new(),
            spell_slots_current: 0,
            spell_slots_max: 0,
            alive: true,
            difficulty: String::new(),
            incoming_damage_multiplier: 1.0,
            outgoing_damage_multiplier: 1.0,
            flags: CharacterFlags::default(),
        }
    }

    /// Clamp hp into `[0, hp_max]` and refresh the alive flag.
    pub fn normalize_vitals(&mut self) {
        self.hp_max = self.hp_max.max(1);
        self.hp_current = self.hp_current.clamp(0, self.hp_max);
        self.spell_slots_current = self.spell_slots_current.min(self.spell_slots_max);
        self.alive = self.hp_current > 0;
    }

    pub fn has_inventory_item(&self, name: &str) -> bool {
        self.inventory.iter().any(|item| item == name)
    }

    /// Remove one copy of an item; returns false if it was not carried.
    pub fn remove_inventory_item(&mut self, name: &str) -> bool {
        if let Some(position) = self.inventory.iter().position(|item| item == name) {
            self.inventory.remove(position);
            return true;
        }
        false
    }

    pub fn heat_for(&self, faction_id: &str) -> i32 {
        self.flags.faction_heat.get(faction_id).copied().unwrap_or(0)
    }

    /// The faction with the highest positive heat, if any.
    pub fn dominant_heat_faction(&self) -> Option<(String, i32)> {
        self.flags
            .faction_heat
            .iter()
            .filter(|(_, score)| **score > 0)
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(id, score)| (id.clone(), *score))
    }

    pub fn has_interaction_unlock(&self, key: &str) -> bool {
        self.flags.interaction_unlocks.get(key).copied().unwrap_or(false)
    }

    pub fn grant_interaction_unlock(&mut self, key: &str) {
        self.flags.interaction_unlocks.insert(key.to_string(), true);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_vitals_clamps_and_tracks_alive() {
        let mut character = Character::new(1, "Vale");
        character.hp_max = 12;
        character.hp_current = 40;
        character.normalize_vitals();
        assert_eq!(character.hp_current, 12);
        assert!(character.alive);

        character.hp_current = -3;
        character.normalize_vitals();
        assert_eq!(character.hp_current, 0);
        assert!(!character.alive);
    }

    #[test]
    fn character_round_trips_through_json() {
        let mut character = Character::new(7, "Rhea");
        character.flags.faction_heat.insert("wardens".to_string(), 12);
        character.flags.extras.insert(
            "modded_channel".to_string(),
            serde_json::json!({"custom": true}),
        );

        let encoded = serde_json::to_string(&character).unwrap();
        let decoded: Character = serde_json::from_str(&encoded).unwrap();
        assert_eq!(character, decoded);
    }

    #[test]
    fn dominant_heat_ignores_non_positive_scores() {
        let mut character = Character::new(2, "Nia");
        character.flags.faction_heat.insert("wardens".to_string(), 0);
        character.flags.faction_heat.insert("syndicate".to_string(), -4);
        assert!(character.dominant_heat_faction().is_none());

        character.flags.faction_heat.insert("wild".to_string(), 6);
        let (faction, score) = character.dominant_heat_faction().unwrap();
        assert_eq!(faction, "wild");
        assert_eq!(score, 6);
    }
}
