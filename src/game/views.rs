//! View DTOs returned by the intent surface

use serde::Serialize;

use super::combat::CombatLogEntry;
use super::entity::Entity;

/// The universal "something happened" reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActionResult {
    pub messages: Vec<String>,
    pub game_over: bool,
}

impl ActionResult {
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            messages: vec![text.into()],
            game_over: false,
        }
    }

    pub fn messages(messages: Vec<String>) -> Self {
        Self {
            messages,
            game_over: false,
        }
    }

    pub fn game_over(text: impl Into<String>) -> Self {
        Self {
            messages: vec![text.into()],
            game_over: true,
        }
    }
}

/// Header strip shown at the top of the game loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameLoopView {
    pub name: String,
    pub race_name: String,
    pub class_name: String,
    pub level: u32,
    pub hp_current: i32,
    pub hp_max: i32,
    pub world_turn: u64,
    pub threat_level: i32,
    pub cataclysm_active: bool,
    pub cataclysm_kind: String,
    pub cataclysm_phase: String,
    pub cataclysm_progress: i32,
    pub cataclysm_summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationContextView {
    /// `town` or `wilderness`.
    pub location_type: String,
    pub title: String,
    pub labels: Vec<String>,
}

/// Result of an explore step before any combat resolution.
#[derive(Debug, Clone)]
pub struct ExploreView {
    pub has_encounter: bool,
    pub message: String,
    pub enemies: Vec<Entity>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TownNpcView {
    pub npc_id: String,
    pub name: String,
    pub role: String,
    pub disposition: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TownView {
    pub settlement_name: String,
    pub npcs: Vec<TownNpcView>,
    pub consequences: Vec<String>,
    pub district_tag: String,
    pub landmark_tag: String,
    pub story_lines: Vec<String>,
    pub cataclysm_active: bool,
    pub cataclysm_kind: String,
    pub cataclysm_phase: String,
    pub cataclysm_progress: i32,
    pub cataclysm_summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NpcInteractionView {
    pub npc_id: String,
    pub npc_name: String,
    pub greeting: String,
    pub approaches: Vec<String>,
    pub dialogue_hint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SocialOutcomeView {
    pub npc_id: String,
    pub npc_name: String,
    pub approach: String,
    pub success: bool,
    pub roll_total: i32,
    pub target_dc: i32,
    pub relationship_before: i32,
    pub relationship_after: i32,
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShopItemView {
    pub name: String,
    pub price: i64,
    pub slot: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShopView {
    pub items: Vec<ShopItemView>,
    pub money: i64,
    pub price_modifier: i64,
    pub price_modifier_label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SellItemView {
    pub name: String,
    pub sell_price: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SellInventoryView {
    pub items: Vec<SellItemView>,
    pub money: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestBoardRow {
    pub quest_id: String,
    pub title: String,
    pub status: String,
    pub objective_summary: String,
    pub urgency: String,
    pub reward_xp: u64,
    pub reward_money: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestBoardView {
    pub quests: Vec<QuestBoardRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RumourItemView {
    pub source: String,
    pub text: String,
    pub turn: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RumourBoardView {
    pub rumours: Vec<RumourItemView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TravelDestinationView {
    pub location_id: i64,
    pub name: String,
    pub biome: String,
    pub recommended_level: u32,
    pub estimated_days: u32,
    pub risk_hint: String,
    pub route_note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CharacterSheetView {
    pub name: String,
    pub race_name: String,
    pub class_name: String,
    pub level: u32,
    pub xp_current: u64,
    pub xp_required: u64,
    pub hp_current: i32,
    pub hp_max: i32,
    pub armour_class: i32,
    pub money: i64,
    pub inventory: Vec<String>,
    pub faction_pressure_summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquipmentView {
    pub weapon: Option<String>,
    pub armor: Option<String>,
    pub trinket: Option<String>,
    pub equipable_items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactionStandingRow {
    pub faction_id: String,
    pub faction_name: String,
    pub reputation: i32,
    pub heat: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactionStandingsView {
    pub rows: Vec<FactionStandingRow>,
}

/// Post-combat reward summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RewardOutcomeView {
    pub xp_gained: u64,
    pub money_gained: i64,
    pub loot: Vec<String>,
    pub messages: Vec<String>,
}

/// Snapshot of one combat round for rendering.
#[derive(Debug, Clone)]
pub struct CombatRoundView {
    pub round_no: u32,
    pub player_hp: i32,
    pub player_hp_max: i32,
    pub enemy_hp: i32,
    pub enemy_hp_max: i32,
    pub options: Vec<String>,
    pub statuses: Vec<String>,
    pub log: Vec<CombatLogEntry>,
}
