//! World state - turns, threat, and the narrative flag channels

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::cataclysm::{CataclysmEndState, CataclysmState};

/// A FIFO ring with its capacity encoded in the type. Oldest entries are
/// evicted on push; narrative history never grows without bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoundedRing<T, const N: usize> {
    entries: Vec<T>,
}

impl<T, const N: usize> Default for BoundedRing<T, N> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<T, const N: usize> BoundedRing<T, N> {
    pub fn push(&mut self, value: T) {
        self.entries.push(value);
        if self.entries.len() > N {
            let overflow = self.entries.len() - N;
            self.entries.drain(..overflow);
        }
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.last()
    }

    pub fn latest_mut(&mut self) -> Option<&mut T> {
        self.entries.last_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity() -> usize {
        N
    }
}

/// Lifecycle of a story seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedStatus {
    Active,
    Simmering,
    Escalated,
    Critical,
    Resolved,
}

impl SeedStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "simmering" => Some(Self::Simmering),
            "escalated" => Some(Self::Escalated),
            "critical" => Some(Self::Critical),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }
}

/// Latent narrative tension waiting on a resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorySeed {
    pub seed_id: String,
    pub kind: String,
    pub status: SeedStatus,
    #[serde(default)]
    pub escalation_stage: String,
    #[serde(default)]
    pub pressure: i32,
    #[serde(default)]
    pub faction_bias: Option<String>,
    #[serde(default)]
    pub resolution_variants: Vec<String>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub resolved_turn: Option<u64>,
    #[serde(default)]
    pub resolved_by: Option<String>,
    #[serde(default)]
    pub resolved_monster_id: Option<i64>,
}

impl StorySeed {
    pub fn new(seed_id: &str, kind: &str) -> Self {
        Self {
            seed_id: seed_id.to_string(),
            kind: kind.to_string(),
            status: SeedStatus::Active,
            escalation_stage: String::new(),
            pressure: 0,
            faction_bias: None,
            resolution_variants: Vec::new(),
            resolution: None,
            resolved_turn: None,
            resolved_by: None,
            resolved_monster_id: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status != SeedStatus::Resolved
    }
}

/// A resolved seed kept around as a rumour-board echo and dialogue hint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryMemory {
    pub turn: u64,
    pub seed_id: String,
    pub kind: String,
    pub resolution: String,
    pub actor: i64,
    #[serde(default)]
    pub monster_id: Option<i64>,
}

/// Aftershock left behind by a resolved faction flashpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashpointEcho {
    pub turn: u64,
    pub seed_id: String,
    pub resolution: String,
    /// `social` or `combat`.
    pub channel: String,
    #[serde(default)]
    pub bias_faction: Option<String>,
    #[serde(default)]
    pub rival_faction: Option<String>,
    #[serde(default)]
    pub affected_factions: u32,
    pub severity_score: u32,
    pub severity_band: String,
}

/// A consequence surfaced on the town board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consequence {
    pub kind: String,
    pub message: String,
    pub severity: String,
    pub turn: u64,
}

/// One rumour the character has picked up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RumourRecord {
    pub turn: u64,
    pub character_id: i64,
    pub kind: String,
    pub message: String,
}

/// Narrative channel of the world flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NarrativeFlags {
    #[serde(default)]
    pub tension_level: i32,
    #[serde(default)]
    pub story_seeds: Vec<StorySeed>,
    #[serde(default)]
    pub major_events: BoundedRing<StoryMemory, 20>,
    #[serde(default)]
    pub flashpoint_echoes: BoundedRing<FlashpointEcho, 12>,
    #[serde(default)]
    pub injections: Vec<String>,
    /// `faction_edges` keyed `left|right` with a signed pressure score.
    #[serde(default)]
    pub relationship_graph: BTreeMap<String, i32>,
}

impl NarrativeFlags {
    pub fn clamp_tension(&mut self) {
        self.tension_level = self.tension_level.clamp(0, 100);
    }

    /// The latest non-resolved seed is the one the town talks about.
    pub fn active_story_seed(&self) -> Option<&StorySeed> {
        self.story_seeds.iter().rev().find(|seed| seed.is_open())
    }

    pub fn active_story_seed_mut(&mut self) -> Option<&mut StorySeed> {
        self.story_seeds.iter_mut().rev().find(|seed| seed.is_open())
    }
}

/// One remembered social interaction with an NPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcMemoryEvent {
    pub turn: u64,
    pub approach: String,
    pub success: bool,
    pub delta: i32,
}

/// Per-NPC social standing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NpcSocialRow {
    #[serde(default)]
    pub disposition: i32,
    #[serde(default)]
    pub memory: Vec<NpcMemoryEvent>,
}

/// Social channel: per-NPC rows plus the nonce ledger that keeps repeated
/// social checks from replaying the same seed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NpcSocialFlags {
    #[serde(default)]
    pub npcs: BTreeMap<String, NpcSocialRow>,
    #[serde(default)]
    pub nonces: BTreeMap<String, u64>,
}

impl NpcSocialFlags {
    pub fn disposition(&self, npc_id: &str) -> i32 {
        self.npcs.get(npc_id).map(|row| row.disposition).unwrap_or(0)
    }

    pub fn set_disposition(&mut self, npc_id: &str, value: i32) {
        self.npcs.entry(npc_id.to_string()).or_default().disposition = value.clamp(-100, 100);
    }

    pub fn append_memory(&mut self, npc_id: &str, event: NpcMemoryEvent) {
        let row = self.npcs.entry(npc_id.to_string()).or_default();
        row.memory.push(event);
        if row.memory.len() > 10 {
            let overflow = row.memory.len() - 10;
            row.memory.drain(..overflow);
        }
    }

    /// Bump and return the next nonce for a `(npc, approach, character)` key.
    pub fn next_nonce(&mut self, npc_id: &str, approach: &str, character_id: i64) -> u64 {
        let key = format!("nonce:{npc_id}:{approach}:character:{character_id}");
        let entry = self.nonces.entry(key).or_insert(0);
        *entry += 1;
        *entry
    }

    /// True when the NPC rebuffed the character within the lookback window.
    pub fn has_recent_rebuff(&self, npc_id: &str, current_turn: u64, window: u64) -> bool {
        let Some(row) = self.npcs.get(npc_id) else {
            return false;
        };
        let lower = current_turn.saturating_sub(window);
        for event in row.memory.iter().rev() {
            if event.turn < lower {
                break;
            }
            if !event.success {
                return true;
            }
        }
        false
    }
}

/// Quest lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestStatus {
    Available,
    Active,
    ReadyToTurnIn,
    Completed,
    Failed,
}

impl QuestStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Active => "active",
            Self::ReadyToTurnIn => "ready_to_turn_in",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Per-quest world state row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestRow {
    pub status: QuestStatus,
    pub title: String,
    pub objective_kind: String,
    pub target: u32,
    pub progress: u32,
    pub reward_xp: u64,
    pub reward_money: i64,
    #[serde(default)]
    pub faction_id: Option<String>,
    #[serde(default)]
    pub accepted_turn: Option<u64>,
    #[serde(default)]
    pub expires_turn: Option<u64>,
    #[serde(default)]
    pub completed_turn: Option<u64>,
    #[serde(default)]
    pub turned_in_turn: Option<u64>,
    #[serde(default)]
    pub owner_character_id: Option<i64>,
    #[serde(default)]
    pub seed_key: String,
    #[serde(default)]
    pub cataclysm_pushback: bool,
    #[serde(default)]
    pub pushback_tier: u32,
}

impl QuestRow {
    pub fn available(
        title: &str,
        objective_kind: &str,
        target: u32,
        reward_xp: u64,
        reward_money: i64,
    ) -> Self {
        Self {
            status: QuestStatus::Available,
            title: title.to_string(),
            objective_kind: objective_kind.to_string(),
            target: target.max(1),
            progress: 0,
            reward_xp,
            reward_money,
            faction_id: None,
            accepted_turn: None,
            expires_turn: None,
            completed_turn: None,
            turned_in_turn: None,
            owner_character_id: None,
            seed_key: String::new(),
            cataclysm_pushback: false,
            pushback_tier: 0,
        }
    }
}

/// Typed world flag container. Unknown channels ride along in `extras`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldFlags {
    #[serde(default)]
    pub narrative: NarrativeFlags,
    #[serde(default)]
    pub npc_social: NpcSocialFlags,
    #[serde(default)]
    pub quests: BTreeMap<String, QuestRow>,
    #[serde(default)]
    pub consequences: BoundedRing<Consequence, 20>,
    #[serde(default)]
    pub rumour_history: BoundedRing<RumourRecord, 10>,
    #[serde(default)]
    pub settlement_names: BTreeMap<String, String>,
    #[serde(default)]
    pub town_layers: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub cataclysm_state: Option<CataclysmState>,
    #[serde(default)]
    pub cataclysm_end_state: Option<CataclysmEndState>,
    #[serde(default)]
    pub world_flags: BTreeMap<String, bool>,
    #[serde(default)]
    pub quest_world_flags: BTreeMap<String, bool>,
    #[serde(default)]
    pub dialogue_state: super::character::DialogueState,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extras: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct World {
    pub id: i64,
    pub name: String,
    pub current_turn: u64,
    pub threat_level: i32,
    pub rng_seed: u64,
    #[serde(default)]
    pub flags: WorldFlags,
}

impl World {
    pub fn new(id: i64, name: &str, rng_seed: u64) -> Self {
        Self {
            id,
            name: name.to_string(),
            current_turn: 0,
            threat_level: 0,
            rng_seed,
            flags: WorldFlags::default(),
        }
    }

    pub fn advance_turns(&mut self, ticks: u64) {
        self.current_turn += ticks;
    }

    pub fn raise_threat(&mut self, delta: i32) {
        self.threat_level = (self.threat_level + delta).max(0);
    }

    pub fn lower_threat(&mut self, delta: i32) {
        self.threat_level = (self.threat_level - delta).max(0);
    }

    /// Flat projection of world flags the encounter engine consumes:
    /// `world_flags` keys verbatim plus `quest:` prefixed quest flags.
    pub fn flag_projection(&self) -> BTreeMap<String, bool> {
        let mut projected = BTreeMap::new();
        for (key, value) in &self.flags.world_flags {
            projected.insert(key.clone(), *value);
        }
        for (key, value) in &self.flags.quest_world_flags {
            projected.insert(format!("quest:{key}"), *value);
        }
        projected
    }

    pub fn append_consequence(&mut self, kind: &str, message: &str, severity: &str, turn: u64) {
        self.flags.consequences.push(Consequence {
            kind: kind.to_string(),
            message: message.to_string(),
            severity: severity.to_string(),
            turn,
        });
    }

    pub fn record_rumour(&mut self, character_id: i64, kind: &str, message: &str) {
        let turn = self.current_turn;
        self.flags.rumour_history.push(RumourRecord {
            turn,
            character_id,
            kind: kind.to_string(),
            message: message.to_string(),
        });
    }

    /// True when the character heard any rumour in the last six recorded rows.
    pub fn has_recent_rumour(&self, character_id: i64) -> bool {
        self.flags
            .rumour_history
            .iter()
            .rev()
            .take(6)
            .any(|row| row.character_id == character_id)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_ring_evicts_oldest_first() {
        let mut ring: BoundedRing<u32, 3> = BoundedRing::default();
        for value in 0..5 {
            ring.push(value);
        }
        let kept: Vec<u32> = ring.iter().copied().collect();
        assert_eq!(kept, vec![2, 3, 4]);
        assert_eq!(ring.latest(), Some(&4));
    }

    #[test]
    fn narrative_rings_respect_caps() {
        let mut world = World::new(1, "Default World", 7);
        for turn in 0..30 {
            world.flags.narrative.major_events.push(StoryMemory {
                turn,
                seed_id: format!("seed_{turn}"),
                kind: "merchant_under_pressure".to_string(),
                resolution: "prosperity".to_string(),
                actor: 1,
                monster_id: None,
            });
            world.append_consequence("test", "msg", "minor", turn);
        }
        assert!(world.flags.narrative.major_events.len() <= 20);
        assert!(world.flags.consequences.len() <= 20);
        assert_eq!(BoundedRing::<FlashpointEcho, 12>::capacity(), 12);
    }

    #[test]
    fn active_story_seed_is_latest_open_seed() {
        let mut narrative = NarrativeFlags::default();
        let mut resolved = StorySeed::new("old", "merchant_under_pressure");
        resolved.status = SeedStatus::Resolved;
        narrative.story_seeds.push(resolved);
        narrative.story_seeds.push(StorySeed::new("fresh", "faction_flashpoint"));

        assert_eq!(narrative.active_story_seed().unwrap().seed_id, "fresh");
    }

    #[test]
    fn nonce_ledger_increments_per_key() {
        let mut social = NpcSocialFlags::default();
        assert_eq!(social.next_nonce("broker_silas", "friendly", 21), 1);
        assert_eq!(social.next_nonce("broker_silas", "friendly", 21), 2);
        assert_eq!(social.next_nonce("broker_silas", "direct", 21), 1);
    }

    #[test]
    fn recent_rebuff_honours_window() {
        let mut social = NpcSocialFlags::default();
        social.append_memory(
            "captain_ren",
            NpcMemoryEvent {
                turn: 2,
                approach: "intimidate".to_string(),
                success: false,
                delta: -8,
            },
        );
        assert!(social.has_recent_rebuff("captain_ren", 5, 6));
        assert!(!social.has_recent_rebuff("captain_ren", 20, 6));
        assert!(!social.has_recent_rebuff("broker_silas", 5, 6));
    }

    #[test]
    fn flag_projection_prefixes_quest_flags() {
        let mut world = World::new(1, "World", 3);
        world.flags.world_flags.insert("location:4:peaceful".to_string(), true);
        world
            .flags
            .quest_world_flags
            .insert("trail_patrol_turned_in".to_string(), true);

        let projected = world.flag_projection();
        assert_eq!(projected.get("location:4:peaceful"), Some(&true));
        assert_eq!(projected.get("quest:trail_patrol_turned_in"), Some(&true));
    }

    #[test]
    fn threat_never_drops_below_zero() {
        let mut world = World::new(1, "World", 3);
        world.lower_threat(5);
        assert_eq!(world.threat_level, 0);
        world.raise_threat(2);
        world.lower_threat(1);
        assert_eq!(world.threat_level, 1);
    }

    #[test]
    fn world_round_trips_through_json() {
        let mut world = World::new(1, "Default World", 11);
        world.flags.narrative.tension_level = 40;
        world.flags.quests.insert(
            "trail_patrol".to_string(),
            QuestRow::available("Trail Patrol", "kill_any", 3, 60, 25),
        );
        let encoded = serde_json::to_string(&world).unwrap();
        let decoded: World = serde_json::from_str(&encoded).unwrap();
        assert_eq!(world, decoded);
    }
}
