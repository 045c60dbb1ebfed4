//! Cataclysm - the world-scoped escalation that can end a campaign

use serde::{Deserialize, Serialize};

use super::seed::{derive_seed, SeedContext};
use super::world::World;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Escalation phases, in order.
pub const PHASES: [&str; 4] = ["simmering", "grip_tightens", "map_shrinks", "ruin"];

/// Cataclysm archetypes the director can spin up.
pub const KINDS: [&str; 4] = ["plague", "demon_king", "tyrant", "long_winter"];

/// World-scoped escalation state stored in world flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CataclysmState {
    pub active: bool,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub progress: i32,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub started_turn: u64,
    #[serde(default)]
    pub last_advance_turn: u64,
}

impl CataclysmState {
    /// Coerce malformed fields into clean values: unknown kind/phase become
    /// empty strings, progress clamps into `[0, 100]`. The normalized form is
    /// what gets persisted, so later reads start clean.
    pub fn normalize(&mut self) {
        if !KINDS.contains(&self.kind.as_str()) {
            self.kind.clear();
        }
        if !PHASES.contains(&self.phase.as_str()) {
            self.phase.clear();
        }
        self.progress = self.progress.clamp(0, 100);
    }

    pub fn is_terminal(&self) -> bool {
        self.active && self.phase == "ruin" && self.progress >= 100
    }

    /// Extra encounter pressure per phase: `(level_bonus, enemy_bonus)`.
    pub fn encounter_pressure(&self) -> (u32, u32) {
        if !self.active {
            return (0, 0);
        }
        match self.phase.as_str() {
            "grip_tightens" => (1, 0),
            "map_shrinks" => (0, 1),
            "ruin" => (1, 1),
            _ => (0, 0),
        }
    }

    /// Hazard flag attached to encounter plans while the cataclysm is active.
    pub fn hazard_flag(&self) -> Option<String> {
        if !self.active || self.kind.is_empty() {
            return None;
        }
        Some(format!("cataclysm:{}", self.kind))
    }

    /// Shop surcharge (gold per item) under cataclysm strain.
    pub fn price_pressure(&self) -> i64 {
        if !self.active {
            return 0;
        }
        match self.phase.as_str() {
            "grip_tightens" => 1,
            "map_shrinks" => 2,
            "ruin" => 3,
            _ => 0,
        }
    }

    /// Healing lost to corruption when resting during later phases.
    pub fn rest_penalty(&self, heal_amount: i32) -> i32 {
        if !self.active {
            return 0;
        }
        match self.phase.as_str() {
            "map_shrinks" => heal_amount / 4,
            "ruin" => heal_amount / 2,
            _ => 0,
        }
    }

    pub fn phase_label(&self) -> String {
        title_case(&self.phase)
    }

    pub fn kind_label(&self) -> String {
        title_case(&self.kind)
    }

    /// One-line summary for the game loop header and town view.
    pub fn summary(&self) -> String {
        if !self.active {
            return String::new();
        }
        format!(
            "{} - {} ({}%)",
            self.kind_label(),
            self.phase_label(),
            self.progress.clamp(0, 100)
        )
    }
}

/// Terminal record written once the world falls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CataclysmEndState {
    pub status: String,
    pub game_over: bool,
    #[serde(default)]
    pub recorded_turn: u64,
}

fn title_case(raw: &str) -> String {
    raw.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Read the cataclysm state off the world, normalizing and persisting the
/// normalized form in place.
pub fn world_cataclysm_state(world: &mut World) -> Option<CataclysmState> {
    let state = world.flags.cataclysm_state.as_mut()?;
    state.normalize();
    Some(state.clone())
}

/// Record the terminal end state if the cataclysm has reached ruin at full
/// progress. Returns the game-over message when the world fell.
pub fn record_terminal_state(world: &mut World) -> Option<String> {
    let state = world_cataclysm_state(world)?;
    if !state.is_terminal() {
        return None;
    }
    let turn = world.current_turn;
    if world.flags.cataclysm_end_state.is_none() {
        world.flags.cataclysm_end_state = Some(CataclysmEndState {
            status: "world_fell".to_string(),
            game_over: true,
            recorded_turn: turn,
        });
    }
    let kind = if state.kind.is_empty() {
        "The cataclysm".to_string()
    } else {
        state.kind_label()
    };
    Some(format!(
        "{kind} consumes the last havens. The World Fell on turn {turn}."
    ))
}

/// Tiered pushback applied when a quest flagged `cataclysm_pushback` is
/// turned in. The reduction is seeded so identical turn-ins replay exactly.
pub fn apply_quest_pushback(
    world: &mut World,
    quest_id: &str,
    pushback_tier: u32,
    character_id: i64,
) -> i32 {
    let world_turn = world.current_turn;
    let Some(state) = world.flags.cataclysm_state.as_mut() else {
        return 0;
    };
    if !state.active {
        return 0;
    }

    let seed = derive_seed(
        "quest.cataclysm.pushback",
        &SeedContext::new()
            .with("quest_id", quest_id)
            .with("character_id", character_id)
            .with("world_turn", world_turn),
    );
    let mut rng = StdRng::seed_from_u64(seed);
    let tier = pushback_tier.clamp(1, 3) as i32;
    let reduction = rng.gen_range(2..=4) * tier;

    state.progress = (state.progress - reduction).max(0);
    state.last_advance_turn = world_turn;
    reduction
}

/// Spawn special quest objectives once the cataclysm crosses its thresholds.
/// Returns ids of quests added this call.
pub fn spawn_threshold_objectives(world: &mut World) -> Vec<String> {
    use super::world::QuestRow;

    let Some(state) = world.flags.cataclysm_state.clone() else {
        return Vec::new();
    };
    if !state.active {
        return Vec::new();
    }

    let mut spawned = Vec::new();
    let phase_rank = PHASES.iter().position(|phase| *phase == state.phase).unwrap_or(0);

    if phase_rank >= 2 && state.progress >= 15 && !world.flags.quests.contains_key("cataclysm_apex_clash") {
        let mut quest = QuestRow::available("Apex Clash", "kill_any", 1, 220, 90);
        quest.cataclysm_pushback = true;
        quest.pushback_tier = 3;
        world.flags.quests.insert("cataclysm_apex_clash".to_string(), quest);
        spawned.push("cataclysm_apex_clash".to_string());
    }

    if phase_rank >= 1 && !world.flags.quests.contains_key("cataclysm_alliance_accord") {
        let mut quest = QuestRow::available("Alliance Accord", "travel_days", 2, 140, 60);
        quest.cataclysm_pushback = true;
        quest.pushback_tier = 2;
        world
            .flags
            .quests
            .insert("cataclysm_alliance_accord".to_string(), quest);
        spawned.push("cataclysm_alliance_accord".to_string());
    }

    spawned
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_scrubs_invalid_fields() {
        let mut state = CataclysmState {
            active: true,
            kind: "unknown_kind".to_string(),
            phase: "invalid_phase".to_string(),
            progress: 177,
            seed: 0,
            started_turn: 0,
            last_advance_turn: 0,
        };
        state.normalize();
        assert_eq!(state.kind, "");
        assert_eq!(state.phase, "");
        assert_eq!(state.progress, 100);
    }

    #[test]
    fn terminal_state_requires_ruin_at_full_progress() {
        let mut state = CataclysmState {
            active: true,
            kind: "demon_king".to_string(),
            phase: "ruin".to_string(),
            progress: 100,
            ..CataclysmState::default()
        };
        assert!(state.is_terminal());
        state.progress = 99;
        assert!(!state.is_terminal());
        state.progress = 100;
        state.phase = "map_shrinks".to_string();
        assert!(!state.is_terminal());
    }

    #[test]
    fn record_terminal_state_writes_world_fell() {
        let mut world = World::new(1, "World", 3);
        world.flags.cataclysm_state = Some(CataclysmState {
            active: true,
            kind: "demon_king".to_string(),
            phase: "ruin".to_string(),
            progress: 100,
            ..CataclysmState::default()
        });

        let message = record_terminal_state(&mut world).unwrap();
        assert!(message.contains("World Fell"));

        let end_state = world.flags.cataclysm_end_state.as_ref().unwrap();
        assert_eq!(end_state.status, "world_fell");
        assert!(end_state.game_over);
    }

    #[test]
    fn quest_pushback_is_deterministic_and_reduces_progress() {
        let build = || {
            let mut world = World::new(1, "World", 3);
            world.current_turn = 9;
            world.flags.cataclysm_state = Some(CataclysmState {
                active: true,
                kind: "demon_king".to_string(),
                phase: "grip_tightens".to_string(),
                progress: 64,
                ..CataclysmState::default()
            });
            world
        };

        let mut world_a = build();
        let mut world_b = build();
        let reduction_a = apply_quest_pushback(&mut world_a, "cataclysm_alliance_accord", 2, 1);
        let reduction_b = apply_quest_pushback(&mut world_b, "cataclysm_alliance_accord", 2, 1);

        assert!(reduction_a > 0);
        assert_eq!(reduction_a, reduction_b);
        assert_eq!(
            world_a.flags.cataclysm_state.as_ref().unwrap().progress,
            world_b.flags.cataclysm_state.as_ref().unwrap().progress
        );
        assert!(world_a.flags.cataclysm_state.as_ref().unwrap().progress < 64);
    }

    #[test]
    fn apex_objective_spawns_at_threshold() {
        let mut world = World::new(1, "World", 3);
        world.flags.cataclysm_state = Some(CataclysmState {
            active: true,
            kind: "tyrant".to_string(),
            phase: "map_shrinks".to_string(),
            progress: 20,
            ..CataclysmState::default()
        });

        let spawned = spawn_threshold_objectives(&mut world);
        assert!(spawned.contains(&"cataclysm_apex_clash".to_string()));
        assert!(world.flags.quests.contains_key("cataclysm_apex_clash"));

        // Idempotent on re-run.
        let again = spawn_threshold_objectives(&mut world);
        assert!(!again.contains(&"cataclysm_apex_clash".to_string()));
    }

    #[test]
    fn summary_titles_kind_and_phase() {
        let state = CataclysmState {
            active: true,
            kind: "plague".to_string(),
            phase: "grip_tightens".to_string(),
            progress: 48,
            ..CataclysmState::default()
        };
        let summary = state.summary();
        assert!(summary.contains("Plague"));
        assert!(summary.contains("Grip Tightens"));
        assert!(summary.contains("48"));
    }
}
