//! Narrative engine - story seeds, flashpoints, and civic tension
//!
//! Pressure accumulates as story seeds; a resolution (social or combat)
//! picks a seeded variant, applies its effects, and leaves echoes behind
//! that feed the rumour board, NPC dialogue, and encounter difficulty.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::rc::Rc;

use super::character::Character;
use super::entity::Entity;
use super::faction::Faction;
use super::seed::{derive_seed, SeedContext};
use super::world::{FlashpointEcho, SeedStatus, StoryMemory, StorySeed, World};
use crate::repo::FactionRepository;

/// Seed kinds the resolution pipeline understands.
pub const RESOLVABLE_KINDS: [&str; 2] = ["merchant_under_pressure", "faction_flashpoint"];

const DEFAULT_VARIANTS: [&str; 3] = ["prosperity", "debt", "faction_shift"];

/// Runs story-seed lifecycle and flashpoint bookkeeping against the world.
pub struct NarrativeService {
    faction_repo: Option<Rc<dyn FactionRepository>>,
}

impl NarrativeService {
    pub fn new(faction_repo: Option<Rc<dyn FactionRepository>>) -> Self {
        Self { faction_repo }
    }

    // ------------------------------------------------------------------
    // Severity
    // ------------------------------------------------------------------

    pub fn severity_score(resolution: &str, channel: &str, affected_factions: u32, threat_level: i32) -> u32 {
        let base = match resolution {
            "debt" => 60,
            "faction_shift" => 72,
            _ => 35,
        };
        let channel_weight = if channel == "combat" { 8 } else { 3 };
        let faction_weight = (affected_factions * 4).min(18);
        let threat_weight = (((threat_level - 4).max(0)) * 3).min(20) as u32;
        (base + channel_weight + faction_weight + threat_weight).min(100)
    }

    pub fn severity_band(score: u32) -> &'static str {
        match score {
            80.. => "critical",
            60..=79 => "high",
            35..=59 => "moderate",
            _ => "low",
        }
    }

    // ------------------------------------------------------------------
    // Flashpoint pressure feeding the encounter engine
    // ------------------------------------------------------------------

    /// The strongest echo within the lookback window.
    pub fn recent_flashpoint_pressure(world: &World, day: u64, window: u64) -> u32 {
        let lower = day.saturating_sub(window);
        world
            .flags
            .narrative
            .flashpoint_echoes
            .iter()
            .filter(|row| row.turn >= lower)
            .map(|row| row.severity_score)
            .max()
            .unwrap_or(0)
    }

    pub fn latest_flashpoint_bias(world: &World) -> Option<String> {
        world
            .flags
            .narrative
            .flashpoint_echoes
            .iter()
            .rev()
            .find_map(|row| row.bias_faction.clone())
            .filter(|faction| !faction.is_empty())
    }

    /// Flashpoint-driven encounter adjustments:
    /// pressure >= 70 bumps the effective level, >= 60 the enemy cap
    /// (max 3), >= 45 overrides the faction bias toward the latest echo.
    pub fn encounter_flashpoint_adjustments(
        world: &World,
        base_player_level: u32,
        base_max_enemies: u32,
        base_faction_bias: Option<String>,
    ) -> (u32, u32, Option<String>) {
        let day = world.current_turn;
        let pressure = Self::recent_flashpoint_pressure(world, day, 4);
        let flashpoint_bias = Self::latest_flashpoint_bias(world);

        let mut effective_level = base_player_level.max(1);
        if pressure >= 70 {
            effective_level += 1;
        }
        let mut effective_max = base_max_enemies.max(1);
        if pressure >= 60 {
            effective_max += 1;
        }
        effective_max = effective_max.min(3);

        let effective_bias = if pressure >= 45 && flashpoint_bias.is_some() {
            flashpoint_bias
        } else {
            base_faction_bias
        };
        (effective_level, effective_max, effective_bias)
    }

    // ------------------------------------------------------------------
    // Tension and seed spawning
    // ------------------------------------------------------------------

    /// World-tick drift: tension follows open seeds up and quiet turns down.
    pub fn tick_tension(world: &mut World) {
        let open_seeds = world
            .flags
            .narrative
            .story_seeds
            .iter()
            .filter(|seed| seed.is_open())
            .count() as i32;
        let narrative = &mut world.flags.narrative;
        if open_seeds > 0 {
            narrative.tension_level += 2 * open_seeds;
        } else {
            narrative.tension_level -= 1;
        }
        narrative.clamp_tension();
    }

    /// Plant a new story seed when the stage is empty. Deterministic per
    /// `(world seed, turn)`.
    pub fn maybe_spawn_story_seed(world: &mut World) -> Option<String> {
        if world.flags.narrative.active_story_seed().is_some() {
            return None;
        }
        // A quiet world only simmers so often.
        if world.current_turn % 4 != 0 {
            return None;
        }

        let seed = derive_seed(
            "story.seed.spawn",
            &SeedContext::new()
                .with("world_seed", world.rng_seed)
                .with("world_turn", world.current_turn),
        );
        let mut rng = StdRng::seed_from_u64(seed);
        let kind = if world.flags.narrative.tension_level >= 40 || rng.gen_bool(0.35) {
            "faction_flashpoint"
        } else {
            "merchant_under_pressure"
        };
        let seed_id = format!("{kind}_{}", world.current_turn);

        let faction_bias = self_faction_pool(world, &mut rng);
        let mut row = StorySeed::new(&seed_id, kind);
        row.status = SeedStatus::Active;
        row.pressure = world.flags.narrative.tension_level;
        row.faction_bias = faction_bias;
        row.resolution_variants = DEFAULT_VARIANTS.iter().map(|name| name.to_string()).collect();
        world.flags.narrative.story_seeds.push(row);
        // Retire long-resolved seeds so the list stays small.
        if world.flags.narrative.story_seeds.len() > 12 {
            let keep_from = world.flags.narrative.story_seeds.len() - 12;
            world.flags.narrative.story_seeds.drain(..keep_from);
        }
        Some(seed_id)
    }

    /// Escalate a lingering open seed one stage per call.
    pub fn escalate_open_seed(world: &mut World) {
        let turn = world.current_turn;
        if let Some(seed) = world.flags.narrative.active_story_seed_mut() {
            seed.pressure += 1;
            let next = match seed.status {
                SeedStatus::Active if seed.pressure >= 4 => Some(SeedStatus::Simmering),
                SeedStatus::Simmering if seed.pressure >= 8 => Some(SeedStatus::Escalated),
                SeedStatus::Escalated if seed.pressure >= 12 => Some(SeedStatus::Critical),
                _ => None,
            };
            if let Some(status) = next {
                seed.status = status;
                seed.escalation_stage = format!("turn_{turn}");
            }
        }
    }

    // ------------------------------------------------------------------
    // Resolution pipelines
    // ------------------------------------------------------------------

    /// Resolve the active seed through a successful social exchange.
    pub fn resolve_active_seed_social(
        &self,
        world: &mut World,
        character: &mut Character,
        npc_id: &str,
        approach: &str,
    ) -> Vec<String> {
        let Some(active) = world.flags.narrative.active_story_seed().cloned() else {
            return Vec::new();
        };
        if !RESOLVABLE_KINDS.contains(&active.kind.as_str()) {
            return Vec::new();
        }

        let tension = world.flags.narrative.tension_level;
        let world_turn = world.current_turn;
        let seed = derive_seed(
            "story.seed.resolve",
            &SeedContext::new()
                .with("seed_id", active.seed_id.clone())
                .with("character_id", character.id)
                .with("npc_id", npc_id)
                .with("approach", approach)
                .with("world_turn", world_turn)
                .with("tension", tension),
        );
        let mut rng = StdRng::seed_from_u64(seed);
        let variants = if active.resolution_variants.is_empty() {
            DEFAULT_VARIANTS.iter().map(|name| name.to_string()).collect()
        } else {
            active.resolution_variants.clone()
        };
        let resolution = variants[rng.gen_range(0..variants.len())].clone();
        let is_flashpoint = active.kind == "faction_flashpoint";

        let mut messages = Vec::new();
        match resolution.as_str() {
            "prosperity" => {
                let reward = if is_flashpoint { 4 } else { 6 };
                character.money += reward;
                let faction_delta = if is_flashpoint { 3 } else { 2 };
                self.apply_seed_faction_effect(character.id, active.faction_bias.as_deref(), faction_delta);
                if is_flashpoint {
                    messages.push(format!(
                        "Story seed resolved (prosperity): border accord holds (+{reward} gold, influence +{faction_delta})."
                    ));
                } else {
                    messages.push(format!(
                        "Story seed resolved (prosperity): trade routes stabilise (+{reward} gold)."
                    ));
                }
            }
            "debt" => {
                let loss_cap = if is_flashpoint { 3 } else { 4 };
                let loss = character.money.min(loss_cap);
                character.money = (character.money - loss).max(0);
                let threat_shift = if is_flashpoint { 2 } else { 1 };
                world.raise_threat(threat_shift);
                if is_flashpoint {
                    messages.push(format!(
                        "Story seed resolved (debt): failed talks embolden militias (-{loss} gold, threat +{threat_shift})."
                    ));
                } else {
                    messages.push(format!(
                        "Story seed resolved (debt): merchants absorb losses (-{loss} gold, threat +1)."
                    ));
                }
            }
            _ => {
                let faction_delta = if is_flashpoint { 4 } else { 3 };
                self.apply_seed_faction_effect(character.id, active.faction_bias.as_deref(), faction_delta);
                if is_flashpoint {
                    messages.push(
                        "Story seed resolved (faction shift): command authority transfers after tense mediation."
                            .to_string(),
                    );
                } else {
                    messages
                        .push("Story seed resolved (faction shift): local influence changes hands.".to_string());
                }
            }
        }

        self.finish_resolution(world, character.id, &active, &resolution, "social", None);
        messages
    }

    /// Resolve the active seed through a combat victory.
    pub fn resolve_active_seed_combat(
        &self,
        world: &mut World,
        character: &mut Character,
        monster: &Entity,
    ) -> Vec<String> {
        let Some(active) = world.flags.narrative.active_story_seed().cloned() else {
            return Vec::new();
        };
        if !RESOLVABLE_KINDS.contains(&active.kind.as_str()) {
            return Vec::new();
        }

        let tension = world.flags.narrative.tension_level;
        let world_turn = world.current_turn;
        let seed = derive_seed(
            "story.seed.resolve.combat",
            &SeedContext::new()
                .with("seed_id", active.seed_id.clone())
                .with("character_id", character.id)
                .with("monster_id", monster.id)
                .with("monster_faction", monster.faction_id.clone().unwrap_or_default())
                .with("world_turn", world_turn)
                .with("tension", tension),
        );
        let mut rng = StdRng::seed_from_u64(seed);
        let variants = if active.resolution_variants.is_empty() {
            DEFAULT_VARIANTS.iter().map(|name| name.to_string()).collect()
        } else {
            active.resolution_variants.clone()
        };
        let resolution = variants[rng.gen_range(0..variants.len())].clone();
        let is_flashpoint = active.kind == "faction_flashpoint";

        let mut messages = Vec::new();
        match resolution.as_str() {
            "prosperity" => {
                let threat_drop = if is_flashpoint { 2 } else { 1 };
                world.lower_threat(threat_drop);
                let faction_delta = if is_flashpoint { 3 } else { 2 };
                self.apply_seed_faction_effect(character.id, active.faction_bias.as_deref(), faction_delta);
                if is_flashpoint {
                    messages.push(format!(
                        "Story seed resolved (prosperity): militia victory secures crossings (threat -{threat_drop})."
                    ));
                } else {
                    messages.push(
                        "Story seed resolved (prosperity): caravan routes are secured (threat -1).".to_string(),
                    );
                }
            }
            "debt" => {
                let threat_rise = if is_flashpoint { 2 } else { 1 };
                world.raise_threat(threat_rise);
                if is_flashpoint {
                    messages.push(format!(
                        "Story seed resolved (debt): pyrrhic victory deepens faction grudges (threat +{threat_rise})."
                    ));
                } else {
                    messages.push(
                        "Story seed resolved (debt): raiders retreat, but losses keep markets unstable (threat +1)."
                            .to_string(),
                    );
                }
            }
            _ => {
                let faction_delta = if is_flashpoint { 4 } else { 3 };
                self.apply_seed_faction_effect(character.id, active.faction_bias.as_deref(), faction_delta);
                if is_flashpoint {
                    messages.push(
                        "Story seed resolved (faction shift): battlefield command reorders the regional balance."
                            .to_string(),
                    );
                } else {
                    messages.push(
                        "Story seed resolved (faction shift): the victory redistributes local influence."
                            .to_string(),
                    );
                }
            }
        }

        self.finish_resolution(world, character.id, &active, &resolution, "combat", Some(monster.id));
        messages
    }

    /// Shared epilogue: mark the seed, append memory, and for flashpoints
    /// run downstream faction effects plus the echo.
    fn finish_resolution(
        &self,
        world: &mut World,
        character_id: i64,
        active: &StorySeed,
        resolution: &str,
        channel: &str,
        monster_id: Option<i64>,
    ) {
        let world_turn = world.current_turn;
        if let Some(row) = world
            .flags
            .narrative
            .story_seeds
            .iter_mut()
            .find(|row| row.seed_id == active.seed_id)
        {
            row.status = SeedStatus::Resolved;
            row.resolution = Some(resolution.to_string());
            row.resolved_turn = Some(world_turn);
            row.resolved_by = Some(channel.to_string());
            row.resolved_monster_id = monster_id;
        }

        if active.kind == "faction_flashpoint" {
            let aftershock = self.apply_flashpoint_downstream_effects(
                world,
                &active.seed_id,
                active.faction_bias.as_deref().unwrap_or(""),
                character_id,
                resolution,
                channel,
            );
            if !aftershock.is_empty() {
                world.append_consequence("flashpoint_aftershock", &aftershock, "normal", world_turn);
            }
        }

        world.flags.narrative.major_events.push(StoryMemory {
            turn: world_turn,
            seed_id: active.seed_id.clone(),
            kind: active.kind.clone(),
            resolution: resolution.to_string(),
            actor: character_id,
            monster_id,
        });

        let message = format!("Story seed '{}' resolved ({resolution}).", active.seed_id);
        world.append_consequence("story_seed_resolved", &message, "normal", world_turn);
    }

    fn apply_seed_faction_effect(&self, character_id: i64, faction_hint: Option<&str>, delta: i32) {
        let Some(repo) = &self.faction_repo else {
            return;
        };
        let target = Faction::reputation_key(character_id);
        let hinted = faction_hint
            .map(|hint| hint.trim().to_ascii_lowercase())
            .filter(|hint| !hint.is_empty())
            .and_then(|hint| repo.get(&hint));
        let mut faction = match hinted {
            Some(faction) => faction,
            None => {
                let mut all = repo.list_all();
                all.sort_by(|a, b| a.id.cmp(&b.id));
                match all.into_iter().next() {
                    Some(faction) => faction,
                    None => return,
                }
            }
        };
        faction.adjust_reputation(&target, delta);
        repo.save(&faction);
    }

    /// Ripple a resolved flashpoint across every tracked faction, then
    /// append the echo row. Returns the aftershock message.
    fn apply_flashpoint_downstream_effects(
        &self,
        world: &mut World,
        seed_id: &str,
        faction_bias: &str,
        character_id: i64,
        resolution: &str,
        channel: &str,
    ) -> String {
        let world_turn = world.current_turn;
        let echo_seed = derive_seed(
            "story.flashpoint.aftershock",
            &SeedContext::new()
                .with("seed_id", seed_id)
                .with("character_id", character_id)
                .with("resolution", resolution)
                .with("channel", channel)
                .with("turn", world_turn)
                .with(
                    "faction_bias",
                    if faction_bias.is_empty() { "none" } else { faction_bias },
                ),
        );
        let mut rng = StdRng::seed_from_u64(echo_seed);

        let mut bias_faction = faction_bias.trim().to_ascii_lowercase();
        let mut rival_faction = String::new();
        let mut affected_count: u32 = 0;

        if let Some(repo) = &self.faction_repo {
            let target = Faction::reputation_key(character_id);
            let mut factions = repo.list_all();
            factions.sort_by(|a, b| a.id.cmp(&b.id));
            if !factions.is_empty() {
                let bias_row = if bias_faction.is_empty() {
                    None
                } else {
                    repo.get(&bias_faction)
                };
                let bias_row = bias_row.unwrap_or_else(|| factions[0].clone());
                bias_faction = bias_row.id.clone();

                let rival_pool: Vec<String> = factions
                    .iter()
                    .filter(|row| row.id != bias_faction)
                    .map(|row| row.id.clone())
                    .collect();
                if !rival_pool.is_empty() {
                    rival_faction = rival_pool[rng.gen_range(0..rival_pool.len())].clone();
                }

                for mut faction in factions {
                    let has_tracked_standing = faction.reputation.contains_key(&target);
                    let is_involved = faction.id == bias_faction || faction.id == rival_faction;
                    if !has_tracked_standing && !is_involved {
                        continue;
                    }

                    let delta = if faction.id == bias_faction {
                        match resolution {
                            "prosperity" => 2,
                            "debt" => -3,
                            _ => 3,
                        }
                    } else if !rival_faction.is_empty() && faction.id == rival_faction {
                        match resolution {
                            "prosperity" => -1,
                            "debt" => 1,
                            _ => -3,
                        }
                    } else {
                        match resolution {
                            "prosperity" => 1,
                            "debt" => -1,
                            _ => 0,
                        }
                    };

                    if delta != 0 {
                        faction.adjust_reputation(&target, delta);
                        repo.save(&faction);
                        affected_count += 1;
                    }
                }
            }
        }

        let severity_score =
            Self::severity_score(resolution, channel, affected_count, world.threat_level);
        world.flags.narrative.flashpoint_echoes.push(FlashpointEcho {
            turn: world_turn,
            seed_id: seed_id.to_string(),
            resolution: resolution.to_string(),
            channel: channel.to_string(),
            bias_faction: (!bias_faction.is_empty()).then_some(bias_faction),
            rival_faction: (!rival_faction.is_empty()).then_some(rival_faction),
            affected_factions: affected_count,
            severity_score,
            severity_band: Self::severity_band(severity_score).to_string(),
        });

        match resolution {
            "prosperity" => "Flashpoint aftershock: patrol terms hold, but rival blocs resent the settlement.",
            "debt" => "Flashpoint aftershock: supply strain widens faction mistrust across the frontier.",
            _ => "Flashpoint aftershock: command realignment ripples through local allegiances.",
        }
        .to_string()
    }
}

fn self_faction_pool(world: &World, rng: &mut StdRng) -> Option<String> {
    // Prefer a faction already entangled in the relationship graph.
    let mut seen: Vec<String> = Vec::new();
    for key in world.flags.narrative.relationship_graph.keys() {
        for part in key.split('|') {
            let slug = part.trim().to_ascii_lowercase();
            if !slug.is_empty() && !seen.contains(&slug) {
                seen.push(slug);
            }
        }
    }
    if seen.is_empty() {
        return None;
    }
    Some(seen[rng.gen_range(0..seen.len())].clone())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::memory::InMemoryFactionRepository;

    fn world() -> World {
        World::new(1, "Default World", 7)
    }

    fn push_echo(world: &mut World, turn: u64, severity: u32, bias: &str) {
        world.flags.narrative.flashpoint_echoes.push(FlashpointEcho {
            turn,
            seed_id: format!("seed_{turn}"),
            resolution: "faction_shift".to_string(),
            channel: "combat".to_string(),
            bias_faction: Some(bias.to_string()),
            rival_faction: None,
            affected_factions: 2,
            severity_score: severity,
            severity_band: NarrativeService::severity_band(severity).to_string(),
        });
    }

    #[test]
    fn severity_score_matches_banding() {
        let score = NarrativeService::severity_score("faction_shift", "combat", 3, 9);
        // 72 + 8 + 12 + 15 = 100 (capped).
        assert_eq!(score, 100);
        assert_eq!(NarrativeService::severity_band(score), "critical");
        assert_eq!(NarrativeService::severity_band(45), "moderate");
        assert_eq!(NarrativeService::severity_band(10), "low");

        let mild = NarrativeService::severity_score("prosperity", "social", 0, 0);
        assert_eq!(mild, 38);
    }

    #[test]
    fn flashpoint_pressure_adjusts_encounter_context() {
        let mut world = world();
        world.current_turn = 10;
        push_echo(&mut world, 10, 84, "wardens");

        let (level, max_enemies, bias) = NarrativeService::encounter_flashpoint_adjustments(
            &world,
            2,
            2,
            Some("wild".to_string()),
        );
        assert_eq!((level, max_enemies, bias.as_deref()), (3, 3, Some("wardens")));
    }

    #[test]
    fn low_pressure_keeps_base_context() {
        let mut world = world();
        world.current_turn = 10;
        push_echo(&mut world, 10, 30, "wardens");

        let (level, max_enemies, bias) = NarrativeService::encounter_flashpoint_adjustments(
            &world,
            2,
            2,
            Some("wild".to_string()),
        );
        assert_eq!((level, max_enemies, bias.as_deref()), (2, 2, Some("wild")));
    }

    #[test]
    fn stale_echoes_fall_out_of_the_window() {
        let mut world = world();
        world.current_turn = 20;
        push_echo(&mut world, 3, 90, "wardens");
        assert_eq!(NarrativeService::recent_flashpoint_pressure(&world, 20, 4), 0);
    }

    #[test]
    fn social_resolution_marks_seed_and_appends_memory() {
        let repo = Rc::new(InMemoryFactionRepository::new(vec![
            Faction::new("wardens", "The Wardens"),
            Faction::new("syndicate", "The Syndicate"),
        ]));
        let service = NarrativeService::new(Some(repo.clone()));
        let mut world = world();
        world.current_turn = 6;
        let mut seed = StorySeed::new("merchant_under_pressure_4", "merchant_under_pressure");
        seed.faction_bias = Some("wardens".to_string());
        seed.resolution_variants = vec!["prosperity".to_string()];
        world.flags.narrative.story_seeds.push(seed);

        let mut character = Character::new(21, "Vale");
        let messages =
            service.resolve_active_seed_social(&mut world, &mut character, "broker_silas", "friendly");

        assert!(!messages.is_empty());
        assert!(messages[0].contains("prosperity"));
        assert_eq!(character.money, 6);
        assert!(world.flags.narrative.active_story_seed().is_none());
        assert_eq!(world.flags.narrative.major_events.len(), 1);
        // Prosperity on a hinted faction raised the tracked reputation.
        assert_eq!(repo.get("wardens").unwrap().reputation_for(21), 2);
    }

    #[test]
    fn flashpoint_resolution_leaves_an_echo_with_severity() {
        let repo = Rc::new(InMemoryFactionRepository::new(vec![
            Faction::new("wardens", "The Wardens"),
            Faction::new("syndicate", "The Syndicate"),
            Faction::new("wild", "The Wild Court"),
        ]));
        let service = NarrativeService::new(Some(repo));
        let mut world = world();
        world.current_turn = 9;
        world.threat_level = 6;
        let mut seed = StorySeed::new("faction_flashpoint_8", "faction_flashpoint");
        seed.faction_bias = Some("wardens".to_string());
        world.flags.narrative.story_seeds.push(seed);

        let mut character = Character::new(21, "Vale");
        let monster = Entity::new(99, "Raid Captain", 4, 30);
        let messages = service.resolve_active_seed_combat(&mut world, &mut character, &monster);

        assert!(!messages.is_empty());
        let echo = world.flags.narrative.flashpoint_echoes.latest().unwrap();
        assert_eq!(echo.seed_id, "faction_flashpoint_8");
        assert_eq!(echo.channel, "combat");
        assert!(echo.severity_score > 0);
        assert!(!echo.severity_band.is_empty());
        assert_eq!(echo.bias_faction.as_deref(), Some("wardens"));
    }

    #[test]
    fn resolutions_are_deterministic_for_identical_context() {
        let build = || {
            let repo = Rc::new(InMemoryFactionRepository::new(vec![Faction::new(
                "wardens",
                "The Wardens",
            )]));
            let service = NarrativeService::new(Some(repo));
            let mut world = world();
            world.current_turn = 5;
            world.flags.narrative.story_seeds.push(StorySeed::new(
                "merchant_under_pressure_4",
                "merchant_under_pressure",
            ));
            let mut character = Character::new(21, "Vale");
            let messages =
                service.resolve_active_seed_social(&mut world, &mut character, "broker_silas", "friendly");
            (messages, character.money, world.threat_level)
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn tension_drifts_with_open_seeds() {
        let mut world = world();
        NarrativeService::tick_tension(&mut world);
        assert_eq!(world.flags.narrative.tension_level, 0);

        world
            .flags
            .narrative
            .story_seeds
            .push(StorySeed::new("seed_a", "merchant_under_pressure"));
        NarrativeService::tick_tension(&mut world);
        assert_eq!(world.flags.narrative.tension_level, 2);
    }

    #[test]
    fn seed_spawning_is_deterministic_and_spaced() {
        let mut world_a = world();
        world_a.current_turn = 8;
        let mut world_b = world();
        world_b.current_turn = 8;
        assert_eq!(
            NarrativeService::maybe_spawn_story_seed(&mut world_a),
            NarrativeService::maybe_spawn_story_seed(&mut world_b)
        );

        // Off-cadence turns spawn nothing.
        let mut world_c = world();
        world_c.current_turn = 9;
        assert_eq!(NarrativeService::maybe_spawn_story_seed(&mut world_c), None);
    }
}
