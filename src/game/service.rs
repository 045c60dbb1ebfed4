//! Game service - the intent surface the UI drives
//!
//! Every intent loads current state through the repositories, derives any
//! seeds it needs, runs the core logic, persists atomically (with history
//! rows), and hands back a view DTO. The world only advances when an intent
//! calls `advance_world`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::rc::Rc;

use super::cataclysm;
use super::character::Character;
use super::combat::{ChooseAction, CombatResult, CombatService};
use super::config::GameConfig;
use super::dialogue::{ChoiceResolution, DialogueEngine, DialogueSessionView};
use super::encounter::{EncounterPlan, EncounterRequest, EncounterService, EncounterSource};
use super::entity::Entity;
use super::errors::{GameError, GameResult};
use super::event_bus::{EventBus, GameEvent};
use super::location::Location;
use super::narrative::NarrativeService;
use super::party::{ChooseTarget, EvaluateAllyAction, PartyCombatResult};
use super::progression::{LevelUpPendingView, ProgressionService};
use super::quest::QuestState;
use super::scene::Scene;
use super::seed::{derive_seed, SeedContext, SeedValue};
use super::views::*;
use super::world::{NpcMemoryEvent, QuestRow, QuestStatus, World};
use crate::data::balance;
use crate::data::items;
use crate::data::npcs::{find_town_npc, npc_greeting};
use crate::repo::{
    AtomicStatePersistor, CharacterRepository, EncounterDefinitionRepository, EntityRepository,
    FactionRepository, FeatureRepository, LocationRepository, LocationStateRepository, Operation,
    QuestStateRepository, SpellRepository, WorldRepository,
};

const SOCIAL_APPROACHES: [&str; 7] = [
    "friendly",
    "direct",
    "intimidate",
    "leverage intel",
    "call in favor",
    "invoke faction",
    "bribe",
];

/// The orchestrator behind the whole intent surface.
pub struct GameService {
    character_repo: Rc<dyn CharacterRepository>,
    entity_repo: Option<Rc<dyn EntityRepository>>,
    location_repo: Option<Rc<dyn LocationRepository>>,
    world_repo: Option<Rc<dyn WorldRepository>>,
    faction_repo: Option<Rc<dyn FactionRepository>>,
    quest_state_repo: Option<Rc<dyn QuestStateRepository>>,
    location_state_repo: Option<Rc<dyn LocationStateRepository>>,
    feature_repo: Option<Rc<dyn FeatureRepository>>,
    combat_spell_repo: Option<Rc<dyn SpellRepository>>,
    definition_repo: Option<Rc<dyn EncounterDefinitionRepository>>,
    persistor: Option<Rc<dyn AtomicStatePersistor>>,
    config: GameConfig,
    encounter_service: Option<EncounterService>,
    combat_service: RefCell<CombatService>,
    narrative: NarrativeService,
    dialogue: DialogueEngine,
    progression: ProgressionService,
    event_bus: RefCell<EventBus>,
}

impl GameService {
    pub fn new(character_repo: Rc<dyn CharacterRepository>) -> Self {
        let config = GameConfig::from_env();
        Self {
            character_repo,
            entity_repo: None,
            location_repo: None,
            world_repo: None,
            faction_repo: None,
            quest_state_repo: None,
            location_state_repo: None,
            feature_repo: None,
            combat_spell_repo: None,
            definition_repo: None,
            persistor: None,
            config,
            encounter_service: None,
            combat_service: RefCell::new(CombatService::new(None, None)),
            narrative: NarrativeService::new(None),
            dialogue: DialogueEngine::new(config, crate::data::dialogue::load_dialogue_content_cached()),
            progression: ProgressionService,
            event_bus: RefCell::new(EventBus::new()),
        }
    }

    pub fn with_config(mut self, config: GameConfig) -> Self {
        self.config = config;
        self.dialogue = DialogueEngine::new(config, crate::data::dialogue::load_dialogue_content_cached());
        self
    }

    pub fn config(&self) -> GameConfig {
        self.config
    }

    pub fn with_entity_repo(mut self, repo: Rc<dyn EntityRepository>) -> Self {
        self.encounter_service = Some(EncounterService::new(
            Rc::clone(&repo),
            self.definition_repo_for_encounters(),
        ));
        self.entity_repo = Some(repo);
        self
    }

    pub fn with_location_repo(mut self, repo: Rc<dyn LocationRepository>) -> Self {
        self.location_repo = Some(repo);
        self
    }

    pub fn with_world_repo(mut self, repo: Rc<dyn WorldRepository>) -> Self {
        self.world_repo = Some(repo);
        self
    }

    pub fn with_faction_repo(mut self, repo: Rc<dyn FactionRepository>) -> Self {
        self.narrative = NarrativeService::new(Some(Rc::clone(&repo)));
        self.faction_repo = Some(repo);
        self
    }

    pub fn with_quest_state_repo(mut self, repo: Rc<dyn QuestStateRepository>) -> Self {
        self.quest_state_repo = Some(repo);
        self
    }

    pub fn with_location_state_repo(mut self, repo: Rc<dyn LocationStateRepository>) -> Self {
        self.location_state_repo = Some(repo);
        self
    }

    pub fn with_feature_repo(mut self, repo: Rc<dyn FeatureRepository>) -> Self {
        self.feature_repo = Some(repo);
        self.rebuild_combat_service();
        self
    }

    pub fn with_spell_repo(mut self, repo: Rc<dyn SpellRepository>) -> Self {
        self.combat_spell_repo = Some(repo);
        self.rebuild_combat_service();
        self
    }

    fn rebuild_combat_service(&mut self) {
        self.combat_service = RefCell::new(CombatService::new(
            self.feature_repo.as_ref().map(Rc::clone),
            self.combat_spell_repo.as_ref().map(Rc::clone),
        ));
    }

    pub fn with_persistor(mut self, persistor: Rc<dyn AtomicStatePersistor>) -> Self {
        self.persistor = Some(persistor);
        self
    }

    pub fn with_definition_repo(mut self, repo: Rc<dyn EncounterDefinitionRepository>) -> Self {
        self.definition_repo = Some(repo);
        if let Some(entity_repo) = &self.entity_repo {
            self.encounter_service = Some(EncounterService::new(
                Rc::clone(entity_repo),
                self.definition_repo_for_encounters(),
            ));
        }
        self
    }

    fn definition_repo_for_encounters(&self) -> Option<Rc<dyn EncounterDefinitionRepository>> {
        self.definition_repo.as_ref().map(Rc::clone)
    }

    // ------------------------------------------------------------------
    // Loading helpers
    // ------------------------------------------------------------------

    fn require_character(&self, character_id: i64) -> GameResult<Character> {
        self.character_repo
            .get(character_id)
            .ok_or(GameError::UnknownCharacter(character_id))
    }

    fn require_world(&self) -> GameResult<World> {
        self.world_repo
            .as_ref()
            .and_then(|repo| repo.load_default())
            .ok_or(GameError::WorldNotInitialized)
    }

    fn location_of(&self, character: &Character) -> Option<Location> {
        let location_id = character.location_id?;
        self.location_repo.as_ref()?.get(location_id)
    }

    fn save_world(&self, world: &World) {
        if let Some(repo) = &self.world_repo {
            repo.save(world);
        }
    }

    /// Atomic persist with best-effort fallback. Returns whether the atomic
    /// path succeeded.
    fn persist_character_world_atomic(
        &self,
        character: &Character,
        world: &World,
        operations: Vec<Operation>,
    ) -> bool {
        if let Some(persistor) = &self.persistor {
            match persistor.persist(character, world, operations) {
                Ok(()) => return true,
                Err(error) => {
                    tracing::warn!(%error, "atomic persist failed; falling back to per-repo saves");
                }
            }
        }
        self.character_repo.save(character);
        self.save_world(world);
        false
    }

    // ------------------------------------------------------------------
    // World advancement
    // ------------------------------------------------------------------

    /// Advance the world clock: quest expiry, narrative drift, cataclysm
    /// escalation. Returns the updated world.
    pub fn advance_world(&self, ticks: u64, persist: bool) -> GameResult<World> {
        let mut world = self.require_world()?;
        for _ in 0..ticks.max(1) {
            world.advance_turns(1);
            self.expire_overdue_quests(&mut world);
            NarrativeService::tick_tension(&mut world);
            NarrativeService::maybe_spawn_story_seed(&mut world);
            NarrativeService::escalate_open_seed(&mut world);
            self.advance_cataclysm(&mut world);
            self.event_bus.borrow_mut().publish(GameEvent::WorldTicked {
                world_turn: world.current_turn,
            });
        }
        if persist {
            self.save_world(&world);
        }
        Ok(world)
    }

    fn expire_overdue_quests(&self, world: &mut World) {
        let turn = world.current_turn;
        let mut expired = Vec::new();
        for (quest_id, quest) in world.flags.quests.iter_mut() {
            if quest.status != QuestStatus::Active {
                continue;
            }
            if let Some(expires) = quest.expires_turn {
                if turn > expires {
                    quest.status = QuestStatus::Failed;
                    expired.push((quest_id.clone(), quest.title.clone()));
                }
            }
        }
        for (_, title) in expired {
            world.append_consequence(
                "quest_expired",
                &format!("The window for '{title}' has closed."),
                "minor",
                turn,
            );
        }
    }

    fn advance_cataclysm(&self, world: &mut World) {
        let turn = world.current_turn;
        let rng_seed = world.rng_seed;
        let Some(state) = world.flags.cataclysm_state.as_mut() else {
            return;
        };
        if !state.active {
            return;
        }
        state.normalize();
        if state.is_terminal() {
            return;
        }

        let seed = derive_seed(
            "cataclysm.advance",
            &SeedContext::new().with("world_seed", rng_seed).with("turn", turn),
        );
        let mut rng = StdRng::seed_from_u64(seed);
        let gain = rng.gen_range(1..=3);
        state.progress = (state.progress + gain).min(100);
        state.last_advance_turn = turn;
        state.phase = match state.progress {
            0..=24 => "simmering",
            25..=54 => "grip_tightens",
            55..=99 => "map_shrinks",
            _ => "ruin",
        }
        .to_string();

        cataclysm::spawn_threshold_objectives(world);
        cataclysm::record_terminal_state(world);
    }

    // ------------------------------------------------------------------
    // Header and location context
    // ------------------------------------------------------------------

    pub fn get_game_loop_view(&self, character_id: i64) -> GameResult<GameLoopView> {
        let character = self.require_character(character_id)?;
        let mut world = self.require_world()?;
        let cataclysm_state = cataclysm::world_cataclysm_state(&mut world).unwrap_or_default();
        self.save_world(&world);

        Ok(GameLoopView {
            name: character.name.clone(),
            race_name: character.race_name.clone(),
            class_name: character.class_name.clone(),
            level: character.level,
            hp_current: character.hp_current,
            hp_max: character.hp_max,
            world_turn: world.current_turn,
            threat_level: world.threat_level,
            cataclysm_active: cataclysm_state.active,
            cataclysm_kind: cataclysm_state.kind.clone(),
            cataclysm_phase: cataclysm_state.phase.clone(),
            cataclysm_progress: cataclysm_state.progress,
            cataclysm_summary: cataclysm_state.summary(),
        })
    }

    pub fn get_location_context_intent(&self, character_id: i64) -> GameResult<LocationContextView> {
        let character = self.require_character(character_id)?;
        let location = self.location_of(&character);
        let world = self.require_world()?;

        let (location_type, title) = match &location {
            Some(location) if location.is_town() => {
                let name = world
                    .flags
                    .settlement_names
                    .get(&location.id.to_string())
                    .cloned()
                    .unwrap_or_else(|| location.name.clone());
                ("town".to_string(), name)
            }
            Some(location) => ("wilderness".to_string(), location.name.clone()),
            None => ("wilderness".to_string(), "Uncharted Ground".to_string()),
        };

        let mut labels: Vec<String> = location
            .as_ref()
            .map(|row| row.tags.clone())
            .unwrap_or_default();
        if let Some(location) = &location {
            if let Some(layers) = world.flags.town_layers.get(&location.id.to_string()) {
                labels.extend(layers.iter().cloned());
            }
            labels.push(location.biome.clone());
        }

        Ok(LocationContextView {
            location_type,
            title,
            labels,
        })
    }

    // ------------------------------------------------------------------
    // Exploration
    // ------------------------------------------------------------------

    /// Generate the encounter plan for the character's location, applying
    /// flashpoint and cataclysm pressure, then advance the world one tick.
    pub fn explore(&self, character_id: i64) -> GameResult<(EncounterPlan, Character, World)> {
        let character = self.require_character(character_id)?;
        let mut world = self.require_world()?;

        let Some(encounter_service) = &self.encounter_service else {
            let plan = EncounterPlan::empty(EncounterSource::Disabled);
            return Ok((plan, character, world));
        };

        let location = self.location_of(&character);
        let base_bias = location
            .as_ref()
            .and_then(|row| row.factions.first().cloned());
        // Dominant faction heat leans encounters toward that faction.
        let base_bias = character
            .dominant_heat_faction()
            .filter(|(_, score)| *score >= 10)
            .map(|(faction, _)| faction)
            .or(base_bias);

        let (mut effective_level, mut effective_max, effective_bias) =
            NarrativeService::encounter_flashpoint_adjustments(
                &world,
                character.level,
                2,
                base_bias,
            );

        let cataclysm_state = cataclysm::world_cataclysm_state(&mut world).unwrap_or_default();
        let (level_bonus, enemy_bonus) = cataclysm_state.encounter_pressure();
        effective_level += level_bonus;
        effective_max = (effective_max + enemy_bonus).min(3);
        let mut extra_hazards = Vec::new();
        if let Some(flag) = cataclysm_state.hazard_flag() {
            extra_hazards.push(flag);
        }

        let request = EncounterRequest {
            location_id: character.location_id.unwrap_or(0),
            player_level: effective_level,
            world_turn: world.current_turn,
            faction_bias: effective_bias,
            max_enemies: effective_max,
            location_biome: location
                .as_ref()
                .map(|row| row.biome.clone())
                .unwrap_or_else(|| "wilderness".to_string()),
            world_flags: world.flag_projection(),
            extra_hazards,
        };
        let plan = encounter_service.generate_plan(&request, location.as_ref());
        let world = self.advance_world(1, true)?;
        Ok((plan, character, world))
    }

    pub fn explore_intent(&self, character_id: i64) -> GameResult<(ExploreView, Character, Vec<Entity>)> {
        let (plan, mut character, _world) = self.explore(character_id)?;

        let mut hazard_message = String::new();
        if !plan.hazards.is_empty() {
            let (message, skip_encounter) = self.resolve_explore_hazard(&mut character, &plan)?;
            hazard_message = message;
            if skip_encounter {
                return Ok((
                    ExploreView {
                        has_encounter: false,
                        message: hazard_message,
                        enemies: Vec::new(),
                    },
                    character,
                    Vec::new(),
                ));
            }
        }

        if plan.enemies.is_empty() {
            let event_message = self.apply_noncombat_explore_event(&mut character)?;
            let message = if hazard_message.is_empty() {
                event_message
            } else {
                format!("{hazard_message} {event_message}").trim().to_string()
            };
            return Ok((
                ExploreView {
                    has_encounter: false,
                    message,
                    enemies: Vec::new(),
                },
                character,
                Vec::new(),
            ));
        }

        let names: Vec<String> = plan.enemies.iter().map(|row| row.name.clone()).collect();
        let message = format!("Hostiles ahead: {}.", names.join(", "));
        let message = if hazard_message.is_empty() {
            message
        } else {
            format!("{hazard_message} {message}")
        };
        Ok((
            ExploreView {
                has_encounter: true,
                message,
                enemies: plan.enemies.clone(),
            },
            character,
            plan.enemies,
        ))
    }

    /// Seeded hazard check. Returns `(message, skip_encounter)`.
    fn resolve_explore_hazard(
        &self,
        character: &mut Character,
        plan: &EncounterPlan,
    ) -> GameResult<(String, bool)> {
        let mut world = self.require_world()?;
        let location = self.location_of(character);
        let hazard_names: Vec<String> = plan
            .hazards
            .iter()
            .filter(|row| !row.trim().is_empty())
            .cloned()
            .collect();
        let Some(lead_hazard) = hazard_names.first().cloned() else {
            return Ok((String::new(), false));
        };

        // A matching utility item bypasses the check entirely.
        if let Some(counter) = items::hazard_counter_item(&lead_hazard) {
            if character.remove_inventory_item(counter) {
                self.persist_character_world_atomic(character, &world, Vec::new());
                return Ok((
                    format!("Your {counter} sees you past {lead_hazard} unharmed."),
                    false,
                ));
            }
        }

        let seed = derive_seed(
            "explore.hazard.check",
            &SeedContext::new()
                .with("character_id", character.id)
                .with("world_turn", world.current_turn)
                .with("location_id", character.location_id.unwrap_or(0))
                .with(
                    "biome",
                    location
                        .as_ref()
                        .map(|row| row.biome.clone())
                        .unwrap_or_else(|| "wilderness".to_string()),
                )
                .with(
                    "hazards",
                    SeedValue::List(
                        hazard_names
                            .iter()
                            .map(|row| SeedValue::Str(row.clone()))
                            .collect(),
                    ),
                )
                .with("enemy_count", plan.enemies.len() as u64),
        );
        let mut rng = StdRng::seed_from_u64(seed);

        let skill_mod = character
            .attributes
            .dexterity_mod()
            .max(character.attributes.wisdom_mod());
        let dc = 12 + (hazard_names.len() as i32).min(4);
        let roll = rng.gen_range(1..=20);
        let total = roll + skill_mod;

        if total >= dc {
            return Ok((
                format!("You navigate {lead_hazard} safely ({total} vs DC {dc})."),
                false,
            ));
        }

        let hp_loss_cap = (character.hp_current - 1).max(0);
        let hp_loss = (character.hp_max / 14).max(1).min(hp_loss_cap);
        if hp_loss > 0 {
            character.hp_current = (character.hp_current - hp_loss).max(1);
        }
        world.raise_threat(1);

        let mut operations = Vec::new();
        if let (Some(repo), Some(location_id)) = (&self.location_state_repo, character.location_id) {
            operations.push(repo.build_location_flag_change_operation(
                location_id,
                world.current_turn,
                "hazard:last_resolution",
                None,
                lead_hazard.clone(),
                "explore_hazard_failed_check".to_string(),
            ));
        }
        self.persist_character_world_atomic(character, &world, operations);

        let forced_retreat = !plan.enemies.is_empty() && rng.gen_range(1..=100) <= 35;
        if forced_retreat {
            return Ok((
                format!("{lead_hazard} disrupts your route (-{hp_loss} HP). You withdraw before combat."),
                true,
            ));
        }
        Ok((format!("{lead_hazard} strains your advance (-{hp_loss} HP)."), false))
    }

    /// Quiet exploration beats: finds, lore, and empty trails.
    fn apply_noncombat_explore_event(&self, character: &mut Character) -> GameResult<String> {
        let world = self.require_world()?;
        let location = self.location_of(character);
        let seed = derive_seed(
            "explore.noncombat",
            &SeedContext::new()
                .with("character_id", character.id)
                .with("world_turn", world.current_turn)
                .with("location_id", character.location_id.unwrap_or(0))
                .with(
                    "location_name",
                    location
                        .as_ref()
                        .map(|row| row.name.clone())
                        .unwrap_or_else(|| "unknown".to_string()),
                ),
        );
        let mut rng = StdRng::seed_from_u64(seed);
        let roll = rng.gen_range(1..=100);

        let message = if roll <= 25 {
            let gold = rng.gen_range(1..=4);
            character.money += gold;
            format!("You find a cache left by earlier travellers (+{gold} gold).")
        } else if roll <= 45 {
            character.inventory.push("Healing Herbs".to_string());
            "You gather a handful of healing herbs.".to_string()
        } else if roll <= 60 {
            let entry = location
                .as_ref()
                .map(|row| row.name.clone())
                .unwrap_or_else(|| "the wilds".to_string());
            character
                .flags
                .codex_entries
                .insert(format!("lore:{entry}"), "Old waymarks hint at forgotten roads.".to_string());
            format!("You study old waymarks around {entry}; your codex grows.")
        } else {
            "The trail stays quiet. Nothing stirs.".to_string()
        };
        character.flags.last_explore_event = Some(message.clone());
        self.persist_character_world_atomic(character, &world, Vec::new());
        Ok(message)
    }

    // ------------------------------------------------------------------
    // Rest
    // ------------------------------------------------------------------

    pub fn rest_intent(&self, character_id: i64) -> GameResult<ActionResult> {
        self.rest_with_amount(character_id, None)
    }

    pub fn long_rest_intent(&self, character_id: i64) -> GameResult<ActionResult> {
        self.rest_with_amount(character_id, None)
    }

    pub fn short_rest_intent(&self, character_id: i64) -> GameResult<ActionResult> {
        let character = self.require_character(character_id)?;
        let heal = balance::short_rest_heal_amount(character.hp_max);
        self.rest_with_amount(character_id, Some(heal))
    }

    fn rest_with_amount(&self, character_id: i64, heal_override: Option<i32>) -> GameResult<ActionResult> {
        let mut character = self.require_character(character_id)?;
        let mut world = self.require_world()?;

        let mut heal = heal_override.unwrap_or_else(|| balance::rest_heal_amount(character.hp_max));
        let mut messages = Vec::new();

        let cataclysm_state = cataclysm::world_cataclysm_state(&mut world).unwrap_or_default();
        let penalty = cataclysm_state.rest_penalty(heal);
        if penalty > 0 {
            heal = (heal - penalty).max(1);
            messages.push(format!(
                "Corruption on the wind saps your rest (-{penalty} healing)."
            ));
        }

        character.hp_current = (character.hp_current + heal).min(character.hp_max);
        character.alive = true;
        if heal_override.is_none() {
            character.spell_slots_current = character.spell_slots_max;
        }

        // Laying low cools faction pressure.
        let mut decayed = Vec::new();
        for (faction, score) in character.flags.faction_heat.iter_mut() {
            if *score > 0 {
                *score -= 1;
                decayed.push(faction.clone());
            }
        }
        if !decayed.is_empty() {
            messages.push(format!("Heat cools with: {}.", decayed.join(", ")));
        }

        // Recovery debts wear off with rest.
        if let Some(state) = character.flags.recovery_state.as_mut() {
            state.remaining_turns = state.remaining_turns.saturating_sub(1);
            if state.remaining_turns == 0 {
                character.flags.recovery_state = None;
                messages.push("You feel yourself again.".to_string());
            }
        }

        messages.insert(0, format!("You rest and recover {heal} HP."));
        let world = self.advance_world(1, false)?;
        self.persist_character_world_atomic(&character, &world, Vec::new());
        Ok(ActionResult::messages(messages))
    }

    // ------------------------------------------------------------------
    // Travel
    // ------------------------------------------------------------------

    pub fn get_travel_destinations_intent(
        &self,
        character_id: i64,
    ) -> GameResult<Vec<TravelDestinationView>> {
        let character = self.require_character(character_id)?;
        let mut world = self.require_world()?;
        let current = self.location_of(&character);
        let Some(location_repo) = &self.location_repo else {
            return Ok(Vec::new());
        };
        let cataclysm_state = cataclysm::world_cataclysm_state(&mut world).unwrap_or_default();

        let mut destinations = Vec::new();
        for destination in location_repo.list_all() {
            if Some(destination.id) == character.location_id {
                continue;
            }
            let estimated_days = match &current {
                Some(current) => ((current.distance_to(&destination) / 8.0).ceil() as u32).clamp(1, 5),
                None => 1,
            };
            let risk_hint = self.travel_risk_hint(&character, &destination);
            let route_note = if cataclysm_state.active {
                format!(
                    "Cataclysm pressure chokes the {} routes.",
                    cataclysm_state.kind_label().to_lowercase()
                )
            } else {
                String::new()
            };
            destinations.push(TravelDestinationView {
                location_id: destination.id,
                name: destination.name.clone(),
                biome: destination.biome.clone(),
                recommended_level: destination.recommended_level,
                estimated_days,
                risk_hint,
                route_note,
            });
        }
        destinations.sort_by_key(|row| row.location_id);
        Ok(destinations)
    }

    fn travel_risk_hint(&self, character: &Character, destination: &Location) -> String {
        let mut score = 0;
        if let Some((_, heat)) = character.dominant_heat_faction() {
            if heat >= 10 {
                score += 1;
            }
        }
        if matches!(
            destination.biome.as_str(),
            "swamp" | "volcano" | "volcanic" | "mountains" | "mountain"
        ) {
            score += 1;
        }
        if destination.recommended_level > character.level + 1 {
            score += 1;
        }
        match score {
            0 => "quiet roads".to_string(),
            1 => "watchful roads".to_string(),
            _ => "dangerous roads".to_string(),
        }
    }

    pub fn travel_intent(
        &self,
        character_id: i64,
        destination_id: Option<i64>,
        travel_mode: &str,
    ) -> GameResult<ActionResult> {
        let mut character = self.require_character(character_id)?;
        let Some(destination_id) = destination_id else {
            return Ok(ActionResult::message("Choose a destination before setting out."));
        };
        let Some(destination) = self
            .location_repo
            .as_ref()
            .and_then(|repo| repo.get(destination_id))
        else {
            return Err(GameError::UnknownLocation(destination_id));
        };
        if Some(destination_id) == character.location_id {
            return Ok(ActionResult::message("You are already there."));
        }

        let mode = match travel_mode.trim().to_ascii_lowercase().as_str() {
            "stealth" => "stealth",
            "caravan" => "caravan",
            _ => "road",
        };

        let current = self.location_of(&character);
        let mut days = match &current {
            Some(current) => ((current.distance_to(&destination) / 8.0).ceil() as u32).clamp(1, 5),
            None => 1,
        };
        let prep = character.flags.travel_prep.clone();
        if mode == "caravan" && prep.as_deref() != Some("caravan_pass") {
            days += 1;
        }

        let world = self.require_world()?;
        let mut log = Vec::new();
        for day in 1..=days {
            let seed = derive_seed(
                "travel.event",
                &SeedContext::new()
                    .with("character_id", character.id)
                    .with("destination_id", destination_id)
                    .with("world_turn", world.current_turn)
                    .with("day", day)
                    .with("mode", mode),
            );
            let mut rng = StdRng::seed_from_u64(seed);
            let roll = rng.gen_range(1..=100);
            let ambush_threshold = match mode {
                "stealth" if prep.as_deref() == Some("stealth_kit") => 5,
                "stealth" => 12,
                "caravan" => 8,
                _ => 18,
            };
            if roll <= ambush_threshold {
                let loss = rng.gen_range(1..=3).min((character.hp_current - 1).max(0));
                character.hp_current = (character.hp_current - loss).max(1);
                log.push(format!("Day {day}: raiders harry the route (-{loss} HP)."));
            } else if prep.as_deref() == Some("trail_rations") {
                character.hp_current = (character.hp_current + 2).min(character.hp_max);
                log.push(format!("Day {day}: steady march; rations keep you hale (+2 HP)."));
            } else {
                log.push(format!("Day {day}: the road passes without incident."));
            }
        }

        if prep.is_some() {
            character.flags.travel_prep = None;
            log.push("Your travel preparations are spent.".to_string());
        }

        character.location_id = Some(destination_id);
        character.flags.last_travel_event = log.last().cloned();
        let mut world = self.advance_world(u64::from(days), false)?;
        self.progress_quests_for_travel(&mut world, character.id, days);
        log.push(format!("You arrive at {}.", destination.name));
        self.persist_character_world_atomic(&character, &world, Vec::new());
        Ok(ActionResult::messages(log))
    }

    pub fn purchase_travel_prep_intent(&self, character_id: i64, prep_id: &str) -> GameResult<ActionResult> {
        let mut character = self.require_character(character_id)?;
        let Some(prep) = items::find_travel_prep(prep_id) else {
            return Ok(ActionResult::message("No such preparation is on offer."));
        };
        if character.money < prep.price {
            return Ok(ActionResult::message(format!(
                "{} costs {} gold; you carry {}.",
                prep.name, prep.price, character.money
            )));
        }
        if character.flags.travel_prep.is_some() {
            return Ok(ActionResult::message("You are already provisioned for the road."));
        }
        character.money -= prep.price;
        character.flags.travel_prep = Some(prep.id.to_string());
        self.character_repo.save(&character);
        Ok(ActionResult::message(format!("{} secured. {}", prep.name, prep.summary)))
    }

    fn progress_quests_for_travel(&self, world: &mut World, character_id: i64, days: u32) {
        let turn = world.current_turn;
        for quest in world.flags.quests.values_mut() {
            if quest.status != QuestStatus::Active
                || quest.owner_character_id != Some(character_id)
                || quest.objective_kind != "travel_days"
            {
                continue;
            }
            quest.progress = (quest.progress + days).min(quest.target);
            if quest.progress >= quest.target {
                quest.status = QuestStatus::ReadyToTurnIn;
                quest.completed_turn = Some(turn);
            }
        }
    }

    // ------------------------------------------------------------------
    // Combat
    // ------------------------------------------------------------------

    /// Resolve a full single combat. The service RNG is re-seeded from the
    /// `(player, enemy, world_turn, scene)` context, making the resolution
    /// replayable.
    pub fn combat_resolve_intent(
        &self,
        player: &Character,
        enemy: &Entity,
        choose_action: &mut ChooseAction,
        scene: &Scene,
    ) -> GameResult<CombatResult> {
        let world = self.require_world()?;
        let seed = derive_seed(
            "combat.resolve",
            &SeedContext::new()
                .with("player_id", player.id)
                .with("enemy_ids", SeedValue::List(vec![SeedValue::Int(enemy.id)]))
                .with("world_turn", world.current_turn)
                .with("distance", format!("{:?}", scene.distance))
                .with("terrain", scene.terrain.clone())
                .with("surprise", format!("{:?}", scene.surprise)),
        );
        let mut combat = self.combat_service.borrow_mut();
        combat.set_seed(seed);
        let result = combat.fight_turn_based(player, enemy, choose_action, scene);
        let events = combat.take_events();
        drop(combat);

        let mut bus = self.event_bus.borrow_mut();
        for event in events {
            bus.publish(event);
        }
        if result.player_won {
            bus.publish(GameEvent::CombatVictory {
                character_id: player.id,
                enemy_id: enemy.id,
                enemy_level: enemy.level,
                world_turn: world.current_turn,
            });
        }
        Ok(result)
    }

    /// Resolve a full party combat under the same seeding contract.
    pub fn combat_resolve_party_intent(
        &self,
        allies: &[Character],
        enemies: &[Entity],
        choose_action: &mut ChooseAction,
        scene: &Scene,
        choose_target: Option<&mut ChooseTarget>,
        evaluate_ally: Option<&mut EvaluateAllyAction>,
    ) -> GameResult<PartyCombatResult> {
        let world = self.require_world()?;
        let enemy_ids: Vec<SeedValue> = enemies.iter().map(|row| SeedValue::Int(row.id)).collect();
        let player_id = allies.first().map(|row| row.id).unwrap_or(0);
        let seed = derive_seed(
            "combat.resolve",
            &SeedContext::new()
                .with("player_id", player_id)
                .with("enemy_ids", SeedValue::List(enemy_ids))
                .with("world_turn", world.current_turn)
                .with("distance", format!("{:?}", scene.distance))
                .with("terrain", scene.terrain.clone())
                .with("surprise", format!("{:?}", scene.surprise)),
        );
        let mut combat = self.combat_service.borrow_mut();
        combat.set_seed(seed);
        let result =
            combat.fight_party_turn_based(allies, enemies, choose_action, scene, choose_target, evaluate_ally);
        drop(combat);

        if result.allies_won {
            let mut bus = self.event_bus.borrow_mut();
            for enemy in enemies {
                bus.publish(GameEvent::CombatVictory {
                    character_id: player_id,
                    enemy_id: enemy.id,
                    enemy_level: enemy.level,
                    world_turn: world.current_turn,
                });
            }
        }
        Ok(result)
    }

    pub fn list_combat_item_options(&self, player: &Character) -> Vec<String> {
        self.combat_service.borrow().list_usable_items(player)
    }

    /// Post-combat rewards: kill XP and gold, loot, quest progress, codex,
    /// story-seed resolution, and morale consequences.
    pub fn apply_encounter_reward_intent(
        &self,
        character: &mut Character,
        monster: &Entity,
    ) -> GameResult<RewardOutcomeView> {
        let mut world = self.require_world()?;
        let xp_gain = balance::monster_kill_xp(monster.level);
        let money_gain = balance::monster_kill_gold(monster.level);
        character.xp += xp_gain;
        character.money += money_gain;
        let mut messages = vec![format!(
            "Spoils of the fight: +{xp_gain} XP, +{money_gain} gold."
        )];
        messages.extend(self.progression.apply_level_progression(character));

        // Seeded loot roll.
        let seed = derive_seed(
            "reward.loot",
            &SeedContext::new()
                .with("character_id", character.id)
                .with("monster_id", monster.id)
                .with("world_turn", world.current_turn),
        );
        let mut rng = StdRng::seed_from_u64(seed);
        let mut loot = Vec::new();
        let roll = rng.gen_range(1..=100);
        if roll <= 20 {
            loot.push("Healing Herbs".to_string());
        } else if roll <= 30 {
            loot.push("Whetstone".to_string());
        } else if roll <= 36 {
            loot.push("Healing Potion".to_string());
        }
        for item in &loot {
            character.inventory.push(item.clone());
            messages.push(format!("Loot recovered: {item}."));
        }

        // Bestiary codex advances unknown -> observed -> known.
        let codex_key = format!("bestiary:{}", monster.name.to_ascii_lowercase());
        let tier = match character.flags.codex_entries.get(&codex_key).map(String::as_str) {
            None => "observed",
            Some("observed") => "known",
            Some(existing) => existing,
        };
        character.flags.codex_entries.insert(codex_key, tier.to_string());

        // Kill-objective quests tick forward.
        let turn = world.current_turn;
        for quest in world.flags.quests.values_mut() {
            if quest.status != QuestStatus::Active
                || quest.owner_character_id != Some(character.id)
                || quest.objective_kind != "kill_any"
            {
                continue;
            }
            quest.progress = (quest.progress + 1).min(quest.target);
            if quest.progress >= quest.target {
                quest.status = QuestStatus::ReadyToTurnIn;
                quest.completed_turn = Some(turn);
                messages.push(format!("'{}' is ready to turn in.", quest.title));
            }
        }

        let story_messages = self
            .narrative
            .resolve_active_seed_combat(&mut world, character, monster);
        if !story_messages.is_empty() {
            self.publish_seed_resolution(&world, "combat");
        }
        messages.extend(story_messages);

        // Morale ripple: a decisive kill can calm the region.
        let morale_seed = derive_seed(
            "reward.morale",
            &SeedContext::new()
                .with("character_id", character.id)
                .with("monster_id", monster.id)
                .with("world_turn", turn),
        );
        let mut morale_rng = StdRng::seed_from_u64(morale_seed);
        if monster.level >= character.level && morale_rng.gen_range(1..=100) <= 30 {
            world.lower_threat(1);
            world.append_consequence(
                "post_combat_morale",
                &format!("Word of the fallen {} steadies local nerves.", monster.name),
                "minor",
                turn,
            );
            messages.push("Word of your victory steadies local nerves (threat -1).".to_string());
        }

        self.persist_character_world_atomic(character, &world, Vec::new());
        Ok(RewardOutcomeView {
            xp_gained: xp_gain,
            money_gained: money_gain,
            loot,
            messages,
        })
    }

    pub fn apply_retreat_consequence_intent(&self, character_id: i64) -> GameResult<ActionResult> {
        let mut character = self.require_character(character_id)?;
        let mut world = self.require_world()?;
        let hp_loss = (character.hp_max / 10).max(1);
        character.hp_current = (character.hp_current - hp_loss).max(1);
        character.flags.recovery_state = Some(super::character::RecoveryState {
            kind: "retreat".to_string(),
            remaining_turns: 1,
        });
        world.raise_threat(1);
        self.persist_character_world_atomic(&character, &world, Vec::new());
        Ok(ActionResult::message(format!(
            "You fall back battered (-{hp_loss} HP). The region grows bolder."
        )))
    }

    pub fn apply_defeat_consequence_intent(&self, character_id: i64) -> GameResult<ActionResult> {
        let mut character = self.require_character(character_id)?;
        let mut world = self.require_world()?;
        character.hp_current = 1;
        character.alive = true;
        let gold_loss = (character.money / 5).max(0);
        character.money -= gold_loss;
        character.flags.recovery_state = Some(super::character::RecoveryState {
            kind: "defeat".to_string(),
            remaining_turns: 2,
        });
        world.raise_threat(2);
        let world = {
            self.save_world(&world);
            self.advance_world(1, false)?
        };
        self.persist_character_world_atomic(&character, &world, Vec::new());
        Ok(ActionResult::message(format!(
            "You wake stripped of {gold_loss} gold, barely alive. Recovery will take time."
        )))
    }

    pub fn get_recovery_status_intent(&self, character_id: i64) -> GameResult<Option<String>> {
        let character = self.require_character(character_id)?;
        Ok(character.flags.recovery_state.as_ref().map(|state| {
            format!(
                "Recovering from {} ({} turns remain).",
                state.kind, state.remaining_turns
            )
        }))
    }

    // ------------------------------------------------------------------
    // Town, NPCs, and social checks
    // ------------------------------------------------------------------

    pub fn get_town_view_intent(&self, character_id: i64) -> GameResult<TownView> {
        let character = self.require_character(character_id)?;
        let mut world = self.require_world()?;
        let location = self.location_of(&character);
        let cataclysm_state = cataclysm::world_cataclysm_state(&mut world).unwrap_or_default();
        self.save_world(&world);

        let settlement_name = location
            .as_ref()
            .map(|row| {
                world
                    .flags
                    .settlement_names
                    .get(&row.id.to_string())
                    .cloned()
                    .unwrap_or_else(|| row.name.clone())
            })
            .unwrap_or_else(|| "The Crossing".to_string());

        let npcs = crate::data::npcs::TOWN_NPCS
            .iter()
            .map(|npc| TownNpcView {
                npc_id: npc.id.to_string(),
                name: npc.name.to_string(),
                role: npc.role.to_string(),
                disposition: world.flags.npc_social.disposition(npc.id),
            })
            .collect();

        let consequences = world
            .flags
            .consequences
            .iter()
            .rev()
            .take(3)
            .map(|row| row.message.clone())
            .collect();

        let story_lines: Vec<String> = world
            .flags
            .narrative
            .active_story_seed()
            .map(|seed| vec![format!("Talk of '{}' hangs over the square.", seed.seed_id)])
            .unwrap_or_default();

        let (district_tag, landmark_tag) = location
            .as_ref()
            .and_then(|row| {
                world
                    .flags
                    .town_layers
                    .get(&row.id.to_string())
                    .map(|layers| {
                        (
                            layers.first().cloned().unwrap_or_default(),
                            layers.get(1).cloned().unwrap_or_default(),
                        )
                    })
            })
            .unwrap_or_default();

        Ok(TownView {
            settlement_name,
            npcs,
            consequences,
            district_tag,
            landmark_tag,
            story_lines,
            cataclysm_active: cataclysm_state.active,
            cataclysm_kind: cataclysm_state.kind.clone(),
            cataclysm_phase: cataclysm_state.phase.clone(),
            cataclysm_progress: cataclysm_state.progress,
            cataclysm_summary: cataclysm_state.summary(),
        })
    }

    pub fn get_npc_interaction_intent(
        &self,
        character_id: i64,
        npc_id: &str,
    ) -> GameResult<NpcInteractionView> {
        let character = self.require_character(character_id)?;
        let world = self.require_world()?;
        let npc = find_town_npc(npc_id).ok_or_else(|| GameError::UnknownNpc(npc_id.to_string()))?;
        let disposition = world.flags.npc_social.disposition(npc.id);
        let greeting = npc_greeting(npc, disposition);

        let mut approaches = vec![
            "Friendly".to_string(),
            "Direct".to_string(),
            "Intimidate".to_string(),
        ];
        if npc.id == "broker_silas" && character.has_interaction_unlock("intel_leverage") {
            approaches.push("Leverage Intel".to_string());
        }
        if npc.id == "captain_ren" && character.has_interaction_unlock("captain_favor") {
            approaches.push("Call In Favor".to_string());
        }
        if let Some((faction, score)) = self.dominant_faction_standing(character_id) {
            if score >= 10 {
                approaches.push("Invoke Faction".to_string());
                let _ = faction;
            }
        }
        if character.money >= balance::BRIBE_COST {
            approaches.push("Bribe".to_string());
        }

        let (greeting, approaches) = self.dialogue.contextualize_interaction(
            &world,
            &character,
            character_id,
            npc_id,
            &greeting,
            &approaches,
        );

        // A remembered story beat colours the conversation.
        let dialogue_hint = world
            .flags
            .narrative
            .major_events
            .latest()
            .map(|event| format!("{} still talks about '{}'.", npc.name, event.seed_id))
            .unwrap_or_default();

        Ok(NpcInteractionView {
            npc_id: npc.id.to_string(),
            npc_name: npc.name.to_string(),
            greeting,
            approaches,
            dialogue_hint,
        })
    }

    /// Announce the most recent seed resolution on the bus.
    fn publish_seed_resolution(&self, world: &World, channel: &str) {
        let Some(seed) = world
            .flags
            .narrative
            .story_seeds
            .iter()
            .rev()
            .find(|row| row.resolved_by.as_deref() == Some(channel))
        else {
            return;
        };
        self.event_bus.borrow_mut().publish(GameEvent::StorySeedResolved {
            seed_id: seed.seed_id.clone(),
            resolution: seed.resolution.clone().unwrap_or_default(),
            channel: channel.to_string(),
            world_turn: world.current_turn,
        });
    }

    fn dominant_faction_standing(&self, character_id: i64) -> Option<(String, i32)> {
        let repo = self.faction_repo.as_ref()?;
        let mut best: Option<(String, i32)> = None;
        for faction in repo.list_all() {
            let score = faction.reputation_for(character_id);
            match &best {
                Some((_, top)) if score <= *top => {}
                _ if score > 0 => best = Some((faction.id.clone(), score)),
                _ => {}
            }
        }
        best
    }

    pub fn submit_social_approach_intent(
        &self,
        character_id: i64,
        npc_id: &str,
        approach: &str,
    ) -> GameResult<SocialOutcomeView> {
        let mut character = self.require_character(character_id)?;
        let mut world = self.require_world()?;
        let npc = find_town_npc(npc_id).ok_or_else(|| GameError::UnknownNpc(npc_id.to_string()))?;

        let mut normalized = approach.trim().to_ascii_lowercase();
        if !SOCIAL_APPROACHES.contains(&normalized.as_str()) {
            normalized = "direct".to_string();
        }
        if normalized == "leverage intel"
            && !(npc.id == "broker_silas" && character.has_interaction_unlock("intel_leverage"))
        {
            normalized = "direct".to_string();
        }
        if normalized == "call in favor"
            && !(npc.id == "captain_ren" && character.has_interaction_unlock("captain_favor"))
        {
            normalized = "direct".to_string();
        }
        let dominant = self.dominant_faction_standing(character_id);
        if normalized == "invoke faction" && dominant.as_ref().map(|(_, score)| *score).unwrap_or(0) < 10 {
            normalized = "direct".to_string();
        }
        let mut did_bribe = normalized == "bribe";
        if did_bribe && character.money < balance::BRIBE_COST {
            normalized = "direct".to_string();
            did_bribe = false;
        }
        if did_bribe {
            character.money -= balance::BRIBE_COST;
            self.character_repo.save(&character);
        }

        let disposition_before = world.flags.npc_social.disposition(npc.id);
        let skill_attr = match normalized.as_str() {
            "friendly" | "call in favor" | "invoke faction" | "bribe" => "charisma",
            "intimidate" => "strength",
            _ => "wisdom",
        };
        let modifier = character.attributes.mod_by_name(skill_attr);

        let mut dc = 12 + (npc.aggression - 4).max(0) - (npc.openness - 4).max(0);
        if disposition_before <= -50 {
            dc += 2;
        }
        if disposition_before >= 50 {
            dc -= 1;
        }
        match normalized.as_str() {
            "leverage intel" => dc -= 2,
            "call in favor" => dc -= 3,
            "invoke faction" => {
                let score = dominant.as_ref().map(|(_, score)| *score).unwrap_or(0);
                dc -= 2 + ((score - 10).max(0) / 10);
            }
            "bribe" => dc -= 4,
            _ => {}
        }
        let dc = dc.clamp(8, 18);

        let world_turn = world.current_turn;
        let nonce = world
            .flags
            .npc_social
            .next_nonce(npc.id, &normalized, character_id);
        let seed = derive_seed(
            "social.check",
            &SeedContext::new()
                .with("player_id", character_id)
                .with("npc_id", npc.id)
                .with("approach", normalized.clone())
                .with("world_turn", world_turn)
                .with("disposition", disposition_before)
                .with("event_nonce", nonce),
        );
        let roll = StdRng::seed_from_u64(seed).gen_range(1..=20);
        let roll_total = roll + modifier;
        let success = roll_total >= dc;

        let delta = match normalized.as_str() {
            "intimidate" => {
                if success {
                    5
                } else {
                    -8
                }
            }
            "leverage intel" => {
                if success {
                    6
                } else {
                    -4
                }
            }
            "call in favor" => {
                if success {
                    7
                } else {
                    -5
                }
            }
            "invoke faction" => {
                if success {
                    9
                } else {
                    -3
                }
            }
            "bribe" => {
                if success {
                    10
                } else {
                    -2
                }
            }
            _ => {
                if success {
                    8
                } else {
                    -6
                }
            }
        };
        let disposition_after = (disposition_before + delta).clamp(-100, 100);
        world.flags.npc_social.set_disposition(npc.id, disposition_after);
        world.flags.npc_social.append_memory(
            npc.id,
            NpcMemoryEvent {
                turn: world_turn,
                approach: normalized.clone(),
                success,
                delta,
            },
        );

        if !success {
            world.append_consequence(
                "social_rebuff",
                &format!("{} rebuffs your approach.", npc.name),
                "minor",
                world_turn,
            );
        }

        let mut story_messages = Vec::new();
        if success && npc.id == "broker_silas" {
            // Silas's evidence can close out an active hunt without a fight.
            let mut progressed = false;
            for quest in world.flags.quests.values_mut() {
                if quest.status != QuestStatus::Active || quest.objective_kind != "kill_any" {
                    continue;
                }
                quest.progress = quest.target;
                quest.status = QuestStatus::ReadyToTurnIn;
                quest.completed_turn = Some(world_turn);
                progressed = true;
                break;
            }
            if progressed {
                world.append_consequence(
                    "quest_noncombat_progress",
                    "Silas provides evidence that advances your active quest.",
                    "normal",
                    world_turn,
                );
            }
            story_messages =
                self.narrative
                    .resolve_active_seed_social(&mut world, &mut character, npc.id, &normalized);
            if !story_messages.is_empty() {
                self.publish_seed_resolution(&world, "social");
            }
        }

        // Dialogue-tree bookkeeping rides on the same outcome.
        let notes = self.dialogue.record_outcome(
            &mut world,
            &mut character,
            character_id,
            npc.id,
            &normalized,
            success,
            world_turn,
        );

        self.persist_character_world_atomic(&character, &world, Vec::new());

        let outcome_message = if success {
            format!("{} softens and shares useful details.", npc.name)
        } else {
            format!("{} remains unconvinced.", npc.name)
        };
        let mut messages = vec![
            outcome_message,
            format!("Check: d20 + {modifier} = {roll_total} vs DC {dc}"),
            format!("Relationship: {disposition_before} -> {disposition_after}"),
        ];
        if did_bribe {
            messages.push(format!(
                "You spend {} gold to grease the wheels.",
                balance::BRIBE_COST
            ));
        }
        if normalized == "invoke faction" {
            if let Some((faction, _)) = &dominant {
                messages.push(format!("You invoke your standing with {faction}."));
            }
        }
        messages.extend(notes);
        messages.extend(story_messages);

        Ok(SocialOutcomeView {
            npc_id: npc.id.to_string(),
            npc_name: npc.name.to_string(),
            approach: normalized,
            success,
            roll_total,
            target_dc: dc,
            relationship_before: disposition_before,
            relationship_after: disposition_after,
            messages,
        })
    }

    // ------------------------------------------------------------------
    // Dialogue sessions
    // ------------------------------------------------------------------

    pub fn get_dialogue_session_intent(
        &self,
        character_id: i64,
        npc_id: &str,
    ) -> GameResult<DialogueSessionView> {
        let mut character = self.require_character(character_id)?;
        let world = self.require_world()?;
        let interaction = self.get_npc_interaction_intent(character_id, npc_id)?;
        let view = self.dialogue.build_dialogue_session(
            &world,
            &mut character,
            character_id,
            npc_id,
            &interaction.npc_name,
            &interaction.greeting,
            &interaction.approaches,
        );
        self.character_repo.save(&character);
        Ok(view)
    }

    pub fn submit_dialogue_choice_intent(
        &self,
        character_id: i64,
        npc_id: &str,
        choice_id: &str,
    ) -> GameResult<ActionResult> {
        let mut character = self.require_character(character_id)?;
        let mut world = self.require_world()?;
        let interaction = self.get_npc_interaction_intent(character_id, npc_id)?;

        let resolution: ChoiceResolution = self.dialogue.resolve_dialogue_choice(
            &world,
            &mut character,
            character_id,
            npc_id,
            &interaction.npc_name,
            &interaction.greeting,
            &interaction.approaches,
            choice_id,
        );
        if !resolution.accepted {
            return Ok(ActionResult::message(resolution.reason));
        }

        let mut messages = Vec::new();
        if !resolution.response.is_empty() {
            messages.push(resolution.response.clone());
        }

        if let Some(branch) = &resolution.skill_check {
            // Skill-checked branch: roll against the content DC.
            let skill_attr = match branch.skill.as_str() {
                "intimidation" => "strength",
                "deception" => "charisma",
                _ => "charisma",
            };
            let modifier = character.attributes.mod_by_name(skill_attr);
            let nonce = world
                .flags
                .npc_social
                .next_nonce(npc_id, &branch.skill, character_id);
            let seed = derive_seed(
                "social.check",
                &SeedContext::new()
                    .with("player_id", character_id)
                    .with("npc_id", npc_id)
                    .with("approach", branch.skill.clone())
                    .with("world_turn", world.current_turn)
                    .with("disposition", world.flags.npc_social.disposition(npc_id))
                    .with("event_nonce", nonce),
            );
            let roll = StdRng::seed_from_u64(seed).gen_range(1..=20);
            let total = roll + modifier;
            let success = total >= branch.dc;
            messages.push(format!(
                "{}: d20 + {modifier} = {total} vs DC {}",
                branch.skill, branch.dc
            ));

            let (response, _, note) =
                self.dialogue
                    .apply_skill_check_branch(&mut character, npc_id, success, branch);
            if !response.is_empty() {
                messages.push(response);
            }
            if !note.is_empty() {
                messages.push(note);
            }
            messages.extend(
                self.dialogue
                    .apply_effects(&mut world, &mut character, &resolution.effects, success),
            );
            let world_turn = world.current_turn;
            messages.extend(self.dialogue.record_outcome(
                &mut world,
                &mut character,
                character_id,
                npc_id,
                &resolution.approach,
                success,
                world_turn,
            ));
            self.persist_character_world_atomic(&character, &world, Vec::new());
            return Ok(ActionResult::messages(messages));
        }

        // Plain choices route through the social check machinery.
        let outcome = self.submit_social_approach_intent(character_id, npc_id, &resolution.approach)?;
        let mut character = self.require_character(character_id)?;
        let mut world = self.require_world()?;
        messages.extend(outcome.messages.clone());
        messages.extend(self.dialogue.apply_effects(
            &mut world,
            &mut character,
            &resolution.effects,
            outcome.success,
        ));
        self.persist_character_world_atomic(&character, &world, Vec::new());
        Ok(ActionResult::messages(messages))
    }

    // ------------------------------------------------------------------
    // Shop and equipment
    // ------------------------------------------------------------------

    fn town_price_modifier(&self, character: &Character, world: &mut World) -> (i64, String) {
        let mut modifier = 0;
        let mut labels = Vec::new();
        if let Some((faction, heat)) = character.dominant_heat_faction() {
            if heat >= 10 {
                modifier += 1;
                labels.push(format!("{faction} pressure"));
            }
        }
        let cataclysm_state = cataclysm::world_cataclysm_state(world).unwrap_or_default();
        let strain = cataclysm_state.price_pressure();
        if strain > 0 {
            modifier += strain;
            labels.push("cataclysm strain".to_string());
        }
        let label = if labels.is_empty() {
            "standard prices".to_string()
        } else {
            format!("surcharge: {}", labels.join(", "))
        };
        (modifier, label)
    }

    pub fn get_shop_view_intent(&self, character_id: i64) -> GameResult<ShopView> {
        let character = self.require_character(character_id)?;
        let mut world = self.require_world()?;
        let (modifier, label) = self.town_price_modifier(&character, &mut world);
        self.save_world(&world);

        let items = items::SHOP_STOCK
            .iter()
            .map(|row| ShopItemView {
                name: row.name.to_string(),
                price: (row.base_price + modifier).max(1),
                slot: format!("{:?}", row.slot).to_ascii_lowercase(),
            })
            .collect();
        Ok(ShopView {
            items,
            money: character.money,
            price_modifier: modifier,
            price_modifier_label: label,
        })
    }

    pub fn buy_shop_item_intent(&self, character_id: i64, item_name: &str) -> GameResult<ActionResult> {
        let mut character = self.require_character(character_id)?;
        let mut world = self.require_world()?;
        let Some(item) = items::find_shop_item(item_name) else {
            return Ok(ActionResult::message("The shop does not stock that."));
        };
        let (modifier, _) = self.town_price_modifier(&character, &mut world);
        let price = (item.base_price + modifier).max(1);
        if character.money < price {
            return Ok(ActionResult::message(format!(
                "{} costs {price} gold; you carry {}.",
                item.name, character.money
            )));
        }
        character.money -= price;
        character.inventory.push(item.name.to_string());
        self.persist_character_world_atomic(&character, &world, Vec::new());
        Ok(ActionResult::message(format!(
            "Purchased {} for {price} gold.",
            item.name
        )))
    }

    pub fn get_sell_inventory_view_intent(&self, character_id: i64) -> GameResult<SellInventoryView> {
        let character = self.require_character(character_id)?;
        let items = character
            .inventory
            .iter()
            .map(|name| SellItemView {
                name: name.clone(),
                sell_price: items::sell_price(name),
            })
            .collect();
        Ok(SellInventoryView {
            items,
            money: character.money,
        })
    }

    pub fn sell_inventory_item_intent(&self, character_id: i64, item_name: &str) -> GameResult<ActionResult> {
        let mut character = self.require_character(character_id)?;
        if !character.remove_inventory_item(item_name) {
            return Ok(ActionResult::message("You are not carrying that."));
        }
        let price = items::sell_price(item_name);
        character.money += price;
        self.character_repo.save(&character);
        Ok(ActionResult::message(format!("Sold {item_name} for {price} gold.")))
    }

    pub fn get_equipment_view_intent(&self, character_id: i64) -> GameResult<EquipmentView> {
        let character = self.require_character(character_id)?;
        let equipable = character
            .inventory
            .iter()
            .filter(|name| items::infer_equipment_slot(name).is_some())
            .cloned()
            .collect();
        Ok(EquipmentView {
            weapon: character.flags.equipment.weapon.clone(),
            armor: character.flags.equipment.armor.clone(),
            trinket: character.flags.equipment.trinket.clone(),
            equipable_items: equipable,
        })
    }

    pub fn equip_inventory_item_intent(&self, character_id: i64, item_name: &str) -> GameResult<ActionResult> {
        let mut character = self.require_character(character_id)?;
        if !character.has_inventory_item(item_name) {
            return Ok(ActionResult::message("You are not carrying that."));
        }
        let Some(slot) = items::infer_equipment_slot(item_name) else {
            return Ok(ActionResult::message(format!("{item_name} cannot be equipped.")));
        };
        match slot {
            "weapon" => character.flags.equipment.weapon = Some(item_name.to_string()),
            "armor" => character.flags.equipment.armor = Some(item_name.to_string()),
            _ => character.flags.equipment.trinket = Some(item_name.to_string()),
        }
        self.character_repo.save(&character);
        Ok(ActionResult::message(format!("Equipped {item_name} ({slot}).")))
    }

    pub fn unequip_slot_intent(&self, character_id: i64, slot_name: &str) -> GameResult<ActionResult> {
        let mut character = self.require_character(character_id)?;
        let slot = slot_name.trim().to_ascii_lowercase();
        let removed = match slot.as_str() {
            "weapon" => character.flags.equipment.weapon.take(),
            "armor" => character.flags.equipment.armor.take(),
            "trinket" => character.flags.equipment.trinket.take(),
            _ => {
                return Err(GameError::InvalidInput(format!("unknown slot '{slot_name}'")));
            }
        };
        match removed {
            Some(item) => {
                self.character_repo.save(&character);
                Ok(ActionResult::message(format!("Unequipped {item}.")))
            }
            None => Ok(ActionResult::message("That slot is already empty.")),
        }
    }

    pub fn drop_inventory_item_intent(&self, character_id: i64, item_name: &str) -> GameResult<ActionResult> {
        let mut character = self.require_character(character_id)?;
        if !character.remove_inventory_item(item_name) {
            return Ok(ActionResult::message("You are not carrying that."));
        }
        self.character_repo.save(&character);
        Ok(ActionResult::message(format!("Dropped {item_name}.")))
    }

    // ------------------------------------------------------------------
    // Training
    // ------------------------------------------------------------------

    pub fn purchase_training_intent(&self, character_id: i64, training_id: &str) -> GameResult<ActionResult> {
        let mut character = self.require_character(character_id)?;
        let (unlock_key, cost, required_rep, label) = match training_id {
            "intel_leverage" => ("intel_leverage", 12_i64, 0, "intel leverage"),
            "captain_favor" => ("captain_favor", 10, 4, "the captain's favor"),
            _ => {
                return Ok(ActionResult::message("No such training is offered."));
            }
        };
        if required_rep > 0 {
            let wardens_rep = self
                .faction_repo
                .as_ref()
                .and_then(|repo| repo.get("wardens"))
                .map(|faction| faction.reputation_for(character_id))
                .unwrap_or(0);
            if wardens_rep < required_rep {
                return Ok(ActionResult::message(format!(
                    "Training requires wardens reputation {required_rep}."
                )));
            }
        }
        if character.has_interaction_unlock(unlock_key) {
            return Ok(ActionResult::message("You already know that technique."));
        }
        if character.money < cost {
            return Ok(ActionResult::message(format!(
                "Training in {label} costs {cost} gold; you carry {}.",
                character.money
            )));
        }
        character.money -= cost;
        character.grant_interaction_unlock(unlock_key);
        self.character_repo.save(&character);
        Ok(ActionResult::message(format!("You train in {label}.")))
    }

    // ------------------------------------------------------------------
    // Quests
    // ------------------------------------------------------------------

    /// Seed the standing quest board into a fresh world.
    pub fn seed_default_quests(&self) -> GameResult<()> {
        let mut world = self.require_world()?;
        let defaults = [
            ("trail_patrol", QuestRow {
                faction_id: Some("wardens".to_string()),
                ..QuestRow::available("Trail Patrol", "kill_any", 3, 60, 25)
            }),
            ("road_escort", QuestRow {
                faction_id: Some("wardens".to_string()),
                ..QuestRow::available("Road Escort", "travel_days", 2, 50, 30)
            }),
            ("cull_the_dens", QuestRow {
                faction_id: Some("wild".to_string()),
                ..QuestRow::available("Cull the Dens", "kill_any", 4, 90, 40)
            }),
        ];
        for (quest_id, row) in defaults {
            world.flags.quests.entry(quest_id.to_string()).or_insert(row);
        }
        self.save_world(&world);
        Ok(())
    }

    pub fn get_quest_board_intent(&self, character_id: i64) -> GameResult<QuestBoardView> {
        let _ = self.require_character(character_id)?;
        let mut world = self.require_world()?;
        cataclysm::spawn_threshold_objectives(&mut world);
        self.save_world(&world);

        let turn = world.current_turn;
        let mut quests: Vec<QuestBoardRow> = world
            .flags
            .quests
            .iter()
            .filter(|(_, quest)| !quest.status.is_terminal())
            .map(|(quest_id, quest)| QuestBoardRow {
                quest_id: quest_id.clone(),
                title: quest.title.clone(),
                status: quest.status.label().to_string(),
                objective_summary: Self::quest_objective_summary(quest),
                urgency: Self::quest_urgency_label(quest, turn),
                reward_xp: quest.reward_xp,
                reward_money: quest.reward_money,
            })
            .collect();
        quests.sort_by(|a, b| a.quest_id.cmp(&b.quest_id));
        Ok(QuestBoardView { quests })
    }

    fn quest_objective_summary(quest: &QuestRow) -> String {
        match quest.objective_kind.as_str() {
            "kill_any" => format!("Defeat hostiles ({}/{})", quest.progress, quest.target),
            "travel_days" => format!("Travel the roads ({}/{})", quest.progress, quest.target),
            other => format!("{other} ({}/{})", quest.progress, quest.target),
        }
    }

    fn quest_urgency_label(quest: &QuestRow, turn: u64) -> String {
        match (quest.status, quest.expires_turn) {
            (QuestStatus::Active, Some(expires)) => {
                let remaining = expires.saturating_sub(turn);
                if remaining <= 1 {
                    "urgent".to_string()
                } else {
                    format!("{remaining} turns left")
                }
            }
            (QuestStatus::ReadyToTurnIn, _) => "ready".to_string(),
            _ => "open".to_string(),
        }
    }

    pub fn accept_quest_intent(&self, character_id: i64, quest_id: &str) -> GameResult<ActionResult> {
        let character = self.require_character(character_id)?;
        let mut world = self.require_world()?;
        let current_turn = world.current_turn;

        let Some(quest) = world.flags.quests.get_mut(quest_id) else {
            return Ok(ActionResult::message("That quest is not available."));
        };
        if quest.status != QuestStatus::Available {
            return Ok(ActionResult::message(format!(
                "Quest cannot be accepted right now ({}).",
                quest.status.label()
            )));
        }

        quest.status = QuestStatus::Active;
        quest.owner_character_id = Some(character_id);
        quest.accepted_turn = Some(current_turn);
        quest.expires_turn = Some(current_turn + balance::QUEST_EXPIRY_TURNS);
        let title = quest.title.clone();
        let target = quest.target;
        let seed_key = quest.seed_key.clone();
        let quest_status = quest.status;
        let progress = quest.progress;

        let mut operations = Vec::new();
        if let Some(repo) = &self.quest_state_repo {
            let state = QuestState {
                template_slug: quest_id.to_string(),
                status: quest_status,
                progress,
                accepted_turn: Some(current_turn),
                completed_turn: None,
                seed_key,
            };
            let payload = serde_json::json!({"status": "active", "quest_id": quest_id}).to_string();
            operations.push(repo.build_save_active_with_history_operation(
                character_id,
                state,
                target.max(1),
                "accepted",
                current_turn,
                payload,
            ));
        }

        self.persist_character_world_atomic(&character, &world, operations);
        self.event_bus.borrow_mut().publish(GameEvent::QuestAccepted {
            character_id,
            quest_id: quest_id.to_string(),
            world_turn: current_turn,
        });
        Ok(ActionResult::message(format!("Accepted quest: {title}.")))
    }

    pub fn turn_in_quest_intent(&self, character_id: i64, quest_id: &str) -> GameResult<ActionResult> {
        let mut character = self.require_character(character_id)?;
        let mut world = self.require_world()?;

        let Some(quest) = world.flags.quests.get(quest_id).cloned() else {
            return Ok(ActionResult::message("No such quest found."));
        };
        if quest.status != QuestStatus::ReadyToTurnIn {
            return Ok(ActionResult::message(format!(
                "Quest is not ready to turn in ({}).",
                quest.status.label()
            )));
        }
        if quest.owner_character_id.unwrap_or(character_id) != character_id {
            return Ok(ActionResult::message("You are not the owner of this quest."));
        }

        let turned_in_turn = world.current_turn;
        character.xp += quest.reward_xp;
        character.money += quest.reward_money;
        let level_messages = self.progression.apply_level_progression(&mut character);

        if let Some(row) = world.flags.quests.get_mut(quest_id) {
            row.status = QuestStatus::Completed;
            row.turned_in_turn = Some(turned_in_turn);
        }
        world
            .flags
            .quest_world_flags
            .insert(format!("{quest_id}_turned_in"), true);
        let world_flag_key = format!("quest:{quest_id}:turned_in");
        world.flags.world_flags.insert(world_flag_key.clone(), true);
        let peaceful_key = character
            .location_id
            .map(|location_id| format!("location:{location_id}:peaceful"));
        if let Some(key) = &peaceful_key {
            world.flags.world_flags.insert(key.clone(), true);
        }

        let mut operations = Vec::new();
        if let Some(repo) = &self.world_repo {
            operations.push(repo.build_set_world_flag_operation(
                world.id,
                &world_flag_key,
                "true",
                turned_in_turn,
                "quest_completion",
            ));
            if let Some(key) = &peaceful_key {
                operations.push(repo.build_set_world_flag_operation(
                    world.id,
                    key,
                    "true",
                    turned_in_turn,
                    "quest_completion_peaceful_window",
                ));
            }
        }
        if let Some(repo) = &self.quest_state_repo {
            let state = QuestState {
                template_slug: quest_id.to_string(),
                status: QuestStatus::Completed,
                progress: quest.progress,
                accepted_turn: quest.accepted_turn,
                completed_turn: Some(turned_in_turn),
                seed_key: quest.seed_key.clone(),
            };
            let payload = serde_json::json!({
                "reward_xp": quest.reward_xp,
                "reward_money": quest.reward_money,
                "quest_id": quest_id,
            })
            .to_string();
            operations.push(repo.build_save_active_with_history_operation(
                character_id,
                state,
                quest.target.max(1),
                "completed",
                turned_in_turn,
                payload,
            ));
        }

        // Faction gratitude, with its audit row.
        if let (Some(repo), Some(faction_id)) = (&self.faction_repo, quest.faction_id.as_deref()) {
            operations.push(repo.build_reputation_delta_operation(
                faction_id,
                character_id,
                balance::QUEST_FACTION_REPUTATION,
                "quest_completion",
                turned_in_turn,
            ));
        }

        let mut messages = vec![
            format!("Turned in quest: {}.", quest.title),
            format!(
                "Rewards: +{} XP, +{} gold.",
                quest.reward_xp, quest.reward_money
            ),
        ];
        messages.extend(level_messages);

        if quest.cataclysm_pushback {
            let reduction = cataclysm::apply_quest_pushback(
                &mut world,
                quest_id,
                quest.pushback_tier.max(1),
                character_id,
            );
            if reduction > 0 {
                messages.push(format!("The cataclysm recoils (progress -{reduction})."));
            }
        }

        self.persist_character_world_atomic(&character, &world, operations);
        self.event_bus.borrow_mut().publish(GameEvent::QuestCompleted {
            character_id,
            quest_id: quest_id.to_string(),
            world_turn: turned_in_turn,
        });
        Ok(ActionResult::messages(messages))
    }

    // ------------------------------------------------------------------
    // Rumours
    // ------------------------------------------------------------------

    pub fn get_rumour_board_intent(&self, character_id: i64) -> GameResult<RumourBoardView> {
        let _ = self.require_character(character_id)?;
        let mut world = self.require_world()?;
        let mut rumours = Vec::new();

        if let Some(seed) = world.flags.narrative.active_story_seed() {
            rumours.push(RumourItemView {
                source: "town square".to_string(),
                text: format!("Everyone has an opinion about '{}'.", seed.seed_id),
                turn: world.current_turn,
            });
        }
        for memory in world.flags.narrative.major_events.iter().rev().take(2) {
            rumours.push(RumourItemView {
                source: "old news".to_string(),
                text: format!("They still tell of '{}' ({}).", memory.seed_id, memory.resolution),
                turn: memory.turn,
            });
        }
        if let Some(echo) = world.flags.narrative.flashpoint_echoes.latest() {
            rumours.push(RumourItemView {
                source: "frontier talk".to_string(),
                text: format!(
                    "A {} aftershock from '{}' still ripples.",
                    echo.severity_band, echo.seed_id
                ),
                turn: echo.turn,
            });
        }

        for rumour in &rumours {
            world.record_rumour(character_id, &rumour.source, &rumour.text);
        }
        self.save_world(&world);
        Ok(RumourBoardView { rumours })
    }

    // ------------------------------------------------------------------
    // Progression intents
    // ------------------------------------------------------------------

    pub fn get_character_sheet_intent(&self, character_id: i64) -> GameResult<CharacterSheetView> {
        let character = self.require_character(character_id)?;
        let next_level = (character.level + 1).min(balance::LEVEL_CAP);
        let pressure = character
            .dominant_heat_faction()
            .map(|(faction, heat)| format!("{faction} watches you closely (heat {heat})."))
            .unwrap_or_else(|| "No faction currently presses on you.".to_string());
        Ok(CharacterSheetView {
            name: character.name.clone(),
            race_name: character.race_name.clone(),
            class_name: character.class_name.clone(),
            level: character.level,
            xp_current: character.xp,
            xp_required: balance::xp_required_for_level(next_level),
            hp_current: character.hp_current,
            hp_max: character.hp_max,
            armour_class: character.armour_class,
            money: character.money,
            inventory: character.inventory.clone(),
            faction_pressure_summary: pressure,
        })
    }

    pub fn get_level_up_pending_intent(&self, character_id: i64) -> GameResult<Option<LevelUpPendingView>> {
        let character = self.require_character(character_id)?;
        Ok(self.progression.level_up_pending(&character))
    }

    pub fn submit_level_up_choice_intent(
        &self,
        character_id: i64,
        growth_choice: &str,
        option: Option<&str>,
    ) -> GameResult<ActionResult> {
        let mut character = self.require_character(character_id)?;
        let world = self.require_world()?;
        let (unlock_key, messages) =
            self.progression
                .commit_growth_choice(&mut character, growth_choice, option, world.current_turn)?;

        let operations = vec![self.character_repo.build_progression_unlock_operation(
            character_id,
            "growth_choice",
            &unlock_key,
            character.level,
            world.current_turn,
        )];
        self.persist_character_world_atomic(&character, &world, operations);
        self.event_bus.borrow_mut().publish(GameEvent::LevelUp {
            character_id,
            new_level: character.level,
        });
        Ok(ActionResult::messages(messages))
    }

    pub fn faction_standings_intent(&self, character_id: i64) -> GameResult<FactionStandingsView> {
        let character = self.require_character(character_id)?;
        let mut rows = Vec::new();
        if let Some(repo) = &self.faction_repo {
            for faction in repo.list_all() {
                rows.push(FactionStandingRow {
                    faction_id: faction.id.clone(),
                    faction_name: faction.name.clone(),
                    reputation: faction.reputation_for(character_id),
                    heat: character.heat_for(&faction.id),
                });
            }
        }
        rows.sort_by(|a, b| a.faction_id.cmp(&b.faction_id));
        Ok(FactionStandingsView { rows })
    }

    // ------------------------------------------------------------------
    // Cataclysm terminal state
    // ------------------------------------------------------------------

    /// Check for the world-fell terminal state; records it when reached.
    pub fn get_cataclysm_terminal_state_intent(
        &self,
        character_id: i64,
    ) -> GameResult<Option<(bool, String)>> {
        let _ = self.require_character(character_id)?;
        let mut world = self.require_world()?;
        let message = cataclysm::record_terminal_state(&mut world);
        self.save_world(&world);
        Ok(message.map(|text| (true, text)))
    }

    /// Access to the event bus, mostly for wiring subscribers in tests.
    pub fn event_bus(&self) -> &RefCell<EventBus> {
        &self.event_bus
    }

    /// Subscribe the narrative handlers that let world tension follow the
    /// flow of play: victories and completed quests both bleed pressure
    /// into or out of the narrative channel. Handlers run synchronously,
    /// in registration order, and write through the world repository.
    pub fn register_story_director_handlers(&self) {
        let Some(world_repo) = self.world_repo.as_ref().map(Rc::clone) else {
            return;
        };
        let mut bus = self.event_bus.borrow_mut();

        let victory_repo = Rc::clone(&world_repo);
        bus.subscribe(super::event_bus::EventType::CombatVictory, move |_| {
            if let Some(mut world) = victory_repo.load_default() {
                world.flags.narrative.tension_level += 1;
                world.flags.narrative.clamp_tension();
                victory_repo.save(&world);
            }
        });

        let quest_repo = world_repo;
        bus.subscribe(super::event_bus::EventType::QuestCompleted, move |_| {
            if let Some(mut world) = quest_repo.load_default() {
                world.flags.narrative.tension_level -= 2;
                world.flags.narrative.clamp_tension();
                quest_repo.save(&world);
            }
        });
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::encounters::default_encounter_definitions;
    use crate::game::cataclysm::CataclysmState;
    use crate::game::combat::PlayerAction;
    use crate::game::entity::EntityKind;
    use crate::game::faction::Faction;
    use crate::game::world::FlashpointEcho;
    use crate::repo::memory::*;

    struct Fixture {
        service: GameService,
        character_repo: Rc<InMemoryCharacterRepository>,
        world_repo: Rc<InMemoryWorldRepository>,
        faction_repo: Rc<InMemoryFactionRepository>,
        persistor: Rc<InMemoryAtomicPersistor>,
        audit: SharedAudit,
    }

    fn fighter(id: i64, name: &str) -> Character {
        let mut character = Character::new(id, name);
        character.class_name = "fighter".to_string();
        character.hp_max = 14;
        character.hp_current = 14;
        character.location_id = Some(1);
        character.money = 20;
        character
    }

    fn goblin(id: i64) -> Entity {
        let mut enemy = Entity::new(id, "Goblin", 1, 7);
        enemy.armour_class = 12;
        enemy.attack_bonus = 2;
        enemy.damage_die = "d6".to_string();
        enemy.kind = EntityKind::Humanoid;
        enemy
    }

    fn build_fixture(world_seed: u64) -> Fixture {
        let audit = shared_audit();
        let character_repo = Rc::new(InMemoryCharacterRepository::new(vec![fighter(21, "Vale")]));
        let world_repo = Rc::new(InMemoryWorldRepository::new(world_seed, Rc::clone(&audit)));
        let faction_repo = Rc::new(InMemoryFactionRepository::new(vec![
            Faction::new("wardens", "The Wardens"),
            Faction::new("syndicate", "The Syndicate"),
            Faction::new("wild", "The Wild Court"),
        ]));
        let persistor = Rc::new(InMemoryAtomicPersistor::new(
            Rc::clone(&character_repo),
            Rc::clone(&world_repo),
            Rc::clone(&audit),
        ));

        let entity_repo = Rc::new(
            InMemoryEntityRepository::new(vec![
                goblin(1),
                {
                    let mut wolf = Entity::new(2, "Wolf", 1, 9);
                    wolf.kind = EntityKind::Beast;
                    wolf
                },
                {
                    let mut bandit = Entity::new(3, "Bandit", 2, 11);
                    bandit.kind = EntityKind::Humanoid;
                    bandit
                },
            ]),
        );
        let mut town = Location::new(1, "Emberfall Crossing");
        town.biome = "town".to_string();
        let mut forest = Location::new(2, "Deep Forest");
        forest.biome = "wilderness".to_string();
        forest.x = 16;
        let location_repo = Rc::new(InMemoryLocationRepository::new(vec![town, forest]));
        let definition_repo = Rc::new(InMemoryEncounterDefinitionRepository::new(
            default_encounter_definitions(),
        ));
        let quest_state_repo = Rc::new(InMemoryQuestStateRepository::new(Rc::clone(&audit)));
        let location_state_repo = Rc::new(InMemoryLocationStateRepository::new(Rc::clone(&audit)));

        let service = GameService::new(Rc::clone(&character_repo) as Rc<dyn CharacterRepository>)
            .with_config(GameConfig::default().with_dialogue_tree(true))
            .with_world_repo(Rc::clone(&world_repo) as Rc<dyn WorldRepository>)
            .with_location_repo(location_repo)
            .with_faction_repo(Rc::clone(&faction_repo) as Rc<dyn FactionRepository>)
            .with_quest_state_repo(quest_state_repo)
            .with_location_state_repo(location_state_repo)
            .with_definition_repo(definition_repo)
            .with_entity_repo(entity_repo)
            .with_persistor(Rc::clone(&persistor) as Rc<dyn AtomicStatePersistor>);
        service.seed_default_quests().unwrap();

        Fixture {
            service,
            character_repo,
            world_repo,
            faction_repo,
            persistor,
            audit,
        }
    }

    #[test]
    fn encounter_plans_are_deterministic_for_same_context() {
        let fixture_a = build_fixture(7);
        let fixture_b = build_fixture(7);
        let (plan_a, _, _) = fixture_a.service.explore(21).unwrap();
        let (plan_b, _, _) = fixture_b.service.explore(21).unwrap();

        let ids_a: Vec<i64> = plan_a.enemies.iter().map(|row| row.id).collect();
        let ids_b: Vec<i64> = plan_b.enemies.iter().map(|row| row.id).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn combat_resolve_intent_is_deterministic_for_same_context() {
        let run = || {
            let fixture = build_fixture(11);
            let player = fixture.character_repo.get(21).unwrap();
            let enemy = goblin(99);
            let scene = Scene::new("close", "open", "none");
            let mut choose =
                |_: &[PlayerAction], _: &Character, _: &Entity, _: u32, _: &Scene| PlayerAction::Attack;
            fixture
                .service
                .combat_resolve_intent(&player, &enemy, &mut choose, &scene)
                .unwrap()
        };
        let first = run();
        let second = run();
        let lines_a: Vec<String> = first.log.iter().map(|row| row.text.clone()).collect();
        let lines_b: Vec<String> = second.log.iter().map(|row| row.text.clone()).collect();
        assert_eq!(lines_a, lines_b);
        assert_eq!(first.player.hp_current, second.player.hp_current);
        assert_eq!(first.enemy.hp_current, second.enemy.hp_current);
    }

    #[test]
    fn quest_acceptance_sets_expiry() {
        let fixture = build_fixture(3);
        let result = fixture.service.accept_quest_intent(21, "trail_patrol").unwrap();
        assert!(result.messages[0].contains("Trail Patrol"));

        let world = fixture.world_repo.load_default().unwrap();
        let quest = &world.flags.quests["trail_patrol"];
        assert_eq!(quest.status, QuestStatus::Active);
        assert_eq!(quest.accepted_turn, Some(0));
        assert_eq!(quest.expires_turn, Some(5));
        assert_eq!(quest.owner_character_id, Some(21));
        // History row landed in the audit log.
        assert_eq!(fixture.audit.borrow().len("quest_history"), 1);
    }

    #[test]
    fn accepting_an_active_quest_is_rejected_without_mutation() {
        let fixture = build_fixture(3);
        fixture.service.accept_quest_intent(21, "trail_patrol").unwrap();
        let before = fixture.world_repo.load_default().unwrap();
        let result = fixture.service.accept_quest_intent(21, "trail_patrol").unwrap();
        assert!(result.messages[0].contains("cannot be accepted"));
        let after = fixture.world_repo.load_default().unwrap();
        assert_eq!(before.flags.quests["trail_patrol"], after.flags.quests["trail_patrol"]);
    }

    #[test]
    fn quest_turn_in_grants_rewards_and_peaceful_window() {
        let fixture = build_fixture(3);
        fixture.service.accept_quest_intent(21, "trail_patrol").unwrap();
        {
            let mut world = fixture.world_repo.load_default().unwrap();
            let quest = world.flags.quests.get_mut("trail_patrol").unwrap();
            quest.progress = quest.target;
            quest.status = QuestStatus::ReadyToTurnIn;
            fixture.world_repo.save(&world);
        }

        let before_money = fixture.character_repo.get(21).unwrap().money;
        let result = fixture.service.turn_in_quest_intent(21, "trail_patrol").unwrap();
        assert!(result.messages[0].contains("Turned in"));

        let character = fixture.character_repo.get(21).unwrap();
        assert_eq!(character.money, before_money + 25);
        assert_eq!(character.xp, 60);

        let world = fixture.world_repo.load_default().unwrap();
        assert_eq!(world.flags.quests["trail_patrol"].status, QuestStatus::Completed);
        assert_eq!(world.flags.world_flags.get("quest:trail_patrol:turned_in"), Some(&true));
        assert_eq!(world.flags.world_flags.get("location:1:peaceful"), Some(&true));

        // Audit trail: world flags, quest history, reputation delta.
        let audit = fixture.audit.borrow();
        assert!(audit.len("world_history") >= 2);
        assert!(audit.len("quest_history") >= 2);
        assert_eq!(audit.len("reputation_history"), 1);
        drop(audit);
        assert_eq!(fixture.faction_repo.get("wardens").unwrap().reputation_for(21), 3);
    }

    #[test]
    fn reputation_history_rows_balance_deltas() {
        let fixture = build_fixture(3);
        fixture.service.accept_quest_intent(21, "trail_patrol").unwrap();
        {
            let mut world = fixture.world_repo.load_default().unwrap();
            let quest = world.flags.quests.get_mut("trail_patrol").unwrap();
            quest.progress = quest.target;
            quest.status = QuestStatus::ReadyToTurnIn;
            fixture.world_repo.save(&world);
        }
        fixture.service.turn_in_quest_intent(21, "trail_patrol").unwrap();

        let audit = fixture.audit.borrow();
        for row in audit.rows("reputation_history") {
            let before = row["score_before"].as_i64().unwrap();
            let after = row["score_after"].as_i64().unwrap();
            let delta = row["delta"].as_i64().unwrap();
            assert_eq!(after - before, delta);
        }
    }

    #[test]
    fn expired_quests_fail_on_world_tick() {
        let fixture = build_fixture(3);
        fixture.service.accept_quest_intent(21, "trail_patrol").unwrap();
        fixture.service.advance_world(6, true).unwrap();

        let world = fixture.world_repo.load_default().unwrap();
        assert_eq!(world.flags.quests["trail_patrol"].status, QuestStatus::Failed);
        assert!(world
            .flags
            .consequences
            .iter()
            .any(|row| row.kind == "quest_expired"));
    }

    #[test]
    fn peaceful_window_suppresses_explore_encounters() {
        let fixture = build_fixture(3);
        {
            let mut world = fixture.world_repo.load_default().unwrap();
            world.flags.world_flags.insert("location:1:peaceful".to_string(), true);
            fixture.world_repo.save(&world);
        }
        let (plan, _, _) = fixture.service.explore(21).unwrap();
        assert!(plan.enemies.is_empty());
        assert_eq!(plan.source, EncounterSource::Peaceful);
    }

    #[test]
    fn flashpoint_pressure_escalates_encounters() {
        let fixture = build_fixture(3);
        {
            let mut world = fixture.world_repo.load_default().unwrap();
            world.flags.narrative.flashpoint_echoes.push(FlashpointEcho {
                turn: world.current_turn,
                seed_id: "faction_flashpoint_1".to_string(),
                resolution: "faction_shift".to_string(),
                channel: "combat".to_string(),
                bias_faction: Some("wardens".to_string()),
                rival_faction: None,
                affected_factions: 2,
                severity_score: 84,
                severity_band: "critical".to_string(),
            });
            fixture.world_repo.save(&world);
        }
        let world = fixture.world_repo.load_default().unwrap();
        let (level, max_enemies, bias) =
            NarrativeService::encounter_flashpoint_adjustments(&world, 2, 2, Some("wild".to_string()));
        assert_eq!((level, max_enemies, bias.as_deref()), (3, 3, Some("wardens")));
    }

    #[test]
    fn social_approach_is_deterministic_and_moves_disposition() {
        let run = || {
            let fixture = build_fixture(5);
            fixture
                .service
                .submit_social_approach_intent(21, "broker_silas", "friendly")
                .unwrap()
        };
        let first = run();
        let second = run();
        assert_eq!(first.success, second.success);
        assert_eq!(first.roll_total, second.roll_total);
        assert_ne!(first.relationship_before, first.relationship_after);
    }

    #[test]
    fn repeated_social_checks_use_fresh_nonces() {
        let fixture = build_fixture(5);
        let first = fixture
            .service
            .submit_social_approach_intent(21, "broker_silas", "friendly")
            .unwrap();
        let world = fixture.world_repo.load_default().unwrap();
        let nonce_key = "nonce:broker_silas:friendly:character:21";
        assert_eq!(world.flags.npc_social.nonces.get(nonce_key), Some(&1));
        let _ = first;

        fixture
            .service
            .submit_social_approach_intent(21, "broker_silas", "friendly")
            .unwrap();
        let world = fixture.world_repo.load_default().unwrap();
        assert_eq!(world.flags.npc_social.nonces.get(nonce_key), Some(&2));
    }

    #[test]
    fn invalid_approach_normalizes_to_direct() {
        let fixture = build_fixture(5);
        let outcome = fixture
            .service
            .submit_social_approach_intent(21, "broker_silas", "serenade")
            .unwrap();
        assert_eq!(outcome.approach, "direct");
    }

    #[test]
    fn bribe_without_gold_downgrades_to_direct() {
        let fixture = build_fixture(5);
        {
            let mut character = fixture.character_repo.get(21).unwrap();
            character.money = 2;
            fixture.character_repo.save(&character);
        }
        let outcome = fixture
            .service
            .submit_social_approach_intent(21, "broker_silas", "bribe")
            .unwrap();
        assert_eq!(outcome.approach, "direct");
        assert_eq!(fixture.character_repo.get(21).unwrap().money, 2);
    }

    #[test]
    fn shop_buy_sell_spread_never_profits() {
        let fixture = build_fixture(5);
        let shop = fixture.service.get_shop_view_intent(21).unwrap();
        for item in &shop.items {
            let sell = crate::data::items::sell_price(&item.name);
            assert!(item.price >= sell, "{} would be profitable to flip", item.name);
        }

        let before = fixture.character_repo.get(21).unwrap().money;
        fixture.service.buy_shop_item_intent(21, "Torch").unwrap();
        fixture.service.sell_inventory_item_intent(21, "Torch").unwrap();
        let after = fixture.character_repo.get(21).unwrap().money;
        assert!(after <= before);
    }

    #[test]
    fn unaffordable_purchase_leaves_state_untouched() {
        let fixture = build_fixture(5);
        {
            let mut character = fixture.character_repo.get(21).unwrap();
            character.money = 1;
            fixture.character_repo.save(&character);
        }
        let result = fixture.service.buy_shop_item_intent(21, "Chain Shirt").unwrap();
        assert!(result.messages[0].contains("costs"));
        let character = fixture.character_repo.get(21).unwrap();
        assert_eq!(character.money, 1);
        assert!(character.inventory.is_empty());
    }

    #[test]
    fn cataclysm_strain_labels_shop_prices() {
        let fixture = build_fixture(5);
        {
            let mut world = fixture.world_repo.load_default().unwrap();
            world.flags.cataclysm_state = Some(CataclysmState {
                active: true,
                kind: "plague".to_string(),
                phase: "map_shrinks".to_string(),
                progress: 60,
                ..CataclysmState::default()
            });
            fixture.world_repo.save(&world);
        }
        let shop = fixture.service.get_shop_view_intent(21).unwrap();
        assert!(shop.price_modifier_label.to_lowercase().contains("cataclysm strain"));
        assert!(shop.price_modifier >= 2);
    }

    #[test]
    fn world_fell_terminal_state_persists() {
        let fixture = build_fixture(402);
        {
            let mut world = fixture.world_repo.load_default().unwrap();
            world.flags.cataclysm_state = Some(CataclysmState {
                active: true,
                kind: "demon_king".to_string(),
                phase: "ruin".to_string(),
                progress: 100,
                ..CataclysmState::default()
            });
            fixture.world_repo.save(&world);
        }
        let terminal = fixture.service.get_cataclysm_terminal_state_intent(21).unwrap();
        let (game_over, message) = terminal.unwrap();
        assert!(game_over);
        assert!(message.contains("World Fell"));

        let world = fixture.world_repo.load_default().unwrap();
        let end_state = world.flags.cataclysm_end_state.unwrap();
        assert_eq!(end_state.status, "world_fell");
        assert!(end_state.game_over);
    }

    #[test]
    fn cataclysm_normalization_persists_on_view_read() {
        let fixture = build_fixture(3);
        {
            let mut world = fixture.world_repo.load_default().unwrap();
            world.flags.cataclysm_state = Some(CataclysmState {
                active: true,
                kind: "unknown_kind".to_string(),
                phase: "invalid_phase".to_string(),
                progress: 177,
                ..CataclysmState::default()
            });
            fixture.world_repo.save(&world);
        }
        let view = fixture.service.get_game_loop_view(21).unwrap();
        assert_eq!(view.cataclysm_kind, "");
        assert_eq!(view.cataclysm_progress, 100);

        let world = fixture.world_repo.load_default().unwrap();
        let state = world.flags.cataclysm_state.unwrap();
        assert_eq!(state.progress, 100);
        assert_eq!(state.kind, "");
    }

    #[test]
    fn reward_intent_grants_xp_money_and_quest_progress() {
        let fixture = build_fixture(5);
        fixture.service.accept_quest_intent(21, "trail_patrol").unwrap();
        let mut character = fixture.character_repo.get(21).unwrap();
        let monster = goblin(99);

        let reward = fixture
            .service
            .apply_encounter_reward_intent(&mut character, &monster)
            .unwrap();
        assert_eq!(reward.xp_gained, 20);
        assert_eq!(reward.money_gained, 5);

        let world = fixture.world_repo.load_default().unwrap();
        assert_eq!(world.flags.quests["trail_patrol"].progress, 1);
        // Bestiary tier advanced.
        assert_eq!(
            character.flags.codex_entries.get("bestiary:goblin").map(String::as_str),
            Some("observed")
        );
    }

    #[test]
    fn persist_fallback_still_saves_state() {
        let fixture = build_fixture(5);
        fixture.persistor.fail_next();
        let result = fixture.service.accept_quest_intent(21, "trail_patrol").unwrap();
        assert!(result.messages[0].contains("Accepted"));
        // Fallback path still saved the world mutation.
        let world = fixture.world_repo.load_default().unwrap();
        assert_eq!(world.flags.quests["trail_patrol"].status, QuestStatus::Active);
    }

    #[test]
    fn dialogue_session_round_trips_choice() {
        let fixture = build_fixture(5);
        let session = fixture.service.get_dialogue_session_intent(21, "broker_silas").unwrap();
        assert_eq!(session.stage_id, "opening");
        assert!(session.choices.iter().any(|row| row.choice_id == "friendly"));

        let result = fixture
            .service
            .submit_dialogue_choice_intent(21, "broker_silas", "friendly")
            .unwrap();
        assert!(!result.messages.is_empty());
    }

    #[test]
    fn hp_stays_clamped_across_intents() {
        let fixture = build_fixture(9);
        let _ = fixture.service.explore_intent(21).unwrap();
        let _ = fixture.service.rest_intent(21).unwrap();
        let character = fixture.character_repo.get(21).unwrap();
        assert!(character.hp_current >= 0);
        assert!(character.hp_current <= character.hp_max);
    }

    #[test]
    fn training_gates_on_wardens_reputation() {
        let fixture = build_fixture(5);
        let result = fixture.service.purchase_training_intent(21, "captain_favor").unwrap();
        assert_eq!(result.messages[0], "Training requires wardens reputation 4.");

        {
            let mut faction = fixture.faction_repo.get("wardens").unwrap();
            faction.adjust_reputation(&Faction::reputation_key(21), 5);
            fixture.faction_repo.save(&faction);
        }
        let result = fixture.service.purchase_training_intent(21, "captain_favor").unwrap();
        assert!(result.messages[0].contains("You train"));
        assert!(fixture.character_repo.get(21).unwrap().has_interaction_unlock("captain_favor"));
    }

    #[test]
    fn level_up_flow_requires_choice_commitment() {
        let fixture = build_fixture(5);
        {
            let mut character = fixture.character_repo.get(21).unwrap();
            character.xp = 95;
            fixture.character_repo.save(&character);
        }
        let mut character = fixture.character_repo.get(21).unwrap();
        let monster = goblin(99);
        fixture
            .service
            .apply_encounter_reward_intent(&mut character, &monster)
            .unwrap();

        let pending = fixture.service.get_level_up_pending_intent(21).unwrap();
        let pending = pending.expect("level-up should be pending");
        assert_eq!(pending.next_level, 2);

        let result = fixture
            .service
            .submit_level_up_choice_intent(21, "hp", None)
            .unwrap();
        assert!(result.messages[0].contains("max HP"));
        assert!(fixture.service.get_level_up_pending_intent(21).unwrap().is_none());
        assert_eq!(fixture.audit.borrow().len("character_progression_unlock"), 1);
    }

    #[test]
    fn rumour_board_records_history() {
        let fixture = build_fixture(5);
        {
            let mut world = fixture.world_repo.load_default().unwrap();
            world
                .flags
                .narrative
                .story_seeds
                .push(crate::game::world::StorySeed::new("merchant_under_pressure_4", "merchant_under_pressure"));
            fixture.world_repo.save(&world);
        }
        let board = fixture.service.get_rumour_board_intent(21).unwrap();
        assert!(!board.rumours.is_empty());
        let world = fixture.world_repo.load_default().unwrap();
        assert!(world.has_recent_rumour(21));
    }

    #[test]
    fn travel_moves_character_and_burns_days() {
        let fixture = build_fixture(5);
        let result = fixture.service.travel_intent(21, Some(2), "road").unwrap();
        assert!(result.messages.last().unwrap().contains("Deep Forest"));
        let character = fixture.character_repo.get(21).unwrap();
        assert_eq!(character.location_id, Some(2));
        let world = fixture.world_repo.load_default().unwrap();
        assert!(world.current_turn >= 2);
    }

    #[test]
    fn game_loop_view_surfaces_cataclysm_summary() {
        let fixture = build_fixture(3);
        {
            let mut world = fixture.world_repo.load_default().unwrap();
            world.flags.cataclysm_state = Some(CataclysmState {
                active: true,
                kind: "plague".to_string(),
                phase: "grip_tightens".to_string(),
                progress: 48,
                ..CataclysmState::default()
            });
            fixture.world_repo.save(&world);
        }
        let view = fixture.service.get_game_loop_view(21).unwrap();
        assert!(view.cataclysm_active);
        assert_eq!(view.cataclysm_kind, "plague");
        assert_eq!(view.cataclysm_phase, "grip_tightens");
        assert_eq!(view.cataclysm_progress, 48);
        assert!(view.cataclysm_summary.contains("Plague"));

        let town = fixture.service.get_town_view_intent(21).unwrap();
        assert!(town.cataclysm_summary.contains("Grip Tightens"));
    }

    #[test]
    fn unknown_character_raises_domain_error() {
        let fixture = build_fixture(3);
        assert!(matches!(
            fixture.service.get_game_loop_view(404),
            Err(GameError::UnknownCharacter(404))
        ));
    }
}
