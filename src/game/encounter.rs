//! Encounter generation - seed-derived selection from weighted tables

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::rc::Rc;

use super::entity::Entity;
use super::location::Location;
use super::seed::{derive_seed, SeedContext};
use crate::repo::{EncounterDefinitionRepository, EntityRepository};

/// One slot in an encounter definition: which entity, how many, how likely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncounterSlot {
    pub entity_id: i64,
    #[serde(default)]
    pub monster_slug: String,
    pub min_count: u32,
    pub max_count: u32,
    pub weight: u32,
}

/// An authored encounter table scoped to locations and a level band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncounterDefinition {
    pub id: String,
    pub name: String,
    pub level_min: u32,
    pub level_max: u32,
    #[serde(default)]
    pub faction_id: Option<String>,
    #[serde(default = "EncounterDefinition::default_threat")]
    pub base_threat: f32,
    #[serde(default)]
    pub location_ids: Vec<i64>,
    pub slots: Vec<EncounterSlot>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub biome: Option<String>,
}

impl EncounterDefinition {
    fn default_threat() -> f32 {
        1.0
    }

    pub fn applies_to_location(&self, location_id: i64) -> bool {
        self.location_ids.is_empty() || self.location_ids.contains(&location_id)
    }

    pub fn allows_level(&self, level: u32) -> bool {
        level >= self.level_min && level <= self.level_max
    }

    pub fn matches_biome(&self, biome: &str) -> bool {
        match &self.biome {
            Some(required) => required.eq_ignore_ascii_case(biome),
            None => true,
        }
    }
}

/// Where the plan's enemies came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncounterSource {
    Definitions,
    LocationTable,
    Peaceful,
    Empty,
    Disabled,
}

/// The generated encounter handed back to the service.
#[derive(Debug, Clone)]
pub struct EncounterPlan {
    pub enemies: Vec<Entity>,
    pub hazards: Vec<String>,
    pub source: EncounterSource,
}

impl EncounterPlan {
    pub fn empty(source: EncounterSource) -> Self {
        Self {
            enemies: Vec::new(),
            hazards: Vec::new(),
            source,
        }
    }
}

/// Inputs for one plan generation.
#[derive(Debug, Clone)]
pub struct EncounterRequest {
    pub location_id: i64,
    pub player_level: u32,
    pub world_turn: u64,
    pub faction_bias: Option<String>,
    pub max_enemies: u32,
    pub location_biome: String,
    pub world_flags: BTreeMap<String, bool>,
    /// Hazard flags layered on by the cataclysm, if any.
    pub extra_hazards: Vec<String>,
}

/// Generates encounter plans from authored definitions, falling back to the
/// location's weighted table.
pub struct EncounterService {
    entity_repo: Rc<dyn EntityRepository>,
    definition_repo: Option<Rc<dyn EncounterDefinitionRepository>>,
}

impl EncounterService {
    pub fn new(
        entity_repo: Rc<dyn EntityRepository>,
        definition_repo: Option<Rc<dyn EncounterDefinitionRepository>>,
    ) -> Self {
        Self {
            entity_repo,
            definition_repo,
        }
    }

    /// Produce a plan. Deterministic for identical requests.
    pub fn generate_plan(&self, request: &EncounterRequest, location: Option<&Location>) -> EncounterPlan {
        let peaceful_key = format!("location:{}:peaceful", request.location_id);
        if request.world_flags.get(&peaceful_key).copied().unwrap_or(false) {
            return EncounterPlan::empty(EncounterSource::Peaceful);
        }

        let seed = derive_seed(
            "encounter.plan",
            &SeedContext::new()
                .with("location_id", request.location_id)
                .with("player_level", request.player_level)
                .with("world_turn", request.world_turn)
                .with("faction_bias", request.faction_bias.clone().unwrap_or_default())
                .with("max_enemies", request.max_enemies),
        );
        let mut rng = StdRng::seed_from_u64(seed);

        let max_enemies = request.max_enemies.clamp(1, 3) as usize;
        let mut enemies = self.roll_from_definitions(request, &mut rng, max_enemies);
        let mut source = EncounterSource::Definitions;

        if enemies.is_empty() {
            enemies = self.roll_from_location_table(request, location, &mut rng, max_enemies);
            source = EncounterSource::LocationTable;
        }
        if enemies.is_empty() {
            return EncounterPlan {
                enemies,
                hazards: self.collect_hazards(request, location),
                source: EncounterSource::Empty,
            };
        }

        EncounterPlan {
            enemies,
            hazards: self.collect_hazards(request, location),
            source,
        }
    }

    fn roll_from_definitions(
        &self,
        request: &EncounterRequest,
        rng: &mut StdRng,
        max_enemies: usize,
    ) -> Vec<Entity> {
        let Some(definition_repo) = &self.definition_repo else {
            return Vec::new();
        };

        let mut candidates: Vec<EncounterDefinition> = definition_repo
            .list_for_location(request.location_id)
            .into_iter()
            .filter(|row| row.allows_level(request.player_level))
            .filter(|row| row.matches_biome(&request.location_biome))
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        // Faction bias pulls matching tables to the front.
        if let Some(bias) = &request.faction_bias {
            candidates.sort_by_key(|row| {
                let matches = row.faction_id.as_deref() == Some(bias.as_str());
                (!matches, row.id.clone())
            });
        } else {
            candidates.sort_by(|a, b| a.id.cmp(&b.id));
        }

        let definition = &candidates[0];
        let mut picked = Vec::new();
        for slot in &definition.slots {
            if picked.len() >= max_enemies {
                break;
            }
            let count = if slot.max_count > slot.min_count {
                rng.gen_range(slot.min_count..=slot.max_count)
            } else {
                slot.min_count
            };
            for _ in 0..count {
                if picked.len() >= max_enemies {
                    break;
                }
                if let Some(entity) = self.entity_repo.get(slot.entity_id) {
                    picked.push(entity.combat_copy());
                }
            }
        }
        picked
    }

    fn roll_from_location_table(
        &self,
        request: &EncounterRequest,
        location: Option<&Location>,
        rng: &mut StdRng,
        max_enemies: usize,
    ) -> Vec<Entity> {
        let Some(location) = location else {
            return Vec::new();
        };
        let eligible: Vec<_> = location
            .encounter_table
            .iter()
            .filter(|entry| entry.allows_level(request.player_level) && entry.weight > 0)
            .collect();
        if eligible.is_empty() {
            return Vec::new();
        }

        let total_weight: u32 = eligible.iter().map(|entry| entry.weight).sum();
        let count = rng.gen_range(1..=max_enemies.max(1));
        let mut picked = Vec::new();
        for _ in 0..count {
            let mut roll = rng.gen_range(0..total_weight);
            for entry in &eligible {
                if roll < entry.weight {
                    if let Some(entity) = self.entity_repo.get(entry.entity_id) {
                        picked.push(entity.combat_copy());
                    }
                    break;
                }
                roll -= entry.weight;
            }
        }
        picked
    }

    fn collect_hazards(&self, request: &EncounterRequest, location: Option<&Location>) -> Vec<String> {
        let mut hazards: Vec<String> = Vec::new();
        if let Some(location) = location {
            for flag in &location.hazard_profile.environmental_flags {
                let key = flag.trim().to_ascii_lowercase().replace(' ', "_");
                if !key.is_empty() && !hazards.contains(&key) {
                    hazards.push(key);
                }
            }
        }
        for flag in &request.extra_hazards {
            let key = flag.trim().to_ascii_lowercase();
            if !key.is_empty() && !hazards.contains(&key) {
                hazards.push(key);
            }
        }
        hazards
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::location::EncounterTableEntry;
    use crate::repo::memory::{InMemoryEncounterDefinitionRepository, InMemoryEntityRepository};

    fn entity(id: i64, name: &str, level: u32) -> Entity {
        Entity::new(id, name, level, 7)
    }

    fn service_with(defs: Vec<EncounterDefinition>) -> EncounterService {
        let entities = vec![
            entity(1, "Goblin", 1),
            entity(2, "Wolf", 1),
            entity(3, "Bandit", 2),
        ];
        EncounterService::new(
            Rc::new(InMemoryEntityRepository::new(entities)),
            Some(Rc::new(InMemoryEncounterDefinitionRepository::new(defs))),
        )
    }

    fn patrol_definition() -> EncounterDefinition {
        EncounterDefinition {
            id: "forest_patrol_table".to_string(),
            name: "Forest Patrol Table".to_string(),
            level_min: 1,
            level_max: 4,
            faction_id: Some("wardens".to_string()),
            base_threat: 1.15,
            location_ids: vec![1],
            slots: vec![
                EncounterSlot {
                    entity_id: 1,
                    monster_slug: "goblin".to_string(),
                    min_count: 1,
                    max_count: 2,
                    weight: 3,
                },
                EncounterSlot {
                    entity_id: 2,
                    monster_slug: "wolf".to_string(),
                    min_count: 1,
                    max_count: 2,
                    weight: 2,
                },
            ],
            tags: vec!["forest".to_string(), "patrol".to_string()],
            biome: None,
        }
    }

    fn request(level: u32) -> EncounterRequest {
        EncounterRequest {
            location_id: 1,
            player_level: level,
            world_turn: 3,
            faction_bias: None,
            max_enemies: 2,
            location_biome: "wilderness".to_string(),
            world_flags: BTreeMap::new(),
            extra_hazards: Vec::new(),
        }
    }

    #[test]
    fn identical_requests_produce_identical_plans() {
        let service = service_with(vec![patrol_definition()]);
        let req = request(2);
        let plan_a = service.generate_plan(&req, None);
        let plan_b = service.generate_plan(&req, None);

        let ids_a: Vec<i64> = plan_a.enemies.iter().map(|row| row.id).collect();
        let ids_b: Vec<i64> = plan_b.enemies.iter().map(|row| row.id).collect();
        assert_eq!(ids_a, ids_b);
        assert!(!ids_a.is_empty());
    }

    #[test]
    fn peaceful_window_suppresses_enemies() {
        let service = service_with(vec![patrol_definition()]);
        let mut req = request(2);
        req.world_flags.insert("location:1:peaceful".to_string(), true);

        let plan = service.generate_plan(&req, None);
        assert!(plan.enemies.is_empty());
        assert_eq!(plan.source, EncounterSource::Peaceful);
    }

    #[test]
    fn level_filter_excludes_out_of_band_definitions() {
        let service = service_with(vec![patrol_definition()]);
        let plan = service.generate_plan(&request(9), None);
        // Definition band is 1-4; nothing else to fall back to.
        assert!(plan.enemies.is_empty());
    }

    #[test]
    fn plan_caps_enemy_count() {
        let service = service_with(vec![patrol_definition()]);
        for level in 1..=4 {
            let plan = service.generate_plan(&request(level), None);
            assert!(plan.enemies.len() <= 2);
        }
    }

    #[test]
    fn fallback_samples_location_table_by_weight() {
        let service = service_with(vec![]);
        let mut location = Location::new(1, "Deep Forest");
        location.encounter_table = vec![EncounterTableEntry {
            entity_id: 3,
            weight: 5,
            min_level: 1,
            max_level: 10,
        }];

        let plan = service.generate_plan(&request(2), Some(&location));
        assert!(!plan.enemies.is_empty());
        assert_eq!(plan.source, EncounterSource::LocationTable);
        assert!(plan.enemies.iter().all(|row| row.id == 3));
    }

    #[test]
    fn enemies_arrive_at_full_hp() {
        let service = service_with(vec![patrol_definition()]);
        let plan = service.generate_plan(&request(1), None);
        assert!(plan.enemies.iter().all(|row| row.hp_current == row.hp_max));
    }

    #[test]
    fn hazards_merge_location_and_extra_flags() {
        let service = service_with(vec![patrol_definition()]);
        let mut location = Location::new(1, "Caldera Rim");
        location
            .hazard_profile
            .environmental_flags
            .push("Spreading Fire".to_string());
        let mut req = request(1);
        req.extra_hazards.push("cataclysm:plague".to_string());

        let plan = service.generate_plan(&req, Some(&location));
        assert!(plan.hazards.contains(&"spreading_fire".to_string()));
        assert!(plan.hazards.contains(&"cataclysm:plague".to_string()));
    }
}
