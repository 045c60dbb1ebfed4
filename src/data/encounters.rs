//! Default encounter tables for worlds without authored content

use crate::game::encounter::{EncounterDefinition, EncounterSlot};

/// The stock encounter tables seeded into fresh worlds.
pub fn default_encounter_definitions() -> Vec<EncounterDefinition> {
    vec![
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
        },
        EncounterDefinition {
            id: "ruins_ambush_table".to_string(),
            name: "Ruins Ambush Table".to_string(),
            level_min: 2,
            level_max: 6,
            faction_id: Some("syndicate".to_string()),
            base_threat: 1.25,
            location_ids: vec![2],
            slots: vec![
                EncounterSlot {
                    entity_id: 3,
                    monster_slug: "bandit".to_string(),
                    min_count: 1,
                    max_count: 3,
                    weight: 3,
                },
                EncounterSlot {
                    entity_id: 4,
                    monster_slug: "skeleton".to_string(),
                    min_count: 1,
                    max_count: 2,
                    weight: 2,
                },
            ],
            tags: vec!["ruins".to_string(), "ambush".to_string()],
            biome: None,
        },
        EncounterDefinition {
            id: "caves_depths_table".to_string(),
            name: "Caves Depths Table".to_string(),
            level_min: 3,
            level_max: 8,
            faction_id: Some("wild".to_string()),
            base_threat: 1.35,
            location_ids: vec![3],
            slots: vec![
                EncounterSlot {
                    entity_id: 5,
                    monster_slug: "giant_rat".to_string(),
                    min_count: 1,
                    max_count: 3,
                    weight: 2,
                },
                EncounterSlot {
                    entity_id: 6,
                    monster_slug: "ghoul".to_string(),
                    min_count: 1,
                    max_count: 2,
                    weight: 3,
                },
            ],
            tags: vec!["caves".to_string(), "depths".to_string()],
            biome: None,
        },
    ]
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tables_cover_early_levels() {
        let definitions = default_encounter_definitions();
        assert_eq!(definitions.len(), 3);
        assert!(definitions.iter().any(|row| row.allows_level(1)));
        for definition in &definitions {
            assert!(definition.level_min <= definition.level_max);
            assert!(!definition.slots.is_empty());
        }
    }
}
