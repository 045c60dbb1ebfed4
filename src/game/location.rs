//! Locations, their encounter tables, and hazard profiles

use serde::{Deserialize, Serialize};

/// A weighted row in a location's fallback encounter table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncounterTableEntry {
    pub entity_id: i64,
    pub weight: u32,
    pub min_level: u32,
    pub max_level: u32,
}

impl EncounterTableEntry {
    pub fn allows_level(&self, level: u32) -> bool {
        level >= self.min_level && level <= self.max_level
    }
}

/// Environmental hazard flags a location carries into encounters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HazardProfile {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub environmental_flags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: i64,
    pub name: String,
    #[serde(default = "Location::default_biome")]
    pub biome: String,
    #[serde(default = "Location::default_recommended_level")]
    pub recommended_level: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub factions: Vec<String>,
    #[serde(default)]
    pub encounter_table: Vec<EncounterTableEntry>,
    #[serde(default)]
    pub hazard_profile: HazardProfile,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
}

impl Location {
    fn default_biome() -> String {
        "wilderness".to_string()
    }

    fn default_recommended_level() -> u32 {
        1
    }

    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            biome: Self::default_biome(),
            recommended_level: 1,
            tags: Vec::new(),
            factions: Vec::new(),
            encounter_table: Vec::new(),
            hazard_profile: HazardProfile::default(),
            x: 0,
            y: 0,
        }
    }

    pub fn is_town(&self) -> bool {
        self.biome.eq_ignore_ascii_case("town")
            || self.tags.iter().any(|tag| tag.eq_ignore_ascii_case("town"))
    }

    /// Straight-line map distance to another location.
    pub fn distance_to(&self, other: &Location) -> f64 {
        let dx = f64::from(self.x - other.x);
        let dy = f64::from(self.y - other.y);
        (dx * dx + dy * dy).sqrt()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encounter_entry_level_bounds_are_inclusive() {
        let entry = EncounterTableEntry {
            entity_id: 1,
            weight: 3,
            min_level: 2,
            max_level: 4,
        };
        assert!(!entry.allows_level(1));
        assert!(entry.allows_level(2));
        assert!(entry.allows_level(4));
        assert!(!entry.allows_level(5));
    }

    #[test]
    fn town_detection_reads_biome_and_tags() {
        let mut location = Location::new(1, "Emberfall");
        assert!(!location.is_town());
        location.biome = "town".to_string();
        assert!(location.is_town());

        let mut tagged = Location::new(2, "Crossing");
        tagged.tags.push("Town".to_string());
        assert!(tagged.is_town());
    }
}
