//! Scene context for combat: range bands, terrain, weather, surprise

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Coarse distance abstraction between the two sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeBand {
    Engaged,
    Near,
    Far,
}

impl Default for RangeBand {
    fn default() -> Self {
        Self::Engaged
    }
}

impl RangeBand {
    /// Normalize a free-form distance string; `close` and `mid` are aliases.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "near" | "mid" => Self::Near,
            "far" => Self::Far,
            _ => Self::Engaged,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Engaged => "Engaged",
            Self::Near => "Near",
            Self::Far => "Far",
        }
    }

    pub fn is_melee(self) -> bool {
        self == Self::Engaged
    }

    /// One step closer; engaged is the floor.
    pub fn step_toward_engagement(self) -> Self {
        match self {
            Self::Far => Self::Near,
            Self::Near | Self::Engaged => Self::Engaged,
        }
    }

    /// One step away; far is the ceiling.
    pub fn step_away(self) -> Self {
        match self {
            Self::Engaged => Self::Near,
            Self::Near | Self::Far => Self::Far,
        }
    }
}

/// Which side opens with the drop on the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Surprise {
    None,
    Player,
    Enemy,
}

impl Default for Surprise {
    fn default() -> Self {
        Self::None
    }
}

impl Surprise {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "player" => Self::Player,
            "enemy" => Self::Enemy,
            _ => Self::None,
        }
    }
}

/// The scene a combat plays out in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    #[serde(default)]
    pub distance: RangeBand,
    #[serde(default = "Scene::default_terrain")]
    pub terrain: String,
    #[serde(default)]
    pub weather: String,
    #[serde(default)]
    pub surprise: Surprise,
    #[serde(default)]
    pub hazards: Vec<String>,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            distance: RangeBand::Engaged,
            terrain: Self::default_terrain(),
            weather: String::new(),
            surprise: Surprise::None,
            hazards: Vec::new(),
        }
    }
}

impl Scene {
    fn default_terrain() -> String {
        "open".to_string()
    }

    pub fn new(distance: &str, terrain: &str, surprise: &str) -> Self {
        Self {
            distance: RangeBand::parse(distance),
            terrain: terrain.trim().to_ascii_lowercase(),
            weather: String::new(),
            surprise: Surprise::parse(surprise),
            hazards: Vec::new(),
        }
    }

    pub fn with_weather(mut self, weather: &str) -> Self {
        self.weather = weather.trim().to_ascii_lowercase();
        self
    }

    pub fn with_hazards(mut self, hazards: &[&str]) -> Self {
        self.hazards = hazards.iter().map(|row| row.to_string()).collect();
        self
    }
}

pub fn is_swamp_terrain(terrain: &str) -> bool {
    matches!(
        terrain.trim().to_ascii_lowercase().as_str(),
        "swamp" | "wetland" | "marsh" | "bog"
    )
}

pub fn is_treacherous_ground(terrain: &str) -> bool {
    matches!(
        terrain.trim().to_ascii_lowercase().as_str(),
        "mountain" | "mountains" | "volcano" | "volcanic"
    )
}

pub fn is_dense_cover_terrain(terrain: &str) -> bool {
    matches!(
        terrain.trim().to_ascii_lowercase().as_str(),
        "forest" | "jungle" | "woodland"
    )
}

/// Hiding needs concealing terrain, or any gap between the sides.
pub fn terrain_supports_hiding(terrain: &str, distance: RangeBand) -> bool {
    let key = terrain.trim().to_ascii_lowercase();
    if matches!(
        key.as_str(),
        "forest" | "jungle" | "woodland" | "swamp" | "wetland" | "marsh" | "bog" | "cramped"
    ) {
        return true;
    }
    distance != RangeBand::Engaged
}

/// Mutable per-combat hazard bookkeeping (fire tiers, trap cooldowns).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HazardState {
    pub fire_intensity: u32,
    pub trap_cooldown: u32,
    pub counters: BTreeMap<String, i32>,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_aliases_normalize() {
        assert_eq!(RangeBand::parse("close"), RangeBand::Engaged);
        assert_eq!(RangeBand::parse("mid"), RangeBand::Near);
        assert_eq!(RangeBand::parse("FAR"), RangeBand::Far);
        assert_eq!(RangeBand::parse("nonsense"), RangeBand::Engaged);
    }

    #[test]
    fn stepping_respects_band_bounds() {
        assert_eq!(RangeBand::Far.step_toward_engagement(), RangeBand::Near);
        assert_eq!(RangeBand::Near.step_toward_engagement(), RangeBand::Engaged);
        assert_eq!(RangeBand::Engaged.step_toward_engagement(), RangeBand::Engaged);
        assert_eq!(RangeBand::Engaged.step_away(), RangeBand::Near);
        assert_eq!(RangeBand::Far.step_away(), RangeBand::Far);
    }

    #[test]
    fn terrain_classification() {
        assert!(is_swamp_terrain("Marsh"));
        assert!(is_treacherous_ground("volcanic"));
        assert!(is_dense_cover_terrain("forest"));
        assert!(!is_dense_cover_terrain("open"));
    }

    #[test]
    fn hiding_needs_cover_or_distance() {
        assert!(terrain_supports_hiding("forest", RangeBand::Engaged));
        assert!(!terrain_supports_hiding("open", RangeBand::Engaged));
        assert!(terrain_supports_hiding("open", RangeBand::Near));
    }
}
