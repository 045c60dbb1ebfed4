//! Conditions and tactical tags carried by combatants

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Condition identifiers recognized by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusId {
    Poisoned,
    Burning,
    Blessed,
    Stunned,
    Blinded,
    Charmed,
    Deafened,
    Paralysed,
    Frightened,
    Grappled,
    Incapacitated,
    Invisible,
    Petrified,
    Prone,
    Restrained,
    Exhaustion,
    Unconscious,
}

impl StatusId {
    pub fn label(self) -> &'static str {
        match self {
            Self::Poisoned => "Poisoned",
            Self::Burning => "Burning",
            Self::Blessed => "Blessed",
            Self::Stunned => "Stunned",
            Self::Blinded => "Blinded",
            Self::Charmed => "Charmed",
            Self::Deafened => "Deafened",
            Self::Paralysed => "Paralysed",
            Self::Frightened => "Frightened",
            Self::Grappled => "Grappled",
            Self::Incapacitated => "Incapacitated",
            Self::Invisible => "Invisible",
            Self::Petrified => "Petrified",
            Self::Prone => "Prone",
            Self::Restrained => "Restrained",
            Self::Exhaustion => "Exhaustion",
            Self::Unconscious => "Unconscious",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "poisoned" => Some(Self::Poisoned),
            "burning" => Some(Self::Burning),
            "blessed" => Some(Self::Blessed),
            "stunned" => Some(Self::Stunned),
            "blinded" => Some(Self::Blinded),
            "charmed" => Some(Self::Charmed),
            "deafened" => Some(Self::Deafened),
            "paralysed" | "paralyzed" => Some(Self::Paralysed),
            "frightened" => Some(Self::Frightened),
            "grappled" => Some(Self::Grappled),
            "incapacitated" => Some(Self::Incapacitated),
            "invisible" => Some(Self::Invisible),
            "petrified" => Some(Self::Petrified),
            "prone" => Some(Self::Prone),
            "restrained" => Some(Self::Restrained),
            "exhaustion" => Some(Self::Exhaustion),
            "unconscious" => Some(Self::Unconscious),
            _ => None,
        }
    }

    /// Flat attack-roll shift per point of potency.
    pub fn attack_roll_shift(self) -> i32 {
        match self {
            Self::Poisoned => -2,
            Self::Blessed => 2,
            _ => 0,
        }
    }
}

/// A condition with a remaining duration and stacking potency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub id: StatusId,
    pub rounds: u32,
    pub potency: u32,
    #[serde(default)]
    pub source_id: i64,
    #[serde(default)]
    pub source_name: String,
}

impl Status {
    pub fn new(id: StatusId, rounds: u32, potency: u32) -> Self {
        Self {
            id,
            rounds: rounds.max(1),
            potency: potency.max(1),
            source_id: 0,
            source_name: String::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.rounds > 0
    }
}

/// Tactical tag identifiers. Short-lived, non-damaging modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagId {
    Concealed,
    Cover,
    HighGround,
    HiddenStrike,
    Helped,
    Exposed,
    Dodging,
    Disengaged,
}

impl TagId {
    pub fn label(self) -> &'static str {
        match self {
            Self::Concealed => "Concealed",
            Self::Cover => "Cover",
            Self::HighGround => "High Ground",
            Self::HiddenStrike => "Hidden Strike",
            Self::Helped => "Helped",
            Self::Exposed => "Exposed",
            Self::Dodging => "Dodging",
            Self::Disengaged => "Disengaged",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Self::Concealed => "concealed",
            Self::Cover => "cover",
            Self::HighGround => "high_ground",
            Self::HiddenStrike => "hidden_strike",
            Self::Helped => "helped",
            Self::Exposed => "exposed",
            Self::Dodging => "dodging",
            Self::Disengaged => "disengaged",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "concealed" => Some(Self::Concealed),
            "cover" => Some(Self::Cover),
            "high_ground" => Some(Self::HighGround),
            "hidden_strike" => Some(Self::HiddenStrike),
            "helped" => Some(Self::Helped),
            "exposed" => Some(Self::Exposed),
            "dodging" => Some(Self::Dodging),
            "disengaged" => Some(Self::Disengaged),
            _ => None,
        }
    }
}

/// Tag set keyed by id with remaining rounds. Ordered for determinism.
pub type TacticalTags = BTreeMap<TagId, u32>;

/// Advantage state after combining every modifier source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advantage {
    Advantage,
    Disadvantage,
}

/// Combine a prior advantage state with an integer delta.
///
/// Positive deltas pull toward advantage, negative toward disadvantage;
/// the result collapses to a single net state.
pub fn combine_advantage(base: Option<Advantage>, delta: i32) -> Option<Advantage> {
    let mut score = match base {
        Some(Advantage::Advantage) => 1,
        Some(Advantage::Disadvantage) => -1,
        None => 0,
    };
    score += delta;
    if score > 0 {
        Some(Advantage::Advantage)
    } else if score < 0 {
        Some(Advantage::Disadvantage)
    } else {
        None
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_advantage_collapses_to_net_state() {
        assert_eq!(combine_advantage(None, 0), None);
        assert_eq!(combine_advantage(None, 2), Some(Advantage::Advantage));
        assert_eq!(combine_advantage(None, -1), Some(Advantage::Disadvantage));
        assert_eq!(combine_advantage(Some(Advantage::Advantage), -1), None);
        assert_eq!(
            combine_advantage(Some(Advantage::Disadvantage), -2),
            Some(Advantage::Disadvantage)
        );
    }

    #[test]
    fn status_serde_uses_snake_case() {
        let encoded = serde_json::to_string(&StatusId::Unconscious).unwrap();
        assert_eq!(encoded, "\"unconscious\"");
    }

    #[test]
    fn status_parse_accepts_both_paralysed_spellings() {
        assert_eq!(StatusId::parse("paralysed"), Some(StatusId::Paralysed));
        assert_eq!(StatusId::parse("paralyzed"), Some(StatusId::Paralysed));
        assert_eq!(StatusId::parse("not_a_status"), None);
    }

    #[test]
    fn tag_serde_uses_snake_case() {
        let encoded = serde_json::to_string(&TagId::HiddenStrike).unwrap();
        assert_eq!(encoded, "\"hidden_strike\"");
        assert_eq!(TagId::parse("high_ground"), Some(TagId::HighGround));
    }
}
