//! Factions and per-character reputation ledgers

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Faction {
    /// Stable slug identifier, e.g. `wardens`.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub alignment: String,
    #[serde(default)]
    pub influence: u32,
    /// Reputation keyed by `character:<id>`.
    #[serde(default)]
    pub reputation: BTreeMap<String, i32>,
}

impl Faction {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            alignment: String::new(),
            influence: 0,
            reputation: BTreeMap::new(),
        }
    }

    pub fn reputation_key(character_id: i64) -> String {
        format!("character:{character_id}")
    }

    pub fn reputation_for(&self, character_id: i64) -> i32 {
        self.reputation
            .get(&Self::reputation_key(character_id))
            .copied()
            .unwrap_or(0)
    }

    /// Apply a delta and return `(score_before, score_after)`.
    pub fn adjust_reputation(&mut self, target: &str, delta: i32) -> (i32, i32) {
        let entry = self.reputation.entry(target.to_string()).or_insert(0);
        let before = *entry;
        *entry += delta;
        (before, *entry)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjust_reputation_reports_before_and_after() {
        let mut faction = Faction::new("wardens", "The Wardens");
        let (before, after) = faction.adjust_reputation(&Faction::reputation_key(21), 3);
        assert_eq!((before, after), (0, 3));
        let (before, after) = faction.adjust_reputation(&Faction::reputation_key(21), -5);
        assert_eq!((before, after), (3, -2));
        assert_eq!(faction.reputation_for(21), -2);
    }
}
