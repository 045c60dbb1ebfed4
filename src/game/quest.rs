//! Quest templates and the persisted quest state rows

use serde::{Deserialize, Serialize};

use super::world::QuestStatus;

/// What a quest asks the player to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestObjective {
    /// `kill_any`, `kill_kind`, `travel_days`, `social_success`, ...
    pub kind: String,
    #[serde(default)]
    pub target_key: String,
    pub target_count: u32,
}

/// Authorable quest definition. State lives separately in world flags and
/// the quest-state repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestTemplate {
    pub slug: String,
    pub title: String,
    pub objective: QuestObjective,
    pub reward_xp: u64,
    pub reward_money: i64,
    #[serde(default)]
    pub faction_id: Option<String>,
}

impl QuestTemplate {
    pub fn new(slug: &str, title: &str, objective_kind: &str, target_count: u32) -> Self {
        Self {
            slug: slug.to_string(),
            title: title.to_string(),
            objective: QuestObjective {
                kind: objective_kind.to_string(),
                target_key: String::new(),
                target_count: target_count.max(1),
            },
            reward_xp: 0,
            reward_money: 0,
            faction_id: None,
        }
    }

    pub fn with_rewards(mut self, xp: u64, money: i64) -> Self {
        self.reward_xp = xp;
        self.reward_money = money;
        self
    }

    pub fn with_faction(mut self, faction_id: &str) -> Self {
        self.faction_id = Some(faction_id.to_string());
        self
    }
}

/// The repository-facing quest state snapshot written alongside history rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestState {
    pub template_slug: String,
    pub status: QuestStatus,
    pub progress: u32,
    #[serde(default)]
    pub accepted_turn: Option<u64>,
    #[serde(default)]
    pub completed_turn: Option<u64>,
    #[serde(default)]
    pub seed_key: String,
}

/// Legal transition check; the lifecycle is monotone outside of expiry.
pub fn transition_allowed(from: QuestStatus, to: QuestStatus) -> bool {
    use QuestStatus::*;
    matches!(
        (from, to),
        (Available, Active) | (Active, ReadyToTurnIn) | (ReadyToTurnIn, Completed) | (Active, Failed)
    )
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_is_monotone() {
        use QuestStatus::*;
        assert!(transition_allowed(Available, Active));
        assert!(transition_allowed(Active, ReadyToTurnIn));
        assert!(transition_allowed(ReadyToTurnIn, Completed));
        assert!(transition_allowed(Active, Failed));

        assert!(!transition_allowed(Active, Available));
        assert!(!transition_allowed(Completed, Active));
        assert!(!transition_allowed(Failed, Active));
        assert!(!transition_allowed(ReadyToTurnIn, Failed));
    }

    #[test]
    fn template_builder_clamps_target() {
        let template = QuestTemplate::new("trail_patrol", "Trail Patrol", "kill_any", 0)
            .with_rewards(60, 25)
            .with_faction("wardens");
        assert_eq!(template.objective.target_count, 1);
        assert_eq!(template.faction_id.as_deref(), Some("wardens"));
    }
}
