//! Class and race features plus the trigger-effect registry

use serde::{Deserialize, Serialize};

use super::status::StatusId;

/// When a feature fires during combat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKey {
    OnInitiative,
    OnAttackRoll,
    OnAttackHit,
    OnCrit,
    OnTurnStart,
}

impl TriggerKey {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "on_initiative" => Some(Self::OnInitiative),
            "on_attack_roll" => Some(Self::OnAttackRoll),
            "on_attack_hit" => Some(Self::OnAttackHit),
            "on_crit" => Some(Self::OnCrit),
            "on_turn_start" => Some(Self::OnTurnStart),
            _ => None,
        }
    }
}

/// What a feature does when its trigger fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    InitiativeBonus,
    AttackBonus,
    BonusDamage,
    ApplyStatus,
    ApplyTacticalTag,
}

impl EffectKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "initiative_bonus" => Some(Self::InitiativeBonus),
            "attack_bonus" => Some(Self::AttackBonus),
            "bonus_damage" => Some(Self::BonusDamage),
            "apply_status" => Some(Self::ApplyStatus),
            "apply_tactical_tag" => Some(Self::ApplyTacticalTag),
            _ => None,
        }
    }
}

/// A feature row as persisted by the feature repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub trigger_key: TriggerKey,
    pub effect_kind: EffectKind,
    pub effect_value: i32,
    #[serde(default)]
    pub source: String,
    /// Status payload for `ApplyStatus` effects.
    #[serde(default)]
    pub status_id: Option<StatusId>,
    #[serde(default)]
    pub status_rounds: u32,
    #[serde(default)]
    pub status_target_self: bool,
}

/// A status application requested by a feature outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionEffect {
    pub status_id: StatusId,
    pub rounds: u32,
    pub potency: u32,
    /// `true` targets the feature's owner, otherwise the opposing actor.
    pub target_self: bool,
}

/// The numeric outcome of resolving one trigger across a feature set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureOutcome {
    pub initiative_bonus: i32,
    pub attack_bonus: i32,
    pub bonus_damage: i32,
    pub condition_effects: Vec<ConditionEffect>,
}

/// Context handed to the registry when a trigger fires.
#[derive(Debug, Clone, Copy)]
pub struct FeatureEffectContext {
    pub trigger_key: TriggerKey,
    pub round_number: u32,
    pub is_crit: bool,
}

/// Maps `(trigger_key, effect_kind)` onto outcome contributions.
///
/// A pure function over the feature row and the firing context; the combat
/// resolver folds outcomes across every feature the actor owns.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureEffectRegistry;

impl FeatureEffectRegistry {
    pub fn apply(&self, feature: &Feature, context: FeatureEffectContext) -> FeatureOutcome {
        let mut outcome = FeatureOutcome::default();
        if feature.trigger_key != context.trigger_key {
            return outcome;
        }
        match feature.effect_kind {
            EffectKind::InitiativeBonus => outcome.initiative_bonus = feature.effect_value,
            EffectKind::AttackBonus => outcome.attack_bonus = feature.effect_value,
            EffectKind::BonusDamage => {
                // Crit-scoped bonus damage doubles on a crit.
                outcome.bonus_damage = if context.is_crit && feature.trigger_key == TriggerKey::OnAttackHit {
                    feature.effect_value * 2
                } else {
                    feature.effect_value
                };
            }
            EffectKind::ApplyStatus => {
                if let Some(status_id) = feature.status_id {
                    outcome.condition_effects.push(ConditionEffect {
                        status_id,
                        rounds: feature.status_rounds.max(1),
                        potency: feature.effect_value.max(1) as u32,
                        target_self: feature.status_target_self,
                    });
                }
            }
            EffectKind::ApplyTacticalTag => {}
        }
        outcome
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(trigger: TriggerKey, kind: EffectKind, value: i32) -> Feature {
        Feature {
            id: 1,
            slug: "test_feature".to_string(),
            name: "Test Feature".to_string(),
            trigger_key: trigger,
            effect_kind: kind,
            effect_value: value,
            source: "class".to_string(),
            status_id: None,
            status_rounds: 0,
            status_target_self: false,
        }
    }

    #[test]
    fn registry_ignores_mismatched_triggers() {
        let registry = FeatureEffectRegistry;
        let row = feature(TriggerKey::OnInitiative, EffectKind::InitiativeBonus, 2);
        let outcome = registry.apply(
            &row,
            FeatureEffectContext {
                trigger_key: TriggerKey::OnAttackHit,
                round_number: 1,
                is_crit: false,
            },
        );
        assert_eq!(outcome, FeatureOutcome::default());
    }

    #[test]
    fn bonus_damage_doubles_on_crit() {
        let registry = FeatureEffectRegistry;
        let row = feature(TriggerKey::OnAttackHit, EffectKind::BonusDamage, 3);
        let context = FeatureEffectContext {
            trigger_key: TriggerKey::OnAttackHit,
            round_number: 2,
            is_crit: true,
        };
        assert_eq!(registry.apply(&row, context).bonus_damage, 6);
    }

    #[test]
    fn apply_status_carries_payload() {
        let registry = FeatureEffectRegistry;
        let mut row = feature(TriggerKey::OnAttackHit, EffectKind::ApplyStatus, 1);
        row.status_id = Some(StatusId::Burning);
        row.status_rounds = 2;

        let outcome = registry.apply(
            &row,
            FeatureEffectContext {
                trigger_key: TriggerKey::OnAttackHit,
                round_number: 1,
                is_crit: false,
            },
        );
        assert_eq!(outcome.condition_effects.len(), 1);
        assert_eq!(outcome.condition_effects[0].status_id, StatusId::Burning);
        assert_eq!(outcome.condition_effects[0].rounds, 2);
    }
}
