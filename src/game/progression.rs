//! Character progression - XP, level-ups, growth choices, point buy

use serde::Serialize;

use super::character::{Character, ProgressionRecord};
use super::errors::{GameError, GameResult};
use crate::data::balance::{xp_required_for_level, LEVEL_CAP};

/// Growth options offered at each level-up.
pub const GROWTH_CHOICES: [&str; 3] = ["hp", "attack", "spell"];

/// A pending level-up waiting on the player's growth choice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelUpPendingView {
    pub current_level: u32,
    pub next_level: u32,
    pub xp_current: u64,
    pub xp_required: u64,
    pub growth_choices: Vec<String>,
}

/// Drives XP grants and level-up bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressionService;

impl ProgressionService {
    /// Grant XP and bank any level-ups crossed. Each banked level must be
    /// individually acknowledged through a growth choice. Returns messages.
    pub fn grant_xp(&self, character: &mut Character, amount: u64) -> Vec<String> {
        character.xp += amount;
        self.apply_level_progression(character)
    }

    /// Promote the character through every threshold the current XP clears.
    /// The level rises immediately; the growth commit stays pending.
    pub fn apply_level_progression(&self, character: &mut Character) -> Vec<String> {
        let mut messages = Vec::new();
        while character.level < LEVEL_CAP
            && character.xp >= xp_required_for_level(character.level + 1)
        {
            character.level += 1;
            character.flags.pending_growth_choices += 1;
            let level = character.level;
            messages.push(format!(
                "Level up! You are now level {level}. Choose your growth when ready."
            ));
        }
        if !messages.is_empty() {
            character.flags.progression_messages.extend(messages.clone());
        }
        messages
    }

    /// The pending level-up, if a growth choice is owed.
    pub fn level_up_pending(&self, character: &Character) -> Option<LevelUpPendingView> {
        if character.flags.pending_growth_choices == 0 {
            return None;
        }
        let acknowledged =
            character.level - character.flags.pending_growth_choices.min(character.level - 1);
        Some(LevelUpPendingView {
            current_level: acknowledged,
            next_level: acknowledged + 1,
            xp_current: character.xp,
            xp_required: xp_required_for_level((acknowledged + 1).min(LEVEL_CAP)),
            growth_choices: GROWTH_CHOICES.iter().map(|name| name.to_string()).collect(),
        })
    }

    /// Commit one growth choice. Returns the unlock key recorded for audit.
    pub fn commit_growth_choice(
        &self,
        character: &mut Character,
        choice: &str,
        option: Option<&str>,
        world_turn: u64,
    ) -> GameResult<(String, Vec<String>)> {
        if character.flags.pending_growth_choices == 0 {
            return Err(GameError::InvalidInput("no level-up is pending".to_string()));
        }
        let normalized = choice.trim().to_ascii_lowercase();
        if !GROWTH_CHOICES.contains(&normalized.as_str()) {
            return Err(GameError::InvalidInput(format!(
                "unknown growth choice '{choice}'"
            )));
        }

        let mut messages = Vec::new();
        match normalized.as_str() {
            "hp" => {
                let gain = 5 + character.attributes.constitution_mod().max(1);
                character.hp_max += gain;
                character.hp_current += gain;
                messages.push(format!("Vitality surges: +{gain} max HP."));
            }
            "attack" => {
                character.attack_bonus += 1;
                messages.push("Your strikes sharpen: +1 attack bonus.".to_string());
            }
            _ => {
                character.spell_slots_max += 1;
                character.spell_slots_current += 1;
                messages.push("Arcane reserves deepen: +1 spell slot.".to_string());
            }
        }

        character.flags.pending_growth_choices -= 1;
        character.flags.progression_history.push(ProgressionRecord {
            level: character.level - character.flags.pending_growth_choices,
            choice: normalized.clone(),
            option: option.map(str::to_string),
            turn: world_turn,
        });
        character.normalize_vitals();

        let unlock_key = match option {
            Some(option) => format!("{normalized}:{option}"),
            None => normalized,
        };
        Ok((unlock_key, messages))
    }

    /// Drain queued progression messages for display.
    pub fn pop_progression_messages(&self, character: &mut Character) -> Vec<String> {
        std::mem::take(&mut character.flags.progression_messages)
    }
}

// ---------------------------------------------------------------------------
// Point buy
// ---------------------------------------------------------------------------

/// Total points available during ability score purchase.
pub const POINT_BUY_BUDGET: u32 = 27;

/// Cost of a single score under point buy.
pub fn point_buy_cost(score: i32) -> GameResult<u32> {
    match score {
        8 => Ok(0),
        9 => Ok(1),
        10 => Ok(2),
        11 => Ok(3),
        12 => Ok(4),
        13 => Ok(5),
        14 => Ok(7),
        15 => Ok(9),
        _ => Err(GameError::InvalidInput(format!(
            "score {score} is outside the 8-15 point-buy range"
        ))),
    }
}

/// Validate a full six-score spread; returns the total cost.
pub fn validate_point_buy(scores: &[i32; 6]) -> GameResult<u32> {
    let mut total = 0;
    for score in scores {
        total += point_buy_cost(*score)?;
    }
    if total > POINT_BUY_BUDGET {
        return Err(GameError::InvalidInput(format!(
            "point-buy total {total} exceeds budget {POINT_BUY_BUDGET}"
        )));
    }
    Ok(total)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn character() -> Character {
        let mut character = Character::new(1, "Vale");
        character.hp_max = 10;
        character.hp_current = 10;
        character
    }

    #[test]
    fn xp_threshold_banks_a_level() {
        let service = ProgressionService;
        let mut hero = character();
        let messages = service.grant_xp(&mut hero, 99);
        assert!(messages.is_empty());
        assert_eq!(hero.level, 1);

        let messages = service.grant_xp(&mut hero, 1);
        assert_eq!(messages.len(), 1);
        assert_eq!(hero.level, 2);
        assert_eq!(hero.flags.pending_growth_choices, 1);
    }

    #[test]
    fn stacked_level_ups_need_individual_acknowledgement() {
        let service = ProgressionService;
        let mut hero = character();
        service.grant_xp(&mut hero, 300);
        assert_eq!(hero.level, 3);
        assert_eq!(hero.flags.pending_growth_choices, 2);

        let (_, _) = service
            .commit_growth_choice(&mut hero, "hp", None, 4)
            .unwrap();
        assert_eq!(hero.flags.pending_growth_choices, 1);
        let (_, _) = service
            .commit_growth_choice(&mut hero, "attack", None, 4)
            .unwrap();
        assert_eq!(hero.flags.pending_growth_choices, 0);
        assert!(service.level_up_pending(&hero).is_none());
        assert_eq!(hero.flags.progression_history.len(), 2);
    }

    #[test]
    fn level_cap_blocks_further_levels() {
        let service = ProgressionService;
        let mut hero = character();
        hero.level = LEVEL_CAP;
        hero.xp = xp_required_for_level(LEVEL_CAP);
        let messages = service.apply_level_progression(&mut hero);
        assert!(messages.is_empty());
        assert_eq!(hero.level, LEVEL_CAP);
    }

    #[test]
    fn growth_choice_requires_pending_level() {
        let service = ProgressionService;
        let mut hero = character();
        assert!(service.commit_growth_choice(&mut hero, "hp", None, 1).is_err());
    }

    #[test]
    fn hp_growth_scales_with_constitution() {
        let service = ProgressionService;
        let mut hero = character();
        hero.attributes.constitution = 16;
        service.grant_xp(&mut hero, 100);
        let (_, messages) = service.commit_growth_choice(&mut hero, "hp", None, 2).unwrap();
        assert!(messages[0].contains("+8 max HP"));
        assert_eq!(hero.hp_max, 18);
    }

    #[test]
    fn point_buy_costs_match_table() {
        assert_eq!(point_buy_cost(15).unwrap(), 9);
        assert_eq!(point_buy_cost(8).unwrap(), 0);
        assert!(point_buy_cost(16).is_err());

        assert_eq!(validate_point_buy(&[15, 14, 13, 10, 8, 8]).unwrap(), 23);
        assert!(validate_point_buy(&[15, 15, 15, 8, 8, 8]).is_err());
    }
}
