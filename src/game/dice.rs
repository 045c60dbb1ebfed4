//! Dice rolls and the handful of derived stat formulas everything shares

use rand::rngs::StdRng;
use rand::Rng;

/// Ability modifier from a raw score: `(score - 10) / 2`, floored.
pub fn ability_mod(score: i32) -> i32 {
    (score - 10).div_euclid(2)
}

/// Proficiency bonus by level: +2 at 1-4, +3 at 5-8, and so on.
pub fn proficiency_bonus(level: u32) -> i32 {
    2 + ((level.max(1) as i32) - 1) / 4
}

/// Roll a single die given a spec such as `"d6"` or `"2d8"`.
///
/// Malformed specs fall back to a d4 rather than panicking; combat must
/// never die on a bad content row.
pub fn roll_die(spec: &str, rng: &mut StdRng) -> i32 {
    let trimmed = spec.trim().to_ascii_lowercase();
    let (count, sides) = match trimmed.split_once('d') {
        Some((head, tail)) => {
            let count = if head.is_empty() { 1 } else { head.parse::<u32>().unwrap_or(1) };
            let sides = tail.parse::<u32>().unwrap_or(4).max(1);
            (count.clamp(1, 40), sides)
        }
        None => (1, trimmed.parse::<u32>().unwrap_or(4).max(1)),
    };
    (0..count).map(|_| rng.gen_range(1..=sides as i32)).sum()
}

/// Roll a dice expression such as `"2d6+1"` or `"1d8"` plus an ability mod.
pub fn roll_dice_expr(expr: &str, ability_bonus: i32, rng: &mut StdRng) -> i32 {
    let trimmed = expr.trim().to_ascii_lowercase();
    let (dice_part, flat) = match trimmed.split_once('+') {
        Some((head, tail)) => (head.trim().to_string(), tail.trim().parse::<i32>().unwrap_or(0)),
        None => match trimmed.rsplit_once('-') {
            Some((head, tail)) if head.contains('d') => {
                (head.trim().to_string(), -tail.trim().parse::<i32>().unwrap_or(0))
            }
            _ => (trimmed.clone(), 0),
        },
    };
    let rolled = roll_die(&dice_part, rng);
    (rolled + flat + ability_bonus).max(1)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn ability_mod_matches_table() {
        assert_eq!(ability_mod(10), 0);
        assert_eq!(ability_mod(15), 2);
        assert_eq!(ability_mod(8), -1);
        assert_eq!(ability_mod(20), 5);
    }

    #[test]
    fn proficiency_scales_every_four_levels() {
        assert_eq!(proficiency_bonus(1), 2);
        assert_eq!(proficiency_bonus(4), 2);
        assert_eq!(proficiency_bonus(5), 3);
        assert_eq!(proficiency_bonus(9), 4);
        assert_eq!(proficiency_bonus(20), 6);
    }

    #[test]
    fn roll_die_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let roll = roll_die("d6", &mut rng);
            assert!((1..=6).contains(&roll));
        }
        for _ in 0..100 {
            let roll = roll_die("2d4", &mut rng);
            assert!((2..=8).contains(&roll));
        }
    }

    #[test]
    fn dice_expr_applies_flat_and_ability_bonus() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..50 {
            let roll = roll_dice_expr("1d6+2", 1, &mut rng);
            assert!((4..=9).contains(&roll));
        }
    }

    #[test]
    fn malformed_spec_falls_back_instead_of_panicking() {
        let mut rng = StdRng::seed_from_u64(3);
        let roll = roll_die("garbage", &mut rng);
        assert!((1..=4).contains(&roll));
    }
}
