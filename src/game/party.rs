//! Party combat - the initiative-queue extension of the single fight loop
//!
//! All actors share one initiative queue. Melee attacks are funnelled into
//! the enemy vanguard lane while it stands, flanking rewards coordinated
//! engagement, and companion AI covers allies the player does not steer.

use rand::Rng;
use std::collections::{HashMap, HashSet};

use super::character::Character;
use super::combat::{
    ChooseAction, CombatLogEntry, CombatService, EnemyAction, Lane, PlayerAction, Verbosity,
};
use super::entity::Entity;
use super::scene::{
    is_dense_cover_terrain, is_swamp_terrain, is_treacherous_ground, terrain_supports_hiding,
    HazardState, RangeBand, Scene, Surprise,
};
use super::spell::{is_healing_spell, slugify_spell_name};
use super::status::{combine_advantage, Advantage, StatusId, TagId};

/// Which side a chosen target sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSide {
    Ally,
    Enemy,
}

/// Targeting decision from the UI callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetChoice {
    /// Index into the candidate pool handed to the callback.
    Pool(usize),
    /// Explicit `(side, index)` into the living ally/enemy lists.
    Side(TargetSide, usize),
}

/// Callback picking a target for the player actor.
pub type ChooseTarget<'a> =
    dyn FnMut(&Character, &[Character], &[Entity], u32, &Scene, &PlayerAction) -> Option<TargetChoice> + 'a;

/// Callback steering companion allies.
pub type EvaluateAllyAction<'a> =
    dyn FnMut(&Character, &[Character], &[Entity], u32, &Scene) -> PlayerAction + 'a;

/// Result of a party combat.
#[derive(Debug, Clone)]
pub struct PartyCombatResult {
    pub allies: Vec<Character>,
    pub enemies: Vec<Entity>,
    pub log: Vec<CombatLogEntry>,
    pub allies_won: bool,
    pub fled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Ally,
    Enemy,
}

impl CombatService {
    /// Built-in companion AI: heal a critical ally when possible, else attack.
    pub fn evaluate_ally_action(
        &self,
        actor: &Character,
        allies: &[Character],
        enemies: &[Entity],
    ) -> PlayerAction {
        let living_allies: Vec<&Character> = allies.iter().filter(|row| row.hp_current > 0).collect();
        let living_enemies = enemies.iter().filter(|row| row.hp_current > 0).count();
        if living_allies.is_empty() || living_enemies == 0 {
            return PlayerAction::Attack;
        }

        let healing_slug = actor
            .known_spells
            .iter()
            .map(|name| slugify_spell_name(name))
            .find(|slug| is_healing_spell(slug));
        if let Some(slug) = healing_slug {
            if actor.spell_slots_current > 0 {
                let critical = living_allies
                    .iter()
                    .min_by_key(|row| row.hp_current)
                    .filter(|row| row.hp_current <= (row.hp_max / 4).max(1));
                if critical.is_some() {
                    return PlayerAction::CastSpell(Some(slug));
                }
            }
        }
        PlayerAction::Attack
    }

    /// Built-in enemy morale: flee when critically hurt and outnumbered.
    fn evaluate_enemy_action(&self, actor: &Entity, allies_alive: usize, enemies_alive: usize) -> EnemyAction {
        let hp_max = actor.hp_max.max(1);
        if actor.hp_current <= (hp_max / 4).max(1) && enemies_alive < allies_alive {
            return EnemyAction::Flee;
        }
        EnemyAction::Attack
    }

    /// Melee attacks must go through the living vanguard while it stands.
    fn target_pool_indices(&self, attacker_is_melee: bool, action: &PlayerAction, enemies: &[Entity]) -> Vec<usize> {
        let living: Vec<usize> = enemies
            .iter()
            .enumerate()
            .filter(|(_, row)| row.hp_current > 0)
            .map(|(index, _)| index)
            .collect();
        if !matches!(action, PlayerAction::Attack) || !attacker_is_melee {
            return living;
        }
        let vanguard: Vec<usize> = living
            .iter()
            .copied()
            .filter(|index| self.combat_lane_entity(&enemies[*index]) == Lane::Vanguard)
            .collect();
        if vanguard.is_empty() {
            living
        } else {
            vanguard
        }
    }

    fn lowest_hp_enemy(&self, pool: &[usize], enemies: &[Entity]) -> usize {
        pool.iter()
            .copied()
            .min_by(|a, b| {
                let left = &enemies[*a];
                let right = &enemies[*b];
                left.hp_current
                    .cmp(&right.hp_current)
                    .then(left.hp_max.cmp(&right.hp_max))
                    .then(left.name.to_ascii_lowercase().cmp(&right.name.to_ascii_lowercase()))
            })
            .unwrap_or(0)
    }

    fn lowest_hp_ally(&self, allies: &[Character]) -> usize {
        allies
            .iter()
            .enumerate()
            .filter(|(_, row)| row.hp_current > 0)
            .min_by(|(_, a), (_, b)| {
                a.hp_current
                    .cmp(&b.hp_current)
                    .then(a.hp_max.cmp(&b.hp_max))
                    .then(a.name.to_ascii_lowercase().cmp(&b.name.to_ascii_lowercase()))
            })
            .map(|(index, _)| index)
            .unwrap_or(0)
    }

    /// Resolve a spell cast inside party combat onto an ally or enemy.
    #[allow(clippy::too_many_arguments)]
    fn resolve_party_spell(
        &mut self,
        caster_index: usize,
        allies: &mut [Character],
        enemies: &mut [Entity],
        target: (Side, usize),
        spell_slug: Option<&str>,
        terrain: &str,
        weather: &str,
        log: &mut Vec<CombatLogEntry>,
    ) {
        let derived = self.derive_player_stats(&allies[caster_index]);
        let spell_mod = derived.spell_mod;
        let prof = derived.proficiency;
        let caster_name = allies[caster_index].name.clone();
        let caster_id = allies[caster_index].id;

        let fallback = allies[caster_index]
            .known_spells
            .first()
            .map(|name| slugify_spell_name(name));
        let Some(slug) = spell_slug.map(str::to_string).or(fallback) else {
            self.log(log, format!("{caster_name} has no spells to cast."), Verbosity::Compact);
            return;
        };
        let Some(definition) = super::spell::spell_definition(&slug) else {
            self.log(log, format!("{slug} is not implemented in combat yet."), Verbosity::Compact);
            return;
        };

        if self.spell_level(&slug) > 0 {
            if allies[caster_index].spell_slots_current == 0 {
                self.log(log, format!("{caster_name} has no spell slots remaining."), Verbosity::Compact);
                return;
            }
            allies[caster_index].spell_slots_current -= 1;
            self.log(log, format!("{caster_name} expends a spell slot."), Verbosity::Compact);
        }

        let attack_shift = self.terrain_ranged_attack_shift(terrain, false) + self.weather_attack_shift(weather, false);
        let attack_advantage = self.weather_attack_advantage(weather, false);
        let spell_dc = 8 + prof + spell_mod;
        let dice = if definition.damage_dice.is_empty() {
            "1d6"
        } else {
            definition.damage_dice
        };

        match definition.resolution {
            super::spell::SpellResolution::SpellAttack => {
                if attack_shift != 0 {
                    self.log(
                        log,
                        format!("Dense cover disrupts spell trajectory ({attack_shift} to hit)."),
                        Verbosity::Compact,
                    );
                }
                let (target_name, target_ac) = match target {
                    (Side::Enemy, index) => (enemies[index].name.clone(), enemies[index].armour_class),
                    (Side::Ally, index) => (allies[index].name.clone(), allies[index].armour_class),
                };
                let (hit, is_crit, _, _) = self.attack_roll(
                    attack_shift,
                    prof,
                    spell_mod,
                    target_ac,
                    attack_advantage,
                    log,
                    &caster_name,
                    &target_name,
                );
                if !hit {
                    self.log(log, format!("{caster_name}'s spell misses."), Verbosity::Compact);
                    return;
                }
                let mut damage = super::dice::roll_dice_expr(dice, spell_mod, &mut self.rng);
                if is_crit {
                    damage += super::dice::roll_dice_expr(dice, 0, &mut self.rng);
                }
                self.apply_party_spell_damage(
                    caster_name.as_str(),
                    caster_id,
                    allies,
                    enemies,
                    target,
                    damage,
                    definition.damage_type,
                    log,
                );
            }
            super::spell::SpellResolution::Save => {
                let save_roll = self.rng.gen_range(1..=20);
                let target_name = match target {
                    (Side::Enemy, index) => enemies[index].name.clone(),
                    (Side::Ally, index) => allies[index].name.clone(),
                };
                self.log(
                    log,
                    format!("{target_name} attempts a save: {save_roll} vs DC {spell_dc}."),
                    Verbosity::Debug,
                );
                if save_roll >= spell_dc {
                    self.log(log, format!("{target_name} resists the spell."), Verbosity::Compact);
                    return;
                }
                let damage = super::dice::roll_dice_expr(dice, spell_mod, &mut self.rng);
                self.apply_party_spell_damage(
                    caster_name.as_str(),
                    caster_id,
                    allies,
                    enemies,
                    target,
                    damage,
                    definition.damage_type,
                    log,
                );
            }
            super::spell::SpellResolution::Auto => {
                if definition.slug == "shield" {
                    allies[caster_index].flags.temp_ac_bonus = 5;
                    allies[caster_index].flags.shield_rounds = 1;
                    self.log(
                        log,
                        format!("A shimmering barrier grants {caster_name} +5 AC until next turn."),
                        Verbosity::Compact,
                    );
                    return;
                }
                let dice = if definition.damage_dice.is_empty() {
                    "1d4"
                } else {
                    definition.damage_dice
                };
                let amount = super::dice::roll_dice_expr(dice, spell_mod, &mut self.rng);
                self.apply_party_spell_damage(
                    caster_name.as_str(),
                    caster_id,
                    allies,
                    enemies,
                    target,
                    amount,
                    definition.damage_type,
                    log,
                );
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_party_spell_damage(
        &mut self,
        caster_name: &str,
        caster_id: i64,
        allies: &mut [Character],
        enemies: &mut [Entity],
        target: (Side, usize),
        amount: i32,
        damage_type: &str,
        log: &mut Vec<CombatLogEntry>,
    ) {
        match target {
            (Side::Ally, index) => {
                let ally = &mut allies[index];
                let name = ally.name.clone();
                if damage_type == "healing" {
                    ally.hp_current = (ally.hp_current + amount).min(ally.hp_max);
                    let hp = ally.hp_current;
                    let hp_max = ally.hp_max;
                    self.log(
                        log,
                        format!("{caster_name} restores {amount} HP to {name} ({hp}/{hp_max})."),
                        Verbosity::Compact,
                    );
                } else {
                    let damage = self.modify_incoming_damage(ally, amount);
                    ally.hp_current = (ally.hp_current - damage).max(0);
                    let hp = ally.hp_current;
                    let hp_max = ally.hp_max;
                    self.log(
                        log,
                        format!("{caster_name}'s spell hits {name} for {damage} {damage_type} ({hp}/{hp_max})."),
                        Verbosity::Compact,
                    );
                }
                self.apply_spell_status_effects(caster_name, caster_id, ally, damage_type, log);
            }
            (Side::Enemy, index) => {
                let enemy = &mut enemies[index];
                let name = enemy.name.clone();
                if damage_type == "healing" {
                    enemy.hp_current = (enemy.hp_current + amount).min(enemy.hp_max);
                } else {
                    let damage = self.modify_incoming_damage(enemy, amount);
                    enemy.hp_current = (enemy.hp_current - damage).max(0);
                    let hp = enemy.hp_current;
                    let hp_max = enemy.hp_max;
                    self.log(
                        log,
                        format!("{caster_name}'s spell hits {name} for {damage} {damage_type} ({hp}/{hp_max})."),
                        Verbosity::Compact,
                    );
                }
                self.apply_spell_status_effects(caster_name, caster_id, enemy, damage_type, log);
            }
        }
    }

    /// Run a full party combat. The first ally is the player actor.
    #[allow(clippy::too_many_arguments)]
    pub fn fight_party_turn_based(
        &mut self,
        allies: &[Character],
        enemies: &[Entity],
        choose_action: &mut ChooseAction,
        scene: &Scene,
        mut choose_target: Option<&mut ChooseTarget>,
        mut evaluate_ally: Option<&mut EvaluateAllyAction>,
    ) -> PartyCombatResult {
        let mut log: Vec<CombatLogEntry> = Vec::new();
        let mut active_allies: Vec<Character> = allies
            .iter()
            .map(|ally| {
                let mut row = ally.clone();
                row.flags.combat_statuses.clear();
                row.flags.combat_tactical_tags.clear();
                row.hp_max = row.hp_max.max(1);
                row.hp_current = row.hp_current.clamp(0, row.hp_max);
                row
            })
            .collect();
        let mut active_enemies: Vec<Entity> = enemies.iter().map(Entity::combat_copy).collect();

        if active_allies.is_empty() || active_enemies.is_empty() {
            let allies_won = !active_allies.is_empty() && active_enemies.is_empty();
            return PartyCombatResult {
                allies: active_allies,
                enemies: active_enemies,
                log,
                allies_won,
                fled: false,
            };
        }

        let terrain = scene.terrain.clone();
        let weather = scene.weather.clone();
        let surprise = scene.surprise;
        let mut distance = scene.distance;
        let player_actor_id = active_allies[0].id;

        // Initiative queue, fixed for the encounter.
        let mut initiative_rows: Vec<(Side, usize, i32)> = Vec::new();
        for (index, ally) in active_allies.iter().enumerate() {
            let mut roll = self.rng.gen_range(1..=20);
            if surprise == Surprise::Player {
                roll = roll.max(self.rng.gen_range(1..=20));
            }
            let mut total = roll + ally.attributes.initiative();
            if is_swamp_terrain(&terrain) && self.is_heavy_armor_user(ally) {
                total -= 100;
            }
            initiative_rows.push((Side::Ally, index, total));
        }
        for (index, enemy) in active_enemies.iter().enumerate() {
            let mut roll = self.rng.gen_range(1..=20);
            if surprise == Surprise::Enemy {
                roll = roll.max(self.rng.gen_range(1..=20));
            }
            initiative_rows.push((Side::Enemy, index, roll + enemy.attack_bonus));
        }
        initiative_rows.sort_by(|a, b| {
            b.2.cmp(&a.2)
                .then_with(|| {
                    let rank = |side: Side| if side == Side::Ally { 0 } else { 1 };
                    rank(a.0).cmp(&rank(b.0))
                })
                .then_with(|| {
                    let name = |row: &(Side, usize, i32)| match row.0 {
                        Side::Ally => active_allies[row.1].name.to_ascii_lowercase(),
                        Side::Enemy => active_enemies[row.1].name.to_ascii_lowercase(),
                    };
                    name(a).cmp(&name(b))
                })
        });
        let ordered: Vec<String> = initiative_rows
            .iter()
            .map(|(side, index, total)| {
                let name = match side {
                    Side::Ally => active_allies[*index].name.clone(),
                    Side::Enemy => active_enemies[*index].name.clone(),
                };
                format!("{name}:{total}")
            })
            .collect();
        self.log(&mut log, format!("Initiative queue: {}.", ordered.join(", ")), Verbosity::Normal);

        let mut round_no: u32 = 1;
        let mut fled = false;
        let mut hazard_state = HazardState::default();

        while active_allies.iter().any(|row| row.hp_current > 0)
            && active_enemies.iter().any(|row| row.hp_current > 0)
        {
            if round_no > super::combat::ROUND_CAP {
                break;
            }
            self.log(&mut log, format!("-- Round {round_no} --"), Verbosity::Debug);
            {
                let mut ally_refs: Vec<&mut Character> = active_allies.iter_mut().collect();
                let mut enemy_refs: Vec<&mut Entity> = active_enemies.iter_mut().collect();
                self.apply_round_lair_action(
                    &mut log,
                    round_no,
                    &terrain,
                    &mut ally_refs,
                    &mut enemy_refs,
                    &scene.hazards,
                    &mut hazard_state,
                );
            }

            // Tracks which actors engaged each target this round (flanking).
            let mut round_engagements: HashMap<i64, HashSet<i64>> = HashMap::new();

            for (side, actor_index, _) in initiative_rows.clone() {
                let allies_alive = active_allies.iter().filter(|row| row.hp_current > 0).count();
                let enemies_alive = active_enemies.iter().filter(|row| row.hp_current > 0).count();
                if allies_alive == 0 || enemies_alive == 0 {
                    break;
                }

                match side {
                    Side::Ally => {
                        if active_allies[actor_index].hp_current <= 0 {
                            continue;
                        }
                        {
                            let mut actor = std::mem::replace(
                                &mut active_allies[actor_index],
                                Character::new(-1, "placeholder"),
                            );
                            self.apply_start_turn_statuses(&mut actor, &mut log);
                            active_allies[actor_index] = actor;
                        }
                        if active_allies[actor_index].hp_current <= 0 {
                            continue;
                        }
                        if self.turn_blocked(&active_allies[actor_index]) {
                            let name = active_allies[actor_index].name.clone();
                            self.log(
                                &mut log,
                                format!("{name} is incapacitated and loses the turn."),
                                Verbosity::Compact,
                            );
                            let mut actor = std::mem::replace(
                                &mut active_allies[actor_index],
                                Character::new(-1, "placeholder"),
                            );
                            self.tick_statuses_end_turn(&mut actor, &mut log);
                            self.tick_tags_end_turn(&mut actor);
                            active_allies[actor_index] = actor;
                            continue;
                        }

                        let is_player_actor = active_allies[actor_index].id == player_actor_id;
                        let mut scene_now = scene.clone();
                        scene_now.distance = distance;

                        let action = if is_player_actor {
                            let options = vec![
                                PlayerAction::Attack,
                                PlayerAction::CastSpell(None),
                                PlayerAction::Dash,
                                PlayerAction::Disengage,
                                PlayerAction::Dodge,
                                PlayerAction::Hide,
                                PlayerAction::Help,
                                PlayerAction::Grapple,
                                PlayerAction::Shove,
                                PlayerAction::UseItem(None),
                                PlayerAction::Flee,
                            ];
                            let preview = self
                                .target_pool_indices(
                                    self.combat_lane_character(&active_allies[actor_index]) == Lane::Vanguard,
                                    &PlayerAction::Attack,
                                    &active_enemies,
                                )
                                .first()
                                .copied()
                                .unwrap_or(0);
                            let preview_enemy = active_enemies[preview].clone();
                            choose_action(
                                &options,
                                &active_allies[actor_index],
                                &preview_enemy,
                                round_no,
                                &scene_now,
                            )
                        } else if let Some(callback) = evaluate_ally.as_mut() {
                            callback(
                                &active_allies[actor_index],
                                &active_allies,
                                &active_enemies,
                                round_no,
                                &scene_now,
                            )
                        } else {
                            self.evaluate_ally_action(&active_allies[actor_index], &active_allies, &active_enemies)
                        };

                        let spell_slug = match &action {
                            PlayerAction::CastSpell(Some(slug)) => Some(slug.clone()),
                            _ => None,
                        };
                        let targets_allies = spell_slug.as_deref().is_some_and(is_healing_spell);

                        // Resolve the target.
                        let target: (Side, usize) = if targets_allies {
                            let default_index = self.lowest_hp_ally(&active_allies);
                            let choice = choose_target
                                .as_mut()
                                .filter(|_| is_player_actor)
                                .and_then(|callback| {
                                    callback(
                                        &active_allies[actor_index],
                                        &active_allies,
                                        &active_enemies,
                                        round_no,
                                        &scene_now,
                                        &action,
                                    )
                                });
                            match choice {
                                Some(TargetChoice::Side(TargetSide::Ally, index)) if index < active_allies.len() => {
                                    (Side::Ally, index)
                                }
                                _ => (Side::Ally, default_index),
                            }
                        } else {
                            let attacker_is_melee =
                                self.combat_lane_character(&active_allies[actor_index]) == Lane::Vanguard;
                            let pool = self.target_pool_indices(attacker_is_melee, &action, &active_enemies);
                            let choice = choose_target
                                .as_mut()
                                .filter(|_| is_player_actor)
                                .and_then(|callback| {
                                    callback(
                                        &active_allies[actor_index],
                                        &active_allies,
                                        &active_enemies,
                                        round_no,
                                        &scene_now,
                                        &action,
                                    )
                                });
                            let index = match choice {
                                Some(TargetChoice::Pool(pool_index)) if pool_index < pool.len() => pool[pool_index],
                                Some(TargetChoice::Side(TargetSide::Enemy, index))
                                    if index < active_enemies.len() && active_enemies[index].hp_current > 0 =>
                                {
                                    index
                                }
                                _ => {
                                    if is_player_actor {
                                        pool.first().copied().unwrap_or(0)
                                    } else {
                                        self.lowest_hp_enemy(&pool, &active_enemies)
                                    }
                                }
                            };
                            (Side::Enemy, index)
                        };

                        distance = self.run_ally_action(
                            actor_index,
                            &mut active_allies,
                            &mut active_enemies,
                            action,
                            target,
                            distance,
                            &terrain,
                            &weather,
                            &mut round_engagements,
                            &mut fled,
                            &mut log,
                        );
                        if fled {
                            break;
                        }
                    }

                    Side::Enemy => {
                        if active_enemies[actor_index].hp_current <= 0 {
                            continue;
                        }
                        {
                            let mut actor = std::mem::replace(
                                &mut active_enemies[actor_index],
                                Entity::new(-1, "placeholder", 1, 1),
                            );
                            self.apply_start_turn_statuses(&mut actor, &mut log);
                            active_enemies[actor_index] = actor;
                        }
                        if active_enemies[actor_index].hp_current <= 0 {
                            continue;
                        }
                        if self.turn_blocked(&active_enemies[actor_index]) {
                            let name = active_enemies[actor_index].name.clone();
                            self.log(
                                &mut log,
                                format!("{name} is incapacitated and loses the turn."),
                                Verbosity::Compact,
                            );
                            let mut actor = std::mem::replace(
                                &mut active_enemies[actor_index],
                                Entity::new(-1, "placeholder", 1, 1),
                            );
                            self.tick_statuses_end_turn(&mut actor, &mut log);
                            self.tick_tags_end_turn(&mut actor);
                            active_enemies[actor_index] = actor;
                            continue;
                        }

                        distance = self.run_enemy_turn(
                            actor_index,
                            &mut active_allies,
                            &mut active_enemies,
                            distance,
                            &terrain,
                            &weather,
                            allies_alive,
                            enemies_alive,
                            &mut log,
                        );
                    }
                }
            }

            if fled {
                break;
            }
            round_no += 1;
        }

        let allies_won = active_allies.iter().any(|row| row.hp_current > 0)
            && !active_enemies.iter().any(|row| row.hp_current > 0);
        if allies_won {
            let xp_gain: u64 = active_enemies
                .iter()
                .filter(|row| row.hp_current <= 0)
                .map(|row| (row.level as u64 * 5).max(1))
                .sum();
            if xp_gain > 0 {
                let lead = &mut active_allies[0];
                lead.xp += xp_gain;
                let name = lead.name.clone();
                self.log(
                    &mut log,
                    format!("Party victory. {name} gains +{xp_gain} XP."),
                    Verbosity::Compact,
                );
            }
        }
        for ally in &mut active_allies {
            ally.flags.combat_statuses.clear();
            ally.flags.combat_tactical_tags.clear();
            ally.flags.temp_ac_bonus = 0;
            ally.flags.shield_rounds = 0;
            ally.normalize_vitals();
        }
        for enemy in &mut active_enemies {
            enemy.combat_statuses.clear();
            enemy.combat_tactical_tags.clear();
        }

        PartyCombatResult {
            allies: active_allies,
            enemies: active_enemies,
            log,
            allies_won,
            fled,
        }
    }

    /// Execute one ally action. Returns the (possibly shifted) range band.
    #[allow(clippy::too_many_arguments)]
    fn run_ally_action(
        &mut self,
        actor_index: usize,
        allies: &mut Vec<Character>,
        enemies: &mut Vec<Entity>,
        action: PlayerAction,
        target: (Side, usize),
        mut distance: RangeBand,
        terrain: &str,
        weather: &str,
        round_engagements: &mut HashMap<i64, HashSet<i64>>,
        fled: &mut bool,
        log: &mut Vec<CombatLogEntry>,
    ) -> RangeBand {
        let actor_name = allies[actor_index].name.clone();

        macro_rules! end_turn {
            () => {{
                let mut actor =
                    std::mem::replace(&mut allies[actor_index], Character::new(-1, "placeholder"));
                self.tick_statuses_end_turn(&mut actor, log);
                self.tick_tags_end_turn(&mut actor);
                allies[actor_index] = actor;
            }};
        }

        match action {
            PlayerAction::Flee => {
                if self.movement_blocked(&allies[actor_index]) {
                    self.log(
                        log,
                        format!("{actor_name} cannot flee while restrained or incapacitated."),
                        Verbosity::Compact,
                    );
                    end_turn!();
                    return distance;
                }
                let initiative = allies[actor_index].attributes.initiative();
                let flee_roll = self.ability_check_roll(&allies[actor_index], initiative, false);
                if flee_roll >= 12 {
                    *fled = true;
                    self.log(
                        log,
                        format!("{actor_name} orders a retreat and escapes."),
                        Verbosity::Compact,
                    );
                    return distance;
                }
                self.log(log, format!("{actor_name} fails to disengage."), Verbosity::Compact);
                end_turn!();
            }

            PlayerAction::CastSpell(payload) => {
                let spell_target = match target {
                    (Side::Ally, index) => (Side::Ally, index),
                    (Side::Enemy, index) => (Side::Enemy, index),
                };
                self.resolve_party_spell(
                    actor_index,
                    allies,
                    enemies,
                    spell_target,
                    payload.as_deref(),
                    terrain,
                    weather,
                    log,
                );
                end_turn!();
            }

            PlayerAction::UseItem(payload) => {
                let mut actor =
                    std::mem::replace(&mut allies[actor_index], Character::new(-1, "placeholder"));
                let _ = self.resolve_use_item(&mut actor, payload.as_deref(), 0, log);
                allies[actor_index] = actor;
                end_turn!();
            }

            PlayerAction::Dash => {
                if let (Side::Enemy, index) = target {
                    if self.has_status_from_source(&allies[actor_index], StatusId::Frightened, enemies[index].id) {
                        self.log(
                            log,
                            format!("{actor_name} cannot move closer while frightened."),
                            Verbosity::Compact,
                        );
                        end_turn!();
                        return distance;
                    }
                }
                if self.movement_blocked(&allies[actor_index]) {
                    self.log(
                        log,
                        format!("{actor_name} cannot reposition while restrained or incapacitated."),
                        Verbosity::Compact,
                    );
                    end_turn!();
                    return distance;
                }
                if is_treacherous_ground(terrain) {
                    let dex_mod = allies[actor_index].attributes.dexterity_mod();
                    let check_total = self.ability_check_roll(&allies[actor_index], dex_mod, true);
                    if check_total < 12 {
                        self.log(
                            log,
                            format!("{actor_name} slips on treacherous ground and loses momentum."),
                            Verbosity::Compact,
                        );
                        end_turn!();
                        return distance;
                    }
                }
                distance = distance.step_toward_engagement();
                if is_treacherous_ground(terrain) {
                    let mut actor =
                        std::mem::replace(&mut allies[actor_index], Character::new(-1, "placeholder"));
                    self.add_tag(&mut actor, TagId::HighGround, 2);
                    allies[actor_index] = actor;
                    self.log(log, format!("{actor_name} secures high ground."), Verbosity::Compact);
                }
                self.log(
                    log,
                    format!("{actor_name} repositions to {}.", distance.label()),
                    Verbosity::Compact,
                );
                end_turn!();
            }

            PlayerAction::Disengage => {
                if self.movement_blocked(&allies[actor_index]) {
                    self.log(
                        log,
                        format!("{actor_name} cannot disengage while restrained or incapacitated."),
                        Verbosity::Compact,
                    );
                    end_turn!();
                    return distance;
                }
                let mut actor = std::mem::replace(&mut allies[actor_index], Character::new(-1, "placeholder"));
                self.add_tag(&mut actor, TagId::Disengaged, 2);
                if is_dense_cover_terrain(terrain) {
                    self.add_tag(&mut actor, TagId::Cover, 2);
                    allies[actor_index] = actor;
                    self.log(log, format!("{actor_name} disengages into cover."), Verbosity::Compact);
                } else {
                    allies[actor_index] = actor;
                    self.log(log, format!("{actor_name} disengages safely."), Verbosity::Compact);
                }
                end_turn!();
            }

            PlayerAction::Hide => {
                if self.movement_blocked(&allies[actor_index]) {
                    self.log(
                        log,
                        format!("{actor_name} cannot hide while restrained or incapacitated."),
                        Verbosity::Compact,
                    );
                    end_turn!();
                    return distance;
                }
                if !terrain_supports_hiding(terrain, distance) {
                    self.log(log, format!("{actor_name} has nowhere to hide."), Verbosity::Compact);
                } else {
                    let dex_mod = allies[actor_index].attributes.dexterity_mod();
                    let stealth_total = self.ability_check_roll(&allies[actor_index], dex_mod, false);
                    let mut actor =
                        std::mem::replace(&mut allies[actor_index], Character::new(-1, "placeholder"));
                    if stealth_total >= 12 {
                        self.add_tag(&mut actor, TagId::Concealed, 2);
                        self.add_tag(&mut actor, TagId::HiddenStrike, 2);
                        allies[actor_index] = actor;
                        self.log(log, format!("{actor_name} vanishes into concealment."), Verbosity::Compact);
                    } else {
                        self.add_tag(&mut actor, TagId::Exposed, 1);
                        allies[actor_index] = actor;
                        self.log(log, format!("{actor_name} fails to hide and is exposed."), Verbosity::Compact);
                    }
                }
                end_turn!();
            }

            PlayerAction::Help => {
                if let (Side::Enemy, index) = target {
                    let target_name = enemies[index].name.clone();
                    self.add_tag(&mut enemies[index], TagId::Exposed, 2);
                    self.log(
                        log,
                        format!("{actor_name} distracts {target_name}, opening their guard."),
                        Verbosity::Compact,
                    );
                }
                end_turn!();
            }

            PlayerAction::Grapple | PlayerAction::Shove => {
                if !distance.is_melee() {
                    let verb = if matches!(action, PlayerAction::Grapple) {
                        "grapple"
                    } else {
                        "shove"
                    };
                    self.log(
                        log,
                        format!("{actor_name} must be engaged to {verb}."),
                        Verbosity::Compact,
                    );
                    end_turn!();
                    return distance;
                }
                if let (Side::Enemy, index) = target {
                    let attacker_mod = self.grapple_mod_character(&allies[actor_index]);
                    let defender_mod = self.grapple_mod_entity(&enemies[index]);
                    let target_name = enemies[index].name.clone();
                    let won =
                        self.resolve_contested_grapple(&allies[actor_index], attacker_mod, &enemies[index], defender_mod);
                    if matches!(action, PlayerAction::Grapple) {
                        if won {
                            let actor_id = allies[actor_index].id;
                            self.apply_status(
                                &mut enemies[index],
                                StatusId::Grappled,
                                2,
                                1,
                                &actor_name,
                                actor_id,
                                log,
                            );
                            self.add_tag(&mut enemies[index], TagId::Exposed, 2);
                            self.log(log, format!("{actor_name} grapples {target_name}."), Verbosity::Compact);
                        } else {
                            self.log(
                                log,
                                format!("{target_name} slips free of {actor_name}'s grapple."),
                                Verbosity::Compact,
                            );
                        }
                    } else if won {
                        if !self.has_status(&enemies[index], StatusId::Prone) {
                            let actor_id = allies[actor_index].id;
                            self.apply_status(&mut enemies[index], StatusId::Prone, 1, 1, &actor_name, actor_id, log);
                            self.log(log, format!("{actor_name} shoves {target_name} prone."), Verbosity::Compact);
                        } else {
                            distance = if distance.is_melee() {
                                RangeBand::Near
                            } else {
                                RangeBand::Far
                            };
                            self.log(
                                log,
                                format!("{actor_name} forces {target_name} back to {}.", distance.label()),
                                Verbosity::Compact,
                            );
                        }
                    } else {
                        self.log(
                            log,
                            format!("{target_name} holds position against the shove."),
                            Verbosity::Compact,
                        );
                    }
                }
                end_turn!();
            }

            PlayerAction::Dodge => {
                if is_treacherous_ground(terrain) {
                    let dex_mod = allies[actor_index].attributes.dexterity_mod();
                    let check_total = self.ability_check_roll(&allies[actor_index], dex_mod, true);
                    if check_total < 12 {
                        self.log(
                            log,
                            format!("{actor_name} stumbles while dodging and loses the turn."),
                            Verbosity::Compact,
                        );
                        end_turn!();
                        return distance;
                    }
                }
                let mut actor = std::mem::replace(&mut allies[actor_index], Character::new(-1, "placeholder"));
                self.add_tag(&mut actor, TagId::Dodging, 2);
                allies[actor_index] = actor;
                self.log(log, format!("{actor_name} braces defensively."), Verbosity::Compact);
                end_turn!();
            }

            PlayerAction::Attack | PlayerAction::RageAttack => {
                let (Side::Enemy, target_index) = target else {
                    end_turn!();
                    return distance;
                };
                let derived = self.derive_player_stats(&allies[actor_index]);
                let attacker_is_melee = self.combat_lane_character(&allies[actor_index]) == Lane::Vanguard;
                if attacker_is_melee && !distance.is_melee() {
                    self.log(
                        log,
                        format!("{actor_name} cannot make a melee attack at {} range.", distance.label()),
                        Verbosity::Compact,
                    );
                    end_turn!();
                    return distance;
                }

                let terrain_shift = self.terrain_ranged_attack_shift(terrain, attacker_is_melee);
                let weather_shift = self.weather_attack_shift(weather, attacker_is_melee);
                let weather_advantage = self.weather_attack_advantage(weather, attacker_is_melee);

                let target_key = enemies[target_index].id;
                let actor_key = allies[actor_index].id;
                let engaged = round_engagements.entry(target_key).or_default();
                let flank_active = engaged.iter().any(|existing| *existing != actor_key);
                engaged.insert(actor_key);
                let target_name = enemies[target_index].name.clone();
                if flank_active {
                    self.log(log, format!("{actor_name} flanks {target_name}."), Verbosity::Compact);
                }
                if terrain_shift != 0 {
                    self.log(
                        log,
                        format!("Dense cover disrupts line of sight ({terrain_shift} to hit)."),
                        Verbosity::Compact,
                    );
                }
                if weather_shift != 0 {
                    self.log(
                        log,
                        format!("Weather pressure ({weather}) applies {weather_shift} to hit."),
                        Verbosity::Compact,
                    );
                }
                if weather_advantage == Some(Advantage::Disadvantage) {
                    self.log(
                        log,
                        format!("Weather pressure ({weather}) imposes disadvantage on ranged attacks."),
                        Verbosity::Compact,
                    );
                }

                let advantage = combine_advantage(
                    combine_advantage(
                        combine_advantage(
                            flank_active.then_some(Advantage::Advantage),
                            self.condition_advantage_delta(&allies[actor_index], &enemies[target_index], distance),
                        ),
                        if weather_advantage == Some(Advantage::Disadvantage) {
                            -1
                        } else {
                            0
                        },
                    ),
                    self.tactical_advantage_delta(&allies[actor_index], &enemies[target_index]),
                );
                // Firing point-blank is awkward for a ranged attacker.
                let advantage = combine_advantage(
                    advantage,
                    if !attacker_is_melee && distance.is_melee() { -1 } else { 0 },
                );

                let status_shift = self.status_attack_roll_shift(&allies[actor_index]);
                let target_ac = enemies[target_index].armour_class;
                let (hit, mut is_crit, _, _) = self.attack_roll(
                    terrain_shift + weather_shift + status_shift,
                    derived.proficiency,
                    derived.weapon_mod,
                    target_ac,
                    advantage,
                    log,
                    &actor_name,
                    &target_name,
                );
                if hit {
                    if distance.is_melee()
                        && (self.has_status(&enemies[target_index], StatusId::Paralysed)
                            || self.has_status(&enemies[target_index], StatusId::Unconscious))
                    {
                        is_crit = true;
                    }
                    let is_rogue = allies[actor_index].class_name.eq_ignore_ascii_case("rogue");
                    let sneak_die = (flank_active && is_rogue).then_some("d6");
                    let mut damage = self.deal_damage(&derived.damage_die, derived.damage_mod, is_crit, sneak_die, 0);
                    if flank_active {
                        damage += 2;
                    }
                    let damage = self.modify_incoming_damage(&enemies[target_index], damage);
                    enemies[target_index].hp_current = (enemies[target_index].hp_current - damage).max(0);
                    let hp = enemies[target_index].hp_current;
                    let hp_max = enemies[target_index].hp_max;
                    self.log(
                        log,
                        format!("{actor_name} hits {target_name} for {damage} damage ({hp}/{hp_max})."),
                        Verbosity::Compact,
                    );
                }
                {
                    let mut actor =
                        std::mem::replace(&mut allies[actor_index], Character::new(-1, "placeholder"));
                    self.consume_tag(&mut actor, TagId::HiddenStrike);
                    self.consume_tag(&mut actor, TagId::Helped);
                    allies[actor_index] = actor;
                }
                self.consume_tag(&mut enemies[target_index], TagId::Exposed);
                end_turn!();
            }
        }
        distance
    }

    /// Execute one enemy turn. Returns the (possibly shifted) range band.
    #[allow(clippy::too_many_arguments)]
    fn run_enemy_turn(
        &mut self,
        actor_index: usize,
        allies: &mut [Character],
        enemies: &mut Vec<Entity>,
        mut distance: RangeBand,
        terrain: &str,
        weather: &str,
        allies_alive: usize,
        enemies_alive: usize,
        log: &mut Vec<CombatLogEntry>,
    ) -> RangeBand {
        let actor_name = enemies[actor_index].name.clone();

        macro_rules! end_turn {
            () => {{
                let mut actor = std::mem::replace(
                    &mut enemies[actor_index],
                    Entity::new(-1, "placeholder", 1, 1),
                );
                self.tick_statuses_end_turn(&mut actor, log);
                self.tick_tags_end_turn(&mut actor);
                enemies[actor_index] = actor;
            }};
        }

        let mut enemy_action = self.evaluate_enemy_action(&enemies[actor_index], allies_alive, enemies_alive);

        // Target: the most wounded reachable ally.
        let living: Vec<usize> = allies
            .iter()
            .enumerate()
            .filter(|(_, row)| row.hp_current > 0)
            .map(|(index, _)| index)
            .collect();
        if living.is_empty() {
            return distance;
        }
        let target_index = living
            .iter()
            .copied()
            .min_by(|a, b| {
                allies[*a]
                    .hp_current
                    .cmp(&allies[*b].hp_current)
                    .then(allies[*a].hp_max.cmp(&allies[*b].hp_max))
                    .then(
                        allies[*a]
                            .name
                            .to_ascii_lowercase()
                            .cmp(&allies[*b].name.to_ascii_lowercase()),
                    )
            })
            .unwrap_or(living[0]);

        let intent = self.intent_for_enemy(&enemies[actor_index]);
        enemy_action = self.select_enemy_tactical_action(
            &intent,
            &enemies[actor_index],
            &allies[target_index],
            terrain,
            distance,
            enemy_action,
        );
        if enemy_action == EnemyAction::Flee {
            enemies[actor_index].hp_current = 0;
            self.log(log, format!("{actor_name} flees."), Verbosity::Compact);
            return distance;
        }

        let enemy_is_melee = self.combat_lane_entity(&enemies[actor_index]) == Lane::Vanguard;
        if enemy_is_melee && !distance.is_melee() {
            let next_band = distance.step_toward_engagement();
            if next_band != distance {
                distance = next_band;
                self.log(
                    log,
                    format!("{actor_name} advances to {} range.", distance.label()),
                    Verbosity::Compact,
                );
            }
            end_turn!();
            return distance;
        }

        match enemy_action {
            EnemyAction::Disengage => {
                if !self.movement_blocked(&enemies[actor_index]) {
                    distance = distance.step_away();
                    self.add_tag(&mut enemies[actor_index], TagId::Disengaged, 2);
                    if is_dense_cover_terrain(terrain) {
                        self.add_tag(&mut enemies[actor_index], TagId::Cover, 2);
                    }
                    self.log(
                        log,
                        format!("{actor_name} disengages to {} range.", distance.label()),
                        Verbosity::Compact,
                    );
                } else {
                    self.log(
                        log,
                        format!("{actor_name} tries to disengage but cannot move."),
                        Verbosity::Compact,
                    );
                }
                end_turn!();
                return distance;
            }
            EnemyAction::Hide => {
                if terrain_supports_hiding(terrain, distance) {
                    self.add_tag(&mut enemies[actor_index], TagId::Concealed, 2);
                    self.add_tag(&mut enemies[actor_index], TagId::HiddenStrike, 2);
                    self.log(log, format!("{actor_name} melts into concealment."), Verbosity::Compact);
                } else {
                    self.log(
                        log,
                        format!("{actor_name} cannot find enough cover to hide."),
                        Verbosity::Compact,
                    );
                }
                end_turn!();
                return distance;
            }
            EnemyAction::Grapple => {
                let attacker_mod = self.grapple_mod_entity(&enemies[actor_index]);
                let defender_mod = self.grapple_mod_character(&allies[target_index]);
                let target_name = allies[target_index].name.clone();
                let won = self.resolve_contested_grapple(
                    &enemies[actor_index],
                    attacker_mod,
                    &allies[target_index],
                    defender_mod,
                );
                if won {
                    let actor_id = enemies[actor_index].id;
                    self.apply_status(
                        &mut allies[target_index],
                        StatusId::Grappled,
                        2,
                        1,
                        &actor_name,
                        actor_id,
                        log,
                    );
                    self.add_tag(&mut allies[target_index], TagId::Exposed, 2);
                    self.log(log, format!("{actor_name} grapples {target_name}."), Verbosity::Compact);
                } else {
                    self.log(
                        log,
                        format!("{actor_name} fails to secure a grapple on {target_name}."),
                        Verbosity::Compact,
                    );
                }
                end_turn!();
                return distance;
            }
            EnemyAction::Shove => {
                let attacker_mod = self.grapple_mod_entity(&enemies[actor_index]);
                let defender_mod = self.grapple_mod_character(&allies[target_index]);
                let target_name = allies[target_index].name.clone();
                let won = self.resolve_contested_grapple(
                    &enemies[actor_index],
                    attacker_mod,
                    &allies[target_index],
                    defender_mod,
                );
                if won {
                    if !self.has_status(&allies[target_index], StatusId::Prone) {
                        let actor_id = enemies[actor_index].id;
                        self.apply_status(
                            &mut allies[target_index],
                            StatusId::Prone,
                            1,
                            1,
                            &actor_name,
                            actor_id,
                            log,
                        );
                        self.log(log, format!("{actor_name} shoves {target_name} prone."), Verbosity::Compact);
                    } else {
                        distance = if distance.is_melee() {
                            RangeBand::Near
                        } else {
                            RangeBand::Far
                        };
                        self.log(
                            log,
                            format!("{actor_name} forces {target_name} back to {}.", distance.label()),
                            Verbosity::Compact,
                        );
                    }
                } else {
                    self.log(
                        log,
                        format!("{target_name} resists {actor_name}'s shove."),
                        Verbosity::Compact,
                    );
                }
                end_turn!();
                return distance;
            }
            EnemyAction::Attack | EnemyAction::Reckless | EnemyAction::Flee => {}
        }

        // Attack resolution against a derived AC.
        let target_ac = {
            let derived = self.derive_player_stats(&allies[target_index]);
            derived.ac
        };
        let terrain_shift = self.terrain_ranged_attack_shift(terrain, enemy_is_melee);
        let weather_shift = self.weather_attack_shift(weather, enemy_is_melee);
        let weather_advantage = self.weather_attack_advantage(weather, enemy_is_melee);
        let advantage = combine_advantage(
            combine_advantage(
                combine_advantage(
                    None,
                    self.condition_advantage_delta(&enemies[actor_index], &allies[target_index], distance),
                ),
                if weather_advantage == Some(Advantage::Disadvantage) {
                    -1
                } else {
                    0
                },
            ),
            self.tactical_advantage_delta(&enemies[actor_index], &allies[target_index]),
        );
        // Firing point-blank is awkward for a ranged attacker.
        let advantage = combine_advantage(
            advantage,
            if !enemy_is_melee && distance.is_melee() { -1 } else { 0 },
        );

        let status_shift = self.status_attack_roll_shift(&enemies[actor_index]);
        let attack_bonus = enemies[actor_index].attack_bonus + terrain_shift + weather_shift + status_shift;
        let target_name = allies[target_index].name.clone();
        let (hit, mut is_crit, _, _) =
            self.attack_roll(attack_bonus, 0, 0, target_ac, advantage, log, &actor_name, &target_name);
        if hit {
            if distance.is_melee()
                && (self.has_status(&allies[target_index], StatusId::Paralysed)
                    || self.has_status(&allies[target_index], StatusId::Unconscious))
            {
                is_crit = true;
            }
            let damage_die = enemies[actor_index].damage_die.clone();
            let damage = self.deal_damage(&damage_die, 0, is_crit, None, 0);
            let damage = self.modify_incoming_damage(&allies[target_index], damage);
            allies[target_index].hp_current = (allies[target_index].hp_current - damage).max(0);
            let hp = allies[target_index].hp_current;
            let hp_max = allies[target_index].hp_max;
            self.log(
                log,
                format!("{actor_name} hits {target_name} for {damage} damage ({hp}/{hp_max})."),
                Verbosity::Compact,
            );
        } else {
            self.log(log, format!("{actor_name} misses {target_name}."), Verbosity::Compact);
        }
        {
            let mut actor =
                std::mem::replace(&mut enemies[actor_index], Entity::new(-1, "placeholder", 1, 1));
            self.consume_tag(&mut actor, TagId::HiddenStrike);
            self.consume_tag(&mut actor, TagId::Helped);
            enemies[actor_index] = actor;
        }
        self.consume_tag(&mut allies[target_index], TagId::Exposed);
        end_turn!();
        distance
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::EntityKind;

    fn fighter(id: i64, name: &str) -> Character {
        let mut character = Character::new(id, name);
        character.class_name = "fighter".to_string();
        character.hp_max = 14;
        character.hp_current = 14;
        character
    }

    fn rogue(id: i64, name: &str) -> Character {
        let mut character = Character::new(id, name);
        character.class_name = "rogue".to_string();
        character.hp_max = 10;
        character.hp_current = 10;
        character.attributes.dexterity = 14;
        character
    }

    fn goblin(id: i64, name: &str) -> Entity {
        let mut enemy = Entity::new(id, name, 1, 7);
        enemy.armour_class = 12;
        enemy.attack_bonus = 2;
        enemy.damage_die = "d6".to_string();
        enemy.kind = EntityKind::Humanoid;
        enemy
    }

    fn service() -> CombatService {
        CombatService::new(None, None)
    }

    fn always_attack() -> impl FnMut(&[PlayerAction], &Character, &Entity, u32, &Scene) -> PlayerAction {
        |_, _, _, _, _| PlayerAction::Attack
    }

    #[test]
    fn party_combat_is_deterministic_per_seed() {
        let allies = vec![fighter(1, "Vale"), rogue(2, "Nia")];
        let enemies = vec![goblin(90, "Goblin"), goblin(91, "Goblin Archer")];
        let scene = Scene::new("close", "open", "none");

        let mut run = |seed: u64| {
            let mut combat = service();
            combat.set_seed(seed);
            let mut choose = always_attack();
            combat.fight_party_turn_based(&allies, &enemies, &mut choose, &scene, None, None)
        };

        let first = run(17);
        let second = run(17);
        let lines_a: Vec<&str> = first.log.iter().map(|row| row.text.as_str()).collect();
        let lines_b: Vec<&str> = second.log.iter().map(|row| row.text.as_str()).collect();
        assert_eq!(lines_a, lines_b);
        assert_eq!(first.allies_won, second.allies_won);
    }

    #[test]
    fn party_combat_terminates_and_cleans_state() {
        let allies = vec![fighter(1, "Vale"), fighter(2, "Bron")];
        let enemies = vec![goblin(90, "Goblin")];
        let scene = Scene::default();
        let mut combat = service();
        combat.set_seed(23);
        let mut choose = always_attack();
        let result = combat.fight_party_turn_based(&allies, &enemies, &mut choose, &scene, None, None);

        assert!(!result.log.is_empty());
        for ally in &result.allies {
            assert!(ally.flags.combat_statuses.is_empty());
            assert!(ally.flags.combat_tactical_tags.is_empty());
            assert!(ally.hp_current >= 0 && ally.hp_current <= ally.hp_max);
        }
    }

    #[test]
    fn victory_awards_xp_to_lead_ally() {
        let mut lead = fighter(1, "Vale");
        lead.attack_bonus = 20;
        lead.attributes.strength = 20;
        let allies = vec![lead, fighter(2, "Bron")];
        let mut weak = goblin(90, "Goblin");
        weak.hp_max = 1;
        weak.hp_current = 1;
        weak.armour_class = 1;
        let enemies = vec![weak];
        let scene = Scene::default();
        let mut combat = service();
        combat.set_seed(5);
        let mut choose = always_attack();
        let result = combat.fight_party_turn_based(&allies, &enemies, &mut choose, &scene, None, None);
        if result.allies_won {
            assert!(result.allies[0].xp >= 5);
            assert_eq!(result.allies[1].xp, 0);
        }
    }

    #[test]
    fn melee_target_pool_prefers_vanguard() {
        let combat = service();
        let mut archer = goblin(1, "Goblin Archer");
        archer.hp_current = 5;
        let brute = goblin(2, "Goblin Brute");
        let enemies = vec![archer, brute];

        let pool = combat.target_pool_indices(true, &PlayerAction::Attack, &enemies);
        assert_eq!(pool, vec![1]);

        // Ranged attackers can reach the backline.
        let pool = combat.target_pool_indices(false, &PlayerAction::Attack, &enemies);
        assert_eq!(pool, vec![0, 1]);
    }

    #[test]
    fn companion_healer_prioritizes_critical_ally() {
        let combat = service();
        let mut healer = fighter(2, "Mira");
        healer.class_name = "cleric".to_string();
        healer.known_spells.push("Cure Wounds".to_string());
        healer.spell_slots_max = 2;
        healer.spell_slots_current = 2;

        let mut wounded = fighter(1, "Vale");
        wounded.hp_current = 2;

        let allies = vec![wounded, healer.clone()];
        let enemies = vec![goblin(90, "Goblin")];
        let action = combat.evaluate_ally_action(&healer, &allies, &enemies);
        assert_eq!(action, PlayerAction::CastSpell(Some("cure_wounds".to_string())));
    }

    #[test]
    fn target_callback_controls_player_targeting() {
        let allies = vec![fighter(1, "Vale")];
        let enemies = vec![goblin(90, "Goblin"), goblin(91, "Gnarl")];
        let scene = Scene::default();
        let mut combat = service();
        combat.set_seed(31);
        let mut choose = always_attack();
        let mut pick_second: Box<ChooseTarget> = Box::new(|_, _, _, _, _, _| {
            Some(TargetChoice::Side(TargetSide::Enemy, 1))
        });
        let result = combat.fight_party_turn_based(
            &allies,
            &enemies,
            &mut choose,
            &scene,
            Some(pick_second.as_mut()),
            None,
        );
        // The second goblin must have taken hits whenever any enemy did.
        let gnarl = result.enemies.iter().find(|row| row.name == "Gnarl").unwrap();
        let goblin_row = result.enemies.iter().find(|row| row.name == "Goblin").unwrap();
        if gnarl.hp_current == gnarl.hp_max {
            assert_eq!(goblin_row.hp_current, goblin_row.hp_max);
        }
    }
}
