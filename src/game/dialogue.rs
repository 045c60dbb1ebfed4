//! Dialogue trees - staged NPC conversations with gated choices
//!
//! Content lives in JSON, validated before use. Sessions walk the
//! opening -> probe -> resolve stages on success and reset on failure;
//! choices can carry requirement predicates, skill checks, and effects
//! that push back into the narrative state.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::character::{Character, DialogueSession};
use super::config::GameConfig;
use super::seed::{derive_seed, SeedContext};
use super::world::{SeedStatus, World};

pub const STAGES: [&str; 3] = ["opening", "probe", "resolve"];
pub const SKILL_CHECKS: [&str; 3] = ["persuasion", "intimidation", "deception"];
pub const MANEUVERS: [&str; 3] = ["friendly", "direct", "intimidate"];

/// Number of consecutive maneuvers in a challenge sequence.
pub const CHALLENGE_TARGET: u32 = 3;

// ---------------------------------------------------------------------------
// Content model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantLine {
    pub line: String,
    #[serde(default)]
    pub requires: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillCheckRule {
    pub skill: String,
    pub dc: i32,
    #[serde(default)]
    pub approach: Option<String>,
    #[serde(default)]
    pub success_stage: Option<String>,
    #[serde(default)]
    pub failure_stage: Option<String>,
    #[serde(default)]
    pub success_response: Option<String>,
    #[serde(default)]
    pub failure_response: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectRule {
    pub kind: String,
    #[serde(default = "EffectRule::default_on")]
    pub on: String,
    #[serde(default)]
    pub faction_id: Option<String>,
    #[serde(default)]
    pub delta: Option<i32>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub escalation_stage: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl EffectRule {
    fn default_on() -> String {
        "success".to_string()
    }

    pub fn triggers_on(&self, success: bool) -> bool {
        match self.on.as_str() {
            "always" => true,
            "failure" => !success,
            _ => success,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChoiceRule {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub response_variants: Vec<VariantLine>,
    #[serde(default)]
    pub skill_check: Option<SkillCheckRule>,
    #[serde(default)]
    pub effects: Vec<EffectRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageContent {
    pub line: String,
    #[serde(default)]
    pub variants: Vec<VariantLine>,
    #[serde(default)]
    pub choices: Vec<ChoiceRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DialogueContent {
    #[serde(default = "DialogueContent::default_version")]
    pub version: u32,
    #[serde(default)]
    pub npcs: BTreeMap<String, BTreeMap<String, StageContent>>,
}

impl DialogueContent {
    fn default_version() -> u32 {
        1
    }

    pub fn empty() -> Self {
        Self {
            version: 1,
            npcs: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a raw dialogue payload; an empty error list means accepted.
pub fn validate_dialogue_content(payload: &serde_json::Value) -> Vec<String> {
    let mut errors = Vec::new();

    let Some(root) = payload.as_object() else {
        return vec!["payload must be an object".to_string()];
    };
    let Some(npcs) = root.get("npcs").and_then(|value| value.as_object()) else {
        return vec!["payload.npcs must be an object".to_string()];
    };

    for (npc_id, npc_tree) in npcs {
        let npc_key = npc_id.trim();
        if npc_key.is_empty() {
            errors.push("npc id cannot be empty".to_string());
            continue;
        }
        let Some(stages) = npc_tree.as_object() else {
            errors.push(format!("npcs.{npc_key} must be an object"));
            continue;
        };
        for (stage_id, stage_row) in stages {
            let stage_key = stage_id.trim().to_ascii_lowercase();
            if !STAGES.contains(&stage_key.as_str()) {
                errors.push(format!("npcs.{npc_key}.{stage_id} is not a supported stage"));
                continue;
            }
            let Some(stage) = stage_row.as_object() else {
                errors.push(format!("npcs.{npc_key}.{stage_key} must be an object"));
                continue;
            };
            let line = stage.get("line").and_then(|value| value.as_str()).unwrap_or("");
            if line.trim().is_empty() {
                errors.push(format!("npcs.{npc_key}.{stage_key}.line is required"));
            }
            validate_variants(
                &mut errors,
                &format!("npcs.{npc_key}.{stage_key}.variants"),
                stage.get("variants"),
            );

            let choices = stage.get("choices");
            if let Some(choices) = choices {
                let Some(choice_rows) = choices.as_array() else {
                    errors.push(format!("npcs.{npc_key}.{stage_key}.choices must be a list"));
                    continue;
                };
                for (index, choice) in choice_rows.iter().enumerate() {
                    let prefix = format!("npcs.{npc_key}.{stage_key}.choices[{index}]");
                    let Some(choice) = choice.as_object() else {
                        errors.push(format!("{prefix} must be an object"));
                        continue;
                    };
                    let choice_id = choice.get("id").and_then(|value| value.as_str()).unwrap_or("");
                    let label = choice.get("label").and_then(|value| value.as_str()).unwrap_or("");
                    if choice_id.trim().is_empty() {
                        errors.push(format!("{prefix}.id is required"));
                    }
                    if label.trim().is_empty() {
                        errors.push(format!("{prefix}.label is required"));
                    }
                    if let Some(requires) = choice.get("requires") {
                        if !requires.is_array() {
                            errors.push(format!("{prefix}.requires must be a list"));
                        }
                    }
                    if let Some(response) = choice.get("response") {
                        if !response.is_null() && response.as_str().map_or(true, |text| text.trim().is_empty()) {
                            errors.push(format!(
                                "{prefix}.response must be a non-empty string when provided"
                            ));
                        }
                    }
                    validate_variants(
                        &mut errors,
                        &format!("{prefix}.response_variants"),
                        choice.get("response_variants"),
                    );
                    if let Some(skill_check) = choice.get("skill_check") {
                        if !skill_check.is_null() {
                            validate_skill_check(&mut errors, &prefix, skill_check);
                        }
                    }
                    if let Some(effects) = choice.get("effects") {
                        if !effects.is_null() {
                            validate_effects(&mut errors, &prefix, effects);
                        }
                    }
                }
            }
        }
    }
    errors
}

fn validate_variants(errors: &mut Vec<String>, owner: &str, value: Option<&serde_json::Value>) {
    let Some(value) = value else {
        return;
    };
    if value.is_null() {
        return;
    }
    let Some(rows) = value.as_array() else {
        errors.push(format!("{owner} must be a list"));
        return;
    };
    for (index, variant) in rows.iter().enumerate() {
        let prefix = format!("{owner}[{index}]");
        let Some(variant) = variant.as_object() else {
            errors.push(format!("{prefix} must be an object"));
            continue;
        };
        let line = variant.get("line").and_then(|value| value.as_str()).unwrap_or("");
        if line.trim().is_empty() {
            errors.push(format!("{prefix}.line is required"));
        }
        if let Some(requires) = variant.get("requires") {
            if !requires.is_array() {
                errors.push(format!("{prefix}.requires must be a list"));
            }
        }
    }
}

fn validate_skill_check(errors: &mut Vec<String>, prefix: &str, value: &serde_json::Value) {
    let Some(row) = value.as_object() else {
        errors.push(format!("{prefix}.skill_check must be an object"));
        return;
    };
    let skill = row
        .get("skill")
        .and_then(|value| value.as_str())
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    if !SKILL_CHECKS.contains(&skill.as_str()) {
        errors.push(format!(
            "{prefix}.skill_check.skill must be one of persuasion|intimidation|deception"
        ));
    }
    match row.get("dc").and_then(|value| value.as_i64()) {
        Some(dc) if (5..=25).contains(&dc) => {}
        Some(_) => errors.push(format!("{prefix}.skill_check.dc must be between 5 and 25")),
        None => errors.push(format!("{prefix}.skill_check.dc must be an integer")),
    }
    for key in ["success_stage", "failure_stage"] {
        let stage = row
            .get(key)
            .and_then(|value| value.as_str())
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        if !stage.is_empty() && !STAGES.contains(&stage.as_str()) {
            errors.push(format!(
                "{prefix}.skill_check.{key} must be one of opening|probe|resolve"
            ));
        }
    }
}

fn validate_effects(errors: &mut Vec<String>, prefix: &str, value: &serde_json::Value) {
    let Some(rows) = value.as_array() else {
        errors.push(format!("{prefix}.effects must be a list"));
        return;
    };
    for (index, effect) in rows.iter().enumerate() {
        let effect_prefix = format!("{prefix}.effects[{index}]");
        let Some(effect) = effect.as_object() else {
            errors.push(format!("{effect_prefix} must be an object"));
            continue;
        };
        let kind = effect
            .get("kind")
            .and_then(|value| value.as_str())
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        if kind.is_empty() {
            errors.push(format!("{effect_prefix}.kind is required"));
            continue;
        }
        let trigger = effect
            .get("on")
            .and_then(|value| value.as_str())
            .unwrap_or("success")
            .trim()
            .to_ascii_lowercase();
        if !matches!(trigger.as_str(), "success" | "failure" | "always") {
            errors.push(format!("{effect_prefix}.on must be one of success|failure|always"));
        }
        match kind.as_str() {
            "faction_heat_delta" => {
                let faction_id = effect
                    .get("faction_id")
                    .and_then(|value| value.as_str())
                    .unwrap_or("")
                    .trim()
                    .to_string();
                if faction_id.is_empty() {
                    errors.push(format!("{effect_prefix}.faction_id is required"));
                }
                if effect.get("delta").and_then(|value| value.as_i64()).is_none() {
                    errors.push(format!("{effect_prefix}.delta must be an integer"));
                }
            }
            "narrative_tension_delta" => {
                if effect.get("delta").and_then(|value| value.as_i64()).is_none() {
                    errors.push(format!("{effect_prefix}.delta must be an integer"));
                }
            }
            "story_seed_state" => {
                let status = effect
                    .get("status")
                    .and_then(|value| value.as_str())
                    .unwrap_or("")
                    .trim()
                    .to_ascii_lowercase();
                let escalation = effect
                    .get("escalation_stage")
                    .and_then(|value| value.as_str())
                    .unwrap_or("")
                    .trim()
                    .to_string();
                if status.is_empty() && escalation.is_empty() {
                    errors.push(format!(
                        "{effect_prefix} must include status and/or escalation_stage"
                    ));
                }
                if !status.is_empty()
                    && !matches!(status.as_str(), "active" | "simmering" | "escalated" | "resolved")
                {
                    errors.push(format!(
                        "{effect_prefix}.status must be one of active|simmering|escalated|resolved"
                    ));
                }
            }
            "consequence" => {
                let message = effect
                    .get("message")
                    .and_then(|value| value.as_str())
                    .unwrap_or("")
                    .trim()
                    .to_string();
                if message.is_empty() {
                    errors.push(format!("{effect_prefix}.message is required"));
                }
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Session views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DialogueChoiceView {
    pub choice_id: String,
    pub label: String,
    pub available: bool,
    pub locked_reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DialogueSessionView {
    pub npc_id: String,
    pub npc_name: String,
    pub stage_id: String,
    pub greeting: String,
    pub choices: Vec<DialogueChoiceView>,
    pub challenge_progress: u32,
    pub challenge_target: u32,
}

/// Outcome of picking a choice, before the skill check resolves.
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceResolution {
    pub approach: String,
    pub accepted: bool,
    pub reason: String,
    pub response: String,
    pub effects: Vec<EffectRule>,
    pub skill_check: Option<SkillCheckRule>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct DialogueEngine {
    config: GameConfig,
    content: DialogueContent,
}

impl DialogueEngine {
    pub fn new(config: GameConfig, content: DialogueContent) -> Self {
        Self { config, content }
    }

    pub fn content(&self) -> &DialogueContent {
        &self.content
    }

    fn normalize_choice_id(choice_id: &str) -> String {
        choice_id.trim().to_ascii_lowercase().replace('_', " ")
    }

    pub fn normalize_approach(approach: &str) -> String {
        let token = approach.trim().to_ascii_lowercase();
        match token.as_str() {
            "persuasion" | "persuade" => "persuasion".to_string(),
            "deception" | "deceive" | "lie" => "deception".to_string(),
            "intimidation" | "threaten" => "intimidation".to_string(),
            "apologize" | "apologise" => "make amends".to_string(),
            "flashpoint" => "address flashpoint".to_string(),
            "leverage rumor" => "leverage rumour".to_string(),
            _ => token,
        }
    }

    fn session_row<'a>(character: &'a mut Character, npc_id: &str) -> &'a mut DialogueSession {
        let session = character
            .flags
            .dialogue_state
            .npc_sessions
            .entry(npc_id.to_string())
            .or_default();
        if !STAGES.contains(&session.stage_id.as_str()) {
            session.stage_id = "opening".to_string();
        }
        session
    }

    fn stage_content(&self, npc_id: &str, stage_id: &str) -> Option<&StageContent> {
        self.content.npcs.get(npc_id).and_then(|tree| tree.get(stage_id))
    }

    // ------------------------------------------------------------------
    // Requirement predicates
    // ------------------------------------------------------------------

    fn requirement_satisfied(
        &self,
        world: &World,
        character: &Character,
        character_id: i64,
        npc_id: &str,
        requirement: &str,
    ) -> bool {
        if requirement.is_empty() {
            return true;
        }
        let turn = world.current_turn;
        let tension = world.flags.narrative.tension_level.clamp(0, 100);

        match requirement {
            "flashpoint_present" => !world.flags.narrative.flashpoint_echoes.is_empty(),
            "recent_rebuff" => world.flags.npc_social.has_recent_rebuff(npc_id, turn, 6),
            "recent_rumour" => world.has_recent_rumour(character_id),
            "intel_unlock" => character.has_interaction_unlock("intel_leverage"),
            "has_gold_8" => character.money >= 8,
            "tension_high" => tension >= 60,
            "tension_critical" => tension >= 80,
            "tension_low" => tension <= 25,
            _ => {
                if let Some(rest) = requirement.strip_prefix("faction_heat_") {
                    if let Some(faction_id) = rest.strip_suffix("_high") {
                        if faction_id.is_empty() {
                            return false;
                        }
                        return character.heat_for(faction_id) >= 10;
                    }
                }
                if let Some(faction_id) = requirement.strip_prefix("dominant_faction_") {
                    if faction_id.is_empty() {
                        return false;
                    }
                    return character
                        .dominant_heat_faction()
                        .is_some_and(|(top, score)| top == faction_id && score > 0);
                }
                true
            }
        }
    }

    fn failed_requirements(
        &self,
        world: &World,
        character: &Character,
        character_id: i64,
        npc_id: &str,
        required: &[String],
    ) -> Vec<String> {
        required
            .iter()
            .map(|key| key.trim().to_ascii_lowercase())
            .filter(|key| !self.requirement_satisfied(world, character, character_id, npc_id, key))
            .collect()
    }

    fn requirement_reason(requirement: &str) -> String {
        let token = requirement.trim().to_ascii_lowercase();
        if let Some(rest) = token.strip_prefix("faction_heat_") {
            if let Some(faction) = rest.strip_suffix("_high") {
                let faction = faction.replace('_', " ");
                if !faction.is_empty() {
                    return format!("Requires high heat with {faction}.");
                }
            }
        }
        if let Some(faction) = token.strip_prefix("dominant_faction_") {
            let faction = faction.replace('_', " ");
            if !faction.is_empty() {
                return format!("Requires {faction} as your dominant faction pressure.");
            }
        }
        match token.as_str() {
            "flashpoint_present" => "No active flashpoint context right now.",
            "recent_rebuff" => "Requires a recent social rebuff with this NPC.",
            "recent_rumour" => "Requires recent rumour intelligence.",
            "intel_unlock" => "Requires intel leverage training.",
            "has_gold_8" => "Requires at least 8 gold.",
            "tension_high" => "Requires high civic tension.",
            "tension_critical" => "Requires critical civic tension.",
            "tension_low" => "Only available when civic tension is low.",
            _ => "Unavailable due to unmet requirement.",
        }
        .to_string()
    }

    fn pick_variant_line(
        &self,
        world: &World,
        character: &Character,
        character_id: i64,
        npc_id: &str,
        base_line: &str,
        variants: &[VariantLine],
    ) -> String {
        for variant in variants {
            let failed = self.failed_requirements(world, character, character_id, npc_id, &variant.requires);
            if failed.is_empty() && !variant.line.trim().is_empty() {
                return variant.line.trim().to_string();
            }
        }
        base_line.trim().to_string()
    }

    // ------------------------------------------------------------------
    // Contextual options
    // ------------------------------------------------------------------

    /// Layer contextual approach options over the base interaction.
    pub fn contextualize_interaction(
        &self,
        world: &World,
        character: &Character,
        character_id: i64,
        npc_id: &str,
        greeting: &str,
        approaches: &[String],
    ) -> (String, Vec<String>) {
        let mut greeting = greeting.to_string();
        let mut options: Vec<String> = approaches
            .iter()
            .filter(|row| !row.trim().is_empty())
            .cloned()
            .collect();
        let tension = world.flags.narrative.tension_level;
        let turn = world.current_turn;

        if self.config.dialogue_contextual_options {
            if tension >= 60 {
                greeting = if greeting.is_empty() {
                    "Tension is critical across town.".to_string()
                } else {
                    format!("{greeting} Tension is critical across town.")
                };
                options.push("Urgent Appeal".to_string());
            }
            if !world.flags.narrative.flashpoint_echoes.is_empty() {
                options.push("Address Flashpoint".to_string());
            }
            if world.flags.npc_social.has_recent_rebuff(npc_id, turn, 6) {
                options.push("Make Amends".to_string());
            }
            if character.has_interaction_unlock("intel_leverage") && world.has_recent_rumour(character_id) {
                options.push("Leverage Rumour".to_string());
            }
        }

        let mut deduped = Vec::new();
        let mut seen = Vec::new();
        for option in options {
            let key = option.trim().to_ascii_lowercase();
            if key.is_empty() || seen.contains(&key) {
                continue;
            }
            seen.push(key);
            deduped.push(option);
        }
        (greeting, deduped)
    }

    // ------------------------------------------------------------------
    // Session building
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn build_dialogue_session(
        &self,
        world: &World,
        character: &mut Character,
        character_id: i64,
        npc_id: &str,
        npc_name: &str,
        greeting: &str,
        approaches: &[String],
    ) -> DialogueSessionView {
        let (stage_id, challenge_progress) = {
            let session = Self::session_row(character, npc_id);
            (session.stage_id.clone(), session.challenge_progress)
        };

        let available_ids: Vec<String> = approaches
            .iter()
            .map(|label| Self::normalize_choice_id(label))
            .collect();

        let stage_content = self.stage_content(npc_id, &stage_id);
        let selected_line = stage_content
            .map(|stage| {
                self.pick_variant_line(world, character, character_id, npc_id, &stage.line, &stage.variants)
            })
            .unwrap_or_default();

        let preferred: Vec<String> = match stage_content {
            Some(stage) if !stage.choices.is_empty() => stage
                .choices
                .iter()
                .map(|row| row.label.trim().to_string())
                .filter(|label| !label.is_empty())
                .collect(),
            _ => match stage_id.as_str() {
                "probe" => vec![
                    "Direct",
                    "Friendly",
                    "Intimidate",
                    "Leverage Intel",
                    "Leverage Rumour",
                    "Invoke Faction",
                ],
                "resolve" => vec!["Make Amends", "Address Flashpoint", "Friendly", "Direct", "Intimidate"],
                _ => vec!["Friendly", "Direct", "Intimidate"],
            }
            .into_iter()
            .map(str::to_string)
            .collect(),
        };

        let mut merged: Vec<String> = Vec::new();
        let mut seen: Vec<String> = Vec::new();
        for label in preferred.iter().chain(approaches.iter()) {
            let key = Self::normalize_choice_id(label);
            if key.is_empty() || seen.contains(&key) {
                continue;
            }
            seen.push(key);
            merged.push(label.clone());
        }

        let mut choices = Vec::new();
        for label in merged {
            let key = Self::normalize_choice_id(&label);
            let mut available = available_ids.contains(&key);
            let mut locked_reason = if available {
                String::new()
            } else {
                "Unavailable in current world or relationship state.".to_string()
            };

            let rule = stage_content.and_then(|stage| {
                stage.choices.iter().find(|row| {
                    Self::normalize_choice_id(&row.id) == key || Self::normalize_choice_id(&row.label) == key
                })
            });

            let mut choice_id = key.clone();
            let mut rendered_label = label.clone();
            if let Some(rule) = rule {
                if rule.skill_check.is_some() {
                    available = true;
                    locked_reason.clear();
                }
                let failed =
                    self.failed_requirements(world, character, character_id, npc_id, &rule.requires);
                if let Some(first) = failed.first() {
                    available = false;
                    locked_reason = Self::requirement_reason(first);
                }
                let rule_id = Self::normalize_choice_id(&rule.id);
                if !rule_id.is_empty() {
                    choice_id = rule_id;
                }
                if let Some(check) = &rule.skill_check {
                    let skill = check.skill.trim().to_ascii_lowercase();
                    if SKILL_CHECKS.contains(&skill.as_str()) {
                        let dc = check.dc.clamp(5, 25);
                        let mut skill_title = skill.clone();
                        if let Some(first) = skill_title.get_mut(0..1) {
                            first.make_ascii_uppercase();
                        }
                        rendered_label = format!("{label} [{skill_title} DC {dc}]");
                    }
                }
            }

            choices.push(DialogueChoiceView {
                choice_id,
                label: rendered_label,
                available,
                locked_reason,
            });
        }

        let rendered_greeting = if self.config.dialogue_tree_enabled {
            let prefix = match stage_id.as_str() {
                "probe" => "[Probe]",
                "resolve" => "[Resolve]",
                _ => "[Opening]",
            };
            let line = if selected_line.is_empty() {
                greeting.to_string()
            } else {
                selected_line
            };
            format!("{prefix} {line}").trim().to_string()
        } else {
            greeting.to_string()
        };

        DialogueSessionView {
            npc_id: npc_id.to_string(),
            npc_name: npc_name.to_string(),
            stage_id,
            greeting: rendered_greeting,
            choices,
            challenge_progress,
            challenge_target: CHALLENGE_TARGET,
        }
    }

    // ------------------------------------------------------------------
    // Choice resolution
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn resolve_dialogue_choice(
        &self,
        world: &World,
        character: &mut Character,
        character_id: i64,
        npc_id: &str,
        npc_name: &str,
        greeting: &str,
        approaches: &[String],
        choice_id: &str,
    ) -> ChoiceResolution {
        let session = self.build_dialogue_session(
            world,
            character,
            character_id,
            npc_id,
            npc_name,
            greeting,
            approaches,
        );
        let choice_key = Self::normalize_choice_id(choice_id);
        let Some(selected) = session
            .choices
            .iter()
            .find(|row| Self::normalize_choice_id(&row.choice_id) == choice_key)
        else {
            return ChoiceResolution {
                approach: "direct".to_string(),
                accepted: false,
                reason: "Unknown dialogue choice.".to_string(),
                response: String::new(),
                effects: Vec::new(),
                skill_check: None,
            };
        };
        if !selected.available {
            return ChoiceResolution {
                approach: "direct".to_string(),
                accepted: false,
                reason: if selected.locked_reason.is_empty() {
                    "Choice is locked.".to_string()
                } else {
                    selected.locked_reason.clone()
                },
                response: String::new(),
                effects: Vec::new(),
                skill_check: None,
            };
        }

        let stage_content = self.stage_content(npc_id, &session.stage_id);
        let rule = stage_content.and_then(|stage| {
            stage.choices.iter().find(|row| {
                Self::normalize_choice_id(&row.id) == choice_key
                    || Self::normalize_choice_id(&row.label) == choice_key
            })
        });

        let mut response = String::new();
        let mut effects = Vec::new();
        let mut skill_check = None;
        if let Some(rule) = rule {
            response = self.pick_variant_line(
                world,
                character,
                character_id,
                npc_id,
                rule.response.as_deref().unwrap_or(""),
                &rule.response_variants,
            );
            effects = rule.effects.clone();
            if let Some(check) = &rule.skill_check {
                let skill = check.skill.trim().to_ascii_lowercase();
                if SKILL_CHECKS.contains(&skill.as_str()) {
                    let mut normalized = check.clone();
                    normalized.skill = skill.clone();
                    normalized.dc = check.dc.clamp(5, 25);
                    normalized.approach = Some(Self::normalize_approach(
                        check.approach.as_deref().unwrap_or(&skill),
                    ));
                    skill_check = Some(normalized);
                }
            }
        }

        let approach = match &skill_check {
            Some(check) => check
                .approach
                .clone()
                .unwrap_or_else(|| check.skill.clone()),
            None => Self::normalize_approach(&selected.label_for_approach()),
        };

        ChoiceResolution {
            approach,
            accepted: true,
            reason: String::new(),
            response,
            effects,
            skill_check,
        }
    }

    /// Shift the stage along a skill-check branch. Returns
    /// `(response, stage, note)`.
    pub fn apply_skill_check_branch(
        &self,
        character: &mut Character,
        npc_id: &str,
        success: bool,
        branch: &SkillCheckRule,
    ) -> (String, String, String) {
        if !self.config.dialogue_tree_enabled {
            return (String::new(), String::new(), String::new());
        }
        let response = if success {
            branch.success_response.clone().unwrap_or_default()
        } else {
            branch.failure_response.clone().unwrap_or_default()
        };
        let target_stage = if success {
            branch.success_stage.clone().unwrap_or_default()
        } else {
            branch.failure_stage.clone().unwrap_or_default()
        };
        let target_stage = target_stage.trim().to_ascii_lowercase();
        if STAGES.contains(&target_stage.as_str()) {
            let session = Self::session_row(character, npc_id);
            let prior = session.stage_id.clone();
            session.stage_id = target_stage.clone();
            if target_stage != prior {
                return (
                    response,
                    target_stage.clone(),
                    format!("Dialogue branch shifts from {prior} to {target_stage}."),
                );
            }
        }
        (response, String::new(), String::new())
    }

    // ------------------------------------------------------------------
    // Outcome recording
    // ------------------------------------------------------------------

    /// Persist the outcome of a social exchange into the character session
    /// and the world mirror. Returns progress notes.
    #[allow(clippy::too_many_arguments)]
    pub fn record_outcome(
        &self,
        world: &mut World,
        character: &mut Character,
        character_id: i64,
        npc_id: &str,
        approach: &str,
        success: bool,
        world_turn: u64,
    ) -> Vec<String> {
        if !self.config.dialogue_tree_enabled {
            return Vec::new();
        }
        let normalized = Self::normalize_approach(approach);
        let mut notes = Vec::new();

        let challenge_note = if self.config.dialogue_challenges {
            self.advance_challenge(character, character_id, npc_id, &normalized, success, world_turn)
        } else {
            None
        };

        {
            let session = Self::session_row(character, npc_id);
            session.last_turn = world_turn;
            session.last_approach = normalized.clone();
            session.last_success = success;

            if success {
                match session.stage_id.as_str() {
                    "opening" => session.stage_id = "probe".to_string(),
                    "probe" => session.stage_id = "resolve".to_string(),
                    _ => {
                        session.stage_id = "opening".to_string();
                        session.last_resolved_turn = Some(world_turn);
                        notes.push("The conversation resolves; the cycle begins anew.".to_string());
                    }
                }
            } else {
                session.stage_id = "opening".to_string();
            }
        }

        let global = world
            .flags
            .dialogue_state
            .npc_sessions
            .entry(npc_id.to_string())
            .or_default();
        global.last_turn = world_turn;
        global.last_approach = normalized;
        global.last_success = success;

        if let Some(note) = challenge_note {
            notes.push(note);
        }
        notes
    }

    /// The three-maneuver challenge: consecutive correct approaches climb,
    /// any mistake resets.
    fn advance_challenge(
        &self,
        character: &mut Character,
        character_id: i64,
        npc_id: &str,
        approach: &str,
        success: bool,
        world_turn: u64,
    ) -> Option<String> {
        let sequence = Self::challenge_sequence(character_id, npc_id);
        let session = Self::session_row(character, npc_id);
        if session.challenge_completed_turn.is_some() {
            return None;
        }
        let step = session.challenge_progress.min(CHALLENGE_TARGET - 1) as usize;
        let expected = &sequence[step];

        if success && approach == expected {
            session.challenge_progress += 1;
            if session.challenge_progress >= CHALLENGE_TARGET {
                session.challenge_completed_turn = Some(world_turn);
                return Some("You complete the full maneuver sequence.".to_string());
            }
            return Some(format!(
                "Maneuver {} of {} lands.",
                session.challenge_progress, CHALLENGE_TARGET
            ));
        }
        if session.challenge_progress > 0 {
            session.challenge_progress = 0;
            return Some("The maneuver sequence breaks; start over.".to_string());
        }
        None
    }

    /// Deterministic per-(character, npc) maneuver sequence.
    pub fn challenge_sequence(character_id: i64, npc_id: &str) -> Vec<String> {
        let seed = derive_seed(
            "dialogue.challenge",
            &SeedContext::new()
                .with("character_id", character_id)
                .with("npc_id", npc_id),
        );
        let mut rng = StdRng::seed_from_u64(seed);
        (0..CHALLENGE_TARGET)
            .map(|_| MANEUVERS[rng.gen_range(0..MANEUVERS.len())].to_string())
            .collect()
    }

    // ------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------

    /// Apply a choice's effects after its success/failure is known.
    pub fn apply_effects(
        &self,
        world: &mut World,
        character: &mut Character,
        effects: &[EffectRule],
        success: bool,
    ) -> Vec<String> {
        let mut messages = Vec::new();
        let turn = world.current_turn;
        for effect in effects {
            if !effect.triggers_on(success) {
                continue;
            }
            match effect.kind.trim().to_ascii_lowercase().as_str() {
                "faction_heat_delta" => {
                    let Some(faction_id) = effect
                        .faction_id
                        .as_deref()
                        .map(|id| id.trim().to_ascii_lowercase())
                        .filter(|id| !id.is_empty())
                    else {
                        continue;
                    };
                    let delta = effect.delta.unwrap_or(0);
                    let entry = character.flags.faction_heat.entry(faction_id.clone()).or_insert(0);
                    *entry = (*entry + delta).clamp(-100, 100);
                    messages.push(format!("Heat with {faction_id} shifts by {delta}."));
                }
                "narrative_tension_delta" => {
                    let delta = effect.delta.unwrap_or(0);
                    world.flags.narrative.tension_level += delta;
                    world.flags.narrative.clamp_tension();
                }
                "story_seed_state" => {
                    if let Some(seed) = world.flags.narrative.active_story_seed_mut() {
                        if let Some(status) = effect
                            .status
                            .as_deref()
                            .and_then(SeedStatus::parse)
                        {
                            seed.status = status;
                            if status == SeedStatus::Resolved {
                                seed.resolved_turn = Some(turn);
                                seed.resolved_by = Some("dialogue".to_string());
                            }
                        }
                        if let Some(stage) = effect.escalation_stage.as_deref() {
                            if !stage.trim().is_empty() {
                                seed.escalation_stage = stage.trim().to_string();
                            }
                        }
                    }
                }
                "consequence" => {
                    if let Some(message) = effect.message.as_deref().filter(|text| !text.trim().is_empty()) {
                        world.append_consequence("dialogue", message.trim(), "minor", turn);
                        messages.push(message.trim().to_string());
                    }
                }
                _ => {}
            }
        }
        messages
    }
}

impl DialogueChoiceView {
    /// The label with any skill-check suffix stripped, for approach mapping.
    fn label_for_approach(&self) -> String {
        match self.label.split_once(" [") {
            Some((head, _)) => head.to_string(),
            None => self.label.clone(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dialogue::default_dialogue_content;

    fn engine(config: GameConfig) -> DialogueEngine {
        DialogueEngine::new(config, default_dialogue_content())
    }

    fn approaches() -> Vec<String> {
        vec!["Friendly".to_string(), "Direct".to_string(), "Intimidate".to_string()]
    }

    #[test]
    fn bundled_content_validates_clean() {
        let raw = serde_json::to_value(default_dialogue_content()).unwrap();
        assert!(validate_dialogue_content(&raw).is_empty());
    }

    #[test]
    fn validator_rejects_bad_shapes() {
        let payload = serde_json::json!({
            "npcs": {
                "broker_silas": {
                    "opening": {"line": ""},
                    "banter": {"line": "not a stage"},
                    "probe": {
                        "line": "ok",
                        "choices": [
                            {"id": "", "label": "", "skill_check": {"skill": "juggling", "dc": 99}},
                            {"id": "x", "label": "X", "effects": [{"kind": "faction_heat_delta"}]}
                        ]
                    }
                }
            }
        });
        let errors = validate_dialogue_content(&payload);
        assert!(errors.iter().any(|row| row.contains("opening.line is required")));
        assert!(errors.iter().any(|row| row.contains("banter is not a supported stage")));
        assert!(errors.iter().any(|row| row.contains("id is required")));
        assert!(errors.iter().any(|row| row.contains("skill must be one of")));
        assert!(errors.iter().any(|row| row.contains("dc must be between 5 and 25")));
        assert!(errors.iter().any(|row| row.contains("faction_id is required")));
    }

    #[test]
    fn stage_advances_on_success_and_resets_on_failure() {
        let engine = engine(GameConfig::default().with_dialogue_tree(true));
        let mut world = World::new(1, "World", 3);
        let mut character = Character::new(21, "Vale");

        engine.record_outcome(&mut world, &mut character, 21, "broker_silas", "friendly", true, 1);
        assert_eq!(
            character.flags.dialogue_state.npc_sessions["broker_silas"].stage_id,
            "probe"
        );
        engine.record_outcome(&mut world, &mut character, 21, "broker_silas", "friendly", true, 2);
        assert_eq!(
            character.flags.dialogue_state.npc_sessions["broker_silas"].stage_id,
            "resolve"
        );
        engine.record_outcome(&mut world, &mut character, 21, "broker_silas", "friendly", true, 3);
        let session = &character.flags.dialogue_state.npc_sessions["broker_silas"];
        assert_eq!(session.stage_id, "opening");
        assert_eq!(session.last_resolved_turn, Some(3));

        engine.record_outcome(&mut world, &mut character, 21, "broker_silas", "direct", true, 4);
        engine.record_outcome(&mut world, &mut character, 21, "broker_silas", "direct", false, 5);
        assert_eq!(
            character.flags.dialogue_state.npc_sessions["broker_silas"].stage_id,
            "opening"
        );
        // World mirror tracks the latest exchange.
        assert!(!world.flags.dialogue_state.npc_sessions["broker_silas"].last_success);
    }

    #[test]
    fn disabled_tree_records_nothing() {
        let engine = engine(GameConfig::default());
        let mut world = World::new(1, "World", 3);
        let mut character = Character::new(21, "Vale");
        let notes =
            engine.record_outcome(&mut world, &mut character, 21, "broker_silas", "friendly", true, 1);
        assert!(notes.is_empty());
        assert!(character.flags.dialogue_state.npc_sessions.is_empty());
    }

    #[test]
    fn session_renders_stage_prefix_and_choices() {
        let engine = engine(GameConfig::default().with_dialogue_tree(true));
        let world = World::new(1, "World", 3);
        let mut character = Character::new(21, "Vale");
        let view = engine.build_dialogue_session(
            &world,
            &mut character,
            21,
            "broker_silas",
            "Silas",
            "Silas looks up.",
            &approaches(),
        );
        assert_eq!(view.stage_id, "opening");
        assert!(view.greeting.starts_with("[Opening]"));
        assert!(!view.choices.is_empty());
        assert!(view.choices.iter().any(|row| row.choice_id == "friendly"));
    }

    #[test]
    fn locked_choice_renders_reason_and_rejects_submission() {
        let engine = engine(GameConfig::default().with_dialogue_tree(true));
        let world = World::new(1, "World", 3);
        let mut character = Character::new(21, "Vale");
        // broker_silas probe stage carries a has_gold_8 gated choice.
        {
            let session = character
                .flags
                .dialogue_state
                .npc_sessions
                .entry("broker_silas".to_string())
                .or_default();
            session.stage_id = "probe".to_string();
        }
        character.money = 2;

        let view = engine.build_dialogue_session(
            &world,
            &mut character,
            21,
            "broker_silas",
            "Silas",
            "greeting",
            &approaches(),
        );
        let gated = view
            .choices
            .iter()
            .find(|row| row.choice_id == "grease palms")
            .expect("gated choice present");
        assert!(!gated.available);
        assert!(gated.locked_reason.contains("8 gold"));

        let resolution = engine.resolve_dialogue_choice(
            &world,
            &mut character,
            21,
            "broker_silas",
            "Silas",
            "greeting",
            &approaches(),
            "grease_palms",
        );
        assert!(!resolution.accepted);
    }

    #[test]
    fn skill_checked_choice_surfaces_dc_in_label() {
        let engine = engine(GameConfig::default().with_dialogue_tree(true));
        let world = World::new(1, "World", 3);
        let mut character = Character::new(21, "Vale");
        {
            let session = character
                .flags
                .dialogue_state
                .npc_sessions
                .entry("captain_ren".to_string())
                .or_default();
            session.stage_id = "probe".to_string();
        }
        let view = engine.build_dialogue_session(
            &world,
            &mut character,
            21,
            "captain_ren",
            "Captain Ren",
            "greeting",
            &approaches(),
        );
        let press = view
            .choices
            .iter()
            .find(|row| row.choice_id == "press for names")
            .expect("skill-checked choice present");
        assert!(press.label.contains("Intimidation DC"));
        assert!(press.available);
    }

    #[test]
    fn empty_effects_leave_world_untouched() {
        let engine = engine(GameConfig::default().with_dialogue_tree(true));
        let mut world = World::new(1, "World", 3);
        let mut character = Character::new(21, "Vale");
        let before = world.clone();
        let messages = engine.apply_effects(&mut world, &mut character, &[], true);
        assert!(messages.is_empty());
        assert_eq!(world, before);
    }

    #[test]
    fn effects_apply_by_trigger() {
        let engine = engine(GameConfig::default().with_dialogue_tree(true));
        let mut world = World::new(1, "World", 3);
        let mut character = Character::new(21, "Vale");
        let effects = vec![
            EffectRule {
                kind: "faction_heat_delta".to_string(),
                on: "success".to_string(),
                faction_id: Some("wardens".to_string()),
                delta: Some(4),
                ..EffectRule::default()
            },
            EffectRule {
                kind: "narrative_tension_delta".to_string(),
                on: "failure".to_string(),
                delta: Some(10),
                ..EffectRule::default()
            },
            EffectRule {
                kind: "consequence".to_string(),
                on: "always".to_string(),
                message: Some("Word spreads.".to_string()),
                ..EffectRule::default()
            },
        ];

        engine.apply_effects(&mut world, &mut character, &effects, true);
        assert_eq!(character.heat_for("wardens"), 4);
        assert_eq!(world.flags.narrative.tension_level, 0);
        assert_eq!(world.flags.consequences.len(), 1);

        engine.apply_effects(&mut world, &mut character, &effects, false);
        assert_eq!(character.heat_for("wardens"), 4);
        assert_eq!(world.flags.narrative.tension_level, 10);
        assert_eq!(world.flags.consequences.len(), 2);
    }

    #[test]
    fn challenge_sequence_is_deterministic_and_progresses() {
        let engine = engine(
            GameConfig::default()
                .with_dialogue_tree(true)
                .with_challenges(true),
        );
        let sequence = DialogueEngine::challenge_sequence(21, "broker_silas");
        assert_eq!(sequence, DialogueEngine::challenge_sequence(21, "broker_silas"));
        assert_eq!(sequence.len(), CHALLENGE_TARGET as usize);

        let mut world = World::new(1, "World", 3);
        let mut character = Character::new(21, "Vale");
        // Follow the expected sequence exactly.
        for (step, approach) in sequence.iter().enumerate() {
            engine.record_outcome(
                &mut world,
                &mut character,
                21,
                "broker_silas",
                approach,
                true,
                step as u64,
            );
        }
        let session = &character.flags.dialogue_state.npc_sessions["broker_silas"];
        assert_eq!(session.challenge_progress, CHALLENGE_TARGET);
        assert!(session.challenge_completed_turn.is_some());
    }

    #[test]
    fn wrong_maneuver_resets_challenge() {
        let engine = engine(
            GameConfig::default()
                .with_dialogue_tree(true)
                .with_challenges(true),
        );
        let sequence = DialogueEngine::challenge_sequence(21, "captain_ren");
        let wrong = MANEUVERS
            .iter()
            .find(|row| **row != sequence[1])
            .unwrap()
            .to_string();

        let mut world = World::new(1, "World", 3);
        let mut character = Character::new(21, "Vale");
        engine.record_outcome(&mut world, &mut character, 21, "captain_ren", &sequence[0], true, 1);
        assert_eq!(
            character.flags.dialogue_state.npc_sessions["captain_ren"].challenge_progress,
            1
        );
        engine.record_outcome(&mut world, &mut character, 21, "captain_ren", &wrong, true, 2);
        assert_eq!(
            character.flags.dialogue_state.npc_sessions["captain_ren"].challenge_progress,
            0
        );
    }

    #[test]
    fn contextual_options_inject_by_world_state() {
        let engine = engine(
            GameConfig::default()
                .with_dialogue_tree(true)
                .with_contextual_options(true),
        );
        let mut world = World::new(1, "World", 3);
        world.flags.narrative.tension_level = 70;
        world.flags.narrative.flashpoint_echoes.push(crate::game::world::FlashpointEcho {
            turn: 0,
            seed_id: "seed".to_string(),
            resolution: "debt".to_string(),
            channel: "social".to_string(),
            bias_faction: None,
            rival_faction: None,
            affected_factions: 0,
            severity_score: 50,
            severity_band: "moderate".to_string(),
        });
        let character = Character::new(21, "Vale");

        let (greeting, options) = engine.contextualize_interaction(
            &world,
            &character,
            21,
            "broker_silas",
            "Silas nods.",
            &approaches(),
        );
        assert!(greeting.contains("Tension is critical"));
        assert!(options.contains(&"Urgent Appeal".to_string()));
        assert!(options.contains(&"Address Flashpoint".to_string()));
    }
}
