//! Repository contracts and the atomic persistence boundary
//!
//! Repositories own persisted rows; the service works on value copies and
//! hands mutations back at the intent boundary. Multi-row writes ride through
//! the operation-builder pattern: each repo can mint a closure that appends
//! its rows inside whatever transactional scope the persistor provides.
//! The SQL drivers live outside this crate; `memory` ships the test doubles.

pub mod memory;

use serde_json::Value;
use std::collections::BTreeMap;

use crate::game::character::Character;
use crate::game::encounter::EncounterDefinition;
use crate::game::entity::Entity;
use crate::game::faction::Faction;
use crate::game::feature::Feature;
use crate::game::location::Location;
use crate::game::quest::QuestState;
use crate::game::spell::Spell;
use crate::game::world::World;

/// Append-only audit sink. The core writes these rows and never reads them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditLog {
    tables: BTreeMap<String, Vec<Value>>,
}

impl AuditLog {
    pub fn append(&mut self, table: &str, row: Value) {
        self.tables.entry(table.to_string()).or_default().push(row);
    }

    pub fn rows(&self, table: &str) -> &[Value] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self, table: &str) -> usize {
        self.rows(table).len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(Vec::is_empty)
    }
}

/// A deferred write executed inside the persistor's transactional scope.
pub type Operation = Box<dyn FnOnce(&mut AuditLog)>;

/// Failure surface of the atomic persistor. The service catches this and
/// falls back to best-effort per-repo saves.
#[derive(Debug, thiserror::Error)]
#[error("atomic persistence failed: {0}")]
pub struct PersistError(pub String);

pub trait CharacterRepository {
    fn get(&self, id: i64) -> Option<Character>;
    fn save(&self, character: &Character);
    fn list(&self) -> Vec<Character>;

    /// Audit row for a committed growth choice.
    fn build_progression_unlock_operation(
        &self,
        character_id: i64,
        unlock_kind: &str,
        unlock_key: &str,
        unlocked_level: u32,
        created_turn: u64,
    ) -> Operation;
}

pub trait EntityRepository {
    fn get(&self, id: i64) -> Option<Entity>;
    fn list_for_location(&self, location_id: i64) -> Vec<Entity>;
    fn list_all(&self) -> Vec<Entity>;
}

pub trait LocationRepository {
    fn get(&self, id: i64) -> Option<Location>;
    fn list_all(&self) -> Vec<Location>;
}

pub trait WorldRepository {
    fn load_default(&self) -> Option<World>;
    fn save(&self, world: &World);

    /// Immediate world-flag write with its audit row.
    fn set_world_flag(&self, world_id: i64, flag_key: &str, flag_value: &str, changed_turn: u64, reason: &str);

    /// Deferred form of `set_world_flag` for the atomic scope.
    fn build_set_world_flag_operation(
        &self,
        world_id: i64,
        flag_key: &str,
        flag_value: &str,
        changed_turn: u64,
        reason: &str,
    ) -> Operation;
}

pub trait FactionRepository {
    fn get(&self, id: &str) -> Option<Faction>;
    fn list_all(&self) -> Vec<Faction>;
    fn save(&self, faction: &Faction);

    /// Apply a reputation delta and append the history row in one scope.
    fn build_reputation_delta_operation(
        &self,
        faction_id: &str,
        character_id: i64,
        delta: i32,
        reason: &str,
        changed_turn: u64,
    ) -> Operation;
}

pub trait QuestStateRepository {
    fn get(&self, character_id: i64, template_slug: &str) -> Option<QuestState>;

    /// Save the active state and append the quest history row.
    fn save_active_with_history(
        &self,
        character_id: i64,
        state: &QuestState,
        target_count: u32,
        action: &str,
        action_turn: u64,
        payload_json: &str,
    );

    fn build_save_active_with_history_operation(
        &self,
        character_id: i64,
        state: QuestState,
        target_count: u32,
        action: &str,
        action_turn: u64,
        payload_json: String,
    ) -> Operation;
}

pub trait LocationStateRepository {
    fn record_flag_change(
        &self,
        location_id: i64,
        changed_turn: u64,
        flag_key: &str,
        old_value: Option<&str>,
        new_value: &str,
        reason: &str,
    );

    fn build_location_flag_change_operation(
        &self,
        location_id: i64,
        changed_turn: u64,
        flag_key: &str,
        old_value: Option<String>,
        new_value: String,
        reason: String,
    ) -> Operation;
}

pub trait FeatureRepository {
    fn list_for_character(&self, character_id: i64) -> Vec<Feature>;
}

pub trait SpellRepository {
    fn get_by_slug(&self, slug: &str) -> Option<Spell>;
    fn list_all(&self) -> Vec<Spell>;
}

pub trait EncounterDefinitionRepository {
    fn list_for_location(&self, location_id: i64) -> Vec<EncounterDefinition>;
    fn list_global(&self) -> Vec<EncounterDefinition>;
}

/// Executes the character save, world save, and every deferred operation in
/// a single transactional scope.
pub trait AtomicStatePersistor {
    fn persist(
        &self,
        character: &Character,
        world: &World,
        operations: Vec<Operation>,
    ) -> Result<(), PersistError>;
}
