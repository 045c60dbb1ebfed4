//! In-memory repository drivers
//!
//! These back every test in the crate and any embedded use that does not
//! want a database. They honour the same ordering contract as the SQL
//! drivers: operations run sequentially inside `persist`, after the
//! character and world saves.

use serde_json::json;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::game::character::Character;
use crate::game::encounter::EncounterDefinition;
use crate::game::entity::Entity;
use crate::game::faction::Faction;
use crate::game::feature::Feature;
use crate::game::location::Location;
use crate::game::quest::QuestState;
use crate::game::spell::Spell;
use crate::game::world::World;

use super::{
    AtomicStatePersistor, AuditLog, CharacterRepository, EncounterDefinitionRepository,
    EntityRepository, FactionRepository, FeatureRepository, LocationRepository,
    LocationStateRepository, Operation, PersistError, QuestStateRepository, SpellRepository,
    WorldRepository,
};

/// Shared audit sink handed to every in-memory repo so a test can inspect
/// all append-only tables in one place.
pub type SharedAudit = Rc<RefCell<AuditLog>>;

pub fn shared_audit() -> SharedAudit {
    Rc::new(RefCell::new(AuditLog::default()))
}

// ---------------------------------------------------------------------------
// Characters
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryCharacterRepository {
    rows: RefCell<BTreeMap<i64, Character>>,
}

impl InMemoryCharacterRepository {
    pub fn new(characters: Vec<Character>) -> Self {
        let rows = characters.into_iter().map(|row| (row.id, row)).collect();
        Self { rows: RefCell::new(rows) }
    }
}

impl CharacterRepository for InMemoryCharacterRepository {
    fn get(&self, id: i64) -> Option<Character> {
        self.rows.borrow().get(&id).cloned()
    }

    fn save(&self, character: &Character) {
        self.rows.borrow_mut().insert(character.id, character.clone());
    }

    fn list(&self) -> Vec<Character> {
        self.rows.borrow().values().cloned().collect()
    }

    fn build_progression_unlock_operation(
        &self,
        character_id: i64,
        unlock_kind: &str,
        unlock_key: &str,
        unlocked_level: u32,
        created_turn: u64,
    ) -> Operation {
        let row = json!({
            "character_id": character_id,
            "unlock_kind": unlock_kind,
            "unlock_key": unlock_key,
            "unlocked_level": unlocked_level,
            "created_turn": created_turn,
            "created_at": chrono::Utc::now().to_rfc3339(),
        });
        Box::new(move |audit| audit.append("character_progression_unlock", row))
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryEntityRepository {
    rows: Vec<Entity>,
    locations: BTreeMap<i64, Vec<i64>>,
}

impl InMemoryEntityRepository {
    pub fn new(rows: Vec<Entity>) -> Self {
        Self { rows, locations: BTreeMap::new() }
    }

    pub fn with_location(mut self, location_id: i64, entity_ids: Vec<i64>) -> Self {
        self.locations.insert(location_id, entity_ids);
        self
    }
}

impl EntityRepository for InMemoryEntityRepository {
    fn get(&self, id: i64) -> Option<Entity> {
        self.rows.iter().find(|row| row.id == id).cloned()
    }

    fn list_for_location(&self, location_id: i64) -> Vec<Entity> {
        match self.locations.get(&location_id) {
            Some(ids) => ids.iter().filter_map(|id| self.get(*id)).collect(),
            None => self.rows.clone(),
        }
    }

    fn list_all(&self) -> Vec<Entity> {
        self.rows.clone()
    }
}

// ---------------------------------------------------------------------------
// Locations
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryLocationRepository {
    rows: BTreeMap<i64, Location>,
}

impl InMemoryLocationRepository {
    pub fn new(rows: Vec<Location>) -> Self {
        Self {
            rows: rows.into_iter().map(|row| (row.id, row)).collect(),
        }
    }
}

impl LocationRepository for InMemoryLocationRepository {
    fn get(&self, id: i64) -> Option<Location> {
        self.rows.get(&id).cloned()
    }

    fn list_all(&self) -> Vec<Location> {
        self.rows.values().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct InMemoryWorldRepository {
    world: RefCell<World>,
    audit: SharedAudit,
}

impl InMemoryWorldRepository {
    pub fn new(seed: u64, audit: SharedAudit) -> Self {
        Self {
            world: RefCell::new(World::new(1, "Default World", seed)),
            audit,
        }
    }

    pub fn with_world(world: World, audit: SharedAudit) -> Self {
        Self { world: RefCell::new(world), audit }
    }
}

impl WorldRepository for InMemoryWorldRepository {
    fn load_default(&self) -> Option<World> {
        Some(self.world.borrow().clone())
    }

    fn save(&self, world: &World) {
        *self.world.borrow_mut() = world.clone();
    }

    fn set_world_flag(&self, world_id: i64, flag_key: &str, flag_value: &str, changed_turn: u64, reason: &str) {
        self.audit.borrow_mut().append(
            "world_history",
            json!({
                "world_id": world_id,
                "changed_turn": changed_turn,
                "flag_key": flag_key,
                "old_value": serde_json::Value::Null,
                "new_value": flag_value,
                "reason": reason,
            }),
        );
    }

    fn build_set_world_flag_operation(
        &self,
        world_id: i64,
        flag_key: &str,
        flag_value: &str,
        changed_turn: u64,
        reason: &str,
    ) -> Operation {
        let row = json!({
            "world_id": world_id,
            "changed_turn": changed_turn,
            "flag_key": flag_key,
            "old_value": serde_json::Value::Null,
            "new_value": flag_value,
            "reason": reason,
        });
        Box::new(move |audit| audit.append("world_history", row))
    }
}

// ---------------------------------------------------------------------------
// Factions
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryFactionRepository {
    rows: Rc<RefCell<BTreeMap<String, Faction>>>,
}

impl InMemoryFactionRepository {
    pub fn new(rows: Vec<Faction>) -> Self {
        Self {
            rows: Rc::new(RefCell::new(
                rows.into_iter().map(|row| (row.id.clone(), row)).collect(),
            )),
        }
    }
}

impl FactionRepository for InMemoryFactionRepository {
    fn get(&self, id: &str) -> Option<Faction> {
        self.rows.borrow().get(id).cloned()
    }

    fn list_all(&self) -> Vec<Faction> {
        self.rows.borrow().values().cloned().collect()
    }

    fn save(&self, faction: &Faction) {
        self.rows.borrow_mut().insert(faction.id.clone(), faction.clone());
    }

    fn build_reputation_delta_operation(
        &self,
        faction_id: &str,
        character_id: i64,
        delta: i32,
        reason: &str,
        changed_turn: u64,
    ) -> Operation {
        let rows = Rc::clone(&self.rows);
        let faction_id = faction_id.to_string();
        let reason = reason.to_string();
        let target = Faction::reputation_key(character_id);
        Box::new(move |audit| {
            let (before, after) = match rows.borrow_mut().get_mut(&faction_id) {
                Some(faction) => faction.adjust_reputation(&target, delta),
                None => return,
            };
            audit.append(
                "reputation_history",
                json!({
                    "character_id": character_id,
                    "faction_id": faction_id,
                    "delta": delta,
                    "score_before": before,
                    "score_after": after,
                    "reason": reason,
                    "changed_turn": changed_turn,
                }),
            );
        })
    }
}

// ---------------------------------------------------------------------------
// Quest state
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct InMemoryQuestStateRepository {
    rows: Rc<RefCell<BTreeMap<(i64, String), QuestState>>>,
    audit: SharedAudit,
}

impl InMemoryQuestStateRepository {
    pub fn new(audit: SharedAudit) -> Self {
        Self {
            rows: Rc::new(RefCell::new(BTreeMap::new())),
            audit,
        }
    }
}

impl QuestStateRepository for InMemoryQuestStateRepository {
    fn get(&self, character_id: i64, template_slug: &str) -> Option<QuestState> {
        self.rows
            .borrow()
            .get(&(character_id, template_slug.to_string()))
            .cloned()
    }

    fn save_active_with_history(
        &self,
        character_id: i64,
        state: &QuestState,
        target_count: u32,
        action: &str,
        action_turn: u64,
        payload_json: &str,
    ) {
        self.rows
            .borrow_mut()
            .insert((character_id, state.template_slug.clone()), state.clone());
        self.audit.borrow_mut().append(
            "quest_history",
            json!({
                "character_id": character_id,
                "quest_slug": state.template_slug,
                "target_count": target_count,
                "action": action,
                "action_turn": action_turn,
                "payload": payload_json,
            }),
        );
    }

    fn build_save_active_with_history_operation(
        &self,
        character_id: i64,
        state: QuestState,
        target_count: u32,
        action: &str,
        action_turn: u64,
        payload_json: String,
    ) -> Operation {
        let rows = Rc::clone(&self.rows);
        let slug = state.template_slug.clone();
        let action = action.to_string();
        Box::new(move |audit| {
            rows.borrow_mut().insert((character_id, slug.clone()), state);
            audit.append(
                "quest_history",
                json!({
                    "character_id": character_id,
                    "quest_slug": slug,
                    "target_count": target_count,
                    "action": action,
                    "action_turn": action_turn,
                    "payload": payload_json,
                }),
            );
        })
    }
}

// ---------------------------------------------------------------------------
// Location state
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct InMemoryLocationStateRepository {
    audit: SharedAudit,
}

impl InMemoryLocationStateRepository {
    pub fn new(audit: SharedAudit) -> Self {
        Self { audit }
    }
}

impl LocationStateRepository for InMemoryLocationStateRepository {
    fn record_flag_change(
        &self,
        location_id: i64,
        changed_turn: u64,
        flag_key: &str,
        old_value: Option<&str>,
        new_value: &str,
        reason: &str,
    ) {
        self.audit.borrow_mut().append(
            "location_history",
            json!({
                "location_id": location_id,
                "changed_turn": changed_turn,
                "flag_key": flag_key,
                "old_value": old_value,
                "new_value": new_value,
                "reason": reason,
            }),
        );
    }

    fn build_location_flag_change_operation(
        &self,
        location_id: i64,
        changed_turn: u64,
        flag_key: &str,
        old_value: Option<String>,
        new_value: String,
        reason: String,
    ) -> Operation {
        let flag_key = flag_key.to_string();
        Box::new(move |audit| {
            audit.append(
                "location_history",
                json!({
                    "location_id": location_id,
                    "changed_turn": changed_turn,
                    "flag_key": flag_key,
                    "old_value": old_value,
                    "new_value": new_value,
                    "reason": reason,
                }),
            );
        })
    }
}

// ---------------------------------------------------------------------------
// Features, spells, encounter definitions
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryFeatureRepository {
    rows: BTreeMap<i64, Vec<Feature>>,
}

impl InMemoryFeatureRepository {
    pub fn new(rows: BTreeMap<i64, Vec<Feature>>) -> Self {
        Self { rows }
    }
}

impl FeatureRepository for InMemoryFeatureRepository {
    fn list_for_character(&self, character_id: i64) -> Vec<Feature> {
        self.rows.get(&character_id).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub struct InMemorySpellRepository {
    rows: BTreeMap<String, Spell>,
}

impl InMemorySpellRepository {
    pub fn new(rows: Vec<Spell>) -> Self {
        Self {
            rows: rows.into_iter().map(|row| (row.slug.clone(), row)).collect(),
        }
    }
}

impl SpellRepository for InMemorySpellRepository {
    fn get_by_slug(&self, slug: &str) -> Option<Spell> {
        self.rows.get(&slug.trim().to_ascii_lowercase()).cloned()
    }

    fn list_all(&self) -> Vec<Spell> {
        self.rows.values().cloned().collect()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryEncounterDefinitionRepository {
    rows: Vec<EncounterDefinition>,
}

impl InMemoryEncounterDefinitionRepository {
    pub fn new(rows: Vec<EncounterDefinition>) -> Self {
        Self { rows }
    }
}

impl EncounterDefinitionRepository for InMemoryEncounterDefinitionRepository {
    fn list_for_location(&self, location_id: i64) -> Vec<EncounterDefinition> {
        self.rows
            .iter()
            .filter(|row| row.applies_to_location(location_id))
            .cloned()
            .collect()
    }

    fn list_global(&self) -> Vec<EncounterDefinition> {
        self.rows.clone()
    }
}

// ---------------------------------------------------------------------------
// Atomic persistor
// ---------------------------------------------------------------------------

/// Sequential stand-in for the transactional persistor. `fail_next` lets
/// tests force the fallback path in the service.
pub struct InMemoryAtomicPersistor {
    character_repo: Rc<InMemoryCharacterRepository>,
    world_repo: Rc<InMemoryWorldRepository>,
    audit: SharedAudit,
    fail_next: Cell<bool>,
}

impl InMemoryAtomicPersistor {
    pub fn new(
        character_repo: Rc<InMemoryCharacterRepository>,
        world_repo: Rc<InMemoryWorldRepository>,
        audit: SharedAudit,
    ) -> Self {
        Self {
            character_repo,
            world_repo,
            audit,
            fail_next: Cell::new(false),
        }
    }

    pub fn fail_next(&self) {
        self.fail_next.set(true);
    }
}

impl AtomicStatePersistor for InMemoryAtomicPersistor {
    fn persist(
        &self,
        character: &Character,
        world: &World,
        operations: Vec<Operation>,
    ) -> Result<(), PersistError> {
        if self.fail_next.take() {
            return Err(PersistError("simulated failure".to_string()));
        }
        self.character_repo.save(character);
        self.world_repo.save(world);
        let mut audit = self.audit.borrow_mut();
        for operation in operations {
            operation(&mut audit);
        }
        Ok(())
    }
}
