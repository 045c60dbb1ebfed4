//! Event bus - synchronous pub/sub wiring between game systems
//!
//! Systems communicate through events instead of direct coupling: a combat
//! kill triggers quest progress, which triggers narrative consequences.
//! Delivery is sequential and in registration order during `publish`; there
//! are no queues and nothing ever awaits.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// All events the core emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GameEvent {
    CombatVictory {
        character_id: i64,
        enemy_id: i64,
        enemy_level: u32,
        world_turn: u64,
    },
    CombatFeatureTriggered {
        character_id: i64,
        enemy_id: i64,
        feature_slug: String,
        trigger_key: String,
        effect_kind: String,
        effect_value: i32,
        round_number: u32,
    },
    QuestAccepted {
        character_id: i64,
        quest_id: String,
        world_turn: u64,
    },
    QuestCompleted {
        character_id: i64,
        quest_id: String,
        world_turn: u64,
    },
    LevelUp {
        character_id: i64,
        new_level: u32,
    },
    WorldTicked {
        world_turn: u64,
    },
    StorySeedResolved {
        seed_id: String,
        resolution: String,
        channel: String,
        world_turn: u64,
    },
}

/// Coarse event categories used as subscription keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    CombatVictory,
    CombatFeatureTriggered,
    QuestAccepted,
    QuestCompleted,
    LevelUp,
    WorldTicked,
    StorySeedResolved,
}

impl GameEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::CombatVictory { .. } => EventType::CombatVictory,
            Self::CombatFeatureTriggered { .. } => EventType::CombatFeatureTriggered,
            Self::QuestAccepted { .. } => EventType::QuestAccepted,
            Self::QuestCompleted { .. } => EventType::QuestCompleted,
            Self::LevelUp { .. } => EventType::LevelUp,
            Self::WorldTicked { .. } => EventType::WorldTicked,
            Self::StorySeedResolved { .. } => EventType::StorySeedResolved,
        }
    }
}

type Handler = Box<dyn FnMut(&GameEvent)>;

/// Minimal synchronous publisher. Handlers registered for a type run in
/// registration order; they must not retain references past the call.
#[derive(Default)]
pub struct EventBus {
    handlers: HashMap<EventType, Vec<Handler>>,
    history: Vec<GameEvent>,
    max_history: usize,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handler_types", &self.handlers.len())
            .field("history_len", &self.history.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            history: Vec::new(),
            max_history: 200,
        }
    }

    pub fn subscribe(&mut self, event_type: EventType, handler: impl FnMut(&GameEvent) + 'static) {
        self.handlers.entry(event_type).or_default().push(Box::new(handler));
    }

    /// Deliver an event to every subscriber of its type, in order.
    pub fn publish(&mut self, event: GameEvent) {
        if let Some(handlers) = self.handlers.get_mut(&event.event_type()) {
            for handler in handlers.iter_mut() {
                handler(&event);
            }
        }
        self.history.push(event);
        if self.history.len() > self.max_history {
            let overflow = self.history.len() - self.max_history;
            self.history.drain(..overflow);
        }
    }

    pub fn history(&self) -> &[GameEvent] {
        &self.history
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn handlers_run_in_registration_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut bus = EventBus::new();

        let first = Rc::clone(&seen);
        bus.subscribe(EventType::WorldTicked, move |_| first.borrow_mut().push("first"));
        let second = Rc::clone(&seen);
        bus.subscribe(EventType::WorldTicked, move |_| second.borrow_mut().push("second"));

        bus.publish(GameEvent::WorldTicked { world_turn: 1 });
        assert_eq!(*seen.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn publish_only_reaches_matching_type() {
        let hits = Rc::new(RefCell::new(0));
        let mut bus = EventBus::new();
        let counter = Rc::clone(&hits);
        bus.subscribe(EventType::CombatVictory, move |_| *counter.borrow_mut() += 1);

        bus.publish(GameEvent::WorldTicked { world_turn: 1 });
        assert_eq!(*hits.borrow(), 0);

        bus.publish(GameEvent::CombatVictory {
            character_id: 1,
            enemy_id: 99,
            enemy_level: 1,
            world_turn: 1,
        });
        assert_eq!(*hits.borrow(), 1);
        assert_eq!(bus.history().len(), 2);
    }
}
