//! Domain error taxonomy

use thiserror::Error;

/// Errors raised for caller-supplied impossible input. Illegal state
/// transitions do NOT use this type; they come back as `ActionResult`
/// messages without mutating anything.
#[derive(Debug, Error)]
pub enum GameError {
    #[error("unknown character {0}")]
    UnknownCharacter(i64),

    #[error("unknown entity {0}")]
    UnknownEntity(i64),

    #[error("unknown location {0}")]
    UnknownLocation(i64),

    #[error("unknown npc '{0}'")]
    UnknownNpc(String),

    #[error("unknown quest '{0}'")]
    UnknownQuest(String),

    #[error("unknown faction '{0}'")]
    UnknownFaction(String),

    #[error("world not initialized")]
    WorldNotInitialized,

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type GameResult<T> = Result<T, GameError>;
