//! Game Events
//!
//! Discrete things that happened during a tick. The network layer turns
//! the client-visible ones into wire messages; the rest only feed logs
//! and tests.

use serde::{Deserialize, Serialize};

use crate::game::character::Character;
use crate::game::graph::{Node, Side};

/// Game event data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameEventData {
    /// An antagonist changed node (player move, AI move or repel)
    Moved {
        character: Character,
        from: Node,
        to: Node,
    },

    /// A jump-scare started
    Jumpscare { character: Character },

    /// The jump-scare display finished
    EndJumpscare,

    /// Music box reached a new level
    MusicBox { level: u8 },

    /// The clock advanced an hour
    NightAdvanced { night: u8 },

    /// Power ran out
    PowerDown,

    /// A closed door turned an attack away
    AttackRepelled { character: Character, to: Node },

    /// An attack got through an open door
    Breach { character: Character, side: Side },

    /// The match is decided
    GameOver { survived: bool },
}

/// An event stamped with the tick it happened on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Tick when event occurred
    pub tick: u64,
    /// Event payload
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event.
    pub fn new(tick: u64, data: GameEventData) -> Self {
        Self { tick, data }
    }
}
