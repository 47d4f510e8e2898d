//! Game Logic Module
//!
//! The rules engine. Nothing here does I/O or reads a clock; every tick
//! is a pure function of the state, the queued inputs and the match RNG.
//!
//! ## Module Structure
//!
//! - `character`: Roles and per-antagonist tuning
//! - `graph`: Building nodes and who can walk where
//! - `input`: Gameplay commands, admission window, input queue
//! - `state`: Match state, assignments, snapshot
//! - `environment`: Power, clock, music box, jump-scare timers, static
//! - `movement`: Move validity, door attacks
//! - `ai`: Movement opportunities for unplayed antagonists
//! - `tick`: Authoritative simulation step
//! - `events`: Game events emitted per tick

pub mod ai;
pub mod character;
pub mod environment;
pub mod events;
pub mod graph;
pub mod input;
pub mod movement;
pub mod state;
pub mod tick;

// Re-export key types
pub use character::Character;
pub use events::{GameEvent, GameEventData};
pub use graph::{Node, Side};
pub use input::{CheatKind, GameCommand, InputQueue, QueuedInput};
pub use state::{GameState, MatchOutcome, RulesError, SessionId, Snapshot};
pub use tick::TickResult;
