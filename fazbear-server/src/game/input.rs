//! Gameplay Input and Admission
//!
//! Gameplay commands arrive tagged with the tick the client believes it is
//! on. The server only accepts commands inside a narrow window around its
//! own tick and applies them in arrival order once they fall due.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::game::graph::{Node, Side};
use crate::game::state::SessionId;

// =============================================================================
// ADMISSION WINDOW
// =============================================================================

/// Furthest a client may run ahead of the server, in ticks.
pub const MAX_FUTURE_TICKS: u64 = 2;

/// Oldest a command may be, relative to the server tick, and still apply.
pub const MAX_STALE_TICKS: u64 = 5;

/// Whether a command stamped `client_tick` may be queued at `current_tick`.
#[inline]
pub fn admissible(client_tick: u64, current_tick: u64) -> bool {
    client_tick <= current_tick.saturating_add(MAX_FUTURE_TICKS)
        && client_tick.saturating_add(MAX_STALE_TICKS) >= current_tick
}

// =============================================================================
// COMMANDS
// =============================================================================

/// Debug shortcuts available to the Guard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheatKind {
    /// Refill power to full.
    Power,
    /// Skip to the next hour.
    Night,
    /// Zero every antagonist's move timer.
    Timer,
}

/// A gameplay action applied by the tick loop.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GameCommand {
    /// Open or close a door.
    Door { side: Side, closed: bool },
    /// Switch a hall light.
    Light { side: Side, on: bool },
    /// Raise/lower the camera monitor, optionally switching the viewed node.
    Camera {
        active: bool,
        #[serde(default)]
        node: Option<Node>,
    },
    /// Move the sender's antagonist.
    Move { target: Node },
    /// Debug shortcut.
    Cheat { kind: CheatKind },
    /// Free the sender's character after they left mid-match.
    #[serde(skip_deserializing)]
    Release,
}

/// A command waiting in the lobby queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedInput {
    /// Who sent it
    pub session: SessionId,
    /// What to do
    pub command: GameCommand,
    /// Tick stamped by the client
    pub client_tick: u64,
    /// Server tick at arrival
    pub received_at: u64,
}

/// Result of draining the queue for one tick.
#[derive(Debug, Default)]
pub struct Drained {
    /// Inputs to apply, in arrival order.
    pub due: Vec<QueuedInput>,
    /// Inputs popped but too old to apply.
    pub stale: usize,
}

// =============================================================================
// INPUT QUEUE
// =============================================================================

/// FIFO shared by every member of a lobby.
#[derive(Debug, Default)]
pub struct InputQueue {
    queue: VecDeque<QueuedInput>,
}

impl InputQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a client command if its tick falls in the admission window.
    ///
    /// Returns `false` (and drops the command) otherwise.
    pub fn admit(
        &mut self,
        session: SessionId,
        command: GameCommand,
        client_tick: u64,
        current_tick: u64,
    ) -> bool {
        if !admissible(client_tick, current_tick) {
            return false;
        }
        self.queue.push_back(QueuedInput {
            session,
            command,
            client_tick,
            received_at: current_tick,
        });
        true
    }

    /// Queue a server-generated command, stamped with the current tick.
    pub fn push_internal(&mut self, session: SessionId, command: GameCommand, current_tick: u64) {
        self.queue.push_back(QueuedInput {
            session,
            command,
            client_tick: current_tick,
            received_at: current_tick,
        });
    }

    /// Pop every input due at `current_tick`.
    ///
    /// Stops at the first input stamped for a later tick, so inputs behind
    /// it wait even if they are already due.
    pub fn drain_due(&mut self, current_tick: u64) -> Drained {
        let mut drained = Drained::default();

        while let Some(head) = self.queue.front() {
            if head.client_tick > current_tick {
                break;
            }
            let Some(input) = self.queue.pop_front() else {
                break;
            };
            if current_tick - input.client_tick > MAX_STALE_TICKS {
                drained.stale += 1;
            } else {
                drained.due.push(input);
            }
        }

        drained
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Number of queued inputs.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================
