//! Authoritative Simulation Tick
//!
//! One step of a running match. The lobby's match loop calls [`step`] once
//! per scheduled tick and broadcasts what it returns.

use crate::game::ai;
use crate::game::character::Character;
use crate::game::environment;
use crate::game::events::GameEvent;
use crate::game::input::{CheatKind, GameCommand, InputQueue, QueuedInput};
use crate::game::movement;
use crate::game::state::{GameState, MatchOutcome, Snapshot, START_POWER};

/// Result of a tick.
#[derive(Debug)]
pub struct TickResult {
    /// Tick just simulated
    pub tick: u64,
    /// Events generated this tick, in order
    pub events: Vec<GameEvent>,
    /// State after the tick
    pub snapshot: Snapshot,
    /// Set once the match is decided
    pub outcome: Option<MatchOutcome>,
    /// Inputs applied this tick
    pub applied: usize,
    /// Inputs dropped as too old
    pub stale: usize,
}

/// Run one simulation tick.
///
/// Order is fixed: the counter advances first, then due inputs apply,
/// then environment upkeep, attack resolution and the AI. The snapshot is
/// taken last.
pub fn step(state: &mut GameState, queue: &mut InputQueue) -> TickResult {
    let mut events = Vec::new();

    // 0. Advance tick counter
    state.tick += 1;

    // 1. Apply inputs that are due
    let drained = queue.drain_due(state.tick);
    let applied = drained.due.len();
    for input in &drained.due {
        apply_input(state, input, &mut events);
    }

    // 2. Power, night, jump-scares, music box, static
    environment::update(state, &mut events);

    // 3. Doors, then the AI
    movement::resolve_attacks(state, &mut events);
    ai::update(state, &mut events);

    TickResult {
        tick: state.tick,
        events,
        snapshot: state.snapshot(),
        outcome: state.outcome,
        applied,
        stale: drained.stale,
    }
}

/// Apply one queued command on behalf of its sender.
///
/// Commands the sender isn't entitled to, or that the current state
/// forbids, are ignored.
pub fn apply_input(state: &mut GameState, input: &QueuedInput, events: &mut Vec<GameEvent>) {
    if let GameCommand::Release = input.command {
        state.release_character(&input.session);
        return;
    }
    if state.is_decided() {
        return;
    }

    let character = state.character_of(&input.session);
    let is_guard = character == Character::Guard;

    match input.command {
        GameCommand::Door { side, closed } if is_guard && !state.power_down => {
            let office = state.side_mut(side);
            if !office.blocked {
                office.door = closed;
            }
        }
        GameCommand::Light { side, on } if is_guard && !state.power_down => {
            let office = state.side_mut(side);
            if !office.blocked {
                office.light = on;
            }
        }
        GameCommand::Camera { active, node } if is_guard && !state.power_down => {
            state.camera.active = active;
            if let Some(node) = node {
                state.camera.node = node;
            }
        }
        GameCommand::Move { target } if character.is_antagonist() => {
            movement::player_move(state, character, target, events);
        }
        GameCommand::Cheat { kind } if is_guard => apply_cheat(state, kind, events),
        _ => {}
    }
}

fn apply_cheat(state: &mut GameState, kind: CheatKind, events: &mut Vec<GameEvent>) {
    match kind {
        CheatKind::Power => {
            if !state.power_down {
                state.power = START_POWER;
            }
        }
        CheatKind::Night => environment::advance_night(state, events),
        CheatKind::Timer => {
            for a in state.antagonists.iter_mut() {
                a.move_timer = 0;
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
