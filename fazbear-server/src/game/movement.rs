//! Movement & Attack Resolution
//!
//! One move pipeline shared by players and the AI, plus the door attack
//! windows that open when an antagonist reaches the office.

use crate::game::character::Character;
use crate::game::environment::{self, drain_power, garble_on_move};
use crate::game::events::{GameEvent, GameEventData};
use crate::game::graph::{self, Node};
use crate::game::state::{AttackWindow, GameState, PendingJumpscare};

/// Power lost per previous failed attempt when Freddy is turned away.
pub const FREDDY_REPEL_PENALTY: u32 = 5;

/// The antagonist that may never share `node` with `character`.
fn rival_on(character: Character, node: Node) -> Option<Character> {
    match (character, node) {
        (Character::Freddy, Node::EastHallCorner | Node::RightDoor) => Some(Character::Chica),
        (Character::Chica, Node::EastHallCorner | Node::RightDoor) => Some(Character::Freddy),
        (Character::Bonnie, Node::LeftDoor) => Some(Character::Foxy),
        (Character::Foxy, Node::LeftDoor) => Some(Character::Bonnie),
        _ => None,
    }
}

fn occupied_by(state: &GameState, character: Character, node: Node) -> bool {
    state.antagonist(character).is_some_and(|a| a.node == node)
}

/// Whether `character` may step to `target` right now, ignoring the
/// player move timer.
pub fn can_move(state: &GameState, character: Character, target: Node) -> bool {
    if state.power_down || state.is_decided() {
        return false;
    }
    let Some(a) = state.antagonist(character) else {
        return false;
    };
    if a.attack.is_some() || !graph::is_adjacent(character, a.node, target) {
        return false;
    }

    if let Some(rival) = rival_on(character, target) {
        if occupied_by(state, rival, target) {
            return false;
        }
    }

    if character == Character::Freddy {
        // Can't slip past the others on stage
        if a.node == Node::ShowStage
            && (occupied_by(state, Character::Bonnie, Node::ShowStage)
                || occupied_by(state, Character::Chica, Node::ShowStage))
        {
            return false;
        }
        // Only reaches the door unwatched
        if target == Node::RightDoor {
            let cam = &state.camera;
            if cam.active && !cam.garbled() && cam.node == a.node {
                return false;
            }
        }
    }

    true
}

/// Move a player-controlled antagonist. Returns false if the move was
/// refused.
pub fn player_move(
    state: &mut GameState,
    character: Character,
    target: Node,
    events: &mut Vec<GameEvent>,
) -> bool {
    let ready = state
        .antagonist(character)
        .is_some_and(|a| a.move_timer == 0);
    if !ready || !can_move(state, character, target) {
        return false;
    }
    perform_move(state, character, target, events);
    true
}

/// Relocate `character` and apply the side effects of arriving: move
/// timer, event, camera static, and an attack window on door nodes.
///
/// Callers check validity first.
pub(crate) fn perform_move(
    state: &mut GameState,
    character: Character,
    target: Node,
    events: &mut Vec<GameEvent>,
) {
    let tick = state.tick;
    let rate = state.tick_rate as u64;
    let window = character
        .profile()
        .map(|p| state.ticks(p.attack_window_secs))
        .unwrap_or(0);
    let Some((min, max)) = state.antagonist(character).map(|a| a.move_time) else {
        return;
    };
    let timer = state.rng().next_in_range(min, max) as u64 * rate;

    let Some(a) = state.antagonist_mut(character) else {
        return;
    };
    let from = a.node;
    a.node = target;
    a.move_timer = timer;
    if let Some(side) = target.attack_side() {
        a.attack = Some(AttackWindow {
            side,
            resolves_at: tick + window,
        });
        a.next_ai = None;
    }

    events.push(GameEvent::new(
        tick,
        GameEventData::Moved {
            character,
            from,
            to: target,
        },
    ));
    garble_on_move(state, from, target);
}

/// Resolve every attack window that has run out.
pub fn resolve_attacks(state: &mut GameState, events: &mut Vec<GameEvent>) {
    for character in Character::ANTAGONISTS {
        if state.power_down || state.is_decided() {
            return;
        }
        let due = state
            .antagonist(character)
            .and_then(|a| a.attack)
            .filter(|w| state.tick >= w.resolves_at);
        let Some(window) = due else {
            continue;
        };

        if state.side(window.side).door {
            repel(state, character, events);
        } else if character == Character::Foxy {
            if let Some(a) = state.antagonist_mut(character) {
                a.attack = None;
            }
            environment::start_jumpscare(state, character, events);
        } else {
            breach(state, character, window, events);
        }
    }
}

fn repel(state: &mut GameState, character: Character, events: &mut Vec<GameEvent>) {
    let failed = state
        .antagonist(character)
        .map(|a| a.failed_attacks)
        .unwrap_or(0);
    if character == Character::Freddy {
        drain_power(state, FREDDY_REPEL_PENALTY * failed);
    }

    let targets = graph::repel_targets(character);
    let Some(target) = state.rng().choose(targets).copied() else {
        return;
    };
    let next_ai = state.tick + character.ai_interval_ticks(state.tick_rate);

    if let Some(a) = state.antagonist_mut(character) {
        a.attack = None;
        a.failed_attacks += 1;
        a.next_ai = Some(next_ai);
    }
    perform_move(state, character, target, events);
    events.push(GameEvent::new(
        state.tick,
        GameEventData::AttackRepelled {
            character,
            to: target,
        },
    ));
}

fn breach(
    state: &mut GameState,
    character: Character,
    window: AttackWindow,
    events: &mut Vec<GameEvent>,
) {
    if let Some(a) = state.antagonist_mut(character) {
        a.attack = None;
    }
    let side = state.side_mut(window.side);
    side.blocked = true;
    side.door = false;
    side.light = false;

    if state.pending_jumpscare.is_none() {
        state.pending_jumpscare = Some(PendingJumpscare {
            character,
            since: state.tick,
            camera_down_since: None,
        });
    }
    events.push(GameEvent::new(
        state.tick,
        GameEventData::Breach {
            character,
            side: window.side,
        },
    ));
}

// =============================================================================
// TESTS
// =============================================================================
