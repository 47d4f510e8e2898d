//! AI Scheduler
//!
//! Drives every antagonist nobody is playing. Each one gets a movement
//! opportunity on its own interval and moves if a d20 roll lands at or
//! under its level.

use crate::game::character::Character;
use crate::game::events::GameEvent;
use crate::game::graph::{self, Node};
use crate::game::movement::{can_move, perform_move};
use crate::game::state::GameState;

/// Give each unassigned antagonist whose opportunity is due its roll.
pub fn update(state: &mut GameState, events: &mut Vec<GameEvent>) {
    for character in Character::ANTAGONISTS {
        if state.power_down || state.is_decided() {
            return;
        }
        if state.holder_of(character).is_some() {
            continue;
        }
        let Some(a) = state.antagonist(character) else {
            continue;
        };
        let level = a.ai_level as u32;
        match a.next_ai {
            Some(next) if state.tick >= next => {}
            _ => continue,
        }

        let mut entered_door = false;
        if state.rng().roll_d20() <= level {
            if let Some(target) = pick_target(state, character) {
                perform_move(state, character, target, events);
                entered_door = target.is_attack_node();
            }
        }

        if !entered_door {
            let next = state.tick + character.ai_interval_ticks(state.tick_rate);
            if let Some(a) = state.antagonist_mut(character) {
                a.next_ai = Some(next);
            }
        }
    }
}

/// Where the AI wants to send `character` next, if anywhere is open.
fn pick_target(state: &mut GameState, character: Character) -> Option<Node> {
    let current = state.antagonist(character)?.node;
    match character {
        Character::Freddy | Character::Foxy => graph::next_on_route(character, current)
            .filter(|next| can_move(state, character, *next)),
        _ => {
            let options: Vec<Node> = graph::neighbors(character, current)
                .iter()
                .copied()
                .filter(|n| *n != Node::ShowStage && can_move(state, character, *n))
                .collect();
            state.rng().choose(&options).copied()
        }
    }
}
