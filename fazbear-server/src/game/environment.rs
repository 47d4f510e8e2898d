//! Environment & Resource Systems
//!
//! Per-tick upkeep that doesn't depend on anyone's input: power drain and
//! power-down, the clock, jump-scare timers, the music box and camera
//! static.

use crate::game::character::{Character, MAX_AI_LEVEL, NIGHT_ESCALATION};
use crate::game::events::{GameEvent, GameEventData};
use crate::game::graph::Node;
use crate::game::state::{
    ActiveJumpscare, GameState, MatchOutcome, MusicBox, SURVIVAL_NIGHT,
};

/// Seconds of game time per in-game hour.
pub const SECONDS_PER_HOUR: u32 = 86;

/// Seconds the camera static lasts after a move on the viewed node.
pub const GARBLE_SECS: u32 = 3;

/// Seconds a jump-scare stays on screen before the match ends.
pub const JUMPSCARE_SECS: u32 = 1;

/// Seconds after the camera goes down before a breach jump-scares.
pub const BREACH_CAMERA_DOWN_SECS: u32 = 2;

/// Seconds a breach waits on a raised camera before forcing it down.
pub const BREACH_TIMEOUT_SECS: u32 = 20;

/// Seconds between music box attempts, per level.
pub const MUSIC_BOX_CADENCE_SECS: [u32; 4] = [5, 5, 5, 2];

/// Failed attempts that push the music box up a level anyway.
pub const MUSIC_BOX_MAX_RETRIES: u8 = 4;

/// Odds of a music box attempt succeeding: one in this many.
pub const MUSIC_BOX_ODDS: u32 = 5;

/// Run every environment system for the current tick, in order.
pub fn update(state: &mut GameState, events: &mut Vec<GameEvent>) {
    tick_move_timers(state);
    update_power(state, events);
    update_night(state, events);
    update_jumpscares(state, events);
    update_music_box(state, events);
    update_garble(state);
}

fn tick_move_timers(state: &mut GameState) {
    for a in state.antagonists.iter_mut() {
        a.move_timer = a.move_timer.saturating_sub(1);
    }
}

// =============================================================================
// POWER
// =============================================================================

/// Power drawn at one drain step.
pub fn power_usage(state: &GameState) -> u16 {
    let viewing = state.left.light || state.right.light || state.camera.active;
    1 + state.left.door as u16 + state.right.door as u16 + viewing as u16
}

fn update_power(state: &mut GameState, events: &mut Vec<GameEvent>) {
    if state.power_down {
        return;
    }
    if state.tick % state.tick_rate as u64 == 0 {
        let usage = power_usage(state);
        state.power = state.power.saturating_sub(usage);
    }
    if state.power == 0 {
        engage_power_down(state, events);
    }
}

/// Subtract `amount` from power, flooring at zero.
pub fn drain_power(state: &mut GameState, amount: u32) {
    state.power = (state.power as u32).saturating_sub(amount) as u16;
}

/// Kill all office systems and hand the night over to the music box.
pub fn engage_power_down(state: &mut GameState, events: &mut Vec<GameEvent>) {
    if state.power_down {
        return;
    }
    state.power_down = true;
    state.power = 0;

    for side in [&mut state.left, &mut state.right] {
        side.door = false;
        side.light = false;
    }
    state.camera.active = false;

    state.pending_jumpscare = None;
    for a in state.antagonists.iter_mut() {
        a.attack = None;
        a.next_ai = None;
    }

    state.music_box = Some(MusicBox {
        level: 0,
        retries: 0,
        next_attempt: state.tick + state.ticks(MUSIC_BOX_CADENCE_SECS[0]),
    });

    events.push(GameEvent::new(state.tick, GameEventData::PowerDown));
    events.push(GameEvent::new(state.tick, GameEventData::MusicBox { level: 0 }));
}

// =============================================================================
// NIGHT
// =============================================================================

fn update_night(state: &mut GameState, events: &mut Vec<GameEvent>) {
    if state.is_decided() {
        return;
    }
    let hour = state.ticks(SECONDS_PER_HOUR);
    if hour > 0 && state.tick % hour == 0 {
        advance_night(state, events);
    }
}

/// Move the clock forward one hour, escalate AI, and end the match at
/// the survival hour.
pub fn advance_night(state: &mut GameState, events: &mut Vec<GameEvent>) {
    if state.is_decided() {
        return;
    }
    state.night = if state.night >= 12 { 1 } else { state.night + 1 };
    events.push(GameEvent::new(
        state.tick,
        GameEventData::NightAdvanced { night: state.night },
    ));

    if let Some((_, escalated)) = NIGHT_ESCALATION.iter().find(|(h, _)| *h == state.night) {
        for character in escalated.iter() {
            if let Some(a) = state.antagonist_mut(*character) {
                a.ai_level = (a.ai_level + 1).min(MAX_AI_LEVEL);
            }
        }
    }

    if state.night == SURVIVAL_NIGHT {
        finish(state, MatchOutcome::Survived, events);
    }
}

/// Record the match outcome.
pub fn finish(state: &mut GameState, outcome: MatchOutcome, events: &mut Vec<GameEvent>) {
    if state.outcome.is_some() {
        return;
    }
    state.outcome = Some(outcome);
    events.push(GameEvent::new(
        state.tick,
        GameEventData::GameOver {
            survived: outcome.survived(),
        },
    ));
}

// =============================================================================
// JUMP-SCARES
// =============================================================================

/// Put `character`'s jump-scare on screen.
pub fn start_jumpscare(state: &mut GameState, character: Character, events: &mut Vec<GameEvent>) {
    if state.is_decided() {
        return;
    }
    state.pending_jumpscare = None;
    state.jumpscare = Some(ActiveJumpscare {
        character,
        ends_at: state.tick + state.ticks(JUMPSCARE_SECS),
    });
    events.push(GameEvent::new(state.tick, GameEventData::Jumpscare { character }));
}

fn update_jumpscares(state: &mut GameState, events: &mut Vec<GameEvent>) {
    if let Some(scare) = state.jumpscare {
        if state.outcome.is_none() && state.tick >= scare.ends_at {
            events.push(GameEvent::new(state.tick, GameEventData::EndJumpscare));
            finish(state, MatchOutcome::Defeated, events);
        }
        return;
    }

    let Some(mut pending) = state.pending_jumpscare else {
        return;
    };

    let fire = if state.camera.active {
        pending.camera_down_since = None;
        if state.tick - pending.since >= state.ticks(BREACH_TIMEOUT_SECS) {
            state.camera.active = false;
            true
        } else {
            false
        }
    } else {
        let down_since = *pending.camera_down_since.get_or_insert(state.tick);
        state.tick - down_since >= state.ticks(BREACH_CAMERA_DOWN_SECS)
    };

    if fire {
        start_jumpscare(state, pending.character, events);
    } else {
        state.pending_jumpscare = Some(pending);
    }
}

// =============================================================================
// MUSIC BOX
// =============================================================================

fn update_music_box(state: &mut GameState, events: &mut Vec<GameEvent>) {
    if state.is_decided() {
        return;
    }
    let Some(mut music_box) = state.music_box else {
        return;
    };
    if state.tick < music_box.next_attempt {
        return;
    }

    let success = state.rng().one_in(MUSIC_BOX_ODDS);
    if !success {
        music_box.retries += 1;
    }

    if success || music_box.retries >= MUSIC_BOX_MAX_RETRIES {
        if music_box.level >= 3 {
            state.music_box = None;
            start_jumpscare(state, Character::Freddy, events);
            return;
        }
        music_box.level += 1;
        music_box.retries = 0;
        events.push(GameEvent::new(
            state.tick,
            GameEventData::MusicBox {
                level: music_box.level,
            },
        ));
    }

    music_box.next_attempt =
        state.tick + state.ticks(MUSIC_BOX_CADENCE_SECS[music_box.level as usize]);
    state.music_box = Some(music_box);
}

// =============================================================================
// CAMERA
// =============================================================================

/// Garble the feed if a move touched the node on screen.
pub fn garble_on_move(state: &mut GameState, from: Node, to: Node) {
    if state.camera.active && (state.camera.node == from || state.camera.node == to) {
        state.camera.garble_until = Some(state.tick + state.ticks(GARBLE_SECS));
    }
}

fn update_garble(state: &mut GameState) {
    if let Some(until) = state.camera.garble_until {
        if state.tick >= until {
            state.camera.garble_until = None;
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
