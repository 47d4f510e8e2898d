//! Rules Engine State
//!
//! Everything the authoritative simulation knows about one lobby's match:
//! office systems, power, clock, antagonist positions and timers, plus the
//! lobby-phase bookkeeping (who plays whom, who is ready).
//!
//! Outside a running match the lobby mutates this directly. While a match
//! runs, only the tick loop does.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::rng::MatchRng;
use crate::game::character::{Character, MAX_AI_LEVEL, MAX_MOVE_TIME_SECS};
use crate::game::graph::{Node, Side};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Power at the start of a match.
pub const START_POWER: u16 = 999;

/// Hour the night starts at.
pub const START_NIGHT: u8 = 12;

/// Reaching this hour ends the match with the Guard surviving.
pub const SURVIVAL_NIGHT: u8 = 6;

// =============================================================================
// SESSION ID
// =============================================================================

/// Unique identifier of a connected session (UUID bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub [u8; 16]);

impl SessionId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Fresh random id.
    pub fn random() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", uuid::Uuid::from_bytes(self.0))
    }
}

// =============================================================================
// OFFICE SYSTEMS
// =============================================================================

/// One side of the office.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfficeSide {
    /// An antagonist got in on this side; door and light are dead
    pub blocked: bool,
    /// Door closed
    pub door: bool,
    /// Hall light on
    pub light: bool,
}

/// The camera monitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Camera {
    /// Monitor raised
    pub active: bool,
    /// Node being viewed
    pub node: Node,
    /// Tick the static clears at, while garbled
    pub garble_until: Option<u64>,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            active: false,
            node: Node::ShowStage,
            garble_until: None,
        }
    }
}

impl Camera {
    /// Feed is showing static.
    pub fn garbled(&self) -> bool {
        self.garble_until.is_some()
    }
}

/// Power-down minigame progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MusicBox {
    /// 0..=3
    pub level: u8,
    /// Failed attempts at this level
    pub retries: u8,
    /// Tick of the next attempt
    pub next_attempt: u64,
}

/// A jump-scare on screen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActiveJumpscare {
    pub character: Character,
    /// Tick the display ends and the match is lost
    pub ends_at: u64,
}

/// A breach waiting for the Guard to lower the camera.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingJumpscare {
    pub character: Character,
    /// Tick the breach happened
    pub since: u64,
    /// Tick the camera was last seen down, reset whenever it is raised
    pub camera_down_since: Option<u64>,
}

/// An antagonist waiting at a door.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttackWindow {
    pub side: Side,
    pub resolves_at: u64,
}

/// How a match ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOutcome {
    Survived,
    Defeated,
}

impl MatchOutcome {
    /// True if the Guard made it to morning.
    pub fn survived(self) -> bool {
        self == MatchOutcome::Survived
    }
}

// =============================================================================
// ANTAGONIST STATE
// =============================================================================

/// Per-antagonist match state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Antagonist {
    pub character: Character,
    /// Current node
    pub node: Node,
    /// Ticks until a player may move this character again
    pub move_timer: u64,
    /// Next AI opportunity, `None` while suppressed
    pub next_ai: Option<u64>,
    /// 0..=20, raised by night escalation during a match
    pub ai_level: u8,
    /// Level each match starts at
    pub configured_level: u8,
    /// Player move-time range, seconds
    pub move_time: (u32, u32),
    /// Open attack, if waiting at a door
    pub attack: Option<AttackWindow>,
    /// Attacks turned away by a closed door this match
    pub failed_attacks: u32,
}

impl Antagonist {
    fn new(character: Character) -> Self {
        let (node, move_time, ai_level) = match character.profile() {
            Some(p) => (p.start, p.move_time_secs, p.default_ai_level),
            None => (Node::ShowStage, (1, 1), 0),
        };
        Self {
            character,
            node,
            move_timer: 0,
            next_ai: None,
            ai_level,
            configured_level: ai_level,
            move_time,
            attack: None,
            failed_attacks: 0,
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Rejected lobby-phase change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RulesError {
    #[error("{0:?} is already taken")]
    CharacterTaken(Character),

    #[error("{0:?} is not an antagonist")]
    NotAntagonist(Character),

    #[error("invalid move time range {min}..={max}")]
    InvalidMoveTime { min: u32, max: u32 },
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Camera part of a snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraSnapshot {
    pub active: bool,
    pub garble: bool,
}

/// What every client receives each tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tick: u64,
    pub night: u8,
    pub power: u16,
    pub right: OfficeSide,
    pub left: OfficeSide,
    pub camera: CameraSnapshot,
}

// =============================================================================
// GAME STATE
// =============================================================================

/// The Rules Engine record for one lobby.
#[derive(Clone, Debug)]
pub struct GameState {
    /// Ticks per second this match runs at
    pub tick_rate: u32,
    /// Last simulated tick; 0 before the first
    pub tick: u64,
    /// Hour on the clock, 1..=12
    pub night: u8,
    /// 0..=999
    pub power: u16,
    pub left: OfficeSide,
    pub right: OfficeSide,
    pub camera: Camera,
    pub power_down: bool,
    /// Running only during power-down
    pub music_box: Option<MusicBox>,
    pub jumpscare: Option<ActiveJumpscare>,
    pub pending_jumpscare: Option<PendingJumpscare>,
    /// Indexed like [`Character::ANTAGONISTS`]
    pub antagonists: [Antagonist; 4],
    pub outcome: Option<MatchOutcome>,

    assignments: BTreeMap<SessionId, Character>,
    ready: BTreeSet<SessionId>,
    rng: MatchRng,
}

impl GameState {
    /// Fresh lobby-phase state.
    pub fn new(tick_rate: u32) -> Self {
        Self {
            tick_rate,
            tick: 0,
            night: START_NIGHT,
            power: START_POWER,
            left: OfficeSide::default(),
            right: OfficeSide::default(),
            camera: Camera::default(),
            power_down: false,
            music_box: None,
            jumpscare: None,
            pending_jumpscare: None,
            antagonists: Character::ANTAGONISTS.map(Antagonist::new),
            outcome: None,
            assignments: BTreeMap::new(),
            ready: BTreeSet::new(),
            rng: MatchRng::default(),
        }
    }

    /// Replace the match state with a fresh one.
    ///
    /// Character assignments and gamemode settings survive; readiness
    /// does not.
    pub fn reset(&mut self) {
        let mut fresh = Self::new(self.tick_rate);
        fresh.assignments = std::mem::take(&mut self.assignments);
        for (slot, old) in fresh.antagonists.iter_mut().zip(self.antagonists.iter()) {
            slot.ai_level = old.configured_level;
            slot.configured_level = old.configured_level;
            slot.move_time = old.move_time;
        }
        *self = fresh;
    }

    /// Prepare a new match: positions, timers and systems back to start,
    /// AI opportunities scheduled, ready set cleared, RNG reseeded.
    pub fn begin_match(&mut self, seed: u64) {
        self.reset();
        self.rng = MatchRng::new(seed);

        let rate = self.tick_rate;
        for a in self.antagonists.iter_mut() {
            a.next_ai = Some(a.character.ai_interval_ticks(rate));
        }
    }

    // -------------------------------------------------------------------------
    // Assignments
    // -------------------------------------------------------------------------

    /// Character held by `session`, `None` if unassigned.
    pub fn character_of(&self, session: &SessionId) -> Character {
        self.assignments
            .get(session)
            .copied()
            .unwrap_or(Character::None)
    }

    /// Session holding `character`.
    pub fn holder_of(&self, character: Character) -> Option<SessionId> {
        if character == Character::None {
            return None;
        }
        self.assignments
            .iter()
            .find(|(_, c)| **c == character)
            .map(|(s, _)| *s)
    }

    /// Give `character` to `session`. `Character::None` clears.
    pub fn assign_character(
        &mut self,
        session: SessionId,
        character: Character,
    ) -> Result<(), RulesError> {
        if character == Character::None {
            self.assignments.remove(&session);
            return Ok(());
        }
        match self.holder_of(character) {
            Some(holder) if holder != session => Err(RulesError::CharacterTaken(character)),
            _ => {
                self.assignments.insert(session, character);
                Ok(())
            }
        }
    }

    /// Free whatever `session` holds. Returns the released character.
    pub fn release_character(&mut self, session: &SessionId) -> Character {
        let released = self.assignments.remove(session).unwrap_or(Character::None);
        if released.is_antagonist() && self.tick > 0 && !self.power_down {
            // AI takes over from the next interval
            let next = self.tick + released.ai_interval_ticks(self.tick_rate);
            if let Some(a) = self.antagonist_mut(released) {
                if a.attack.is_none() {
                    a.next_ai = Some(next);
                }
            }
        }
        released
    }

    /// All current assignments.
    pub fn assignments(&self) -> impl Iterator<Item = (&SessionId, &Character)> {
        self.assignments.iter()
    }

    // -------------------------------------------------------------------------
    // Readiness
    // -------------------------------------------------------------------------

    /// Mark or clear readiness. Returns true if it changed.
    pub fn set_ready(&mut self, session: SessionId, ready: bool) -> bool {
        if ready {
            self.ready.insert(session)
        } else {
            self.ready.remove(&session)
        }
    }

    pub fn is_ready(&self, session: &SessionId) -> bool {
        self.ready.contains(session)
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    /// Forget a session that left outside a match.
    pub fn remove_session(&mut self, session: &SessionId) {
        self.ready.remove(session);
        self.assignments.remove(session);
    }

    // -------------------------------------------------------------------------
    // Gamemode
    // -------------------------------------------------------------------------

    /// Adjust an antagonist's AI level and/or move-time range.
    ///
    /// Levels above the maximum are clamped. Move times must satisfy
    /// `1 <= min <= max <= 60`.
    pub fn configure_antagonist(
        &mut self,
        character: Character,
        ai_level: Option<u8>,
        move_time: Option<(u32, u32)>,
    ) -> Result<(), RulesError> {
        if let Some((min, max)) = move_time {
            if min < 1 || min > max || max > MAX_MOVE_TIME_SECS {
                return Err(RulesError::InvalidMoveTime { min, max });
            }
        }
        let a = self
            .antagonist_mut(character)
            .ok_or(RulesError::NotAntagonist(character))?;
        if let Some(level) = ai_level {
            a.ai_level = level.min(MAX_AI_LEVEL);
            a.configured_level = a.ai_level;
        }
        if let Some(range) = move_time {
            a.move_time = range;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn antagonist(&self, character: Character) -> Option<&Antagonist> {
        let idx = character.antagonist_index()?;
        Some(&self.antagonists[idx])
    }

    pub fn antagonist_mut(&mut self, character: Character) -> Option<&mut Antagonist> {
        let idx = character.antagonist_index()?;
        Some(&mut self.antagonists[idx])
    }

    pub fn side(&self, side: Side) -> &OfficeSide {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut OfficeSide {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    pub(crate) fn rng(&mut self) -> &mut MatchRng {
        &mut self.rng
    }

    /// A jump-scare is playing or the match has ended.
    pub fn is_decided(&self) -> bool {
        self.outcome.is_some() || self.jumpscare.is_some()
    }

    /// `secs` seconds in ticks.
    pub fn ticks(&self, secs: u32) -> u64 {
        secs as u64 * self.tick_rate as u64
    }

    /// Client-facing view.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            tick: self.tick,
            night: self.night,
            power: self.power,
            right: self.right,
            left: self.left,
            camera: CameraSnapshot {
                active: self.camera.active,
                garble: self.camera.garbled(),
            },
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(b: u8) -> SessionId {
        SessionId::new([b; 16])
    }

    #[test]
    fn test_new_state() {
        let state = GameState::new(10);
        assert_eq!(state.night, 12);
        assert_eq!(state.power, 999);
        assert_eq!(state.tick, 0);
        assert!(!state.power_down);
        assert!(!state.is_decided());
        assert_eq!(state.antagonist(Character::Foxy).unwrap().node, Node::PirateCove);
        assert_eq!(state.antagonist(Character::Bonnie).unwrap().node, Node::ShowStage);
    }

    #[test]
    fn test_character_uniqueness() {
        let mut state = GameState::new(10);
        assert!(state.assign_character(sid(1), Character::Guard).is_ok());
        assert_eq!(
            state.assign_character(sid(2), Character::Guard),
            Err(RulesError::CharacterTaken(Character::Guard))
        );
        // Re-selecting your own character is fine
        assert!(state.assign_character(sid(1), Character::Guard).is_ok());

        // Switching frees the old one
        assert!(state.assign_character(sid(1), Character::Chica).is_ok());
        assert!(state.assign_character(sid(2), Character::Guard).is_ok());
        assert_eq!(state.holder_of(Character::Chica), Some(sid(1)));

        assert!(state.assign_character(sid(1), Character::None).is_ok());
        assert_eq!(state.character_of(&sid(1)), Character::None);
        assert_eq!(state.holder_of(Character::None), None);
    }

    #[test]
    fn test_ready_set() {
        let mut state = GameState::new(10);
        assert!(state.set_ready(sid(1), true));
        assert!(!state.set_ready(sid(1), true));
        assert_eq!(state.ready_count(), 1);
        assert!(state.set_ready(sid(1), false));
        assert!(!state.is_ready(&sid(1)));
    }

    #[test]
    fn test_configure_antagonist() {
        let mut state = GameState::new(10);
        state
            .configure_antagonist(Character::Bonnie, Some(50), Some((2, 4)))
            .unwrap();
        let bonnie = state.antagonist(Character::Bonnie).unwrap();
        assert_eq!(bonnie.ai_level, 20);
        assert_eq!(bonnie.move_time, (2, 4));

        assert_eq!(
            state.configure_antagonist(Character::Guard, Some(1), None),
            Err(RulesError::NotAntagonist(Character::Guard))
        );
        assert!(state
            .configure_antagonist(Character::Foxy, None, Some((0, 5)))
            .is_err());
        assert!(state
            .configure_antagonist(Character::Foxy, None, Some((6, 5)))
            .is_err());
        assert!(state
            .configure_antagonist(Character::Foxy, None, Some((5, 61)))
            .is_err());
    }

    #[test]
    fn test_begin_match_resets_and_schedules() {
        let mut state = GameState::new(10);
        state.assign_character(sid(1), Character::Guard).unwrap();
        state.set_ready(sid(1), true);
        state.configure_antagonist(Character::Freddy, Some(9), None).unwrap();
        state.power = 10;
        state.tick = 400;
        state.antagonists[0].node = Node::Kitchen;

        state.begin_match(42);

        assert_eq!(state.tick, 0);
        assert_eq!(state.power, START_POWER);
        assert_eq!(state.ready_count(), 0);
        assert_eq!(state.character_of(&sid(1)), Character::Guard);
        let freddy = state.antagonist(Character::Freddy).unwrap();
        assert_eq!(freddy.node, Node::ShowStage);
        assert_eq!(freddy.ai_level, 9);
        assert_eq!(freddy.next_ai, Some(30));
    }

    #[test]
    fn test_rematch_drops_escalation() {
        let mut state = GameState::new(10);
        state.configure_antagonist(Character::Chica, Some(7), None).unwrap();
        state.begin_match(1);

        state.night = 1;
        let mut events = Vec::new();
        for _ in 0..3 {
            crate::game::environment::advance_night(&mut state, &mut events);
        }
        assert_eq!(state.antagonist(Character::Bonnie).unwrap().ai_level, 8);
        assert!(state.antagonist(Character::Chica).unwrap().ai_level > 7);

        state.begin_match(2);
        assert_eq!(state.antagonist(Character::Bonnie).unwrap().ai_level, 5);
        assert_eq!(state.antagonist(Character::Chica).unwrap().ai_level, 7);

        state.antagonist_mut(Character::Bonnie).unwrap().ai_level = 12;
        state.reset();
        assert_eq!(state.antagonist(Character::Bonnie).unwrap().ai_level, 5);
    }

    #[test]
    fn test_snapshot_shape() {
        let mut state = GameState::new(10);
        state.right.door = true;
        state.camera.active = true;
        state.camera.garble_until = Some(5);

        let json = serde_json::to_value(state.snapshot()).unwrap();
        assert_eq!(json["night"], 12);
        assert_eq!(json["power"], 999);
        assert_eq!(json["right"]["door"], true);
        assert_eq!(json["left"]["blocked"], false);
        assert_eq!(json["camera"]["active"], true);
        assert_eq!(json["camera"]["garble"], true);
    }

    #[test]
    fn test_session_id_display() {
        let id = SessionId::random();
        let parsed = uuid::Uuid::parse_str(&id.to_string()).unwrap();
        assert_eq!(parsed.as_bytes(), id.as_bytes());
    }
}
