//! Character Catalog
//!
//! Identities and the static per-antagonist timing tables.

use serde::{Deserialize, Serialize};

use crate::game::graph::Node;

/// Highest AI aggressiveness level.
pub const MAX_AI_LEVEL: u8 = 20;

/// Upper bound for an admin-customised move time, in seconds.
pub const MAX_MOVE_TIME_SECS: u32 = 60;

/// A playable role.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Character {
    /// Spectating / no role.
    #[default]
    None = 0,
    /// The player in the office.
    Guard = 1,
    /// Stealth antagonist, east side.
    Freddy = 2,
    /// West side.
    Bonnie = 3,
    /// East side.
    Chica = 4,
    /// Fast antagonist, west side.
    Foxy = 5,
}

/// Static tuning for one antagonist.
#[derive(Clone, Copy, Debug)]
pub struct AntagonistProfile {
    /// Node the character starts each match on.
    pub start: Node,
    /// Default (min, max) seconds between player-controlled moves.
    pub move_time_secs: (u32, u32),
    /// Seconds between AI movement opportunities, in hundredths.
    pub ai_interval_centis: u32,
    /// AI level used until an admin changes it.
    pub default_ai_level: u8,
    /// Seconds between reaching the door and the attack resolving.
    pub attack_window_secs: u32,
}

const FREDDY: AntagonistProfile = AntagonistProfile {
    start: Node::ShowStage,
    move_time_secs: (8, 14),
    ai_interval_centis: 302,
    default_ai_level: 3,
    attack_window_secs: 4,
};

const BONNIE: AntagonistProfile = AntagonistProfile {
    start: Node::ShowStage,
    move_time_secs: (5, 10),
    ai_interval_centis: 497,
    default_ai_level: 5,
    attack_window_secs: 6,
};

const CHICA: AntagonistProfile = AntagonistProfile {
    start: Node::ShowStage,
    move_time_secs: (5, 10),
    ai_interval_centis: 498,
    default_ai_level: 5,
    attack_window_secs: 6,
};

const FOXY: AntagonistProfile = AntagonistProfile {
    start: Node::PirateCove,
    move_time_secs: (10, 20),
    ai_interval_centis: 501,
    default_ai_level: 4,
    attack_window_secs: 2,
};

/// AI levels raised when the clock reaches an hour. Hours not listed
/// change nothing.
pub const NIGHT_ESCALATION: &[(u8, &[Character])] = &[
    (2, &[Character::Bonnie]),
    (3, &[Character::Bonnie, Character::Chica, Character::Foxy]),
    (4, &[Character::Bonnie, Character::Chica, Character::Foxy]),
];

impl Character {
    /// All non-Guard roles, in a fixed order used for iteration.
    pub const ANTAGONISTS: [Character; 4] = [
        Character::Freddy,
        Character::Bonnie,
        Character::Chica,
        Character::Foxy,
    ];

    /// Whether this role walks the graph.
    pub fn is_antagonist(self) -> bool {
        self.profile().is_some()
    }

    /// Tuning table for an antagonist.
    pub fn profile(self) -> Option<&'static AntagonistProfile> {
        match self {
            Character::Freddy => Some(&FREDDY),
            Character::Bonnie => Some(&BONNIE),
            Character::Chica => Some(&CHICA),
            Character::Foxy => Some(&FOXY),
            Character::None | Character::Guard => None,
        }
    }

    /// Start node of an antagonist.
    pub fn start_node(self) -> Option<Node> {
        self.profile().map(|p| p.start)
    }

    /// AI move interval in ticks at `tick_rate`, rounded to nearest.
    pub fn ai_interval_ticks(self, tick_rate: u32) -> u64 {
        self.profile()
            .map(|p| (tick_rate as u64 * p.ai_interval_centis as u64 + 50) / 100)
            .unwrap_or(0)
    }

    /// Index into per-antagonist arrays.
    pub(crate) fn antagonist_index(self) -> Option<usize> {
        Self::ANTAGONISTS.iter().position(|c| *c == self)
    }
}
