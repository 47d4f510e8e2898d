//! Pizzeria Location Graph
//!
//! Static node set and per-character adjacency tables. Node ids double as
//! camera ids on the wire.

use serde::{Deserialize, Serialize};

use crate::game::character::Character;

/// Office side a door, light or attack belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// West door.
    Left,
    /// East door.
    Right,
}

/// A location in the building.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum Node {
    /// Cam 1A
    ShowStage = 0,
    /// Cam 1B
    DiningArea = 1,
    /// Cam 1C
    PirateCove = 2,
    /// Cam 2A
    WestHall = 3,
    /// Cam 2B
    WestHallCorner = 4,
    /// Cam 3
    SupplyCloset = 5,
    /// Cam 4A
    EastHall = 6,
    /// Cam 4B
    EastHallCorner = 7,
    /// Cam 5
    Backstage = 8,
    /// Cam 6 (audio only)
    Kitchen = 9,
    /// Cam 7
    Restrooms = 10,
    /// Outside the west door of the office.
    LeftDoor = 11,
    /// Outside the east door of the office.
    RightDoor = 12,
}

/// Rejected node id on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown node id {0}")]
pub struct UnknownNode(pub u8);

impl Node {
    /// Every node, indexed by id.
    pub const ALL: [Node; 13] = [
        Node::ShowStage,
        Node::DiningArea,
        Node::PirateCove,
        Node::WestHall,
        Node::WestHallCorner,
        Node::SupplyCloset,
        Node::EastHall,
        Node::EastHallCorner,
        Node::Backstage,
        Node::Kitchen,
        Node::Restrooms,
        Node::LeftDoor,
        Node::RightDoor,
    ];

    /// Numeric id.
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Look a node up by id.
    pub fn from_id(id: u8) -> Option<Node> {
        Self::ALL.get(id as usize).copied()
    }

    /// Side of the office this node attacks, if it is a door node.
    pub fn attack_side(self) -> Option<Side> {
        match self {
            Node::LeftDoor => Some(Side::Left),
            Node::RightDoor => Some(Side::Right),
            _ => None,
        }
    }

    /// True for the two door nodes.
    pub fn is_attack_node(self) -> bool {
        self.attack_side().is_some()
    }
}

impl From<Node> for u8 {
    fn from(node: Node) -> u8 {
        node.id()
    }
}

impl TryFrom<u8> for Node {
    type Error = UnknownNode;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Node::from_id(id).ok_or(UnknownNode(id))
    }
}

use Node::*;

// West wing, walked by Bonnie
const BONNIE_EDGES: &[(Node, &[Node])] = &[
    (ShowStage, &[DiningArea]),
    (DiningArea, &[ShowStage, Backstage, WestHall]),
    (Backstage, &[DiningArea, WestHall]),
    (WestHall, &[DiningArea, SupplyCloset, WestHallCorner, LeftDoor]),
    (SupplyCloset, &[WestHall, WestHallCorner]),
    (WestHallCorner, &[WestHall, SupplyCloset, LeftDoor]),
];

// East wing, shared by Chica and Freddy
const EAST_EDGES: &[(Node, &[Node])] = &[
    (ShowStage, &[DiningArea]),
    (DiningArea, &[ShowStage, Restrooms, Kitchen, EastHall]),
    (Restrooms, &[DiningArea, Kitchen]),
    (Kitchen, &[DiningArea, Restrooms, EastHall]),
    (EastHall, &[Kitchen, EastHallCorner, DiningArea]),
    (EastHallCorner, &[EastHall, RightDoor]),
];

const FOXY_EDGES: &[(Node, &[Node])] = &[(PirateCove, &[WestHall]), (WestHall, &[LeftDoor])];

const FREDDY_ROUTE: &[Node] = &[
    ShowStage,
    DiningArea,
    Restrooms,
    Kitchen,
    EastHall,
    EastHallCorner,
    RightDoor,
];

const FOXY_ROUTE: &[Node] = &[PirateCove, WestHall, LeftDoor];

fn edges(character: Character) -> &'static [(Node, &'static [Node])] {
    match character {
        Character::Bonnie => BONNIE_EDGES,
        Character::Chica | Character::Freddy => EAST_EDGES,
        Character::Foxy => FOXY_EDGES,
        Character::None | Character::Guard => &[],
    }
}

/// Nodes `character` may step to from `from`.
pub fn neighbors(character: Character, from: Node) -> &'static [Node] {
    edges(character)
        .iter()
        .find(|(node, _)| *node == from)
        .map(|(_, next)| *next)
        .unwrap_or(&[])
}

/// Whether `from → to` is an edge of `character`'s graph.
pub fn is_adjacent(character: Character, from: Node, to: Node) -> bool {
    neighbors(character, from).contains(&to)
}

/// Candidate nodes a repelled `character` falls back to.
pub fn repel_targets(character: Character) -> &'static [Node] {
    match character {
        Character::Freddy => &[EastHall],
        Character::Bonnie => &[DiningArea, Backstage],
        Character::Chica => &[DiningArea, Restrooms],
        Character::Foxy => &[PirateCove],
        Character::None | Character::Guard => &[],
    }
}

/// Next step on a fixed route, for characters that walk one.
pub fn next_on_route(character: Character, current: Node) -> Option<Node> {
    let route = match character {
        Character::Freddy => FREDDY_ROUTE,
        Character::Foxy => FOXY_ROUTE,
        _ => return None,
    };
    let idx = route.iter().position(|n| *n == current)?;
    route.get(idx + 1).copied()
}
