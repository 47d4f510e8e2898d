//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every frame is a JSON text message tagged with `"type"`.

use serde::{Deserialize, Serialize};

use crate::game::character::Character;
use crate::game::events::{GameEvent, GameEventData};
use crate::game::graph::Node;
use crate::game::input::GameCommand;
use crate::game::state::Snapshot;
use crate::network::lobby::LobbyPhase;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Choose a display name.
    SetNick { nick: String },

    /// Create a lobby and join it as owner.
    CreateLobby(CreateLobbyRequest),

    /// List visible lobbies.
    ListLobbies,

    /// Join a lobby, creating it if the name is free.
    JoinLobby(JoinLobbyRequest),

    /// Leave the current lobby.
    LeaveLobby,

    /// Pick a role. `none` clears.
    SelectCharacter { character: Character },

    /// Mark ready / not ready.
    Ready {
        #[serde(default = "default_true")]
        value: bool,
    },

    /// Owner tweaks an antagonist.
    Gamemode(GamemodeRequest),

    /// Gameplay command for a tick.
    Input(GameInput),

    /// Keep-alive.
    Ping {
        #[serde(default)]
        timestamp: u64,
    },
}

fn default_true() -> bool {
    true
}

/// Lobby creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateLobbyRequest {
    pub name: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub password: String,
    /// Defaults to the server setting.
    #[serde(default)]
    pub capacity: Option<usize>,
}

/// Lobby join request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinLobbyRequest {
    pub name: String,
    #[serde(default)]
    pub password: String,
}

/// Move-time range in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveTime {
    pub min: u32,
    pub max: u32,
}

/// Antagonist settings change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GamemodeRequest {
    pub character: Character,
    #[serde(default)]
    pub ai_level: Option<u8>,
    #[serde(default)]
    pub move_time: Option<MoveTime>,
}

/// Gameplay input for a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameInput {
    /// Tick the client is on.
    pub tick: u64,
    pub command: GameCommand,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once after the WebSocket handshake.
    Connected { session_id: String, nick: String },

    /// Nick change accepted.
    NickSet { nick: String },

    /// Visible lobbies.
    LobbyList { lobbies: Vec<LobbyInfo> },

    /// You joined a lobby.
    LobbyJoined { lobby: LobbyInfo },

    /// You left a lobby.
    LobbyLeft { name: String },

    /// Someone joined your lobby.
    UserJoined { nick: String },

    /// Someone left your lobby.
    UserLeft { nick: String },

    /// Someone picked a role.
    CharacterSelected { nick: String, character: Character },

    /// Someone toggled ready.
    ReadyChanged { nick: String, ready: bool },

    /// Full match snapshot (every tick).
    State(Snapshot),

    /// An antagonist moved.
    Move {
        character: Character,
        from: Node,
        to: Node,
    },

    /// Jump-scare started.
    Jumpscare { character: Character },

    /// Music box level changed.
    Musicbox { level: u8 },

    /// Countdown second, or -1 when aborted.
    GameCountdown { value: i32 },

    /// Match is running.
    GameStart { tick_rate: u32 },

    /// Match cancelled, back to the lobby.
    GameAbort,

    /// Jump-scare display finished.
    EndJumpscare,

    /// Match over.
    GameEnd { survived: bool },

    /// Keep-alive reply.
    Pong { timestamp: u64, server_time: u64 },

    /// Error message.
    Error(ServerError),
}

/// Public view of a lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyInfo {
    pub name: String,
    /// Owner's nick
    pub owner: Option<String>,
    pub members: Vec<MemberInfo>,
    pub capacity: usize,
    /// Joining needs a password
    pub password: bool,
    pub phase: LobbyPhase,
}

/// Public view of a lobby member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub nick: String,
    pub character: Character,
    pub ready: bool,
}

/// Error message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    pub code: ErrorCode,
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Frame wasn't a valid message
    InvalidMessage,
    /// Nick empty, too long, or bad characters
    InvalidNick,
    /// Nick held by another session
    NickTaken,
    /// Lobby name empty, too long, or bad characters
    InvalidLobbyName,
    /// `create_lobby` for a name in use
    LobbyExists,
    /// Lobby at capacity
    LobbyFull,
    /// Password mismatch
    WrongPassword,
    /// Command needs a lobby
    NotInLobby,
    /// Character held by someone else
    CharacterTaken,
    /// Owner-only command
    NotOwner,
    /// Not allowed in the lobby's current phase
    WrongPhase,
    /// Gamemode rejected
    InvalidGamemode,
    /// Something broke on our side
    InternalError,
}

impl ServerMessage {
    /// Build an error message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError {
            code,
            message: message.into(),
        })
    }
}

/// Translate a rules-engine event into what clients see.
///
/// Events with no wire form (night changes ride on the snapshot, match end
/// is sent by the lobby) return `None`.
pub fn event_message(event: &GameEvent) -> Option<ServerMessage> {
    match &event.data {
        GameEventData::Moved {
            character,
            from,
            to,
        } => Some(ServerMessage::Move {
            character: *character,
            from: *from,
            to: *to,
        }),
        GameEventData::Jumpscare { character } => Some(ServerMessage::Jumpscare {
            character: *character,
        }),
        GameEventData::EndJumpscare => Some(ServerMessage::EndJumpscare),
        GameEventData::MusicBox { level } => Some(ServerMessage::Musicbox { level: *level }),
        GameEventData::NightAdvanced { .. }
        | GameEventData::PowerDown
        | GameEventData::AttackRepelled { .. }
        | GameEventData::Breach { .. }
        | GameEventData::GameOver { .. } => None,
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::graph::Side;
    use crate::game::state::{CameraSnapshot, OfficeSide};

    #[test]
    fn test_parse_input() {
        let json = r#"{"type":"input","tick":42,"command":{"action":"door","side":"left","closed":true}}"#;
        let msg = ClientMessage::from_json(json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Input(GameInput {
                tick: 42,
                command: GameCommand::Door {
                    side: Side::Left,
                    closed: true
                }
            })
        );
    }

    #[test]
    fn test_parse_lobby_messages() {
        let msg = ClientMessage::from_json(r#"{"type":"join_lobby","name":"pizza"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::JoinLobby(JoinLobbyRequest {
                name: "pizza".into(),
                password: String::new()
            })
        );

        let msg = ClientMessage::from_json(r#"{"type":"ready"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ready { value: true });

        let msg = ClientMessage::from_json(
            r#"{"type":"gamemode","character":"foxy","ai_level":12,"move_time":{"min":2,"max":4}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Gamemode(GamemodeRequest {
                character: Character::Foxy,
                ai_level: Some(12),
                move_time: Some(MoveTime { min: 2, max: 4 })
            })
        );

        assert!(ClientMessage::from_json(r#"{"type":"bogus"}"#).is_err());
    }

    #[test]
    fn test_state_message_shape() {
        let msg = ServerMessage::State(Snapshot {
            tick: 7,
            night: 12,
            power: 998,
            right: OfficeSide {
                blocked: false,
                door: true,
                light: false,
            },
            left: OfficeSide::default(),
            camera: CameraSnapshot {
                active: true,
                garble: false,
            },
        });
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "state");
        assert_eq!(value["tick"], 7);
        assert_eq!(value["power"], 998);
        assert_eq!(value["right"]["door"], true);
        assert_eq!(value["camera"]["active"], true);
    }

    #[test]
    fn test_server_message_names() {
        let cases = [
            (ServerMessage::GameCountdown { value: -1 }, "game_countdown"),
            (ServerMessage::GameAbort, "game_abort"),
            (ServerMessage::EndJumpscare, "end_jumpscare"),
            (ServerMessage::Musicbox { level: 2 }, "musicbox"),
            (ServerMessage::GameEnd { survived: true }, "game_end"),
            (ServerMessage::error(ErrorCode::LobbyFull, "full"), "error"),
        ];
        for (msg, name) in cases {
            let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
            assert_eq!(value["type"], name);
        }
    }

    #[test]
    fn test_error_payload() {
        let json = ServerMessage::error(ErrorCode::CharacterTaken, "taken")
            .to_json()
            .unwrap();
        assert_eq!(
            json,
            r#"{"type":"error","code":"character_taken","message":"taken"}"#
        );
    }

    #[test]
    fn test_event_mapping() {
        let moved = GameEvent::new(
            3,
            GameEventData::Moved {
                character: Character::Chica,
                from: Node::Kitchen,
                to: Node::EastHall,
            },
        );
        assert_eq!(
            event_message(&moved),
            Some(ServerMessage::Move {
                character: Character::Chica,
                from: Node::Kitchen,
                to: Node::EastHall
            })
        );

        let night = GameEvent::new(3, GameEventData::NightAdvanced { night: 1 });
        assert_eq!(event_message(&night), None);

        let mb = GameEvent::new(3, GameEventData::MusicBox { level: 0 });
        assert_eq!(event_message(&mb), Some(ServerMessage::Musicbox { level: 0 }));
    }
}
