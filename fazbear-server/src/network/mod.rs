//! Network Layer
//!
//! WebSocket server, lobbies and the match loop.
//! This layer owns clocks and tasks - all game rules run through `game/`.

pub mod directory;
pub mod lobby;
pub mod match_loop;
pub mod protocol;
pub mod server;

pub use directory::{DirectoryError, LobbyDirectory};
pub use lobby::{Lobby, LobbyCommand, LobbyError, LobbyPhase, LobbySettings, Member};
pub use match_loop::TickSchedule;
pub use protocol::{ClientMessage, ErrorCode, GameInput, LobbyInfo, MemberInfo, ServerMessage};
pub use server::{ClientSession, GameServer, GameServerError};
