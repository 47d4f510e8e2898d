//! # Fazbear Multiplayer Server
//!
//! Authoritative lobby and simulation server for an asymmetric horror
//! survival game: one Guard holds the office, players or the AI drive the
//! animatronics.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   FAZBEAR SERVER                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  └── rng.rs      - Per-match Xorshift128+ PRNG, seed hashing │
//! │                                                              │
//! │  game/           - Rules engine (no I/O, no clock)           │
//! │  ├── character.rs- Roles and antagonist tuning               │
//! │  ├── graph.rs    - Building nodes and edges                  │
//! │  ├── input.rs    - Commands and the admission window         │
//! │  ├── state.rs    - Match state and snapshot                  │
//! │  ├── environment.rs - Power, clock, music box, jump-scares   │
//! │  ├── movement.rs - Moves and door attacks                    │
//! │  ├── ai.rs       - AI movement opportunities                 │
//! │  └── tick.rs     - Authoritative simulation step             │
//! │                                                              │
//! │  network/        - Networking (tasks and clocks)             │
//! │  ├── server.rs   - WebSocket server                          │
//! │  ├── protocol.rs - Message types                             │
//! │  ├── directory.rs- Lobby and nick registry                   │
//! │  ├── lobby.rs    - Lobby lifecycle and broadcasts            │
//! │  └── match_loop.rs - Fixed-rate tick driver                  │
//! │                                                              │
//! │  config.rs       - Server settings from the environment      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism
//!
//! `core/` and `game/` never read the clock or the OS RNG. Given the same
//! seed, settings and queued inputs, a match plays out the same way.

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use config::ServerConfig;
pub use crate::core::rng::MatchRng;
pub use game::state::{GameState, SessionId};
pub use network::server::GameServer;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
