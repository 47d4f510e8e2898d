//! Lobby Directory
//!
//! Server-wide registry of lobbies by name, plus the nick registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::game::state::SessionId;
use crate::network::lobby::{Lobby, LobbySettings};
use crate::network::protocol::{ErrorCode, LobbyInfo};

/// Longest lobby name.
pub const MAX_LOBBY_NAME_LEN: usize = 32;

/// Longest nick.
pub const MAX_NICK_LEN: usize = 16;

/// Directory errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("Lobby names are 1-32 letters, digits, spaces, '_' or '-'")]
    InvalidLobbyName,

    #[error("A lobby named '{0}' already exists")]
    LobbyExists(String),

    #[error("Nicks are 1-16 letters, digits, '_' or '-'")]
    InvalidNick,

    #[error("Nick '{0}' is taken")]
    NickTaken(String),
}

impl DirectoryError {
    /// Wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            DirectoryError::InvalidLobbyName => ErrorCode::InvalidLobbyName,
            DirectoryError::LobbyExists(_) => ErrorCode::LobbyExists,
            DirectoryError::InvalidNick => ErrorCode::InvalidNick,
            DirectoryError::NickTaken(_) => ErrorCode::NickTaken,
        }
    }
}

/// Check a lobby name.
pub fn validate_lobby_name(name: &str) -> Result<(), DirectoryError> {
    let len = name.chars().count();
    let valid = (1..=MAX_LOBBY_NAME_LEN).contains(&len)
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-'))
        && !name.trim().is_empty();
    if valid {
        Ok(())
    } else {
        Err(DirectoryError::InvalidLobbyName)
    }
}

/// Check a nick.
pub fn validate_nick(nick: &str) -> Result<(), DirectoryError> {
    let len = nick.chars().count();
    let valid = (1..=MAX_NICK_LEN).contains(&len)
        && nick
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(DirectoryError::InvalidNick)
    }
}

/// Lobbies and nicks for the whole server.
pub struct LobbyDirectory {
    lobbies: RwLock<BTreeMap<String, Arc<Lobby>>>,
    nicks: RwLock<BTreeMap<String, SessionId>>,
    tick_rate: u32,
    default_capacity: usize,
}

impl LobbyDirectory {
    /// Empty directory. New lobbies run at `tick_rate` and hold
    /// `default_capacity` members unless asked otherwise.
    pub fn new(tick_rate: u32, default_capacity: usize) -> Self {
        Self {
            lobbies: RwLock::new(BTreeMap::new()),
            nicks: RwLock::new(BTreeMap::new()),
            tick_rate,
            default_capacity,
        }
    }

    // -------------------------------------------------------------------------
    // Nicks
    // -------------------------------------------------------------------------

    /// Give `nick` to `session`, freeing whatever nick it held before.
    pub async fn claim_nick(&self, session: SessionId, nick: &str) -> Result<(), DirectoryError> {
        validate_nick(nick)?;
        let mut nicks = self.nicks.write().await;
        match nicks.get(nick) {
            Some(holder) if *holder != session => {
                return Err(DirectoryError::NickTaken(nick.to_string()))
            }
            Some(_) => return Ok(()),
            None => {}
        }
        nicks.retain(|_, holder| *holder != session);
        nicks.insert(nick.to_string(), session);
        Ok(())
    }

    /// Free every nick held by `session`.
    pub async fn release_nick(&self, session: &SessionId) {
        self.nicks.write().await.retain(|_, holder| holder != session);
    }

    // -------------------------------------------------------------------------
    // Lobbies
    // -------------------------------------------------------------------------

    /// Create a lobby. Fails if the name is invalid or in use.
    pub async fn create(
        &self,
        name: &str,
        hidden: bool,
        password: &str,
        capacity: Option<usize>,
    ) -> Result<Arc<Lobby>, DirectoryError> {
        validate_lobby_name(name)?;
        let mut lobbies = self.lobbies.write().await;
        if lobbies.contains_key(name) {
            return Err(DirectoryError::LobbyExists(name.to_string()));
        }
        let lobby = self.new_lobby(name, hidden, password, capacity);
        lobbies.insert(name.to_string(), Arc::clone(&lobby));
        info!(lobby = %name, hidden, capacity = lobby.capacity(), "Lobby created");
        Ok(lobby)
    }

    /// Existing lobby, or a new visible one using `password`.
    pub async fn get_or_create(
        &self,
        name: &str,
        password: &str,
    ) -> Result<Arc<Lobby>, DirectoryError> {
        validate_lobby_name(name)?;
        let mut lobbies = self.lobbies.write().await;
        if let Some(lobby) = lobbies.get(name) {
            return Ok(Arc::clone(lobby));
        }
        let lobby = self.new_lobby(name, false, password, None);
        lobbies.insert(name.to_string(), Arc::clone(&lobby));
        info!(lobby = %name, "Lobby created on join");
        Ok(lobby)
    }

    fn new_lobby(
        &self,
        name: &str,
        hidden: bool,
        password: &str,
        capacity: Option<usize>,
    ) -> Arc<Lobby> {
        Lobby::new(LobbySettings {
            name: name.to_string(),
            hidden,
            password: password.to_string(),
            capacity: capacity.unwrap_or(self.default_capacity),
            tick_rate: self.tick_rate,
        })
    }

    /// Get a lobby by name.
    pub async fn get(&self, name: &str) -> Option<Arc<Lobby>> {
        self.lobbies.read().await.get(name).cloned()
    }

    /// Visible lobbies, sorted by name.
    pub async fn list(&self) -> Vec<LobbyInfo> {
        let visible: Vec<Arc<Lobby>> = {
            let lobbies = self.lobbies.read().await;
            lobbies.values().filter(|l| !l.is_hidden()).cloned().collect()
        };
        let mut infos = Vec::with_capacity(visible.len());
        for lobby in visible {
            infos.push(lobby.info().await);
        }
        infos
    }

    /// Drop `name` from the directory and dispose it, if it has no members.
    /// Returns true if it was removed.
    pub async fn remove_if_empty(&self, name: &str) -> bool {
        let removed = {
            let mut lobbies = self.lobbies.write().await;
            let Some(lobby) = lobbies.get(name).cloned() else {
                return false;
            };
            if !lobby.is_empty().await {
                return false;
            }
            lobbies.remove(name);
            lobby
        };
        removed.dispose().await;
        debug!(lobby = %name, "Empty lobby removed");
        true
    }

    /// Dispose every lobby.
    pub async fn dispose_all(&self) {
        let lobbies: Vec<Arc<Lobby>> = {
            let mut lobbies = self.lobbies.write().await;
            std::mem::take(&mut *lobbies).into_values().collect()
        };
        for lobby in lobbies {
            lobby.dispose().await;
        }
    }

    pub async fn lobby_count(&self) -> usize {
        self.lobbies.read().await.len()
    }
}
