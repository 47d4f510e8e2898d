//! WebSocket Game Server
//!
//! Async WebSocket server for multiplayer connections.
//! Each connection gets a session with a nick and at most one lobby;
//! parsed messages are routed to the directory or the session's lobby.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::{sleep_until, Instant};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::config::ServerConfig;
use crate::game::state::SessionId;
use crate::network::directory::{DirectoryError, LobbyDirectory};
use crate::network::lobby::{Lobby, LobbyCommand, LobbyError, Member};
use crate::network::protocol::{
    ClientMessage, CreateLobbyRequest, ErrorCode, GamemodeRequest, JoinLobbyRequest,
    ServerMessage,
};

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Anything a handler can reject a request with.
#[derive(Debug, thiserror::Error)]
enum RequestError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Lobby(#[from] LobbyError),

    #[error("Join a lobby first")]
    NotInLobby,

    #[error("Leave your lobby first")]
    InLobby,
}

impl RequestError {
    fn code(&self) -> ErrorCode {
        match self {
            RequestError::Directory(e) => e.code(),
            RequestError::Lobby(e) => e.code(),
            RequestError::NotInLobby => ErrorCode::NotInLobby,
            RequestError::InLobby => ErrorCode::WrongPhase,
        }
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// One connected client.
pub struct ClientSession {
    pub id: SessionId,
    pub nick: String,
    lobby: Option<Arc<Lobby>>,
    sender: mpsc::Sender<ServerMessage>,
}

impl ClientSession {
    /// New session with a generated nick.
    pub fn new(id: SessionId, sender: mpsc::Sender<ServerMessage>) -> Self {
        let b = id.as_bytes();
        Self {
            id,
            nick: format!("guest-{:02x}{:02x}{:02x}", b[0], b[1], b[2]),
            lobby: None,
            sender,
        }
    }

    /// Lobby this session is in.
    pub fn lobby(&self) -> Option<&Arc<Lobby>> {
        self.lobby.as_ref()
    }

    /// Queue a message for this connection. Never waits on the socket.
    fn reply(&self, message: ServerMessage) -> bool {
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(e) => {
                debug!(session = %self.id, nick = %self.nick, "Dropping reply: {}", e);
                false
            }
        }
    }

    fn member(&self) -> Member {
        Member::new(self.id, self.nick.clone(), self.sender.clone())
    }
}

// =============================================================================
// SERVER
// =============================================================================

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: Arc<ServerConfig>,
    /// Lobbies and nicks.
    directory: Arc<LobbyDirectory>,
    /// Live connections.
    clients: Arc<RwLock<BTreeMap<SessionId, SocketAddr>>>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let directory = LobbyDirectory::new(config.tick_rate, config.lobby_capacity);

        Self {
            config: Arc::new(config),
            directory: Arc::new(directory),
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Run the server until [`shutdown`](Self::shutdown) is called.
    #[instrument(skip(self), fields(addr = %self.config.bind_addr))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!(
            tick_rate = self.config.tick_rate,
            lobby_capacity = self.config.lobby_capacity,
            "Game server listening on {}",
            self.config.bind_addr
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.directory.dispose_all().await;
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let directory = self.directory.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(config.outbound_buffer);

            let mut session = ClientSession::new(SessionId::random(), msg_tx);
            if let Err(e) = directory.claim_nick(session.id, &session.nick).await {
                debug!(session = %session.id, "Generated nick unavailable: {}", e);
            }
            clients.write().await.insert(session.id, addr);

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            session
                .reply(ServerMessage::Connected {
                    session_id: session.id.to_string(),
                    nick: session.nick.clone(),
                });

            let mut last_activity = Instant::now();

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        last_activity = Instant::now();
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        session
                                            .reply(ServerMessage::error(
                                                ErrorCode::InvalidMessage,
                                                "Invalid message format",
                                            ));
                                        continue;
                                    }
                                };

                                Self::handle_client_message(&directory, &mut session, client_msg).await;
                            }
                            Some(Ok(Message::Binary(_))) => {
                                session
                                    .reply(ServerMessage::error(
                                        ErrorCode::InvalidMessage,
                                        "Binary frames are not supported",
                                    ));
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = sleep_until(last_activity + config.connection_timeout) => {
                        info!("Dropping idle client {}", addr);
                        break;
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            // Cleanup
            Self::disconnect(&directory, &mut session).await;
            clients.write().await.remove(&session.id);
            drop(session);
            sender_task.abort();

            info!("Client {} cleaned up", addr);
        });
    }

    /// Route a client message.
    pub async fn handle_client_message(
        directory: &LobbyDirectory,
        session: &mut ClientSession,
        msg: ClientMessage,
    ) {
        let result = match msg {
            ClientMessage::SetNick { nick } => Self::handle_set_nick(directory, session, nick).await,
            ClientMessage::CreateLobby(req) => Self::handle_create(directory, session, req).await,
            ClientMessage::ListLobbies => {
                let lobbies = directory.list().await;
                session.reply(ServerMessage::LobbyList { lobbies });
                Ok(())
            }
            ClientMessage::JoinLobby(req) => Self::handle_join(directory, session, req).await,
            ClientMessage::LeaveLobby => {
                if session.lobby.is_none() {
                    Err(RequestError::NotInLobby)
                } else {
                    Self::leave_current(directory, session).await;
                    Ok(())
                }
            }
            ClientMessage::SelectCharacter { character } => {
                Self::lobby_command(session, LobbyCommand::SelectCharacter(character)).await
            }
            ClientMessage::Ready { value } => {
                Self::lobby_command(session, LobbyCommand::Ready(value)).await
            }
            ClientMessage::Gamemode(GamemodeRequest {
                character,
                ai_level,
                move_time,
            }) => {
                let command = LobbyCommand::Gamemode {
                    character,
                    ai_level,
                    move_time,
                };
                Self::lobby_command(session, command).await
            }
            ClientMessage::Input(input) => {
                // Inputs outside a match or the admission window are dropped quietly
                if let Some(lobby) = &session.lobby {
                    lobby
                        .enqueue_if_in_game(session.id, input.command, input.tick)
                        .await;
                }
                Ok(())
            }
            ClientMessage::Ping { timestamp } => {
                let server_time = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as u64;
                session
                    .reply(ServerMessage::Pong {
                        timestamp,
                        server_time,
                    });
                Ok(())
            }
        };

        if let Err(e) = result {
            debug!(session = %session.id, nick = %session.nick, "Request rejected: {}", e);
            session.reply(ServerMessage::error(e.code(), e.to_string()));
        }
    }

    async fn handle_set_nick(
        directory: &LobbyDirectory,
        session: &mut ClientSession,
        nick: String,
    ) -> Result<(), RequestError> {
        if session.lobby.is_some() {
            return Err(RequestError::InLobby);
        }
        directory.claim_nick(session.id, &nick).await?;
        info!(session = %session.id, old = %session.nick, new = %nick, "Nick changed");
        session.nick = nick.clone();
        session.reply(ServerMessage::NickSet { nick });
        Ok(())
    }

    async fn handle_create(
        directory: &LobbyDirectory,
        session: &mut ClientSession,
        req: CreateLobbyRequest,
    ) -> Result<(), RequestError> {
        let lobby = directory
            .create(&req.name, req.hidden, &req.password, req.capacity)
            .await?;
        Self::leave_current(directory, session).await;
        Self::enter(directory, session, lobby, &req.password).await
    }

    async fn handle_join(
        directory: &LobbyDirectory,
        session: &mut ClientSession,
        req: JoinLobbyRequest,
    ) -> Result<(), RequestError> {
        if session.lobby.as_ref().is_some_and(|l| l.name() == req.name) {
            return Err(LobbyError::AlreadyMember.into());
        }
        let lobby = directory.get_or_create(&req.name, &req.password).await?;
        Self::leave_current(directory, session).await;
        Self::enter(directory, session, lobby, &req.password).await
    }

    async fn enter(
        directory: &LobbyDirectory,
        session: &mut ClientSession,
        lobby: Arc<Lobby>,
        password: &str,
    ) -> Result<(), RequestError> {
        let joined = lobby.join(session.member(), password).await;
        match joined {
            Ok(()) => {
                session.lobby = Some(lobby);
                Ok(())
            }
            Err(e) => {
                directory.remove_if_empty(lobby.name()).await;
                Err(e.into())
            }
        }
    }

    async fn lobby_command(session: &ClientSession, command: LobbyCommand) -> Result<(), RequestError> {
        let lobby = session.lobby.as_ref().ok_or(RequestError::NotInLobby)?;
        lobby.handle_lobby_command(session.id, command).await?;
        Ok(())
    }

    /// Leave the session's lobby, removing it if that emptied it.
    async fn leave_current(directory: &LobbyDirectory, session: &mut ClientSession) {
        let Some(lobby) = session.lobby.take() else {
            return;
        };
        match lobby.leave(&session.id).await {
            Ok(true) => {
                directory.remove_if_empty(lobby.name()).await;
            }
            Ok(false) => {}
            Err(e) => debug!(session = %session.id, lobby = %lobby.name(), "Leave failed: {}", e),
        }
    }

    /// Connection closed: leave the lobby and free the nick.
    pub async fn disconnect(directory: &LobbyDirectory, session: &mut ClientSession) {
        Self::leave_current(directory, session).await;
        directory.release_nick(&session.id).await;
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Get lobby count.
    pub async fn lobby_count(&self) -> usize {
        self.directory.lobby_count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::character::Character;
    use crate::network::lobby::LobbyPhase;
    use std::time::Duration;

    fn client(b: u8) -> (ClientSession, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(256);
        (ClientSession::new(SessionId::new([b; 16]), tx), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn error_code(messages: &[ServerMessage]) -> Option<ErrorCode> {
        messages.iter().find_map(|m| match m {
            ServerMessage::Error(e) => Some(e.code),
            _ => None,
        })
    }

    fn join(name: &str, password: &str) -> ClientMessage {
        ClientMessage::JoinLobby(JoinLobbyRequest {
            name: name.into(),
            password: password.into(),
        })
    }

    #[test]
    fn test_generated_nick() {
        let (session, _rx) = client(0xab);
        assert_eq!(session.nick, "guest-ababab");
    }

    #[tokio::test]
    async fn test_server_creation() {
        let config = ServerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Default::default()
        };
        let server = GameServer::new(config);

        assert_eq!(server.connection_count().await, 0);
        assert_eq!(server.lobby_count().await, 0);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_full_outbound_queue_drops_reply() {
        let dir = LobbyDirectory::new(10, 5);
        let (tx, mut rx) = mpsc::channel(1);
        let mut session = ClientSession::new(SessionId::new([5; 16]), tx);

        let ping = || ClientMessage::Ping { timestamp: 1 };
        GameServer::handle_client_message(&dir, &mut session, ping()).await;
        // Queue is full now; the next reply must not wait for the writer
        tokio::time::timeout(
            Duration::from_secs(1),
            GameServer::handle_client_message(&dir, &mut session, ping()),
        )
        .await
        .expect("reply blocked on a full queue");

        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn test_set_nick() {
        let dir = LobbyDirectory::new(10, 5);
        let (mut a, mut a_rx) = client(1);
        let (mut b, mut b_rx) = client(2);

        GameServer::handle_client_message(&dir, &mut a, ClientMessage::SetNick { nick: "mike".into() }).await;
        assert_eq!(drain(&mut a_rx), vec![ServerMessage::NickSet { nick: "mike".into() }]);
        assert_eq!(a.nick, "mike");

        GameServer::handle_client_message(&dir, &mut b, ClientMessage::SetNick { nick: "mike".into() }).await;
        assert_eq!(error_code(&drain(&mut b_rx)), Some(ErrorCode::NickTaken));

        GameServer::handle_client_message(&dir, &mut b, ClientMessage::SetNick { nick: "no way".into() }).await;
        assert_eq!(error_code(&drain(&mut b_rx)), Some(ErrorCode::InvalidNick));

        // Not while in a lobby
        GameServer::handle_client_message(&dir, &mut a, join("office", "")).await;
        drain(&mut a_rx);
        GameServer::handle_client_message(&dir, &mut a, ClientMessage::SetNick { nick: "phone_guy".into() }).await;
        assert_eq!(error_code(&drain(&mut a_rx)), Some(ErrorCode::WrongPhase));
    }

    #[tokio::test]
    async fn test_join_list_leave() {
        let dir = LobbyDirectory::new(10, 5);
        let (mut a, mut a_rx) = client(1);
        let (mut b, mut b_rx) = client(2);

        GameServer::handle_client_message(&dir, &mut a, join("office", "pw")).await;
        assert!(matches!(drain(&mut a_rx)[0], ServerMessage::LobbyJoined { .. }));

        GameServer::handle_client_message(&dir, &mut b, join("office", "wrong")).await;
        assert_eq!(error_code(&drain(&mut b_rx)), Some(ErrorCode::WrongPassword));
        assert!(b.lobby().is_none());

        GameServer::handle_client_message(&dir, &mut b, join("office", "pw")).await;
        assert!(b.lobby().is_some());

        GameServer::handle_client_message(&dir, &mut b, ClientMessage::ListLobbies).await;
        let msgs = drain(&mut b_rx);
        let Some(ServerMessage::LobbyList { lobbies }) = msgs.last() else {
            panic!("expected lobby list, got {:?}", msgs);
        };
        assert_eq!(lobbies.len(), 1);
        assert_eq!(lobbies[0].members.len(), 2);
        assert_eq!(lobbies[0].owner.as_deref(), Some(a.nick.as_str()));

        GameServer::handle_client_message(&dir, &mut a, ClientMessage::LeaveLobby).await;
        GameServer::handle_client_message(&dir, &mut b, ClientMessage::LeaveLobby).await;
        assert_eq!(dir.lobby_count().await, 0);

        GameServer::handle_client_message(&dir, &mut b, ClientMessage::LeaveLobby).await;
        assert_eq!(error_code(&drain(&mut b_rx)), Some(ErrorCode::NotInLobby));
    }

    #[tokio::test]
    async fn test_create_existing_lobby() {
        let dir = LobbyDirectory::new(10, 5);
        let (mut a, _a_rx) = client(1);
        let (mut b, mut b_rx) = client(2);
        let create = || {
            ClientMessage::CreateLobby(CreateLobbyRequest {
                name: "stage".into(),
                hidden: false,
                password: String::new(),
                capacity: Some(2),
            })
        };

        GameServer::handle_client_message(&dir, &mut a, create()).await;
        assert_eq!(a.lobby().map(|l| l.capacity()), Some(2));

        GameServer::handle_client_message(&dir, &mut b, create()).await;
        assert_eq!(error_code(&drain(&mut b_rx)), Some(ErrorCode::LobbyExists));
    }

    #[tokio::test]
    async fn test_lobby_commands_need_lobby() {
        let dir = LobbyDirectory::new(10, 5);
        let (mut a, mut a_rx) = client(1);
        GameServer::handle_client_message(
            &dir,
            &mut a,
            ClientMessage::SelectCharacter {
                character: Character::Guard,
            },
        )
        .await;
        assert_eq!(error_code(&drain(&mut a_rx)), Some(ErrorCode::NotInLobby));
    }

    #[tokio::test]
    async fn test_character_taken_reply() {
        let dir = LobbyDirectory::new(10, 5);
        let (mut a, _a_rx) = client(1);
        let (mut b, mut b_rx) = client(2);
        let pick = ClientMessage::SelectCharacter {
            character: Character::Guard,
        };

        GameServer::handle_client_message(&dir, &mut a, join("office", "")).await;
        GameServer::handle_client_message(&dir, &mut b, join("office", "")).await;
        GameServer::handle_client_message(&dir, &mut a, pick.clone()).await;
        drain(&mut b_rx);
        GameServer::handle_client_message(&dir, &mut b, pick).await;
        assert_eq!(error_code(&drain(&mut b_rx)), Some(ErrorCode::CharacterTaken));
    }

    #[tokio::test]
    async fn test_ping() {
        let dir = LobbyDirectory::new(10, 5);
        let (mut a, mut a_rx) = client(1);
        GameServer::handle_client_message(&dir, &mut a, ClientMessage::Ping { timestamp: 77 }).await;
        match drain(&mut a_rx).as_slice() {
            [ServerMessage::Pong { timestamp, server_time }] => {
                assert_eq!(*timestamp, 77);
                assert!(*server_time > 0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_mid_countdown() {
        let dir = LobbyDirectory::new(10, 5);
        let (mut a, _a_rx) = client(1);
        let (mut b, mut b_rx) = client(2);

        GameServer::handle_client_message(&dir, &mut a, join("office", "")).await;
        GameServer::handle_client_message(&dir, &mut b, join("office", "")).await;
        GameServer::handle_client_message(&dir, &mut a, ClientMessage::Ready { value: true }).await;
        GameServer::handle_client_message(&dir, &mut b, ClientMessage::Ready { value: true }).await;
        let lobby = dir.get("office").await.unwrap();
        assert_eq!(lobby.phase().await, LobbyPhase::Starting);
        drain(&mut b_rx);

        GameServer::disconnect(&dir, &mut a).await;
        assert_eq!(lobby.phase().await, LobbyPhase::Lobby);
        assert!(drain(&mut b_rx).contains(&ServerMessage::GameCountdown { value: -1 }));
        dir.claim_nick(b.id, &a.nick).await.unwrap();
    }
}
