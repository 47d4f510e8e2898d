//! Lobby Controller
//!
//! A lobby owns its members, the shared input queue and one rules engine,
//! and walks them through the match lifecycle:
//!
//! ```text
//! Lobby ──all ready──▶ Starting ──countdown──▶ InGame ──decided──▶ Finished
//!   ▲                     │                      │                   │
//!   └─────join/leave/─────┘                      │                   │
//!   └──────unready          ◀──<2 members / guard left──┘            │
//!   └──────────────────────────all ready again (via Starting)────────┘
//! any ──dispose──▶ Disposing
//! ```
//!
//! All state sits behind one mutex that is never held across an `.await`.
//! Outside `InGame` commands mutate the engine directly; inside it they
//! only enqueue, and the match loop is the engine's sole writer.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::core::rng::derive_match_seed;
use crate::game::character::Character;
use crate::game::input::{GameCommand, InputQueue};
use crate::game::state::{GameState, RulesError, SessionId};
use crate::game::tick;
use crate::network::match_loop;
use crate::network::protocol::{
    event_message, ErrorCode, LobbyInfo, MemberInfo, MoveTime, ServerMessage,
};

/// Seconds counted down before a match starts.
pub const COUNTDOWN_SECS: i32 = 5;

/// Members needed to start (and keep) a match.
pub const MIN_PLAYERS: usize = 2;

/// Smallest allowed lobby capacity.
pub const MIN_CAPACITY: usize = 2;

/// Largest allowed lobby capacity.
pub const MAX_CAPACITY: usize = 8;

// =============================================================================
// LIFECYCLE
// =============================================================================

/// Externally visible lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyPhase {
    /// Picking characters and readying up.
    Lobby,
    /// Countdown running.
    Starting,
    /// Match running.
    InGame,
    /// Match decided; behaves like `Lobby`.
    Finished,
    /// Torn down.
    Disposing,
}

/// Lifecycle with the resources each phase owns.
enum Lifecycle {
    Lobby,
    Starting {
        cancel: watch::Sender<bool>,
    },
    InGame {
        stop: watch::Sender<bool>,
        handle: Option<JoinHandle<()>>,
    },
    /// Keeps the finished loop's handle so `dispose` can join it.
    Finished {
        handle: Option<JoinHandle<()>>,
    },
    Disposing,
}

impl Lifecycle {
    fn phase(&self) -> LobbyPhase {
        match self {
            Lifecycle::Lobby => LobbyPhase::Lobby,
            Lifecycle::Starting { .. } => LobbyPhase::Starting,
            Lifecycle::InGame { .. } => LobbyPhase::InGame,
            Lifecycle::Finished { .. } => LobbyPhase::Finished,
            Lifecycle::Disposing => LobbyPhase::Disposing,
        }
    }

    /// Lobby-phase commands are accepted.
    fn is_idle(&self) -> bool {
        matches!(self, Lifecycle::Lobby | Lifecycle::Finished { .. })
    }
}

// =============================================================================
// MEMBERS
// =============================================================================

/// A session inside a lobby.
#[derive(Debug, Clone)]
pub struct Member {
    pub id: SessionId,
    pub nick: String,
    /// Outbound queue to this session's socket.
    pub sender: mpsc::Sender<ServerMessage>,
}

impl Member {
    pub fn new(id: SessionId, nick: impl Into<String>, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id,
            nick: nick.into(),
            sender,
        }
    }

    /// Fire-and-forget send; a full or closed channel drops the message.
    fn send(&self, message: ServerMessage) -> bool {
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(e) => {
                debug!(session = %self.id, nick = %self.nick, "Dropping outbound message: {}", e);
                false
            }
        }
    }
}

// =============================================================================
// COMMANDS & ERRORS
// =============================================================================

/// Commands applied immediately outside a running match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyCommand {
    SelectCharacter(Character),
    Ready(bool),
    Gamemode {
        character: Character,
        ai_level: Option<u8>,
        move_time: Option<MoveTime>,
    },
}

/// Lobby errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LobbyError {
    #[error("Lobby is full")]
    LobbyFull,

    #[error("Wrong password")]
    WrongPassword,

    #[error("Already in this lobby")]
    AlreadyMember,

    #[error("Not in this lobby")]
    NotAMember,

    #[error("Only the lobby owner can do that")]
    NotOwner,

    #[error("Not allowed while the lobby is {0:?}")]
    WrongPhase(LobbyPhase),

    #[error("Lobby is closing")]
    Disposed,

    #[error(transparent)]
    Rules(#[from] RulesError),
}

impl LobbyError {
    /// Wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            LobbyError::LobbyFull => ErrorCode::LobbyFull,
            LobbyError::WrongPassword => ErrorCode::WrongPassword,
            LobbyError::AlreadyMember | LobbyError::WrongPhase(_) | LobbyError::Disposed => {
                ErrorCode::WrongPhase
            }
            LobbyError::NotAMember => ErrorCode::NotInLobby,
            LobbyError::NotOwner => ErrorCode::NotOwner,
            LobbyError::Rules(RulesError::CharacterTaken(_)) => ErrorCode::CharacterTaken,
            LobbyError::Rules(_) => ErrorCode::InvalidGamemode,
        }
    }
}

// =============================================================================
// LOBBY
// =============================================================================

/// Static lobby settings.
#[derive(Debug, Clone)]
pub struct LobbySettings {
    pub name: String,
    pub hidden: bool,
    /// Empty means no password.
    pub password: String,
    /// Clamped to `MIN_CAPACITY..=MAX_CAPACITY`.
    pub capacity: usize,
    pub tick_rate: u32,
}

/// Everything guarded by the lobby mutex.
struct LobbyCore {
    members: BTreeMap<SessionId, Member>,
    owner: Option<SessionId>,
    queue: InputQueue,
    engine: GameState,
    lifecycle: Lifecycle,
    /// Bumped on every countdown and match start, so a task from an
    /// earlier generation can tell it has been superseded.
    generation: u64,
}

impl LobbyCore {
    fn broadcast(&self, message: ServerMessage) {
        for member in self.members.values() {
            member.send(message.clone());
        }
    }

    fn broadcast_except(&self, skip: &SessionId, message: ServerMessage) {
        for member in self.members.values().filter(|m| m.id != *skip) {
            member.send(message.clone());
        }
    }

    fn member_infos(&self) -> Vec<MemberInfo> {
        self.members
            .values()
            .map(|m| MemberInfo {
                nick: m.nick.clone(),
                character: self.engine.character_of(&m.id),
                ready: self.engine.is_ready(&m.id),
            })
            .collect()
    }

    fn all_ready(&self) -> bool {
        self.members.len() >= MIN_PLAYERS
            && self.members.keys().all(|id| self.engine.is_ready(id))
    }

    /// Starting → Lobby.
    fn cancel_countdown(&mut self) -> bool {
        if !matches!(self.lifecycle, Lifecycle::Starting { .. }) {
            return false;
        }
        if let Lifecycle::Starting { cancel } = std::mem::replace(&mut self.lifecycle, Lifecycle::Lobby) {
            let _ = cancel.send(true);
        }
        self.broadcast(ServerMessage::GameCountdown { value: -1 });
        true
    }

    /// InGame → Lobby. Returns the loop handle so the caller can drop or
    /// await it outside the lock.
    fn abort_match(&mut self) -> Option<JoinHandle<()>> {
        if !matches!(self.lifecycle, Lifecycle::InGame { .. }) {
            return None;
        }
        let handle = match std::mem::replace(&mut self.lifecycle, Lifecycle::Lobby) {
            Lifecycle::InGame { stop, handle } => {
                let _ = stop.send(true);
                handle
            }
            _ => None,
        };
        self.engine.reset();
        self.queue.clear();
        self.broadcast(ServerMessage::GameAbort);
        handle
    }
}

/// A game lobby.
pub struct Lobby {
    name: String,
    hidden: bool,
    password: String,
    capacity: usize,
    tick_rate: u32,
    core: Mutex<LobbyCore>,
}

impl std::fmt::Debug for Lobby {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lobby")
            .field("name", &self.name)
            .field("hidden", &self.hidden)
            .field("capacity", &self.capacity)
            .field("tick_rate", &self.tick_rate)
            .finish_non_exhaustive()
    }
}

impl Lobby {
    /// Create an empty lobby.
    pub fn new(settings: LobbySettings) -> Arc<Self> {
        Arc::new(Self {
            name: settings.name,
            hidden: settings.hidden,
            password: settings.password,
            capacity: settings.capacity.clamp(MIN_CAPACITY, MAX_CAPACITY),
            tick_rate: settings.tick_rate,
            core: Mutex::new(LobbyCore {
                members: BTreeMap::new(),
                owner: None,
                queue: InputQueue::new(),
                engine: GameState::new(settings.tick_rate),
                lifecycle: Lifecycle::Lobby,
                generation: 0,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn is_password_protected(&self) -> bool {
        !self.password.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    pub async fn phase(&self) -> LobbyPhase {
        self.core.lock().await.lifecycle.phase()
    }

    pub async fn current_tick(&self) -> u64 {
        self.core.lock().await.engine.tick
    }

    pub async fn owner(&self) -> Option<SessionId> {
        self.core.lock().await.owner
    }

    pub async fn members(&self) -> Vec<MemberInfo> {
        self.core.lock().await.member_infos()
    }

    pub async fn member_count(&self) -> usize {
        self.core.lock().await.members.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.core.lock().await.members.is_empty()
    }

    /// Public description for lobby lists.
    pub async fn info(&self) -> LobbyInfo {
        let core = self.core.lock().await;
        self.info_locked(&core)
    }

    fn info_locked(&self, core: &LobbyCore) -> LobbyInfo {
        LobbyInfo {
            name: self.name.clone(),
            owner: core
                .owner
                .and_then(|id| core.members.get(&id))
                .map(|m| m.nick.clone()),
            members: core.member_infos(),
            capacity: self.capacity,
            password: self.is_password_protected(),
            phase: core.lifecycle.phase(),
        }
    }

    // -------------------------------------------------------------------------
    // Messaging
    // -------------------------------------------------------------------------

    /// Send to every member.
    pub async fn broadcast(&self, message: ServerMessage) {
        self.core.lock().await.broadcast(message);
    }

    /// Send to one member. Returns false if they aren't here or their
    /// queue is full.
    pub async fn send_to(&self, session: &SessionId, message: ServerMessage) -> bool {
        let core = self.core.lock().await;
        core.members
            .get(session)
            .map(|m| m.send(message))
            .unwrap_or(false)
    }

    // -------------------------------------------------------------------------
    // Membership
    // -------------------------------------------------------------------------

    /// Add a member. Aborts a running countdown; refused while a match
    /// is running.
    pub async fn join(self: &Arc<Self>, member: Member, password: &str) -> Result<(), LobbyError> {
        let mut core = self.core.lock().await;

        match core.lifecycle {
            Lifecycle::Disposing => return Err(LobbyError::Disposed),
            Lifecycle::InGame { .. } => return Err(LobbyError::WrongPhase(LobbyPhase::InGame)),
            _ => {}
        }
        if self.is_password_protected() && password != self.password {
            return Err(LobbyError::WrongPassword);
        }
        if core.members.contains_key(&member.id) {
            return Err(LobbyError::AlreadyMember);
        }
        if core.members.len() >= self.capacity {
            return Err(LobbyError::LobbyFull);
        }

        let id = member.id;
        let nick = member.nick.clone();
        core.members.insert(id, member);
        if core.owner.is_none() {
            core.owner = Some(id);
        }

        let info = self.info_locked(&core);
        if let Some(m) = core.members.get(&id) {
            m.send(ServerMessage::LobbyJoined { lobby: info });
        }
        core.broadcast_except(&id, ServerMessage::UserJoined { nick: nick.clone() });

        if core.cancel_countdown() {
            info!(lobby = %self.name, %nick, "Countdown aborted by join");
        }
        info!(lobby = %self.name, %nick, members = core.members.len(), "Member joined");
        Ok(())
    }

    /// Remove a member. Returns true if the lobby is now empty.
    ///
    /// A Guard leaving mid-match, or the lobby dropping below two members,
    /// aborts the match. Otherwise the leaver's character is released
    /// through the input queue.
    pub async fn leave(&self, session: &SessionId) -> Result<bool, LobbyError> {
        let mut core = self.core.lock().await;

        let Some(member) = core.members.remove(session) else {
            return Err(LobbyError::NotAMember);
        };
        member.send(ServerMessage::LobbyLeft {
            name: self.name.clone(),
        });
        core.broadcast(ServerMessage::UserLeft {
            nick: member.nick.clone(),
        });

        if core.owner == Some(*session) {
            core.owner = core.members.keys().next().copied();
        }

        match core.lifecycle.phase() {
            LobbyPhase::Starting => {
                core.engine.remove_session(session);
                core.cancel_countdown();
                info!(lobby = %self.name, nick = %member.nick, "Countdown aborted by leave");
            }
            LobbyPhase::InGame => {
                let was_guard = core.engine.character_of(session) == Character::Guard;
                if was_guard || core.members.len() < MIN_PLAYERS {
                    // Loop exits on its own once it sees the stop signal
                    drop(core.abort_match());
                    core.engine.remove_session(session);
                    info!(lobby = %self.name, nick = %member.nick, was_guard, "Match aborted");
                } else {
                    let tick = core.engine.tick;
                    core.queue.push_internal(*session, GameCommand::Release, tick);
                }
            }
            LobbyPhase::Lobby | LobbyPhase::Finished => core.engine.remove_session(session),
            LobbyPhase::Disposing => {}
        }

        info!(lobby = %self.name, nick = %member.nick, members = core.members.len(), "Member left");
        Ok(core.members.is_empty())
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    /// Queue a gameplay command if a match is running and the tick is
    /// inside the admission window.
    pub async fn enqueue_if_in_game(
        &self,
        session: SessionId,
        command: GameCommand,
        client_tick: u64,
    ) -> bool {
        let mut core = self.core.lock().await;
        if !matches!(core.lifecycle, Lifecycle::InGame { .. }) || !core.members.contains_key(&session) {
            return false;
        }
        let current = core.engine.tick;
        let admitted = core.queue.admit(session, command, client_tick, current);
        if !admitted {
            trace!(lobby = %self.name, %session, client_tick, current, "Input outside admission window");
        }
        admitted
    }

    /// Apply a lobby-phase command.
    pub async fn handle_lobby_command(
        self: &Arc<Self>,
        session: SessionId,
        command: LobbyCommand,
    ) -> Result<(), LobbyError> {
        let check_start = {
            let mut core = self.core.lock().await;
            let nick = core
                .members
                .get(&session)
                .map(|m| m.nick.clone())
                .ok_or(LobbyError::NotAMember)?;
            let phase = core.lifecycle.phase();

            match command {
                LobbyCommand::SelectCharacter(character) => {
                    if !core.lifecycle.is_idle() {
                        return Err(LobbyError::WrongPhase(phase));
                    }
                    core.engine.assign_character(session, character)?;
                    core.broadcast(ServerMessage::CharacterSelected { nick, character });
                    false
                }
                LobbyCommand::Ready(value) => {
                    if matches!(phase, LobbyPhase::InGame | LobbyPhase::Disposing) {
                        return Err(LobbyError::WrongPhase(phase));
                    }
                    core.engine.set_ready(session, value);
                    core.broadcast(ServerMessage::ReadyChanged { nick, ready: value });
                    if !value && core.cancel_countdown() {
                        info!(lobby = %self.name, "Countdown aborted by unready");
                    }
                    true
                }
                LobbyCommand::Gamemode {
                    character,
                    ai_level,
                    move_time,
                } => {
                    if core.owner != Some(session) {
                        return Err(LobbyError::NotOwner);
                    }
                    if !core.lifecycle.is_idle() {
                        return Err(LobbyError::WrongPhase(phase));
                    }
                    core.engine.configure_antagonist(
                        character,
                        ai_level,
                        move_time.map(|t| (t.min, t.max)),
                    )?;
                    debug!(lobby = %self.name, ?character, ?ai_level, ?move_time, "Gamemode updated");
                    false
                }
            }
        };

        if check_start {
            self.try_start_countdown().await;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Start the countdown if everyone is ready. Returns true if it started.
    pub async fn try_start_countdown(self: &Arc<Self>) -> bool {
        let mut core = self.core.lock().await;
        if !core.lifecycle.is_idle() || !core.all_ready() {
            return false;
        }

        let (cancel, cancel_rx) = watch::channel(false);
        core.generation += 1;
        core.lifecycle = Lifecycle::Starting { cancel };

        let lobby = Arc::clone(self);
        let generation = core.generation;
        tokio::spawn(async move { lobby.run_countdown(generation, cancel_rx).await });

        info!(lobby = %self.name, members = core.members.len(), "Countdown started");
        true
    }

    async fn run_countdown(self: Arc<Self>, generation: u64, mut cancel: watch::Receiver<bool>) {
        for value in (1..=COUNTDOWN_SECS).rev() {
            {
                let core = self.core.lock().await;
                if core.generation != generation || !matches!(core.lifecycle, Lifecycle::Starting { .. }) {
                    return;
                }
                core.broadcast(ServerMessage::GameCountdown { value });
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                _ = cancel.changed() => return,
            }
        }
        self.start_match(generation).await;
    }

    /// Starting → InGame.
    async fn start_match(self: &Arc<Self>, generation: u64) {
        let mut core = self.core.lock().await;
        if core.generation != generation || !matches!(core.lifecycle, Lifecycle::Starting { .. }) {
            return;
        }

        let entropy = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let ids: Vec<[u8; 16]> = core.members.keys().map(|id| id.0).collect();
        let seed = derive_match_seed(entropy, &self.name, &ids);

        core.engine.begin_match(seed);
        core.queue.clear();
        core.generation += 1;
        let generation = core.generation;

        let (stop, stop_rx) = watch::channel(false);
        let lobby = Arc::clone(self);
        let handle = match_loop::spawn(self.tick_rate, stop_rx, move |_| {
            let lobby = Arc::clone(&lobby);
            async move { lobby.run_tick(generation).await }
        });
        core.lifecycle = Lifecycle::InGame {
            stop,
            handle: Some(handle),
        };

        core.broadcast(ServerMessage::GameStart {
            tick_rate: self.tick_rate,
        });
        info!(lobby = %self.name, seed, tick_rate = self.tick_rate, "Match started");
    }

    /// One match loop iteration: step the engine and broadcast.
    async fn run_tick(&self, generation: u64) -> ControlFlow<()> {
        let mut core = self.core.lock().await;
        if core.generation != generation || !matches!(core.lifecycle, Lifecycle::InGame { .. }) {
            return ControlFlow::Break(());
        }

        let result = {
            let LobbyCore { engine, queue, .. } = &mut *core;
            tick::step(engine, queue)
        };
        if result.stale > 0 {
            debug!(lobby = %self.name, tick = result.tick, stale = result.stale, "Discarded stale inputs");
        }

        for event in &result.events {
            if let Some(message) = event_message(event) {
                core.broadcast(message);
            }
        }
        core.broadcast(ServerMessage::State(result.snapshot));

        match result.outcome {
            Some(outcome) => {
                core.broadcast(ServerMessage::GameEnd {
                    survived: outcome.survived(),
                });
                let handle = match std::mem::replace(&mut core.lifecycle, Lifecycle::Disposing) {
                    Lifecycle::InGame { handle, .. } => handle,
                    _ => None,
                };
                core.lifecycle = Lifecycle::Finished { handle };
                info!(lobby = %self.name, tick = result.tick, ?outcome, "Match finished");
                ControlFlow::Break(())
            }
            None => ControlFlow::Continue(()),
        }
    }

    /// Cancel a countdown or a running match. Returns true if anything
    /// was cancelled.
    pub async fn abort(&self) -> bool {
        let mut core = self.core.lock().await;
        if core.cancel_countdown() {
            info!(lobby = %self.name, "Countdown aborted");
            return true;
        }
        if matches!(core.lifecycle, Lifecycle::InGame { .. }) {
            drop(core.abort_match());
            info!(lobby = %self.name, "Match aborted");
            return true;
        }
        false
    }

    /// Tear the lobby down. Stops the countdown or match loop and waits
    /// for the loop task. Later calls do nothing.
    pub async fn dispose(&self) {
        let handle = {
            let mut core = self.core.lock().await;
            let handle = match std::mem::replace(&mut core.lifecycle, Lifecycle::Disposing) {
                Lifecycle::Disposing => return,
                Lifecycle::Starting { cancel } => {
                    let _ = cancel.send(true);
                    None
                }
                Lifecycle::InGame { stop, handle } => {
                    let _ = stop.send(true);
                    handle
                }
                Lifecycle::Finished { handle } => handle,
                Lifecycle::Lobby => None,
            };
            core.members.clear();
            core.owner = None;
            core.queue.clear();
            handle
        };

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(lobby = %self.name, "Match loop ended abnormally: {}", e);
            }
        }
        info!(lobby = %self.name, "Lobby disposed");
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::graph::Side;
    use crate::game::input::CheatKind;

    struct Client {
        id: SessionId,
        rx: mpsc::Receiver<ServerMessage>,
    }

    impl Client {
        fn drain(&mut self) -> Vec<ServerMessage> {
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                out.push(msg);
            }
            out
        }
    }

    fn lobby() -> Arc<Lobby> {
        Lobby::new(LobbySettings {
            name: "pizzeria".into(),
            hidden: false,
            password: String::new(),
            capacity: 5,
            tick_rate: 10,
        })
    }

    async fn join(lobby: &Arc<Lobby>, byte: u8) -> Client {
        let (tx, rx) = mpsc::channel(4096);
        let id = SessionId::new([byte; 16]);
        lobby
            .join(Member::new(id, format!("player{}", byte), tx), "")
            .await
            .unwrap();
        Client { id, rx }
    }

    fn count(messages: &[ServerMessage], wanted: &ServerMessage) -> usize {
        messages.iter().filter(|m| *m == wanted).count()
    }

    /// Two members, Guard + Bonnie, quiet AI, match running.
    async fn running_match() -> (Arc<Lobby>, Client, Client) {
        let lobby = lobby();
        let guard = join(&lobby, 1).await;
        let bonnie = join(&lobby, 2).await;

        for (id, character) in [(guard.id, Character::Guard), (bonnie.id, Character::Bonnie)] {
            lobby
                .handle_lobby_command(id, LobbyCommand::SelectCharacter(character))
                .await
                .unwrap();
        }
        for c in Character::ANTAGONISTS {
            lobby
                .handle_lobby_command(
                    guard.id,
                    LobbyCommand::Gamemode {
                        character: c,
                        ai_level: Some(0),
                        move_time: None,
                    },
                )
                .await
                .unwrap();
        }
        lobby.handle_lobby_command(guard.id, LobbyCommand::Ready(true)).await.unwrap();
        lobby.handle_lobby_command(bonnie.id, LobbyCommand::Ready(true)).await.unwrap();
        assert_eq!(lobby.phase().await, LobbyPhase::Starting);

        tokio::time::sleep(Duration::from_millis(5_050)).await;
        assert_eq!(lobby.phase().await, LobbyPhase::InGame);
        (lobby, guard, bonnie)
    }

    fn states(messages: &[ServerMessage]) -> Vec<crate::game::state::Snapshot> {
        messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::State(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_join_leave_owner() {
        let lobby = lobby();
        let mut a = join(&lobby, 1).await;
        let b = join(&lobby, 2).await;

        assert_eq!(lobby.owner().await, Some(a.id));
        assert_eq!(lobby.member_count().await, 2);

        let msgs = a.drain();
        assert!(matches!(msgs[0], ServerMessage::LobbyJoined { .. }));
        assert_eq!(msgs[1], ServerMessage::UserJoined { nick: "player2".into() });

        assert!(lobby.send_to(&a.id, ServerMessage::Pong { timestamp: 7, server_time: 8 }).await);
        assert_eq!(a.drain(), vec![ServerMessage::Pong { timestamp: 7, server_time: 8 }]);
        assert!(!lobby.send_to(&SessionId::new([9; 16]), ServerMessage::Pong { timestamp: 7, server_time: 8 }).await);

        assert!(!lobby.leave(&a.id).await.unwrap());
        assert_eq!(lobby.owner().await, Some(b.id));
        assert!(lobby.leave(&b.id).await.unwrap());
        assert_eq!(lobby.leave(&b.id).await, Err(LobbyError::NotAMember));
    }

    #[tokio::test]
    async fn test_capacity_and_password() {
        let lobby = Lobby::new(LobbySettings {
            name: "locked".into(),
            hidden: true,
            password: "hunter2".into(),
            capacity: 1,
            tick_rate: 10,
        });
        assert_eq!(lobby.capacity(), 2);
        assert!(lobby.is_password_protected());

        let (tx, _rx) = mpsc::channel(8);
        let member = |b: u8| Member::new(SessionId::new([b; 16]), format!("p{}", b), tx.clone());

        assert_eq!(lobby.join(member(1), "nope").await, Err(LobbyError::WrongPassword));
        lobby.join(member(1), "hunter2").await.unwrap();
        assert_eq!(lobby.join(member(1), "hunter2").await, Err(LobbyError::AlreadyMember));
        lobby.join(member(2), "hunter2").await.unwrap();
        assert_eq!(lobby.join(member(3), "hunter2").await, Err(LobbyError::LobbyFull));
    }

    #[tokio::test]
    async fn test_character_selection_unique() {
        let lobby = lobby();
        let a = join(&lobby, 1).await;
        let b = join(&lobby, 2).await;

        lobby
            .handle_lobby_command(a.id, LobbyCommand::SelectCharacter(Character::Guard))
            .await
            .unwrap();
        let err = lobby
            .handle_lobby_command(b.id, LobbyCommand::SelectCharacter(Character::Guard))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CharacterTaken);

        let members = lobby.members().await;
        assert_eq!(members[0].character, Character::Guard);
        assert_eq!(members[1].character, Character::None);
    }

    #[tokio::test]
    async fn test_gamemode_owner_only() {
        let lobby = lobby();
        let _a = join(&lobby, 1).await;
        let b = join(&lobby, 2).await;
        let cmd = LobbyCommand::Gamemode {
            character: Character::Foxy,
            ai_level: Some(10),
            move_time: None,
        };
        assert_eq!(
            lobby.handle_lobby_command(b.id, cmd).await,
            Err(LobbyError::NotOwner)
        );
    }

    #[tokio::test]
    async fn test_single_member_cannot_start() {
        let lobby = lobby();
        let a = join(&lobby, 1).await;
        lobby.handle_lobby_command(a.id, LobbyCommand::Ready(true)).await.unwrap();
        assert_eq!(lobby.phase().await, LobbyPhase::Lobby);
        assert!(!lobby.try_start_countdown().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_broadcasts() {
        let lobby = lobby();
        let mut a = join(&lobby, 1).await;
        let b = join(&lobby, 2).await;
        a.drain();

        lobby.handle_lobby_command(a.id, LobbyCommand::Ready(true)).await.unwrap();
        lobby.handle_lobby_command(b.id, LobbyCommand::Ready(true)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5_050)).await;

        let msgs = a.drain();
        let countdown: Vec<i32> = msgs
            .iter()
            .filter_map(|m| match m {
                ServerMessage::GameCountdown { value } => Some(*value),
                _ => None,
            })
            .collect();
        assert_eq!(countdown, vec![5, 4, 3, 2, 1]);
        assert_eq!(count(&msgs, &ServerMessage::GameStart { tick_rate: 10 }), 1);
        assert_eq!(lobby.phase().await, LobbyPhase::InGame);

        lobby.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_during_countdown_aborts() {
        let lobby = lobby();
        let mut a = join(&lobby, 1).await;
        let b = join(&lobby, 2).await;

        lobby.handle_lobby_command(a.id, LobbyCommand::Ready(true)).await.unwrap();
        lobby.handle_lobby_command(b.id, LobbyCommand::Ready(true)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(lobby.phase().await, LobbyPhase::Starting);
        a.drain();

        let _c = join(&lobby, 3).await;
        assert_eq!(lobby.phase().await, LobbyPhase::Lobby);
        let msgs = a.drain();
        assert_eq!(count(&msgs, &ServerMessage::GameCountdown { value: -1 }), 1);

        // The cancelled countdown never starts the match
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(lobby.phase().await, LobbyPhase::Lobby);
        assert_eq!(count(&a.drain(), &ServerMessage::GameStart { tick_rate: 10 }), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unready_during_countdown_aborts() {
        let lobby = lobby();
        let mut a = join(&lobby, 1).await;
        let b = join(&lobby, 2).await;

        lobby.handle_lobby_command(a.id, LobbyCommand::Ready(true)).await.unwrap();
        lobby.handle_lobby_command(b.id, LobbyCommand::Ready(true)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        a.drain();

        lobby.handle_lobby_command(b.id, LobbyCommand::Ready(false)).await.unwrap();
        assert_eq!(lobby.phase().await, LobbyPhase::Lobby);
        assert_eq!(count(&a.drain(), &ServerMessage::GameCountdown { value: -1 }), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lobby_commands_rejected_in_game() {
        let (lobby, guard, _bonnie) = running_match().await;
        assert_eq!(
            lobby
                .handle_lobby_command(guard.id, LobbyCommand::SelectCharacter(Character::Foxy))
                .await,
            Err(LobbyError::WrongPhase(LobbyPhase::InGame))
        );
        assert_eq!(
            lobby.handle_lobby_command(guard.id, LobbyCommand::Ready(true)).await,
            Err(LobbyError::WrongPhase(LobbyPhase::InGame))
        );
        lobby.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_input_applies_on_next_tick() {
        let (lobby, mut guard, _bonnie) = running_match().await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        guard.drain();

        let current = lobby.current_tick().await;
        assert!(current > 0);
        let close = GameCommand::Door {
            side: Side::Left,
            closed: true,
        };
        assert!(lobby.enqueue_if_in_game(guard.id, close, current + 1).await);

        tokio::time::sleep(Duration::from_millis(250)).await;
        let snapshots = states(&guard.drain());
        let applied = snapshots
            .iter()
            .find(|s| s.tick == current + 1)
            .expect("snapshot for the target tick");
        assert!(applied.left.door);
        assert!(snapshots.iter().filter(|s| s.tick <= current).all(|s| !s.left.door));

        lobby.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_input_discarded() {
        let (lobby, mut guard, _bonnie) = running_match().await;
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        guard.drain();

        let current = lobby.current_tick().await;
        let close = GameCommand::Door {
            side: Side::Left,
            closed: true,
        };
        assert!(!lobby.enqueue_if_in_game(guard.id, close, current - 6).await);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(states(&guard.drain()).iter().all(|s| !s.left.door));

        lobby.dispose().await;
    }

    #[tokio::test]
    async fn test_enqueue_outside_match_refused() {
        let lobby = lobby();
        let a = join(&lobby, 1).await;
        let cmd = GameCommand::Light {
            side: Side::Right,
            on: true,
        };
        assert!(!lobby.enqueue_if_in_game(a.id, cmd, 0).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_leaving_aborts_match() {
        let (lobby, guard, mut bonnie) = running_match().await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(lobby.current_tick().await > 0);
        bonnie.drain();

        assert!(!lobby.leave(&guard.id).await.unwrap());
        assert_eq!(lobby.phase().await, LobbyPhase::Lobby);
        assert_eq!(lobby.current_tick().await, 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let msgs = bonnie.drain();
        assert_eq!(count(&msgs, &ServerMessage::GameAbort), 1);
        // Loop is gone; no more snapshots after the abort
        let abort_at = msgs.iter().position(|m| *m == ServerMessage::GameAbort).unwrap();
        assert!(states(&msgs[abort_at..]).is_empty());
        assert_eq!(lobby.current_tick().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_antagonist_leaving_keeps_match() {
        let lobby = lobby();
        let guard = join(&lobby, 1).await;
        let bonnie = join(&lobby, 2).await;
        let _spectator = join(&lobby, 3).await;
        lobby
            .handle_lobby_command(guard.id, LobbyCommand::SelectCharacter(Character::Guard))
            .await
            .unwrap();
        lobby
            .handle_lobby_command(bonnie.id, LobbyCommand::SelectCharacter(Character::Bonnie))
            .await
            .unwrap();
        for id in [guard.id, bonnie.id, SessionId::new([3; 16])] {
            lobby.handle_lobby_command(id, LobbyCommand::Ready(true)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(5_050)).await;
        assert_eq!(lobby.phase().await, LobbyPhase::InGame);

        lobby.leave(&bonnie.id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(lobby.phase().await, LobbyPhase::InGame);
        assert_eq!(lobby.member_count().await, 2);
        assert_eq!(lobby.core.lock().await.engine.holder_of(Character::Bonnie), None);

        lobby.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_match_finishes_and_allows_rematch() {
        let (lobby, mut guard, bonnie) = running_match().await;
        guard.drain();

        let current = lobby.current_tick().await;
        for _ in 0..6 {
            let skip = GameCommand::Cheat {
                kind: CheatKind::Night,
            };
            assert!(lobby.enqueue_if_in_game(guard.id, skip, current).await);
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(lobby.phase().await, LobbyPhase::Finished);
        let msgs = guard.drain();
        assert_eq!(count(&msgs, &ServerMessage::GameEnd { survived: true }), 1);
        let end_tick = lobby.current_tick().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(lobby.current_tick().await, end_tick);

        // Characters survive; ready again for a rematch
        lobby.handle_lobby_command(guard.id, LobbyCommand::Ready(true)).await.unwrap();
        lobby.handle_lobby_command(bonnie.id, LobbyCommand::Ready(true)).await.unwrap();
        assert_eq!(lobby.phase().await, LobbyPhase::Starting);
        tokio::time::sleep(Duration::from_millis(5_050)).await;
        assert_eq!(lobby.phase().await, LobbyPhase::InGame);
        assert!(lobby.current_tick().await < 5);

        lobby.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_refused_during_match() {
        let (lobby, _guard, mut bonnie) = running_match().await;
        bonnie.drain();

        let (tx, mut rx) = mpsc::channel(8);
        let late = Member::new(SessionId::new([3; 16]), "latecomer", tx);
        assert_eq!(
            lobby.join(late, "").await,
            Err(LobbyError::WrongPhase(LobbyPhase::InGame))
        );
        assert_eq!(lobby.member_count().await, 2);
        assert_eq!(lobby.phase().await, LobbyPhase::InGame);
        assert!(rx.try_recv().is_err());
        assert!(!bonnie
            .drain()
            .iter()
            .any(|m| matches!(m, ServerMessage::UserJoined { .. })));

        lobby.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_match_keeps_loop_handle_for_dispose() {
        let (lobby, guard, _bonnie) = running_match().await;
        let current = lobby.current_tick().await;
        for _ in 0..6 {
            let skip = GameCommand::Cheat {
                kind: CheatKind::Night,
            };
            assert!(lobby.enqueue_if_in_game(guard.id, skip, current).await);
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(matches!(
            lobby.core.lock().await.lifecycle,
            Lifecycle::Finished { handle: Some(_) }
        ));

        // Joining is allowed again once the match is decided
        let (tx, _rx) = mpsc::channel(8);
        lobby
            .join(Member::new(SessionId::new([3; 16]), "next", tx), "")
            .await
            .unwrap();

        lobby.dispose().await;
        assert_eq!(lobby.phase().await, LobbyPhase::Disposing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_is_idempotent() {
        let (lobby, guard, _bonnie) = running_match().await;
        lobby.dispose().await;
        assert_eq!(lobby.phase().await, LobbyPhase::Disposing);
        assert!(lobby.is_empty().await);
        lobby.dispose().await;

        let (tx, _rx) = mpsc::channel(8);
        assert_eq!(
            lobby.join(Member::new(guard.id, "again", tx), "").await,
            Err(LobbyError::Disposed)
        );
        assert!(!lobby.abort().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_running_match() {
        let (lobby, _guard, mut bonnie) = running_match().await;
        bonnie.drain();
        assert!(lobby.abort().await);
        assert_eq!(lobby.phase().await, LobbyPhase::Lobby);
        assert_eq!(count(&bonnie.drain(), &ServerMessage::GameAbort), 1);
        assert!(!lobby.abort().await);
    }
}
