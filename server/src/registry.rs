//! Process-wide session table, lobby and room directory.
//!
//! Every connected peer gets a [`SessionId`] when its connection is accepted. The registry
//! owns the identity table, the lobby chat and the directory of rooms behind a single lock,
//! and it is the only path by which anything is sent to a peer: each identity carries the
//! sending half of its connection's outbound queue, so frames from different tasks never
//! interleave on one socket.
//!
//! Rooms carry their own lock. The registry lock may be held while a room lock is taken,
//! never the other way round, and game requests release the registry before touching
//! their room so that play in one room never waits on another.

use crate::events::EventSink;
use crate::room::{ChatLog, Room};
use log::{debug, info};
use rand::Rng;
use serde_json::json;
use shared::{ClientMessage, GameStateView, ServerMessage, Team};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

/// Opaque handle for one connected peer, issued in accept order starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u32);

impl SessionId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sending half of a connection's outbound queue.
pub type Outbound = mpsc::UnboundedSender<ServerMessage>;

/// Session-level request failures. The display text is sent back as an `error` message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Username '{0}' is already taken. Please choose another.")]
    NameTaken(String),

    #[error("Name must not be empty.")]
    InvalidName,

    #[error("Please leave current room first.")]
    AlreadyInRoom,

    #[error("Room not found.")]
    RoomNotFound,

    #[error("Cannot join: Game in progress.")]
    GameInProgress,

    #[error("Invalid team choice or not in a room.")]
    InvalidTeamOrNoRoom,

    #[error("Not in a room.")]
    NotInRoom,

    #[error("Not in a room to leave.")]
    NotInRoomToLeave,

    #[error("Not in a room to start a game.")]
    NotInRoomToStart,

    #[error("Only the room owner can start the game.")]
    NotOwner,

    #[error("No game in progress in this room.")]
    NoGameInProgress,
}

#[derive(Debug)]
struct Identity {
    name: String,
    addr: SocketAddr,
    room: Option<String>,
    outbound: Outbound,
}

struct RoomHandle {
    /// Creation order, used to list rooms stably.
    seq: u64,
    room: Arc<Mutex<Room>>,
}

#[derive(Default)]
struct Inner {
    identities: HashMap<SessionId, Identity>,
    rooms: HashMap<String, RoomHandle>,
    lobby_chat: ChatLog,
    next_session_id: u32,
    next_room_id: u64,
}

impl Inner {
    fn send(&self, id: SessionId, message: ServerMessage) {
        if let Some(identity) = self.identities.get(&id) {
            if identity.outbound.send(message).is_err() {
                debug!("Dropping message for session {}: connection is closing", id);
            }
        }
    }

    fn push_views(&self, views: Vec<(SessionId, GameStateView)>) {
        for (id, view) in views {
            self.send(id, ServerMessage::GameStateUpdate(view));
        }
    }

    async fn lobby_snapshot(&self) -> ServerMessage {
        let mut idle: Vec<(&SessionId, &Identity)> = self
            .identities
            .iter()
            .filter(|(_, identity)| identity.room.is_none())
            .collect();
        idle.sort_by_key(|(id, _)| **id);

        let mut handles: Vec<&RoomHandle> = self.rooms.values().collect();
        handles.sort_by_key(|handle| handle.seq);
        let mut rooms = Vec::with_capacity(handles.len());
        for handle in handles {
            rooms.push(handle.room.lock().await.summary());
        }

        ServerMessage::LobbyUpdate {
            players: idle.iter().map(|(_, identity)| identity.name.clone()).collect(),
            rooms,
            chat: self.lobby_chat.lines(),
        }
    }

    async fn push_lobby(&self) {
        let snapshot = self.lobby_snapshot().await;
        for (id, identity) in &self.identities {
            if identity.room.is_none() {
                self.send(*id, snapshot.clone());
            }
        }
    }

    /// Takes `id` out of its room, deleting the room once it is empty.
    ///
    /// Returns the id of the room that was left.
    async fn detach_from_room(&mut self, id: SessionId, events: &dyn EventSink) -> Option<String> {
        let room_id = self.identities.get_mut(&id)?.room.take()?;
        let Some(handle) = self.rooms.get(&room_id) else {
            return Some(room_id);
        };

        let now_empty = {
            let mut room = handle.room.lock().await;
            room.remove_member(id);
            room.is_empty()
        };
        if now_empty {
            self.rooms.remove(&room_id);
            info!("Room {} deleted as it is empty", room_id);
            events.record("room_deleted", json!({ "room_id": room_id }));
        }
        Some(room_id)
    }
}

fn views_of(room: &Room) -> Vec<(SessionId, GameStateView)> {
    room.member_ids()
        .into_iter()
        .filter_map(|id| room.view_for(id).map(|view| (id, view)))
        .collect()
}

/// Rejections for game requests are reported with the room's current clue and turn.
fn feedback(room: &Room, id: SessionId, message: String, guess: Option<String>) -> ServerMessage {
    ServerMessage::GuessFeedback {
        message,
        guess,
        clue: room
            .game()
            .map(|game| game.clue_word().to_string())
            .unwrap_or_default(),
        team: room.member(id).and_then(|member| member.team),
        turn: room.game().map(|game| game.turn),
    }
}

fn ensure_playable(room: &Room, id: SessionId) -> Result<(), SessionError> {
    if room.member(id).is_none() {
        return Err(SessionError::NotInRoom);
    }
    if !room.game_in_progress() {
        return Err(SessionError::NoGameInProgress);
    }
    Ok(())
}

/// Shared handle to the registry; clones refer to the same table.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Mutex<Inner>>,
    events: Arc<dyn EventSink>,
}

impl SessionRegistry {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            events,
        }
    }

    /// Creates a placeholder identity (`Guest_<id>`) for a freshly accepted connection.
    pub async fn register(&self, addr: SocketAddr, outbound: Outbound) -> SessionId {
        let mut inner = self.inner.lock().await;
        inner.next_session_id += 1;
        let id = SessionId::new(inner.next_session_id);
        let name = format!("Guest_{}", id);

        info!("Session {} connected from {} as {}", id, addr, name);
        self.events.record(
            "client_connected",
            json!({ "session": id.get(), "addr": addr.to_string(), "name": name }),
        );
        inner.identities.insert(
            id,
            Identity {
                name,
                addr,
                room: None,
                outbound,
            },
        );
        id
    }

    /// Tears down a session: leaves its room, forgets the identity and tells the lobby.
    ///
    /// Returns false if the session was already gone, so repeated calls are harmless.
    pub async fn remove(&self, id: SessionId) -> bool {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let Some(name) = inner.identities.get(&id).map(|identity| identity.name.clone()) else {
            return false;
        };

        inner.detach_from_room(id, self.events.as_ref()).await;
        if let Some(identity) = inner.identities.remove(&id) {
            info!("Session {} ({}) from {} disconnected", id, name, identity.addr);
        }
        self.events.record(
            "client_disconnected",
            json!({ "session": id.get(), "name": name }),
        );

        inner
            .lobby_chat
            .push_system(format!("{} disconnected from the server.", name));
        inner.push_lobby().await;
        true
    }

    /// Sends one message to one session, if it is still connected.
    pub async fn send_to(&self, id: SessionId, message: ServerMessage) {
        self.inner.lock().await.send(id, message);
    }

    /// Pushes the lobby view to every session that is not in a room.
    pub async fn broadcast_lobby_snapshot(&self) {
        self.inner.lock().await.push_lobby().await;
    }

    /// Pushes a per-member game view to every room that has had a game.
    pub async fn broadcast_game_views(&self) {
        let inner = self.inner.lock().await;
        for handle in inner.rooms.values() {
            let views = {
                let room = handle.room.lock().await;
                if room.game().is_none() {
                    continue;
                }
                views_of(&room)
            };
            inner.push_views(views);
        }
    }

    pub async fn session_count(&self) -> usize {
        self.inner.lock().await.identities.len()
    }

    pub async fn room_count(&self) -> usize {
        self.inner.lock().await.rooms.len()
    }

    pub async fn name_of(&self, id: SessionId) -> Option<String> {
        self.inner
            .lock()
            .await
            .identities
            .get(&id)
            .map(|identity| identity.name.clone())
    }

    pub async fn room(&self, room_id: &str) -> Option<Arc<Mutex<Room>>> {
        self.inner
            .lock()
            .await
            .rooms
            .get(room_id)
            .map(|handle| handle.room.clone())
    }

    /// Entry point for every decoded request. Failures go back to the sender as `error`.
    pub async fn dispatch(&self, id: SessionId, message: ClientMessage) {
        let kind = message.kind();
        debug!("Session {} sent {}", id, kind);

        let result = match message {
            ClientMessage::Join { name } => self.join(id, name).await,
            ClientMessage::Chat { text } => self.chat(id, text).await,
            ClientMessage::CreateRoom { name } => self.create_room(id, name).await,
            ClientMessage::JoinRoom { room_id } => self.join_room(id, room_id).await,
            ClientMessage::LeaveRoom => self.leave_room(id).await,
            ClientMessage::SetTeam { team } => self.set_team(id, &team).await,
            ClientMessage::StartGameRequest => self.start_game(id).await,
            ClientMessage::Clue { word, number } => self.clue(id, word, number).await,
            ClientMessage::Guess { word } => self.guess(id, word).await,
            ClientMessage::EndTurn => self.end_turn(id).await,
            ClientMessage::RefreshLobby => {
                self.broadcast_lobby_snapshot().await;
                Ok(())
            }
            ClientMessage::Unknown => {
                info!("Ignoring message of unknown type from session {}", id);
                Ok(())
            }
        };

        if let Err(e) = result {
            debug!("Rejected {} from session {}: {}", kind, id, e);
            self.send_to(id, ServerMessage::error(e.to_string())).await;
        }
    }

    async fn join(&self, id: SessionId, name: String) -> Result<(), SessionError> {
        if name.trim().is_empty() {
            return Err(SessionError::InvalidName);
        }

        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let taken = inner
            .identities
            .iter()
            .any(|(other, identity)| *other != id && identity.name == name);
        if taken {
            return Err(SessionError::NameTaken(name));
        }
        let Some(identity) = inner.identities.get_mut(&id) else {
            return Ok(());
        };

        let previous = std::mem::replace(&mut identity.name, name.clone());
        info!("{} (session {}) is now known as {}", previous, id, name);
        if let Some(handle) = identity.room.as_ref().and_then(|room_id| inner.rooms.get(room_id)) {
            handle.room.lock().await.rename_member(id, &name);
        }
        self.events
            .record("player_named", json!({ "session": id.get(), "name": name }));

        inner
            .lobby_chat
            .push_system(format!("{} joined the lobby.", name));
        inner.push_lobby().await;
        Ok(())
    }

    async fn chat(&self, id: SessionId, text: String) -> Result<(), SessionError> {
        if text.is_empty() {
            return Ok(());
        }

        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let Some(identity) = inner.identities.get(&id) else {
            return Ok(());
        };
        let line = format!("{}: {}", identity.name, text);

        match &identity.room {
            Some(room_id) => {
                if let Some(handle) = inner.rooms.get(room_id) {
                    handle.room.lock().await.add_chat_message(line);
                    self.events.record(
                        "room_chat",
                        json!({ "room_id": room_id, "name": identity.name, "message": text }),
                    );
                }
            }
            None => {
                self.events.record(
                    "lobby_chat",
                    json!({ "name": identity.name, "message": text }),
                );
                inner.lobby_chat.push(line);
            }
        }
        Ok(())
    }

    async fn create_room(&self, id: SessionId, name: Option<String>) -> Result<(), SessionError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let Some(identity) = inner.identities.get_mut(&id) else {
            return Ok(());
        };
        if identity.room.is_some() {
            return Err(SessionError::AlreadyInRoom);
        }

        let room_name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("Room_{}", rand::thread_rng().gen_range(1000..=9999)));
        inner.next_room_id += 1;
        let seq = inner.next_room_id;
        let room_id = format!("room_{}", seq);
        let owner_name = identity.name.clone();
        identity.room = Some(room_id.clone());

        let mut room = Room::new(room_id.clone(), room_name.clone(), id);
        room.add_member(id, &owner_name);
        inner.rooms.insert(
            room_id.clone(),
            RoomHandle {
                seq,
                room: Arc::new(Mutex::new(room)),
            },
        );

        info!("{} created room {} ({})", owner_name, room_id, room_name);
        self.events.record(
            "room_created",
            json!({
                "room_id": room_id,
                "room_name": room_name,
                "owner_session": id.get(),
                "owner_name": owner_name,
            }),
        );
        inner
            .lobby_chat
            .push_system(format!("{} created room '{}'.", owner_name, room_name));

        inner.send(
            id,
            ServerMessage::RoomCreated {
                room_id,
                name: room_name,
                owner_fileno: id.get(),
            },
        );
        inner.push_lobby().await;
        Ok(())
    }

    async fn join_room(&self, id: SessionId, room_id: String) -> Result<(), SessionError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let room = inner
            .rooms
            .get(&room_id)
            .map(|handle| handle.room.clone())
            .ok_or(SessionError::RoomNotFound)?;
        let mut room = room.lock().await;
        if room.game_in_progress() {
            return Err(SessionError::GameInProgress);
        }
        let Some(identity) = inner.identities.get_mut(&id) else {
            return Ok(());
        };
        if identity.room.is_some() {
            return Err(SessionError::AlreadyInRoom);
        }

        identity.room = Some(room_id.clone());
        let name = identity.name.clone();
        room.add_member(id, &name);
        let owner = room.owner;
        drop(room);

        self.events.record(
            "room_joined",
            json!({ "room_id": room_id, "session": id.get(), "name": name }),
        );
        inner
            .lobby_chat
            .push_system(format!("{} joined room '{}'.", name, room_id));

        inner.send(
            id,
            ServerMessage::RoomJoined {
                room_id,
                owner_fileno: owner.get(),
            },
        );
        inner.push_lobby().await;
        Ok(())
    }

    async fn leave_room(&self, id: SessionId) -> Result<(), SessionError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let name = match inner.identities.get(&id) {
            Some(identity) if identity.room.is_some() => identity.name.clone(),
            Some(_) => return Err(SessionError::NotInRoomToLeave),
            None => return Ok(()),
        };
        let Some(room_id) = inner.detach_from_room(id, self.events.as_ref()).await else {
            return Err(SessionError::NotInRoomToLeave);
        };

        info!("{} left room {}", name, room_id);
        self.events.record(
            "room_left",
            json!({ "room_id": room_id, "session": id.get(), "name": name }),
        );
        inner
            .lobby_chat
            .push_system(format!("{} left room '{}'.", name, room_id));

        inner.send(id, ServerMessage::RoomLeft);
        inner.push_lobby().await;
        Ok(())
    }

    async fn set_team(&self, id: SessionId, team: &str) -> Result<(), SessionError> {
        let team: Option<Team> = team.parse().ok();
        let guard = self.inner.lock().await;
        let room = guard
            .identities
            .get(&id)
            .and_then(|identity| identity.room.as_ref())
            .and_then(|room_id| guard.rooms.get(room_id))
            .map(|handle| handle.room.clone());
        let (Some(team), Some(room)) = (team, room) else {
            return Err(SessionError::InvalidTeamOrNoRoom);
        };
        if !room.lock().await.set_chosen_team(id, team) {
            return Err(SessionError::InvalidTeamOrNoRoom);
        }

        debug!("Session {} chose team {}", id, team);
        self.events
            .record("team_chosen", json!({ "session": id.get(), "team": team }));
        guard.send(id, ServerMessage::TeamSetAck { team });
        guard.push_lobby().await;
        Ok(())
    }

    /// Looks up the caller's room; the registry lock is released before returning.
    async fn room_of(&self, id: SessionId) -> Result<(String, Arc<Mutex<Room>>), SessionError> {
        let inner = self.inner.lock().await;
        inner
            .identities
            .get(&id)
            .and_then(|identity| identity.room.as_ref())
            .and_then(|room_id| {
                inner
                    .rooms
                    .get(room_id)
                    .map(|handle| (room_id.clone(), handle.room.clone()))
            })
            .ok_or(SessionError::NotInRoom)
    }

    async fn start_game(&self, id: SessionId) -> Result<(), SessionError> {
        let (room_id, room) = self
            .room_of(id)
            .await
            .map_err(|_| SessionError::NotInRoomToStart)?;

        let (reply, started) = {
            let mut room = room.lock().await;
            if room.owner != id || room.member(id).is_none() {
                return Err(SessionError::NotOwner);
            }
            match room.start_game() {
                Ok(message) => {
                    self.events.record(
                        "game_started",
                        json!({ "room_id": room_id, "players": room.len() }),
                    );
                    (ServerMessage::GameStartAck { message }, true)
                }
                Err(e) => (feedback(&room, id, e.to_string(), None), false),
            }
        };

        let inner = self.inner.lock().await;
        inner.send(id, reply);
        if started {
            inner.push_lobby().await;
        }
        Ok(())
    }

    async fn clue(&self, id: SessionId, word: String, number: i64) -> Result<(), SessionError> {
        let (room_id, room) = self.room_of(id).await?;
        let reply = {
            let mut room = room.lock().await;
            ensure_playable(&room, id)?;
            match room.process_clue(id, &word, number) {
                Ok(()) => {
                    self.events.record(
                        "clue_given",
                        json!({ "room_id": room_id, "session": id.get(), "word": word, "number": number }),
                    );
                    None
                }
                Err(e) => Some(feedback(&room, id, e.to_string(), None)),
            }
        };

        if let Some(reply) = reply {
            self.send_to(id, reply).await;
        }
        Ok(())
    }

    async fn guess(&self, id: SessionId, word: String) -> Result<(), SessionError> {
        let (room_id, room) = self.room_of(id).await?;
        let (reply, views) = {
            let mut room = room.lock().await;
            ensure_playable(&room, id)?;
            match room.process_guess(id, &word) {
                Ok((outcome, message)) => {
                    self.events.record(
                        "guess_made",
                        json!({
                            "room_id": room_id,
                            "session": id.get(),
                            "word": word,
                            "found": outcome.is_success(),
                            "result": message,
                        }),
                    );
                    if outcome.game_over {
                        info!("Room {}: game over, winner {:?}", room_id, room.game().and_then(|g| g.winner));
                    }
                    (feedback(&room, id, message, Some(word)), views_of(&room))
                }
                Err(e) => (feedback(&room, id, e.to_string(), Some(word)), Vec::new()),
            }
        };

        let inner = self.inner.lock().await;
        inner.send(id, reply);
        inner.push_views(views);
        Ok(())
    }

    async fn end_turn(&self, id: SessionId) -> Result<(), SessionError> {
        let (room_id, room) = self.room_of(id).await?;
        let reply = {
            let mut room = room.lock().await;
            ensure_playable(&room, id)?;
            match room.process_end_turn(id) {
                Ok(()) => {
                    self.events.record(
                        "turn_ended",
                        json!({ "room_id": room_id, "session": id.get() }),
                    );
                    None
                }
                Err(e) => Some(feedback(&room, id, e.to_string(), None)),
            }
        };

        if let Some(reply) = reply {
            self.send_to(id, reply).await;
        }
        Ok(())
    }
}
