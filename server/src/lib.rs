//! # Codenames Session Server Library
//!
//! This library provides the authoritative server for the team word-guessing game. It
//! accepts persistent TCP connections, groups the connected players into a lobby and
//! player-created rooms, runs each room's game and keeps every participant's view in
//! step with the authoritative state.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Game Rules
//! Every clue, guess and turn change is validated and applied on the server. Clients
//! only ever see per-player snapshots: spymasters see every card colour, everyone else
//! only the colours of revealed cards.
//!
//! ### Session Management
//! Handles the full lifecycle of a connection:
//! - Placeholder identity on accept, display name on `join`
//! - Room creation, membership and team preference
//! - Cleanup on disconnect, including ending a game whose spymaster left
//!
//! ### State Broadcasting
//! A fixed-interval loop pushes lobby snapshots to idle players and game views to room
//! members. Changes made by one player reach the others through this loop.
//!
//! ### Failover
//! A standby process listens for the primary's heartbeat datagrams and starts serving
//! on its own once they stop.
//!
//! ## Architecture Design
//!
//! ### Task Per Connection
//! Each connection runs in its own task with a dedicated writer fed by a queue. All
//! sends go through the session registry, which owns the queue senders, so frames from
//! different tasks never interleave.
//!
//! ### Two Lock Levels
//! The registry (identities, lobby chat, room directory) sits behind one lock and every
//! room behind its own. Game requests only hold their room's lock while they run, so
//! rooms never wait on each other.
//!
//! ## Module Organization
//!
//! - `config`: listen addresses, broadcast period and heartbeat timings
//! - `events`: fire-and-forget audit sink
//! - `game`: board generation, team assignment and the clue/guess/end-turn rules
//! - `room`: room membership, chat and per-viewer game views
//! - `registry`: session table, lobby and request dispatch
//! - `connection`: per-connection read loop and writer
//! - `broadcast`: the periodic state push
//! - `network`: TCP accept loop and shutdown signalling
//! - `failover`: heartbeat sender and standby supervisor
//!
//! The wire format itself lives in the `shared` crate.

pub mod broadcast;
pub mod config;
pub mod connection;
pub mod events;
pub mod failover;
pub mod game;
pub mod network;
pub mod registry;
pub mod room;
