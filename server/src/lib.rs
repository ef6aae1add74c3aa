//! # Lobby Server Library
//!
//! This library provides the authoritative lobby for the multiplayer action
//! game. Players connect over TCP, log in with a username, flag themselves
//! ready and are handed their controlled entity once everyone is ready.
//!
//! ## Core Responsibilities
//!
//! ### Admission
//! Every `CONNECT_REQ` is answered with a `CONNECT_ACK`. Admission enforces
//! lobby capacity, non-empty unique usernames and refuses newcomers while a
//! match is running. A rejected peer keeps its connection and may retry.
//!
//! ### Readiness and Match Start
//! Readiness changes are broadcast to the lobby. The first time every
//! registered player is ready, each one receives `GAME_START` with a distinct
//! controlled entity ID and the lobby locks until the match ends.
//!
//! ### Departure
//! Disconnect requests, closed streams and framing errors all release the
//! player's slot, username and ID, and the remaining players are told.
//!
//! ## Architecture Design
//!
//! ### Single Event Loop
//! One task owns the registry and lobby state. Connection tasks only frame
//! bytes and forward typed messages over a channel, so every state change
//! happens in arrival order without locks.
//!
//! ### Per-Connection Tasks
//! Each accepted stream gets a reader task with its own frame decoder and a
//! writer task draining a bounded outgoing queue. Frames are queued without
//! waiting, and a peer whose queue fills up is disconnected.
//!
//! ## Module Organization
//!
//! - `config`: command-line and programmatic configuration
//! - `connection`: connection handles and the per-connection state machine
//! - `client_manager`: the registry of connections and admitted players
//! - `lobby`: match start detection and entity assignment
//! - `dispatcher`: protocol rules turning events into actions, without I/O
//! - `network`: listener, connection tasks and the main loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::{Server, ServerCommand, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     let commands = server.command_sender();
//!     let mut events = server.subscribe();
//!
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("lobby event: {:?}", event);
//!         }
//!     });
//!
//!     // Later, when the simulation decides the outcome:
//!     // commands.send(ServerCommand::EndGame { winning_player_id: 1 })?;
//!     # drop(commands);
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod lobby;
pub mod network;

pub use config::{ConfigError, ServerConfig};
pub use connection::{ConnectionId, ConnectionState};
pub use dispatcher::LobbyEvent;
pub use lobby::{EntityAssignment, MatchStart};
pub use network::{log_lobby_events, Server, ServerCommand, ServerError};
