//! # Lobby Client Library
//!
//! A minimal client for the lobby protocol. It connects over TCP, logs in,
//! toggles readiness and waits for the match to start. The `client` binary
//! wraps it in a command-line tool; the server's integration tests drive
//! real sessions through it.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::LobbyClient;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let timeout = Duration::from_secs(5);
//!     let mut lobby = LobbyClient::connect("127.0.0.1:50000").await?;
//!
//!     let player_id = lobby.login("Alice", timeout).await?;
//!     lobby.set_ready(true).await?;
//!     let entity = lobby.wait_for_game_start(Duration::from_secs(60)).await?;
//!     println!("player {} controls entity {}", player_id, entity);
//!
//!     lobby.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod network;

pub use network::{ClientError, LobbyClient};
