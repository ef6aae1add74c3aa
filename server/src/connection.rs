//! Per-connection lifecycle
//!
//! ```text
//! Connecting ──CONNECT_REQ ok──▶ Registered(ready=false) ◀──READY_STATUS──▶ Registered(ready=true)
//!     │ ▲                                                                          │
//!     └─┘ rejected (peer may retry)                                  all ready ───▶ InGame
//!                                                                                   │
//!                       GAME_END: InGame ──▶ Registered(ready=false) ◀──────────────┘
//!
//! Any state ──DISCONNECT_REQ / transport close / framing error / full write queue──▶ Disconnected
//! ```

use shared::{ConnectStatus, Packet, PlayerId};
use std::fmt;

/// Opaque handle the server assigns to every accepted stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, no player admitted yet
    Connecting,
    Registered { player_id: PlayerId, ready: bool },
    InGame { player_id: PlayerId },
    /// Terminal
    Disconnected,
}

impl ConnectionState {
    pub fn player_id(&self) -> Option<PlayerId> {
        match self {
            ConnectionState::Registered { player_id, .. } | ConnectionState::InGame { player_id } => {
                Some(*player_id)
            }
            ConnectionState::Connecting | ConnectionState::Disconnected => None,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.player_id().is_some()
    }

    pub fn is_ready(&self) -> bool {
        matches!(
            self,
            ConnectionState::Registered { ready: true, .. } | ConnectionState::InGame { .. }
        )
    }

    /// Whether `packet` may be acted on in this state. Everything else is
    /// dropped without a reply.
    pub fn permits(&self, packet: &Packet) -> bool {
        match (self, packet) {
            (ConnectionState::Connecting, Packet::ConnectReq { .. }) => true,
            (ConnectionState::Registered { .. }, Packet::ReadyStatus { .. }) => true,
            (
                ConnectionState::Connecting
                | ConnectionState::Registered { .. }
                | ConnectionState::InGame { .. },
                Packet::DisconnectReq,
            ) => true,
            _ => false,
        }
    }

    /// Applies an admission result. A rejection loops back to `Connecting`.
    pub fn admitted(self, result: Result<PlayerId, ConnectStatus>) -> Self {
        match (self, result) {
            (ConnectionState::Connecting, Ok(player_id)) => ConnectionState::Registered {
                player_id,
                ready: false,
            },
            (ConnectionState::Connecting, Err(_)) => ConnectionState::Connecting,
            (state, _) => state,
        }
    }

    pub fn with_ready(self, ready: bool) -> Self {
        match self {
            ConnectionState::Registered { player_id, .. } => {
                ConnectionState::Registered { player_id, ready }
            }
            other => other,
        }
    }

    /// Only ready players enter the match
    pub fn start_match(self) -> Self {
        match self {
            ConnectionState::Registered {
                player_id,
                ready: true,
            } => ConnectionState::InGame { player_id },
            other => other,
        }
    }

    /// Back to the lobby with readiness cleared
    pub fn end_match(self) -> Self {
        match self {
            ConnectionState::InGame { player_id } | ConnectionState::Registered { player_id, .. } => {
                ConnectionState::Registered {
                    player_id,
                    ready: false,
                }
            }
            other => other,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Registered { player_id, ready } => {
                write!(f, "registered(player {}, ready={})", player_id, ready)
            }
            ConnectionState::InGame { player_id } => write!(f, "in-game(player {})", player_id),
            ConnectionState::Disconnected => write!(f, "disconnected"),
        }
    }
}
