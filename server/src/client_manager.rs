//! Connection registry for the lobby server
//!
//! This module is the authoritative table of accepted connections and the
//! players admitted on them. It enforces the lobby-wide invariants:
//! - Registered players never exceed the configured capacity
//! - Normalized usernames are unique among registered players
//! - Player IDs are unique among registered players and reused after leave
//! - Readiness only exists for registered players
//!
//! All mutation goes through `&mut self`, so the server's single event loop
//! serializes admission, removal and readiness updates.

use log::{debug, info, warn};
use shared::{ConnectStatus, PlayerId, MAX_USERNAME_LEN};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::connection::{ConnectionId, ConnectionState};

/// Normalizes a username for admission and uniqueness checks
///
/// Drops everything from the first NUL, trims leading and trailing ASCII
/// whitespace and caps the result at [`MAX_USERNAME_LEN`] bytes. Comparison
/// stays case-sensitive. Returns `None` when nothing is left.
pub fn normalize_username(raw: &str) -> Option<String> {
    let before_nul = raw.split('\0').next().unwrap_or_default();

    let mut end = before_nul.len().min(MAX_USERNAME_LEN);
    while !before_nul.is_char_boundary(end) {
        end -= 1;
    }

    let trimmed = before_nul[..end].trim_matches(|c: char| c.is_ascii_whitespace());
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Snapshot of one registered player
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: PlayerId,
    pub username: String,
    pub connection: ConnectionId,
    pub ready: bool,
}

/// One accepted stream and, once admitted, its player
#[derive(Debug)]
pub struct Client {
    pub id: ConnectionId,
    pub addr: SocketAddr,
    /// When the stream was accepted; drives handshake eviction
    pub connected_at: Instant,
    pub state: ConnectionState,
    /// Normalized username, present while registered
    pub username: Option<String>,
}

impl Client {
    pub fn new(id: ConnectionId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            connected_at: Instant::now(),
            state: ConnectionState::Connecting,
            username: None,
        }
    }

    pub fn player(&self) -> Option<Player> {
        let id = self.state.player_id()?;
        let username = self.username.clone()?;
        Some(Player {
            id,
            username,
            connection: self.id,
            ready: self.state.is_ready(),
        })
    }

    /// True if the client never logged in within `timeout`
    pub fn is_handshake_expired(&self, timeout: Duration) -> bool {
        self.state == ConnectionState::Connecting && self.connected_at.elapsed() >= timeout
    }
}

/// A connection that has left the registry
#[derive(Debug)]
pub struct Departure {
    pub client: Client,
    /// The player it held when removed
    pub player: Option<Player>,
}

pub struct ClientManager {
    /// Accepted connections indexed by handle
    clients: HashMap<ConnectionId, Client>,
    /// Lobby capacity in registered players
    max_players: usize,
}

impl ClientManager {
    pub fn new(max_players: u8) -> Self {
        Self {
            clients: HashMap::new(),
            max_players: max_players as usize,
        }
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }

    /// Tracks a freshly accepted stream in the `Connecting` state.
    /// Returns false if the handle is already known.
    pub fn add_connection(&mut self, id: ConnectionId, addr: SocketAddr) -> bool {
        if self.clients.contains_key(&id) {
            warn!("Connection {} already registered", id);
            return false;
        }
        debug!("Connection {} accepted from {}", id, addr);
        self.clients.insert(id, Client::new(id, addr));
        true
    }

    /// Attempts to admit a player on `id` under `raw_username`
    ///
    /// Checks run in order: empty name, duplicate name, capacity. On success
    /// the smallest free player ID is assigned and the connection becomes
    /// `Registered(ready=false)`; on rejection it stays `Connecting`.
    pub fn try_admit(
        &mut self,
        id: ConnectionId,
        raw_username: &str,
    ) -> Result<PlayerId, ConnectStatus> {
        match self.clients.get(&id) {
            Some(client) if client.state == ConnectionState::Connecting => {}
            Some(client) => {
                warn!("Connection {} cannot log in while {}", id, client.state);
                return Err(ConnectStatus::BadUsername);
            }
            None => {
                warn!("Admission attempt on unknown connection {}", id);
                return Err(ConnectStatus::BadUsername);
            }
        }

        let username = match normalize_username(raw_username) {
            Some(name) => name,
            None => {
                info!("Connection {} rejected: empty username", id);
                return Err(ConnectStatus::BadUsername);
            }
        };

        if self.is_username_taken(&username) {
            info!("Connection {} rejected: username '{}' taken", id, username);
            return Err(ConnectStatus::BadUsername);
        }

        if self.registered_count() >= self.max_players {
            info!(
                "Connection {} rejected: lobby full ({}/{})",
                id,
                self.registered_count(),
                self.max_players
            );
            return Err(ConnectStatus::ServerFull);
        }

        let player_id = self.next_free_player_id().ok_or(ConnectStatus::ServerFull)?;

        // Presence was checked above
        if let Some(client) = self.clients.get_mut(&id) {
            client.state = client.state.admitted(Ok(player_id));
            info!(
                "Connection {} from {} admitted as player {} ('{}')",
                id, client.addr, player_id, username
            );
            client.username = Some(username);
        }

        Ok(player_id)
    }

    /// Forgets a connection and releases its player ID and username.
    /// The returned record is `Disconnected`; the player it held, if any, is
    /// captured beforehand. Removing an unknown connection is a no-op.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Departure> {
        let mut client = self.clients.remove(&id)?;
        let player = client.player();
        match &player {
            Some(player) => info!(
                "Player {} ('{}') on connection {} removed",
                player.id, player.username, id
            ),
            None => debug!("Connection {} removed before logging in", id),
        }
        client.state = ConnectionState::Disconnected;
        Some(Departure { client, player })
    }

    /// Updates readiness for a lobby player. Returns false (and logs) when
    /// the player is unknown or not in the lobby.
    pub fn set_ready(&mut self, player_id: PlayerId, ready: bool) -> bool {
        let client = self
            .clients
            .values_mut()
            .find(|c| c.state.player_id() == Some(player_id));

        match client {
            Some(client) if matches!(client.state, ConnectionState::Registered { .. }) => {
                client.state = client.state.with_ready(ready);
                true
            }
            Some(client) => {
                debug!(
                    "Ignoring readiness for player {} while {}",
                    player_id, client.state
                );
                false
            }
            None => {
                warn!("Readiness update for unknown player {}", player_id);
                false
            }
        }
    }

    /// True when at least one player is registered and all of them are ready
    pub fn all_ready(&self) -> bool {
        let mut registered = self.clients.values().filter(|c| c.state.is_registered()).peekable();
        registered.peek().is_some() && registered.all(|c| c.state.is_ready())
    }

    /// Moves every ready lobby player into the match, returning them by player ID
    pub fn start_match(&mut self) -> Vec<Player> {
        let mut started: Vec<Player> = self
            .clients
            .values_mut()
            .filter(|c| matches!(c.state, ConnectionState::Registered { ready: true, .. }))
            .filter_map(|c| {
                c.state = c.state.start_match();
                c.player()
            })
            .collect();
        started.sort_by_key(|p| p.id);
        started
    }

    /// Returns every registered player to the lobby with readiness cleared
    pub fn end_match(&mut self) {
        for client in self.clients.values_mut() {
            client.state = client.state.end_match();
        }
    }

    pub fn state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.clients.get(&id).map(|c| c.state)
    }

    /// Registered players ordered by player ID
    pub fn players(&self) -> Vec<Player> {
        let mut players: Vec<Player> = self.clients.values().filter_map(Client::player).collect();
        players.sort_by_key(|p| p.id);
        players
    }

    pub fn is_username_taken(&self, username: &str) -> bool {
        self.clients
            .values()
            .any(|c| c.state.is_registered() && c.username.as_deref() == Some(username))
    }

    /// Connections still `Connecting` after `timeout`
    pub fn expired_handshakes(&self, timeout: Duration) -> Vec<ConnectionId> {
        let mut expired: Vec<ConnectionId> = self
            .clients
            .values()
            .filter(|c| c.is_handshake_expired(timeout))
            .map(|c| c.id)
            .collect();
        expired.sort();
        expired
    }

    pub fn registered_count(&self) -> usize {
        self.clients
            .values()
            .filter(|c| c.state.is_registered())
            .count()
    }

    /// Number of tracked connections, logged in or not
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Smallest player ID not held by a registered player
    fn next_free_player_id(&self) -> Option<PlayerId> {
        (1..=PlayerId::MAX).find(|candidate| {
            !self
                .clients
                .values()
                .any(|c| c.state.player_id() == Some(*candidate))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn manager_with_connections(max_players: u8, count: u32) -> ClientManager {
        let mut manager = ClientManager::new(max_players);
        for id in 1..=count {
            manager.add_connection(ConnectionId(id), test_addr());
        }
        manager
    }

    #[test]
    fn test_normalize_trims_whitespace() {
        assert_eq!(normalize_username("  Player  "), Some("Player".to_string()));
        assert_eq!(normalize_username("\tTab\n"), Some("Tab".to_string()));
        assert_eq!(normalize_username("In Between"), Some("In Between".to_string()));
    }

    #[test]
    fn test_normalize_rejects_blank() {
        assert_eq!(normalize_username(""), None);
        assert_eq!(normalize_username("     "), None);
        assert_eq!(normalize_username("\0Hidden"), None);
    }

    #[test]
    fn test_normalize_strips_after_nul() {
        assert_eq!(normalize_username("abc\0def"), Some("abc".to_string()));
    }

    #[test]
    fn test_normalize_truncates() {
        let name = normalize_username(&"a".repeat(50)).unwrap();
        assert_eq!(name.len(), 31);
    }

    #[test]
    fn test_client_creation() {
        let client = Client::new(ConnectionId(1), test_addr());
        assert_eq!(client.state, ConnectionState::Connecting);
        assert!(client.username.is_none());
        assert!(client.player().is_none());
    }

    #[test]
    fn test_handshake_expiry() {
        let mut client = Client::new(ConnectionId(1), test_addr());
        assert!(!client.is_handshake_expired(Duration::from_secs(1)));

        client.connected_at = Instant::now() - Duration::from_secs(2);
        assert!(client.is_handshake_expired(Duration::from_secs(1)));

        client.state = ConnectionState::Registered {
            player_id: 1,
            ready: false,
        };
        assert!(!client.is_handshake_expired(Duration::from_secs(1)));
    }

    #[test]
    fn test_add_connection_twice() {
        let mut manager = ClientManager::new(4);
        assert!(manager.add_connection(ConnectionId(1), test_addr()));
        assert!(!manager.add_connection(ConnectionId(1), test_addr()));
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.registered_count(), 0);
    }

    #[test]
    fn test_admit_assigns_smallest_free_id() {
        let mut manager = manager_with_connections(4, 3);

        assert_eq!(manager.try_admit(ConnectionId(1), "a"), Ok(1));
        assert_eq!(manager.try_admit(ConnectionId(2), "b"), Ok(2));

        manager.remove(ConnectionId(1));
        assert_eq!(manager.try_admit(ConnectionId(3), "c"), Ok(1));
    }

    #[test]
    fn test_admit_rejects_when_full() {
        let mut manager = manager_with_connections(4, 5);
        for id in 1..=4 {
            assert!(manager.try_admit(ConnectionId(id), &format!("p{}", id)).is_ok());
        }

        assert_eq!(
            manager.try_admit(ConnectionId(5), "p5"),
            Err(ConnectStatus::ServerFull)
        );
        assert_eq!(manager.registered_count(), 4);
        assert_eq!(manager.state(ConnectionId(5)), Some(ConnectionState::Connecting));
    }

    #[test]
    fn test_admit_rejects_duplicate_after_trim() {
        let mut manager = manager_with_connections(4, 2);
        assert!(manager.try_admit(ConnectionId(1), "Player").is_ok());
        assert_eq!(
            manager.try_admit(ConnectionId(2), "  Player "),
            Err(ConnectStatus::BadUsername)
        );
    }

    #[test]
    fn test_usernames_are_case_sensitive() {
        let mut manager = manager_with_connections(4, 2);
        assert!(manager.try_admit(ConnectionId(1), "player").is_ok());
        assert!(manager.try_admit(ConnectionId(2), "Player").is_ok());
    }

    #[test]
    fn test_duplicate_checked_before_capacity() {
        let mut manager = manager_with_connections(1, 2);
        assert!(manager.try_admit(ConnectionId(1), "Solo").is_ok());
        assert_eq!(
            manager.try_admit(ConnectionId(2), "Solo"),
            Err(ConnectStatus::BadUsername)
        );
        assert_eq!(
            manager.try_admit(ConnectionId(2), "Other"),
            Err(ConnectStatus::ServerFull)
        );
    }

    #[test]
    fn test_admit_blank_username() {
        let mut manager = manager_with_connections(4, 1);
        assert_eq!(
            manager.try_admit(ConnectionId(1), "     "),
            Err(ConnectStatus::BadUsername)
        );
        assert_eq!(manager.registered_count(), 0);
    }

    #[test]
    fn test_admit_unknown_or_registered_connection() {
        let mut manager = manager_with_connections(4, 1);
        assert_eq!(
            manager.try_admit(ConnectionId(9), "ghost"),
            Err(ConnectStatus::BadUsername)
        );

        assert!(manager.try_admit(ConnectionId(1), "first").is_ok());
        assert_eq!(
            manager.try_admit(ConnectionId(1), "second"),
            Err(ConnectStatus::BadUsername)
        );
        assert_eq!(manager.players()[0].username, "first");
    }

    #[test]
    fn test_remove_releases_username_and_is_idempotent() {
        let mut manager = manager_with_connections(4, 2);
        assert!(manager.try_admit(ConnectionId(1), "Player").is_ok());

        let removed = manager.remove(ConnectionId(1)).unwrap();
        assert_eq!(removed.player.map(|p| p.id), Some(1));
        assert_eq!(removed.client.state, ConnectionState::Disconnected);
        assert_eq!(removed.client.player(), None);
        assert!(manager.remove(ConnectionId(1)).is_none());
        assert!(!manager.is_username_taken("Player"));

        assert_eq!(manager.try_admit(ConnectionId(2), "Player"), Ok(1));
    }

    #[test]
    fn test_set_ready_and_all_ready() {
        let mut manager = manager_with_connections(4, 2);
        assert!(!manager.all_ready());

        let a = manager.try_admit(ConnectionId(1), "a").unwrap();
        let b = manager.try_admit(ConnectionId(2), "b").unwrap();

        assert!(manager.set_ready(a, true));
        assert!(!manager.all_ready());
        assert!(manager.set_ready(b, true));
        assert!(manager.all_ready());

        assert!(manager.set_ready(b, false));
        assert!(!manager.all_ready());
    }

    #[test]
    fn test_unregistered_connections_do_not_block_all_ready() {
        let mut manager = manager_with_connections(4, 2);
        let a = manager.try_admit(ConnectionId(1), "a").unwrap();
        manager.set_ready(a, true);
        assert!(manager.all_ready());
    }

    #[test]
    fn test_set_ready_unknown_player() {
        let mut manager = ClientManager::new(4);
        assert!(!manager.set_ready(7, true));
        assert!(!manager.all_ready());
    }

    #[test]
    fn test_start_and_end_match() {
        let mut manager = manager_with_connections(4, 3);
        let a = manager.try_admit(ConnectionId(1), "a").unwrap();
        let b = manager.try_admit(ConnectionId(2), "b").unwrap();
        manager.set_ready(b, true);
        manager.set_ready(a, true);

        let started = manager.start_match();
        assert_eq!(started.iter().map(|p| p.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(
            manager.state(ConnectionId(1)),
            Some(ConnectionState::InGame { player_id: a })
        );
        assert_eq!(manager.state(ConnectionId(3)), Some(ConnectionState::Connecting));
        assert!(!manager.set_ready(a, false));

        manager.end_match();
        assert_eq!(
            manager.state(ConnectionId(2)),
            Some(ConnectionState::Registered {
                player_id: b,
                ready: false
            })
        );
        assert!(!manager.all_ready());
    }

    #[test]
    fn test_expired_handshakes() {
        let mut manager = manager_with_connections(4, 3);
        manager.try_admit(ConnectionId(2), "logged-in").unwrap();

        for id in [1, 2] {
            if let Some(client) = manager.clients.get_mut(&ConnectionId(id)) {
                client.connected_at = Instant::now() - Duration::from_secs(10);
            }
        }

        assert_eq!(
            manager.expired_handshakes(Duration::from_secs(5)),
            vec![ConnectionId(1)]
        );
    }
}
