//! Lobby coordination: deciding when a match starts and who controls what.
//!
//! A lobby epoch begins when players gather and ends when the match starts
//! and is later closed by GAME_END (or abandoned by every player). Within an
//! epoch the start fires at most once.

use log::info;
use shared::{EntityId, PlayerId};

use crate::client_manager::ClientManager;
use crate::connection::ConnectionId;

/// Controlled entity for a player. Identity mapping: stable across epochs
/// and unique because player IDs are.
pub fn controlled_entity_id(player_id: PlayerId) -> EntityId {
    EntityId::from(player_id)
}

/// One player's seat in a started match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityAssignment {
    pub connection: ConnectionId,
    pub player_id: PlayerId,
    pub entity_id: EntityId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchStart {
    pub epoch: u64,
    pub assignments: Vec<EntityAssignment>,
}

#[derive(Debug, Default)]
pub struct LobbyCoordinator {
    epoch: u64,
    started: bool,
}

impl LobbyCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Re-evaluates readiness after a change. Starts the match the first time
    /// every registered player is ready in this epoch.
    pub fn evaluate(&mut self, clients: &mut ClientManager) -> Option<MatchStart> {
        if self.started || !clients.all_ready() {
            return None;
        }

        let assignments: Vec<EntityAssignment> = clients
            .start_match()
            .into_iter()
            .map(|player| EntityAssignment {
                connection: player.connection,
                player_id: player.id,
                entity_id: controlled_entity_id(player.id),
            })
            .collect();

        self.started = true;
        info!(
            "All {} players ready, starting match for epoch {}",
            assignments.len(),
            self.epoch
        );

        Some(MatchStart {
            epoch: self.epoch,
            assignments,
        })
    }

    /// Closes the running match and opens a new epoch with readiness cleared.
    /// Returns the epoch that ended, or `None` if no match was running.
    pub fn end_match(&mut self, clients: &mut ClientManager) -> Option<u64> {
        if !self.started {
            return None;
        }

        clients.end_match();
        let ended = self.epoch;
        self.epoch += 1;
        self.started = false;
        info!("Match for epoch {} ended, lobby reopened", ended);
        Some(ended)
    }

    /// Ends a started epoch once its last player has left
    pub fn release_if_empty(&mut self, clients: &mut ClientManager) -> Option<u64> {
        if self.started && clients.registered_count() == 0 {
            info!("Every player left the match of epoch {}", self.epoch);
            return self.end_match(clients);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;

    fn lobby_with_players(names: &[&str]) -> ClientManager {
        let mut clients = ClientManager::new(4);
        for (i, name) in names.iter().enumerate() {
            let id = ConnectionId(i as u32 + 1);
            clients.add_connection(id, "127.0.0.1:1".parse().unwrap());
            clients.try_admit(id, name).unwrap();
        }
        clients
    }

    #[test]
    fn test_entity_mapping_is_identity() {
        assert_eq!(controlled_entity_id(1), 1);
        assert_eq!(controlled_entity_id(255), 255);
    }

    #[test]
    fn test_no_start_without_players() {
        let mut clients = ClientManager::new(4);
        let mut lobby = LobbyCoordinator::new();
        assert!(lobby.evaluate(&mut clients).is_none());
        assert!(!lobby.is_started());
    }

    #[test]
    fn test_start_waits_for_last_player() {
        let mut clients = lobby_with_players(&["a", "b"]);
        let mut lobby = LobbyCoordinator::new();

        clients.set_ready(1, true);
        assert!(lobby.evaluate(&mut clients).is_none());

        clients.set_ready(2, true);
        let start = lobby.evaluate(&mut clients).unwrap();
        assert_eq!(start.epoch, 0);
        assert_eq!(start.assignments.len(), 2);
        assert_ne!(start.assignments[0].entity_id, start.assignments[1].entity_id);
        assert_eq!(
            clients.state(ConnectionId(2)),
            Some(ConnectionState::InGame { player_id: 2 })
        );
    }

    #[test]
    fn test_start_fires_once_per_epoch() {
        let mut clients = lobby_with_players(&["solo"]);
        let mut lobby = LobbyCoordinator::new();

        clients.set_ready(1, true);
        assert!(lobby.evaluate(&mut clients).is_some());
        assert!(lobby.evaluate(&mut clients).is_none());
        assert!(lobby.is_started());
    }

    #[test]
    fn test_end_match_opens_new_epoch() {
        let mut clients = lobby_with_players(&["a", "b"]);
        let mut lobby = LobbyCoordinator::new();
        clients.set_ready(1, true);
        clients.set_ready(2, true);
        lobby.evaluate(&mut clients).unwrap();

        assert_eq!(lobby.end_match(&mut clients), Some(0));
        assert_eq!(lobby.epoch(), 1);
        assert!(!lobby.is_started());
        assert!(!clients.all_ready());

        clients.set_ready(1, true);
        clients.set_ready(2, true);
        assert_eq!(lobby.evaluate(&mut clients).unwrap().epoch, 1);
    }

    #[test]
    fn test_end_match_without_match() {
        let mut clients = lobby_with_players(&["a"]);
        let mut lobby = LobbyCoordinator::new();
        assert_eq!(lobby.end_match(&mut clients), None);
        assert_eq!(lobby.epoch(), 0);
    }

    #[test]
    fn test_release_when_everyone_left() {
        let mut clients = lobby_with_players(&["a"]);
        let mut lobby = LobbyCoordinator::new();
        clients.set_ready(1, true);
        lobby.evaluate(&mut clients).unwrap();

        assert_eq!(lobby.release_if_empty(&mut clients), None);

        clients.remove(ConnectionId(1));
        assert_eq!(lobby.release_if_empty(&mut clients), Some(0));
        assert!(!lobby.is_started());
    }
}
