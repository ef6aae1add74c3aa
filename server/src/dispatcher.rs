//! Protocol logic of the lobby, free of any I/O.
//!
//! The network layer feeds connection events in and carries out the returned
//! [`Action`]s in order. Keeping this side synchronous lets every lobby rule
//! be tested without sockets.

use log::{debug, info, warn};
use shared::{ConnectStatus, DecodeError, FramingError, Packet, PlayerId};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use crate::client_manager::ClientManager;
use crate::connection::{ConnectionId, ConnectionState};
use crate::lobby::{LobbyCoordinator, MatchStart};

/// Lobby milestones published to collaborators such as a game simulation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyEvent {
    MatchStarted(MatchStart),
    /// `winning_player_id` is 0 when the match was abandoned
    MatchEnded { epoch: u64, winning_player_id: PlayerId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Send { to: ConnectionId, packet: Packet },
    /// Flush queued output, then close the stream
    Close { connection: ConnectionId },
    Event(LobbyEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Requested,
    TransportClosed,
    FramingError,
    HandshakeTimeout,
    /// The peer stopped draining its outgoing queue
    SlowConsumer,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DisconnectReason::Requested => "requested",
            DisconnectReason::TransportClosed => "transport closed",
            DisconnectReason::FramingError => "framing error",
            DisconnectReason::HandshakeTimeout => "handshake timeout",
            DisconnectReason::SlowConsumer => "write queue full",
        };
        f.write_str(reason)
    }
}

pub struct Dispatcher {
    clients: ClientManager,
    lobby: LobbyCoordinator,
}

impl Dispatcher {
    pub fn new(max_players: u8) -> Self {
        Self {
            clients: ClientManager::new(max_players),
            lobby: LobbyCoordinator::new(),
        }
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    pub fn lobby(&self) -> &LobbyCoordinator {
        &self.lobby
    }

    pub fn connection_opened(&mut self, id: ConnectionId, addr: SocketAddr) {
        if self.clients.add_connection(id, addr) {
            info!("Connection {} opened from {}", id, addr);
        }
    }

    /// Handles one decoded packet. Packets not allowed in the connection's
    /// current state are dropped without a reply.
    pub fn packet_received(&mut self, id: ConnectionId, packet: Packet) -> Vec<Action> {
        if !packet.op_code().is_client_to_server() {
            debug!(
                "Discarding server-bound {:?} sent by connection {}",
                packet.op_code(),
                id
            );
            return Vec::new();
        }

        let state = match self.clients.state(id) {
            Some(state) => state,
            None => {
                debug!("Dropping {:?} from closed connection {}", packet.op_code(), id);
                return Vec::new();
            }
        };

        if !state.permits(&packet) {
            debug!(
                "Discarding {:?} from connection {} while {}",
                packet.op_code(),
                id,
                state
            );
            return Vec::new();
        }

        match packet {
            Packet::ConnectReq { username } => self.handle_connect_req(id, &username),
            Packet::ReadyStatus { is_ready } => self.handle_ready_status(state, is_ready),
            Packet::DisconnectReq => self.disconnect(id, DisconnectReason::Requested),
            Packet::ConnectAck { .. }
            | Packet::NotifyDisconnect { .. }
            | Packet::GameStart { .. }
            | Packet::GameEnd { .. }
            | Packet::NotifyConnect { .. }
            | Packet::NotifyReady { .. } => Vec::new(),
        }
    }

    /// A malformed packet is skipped; the stream stays usable
    pub fn decode_failed(&mut self, id: ConnectionId, error: &DecodeError) {
        warn!("Discarding malformed packet from connection {}: {}", id, error);
    }

    /// The stream can no longer be framed, so the peer is dropped
    pub fn framing_failed(&mut self, id: ConnectionId, error: &FramingError) -> Vec<Action> {
        warn!("Framing error on connection {}: {}", id, error);
        self.disconnect(id, DisconnectReason::FramingError)
    }

    pub fn connection_closed(&mut self, id: ConnectionId) -> Vec<Action> {
        self.disconnect(id, DisconnectReason::TransportClosed)
    }

    /// The peer's outgoing queue overflowed, so it is dropped like any other leaver
    pub fn peer_stalled(&mut self, id: ConnectionId) -> Vec<Action> {
        self.disconnect(id, DisconnectReason::SlowConsumer)
    }

    /// Closes the running match, reporting `winning_player_id` to everyone
    pub fn end_game(&mut self, winning_player_id: PlayerId) -> Vec<Action> {
        let epoch = match self.lobby.end_match(&mut self.clients) {
            Some(epoch) => epoch,
            None => {
                debug!("Ignoring game end: no match running");
                return Vec::new();
            }
        };

        let mut actions = self.broadcast(Packet::GameEnd { winning_player_id }, None);
        actions.push(Action::Event(LobbyEvent::MatchEnded {
            epoch,
            winning_player_id,
        }));
        actions
    }

    /// Drops connections that have not logged in within `timeout`
    pub fn evict_expired(&mut self, timeout: Duration) -> Vec<Action> {
        let mut actions = Vec::new();
        for id in self.clients.expired_handshakes(timeout) {
            actions.extend(self.disconnect(id, DisconnectReason::HandshakeTimeout));
        }
        actions
    }

    fn handle_connect_req(&mut self, id: ConnectionId, raw_username: &str) -> Vec<Action> {
        if self.lobby.is_started() {
            info!(
                "Connection {} rejected: match {} in progress",
                id,
                self.lobby.epoch()
            );
            return vec![connect_ack(id, 0, ConnectStatus::InGame)];
        }

        let player_id = match self.clients.try_admit(id, raw_username) {
            Ok(player_id) => player_id,
            Err(status) => return vec![connect_ack(id, 0, status)],
        };

        let mut actions = vec![connect_ack(id, player_id, ConnectStatus::Ok)];
        let players = self.clients.players();
        let newcomer = players.iter().find(|p| p.id == player_id).cloned();

        for other in players.iter().filter(|p| p.id != player_id) {
            actions.push(Action::Send {
                to: id,
                packet: Packet::NotifyConnect {
                    player_id: other.id,
                    username: other.username.clone(),
                },
            });
            if other.ready {
                actions.push(Action::Send {
                    to: id,
                    packet: Packet::NotifyReady {
                        player_id: other.id,
                        is_ready: true,
                    },
                });
            }
            if let Some(newcomer) = &newcomer {
                actions.push(Action::Send {
                    to: other.connection,
                    packet: Packet::NotifyConnect {
                        player_id: newcomer.id,
                        username: newcomer.username.clone(),
                    },
                });
            }
        }

        actions
    }

    fn handle_ready_status(&mut self, state: ConnectionState, is_ready: bool) -> Vec<Action> {
        let player_id = match state.player_id() {
            Some(player_id) => player_id,
            None => return Vec::new(),
        };

        if !self.clients.set_ready(player_id, is_ready) {
            return Vec::new();
        }
        info!("Player {} is {}", player_id, if is_ready { "ready" } else { "not ready" });

        let mut actions = self.broadcast(
            Packet::NotifyReady {
                player_id,
                is_ready,
            },
            None,
        );

        if let Some(start) = self.lobby.evaluate(&mut self.clients) {
            for seat in &start.assignments {
                actions.push(Action::Send {
                    to: seat.connection,
                    packet: Packet::GameStart {
                        controlled_entity_id: seat.entity_id,
                    },
                });
            }
            actions.push(Action::Event(LobbyEvent::MatchStarted(start)));
        }

        actions
    }

    /// Removes the connection and tells the remaining players. Safe to call
    /// more than once for the same connection.
    fn disconnect(&mut self, id: ConnectionId, reason: DisconnectReason) -> Vec<Action> {
        let mut actions = Vec::new();

        if let Some(departure) = self.clients.remove(id) {
            info!(
                "Connection {} from {} {} ({})",
                id, departure.client.addr, departure.client.state, reason
            );

            if let Some(player) = departure.player {
                actions.extend(self.broadcast(
                    Packet::NotifyDisconnect {
                        player_id: player.id,
                    },
                    Some(player.id),
                ));
            }

            if let Some(epoch) = self.lobby.release_if_empty(&mut self.clients) {
                actions.push(Action::Event(LobbyEvent::MatchEnded {
                    epoch,
                    winning_player_id: 0,
                }));
            }
        }

        actions.push(Action::Close { connection: id });
        actions
    }

    fn broadcast(&self, packet: Packet, except: Option<PlayerId>) -> Vec<Action> {
        self.clients
            .players()
            .into_iter()
            .filter(|p| Some(p.id) != except)
            .map(|p| Action::Send {
                to: p.connection,
                packet: packet.clone(),
            })
            .collect()
    }
}

fn connect_ack(to: ConnectionId, player_id: PlayerId, status: ConnectStatus) -> Action {
    Action::Send {
        to,
        packet: Packet::ConnectAck { player_id, status },
    }
}
