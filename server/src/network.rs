//! Server network layer handling TCP streams and lobby event coordination

use bytes::Bytes;
use log::{debug, error, info, warn};
use shared::{DecodeError, FrameDecoder, FramingError, Packet};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::{ConfigError, ServerConfig};
use crate::connection::ConnectionId;
use crate::dispatcher::{Action, Dispatcher, LobbyEvent};

const READ_BUFFER_SIZE: usize = 4096;
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Messages sent from connection tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        connection: ConnectionId,
        packet: Packet,
    },
    DecodeFailed {
        connection: ConnectionId,
        error: DecodeError,
    },
    FramingFailed {
        connection: ConnectionId,
        error: FramingError,
    },
    /// Peer closed the stream or it failed
    Closed { connection: ConnectionId },
}

/// Requests from the embedding application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    EndGame { winning_player_id: u8 },
    Shutdown,
}

/// Live tasks of one accepted stream
struct ConnectionHandle {
    /// Encoded frames waiting for the writer task, bounded so a peer that
    /// stops reading cannot grow server memory
    outgoing: mpsc::Sender<Bytes>,
    reader: AbortHandle,
    writer: AbortHandle,
}

/// Lobby server owning the listener and every connection's tasks
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    dispatcher: Dispatcher,
    connections: HashMap<ConnectionId, ConnectionHandle>,
    next_connection_id: u32,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    command_tx: mpsc::UnboundedSender<ServerCommand>,
    command_rx: mpsc::UnboundedReceiver<ServerCommand>,
    events: broadcast::Sender<LobbyEvent>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        info!("Server listening on {}", listener.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Server {
            listener,
            dispatcher: Dispatcher::new(config.max_players),
            config,
            connections: HashMap::new(),
            next_connection_id: 1,
            server_tx,
            server_rx,
            command_tx,
            command_rx,
            events,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle for ending matches or stopping the server from outside the loop
    pub fn command_sender(&self) -> mpsc::UnboundedSender<ServerCommand> {
        self.command_tx.clone()
    }

    /// Receives match start and end notifications
    pub fn subscribe(&self) -> broadcast::Receiver<LobbyEvent> {
        self.events.subscribe()
    }

    /// Main server loop. Runs until a [`ServerCommand::Shutdown`] arrives.
    pub async fn run(mut self) -> Result<(), ServerError> {
        let mut housekeeping = interval(self.config.housekeeping_interval());
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Lobby open for up to {} players",
            self.dispatcher.clients().max_players()
        );

        loop {
            tokio::select! {
                // Pending connection events win over new accepts, so a
                // departed player's name is free before a reconnect lands
                biased;

                Some(message) = self.server_rx.recv() => {
                    self.handle_message(message);
                },

                command = self.command_rx.recv() => {
                    match command {
                        Some(ServerCommand::EndGame { winning_player_id }) => {
                            let actions = self.dispatcher.end_game(winning_player_id);
                            self.apply(actions);
                        }
                        Some(ServerCommand::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = housekeeping.tick() => {
                    if let Some(timeout) = self.config.handshake_timeout() {
                        let actions = self.dispatcher.evict_expired(timeout);
                        self.apply(actions);
                    }
                },

                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.accept(stream, addr),
                        Err(e) => {
                            error!("Error accepting connection: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                },
            }
        }

        for (_, handle) in self.connections.drain() {
            handle.reader.abort();
        }

        Ok(())
    }

    fn accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }

        let connection = self.allocate_connection_id();

        let (reader, writer) = stream.into_split();
        let (outgoing_tx, outgoing_rx) = mpsc::channel(self.config.outgoing_queue_capacity);

        let writer_task = tokio::spawn(write_loop(connection, writer, outgoing_rx));
        let reader_task = tokio::spawn(read_loop(
            connection,
            reader,
            FrameDecoder::new(self.config.max_payload_size as usize),
            self.server_tx.clone(),
        ));

        self.connections.insert(
            connection,
            ConnectionHandle {
                outgoing: outgoing_tx,
                reader: reader_task.abort_handle(),
                writer: writer_task.abort_handle(),
            },
        );
        self.dispatcher.connection_opened(connection, addr);
    }

    /// Next handle not held by a live connection. The counter wraps, so
    /// long-lived connections are skipped rather than overwritten.
    fn allocate_connection_id(&mut self) -> ConnectionId {
        loop {
            let candidate = ConnectionId(self.next_connection_id);
            self.next_connection_id = self.next_connection_id.wrapping_add(1);

            let in_use = self.connections.contains_key(&candidate)
                || self.dispatcher.clients().state(candidate).is_some();
            if !in_use {
                return candidate;
            }
            debug!("Connection id {} still in use, skipping", candidate);
        }
    }

    fn handle_message(&mut self, message: ServerMessage) {
        let actions = match message {
            ServerMessage::PacketReceived { connection, packet } => {
                self.dispatcher.packet_received(connection, packet)
            }
            ServerMessage::DecodeFailed { connection, error } => {
                self.dispatcher.decode_failed(connection, &error);
                Vec::new()
            }
            ServerMessage::FramingFailed { connection, error } => {
                self.dispatcher.framing_failed(connection, &error)
            }
            ServerMessage::Closed { connection } => self.dispatcher.connection_closed(connection),
        };
        self.apply(actions);
    }

    fn apply(&mut self, actions: Vec<Action>) {
        let mut pending = VecDeque::from(actions);

        while let Some(action) = pending.pop_front() {
            match action {
                Action::Send { to, packet } => {
                    if !self.send_packet(to, &packet) {
                        warn!("Outgoing queue full for connection {}, dropping it", to);
                        self.abort(to);
                        pending.extend(self.dispatcher.peer_stalled(to));
                    }
                }
                Action::Close { connection } => self.close(connection),
                Action::Event(event) => {
                    // No subscribers is not an error
                    let _ = self.events.send(event);
                }
            }
        }
    }

    /// Queues a frame for `to` without waiting. Returns false only when the
    /// peer's queue is full.
    fn send_packet(&self, to: ConnectionId, packet: &Packet) -> bool {
        let handle = match self.connections.get(&to) {
            Some(handle) => handle,
            None => {
                debug!("Dropping {:?} for closed connection {}", packet.op_code(), to);
                return true;
            }
        };

        let frame = match packet.encode() {
            Ok(frame) => Bytes::from(frame),
            Err(e) => {
                error!("Failed to encode {:?}: {}", packet.op_code(), e);
                return true;
            }
        };

        match handle.outgoing.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Closed(_)) => {
                debug!("Writer for connection {} already stopped", to);
                true
            }
        }
    }

    /// Stops reading and lets the writer flush what is queued before closing
    fn close(&mut self, connection: ConnectionId) {
        if let Some(handle) = self.connections.remove(&connection) {
            handle.reader.abort();
            debug!("Connection {} closed", connection);
        }
    }

    /// Tears both tasks down at once, discarding whatever is still queued
    fn abort(&mut self, connection: ConnectionId) {
        if let Some(handle) = self.connections.remove(&connection) {
            handle.reader.abort();
            handle.writer.abort();
            debug!("Connection {} aborted", connection);
        }
    }
}

/// Logs lobby events until the server drops its sender, returning how many
/// were seen. Falling behind skips events instead of stopping.
pub async fn log_lobby_events(mut events: broadcast::Receiver<LobbyEvent>) -> usize {
    let mut seen = 0;

    loop {
        match events.recv().await {
            Ok(LobbyEvent::MatchStarted(start)) => {
                seen += 1;
                info!(
                    "Match started (epoch {}) with {} players",
                    start.epoch,
                    start.assignments.len()
                );
            }
            Ok(LobbyEvent::MatchEnded {
                epoch,
                winning_player_id,
            }) => {
                seen += 1;
                info!(
                    "Match ended (epoch {}), winner: player {}",
                    epoch, winning_player_id
                );
            }
            Err(RecvError::Lagged(missed)) => {
                warn!("Event log fell behind, {} lobby events skipped", missed);
            }
            Err(RecvError::Closed) => return seen,
        }
    }
}

/// Reads a stream until EOF or a framing error, forwarding every frame
pub async fn read_loop<R>(
    connection: ConnectionId,
    mut reader: R,
    mut decoder: FrameDecoder,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) where
    R: AsyncRead + Unpin,
{
    let mut buffer = [0u8; READ_BUFFER_SIZE];

    loop {
        let read = match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) => {
                debug!("Read error on connection {}: {}", connection, e);
                break;
            }
        };
        decoder.extend(&buffer[..read]);

        loop {
            let message = match decoder.next_frame() {
                Ok(Some(frame)) => match frame.decode() {
                    Ok(packet) => ServerMessage::PacketReceived { connection, packet },
                    Err(error) => ServerMessage::DecodeFailed { connection, error },
                },
                Ok(None) => break,
                Err(error) => {
                    if let Err(e) = server_tx.send(ServerMessage::FramingFailed { connection, error }) {
                        error!("Failed to send framing error to main loop: {}", e);
                    }
                    return;
                }
            };

            if let Err(e) = server_tx.send(message) {
                error!("Failed to send packet to main loop: {}", e);
                return;
            }
        }
    }

    if let Err(e) = server_tx.send(ServerMessage::Closed { connection }) {
        error!("Failed to report closed connection {}: {}", connection, e);
    }
}

/// Writes queued frames in order, then shuts the stream down once the queue
/// is closed
pub async fn write_loop<W>(
    connection: ConnectionId,
    mut writer: W,
    mut outgoing: mpsc::Receiver<Bytes>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = outgoing.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            debug!("Write error on connection {}: {}", connection, e);
            return;
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!("Failed to shut down connection {}: {}", connection, e);
    }
}
