//! Typed packet model and the per-opcode payload codec

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::header::{OpCode, PacketHeader};
use crate::{EntityId, PlayerId, HEADER_SIZE, MAX_USERNAME_LEN, USERNAME_BUFFER_SIZE};

/// Outcome of a login attempt, carried by CONNECT_ACK
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectStatus {
    Ok = 0,
    ServerFull = 1,
    BadUsername = 2,
    InGame = 3,
}

impl ConnectStatus {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ConnectStatus {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ConnectStatus::Ok),
            1 => Ok(ConnectStatus::ServerFull),
            2 => Ok(ConnectStatus::BadUsername),
            3 => Ok(ConnectStatus::InGame),
            other => Err(other),
        }
    }
}

/// Every message exchanged on the lobby channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    // Client -> server
    ConnectReq { username: String },
    DisconnectReq,
    ReadyStatus { is_ready: bool },

    // Server -> client
    ConnectAck { player_id: PlayerId, status: ConnectStatus },
    NotifyDisconnect { player_id: PlayerId },
    GameStart { controlled_entity_id: EntityId },
    GameEnd { winning_player_id: PlayerId },
    NotifyConnect { player_id: PlayerId, username: String },
    NotifyReady { player_id: PlayerId, is_ready: bool },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpCode(u8),
    #[error("{op_code:?} expects a {expected}-byte payload, got {actual}")]
    PayloadSize {
        op_code: OpCode,
        expected: usize,
        actual: usize,
    },
    #[error("unknown connect status {0}")]
    UnknownStatus(u8),
    #[error("malformed payload: {0}")]
    Malformed(#[from] bincode::Error),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("payload of {0} bytes does not fit the header size field")]
    PayloadTooLarge(usize),
    #[error("failed to serialize packet: {0}")]
    Serialize(#[from] bincode::Error),
}

// Payload layouts. Field order is wire order.

#[derive(Serialize, Deserialize)]
struct UsernamePayload {
    username: [u8; USERNAME_BUFFER_SIZE],
}

#[derive(Serialize, Deserialize)]
struct ConnectAckPayload {
    player_id: u8,
    status: u8,
    reserved: [u8; 2],
}

#[derive(Serialize, Deserialize)]
struct PlayerIdPayload {
    player_id: u8,
    reserved: [u8; 3],
}

#[derive(Serialize, Deserialize)]
struct GameStartPayload {
    controlled_entity_id: u32,
}

#[derive(Serialize, Deserialize)]
struct ReadyStatusPayload {
    is_ready: u8,
    reserved: [u8; 3],
}

#[derive(Serialize, Deserialize)]
struct NotifyConnectPayload {
    player_id: u8,
    reserved: [u8; 3],
    username: [u8; USERNAME_BUFFER_SIZE],
}

#[derive(Serialize, Deserialize)]
struct NotifyReadyPayload {
    player_id: u8,
    is_ready: u8,
    reserved: [u8; 2],
}

/// Payload length each opcode must carry
pub fn expected_payload_size(op_code: OpCode) -> usize {
    match op_code {
        OpCode::ConnectReq => USERNAME_BUFFER_SIZE,
        OpCode::ConnectAck => 4,
        OpCode::DisconnectReq => 0,
        OpCode::NotifyDisconnect => 4,
        OpCode::GameStart => 4,
        OpCode::GameEnd => 4,
        OpCode::ReadyStatus => 4,
        OpCode::NotifyConnect => 4 + USERNAME_BUFFER_SIZE,
        OpCode::NotifyReady => 4,
    }
}

/// Writes `name` into a fixed NUL-padded buffer, keeping at most
/// [`MAX_USERNAME_LEN`] bytes and never splitting a UTF-8 sequence.
pub fn encode_username(name: &str) -> [u8; USERNAME_BUFFER_SIZE] {
    let mut end = name.len().min(MAX_USERNAME_LEN);
    while !name.is_char_boundary(end) {
        end -= 1;
    }

    let mut buffer = [0u8; USERNAME_BUFFER_SIZE];
    buffer[..end].copy_from_slice(&name.as_bytes()[..end]);
    buffer
}

/// Reads a username buffer up to the first NUL, or the first
/// [`MAX_USERNAME_LEN`] bytes when no terminator is present. Anything after
/// the terminator is ignored.
pub fn decode_username(buffer: &[u8]) -> String {
    let limit = buffer.len().min(MAX_USERNAME_LEN);
    let end = buffer[..limit]
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(limit);
    String::from_utf8_lossy(&buffer[..end]).into_owned()
}

fn payload<T: DeserializeOwned>(op_code: OpCode, bytes: &[u8]) -> Result<T, DecodeError> {
    let expected = expected_payload_size(op_code);
    if bytes.len() != expected {
        return Err(DecodeError::PayloadSize {
            op_code,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(bincode::deserialize(bytes)?)
}

impl Packet {
    pub fn op_code(&self) -> OpCode {
        match self {
            Packet::ConnectReq { .. } => OpCode::ConnectReq,
            Packet::DisconnectReq => OpCode::DisconnectReq,
            Packet::ReadyStatus { .. } => OpCode::ReadyStatus,
            Packet::ConnectAck { .. } => OpCode::ConnectAck,
            Packet::NotifyDisconnect { .. } => OpCode::NotifyDisconnect,
            Packet::GameStart { .. } => OpCode::GameStart,
            Packet::GameEnd { .. } => OpCode::GameEnd,
            Packet::NotifyConnect { .. } => OpCode::NotifyConnect,
            Packet::NotifyReady { .. } => OpCode::NotifyReady,
        }
    }

    /// Builds a typed packet from a framed header and payload
    pub fn decode(header: &PacketHeader, bytes: &[u8]) -> Result<Self, DecodeError> {
        let op_code = header.op_code().map_err(DecodeError::UnknownOpCode)?;

        let packet = match op_code {
            OpCode::ConnectReq => {
                let p: UsernamePayload = payload(op_code, bytes)?;
                Packet::ConnectReq {
                    username: decode_username(&p.username),
                }
            }
            OpCode::DisconnectReq => {
                payload::<()>(op_code, bytes)?;
                Packet::DisconnectReq
            }
            OpCode::ReadyStatus => {
                let p: ReadyStatusPayload = payload(op_code, bytes)?;
                Packet::ReadyStatus {
                    is_ready: p.is_ready != 0,
                }
            }
            OpCode::ConnectAck => {
                let p: ConnectAckPayload = payload(op_code, bytes)?;
                let status =
                    ConnectStatus::try_from(p.status).map_err(DecodeError::UnknownStatus)?;
                Packet::ConnectAck {
                    player_id: p.player_id,
                    status,
                }
            }
            OpCode::NotifyDisconnect => {
                let p: PlayerIdPayload = payload(op_code, bytes)?;
                Packet::NotifyDisconnect {
                    player_id: p.player_id,
                }
            }
            OpCode::GameStart => {
                let p: GameStartPayload = payload(op_code, bytes)?;
                Packet::GameStart {
                    controlled_entity_id: p.controlled_entity_id,
                }
            }
            // Older peers send GAME_END without a result summary
            OpCode::GameEnd if bytes.is_empty() => Packet::GameEnd {
                winning_player_id: 0,
            },
            OpCode::GameEnd => {
                let p: PlayerIdPayload = payload(op_code, bytes)?;
                Packet::GameEnd {
                    winning_player_id: p.player_id,
                }
            }
            OpCode::NotifyConnect => {
                let p: NotifyConnectPayload = payload(op_code, bytes)?;
                Packet::NotifyConnect {
                    player_id: p.player_id,
                    username: decode_username(&p.username),
                }
            }
            OpCode::NotifyReady => {
                let p: NotifyReadyPayload = payload(op_code, bytes)?;
                Packet::NotifyReady {
                    player_id: p.player_id,
                    is_ready: p.is_ready != 0,
                }
            }
        };

        Ok(packet)
    }

    /// Serializes only the payload section
    pub fn encode_payload(&self) -> Result<Vec<u8>, bincode::Error> {
        match self {
            Packet::ConnectReq { username } => bincode::serialize(&UsernamePayload {
                username: encode_username(username),
            }),
            Packet::DisconnectReq => Ok(Vec::new()),
            Packet::ReadyStatus { is_ready } => bincode::serialize(&ReadyStatusPayload {
                is_ready: u8::from(*is_ready),
                reserved: [0; 3],
            }),
            Packet::ConnectAck { player_id, status } => bincode::serialize(&ConnectAckPayload {
                player_id: *player_id,
                status: status.as_u8(),
                reserved: [0; 2],
            }),
            Packet::NotifyDisconnect { player_id } => bincode::serialize(&PlayerIdPayload {
                player_id: *player_id,
                reserved: [0; 3],
            }),
            Packet::GameStart {
                controlled_entity_id,
            } => bincode::serialize(&GameStartPayload {
                controlled_entity_id: *controlled_entity_id,
            }),
            Packet::GameEnd { winning_player_id } => bincode::serialize(&PlayerIdPayload {
                player_id: *winning_player_id,
                reserved: [0; 3],
            }),
            Packet::NotifyConnect {
                player_id,
                username,
            } => bincode::serialize(&NotifyConnectPayload {
                player_id: *player_id,
                reserved: [0; 3],
                username: encode_username(username),
            }),
            Packet::NotifyReady {
                player_id,
                is_ready,
            } => bincode::serialize(&NotifyReadyPayload {
                player_id: *player_id,
                is_ready: u8::from(*is_ready),
                reserved: [0; 2],
            }),
        }
    }

    /// Serializes a complete frame: header followed by payload.
    /// Identical packets always produce identical bytes.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let payload = self.encode_payload()?;
        let payload_size =
            u16::try_from(payload.len()).map_err(|_| EncodeError::PayloadTooLarge(payload.len()))?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
        frame.extend_from_slice(&PacketHeader::new(self.op_code(), payload_size).to_bytes()?);
        frame.extend_from_slice(&payload);
        Ok(frame)
    }
}
