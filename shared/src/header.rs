//! Fixed 12-byte packet header and the opcode table

use serde::{Deserialize, Serialize};

use crate::HEADER_SIZE;

/// Packet kinds carried on the reliable lobby channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    ConnectReq = 0x01,
    ConnectAck = 0x02,
    DisconnectReq = 0x03,
    NotifyDisconnect = 0x04,
    GameStart = 0x05,
    GameEnd = 0x06,
    ReadyStatus = 0x07,
    NotifyConnect = 0x08,
    NotifyReady = 0x09,
}

impl OpCode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// True for packets a client is allowed to send to the server
    pub fn is_client_to_server(self) -> bool {
        matches!(
            self,
            OpCode::ConnectReq | OpCode::DisconnectReq | OpCode::ReadyStatus
        )
    }
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(OpCode::ConnectReq),
            0x02 => Ok(OpCode::ConnectAck),
            0x03 => Ok(OpCode::DisconnectReq),
            0x04 => Ok(OpCode::NotifyDisconnect),
            0x05 => Ok(OpCode::GameStart),
            0x06 => Ok(OpCode::GameEnd),
            0x07 => Ok(OpCode::ReadyStatus),
            0x08 => Ok(OpCode::NotifyConnect),
            0x09 => Ok(OpCode::NotifyReady),
            other => Err(other),
        }
    }
}

/// Common header preceding every payload.
///
/// Field order matches the wire layout; `bincode`'s default options write
/// each integer little-endian at its natural width, so the serialized form
/// is exactly [`HEADER_SIZE`] bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    pub op_code: u8,
    pub payload_size: u16,
    pub packet_index: u8,
    /// Always 0 on the lobby channel
    pub tick_id: u32,
    pub packet_count: u8,
    pub reserved: [u8; 3],
}

impl PacketHeader {
    /// Header for a single-packet message on the lobby channel
    pub fn new(op_code: OpCode, payload_size: u16) -> Self {
        Self {
            op_code: op_code.as_u8(),
            payload_size,
            packet_index: 0,
            tick_id: 0,
            packet_count: 1,
            reserved: [0; 3],
        }
    }

    /// Parses a header from the first [`HEADER_SIZE`] bytes of `bytes`.
    /// Reserved bytes are carried through untouched and never validated.
    pub fn parse(bytes: &[u8]) -> Result<Self, bincode::Error> {
        let bytes = bytes.get(..HEADER_SIZE).ok_or_else(|| {
            Box::new(bincode::ErrorKind::Custom(format!(
                "header needs {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )))
        })?;
        bincode::deserialize(bytes)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn op_code(&self) -> Result<OpCode, u8> {
        OpCode::try_from(self.op_code)
    }

    /// Total frame length, header included
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.payload_size as usize
    }
}
