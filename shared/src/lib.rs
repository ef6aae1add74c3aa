//! Wire protocol shared by the lobby server and its clients.
//!
//! Every message is a fixed 12-byte little-endian [`PacketHeader`] followed by
//! `payload_size` bytes whose layout depends on the opcode. [`FrameDecoder`]
//! slices a byte stream into frames and [`Packet`] converts them to and from
//! typed messages.

pub mod frame;
pub mod header;
pub mod packet;

pub use frame::{Frame, FrameDecoder, FramingError};
pub use header::{OpCode, PacketHeader};
pub use packet::{
    decode_username, encode_username, expected_payload_size, ConnectStatus, DecodeError,
    EncodeError, Packet,
};

/// Server-assigned player identifier. 0 means "no player".
pub type PlayerId = u8;
/// Opaque identifier of the in-game object a player controls
pub type EntityId = u32;

pub const HEADER_SIZE: usize = 12;
pub const USERNAME_BUFFER_SIZE: usize = 32;
/// Longest username that fits the buffer with its NUL terminator
pub const MAX_USERNAME_LEN: usize = USERNAME_BUFFER_SIZE - 1;

pub const DEFAULT_PORT: u16 = 50000;
pub const DEFAULT_MAX_PLAYERS: u8 = 4;
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1024;
/// Largest payload any defined opcode carries (NOTIFY_CONNECT)
pub const LARGEST_PAYLOAD_SIZE: usize = 4 + USERNAME_BUFFER_SIZE;
