//! Incremental frame decoder for the reliable stream channel
//!
//! A stream delivers bytes in arbitrary chunks. The decoder buffers them and
//! hands out complete `header + payload` frames as soon as all of their bytes
//! are present; chunk boundaries carry no meaning. Opcodes are not inspected
//! here, so an unknown opcode never desynchronizes the stream.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

use crate::header::PacketHeader;
use crate::packet::{DecodeError, Packet};
use crate::{DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("payload size {size} exceeds the {max}-byte limit")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("unreadable header: {0}")]
    Header(#[from] bincode::Error),
}

/// One complete unit delimited by the header's payload size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: PacketHeader,
    pub payload: Bytes,
}

impl Frame {
    pub fn decode(&self) -> Result<Packet, DecodeError> {
        Packet::decode(&self.header, &self.payload)
    }
}

#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_payload_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD_SIZE)
    }
}

impl FrameDecoder {
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(HEADER_SIZE + max_payload_size),
            max_payload_size,
        }
    }

    /// Appends freshly read bytes
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes received but not yet handed out as a frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the next complete frame, `Ok(None)` if more bytes are needed.
    ///
    /// An oversized payload is reported as soon as its header is buffered and
    /// the offending bytes stay in place, so every later call reports the same
    /// error.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FramingError> {
        if self.buffer.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = PacketHeader::parse(&self.buffer[..HEADER_SIZE])?;
        let size = header.payload_size as usize;
        if size > self.max_payload_size {
            return Err(FramingError::PayloadTooLarge {
                size,
                max: self.max_payload_size,
            });
        }

        if self.buffer.len() < header.frame_len() {
            return Ok(None);
        }

        self.buffer.advance(HEADER_SIZE);
        let payload = self.buffer.split_to(size).freeze();
        Ok(Some(Frame { header, payload }))
    }

    /// Drains every frame currently available
    pub fn frames(&mut self) -> Frames<'_> {
        Frames {
            decoder: self,
            failed: false,
        }
    }
}

/// Iterator over the frames buffered so far. Stops after the first error;
/// feeding more bytes and calling [`FrameDecoder::frames`] again resumes.
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
    failed: bool,
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.decoder.next_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
