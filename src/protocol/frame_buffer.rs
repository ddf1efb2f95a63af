//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented packets:
//! - `WaitingForHeader`: Need at least 4 bytes
//! - `WaitingForPayload`: Length parsed, need N more payload bytes
//!
//! Each extracted payload is a frozen `Bytes` slice of the read buffer, so a
//! command handed to a worker shares the allocation instead of copying it.
//!
//! # Example
//!
//! ```
//! use scriptport::protocol::{build_packet, FrameBuffer};
//!
//! let mut buffer = FrameBuffer::new();
//! let packet = build_packet(b"sd\0\0\0\x015");
//!
//! let payloads = buffer.push(&packet).unwrap();
//! assert_eq!(payloads.len(), 1);
//! assert_eq!(&payloads[0][..2], b"sd");
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{
    decode_length, validate_length, DEFAULT_MAX_FRAME_SIZE, PACKET_HEADER_SIZE,
};
use crate::error::Result;

/// State machine for packet parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for complete length header.
    WaitingForHeader,
    /// Header parsed, waiting for payload bytes.
    WaitingForPayload { remaining: u32 },
}

/// Buffer for accumulating incoming bytes and extracting complete packets.
pub struct FrameBuffer {
    /// Accumulated bytes from port reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed payload size.
    max_frame_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max payload: 64MB.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with custom max payload size.
    pub fn with_max_frame_size(max_frame_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForHeader,
            max_frame_size,
        }
    }

    /// Push data into the buffer and extract all complete payloads.
    ///
    /// Partial data is buffered internally for the next push.
    ///
    /// # Errors
    ///
    /// Returns error if a declared length exceeds `max_frame_size`.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut payloads = Vec::new();
        while let Some(payload) = self.try_extract_one()? {
            payloads.push(payload);
        }

        Ok(payloads)
    }

    /// Try to extract a single payload from the buffer.
    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        match self.state {
            State::WaitingForHeader => {
                let Some(length) = decode_length(&self.buffer) else {
                    return Ok(None);
                };

                validate_length(length, self.max_frame_size)?;

                let _ = self.buffer.split_to(PACKET_HEADER_SIZE);

                if length == 0 {
                    return Ok(Some(Bytes::new()));
                }

                self.state = State::WaitingForPayload { remaining: length };
                self.try_extract_one()
            }

            State::WaitingForPayload { remaining } => {
                let remaining = remaining as usize;
                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                let payload = self.buffer.split_to(remaining).freeze();
                self.state = State::WaitingForHeader;

                Ok(Some(payload))
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Check whether a packet is partially buffered.
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty() || matches!(self.state, State::WaitingForPayload { .. })
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
