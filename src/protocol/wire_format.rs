//! Packet framing and command field layout.
//!
//! Every message on the port is a length-prefixed packet:
//! ```text
//! ┌──────────┬─────────────────────┐
//! │ Length   │ Payload             │
//! │ 4 bytes  │ Length bytes        │
//! │ uint32 BE│                     │
//! └──────────┴─────────────────────┘
//! ```
//!
//! Command payloads start with a two byte ASCII tag followed by tag specific
//! fields. Strings are `uint32 BE` length + bytes, integers are `uint32 BE`.
//!
//! All multi-byte integers are Big Endian.

use crate::error::{BridgeError, Result};

/// Packet header size in bytes (`{packet, 4}`).
pub const PACKET_HEADER_SIZE: usize = 4;

/// Default maximum payload size (64 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Size of the command tag at the start of every command payload.
pub const TAG_SIZE: usize = 2;

/// Size of a length prefix or integer field.
pub const FIELD_WORD_SIZE: usize = 4;

/// Encode a packet length header.
#[inline]
pub fn encode_length(len: u32) -> [u8; PACKET_HEADER_SIZE] {
    len.to_be_bytes()
}

/// Decode a packet length header.
///
/// Returns `None` if buffer is too short.
///
/// # Example
///
/// ```
/// use scriptport::protocol::decode_length;
///
/// assert_eq!(decode_length(&[0, 0, 1, 0]), Some(256));
/// assert_eq!(decode_length(&[0, 0]), None);
/// ```
#[inline]
pub fn decode_length(buf: &[u8]) -> Option<u32> {
    let header: [u8; PACKET_HEADER_SIZE] = buf.get(..PACKET_HEADER_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(header))
}

/// Validate a declared payload length against the configured maximum.
pub fn validate_length(len: u32, max_frame_size: u32) -> Result<()> {
    if len > max_frame_size {
        return Err(BridgeError::Protocol(format!(
            "Payload size {} exceeds maximum {}",
            len, max_frame_size
        )));
    }
    Ok(())
}

/// Build a complete packet (length header + payload) as a single buffer.
///
/// # Example
///
/// ```
/// use scriptport::protocol::build_packet;
///
/// let bytes = build_packet(b"hello");
/// assert_eq!(bytes, [0, 0, 0, 5, b'h', b'e', b'l', b'l', b'o']);
/// ```
pub fn build_packet(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PACKET_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&encode_length(payload.len() as u32));
    buf.extend_from_slice(payload);
    buf
}
