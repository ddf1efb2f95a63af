//! Protocol module - packet framing, commands and responses.
//!
//! This module implements the byte level protocol of the port:
//! - 4-byte length-prefixed packets
//! - Frame buffer for accumulating partial reads
//! - Command decoder with a bounds-checked cursor
//! - Response shapes and their structured term form

mod command;
mod frame_buffer;
mod response;
mod wire_format;

pub use command::{recover_call_id, Command, CommandDecoder, CommandTag, EvalRequest};
pub use frame_buffer::FrameBuffer;
pub use response::{Response, Symbol, WireTerm};
pub use wire_format::{
    build_packet, decode_length, encode_length, validate_length, DEFAULT_MAX_FRAME_SIZE,
    FIELD_WORD_SIZE, PACKET_HEADER_SIZE, TAG_SIZE,
};
