//! Codec module - response serialization.
//!
//! Responses are lowered to a [`WireTerm`](crate::protocol::WireTerm) and then
//! serialized by one of:
//!
//! - [`EtfCodec`] - Erlang external term format (`binary_to_term/1` on the host)
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde`
//!
//! # Design
//!
//! Codecs are concrete structs rather than trait objects. A channel picks its
//! encoding once at open time through [`ResponseEncoder`], which also holds the
//! symbols resolved for that channel.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use scriptport::codec::{ResponseEncoder, ResponseEncoding};
//! use scriptport::protocol::Response;
//!
//! let encoder = ResponseEncoder::new(ResponseEncoding::Etf);
//! let response = Response::Ok(Bytes::from_static(b"1"));
//! let bytes = encoder.encode(&response).unwrap();
//! assert_eq!(encoder.decode(&bytes).unwrap(), response);
//! ```

mod etf;
mod msgpack;

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

pub use etf::{EtfCodec, ResponseSymbols};
pub use msgpack::MsgPackCodec;

use crate::error::Result;
use crate::protocol::Response;

/// Serialization used for responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseEncoding {
    /// Erlang external term format.
    #[default]
    Etf,
    /// MessagePack.
    MsgPack,
}

impl ResponseEncoding {
    /// Configuration name.
    pub fn name(&self) -> &'static str {
        match self {
            ResponseEncoding::Etf => "etf",
            ResponseEncoding::MsgPack => "msgpack",
        }
    }
}

impl fmt::Display for ResponseEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ResponseEncoding {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "etf" | "erlang" => Ok(ResponseEncoding::Etf),
            "msgpack" | "messagepack" => Ok(ResponseEncoding::MsgPack),
            other => Err(format!("unknown response encoding `{}`", other)),
        }
    }
}

/// Per-channel response encoder.
#[derive(Debug, Clone)]
pub enum ResponseEncoder {
    Etf(EtfCodec),
    MsgPack,
}

impl ResponseEncoder {
    /// Create an encoder, resolving symbols for the chosen encoding.
    pub fn new(encoding: ResponseEncoding) -> Self {
        match encoding {
            ResponseEncoding::Etf => ResponseEncoder::Etf(EtfCodec::new()),
            ResponseEncoding::MsgPack => ResponseEncoder::MsgPack,
        }
    }

    /// Encoding implemented by this encoder.
    pub fn encoding(&self) -> ResponseEncoding {
        match self {
            ResponseEncoder::Etf(_) => ResponseEncoding::Etf,
            ResponseEncoder::MsgPack => ResponseEncoding::MsgPack,
        }
    }

    /// Serialize a response.
    ///
    /// The term format path cannot fail; the msgpack path only fails if
    /// `rmp-serde` rejects the term.
    pub fn encode(&self, response: &Response) -> Result<Bytes> {
        let term = response.to_term();
        match self {
            ResponseEncoder::Etf(codec) => Ok(Bytes::from(codec.encode_term(&term))),
            ResponseEncoder::MsgPack => Ok(Bytes::from(MsgPackCodec::encode_term(&term)?)),
        }
    }

    /// Parse a response produced by [`ResponseEncoder::encode`] (client side).
    pub fn decode(&self, bytes: &[u8]) -> Result<Response> {
        let term = match self {
            ResponseEncoder::Etf(_) => EtfCodec::decode_term(bytes)?,
            ResponseEncoder::MsgPack => MsgPackCodec::decode_term(bytes)?,
        };
        Response::from_term(term)
    }
}
