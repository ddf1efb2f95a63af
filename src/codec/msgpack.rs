//! MsgPack response codec using `rmp-serde`.
//!
//! Terms map onto MessagePack as:
//! - binary → `bin` family
//! - symbol → `str` holding the atom name
//! - tuple → `array`
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use scriptport::codec::MsgPackCodec;
//! use scriptport::protocol::Response;
//!
//! let response = Response::OkValue(Bytes::from_static(b"2"), "2".into());
//! let encoded = MsgPackCodec::encode_term(&response.to_term()).unwrap();
//! let decoded = MsgPackCodec::decode_term(&encoded).unwrap();
//! assert_eq!(Response::from_term(decoded).unwrap(), response);
//! ```

use std::fmt;

use bytes::Bytes;
use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Result;
use crate::protocol::{Symbol, WireTerm};

/// MessagePack codec for response terms.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a term to MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the term cannot be serialized.
    #[inline]
    pub fn encode_term(term: &WireTerm) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(term)?)
    }

    /// Decode MsgPack bytes to a term.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a binary / symbol / tuple tree.
    #[inline]
    pub fn decode_term(bytes: &[u8]) -> Result<WireTerm> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

impl Serialize for WireTerm {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            WireTerm::Binary(bytes) => serializer.serialize_bytes(bytes),
            WireTerm::Symbol(symbol) => serializer.serialize_str(symbol.name()),
            WireTerm::Tuple(elements) => {
                let mut tuple = serializer.serialize_tuple(elements.len())?;
                for element in elements {
                    tuple.serialize_element(element)?;
                }
                tuple.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for WireTerm {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(WireTermVisitor)
    }
}

struct WireTermVisitor;

impl<'de> Visitor<'de> for WireTermVisitor {
    type Value = WireTerm;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a binary, a response symbol or an array")
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<WireTerm, E> {
        Ok(WireTerm::Binary(Bytes::copy_from_slice(v)))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> std::result::Result<WireTerm, E> {
        Ok(WireTerm::Binary(Bytes::from(v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<WireTerm, E> {
        Symbol::from_name(v)
            .map(WireTerm::Symbol)
            .ok_or_else(|| E::custom(format!("unknown symbol `{}`", v)))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<WireTerm, A::Error> {
        let mut elements = Vec::with_capacity(seq.size_hint().unwrap_or(3));
        while let Some(element) = seq.next_element::<WireTerm>()? {
            elements.push(element);
        }
        Ok(WireTerm::Tuple(elements))
    }
}
