//! Erlang external term format codec.
//!
//! Only the subset of the format that responses use is produced:
//! ```text
//! 131                         version
//! 104 arity:u8 elements...    SMALL_TUPLE_EXT
//! 109 len:u32 bytes           BINARY_EXT
//! 119 len:u8  utf8            SMALL_ATOM_UTF8_EXT
//! ```
//! The decoder additionally accepts the other atom encodings and
//! `LARGE_TUPLE_EXT`, which a host may emit when echoing terms back.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use scriptport::codec::EtfCodec;
//! use scriptport::protocol::Response;
//!
//! let codec = EtfCodec::new();
//! let bytes = codec.encode_term(&Response::Ok(Bytes::from_static(b"1")).to_term());
//! assert_eq!(bytes, [131, 104, 2, 109, 0, 0, 0, 1, b'1', 119, 2, b'o', b'k']);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{BridgeError, Result};
use crate::protocol::{Symbol, WireTerm};

/// External term format version byte.
pub const VERSION: u8 = 131;

const SMALL_TUPLE_EXT: u8 = 104;
const LARGE_TUPLE_EXT: u8 = 105;
const BINARY_EXT: u8 = 109;
const ATOM_EXT: u8 = 100;
const SMALL_ATOM_EXT: u8 = 115;
const ATOM_UTF8_EXT: u8 = 118;
const SMALL_ATOM_UTF8_EXT: u8 = 119;

/// The three response atoms, encoded once.
#[derive(Debug, Clone)]
pub struct ResponseSymbols {
    ok: Bytes,
    error: Bytes,
    unknown_command: Bytes,
}

impl ResponseSymbols {
    /// Encode every response atom.
    pub fn resolve() -> Self {
        Self {
            ok: encode_atom(Symbol::Ok.name()),
            error: encode_atom(Symbol::Error.name()),
            unknown_command: encode_atom(Symbol::UnknownCommand.name()),
        }
    }

    /// Encoded form of `symbol`.
    #[inline]
    pub fn get(&self, symbol: Symbol) -> &Bytes {
        match symbol {
            Symbol::Ok => &self.ok,
            Symbol::Error => &self.error,
            Symbol::UnknownCommand => &self.unknown_command,
        }
    }
}

impl Default for ResponseSymbols {
    fn default() -> Self {
        Self::resolve()
    }
}

fn encode_atom(name: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + name.len());
    buf.put_u8(SMALL_ATOM_UTF8_EXT);
    buf.put_u8(name.len() as u8);
    buf.put_slice(name.as_bytes());
    buf.freeze()
}

/// External term format codec holding a channel's resolved symbols.
#[derive(Debug, Clone, Default)]
pub struct EtfCodec {
    symbols: ResponseSymbols,
}

impl EtfCodec {
    /// Create a codec with freshly resolved symbols.
    pub fn new() -> Self {
        Self {
            symbols: ResponseSymbols::resolve(),
        }
    }

    /// Resolved symbols used by this codec.
    pub fn symbols(&self) -> &ResponseSymbols {
        &self.symbols
    }

    /// Encode a term, including the version byte. Never fails.
    pub fn encode_term(&self, term: &WireTerm) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(1 + encoded_size(term));
        buf.put_u8(VERSION);
        self.put_term(&mut buf, term);
        buf.to_vec()
    }

    fn put_term(&self, buf: &mut BytesMut, term: &WireTerm) {
        match term {
            WireTerm::Binary(bytes) => {
                buf.put_u8(BINARY_EXT);
                buf.put_u32(bytes.len() as u32);
                buf.put_slice(bytes);
            }
            WireTerm::Symbol(symbol) => buf.put_slice(self.symbols.get(*symbol)),
            WireTerm::Tuple(elements) => {
                if elements.len() <= u8::MAX as usize {
                    buf.put_u8(SMALL_TUPLE_EXT);
                    buf.put_u8(elements.len() as u8);
                } else {
                    buf.put_u8(LARGE_TUPLE_EXT);
                    buf.put_u32(elements.len() as u32);
                }
                for element in elements {
                    self.put_term(buf, element);
                }
            }
        }
    }

    /// Decode a term produced by [`EtfCodec::encode_term`] or by the host.
    pub fn decode_term(bytes: &[u8]) -> Result<WireTerm> {
        let mut reader = TermReader { buf: bytes, pos: 0 };
        if reader.u8()? != VERSION {
            return Err(BridgeError::malformed("missing term format version byte"));
        }
        let term = reader.term()?;
        if reader.pos != bytes.len() {
            return Err(BridgeError::malformed(format!(
                "{} trailing bytes after term",
                bytes.len() - reader.pos
            )));
        }
        Ok(term)
    }
}

fn encoded_size(term: &WireTerm) -> usize {
    match term {
        WireTerm::Binary(bytes) => 5 + bytes.len(),
        WireTerm::Symbol(symbol) => 2 + symbol.name().len(),
        WireTerm::Tuple(elements) => 5 + elements.iter().map(encoded_size).sum::<usize>(),
    }
}

struct TermReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> TermReader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.buf.len() - self.pos < len {
            return Err(BridgeError::malformed(format!(
                "term truncated at offset {}",
                self.pos
            )));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<usize> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]) as usize)
    }

    fn u32(&mut self) -> Result<usize> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize)
    }

    fn atom(&mut self, len: usize) -> Result<WireTerm> {
        let raw = self.take(len)?;
        let name = std::str::from_utf8(raw)
            .map_err(|_| BridgeError::malformed("atom is not UTF-8"))?;
        Symbol::from_name(name)
            .map(WireTerm::Symbol)
            .ok_or_else(|| BridgeError::malformed(format!("unexpected atom `{}`", name)))
    }

    fn tuple(&mut self, arity: usize) -> Result<WireTerm> {
        let mut elements = Vec::with_capacity(arity.min(16));
        for _ in 0..arity {
            elements.push(self.term()?);
        }
        Ok(WireTerm::Tuple(elements))
    }

    fn term(&mut self) -> Result<WireTerm> {
        match self.u8()? {
            SMALL_TUPLE_EXT => {
                let arity = self.u8()? as usize;
                self.tuple(arity)
            }
            LARGE_TUPLE_EXT => {
                let arity = self.u32()?;
                self.tuple(arity)
            }
            BINARY_EXT => {
                let len = self.u32()?;
                Ok(WireTerm::Binary(Bytes::copy_from_slice(self.take(len)?)))
            }
            SMALL_ATOM_UTF8_EXT | SMALL_ATOM_EXT => {
                let len = self.u8()? as usize;
                self.atom(len)
            }
            ATOM_UTF8_EXT | ATOM_EXT => {
                let len = self.u16()?;
                self.atom(len)
            }
            other => Err(BridgeError::malformed(format!(
                "unsupported term tag {}",
                other
            ))),
        }
    }
}
