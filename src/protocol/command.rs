//! Command decoding and encoding.
//!
//! Layout of each command payload:
//! ```text
//! ij  call_id:str  stack_mb:i32  heap_mb:i32     init
//! ej  call_id:str  filename:str  code:str        eval, reply with result
//! dj  call_id:str  filename:str  code:str        eval, discard result
//! sd  call_id:str                                shutdown
//! ??  call_id:str                                anything else: unknown
//! ```
//!
//! `str` is a `uint32 BE` length followed by that many bytes, `i32` is a
//! `uint32 BE` word reinterpreted as signed.

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{FIELD_WORD_SIZE, TAG_SIZE};
use crate::error::{BridgeError, Result};

/// Two byte command tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandTag {
    /// `ij`
    Init,
    /// `ej`
    EvalWithResult,
    /// `dj`
    EvalDiscard,
    /// `sd`
    Shutdown,
    /// Any other tag.
    Unknown([u8; TAG_SIZE]),
}

impl CommandTag {
    /// Map raw tag bytes to a tag.
    pub fn from_bytes(raw: [u8; TAG_SIZE]) -> Self {
        match &raw {
            b"ij" => CommandTag::Init,
            b"ej" => CommandTag::EvalWithResult,
            b"dj" => CommandTag::EvalDiscard,
            b"sd" => CommandTag::Shutdown,
            _ => CommandTag::Unknown(raw),
        }
    }

    /// Raw tag bytes as they appear on the wire.
    pub fn as_bytes(&self) -> [u8; TAG_SIZE] {
        match self {
            CommandTag::Init => *b"ij",
            CommandTag::EvalWithResult => *b"ej",
            CommandTag::EvalDiscard => *b"dj",
            CommandTag::Shutdown => *b"sd",
            CommandTag::Unknown(raw) => *raw,
        }
    }

    /// Read only the tag of a command buffer.
    ///
    /// This is what the dispatcher uses to decide between the inline init
    /// path and a worker job without decoding the rest of the command.
    pub fn peek(buf: &[u8]) -> Result<Self> {
        CommandDecoder::new(buf).read_tag()
    }
}

/// Fields shared by both eval commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalRequest {
    /// Client supplied correlation id.
    pub call_id: Bytes,
    /// Logical source name, used in diagnostics.
    pub source_name: String,
    /// Script source text.
    pub code: String,
}

/// A fully decoded command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create the channel's engine instance.
    Init {
        call_id: Bytes,
        stack_mb: i32,
        heap_mb: i32,
    },
    /// Evaluate and reply with the result.
    EvalWithResult(EvalRequest),
    /// Evaluate and reply with a bare `ok` on success.
    EvalDiscard(EvalRequest),
    /// Request teardown of the engine runtime when the channel closes.
    Shutdown { call_id: Bytes },
    /// Unrecognized tag.
    Unknown { tag: [u8; TAG_SIZE], call_id: Bytes },
}

impl Command {
    /// Decode a complete command from a payload.
    ///
    /// `buf` is a shared `Bytes` so string fields such as the call id are
    /// sliced out without copying.
    ///
    /// # Example
    ///
    /// ```
    /// use bytes::Bytes;
    /// use scriptport::protocol::Command;
    ///
    /// let cmd = Command::Shutdown { call_id: Bytes::from_static(b"5") };
    /// assert_eq!(Command::decode(&cmd.encode()).unwrap(), cmd);
    /// ```
    pub fn decode(buf: &Bytes) -> Result<Self> {
        let mut decoder = CommandDecoder::new(buf);
        let tag = decoder.read_tag()?;
        let call_id = decoder.read_bytes(buf)?;

        let command = match tag {
            CommandTag::Init => Command::Init {
                call_id,
                stack_mb: decoder.read_i32()?,
                heap_mb: decoder.read_i32()?,
            },
            CommandTag::EvalWithResult => {
                Command::EvalWithResult(Self::decode_eval(&mut decoder, call_id)?)
            }
            CommandTag::EvalDiscard => {
                Command::EvalDiscard(Self::decode_eval(&mut decoder, call_id)?)
            }
            CommandTag::Shutdown => Command::Shutdown { call_id },
            CommandTag::Unknown(tag) => Command::Unknown { tag, call_id },
        };

        Ok(command)
    }

    fn decode_eval(decoder: &mut CommandDecoder<'_>, call_id: Bytes) -> Result<EvalRequest> {
        Ok(EvalRequest {
            call_id,
            source_name: decoder.read_string()?,
            code: decoder.read_string()?,
        })
    }

    /// Tag of this command.
    pub fn tag(&self) -> CommandTag {
        match self {
            Command::Init { .. } => CommandTag::Init,
            Command::EvalWithResult(_) => CommandTag::EvalWithResult,
            Command::EvalDiscard(_) => CommandTag::EvalDiscard,
            Command::Shutdown { .. } => CommandTag::Shutdown,
            Command::Unknown { tag, .. } => CommandTag::from_bytes(*tag),
        }
    }

    /// Correlation id of this command.
    pub fn call_id(&self) -> &Bytes {
        match self {
            Command::Init { call_id, .. }
            | Command::Shutdown { call_id }
            | Command::Unknown { call_id, .. } => call_id,
            Command::EvalWithResult(req) | Command::EvalDiscard(req) => &req.call_id,
        }
    }

    /// Encode this command into its wire layout (client side).
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_slice(&self.tag().as_bytes());
        put_field(&mut buf, self.call_id());

        match self {
            Command::Init {
                stack_mb, heap_mb, ..
            } => {
                buf.put_i32(*stack_mb);
                buf.put_i32(*heap_mb);
            }
            Command::EvalWithResult(req) | Command::EvalDiscard(req) => {
                put_field(&mut buf, req.source_name.as_bytes());
                put_field(&mut buf, req.code.as_bytes());
            }
            Command::Shutdown { .. } | Command::Unknown { .. } => {}
        }

        buf.freeze()
    }
}

fn put_field(buf: &mut BytesMut, field: &[u8]) {
    buf.put_u32(field.len() as u32);
    buf.put_slice(field);
}

/// Best-effort extraction of the call id from a payload that failed to decode.
///
/// Returns an empty id when even the tag or call id is unreadable.
pub fn recover_call_id(buf: &Bytes) -> Bytes {
    let mut decoder = CommandDecoder::new(buf);
    decoder
        .read_tag()
        .and_then(|_| decoder.read_bytes(buf))
        .unwrap_or_default()
}

/// Cursor over a command payload with bounds-checked reads.
pub struct CommandDecoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> CommandDecoder<'a> {
    /// Start decoding at the beginning of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Number of unread bytes.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(BridgeError::malformed(format!(
                "{} needs {} bytes at offset {}, {} remaining",
                what,
                len,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_word(&mut self, what: &str) -> Result<u32> {
        let word = self.take(FIELD_WORD_SIZE, what)?;
        Ok(u32::from_be_bytes([word[0], word[1], word[2], word[3]]))
    }

    /// Read the two byte tag.
    pub fn read_tag(&mut self) -> Result<CommandTag> {
        let raw = self.take(TAG_SIZE, "command tag")?;
        Ok(CommandTag::from_bytes([raw[0], raw[1]]))
    }

    /// Read a signed 32-bit integer field.
    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_word("integer field")? as i32)
    }

    /// Read a length-prefixed field as a raw slice.
    pub fn read_slice(&mut self) -> Result<&'a [u8]> {
        let len = self.read_word("length prefix")? as usize;
        self.take(len, "string field")
    }

    /// Read a length-prefixed field as a zero-copy slice of `source`.
    ///
    /// `source` must be the buffer this decoder was created over.
    pub fn read_bytes(&mut self, source: &Bytes) -> Result<Bytes> {
        let start = self.pos;
        let field = self.read_slice()?;
        let offset = start + FIELD_WORD_SIZE;
        Ok(source.slice(offset..offset + field.len()))
    }

    /// Read a length-prefixed UTF-8 field.
    pub fn read_string(&mut self) -> Result<String> {
        let offset = self.pos;
        let field = self.read_slice()?;
        String::from_utf8(field.to_vec()).map_err(|_| {
            BridgeError::malformed(format!("string field at offset {} is not UTF-8", offset))
        })
    }
}
