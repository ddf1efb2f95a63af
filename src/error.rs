//! Error types for scriptport.

use thiserror::Error;

/// Main error type for all bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// I/O error on the port or socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error (msgpack response encoding only).
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Command buffer is shorter than its declared fields, or a field is invalid.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The engine reported a failure; text is engine-defined.
    #[error("{0}")]
    Engine(String),

    /// Command tag not recognized.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Command not valid in the channel's current lifecycle phase.
    #[error("{0}")]
    ProtocolState(String),

    /// Framing violation (oversized frame, truncated stream).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connection or worker queue closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl BridgeError {
    /// Shorthand for a [`BridgeError::MalformedMessage`].
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        BridgeError::MalformedMessage(msg.into())
    }
}

/// Result type alias using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;
