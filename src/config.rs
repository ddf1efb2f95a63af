//! Bridge configuration.

use crate::codec::ResponseEncoding;
use crate::dispatch::default_worker_count;
use crate::protocol::DEFAULT_MAX_FRAME_SIZE;
use crate::writer::WriterConfig;

/// Size of the buffer each connection reads into.
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Settings shared by every connection of a bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Worker threads executing commands.
    pub workers: usize,
    /// Serialization used for responses.
    pub encoding: ResponseEncoding,
    /// Largest accepted command packet, in bytes.
    pub max_frame_size: u32,
    /// Per-connection writer settings.
    pub writer: WriterConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            workers: default_worker_count(),
            encoding: ResponseEncoding::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            writer: WriterConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads (at least one is always started).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_encoding(mut self, encoding: ResponseEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Set the largest accepted packet. Larger packets end the connection.
    pub fn with_max_frame_size(mut self, max_frame_size: u32) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Set the number of response packets a connection may queue.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.writer.channel_capacity = capacity;
        self
    }
}
