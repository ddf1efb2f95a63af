//! Per-connection channel state.
//!
//! A channel is one logical client connection. Its lifecycle phase lives here,
//! together with the encoder and writer used for its responses. The engine
//! instance is not stored here: it belongs to the worker the channel is
//! pinned to.
//!
//! Responses leave through two doors. Workers call [`ChannelState::emit`];
//! the control path calls [`ChannelState::send`], but only while no job of
//! the channel is queued, so the two never reorder each other.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use bytes::Bytes;

use crate::codec::ResponseEncoder;
use crate::protocol::Response;
use crate::writer::{OutboundFrame, WriterHandle};

/// Identifier of a channel, unique within one dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Lifecycle phase of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelPhase {
    /// Open, no engine instance yet.
    Uninitialized = 0,
    /// Engine instance created and attached to the channel's worker.
    Ready = 1,
    /// Connection closed; no further commands are accepted.
    Stopped = 2,
}

impl ChannelPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ChannelPhase::Uninitialized,
            1 => ChannelPhase::Ready,
            _ => ChannelPhase::Stopped,
        }
    }
}

/// State shared by a channel's control path and its worker.
pub struct ChannelState {
    id: ChannelId,
    phase: AtomicU8,
    shutdown_requested: AtomicBool,
    queued: AtomicUsize,
    encoder: ResponseEncoder,
    writer: WriterHandle,
}

impl ChannelState {
    /// Create a channel in the `Uninitialized` phase.
    pub fn new(id: ChannelId, encoder: ResponseEncoder, writer: WriterHandle) -> Self {
        Self {
            id,
            phase: AtomicU8::new(ChannelPhase::Uninitialized as u8),
            shutdown_requested: AtomicBool::new(false),
            queued: AtomicUsize::new(0),
            encoder,
            writer,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> ChannelPhase {
        ChannelPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`. Returns false if the channel was not in `from`.
    pub(crate) fn transition(&self, from: ChannelPhase, to: ChannelPhase) -> bool {
        self.phase
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Mark the channel stopped, whatever its phase. Returns the previous phase.
    pub(crate) fn stop(&self) -> ChannelPhase {
        ChannelPhase::from_u8(
            self.phase
                .swap(ChannelPhase::Stopped as u8, Ordering::AcqRel),
        )
    }

    /// Record that the client asked for the engine runtime to be torn down.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    /// Encoder used for this channel's responses.
    pub fn encoder(&self) -> &ResponseEncoder {
        &self.encoder
    }

    /// Count a job submitted to the channel's worker.
    ///
    /// Only the control path calls this, so a zero count seen there stays
    /// zero until the control path submits again.
    pub(crate) fn job_queued(&self) {
        self.queued.fetch_add(1, Ordering::AcqRel);
    }

    /// Count a job the worker has finished, its reply already handed to the
    /// writer.
    pub(crate) fn job_done(&self) {
        self.queued.fetch_sub(1, Ordering::AcqRel);
    }

    /// Jobs submitted to the worker and not yet finished.
    pub fn queued_jobs(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    fn encode(&self, response: &Response) -> Option<Bytes> {
        match self.encoder.encode(response) {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::error!(channel = %self.id, "Failed to encode response: {}", e);
                None
            }
        }
    }

    fn dropped(&self, response: &Response) {
        tracing::debug!(
            channel = %self.id,
            call_id = ?response.call_id(),
            "Connection gone, dropping response"
        );
    }

    /// Encode `response` and queue it on the connection from a worker thread.
    ///
    /// Blocks while the connection's queue is full. If the connection has
    /// already gone away the response is dropped.
    pub fn emit(&self, response: Response) {
        let Some(payload) = self.encode(&response) else {
            return;
        };
        if self.writer.blocking_send(OutboundFrame::new(payload)).is_err() {
            self.dropped(&response);
        }
    }

    /// Encode `response` and queue it on the connection from async code.
    pub async fn send(&self, response: Response) {
        let Some(payload) = self.encode(&response) else {
            return;
        };
        if self.writer.send(OutboundFrame::new(payload)).await.is_err() {
            self.dropped(&response);
        }
    }
}

impl fmt::Debug for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelState")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .field("shutdown_requested", &self.is_shutdown_requested())
            .field("queued", &self.queued_jobs())
            .field("encoding", &self.encoder.encoding())
            .finish()
    }
}
