//! Dedicated writer task for response packets.
//!
//! One writer task owns the write half of a connection and receives packets
//! via an mpsc channel. The control path sends from async code, worker
//! threads send with [`WriterHandle::blocking_send`]. Packets from a single
//! sender arrive in the order they were sent, which keeps per-channel
//! responses FIFO.
//!
//! # Architecture
//!
//! ```text
//! Control path ─┐
//! Worker 1     ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Port
//! Worker N     ─┘
//! ```
//!
//! Ready packets are batched and written with scatter/gather I/O.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{BridgeError, Result};
use crate::protocol::{encode_length, PACKET_HEADER_SIZE};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum packets to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A packet ready to be written to the port.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded length header.
    pub header: [u8; PACKET_HEADER_SIZE],
    /// Payload bytes.
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Create a new outbound packet around `payload`.
    #[inline]
    pub fn new(payload: Bytes) -> Self {
        Self {
            header: encode_length(payload.len() as u32),
            payload,
        }
    }

    /// Total size of this packet (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        PACKET_HEADER_SIZE + self.payload.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for the packet queue. Senders wait when it is full.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle for sending packets to the writer task.
///
/// Cheaply cloneable.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
}

impl WriterHandle {
    /// Send a packet from async code.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| BridgeError::ConnectionClosed)
    }

    /// Send a packet from a thread outside the async runtime.
    ///
    /// # Panics
    ///
    /// Panics if called from within an async execution context.
    pub fn blocking_send(&self, frame: OutboundFrame) -> Result<()> {
        self.tx
            .blocking_send(frame)
            .map_err(|_| BridgeError::ConnectionClosed)
    }
}

/// Spawn the writer task and return a handle for sending packets.
///
/// The task finishes once every [`WriterHandle`] has been dropped and the
/// queue is drained.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let task = tokio::spawn(writer_loop(rx, writer));
    let handle = WriterHandle { tx };

    (handle, task)
}

/// Spawn the writer task with default configuration.
pub fn spawn_writer_task_default<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    spawn_writer_task(writer, WriterConfig::default())
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(first) = rx.recv().await {
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        write_batch(&mut writer, &batch).await?;
    }

    writer.flush().await?;
    Ok(())
}

/// Write a batch of packets using `write_vectored`, continuing after partial writes.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(|f| f.size()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(BridgeError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data after `skip_bytes` already written.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        let header_end = offset + PACKET_HEADER_SIZE;
        if skip_bytes < header_end {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&frame.header[start..]));
        }
        offset = header_end;

        if !frame.payload.is_empty() {
            let payload_end = offset + frame.payload.len();
            if skip_bytes < payload_end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&frame.payload[start..]));
            }
            offset = payload_end;
        }
    }

    slices
}
