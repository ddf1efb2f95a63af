//! Routes decoded packets of every channel onto the worker pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::oneshot;

use super::job::{Job, ALREADY_INITIALIZED};
use super::pool::WorkerPool;
use crate::channel::{ChannelId, ChannelPhase, ChannelState};
use crate::codec::{ResponseEncoder, ResponseEncoding};
use crate::engine::{EngineLimits, EngineRuntime};
use crate::error::{BridgeError, Result};
use crate::protocol::{recover_call_id, Command, CommandTag, Response};
use crate::writer::WriterHandle;

/// Entry point of the control path.
///
/// Init commands create the engine instance inline; every other command is
/// queued as a job on the channel's pinned worker. Replies decided on the
/// control path (the init acknowledgement and init rejections) are written
/// directly when the channel has no job queued, and otherwise queued behind
/// those jobs, so a channel's responses leave in the order its commands
/// arrived without waiting on other channels' work.
pub struct Dispatcher {
    runtime: Arc<EngineRuntime>,
    pool: WorkerPool,
    next_channel: AtomicU64,
}

impl Dispatcher {
    /// Create a dispatcher with `workers` worker threads.
    pub fn new(runtime: Arc<EngineRuntime>, workers: usize) -> Result<Self> {
        let pool = WorkerPool::new(workers, runtime.clone())?;
        Ok(Self {
            runtime,
            pool,
            next_channel: AtomicU64::new(1),
        })
    }

    /// The shared engine runtime.
    pub fn runtime(&self) -> &Arc<EngineRuntime> {
        &self.runtime
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.pool.size()
    }

    /// Open a channel whose responses go to `writer`.
    pub fn open_channel(
        &self,
        writer: WriterHandle,
        encoding: ResponseEncoding,
    ) -> Arc<ChannelState> {
        let id = ChannelId(self.next_channel.fetch_add(1, Ordering::Relaxed));
        let channel = ChannelState::new(id, ResponseEncoder::new(encoding), writer);
        tracing::info!(
            channel = %id,
            worker = self.pool.worker_for(id),
            encoding = %encoding,
            "Channel opened"
        );
        Arc::new(channel)
    }

    /// Dispatch one command packet received on `channel`.
    ///
    /// Fails only when the channel has been stopped or the pool is gone;
    /// command level failures are turned into error replies.
    pub async fn dispatch(&self, raw: Bytes, channel: &Arc<ChannelState>) -> Result<()> {
        if channel.phase() == ChannelPhase::Stopped {
            return Err(BridgeError::ProtocolState(format!(
                "channel {} is stopped",
                channel.id()
            )));
        }

        match CommandTag::peek(&raw) {
            Ok(CommandTag::Init) => self.init(raw, channel).await,
            _ => self.pool.submit(Job::Command {
                channel: channel.clone(),
                raw,
            }),
        }
    }

    async fn init(&self, raw: Bytes, channel: &Arc<ChannelState>) -> Result<()> {
        let (call_id, stack_mb, heap_mb) = match Command::decode(&raw) {
            Ok(Command::Init {
                call_id,
                stack_mb,
                heap_mb,
            }) => (call_id, stack_mb, heap_mb),
            Ok(other) => {
                let response = Response::Error(other.call_id().clone(), "expected init".to_string());
                return self.reply(channel, response).await;
            }
            Err(e) => {
                tracing::warn!(channel = %channel.id(), "Rejecting malformed init: {}", e);
                let response = Response::from_error(recover_call_id(&raw), &e);
                return self.reply(channel, response).await;
            }
        };

        if channel.phase() != ChannelPhase::Uninitialized {
            tracing::warn!(channel = %channel.id(), "Init on an initialized channel");
            let response = Response::Error(call_id, ALREADY_INITIALIZED.to_string());
            return self.reply(channel, response).await;
        }

        let limits = EngineLimits::from_megabytes(stack_mb, heap_mb);
        let instance = match self.runtime.initialize(limits) {
            Ok(instance) => instance,
            Err(e) => {
                tracing::warn!(channel = %channel.id(), "Engine init failed: {}", e);
                return self.reply(channel, Response::from_error(call_id, &e)).await;
            }
        };

        if !channel.transition(ChannelPhase::Uninitialized, ChannelPhase::Ready) {
            self.runtime.stop(instance);
            let response = Response::Error(call_id, ALREADY_INITIALIZED.to_string());
            return self.reply(channel, response).await;
        }

        tracing::info!(
            channel = %channel.id(),
            stack_bytes = limits.stack_bytes,
            heap_bytes = limits.heap_bytes,
            "Channel initialized"
        );

        let ack = Response::Ok(call_id);
        if channel.queued_jobs() > 0 {
            return self.pool.submit(Job::Attach {
                channel: channel.clone(),
                instance,
                ack: Some(ack),
            });
        }

        self.pool.submit(Job::Attach {
            channel: channel.clone(),
            instance,
            ack: None,
        })?;
        channel.send(ack).await;
        Ok(())
    }

    /// Reply from the control path without overtaking queued replies.
    async fn reply(&self, channel: &Arc<ChannelState>, response: Response) -> Result<()> {
        if channel.queued_jobs() > 0 {
            return self.pool.submit(Job::Reply {
                channel: channel.clone(),
                response,
            });
        }
        channel.send(response).await;
        Ok(())
    }

    /// Close `channel` after its queued jobs have run.
    ///
    /// The instance is stopped on its worker; if the client asked for a
    /// shutdown the engine runtime is then asked to tear down.
    pub async fn close_channel(&self, channel: &Arc<ChannelState>) {
        if channel.stop() == ChannelPhase::Stopped {
            return;
        }

        let (done_tx, done_rx) = oneshot::channel();
        let job = Job::Close {
            channel: channel.clone(),
            done: done_tx,
        };
        if self.pool.submit(job).is_ok() {
            let _ = done_rx.await;
        }

        if channel.is_shutdown_requested() {
            self.runtime.request_shutdown();
        }

        tracing::info!(channel = %channel.id(), "Channel closed");
    }
}
