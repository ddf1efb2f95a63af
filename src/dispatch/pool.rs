//! Keyed worker pool.
//!
//! Each worker is a dedicated OS thread draining its own FIFO queue. A channel
//! is always routed to the same worker, so its jobs run in arrival order and
//! its engine instance is only ever touched by that one thread.
//!
//! A panic inside an engine is caught on the worker. The channel loses its
//! instance and gets an error reply; the worker keeps serving its other
//! channels.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use tokio::sync::mpsc;

use super::job::{execute_command, Job};
use crate::channel::{ChannelId, ChannelPhase, ChannelState};
use crate::engine::{panic_message, EngineInstance, EngineRuntime, WORKER_STACK_SIZE};
use crate::error::{BridgeError, Result};
use crate::protocol::{recover_call_id, Response};

/// Number of workers used when none is configured.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Fixed set of worker threads with per-worker job queues.
pub struct WorkerPool {
    runtime: Arc<EngineRuntime>,
    senders: Vec<mpsc::UnboundedSender<Job>>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one).
    pub fn new(size: usize, runtime: Arc<EngineRuntime>) -> Result<Self> {
        let size = size.max(1);
        let mut senders = Vec::with_capacity(size);
        let mut threads = Vec::with_capacity(size);

        for index in 0..size {
            let (tx, rx) = mpsc::unbounded_channel();
            let worker = Worker {
                index,
                runtime: runtime.clone(),
                instances: HashMap::new(),
            };
            let handle = std::thread::Builder::new()
                .name(format!("scriptport-worker-{}", index))
                .stack_size(WORKER_STACK_SIZE)
                .spawn(move || worker.run(rx))?;
            senders.push(tx);
            threads.push(handle);
        }

        tracing::debug!(workers = size, "Worker pool started");
        Ok(Self {
            runtime,
            senders,
            threads,
        })
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.senders.len()
    }

    /// Index of the worker `channel` is pinned to.
    pub fn worker_for(&self, channel: ChannelId) -> usize {
        let mixed = channel.0.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        ((mixed >> 32) % self.senders.len() as u64) as usize
    }

    /// Queue `job` on the worker its channel is pinned to.
    ///
    /// The job counts as queued on its channel until the worker has run it.
    /// If the worker is gone, an instance carried by the job is stopped here.
    pub fn submit(&self, job: Job) -> Result<()> {
        let index = self.worker_for(job.channel_id());
        job.channel().job_queued();
        self.senders[index].send(job).map_err(|rejected| {
            let job = rejected.0;
            job.channel().job_done();
            if let Job::Attach { instance, .. } = job {
                self.runtime.stop(instance);
            }
            BridgeError::ConnectionClosed
        })
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.senders.clear();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Worker thread panicked");
            }
        }
    }
}

struct Worker {
    index: usize,
    runtime: Arc<EngineRuntime>,
    instances: HashMap<ChannelId, Box<dyn EngineInstance>>,
}

impl Worker {
    fn run(mut self, mut rx: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = rx.blocking_recv() {
            self.execute(job);
        }

        for (channel, instance) in self.instances.drain() {
            tracing::debug!(worker = self.index, %channel, "Stopping instance left at pool shutdown");
            self.runtime.stop(instance);
        }
    }

    fn execute(&mut self, job: Job) {
        let channel = job.channel().clone();
        match job {
            Job::Attach { instance, ack, .. } => {
                if let Some(previous) = self.instances.insert(channel.id(), instance) {
                    self.runtime.stop(previous);
                }
                if let Some(ack) = ack {
                    channel.emit(ack);
                }
            }
            Job::Command { raw, .. } => {
                let response = self.run_command(&channel, &raw);
                channel.emit(response);
            }
            Job::Reply { response, .. } => channel.emit(response),
            Job::Close { done, .. } => {
                if let Some(instance) = self.instances.remove(&channel.id()) {
                    tracing::debug!(worker = self.index, channel = %channel.id(), "Stopping instance");
                    self.runtime.stop(instance);
                }
                let _ = done.send(());
            }
        }
        channel.job_done();
    }

    fn run_command(&mut self, channel: &Arc<ChannelState>, raw: &Bytes) -> Response {
        let instance = self.instances.get_mut(&channel.id());
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            execute_command(channel, instance, raw)
        }));

        match result {
            Ok(response) => response,
            Err(payload) => {
                let message = panic_message(&*payload);
                tracing::error!(
                    worker = self.index,
                    channel = %channel.id(),
                    "Engine panicked, dropping instance: {}",
                    message
                );
                if let Some(instance) = self.instances.remove(&channel.id()) {
                    self.runtime.stop(instance);
                }
                channel.transition(ChannelPhase::Ready, ChannelPhase::Uninitialized);
                Response::Error(recover_call_id(raw), format!("engine panicked: {}", message))
            }
        }
    }
}
