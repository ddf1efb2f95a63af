//! Bridge builder and connection loops.
//!
//! The [`BridgeBuilder`] collects configuration and owns the engine until the
//! bridge is built. A [`Bridge`] serves connections; each connection is one
//! channel:
//! 1. Spawn the connection's writer task
//! 2. Open a channel on the dispatcher
//! 3. Read packets and dispatch them until EOF
//! 4. Close the channel and wait for the writer to drain
//!
//! # Example
//!
//! ```ignore
//! use scriptport::{Bridge, JsEngine};
//!
//! #[tokio::main]
//! async fn main() -> scriptport::Result<()> {
//!     let bridge = Bridge::builder(JsEngine::new()).workers(4).build()?;
//!     bridge.serve_stdio().await
//! }
//! ```

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::channel::ChannelState;
use crate::codec::ResponseEncoding;
use crate::config::{BridgeConfig, READ_BUFFER_SIZE};
use crate::dispatch::Dispatcher;
use crate::engine::{EngineRuntime, ScriptEngine};
use crate::error::Result;
use crate::protocol::FrameBuffer;
use crate::writer::spawn_writer_task;

/// Builder for configuring and creating a [`Bridge`].
pub struct BridgeBuilder {
    runtime: Arc<EngineRuntime>,
    config: BridgeConfig,
}

impl BridgeBuilder {
    /// Create a builder around `engine` with default configuration.
    pub fn new<E: ScriptEngine>(engine: E) -> Self {
        Self::with_runtime(Arc::new(EngineRuntime::new(engine)))
    }

    /// Create a builder around an existing engine runtime.
    pub fn with_runtime(runtime: Arc<EngineRuntime>) -> Self {
        Self {
            runtime,
            config: BridgeConfig::default(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the number of worker threads.
    ///
    /// Default: available parallelism
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Set the response encoding.
    ///
    /// Default: etf
    pub fn encoding(mut self, encoding: ResponseEncoding) -> Self {
        self.config.encoding = encoding;
        self
    }

    /// Set the largest accepted command packet.
    ///
    /// Default: 64 MiB
    pub fn max_frame_size(mut self, max_frame_size: u32) -> Self {
        self.config.max_frame_size = max_frame_size;
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.writer.channel_capacity = capacity;
        self
    }

    /// Start the worker pool and build the bridge.
    pub fn build(self) -> Result<Bridge> {
        let dispatcher = Dispatcher::new(self.runtime, self.config.workers)?;
        tracing::debug!(
            workers = dispatcher.workers(),
            encoding = %self.config.encoding,
            "Bridge built"
        );
        Ok(Bridge {
            dispatcher: Arc::new(dispatcher),
            config: self.config,
        })
    }
}

/// A bridge ready to serve connections.
///
/// Cloning is cheap; clones share the dispatcher and engine runtime.
#[derive(Clone)]
pub struct Bridge {
    dispatcher: Arc<Dispatcher>,
    config: BridgeConfig,
}

impl Bridge {
    /// Create a new bridge builder.
    pub fn builder<E: ScriptEngine>(engine: E) -> BridgeBuilder {
        BridgeBuilder::new(engine)
    }

    /// The shared engine runtime.
    pub fn runtime(&self) -> &Arc<EngineRuntime> {
        self.dispatcher.runtime()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Serve one channel over `reader`/`writer` until the reader reaches EOF.
    ///
    /// Returns after every response of the channel has been written.
    pub async fn serve_connection<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer, writer_task) = spawn_writer_task(writer, self.config.writer.clone());
        let channel = self.dispatcher.open_channel(writer, self.config.encoding);

        let result = self.read_loop(reader, &channel).await;
        if let Err(e) = &result {
            tracing::error!(channel = %channel.id(), "Read loop error: {}", e);
        }

        self.dispatcher.close_channel(&channel).await;
        drop(channel);

        match writer_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Writer stopped with error: {}", e),
            Err(e) => tracing::error!("Writer task failed: {}", e),
        }

        result
    }

    async fn read_loop<R>(&self, mut reader: R, channel: &Arc<ChannelState>) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut frame_buffer = FrameBuffer::with_max_frame_size(self.config.max_frame_size);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => {
                    if frame_buffer.has_partial() {
                        tracing::warn!(
                            channel = %channel.id(),
                            buffered = frame_buffer.len(),
                            "Connection closed in the middle of a packet"
                        );
                    }
                    return Ok(());
                }
                Ok(n) => n,
                Err(e) => return Err(e.into()),
            };

            for payload in frame_buffer.push(&buf[..n])? {
                self.dispatcher.dispatch(payload, channel).await?;
            }
        }
    }

    /// Serve a single channel on stdin/stdout, the host's port.
    pub async fn serve_stdio(&self) -> Result<()> {
        tracing::info!("Serving on stdio");
        self.serve_connection(tokio::io::stdin(), tokio::io::stdout())
            .await
    }

    /// Serve every connection accepted on a Unix socket as its own channel.
    ///
    /// Stops accepting once the engine runtime has been torn down.
    #[cfg(unix)]
    pub async fn serve_socket(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let listener = crate::transport::SocketListener::bind(path).await?;
        let runtime = self.runtime().clone();

        loop {
            tokio::select! {
                _ = runtime.torn_down() => {
                    tracing::info!(
                        path = %listener.path().display(),
                        "Engine runtime torn down, no longer accepting connections"
                    );
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let stream = match accepted {
                        Ok(stream) => stream,
                        Err(e) => {
                            tracing::error!(path = %listener.path().display(), "Accept failed: {}", e);
                            continue;
                        }
                    };

                    let bridge = self.clone();
                    tokio::spawn(async move {
                        let (reader, writer) = stream.into_split();
                        if let Err(e) = bridge.serve_connection(reader, writer).await {
                            tracing::warn!("Connection ended with error: {}", e);
                        }
                    });
                }
            }
        }
    }
}
