use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use scriptport::{Bridge, BridgeConfig, JsEngine, ResponseEncoding};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "scriptport")]
#[command(version, about, long_about = None)]
struct Args {
    /// Serve channels on a Unix socket instead of stdin/stdout
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Worker threads (defaults to available parallelism)
    #[arg(long)]
    workers: Option<usize>,

    /// Response encoding: etf or msgpack
    #[arg(long, default_value_t = ResponseEncoding::Etf)]
    encoding: ResponseEncoding,

    /// Largest accepted command packet in bytes
    #[arg(long)]
    max_frame_size: Option<u32>,

    /// Response packets a connection may queue before workers wait
    #[arg(long)]
    channel_capacity: Option<usize>,
}

impl Args {
    fn config(&self) -> BridgeConfig {
        let mut config = BridgeConfig::new().with_encoding(self.encoding);
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if let Some(max_frame_size) = self.max_frame_size {
            config = config.with_max_frame_size(max_frame_size);
        }
        if let Some(capacity) = self.channel_capacity {
            config = config.with_channel_capacity(capacity);
        }
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // stdout carries protocol packets, logs go to stderr
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let bridge = match Bridge::builder(JsEngine::new())
        .config(args.config())
        .build()
    {
        Ok(bridge) => bridge,
        Err(e) => {
            tracing::error!("Failed to start bridge: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match &args.socket {
        Some(path) => serve_socket(&bridge, path).await,
        None => bridge.serve_stdio().await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Bridge stopped: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(unix)]
async fn serve_socket(bridge: &Bridge, path: &std::path::Path) -> scriptport::Result<()> {
    bridge.serve_socket(path).await
}

#[cfg(not(unix))]
async fn serve_socket(_bridge: &Bridge, _path: &std::path::Path) -> scriptport::Result<()> {
    Err(scriptport::BridgeError::Protocol(
        "socket mode requires a Unix platform".to_string(),
    ))
}
