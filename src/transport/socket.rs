//! Unix domain socket listener.
//!
//! # Example
//!
//! ```ignore
//! use scriptport::transport::SocketListener;
//!
//! let listener = SocketListener::bind("/tmp/scriptport.sock").await?;
//! let stream = listener.accept().await?;
//! ```

use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};

use crate::error::Result;

/// Listening socket. The socket file is removed when the listener is dropped.
pub struct SocketListener {
    listener: UnixListener,
    path: PathBuf,
}

impl SocketListener {
    /// Bind to `path`, replacing a stale socket file left by an earlier run.
    pub async fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;
        tracing::info!(path = %path.display(), "Listening");

        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    /// Accept one connection.
    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(stream)
    }

    /// Path the listener is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SocketListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
