//! Transport module - listeners for multi-channel mode.
//!
//! Single-channel mode runs on stdin/stdout and needs nothing from here.

#[cfg(unix)]
mod socket;

#[cfg(unix)]
pub use socket::SocketListener;
