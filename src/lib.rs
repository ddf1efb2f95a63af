//! # scriptport
//!
//! Bridge process that lets a host runtime drive an embedded scripting
//! engine over a framed binary port protocol.
//!
//! The host (typically an Erlang node with a `{packet, 4}` port) sends
//! commands tagged with two ASCII bytes: `ij` creates the channel's engine
//! instance, `ej`/`dj` evaluate code with or without a result, `sd` asks for
//! the engine runtime to be torn down once the channel closes. Every command
//! gets exactly one response tuple, encoded in the Erlang external term format
//! (or MessagePack).
//!
//! ## Architecture
//!
//! - **Control path** (one task per connection): reads packets, creates
//!   engine instances inline for init
//! - **Worker pool** (OS threads): executes every other command on the worker
//!   the channel is pinned to, so each instance is only used by one thread
//! - **Writer task** (one per connection): serializes responses onto the port
//!
//! ## Example
//!
//! ```ignore
//! use scriptport::{Bridge, JsEngine};
//!
//! #[tokio::main]
//! async fn main() -> scriptport::Result<()> {
//!     Bridge::builder(JsEngine::new())
//!         .build()?
//!         .serve_stdio()
//!         .await
//! }
//! ```

pub mod channel;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod writer;

mod server;

pub use channel::{ChannelId, ChannelPhase, ChannelState};
pub use codec::ResponseEncoding;
pub use config::BridgeConfig;
pub use engine::{EngineInstance, EngineLimits, EngineRuntime, EvalOutcome, ScriptEngine};
pub use error::{BridgeError, Result};
pub use server::{Bridge, BridgeBuilder};

#[cfg(feature = "js")]
pub use engine::JsEngine;
#[cfg(feature = "lua")]
pub use engine::LuaEngine;
