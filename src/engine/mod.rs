//! Engine module - the embedded scripting engine seam.
//!
//! Provides:
//! - [`ScriptEngine`] - process-wide engine: locale setup, instance creation, global teardown
//! - [`EngineInstance`] - one engine instance, owned by exactly one channel
//! - [`EngineRuntime`] - the single owner of a [`ScriptEngine`], counts live
//!   instances and gates global teardown
//!
//! Instances are not required to be reentrant. The dispatcher guarantees that
//! a given instance is only ever called from one worker thread at a time.
//!
//! Two engines ship with the crate: [`JsEngine`] (QuickJS, `js` feature) and
//! [`LuaEngine`] (`lua` feature).

mod runtime;

#[cfg(feature = "js")]
mod js;
#[cfg(feature = "lua")]
mod lua;

pub use runtime::EngineRuntime;

#[cfg(feature = "js")]
pub use js::JsEngine;
#[cfg(feature = "lua")]
pub use lua::LuaEngine;

use std::any::Any;

use crate::error::Result;

/// Smallest stack an instance is created with, in megabytes.
pub const MIN_STACK_MB: i32 = 8;

/// Native stack of the worker threads instances run on.
pub const WORKER_STACK_SIZE: usize = 64 * 1024 * 1024;

const MB: usize = 1024 * 1024;

/// Memory limits an instance is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineLimits {
    /// Thread stack size in bytes.
    pub stack_bytes: usize,
    /// Heap size in bytes.
    pub heap_bytes: usize,
}

impl EngineLimits {
    /// Build limits from the megabyte values of an init command.
    ///
    /// The stack is clamped to [`MIN_STACK_MB`]; a negative heap is treated as 0.
    ///
    /// # Example
    ///
    /// ```
    /// use scriptport::engine::EngineLimits;
    ///
    /// let limits = EngineLimits::from_megabytes(4, 8);
    /// assert_eq!(limits.stack_bytes, 8 * 1024 * 1024);
    /// assert_eq!(limits.heap_bytes, 8 * 1024 * 1024);
    /// ```
    pub fn from_megabytes(stack_mb: i32, heap_mb: i32) -> Self {
        let stack_mb = stack_mb.max(MIN_STACK_MB) as usize;
        let heap_mb = heap_mb.max(0) as usize;
        Self {
            stack_bytes: stack_mb.saturating_mul(MB),
            heap_bytes: heap_mb.saturating_mul(MB),
        }
    }
}

/// Result of a single evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalOutcome {
    /// Evaluation produced a value (serialized by the engine).
    Value(String),
    /// Evaluation succeeded and no value was requested or produced.
    Done,
    /// Evaluation failed; text is engine defined.
    Error(String),
}

impl EvalOutcome {
    /// Classify the raw string an engine returned.
    ///
    /// For engines that report errors in-band: with `want_result`, a payload
    /// that is a JSON object whose first key is `"error"` is an error and
    /// anything else is a value; without it, no payload means success and any
    /// payload is an error message.
    ///
    /// # Example
    ///
    /// ```
    /// use scriptport::engine::EvalOutcome;
    ///
    /// let raw = Some(r#"{"error":"x"}"#.to_string());
    /// assert_eq!(EvalOutcome::from_payload(raw.clone(), true), EvalOutcome::Error(raw.unwrap()));
    /// assert_eq!(EvalOutcome::from_payload(None, false), EvalOutcome::Done);
    /// ```
    pub fn from_payload(payload: Option<String>, want_result: bool) -> Self {
        match (payload, want_result) {
            (Some(text), true) if is_error_payload(&text) => EvalOutcome::Error(text),
            (Some(text), true) => EvalOutcome::Value(text),
            (None, true) => EvalOutcome::Done,
            (Some(text), false) => EvalOutcome::Error(text),
            (None, false) => EvalOutcome::Done,
        }
    }

    /// Build the `{"error": {...}}` payload engines use to report failures.
    pub fn error_payload(message: &str, source_name: &str) -> Self {
        let payload = serde_json::json!({
            "error": {
                "message": message,
                "source": source_name,
            }
        });
        EvalOutcome::Error(payload.to_string())
    }
}

/// Whether `text` is a JSON object whose first key is `"error"`.
pub fn is_error_payload(text: &str) -> bool {
    text.trim_start()
        .strip_prefix('{')
        .map(|rest| rest.trim_start().starts_with("\"error\""))
        .unwrap_or(false)
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Process-wide scripting engine.
pub trait ScriptEngine: Send + Sync + 'static {
    /// Process-wide locale setup, called once before any instance exists.
    fn configure_locale(&self) {}

    /// Create one engine instance.
    fn initialize(&self, limits: EngineLimits) -> Result<Box<dyn EngineInstance>>;

    /// Tear down process-wide engine state. Only called after every instance
    /// has been stopped, and at most once.
    fn global_shutdown(&self) {}
}

/// One engine instance. Never called concurrently.
pub trait EngineInstance: Send {
    /// Evaluate `code`. `source_name` is used in diagnostics only.
    fn evaluate(&mut self, source_name: &str, code: &str, want_result: bool) -> EvalOutcome;

    /// Release the instance.
    fn stop(self: Box<Self>) {}
}
