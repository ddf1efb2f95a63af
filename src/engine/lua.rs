//! Lua engine backed by `mlua`.
//!
//! Each instance is an independent `Lua` state. The heap size of the init
//! command becomes the state's memory limit (0 means unlimited); the stack
//! size is recorded but Lua manages its own stack.
//!
//! Results are serialized to JSON. Failures are reported as
//! `{"error":{"message":..,"source":..}}` so hosts that sniff the payload keep
//! working.

use mlua::{Lua, LuaSerdeExt};

use super::{EngineInstance, EngineLimits, EvalOutcome, ScriptEngine};
use crate::error::{BridgeError, Result};

/// Script engine creating one Lua state per channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct LuaEngine;

impl LuaEngine {
    pub fn new() -> Self {
        Self
    }
}

impl ScriptEngine for LuaEngine {
    fn initialize(&self, limits: EngineLimits) -> Result<Box<dyn EngineInstance>> {
        let lua = Lua::new();
        if limits.heap_bytes > 0 {
            lua.set_memory_limit(limits.heap_bytes)
                .map_err(|e| BridgeError::Engine(format!("cannot set memory limit: {}", e)))?;
        }
        Ok(Box::new(LuaInstance { lua, limits }))
    }

    fn global_shutdown(&self) {
        tracing::debug!("Lua keeps no process-wide state, nothing to tear down");
    }
}

struct LuaInstance {
    lua: Lua,
    limits: EngineLimits,
}

impl EngineInstance for LuaInstance {
    fn evaluate(&mut self, source_name: &str, code: &str, want_result: bool) -> EvalOutcome {
        let chunk = self.lua.load(code).set_name(format!("@{}", source_name));

        if !want_result {
            return match chunk.exec() {
                Ok(()) => EvalOutcome::Done,
                Err(e) => EvalOutcome::error_payload(&e.to_string(), source_name),
            };
        }

        let value: mlua::Value = match chunk.eval() {
            Ok(v) => v,
            Err(e) => return EvalOutcome::error_payload(&e.to_string(), source_name),
        };

        match self.lua.from_value::<serde_json::Value>(value) {
            Ok(json) => EvalOutcome::Value(json.to_string()),
            Err(e) => EvalOutcome::error_payload(
                &format!("result is not serializable: {}", e),
                source_name,
            ),
        }
    }

    fn stop(self: Box<Self>) {
        tracing::debug!(
            stack_bytes = self.limits.stack_bytes,
            used_bytes = self.lua.used_memory(),
            "Stopping Lua instance"
        );
    }
}
