//! JavaScript engine backed by QuickJS (`rquickjs`).
//!
//! Each instance owns its own QuickJS runtime and context, created on the
//! worker thread at the first evaluation so the engine's native stack checks
//! measure the thread that actually runs the scripts. The heap size of the
//! init command becomes the runtime's memory limit (0 means unlimited).
//!
//! Results are returned as `JSON.stringify` text. Failures, including thrown
//! exceptions, are reported as `{"error":{"message":..,"source":..}}`.

use rquickjs::{Context, Ctx, Runtime, Value};

use super::{EngineInstance, EngineLimits, EvalOutcome, ScriptEngine, WORKER_STACK_SIZE};
use crate::error::Result;

/// Script engine creating one QuickJS runtime per channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsEngine;

impl JsEngine {
    pub fn new() -> Self {
        Self
    }
}

impl ScriptEngine for JsEngine {
    fn initialize(&self, limits: EngineLimits) -> Result<Box<dyn EngineInstance>> {
        Ok(Box::new(JsInstance { limits, vm: None }))
    }

    fn global_shutdown(&self) {
        tracing::debug!("QuickJS keeps no process-wide state, nothing to tear down");
    }
}

// Field order matters: the context is dropped before its runtime.
struct Vm {
    context: Context,
    #[allow(dead_code)]
    runtime: Runtime,
}

impl Vm {
    fn new(limits: EngineLimits) -> rquickjs::Result<Self> {
        let runtime = Runtime::new()?;
        if limits.heap_bytes > 0 {
            runtime.set_memory_limit(limits.heap_bytes);
        }
        // Leave headroom for the native frames around the interpreter.
        runtime.set_max_stack_size(limits.stack_bytes.min(WORKER_STACK_SIZE / 2));
        let context = Context::full(&runtime)?;
        Ok(Self { context, runtime })
    }
}

struct JsInstance {
    limits: EngineLimits,
    vm: Option<Vm>,
}

impl JsInstance {
    fn vm(&mut self) -> rquickjs::Result<&Vm> {
        let vm = match self.vm.take() {
            Some(vm) => vm,
            None => {
                tracing::debug!(
                    stack_bytes = self.limits.stack_bytes,
                    heap_bytes = self.limits.heap_bytes,
                    "Creating QuickJS runtime"
                );
                Vm::new(self.limits)?
            }
        };
        Ok(self.vm.insert(vm))
    }
}

impl EngineInstance for JsInstance {
    fn evaluate(&mut self, source_name: &str, code: &str, want_result: bool) -> EvalOutcome {
        let vm = match self.vm() {
            Ok(vm) => vm,
            Err(e) => {
                return EvalOutcome::error_payload(
                    &format!("cannot create runtime: {}", e),
                    source_name,
                )
            }
        };

        vm.context.with(|ctx| {
            let value: Value = match ctx.eval(code) {
                Ok(value) => value,
                Err(e) => return EvalOutcome::error_payload(&failure_message(&ctx, e), source_name),
            };

            if !want_result || value.is_undefined() {
                return EvalOutcome::Done;
            }

            match ctx.json_stringify(value) {
                Ok(Some(text)) => match text.to_string() {
                    Ok(text) => EvalOutcome::Value(text),
                    Err(e) => EvalOutcome::error_payload(&failure_message(&ctx, e), source_name),
                },
                // functions and symbols have no JSON form
                Ok(None) => EvalOutcome::Done,
                Err(e) => EvalOutcome::error_payload(&failure_message(&ctx, e), source_name),
            }
        })
    }

    fn stop(self: Box<Self>) {
        tracing::debug!(
            stack_bytes = self.limits.stack_bytes,
            started = self.vm.is_some(),
            "Stopping QuickJS instance"
        );
    }
}

/// Message of a failed evaluation. Pending exceptions are taken off the
/// context so the next evaluation starts clean.
fn failure_message(ctx: &Ctx<'_>, error: rquickjs::Error) -> String {
    if !matches!(error, rquickjs::Error::Exception) {
        return error.to_string();
    }

    let thrown = ctx.catch();
    if let Some(exception) = thrown.as_exception() {
        return exception
            .message()
            .unwrap_or_else(|| "uncaught exception".to_string());
    }

    // `throw "text"` and other non-Error values
    match ctx.json_stringify(thrown) {
        Ok(Some(text)) => text
            .to_string()
            .unwrap_or_else(|_| "uncaught exception".to_string()),
        _ => "uncaught exception".to_string(),
    }
}
