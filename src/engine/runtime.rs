//! Owner of the process-wide engine runtime.
//!
//! The engine's global state is modeled as one [`EngineRuntime`] created at
//! process start and shared by every channel. It counts live instances and
//! runs [`ScriptEngine::global_shutdown`] at most once, when a shutdown has
//! been requested and the last live instance has been stopped.
//!
//! Teardown affects every channel: once a shutdown is requested no new
//! instance can be created.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use super::{panic_message, EngineInstance, EngineLimits, ScriptEngine};
use crate::error::{BridgeError, Result};

#[derive(Debug, Default)]
struct RuntimeState {
    live: usize,
    shutdown_requested: bool,
    torn_down: bool,
}

impl RuntimeState {
    /// Claim the teardown if it is due. Returns true exactly once.
    fn claim_teardown(&mut self) -> bool {
        if self.shutdown_requested && self.live == 0 && !self.torn_down {
            self.torn_down = true;
            return true;
        }
        false
    }
}

/// Process-wide engine runtime shared by all channels.
pub struct EngineRuntime {
    engine: Box<dyn ScriptEngine>,
    state: Mutex<RuntimeState>,
    torn_down: watch::Sender<bool>,
}

impl EngineRuntime {
    /// Take ownership of `engine` and run its locale setup.
    pub fn new<E: ScriptEngine>(engine: E) -> Self {
        engine.configure_locale();
        let (torn_down, _) = watch::channel(false);
        Self {
            engine: Box::new(engine),
            state: Mutex::new(RuntimeState::default()),
            torn_down,
        }
    }

    fn state(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an engine instance.
    ///
    /// Fails with [`BridgeError::ProtocolState`] once a shutdown has been
    /// requested, or with the engine's own error. A panicking engine is
    /// reported as [`BridgeError::Engine`].
    pub fn initialize(&self, limits: EngineLimits) -> Result<Box<dyn EngineInstance>> {
        {
            let mut state = self.state();
            if state.shutdown_requested || state.torn_down {
                return Err(BridgeError::ProtocolState(
                    "engine runtime is shutting down".to_string(),
                ));
            }
            state.live += 1;
        }

        let created = panic::catch_unwind(AssertUnwindSafe(|| self.engine.initialize(limits)))
            .unwrap_or_else(|payload| {
                let message = panic_message(&*payload);
                tracing::error!("Engine panicked during init: {}", message);
                Err(BridgeError::Engine(format!("engine panicked: {}", message)))
            });

        match created {
            Ok(instance) => {
                tracing::debug!(
                    stack_bytes = limits.stack_bytes,
                    heap_bytes = limits.heap_bytes,
                    "Engine instance created"
                );
                Ok(instance)
            }
            Err(e) => {
                self.release();
                Err(e)
            }
        }
    }

    /// Stop an instance created by [`EngineRuntime::initialize`].
    ///
    /// The instance always counts as released, even if its `stop` panics.
    pub fn stop(&self, instance: Box<dyn EngineInstance>) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || instance.stop())) {
            tracing::error!("Engine instance panicked while stopping: {}", panic_message(&*payload));
        }
        self.release();
    }

    fn release(&self) {
        let teardown = {
            let mut state = self.state();
            state.live = state.live.saturating_sub(1);
            state.claim_teardown()
        };
        if teardown {
            self.teardown();
        }
    }

    /// Ask for the global runtime to be torn down.
    ///
    /// Runs immediately if no instance is live, otherwise when the last one
    /// is stopped.
    pub fn request_shutdown(&self) {
        let teardown = {
            let mut state = self.state();
            if !state.shutdown_requested {
                tracing::info!(live = state.live, "Engine runtime shutdown requested");
            }
            state.shutdown_requested = true;
            state.claim_teardown()
        };
        if teardown {
            self.teardown();
        }
    }

    fn teardown(&self) {
        tracing::info!("Tearing down engine runtime");
        self.engine.global_shutdown();
        self.torn_down.send_replace(true);
    }

    /// Number of instances created and not yet stopped.
    pub fn live_instances(&self) -> usize {
        self.state().live
    }

    /// Whether a shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.state().shutdown_requested
    }

    /// Whether the global runtime has been torn down.
    pub fn is_torn_down(&self) -> bool {
        *self.torn_down.borrow()
    }

    /// Wait until the global runtime has been torn down.
    pub async fn torn_down(&self) {
        let mut rx = self.torn_down.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}
