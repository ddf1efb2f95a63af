//! Dispatch module - command routing and execution.
//!
//! - [`Dispatcher`] - control path entry point, runs init inline
//! - [`WorkerPool`] - worker threads keyed by channel
//! - [`Job`] - unit of work queued on a worker

mod dispatcher;
mod job;
mod pool;

pub use dispatcher::Dispatcher;
pub use job::{execute_command, outcome_response, Job, ALREADY_INITIALIZED, NOT_INITIALIZED, NULL_VALUE};
pub use pool::{default_worker_count, WorkerPool};
