//! Units of work executed on a channel's pinned worker.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::channel::{ChannelId, ChannelState};
use crate::engine::{EngineInstance, EvalOutcome};
use crate::error::BridgeError;
use crate::protocol::{recover_call_id, Command, EvalRequest, Response};

/// Reply to an eval command issued before the channel's init.
pub const NOT_INITIALIZED: &str = "not_initialized";

/// Reply to a second init on the same channel.
pub const ALREADY_INITIALIZED: &str = "already_initialized";

/// Value reported when a result was requested but the script produced none.
pub const NULL_VALUE: &str = "null";

/// Work queued on a worker. Jobs of one channel run in submission order.
pub enum Job {
    /// Hand a freshly created instance to the worker.
    ///
    /// `ack` is set when the init acknowledgement has to wait for replies
    /// still queued on the worker.
    Attach {
        channel: Arc<ChannelState>,
        instance: Box<dyn EngineInstance>,
        ack: Option<Response>,
    },
    /// Decode and execute a raw command.
    Command {
        channel: Arc<ChannelState>,
        raw: Bytes,
    },
    /// Emit a response decided on the control path.
    Reply {
        channel: Arc<ChannelState>,
        response: Response,
    },
    /// Stop the channel's instance once every earlier job has run.
    Close {
        channel: Arc<ChannelState>,
        done: oneshot::Sender<()>,
    },
}

impl Job {
    /// Channel this job belongs to; decides which worker runs it.
    pub fn channel_id(&self) -> ChannelId {
        self.channel().id()
    }

    /// The channel this job belongs to.
    pub fn channel(&self) -> &Arc<ChannelState> {
        match self {
            Job::Attach { channel, .. }
            | Job::Command { channel, .. }
            | Job::Reply { channel, .. }
            | Job::Close { channel, .. } => channel,
        }
    }
}

/// Decode `raw` and run it against the channel's instance, if any.
///
/// Init never reaches a worker through this path; the dispatcher creates the
/// instance on the control path and submits an [`Job::Attach`] instead.
pub fn execute_command(
    channel: &ChannelState,
    instance: Option<&mut Box<dyn EngineInstance>>,
    raw: &Bytes,
) -> Response {
    let command = match Command::decode(raw) {
        Ok(command) => command,
        Err(e) => {
            tracing::warn!(channel = %channel.id(), "Rejecting malformed command: {}", e);
            return Response::from_error(recover_call_id(raw), &e);
        }
    };

    tracing::debug!(
        channel = %channel.id(),
        tag = ?command.tag(),
        call_id = ?command.call_id(),
        "Executing command"
    );

    match command {
        Command::EvalWithResult(req) => evaluate(instance, req, true),
        Command::EvalDiscard(req) => evaluate(instance, req, false),
        Command::Shutdown { call_id } => {
            channel.request_shutdown();
            tracing::info!(channel = %channel.id(), "Shutdown requested by client");
            Response::Ok(call_id)
        }
        Command::Unknown { tag, call_id } => {
            let err = BridgeError::UnknownCommand(String::from_utf8_lossy(&tag).into_owned());
            tracing::warn!(channel = %channel.id(), "{}", err);
            Response::from_error(call_id, &err)
        }
        Command::Init { call_id, .. } => {
            Response::Error(call_id, ALREADY_INITIALIZED.to_string())
        }
    }
}

fn evaluate(
    instance: Option<&mut Box<dyn EngineInstance>>,
    req: EvalRequest,
    want_result: bool,
) -> Response {
    let Some(instance) = instance else {
        tracing::warn!(source = %req.source_name, "Eval before init");
        return Response::Error(req.call_id, NOT_INITIALIZED.to_string());
    };

    let outcome = instance.evaluate(&req.source_name, &req.code, want_result);
    outcome_response(req.call_id, outcome, want_result)
}

/// Map an evaluation outcome to the reply for its command.
pub fn outcome_response(call_id: Bytes, outcome: EvalOutcome, want_result: bool) -> Response {
    match (outcome, want_result) {
        (EvalOutcome::Error(message), _) => Response::Error(call_id, message),
        (EvalOutcome::Value(value), true) => Response::OkValue(call_id, value),
        (EvalOutcome::Done, true) => Response::OkValue(call_id, NULL_VALUE.to_string()),
        (EvalOutcome::Value(_) | EvalOutcome::Done, false) => Response::Ok(call_id),
    }
}
