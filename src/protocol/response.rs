//! Responses and their structured term shape.
//!
//! Every response is a tuple whose first element is the call id of the
//! command that triggered it:
//!
//! | Response                  | Term                                  |
//! |---------------------------|---------------------------------------|
//! | `Ok(id)`                  | `{<<id>>, ok}`                        |
//! | `OkValue(id, v)`          | `{<<id>>, ok, <<v>>}`                 |
//! | `Error(id, msg)`          | `{<<id>>, error, <<msg>>}`            |
//! | `UnknownCommand(id)`      | `{<<id>>, error, unknown_command}`    |

use bytes::Bytes;

use crate::error::{BridgeError, Result};

/// Fixed response tags, sent as atoms rather than free-form strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
    Ok,
    Error,
    UnknownCommand,
}

impl Symbol {
    /// All symbols, in table order.
    pub const ALL: [Symbol; 3] = [Symbol::Ok, Symbol::Error, Symbol::UnknownCommand];

    /// Atom text.
    pub fn name(&self) -> &'static str {
        match self {
            Symbol::Ok => "ok",
            Symbol::Error => "error",
            Symbol::UnknownCommand => "unknown_command",
        }
    }

    /// Look a symbol up by atom text.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }
}

/// Structured value understood by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireTerm {
    Binary(Bytes),
    Symbol(Symbol),
    Tuple(Vec<WireTerm>),
}

/// Reply to a single command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `{Id, ok}`
    Ok(Bytes),
    /// `{Id, ok, Value}`
    OkValue(Bytes, String),
    /// `{Id, error, Message}`
    Error(Bytes, String),
    /// `{Id, error, unknown_command}`
    UnknownCommand(Bytes),
}

impl Response {
    /// Convert a failure while handling a command into the reply for it.
    pub fn from_error(call_id: Bytes, err: &BridgeError) -> Self {
        match err {
            BridgeError::UnknownCommand(_) => Response::UnknownCommand(call_id),
            other => Response::Error(call_id, other.to_string()),
        }
    }

    /// Call id this response correlates with.
    pub fn call_id(&self) -> &Bytes {
        match self {
            Response::Ok(id)
            | Response::OkValue(id, _)
            | Response::Error(id, _)
            | Response::UnknownCommand(id) => id,
        }
    }

    /// Whether this is an `error` shaped response.
    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(..) | Response::UnknownCommand(_))
    }

    /// Lower to the structured term sent to the host.
    pub fn to_term(&self) -> WireTerm {
        let id = WireTerm::Binary(self.call_id().clone());
        let elements = match self {
            Response::Ok(_) => vec![id, WireTerm::Symbol(Symbol::Ok)],
            Response::OkValue(_, value) => vec![
                id,
                WireTerm::Symbol(Symbol::Ok),
                WireTerm::Binary(Bytes::copy_from_slice(value.as_bytes())),
            ],
            Response::Error(_, message) => vec![
                id,
                WireTerm::Symbol(Symbol::Error),
                WireTerm::Binary(Bytes::copy_from_slice(message.as_bytes())),
            ],
            Response::UnknownCommand(_) => vec![
                id,
                WireTerm::Symbol(Symbol::Error),
                WireTerm::Symbol(Symbol::UnknownCommand),
            ],
        };
        WireTerm::Tuple(elements)
    }

    /// Rebuild a response from a decoded term (client side).
    pub fn from_term(term: WireTerm) -> Result<Self> {
        let WireTerm::Tuple(elements) = term else {
            return Err(BridgeError::malformed("response is not a tuple"));
        };

        let mut elements = elements.into_iter();
        let (Some(WireTerm::Binary(id)), Some(WireTerm::Symbol(kind))) =
            (elements.next(), elements.next())
        else {
            return Err(BridgeError::malformed(
                "response must start with a binary call id and a symbol",
            ));
        };

        let response = match (kind, elements.next()) {
            (Symbol::Ok, None) => Response::Ok(id),
            (Symbol::Ok, Some(WireTerm::Binary(value))) => Response::OkValue(id, text(value)?),
            (Symbol::Error, Some(WireTerm::Binary(message))) => {
                Response::Error(id, text(message)?)
            }
            (Symbol::Error, Some(WireTerm::Symbol(Symbol::UnknownCommand))) => {
                Response::UnknownCommand(id)
            }
            (kind, _) => {
                return Err(BridgeError::malformed(format!(
                    "unexpected response shape for {}",
                    kind.name()
                )))
            }
        };

        if elements.next().is_some() {
            return Err(BridgeError::malformed("response tuple has too many elements"));
        }

        Ok(response)
    }
}

fn text(bytes: Bytes) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| BridgeError::malformed("response payload is not UTF-8"))
}
