// Error types for the session core.
//
// `SessionError` is what façade commands return. The actor itself never
// returns errors upward: per-connection failures degrade to "that player is
// gone" and are only logged. `StoreError` is the error type of the external
// `GameStore` boundary.

use scatter_protocol::{Phase, ProtocolError, Role};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Error, Debug)]
pub enum SessionError {
    /// Dialing the Host failed (refused, unreachable, bad address).
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The Host answered JOIN with JOIN_REFUSED.
    #[error("join refused: {reason}")]
    Refused { reason: String },

    #[error("operation requires role {required:?}, current role is {actual:?}")]
    WrongRole { required: Role, actual: Role },

    #[error("{operation} not allowed in phase {phase:?}")]
    InvalidPhase {
        phase: Phase,
        operation: &'static str,
    },

    #[error("a session is already active")]
    AlreadyActive,

    #[error("cannot resume: {reason}")]
    NotResumable { reason: &'static str },

    /// The session actor has stopped.
    #[error("session closed")]
    Closed,

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("storage error: {0}")]
pub struct StoreError(pub String);
