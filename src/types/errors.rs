//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation. Every
//! variant maps onto one [`ErrorKind`] so callers can tell a local admission
//! failure apart from a remote execution failure without matching on text.

use std::fmt;

use thiserror::Error;

use crate::chanrpc::Shape;
use crate::types::FunctionId;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the call runtime.
#[derive(Error, Debug)]
pub enum Error {
    /// The identifier already has a handler on this registry.
    #[error("function {0}: already registered")]
    AlreadyRegistered(FunctionId),

    /// Registration attempted after the server handed out a `ServerRef`.
    #[error("function {0}: registry is frozen once the server is shared")]
    RegistryFrozen(FunctionId),

    /// Client has no server attached.
    #[error("server not attached")]
    NotAttached,

    /// No handler under this identifier.
    #[error("function {0}: not registered")]
    NotRegistered(FunctionId),

    /// Handler (or callback) shape does not match what the caller expects.
    #[error("function {id}: shape mismatch (expected {expected}, found {found})")]
    ShapeMismatch {
        id: FunctionId,
        expected: Shape,
        found: Shape,
    },

    /// Argument at `index` is not of the requested type.
    #[error("argument {index}: expected {expected}")]
    ArgumentType { index: usize, expected: &'static str },

    /// Argument at `index` is absent or was already taken.
    #[error("argument {0}: missing")]
    MissingArgument(usize),

    /// Returned value is not of the requested type.
    #[error("value type mismatch: expected {0}")]
    TypeMismatch(&'static str),

    /// Asynchronous admission refused: pending calls reached the reply capacity.
    #[error("too many pending calls (limit {0})")]
    TooManyCalls(usize),

    /// Target call queue is at capacity (asynchronous calls only).
    #[error("call queue full")]
    QueueFull,

    /// Target server closed before the call could run.
    #[error("server closed")]
    ServerClosed,

    /// A handler, callback or work item panicked.
    #[error("handler fault: {message}")]
    Fault {
        message: String,
        trace: Option<String>,
    },

    /// A scheduler facility configured with zero capacity.
    #[error("{0} unavailable: configured capacity is zero")]
    Unavailable(&'static str),

    /// Validation errors.
    #[error("validation error: {0}")]
    Validation(String),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Programming error detected before serving starts.
    Registration,
    /// Call could not be resolved against the target registry.
    Resolution,
    /// Local admission failure; the remote side was never contacted.
    Backpressure,
    /// Target closed while the call was queued or in flight.
    Shutdown,
    /// Handler ran and failed.
    Execution,
    /// Bad configuration or input.
    Configuration,
    /// Anything else.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Registration => "REGISTRATION",
            ErrorKind::Resolution => "RESOLUTION",
            ErrorKind::Backpressure => "BACKPRESSURE",
            ErrorKind::Shutdown => "SHUTDOWN",
            ErrorKind::Execution => "EXECUTION",
            ErrorKind::Configuration => "CONFIGURATION",
            ErrorKind::Internal => "INTERNAL",
        };
        f.write_str(s)
    }
}

impl Error {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AlreadyRegistered(_) | Error::RegistryFrozen(_) => ErrorKind::Registration,
            Error::NotAttached | Error::NotRegistered(_) | Error::ShapeMismatch { .. } => {
                ErrorKind::Resolution
            }
            Error::TooManyCalls(_) | Error::QueueFull | Error::Unavailable(_) => {
                ErrorKind::Backpressure
            }
            Error::ServerClosed => ErrorKind::Shutdown,
            Error::Fault { .. }
            | Error::ArgumentType { .. }
            | Error::MissingArgument(_)
            | Error::TypeMismatch(_) => ErrorKind::Execution,
            Error::Validation(_) | Error::Serialization(_) | Error::Io(_) => {
                ErrorKind::Configuration
            }
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Captured panic trace, if this is a fault and trace capture was on.
    pub fn trace(&self) -> Option<&str> {
        match self {
            Error::Fault { trace, .. } => trace.as_deref(),
            _ => None,
        }
    }
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn fault(message: impl Into<String>, trace: Option<String>) -> Self {
        Self::Fault {
            message: message.into(),
            trace,
        }
    }
}
