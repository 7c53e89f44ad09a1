//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

use crate::rpc::message::ErrorObject;

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, ConduitError>;

/// Crate error enumeration covering all failure modes of the connection core.
#[derive(Debug)]
pub enum ConduitError {
    /// A single wire frame could not be framed or parsed (isolated to that frame).
    Framing(String),
    /// Unrecoverable failure of the underlying byte stream.
    Transport(String),
    /// The connection is closed; no further sends are possible and pending
    /// requests have been drained.
    Closed(String),
    /// Handler registration or capability-set validation failure.
    Registry(String),
    /// Child process could not be spawned or its pipes captured.
    Spawn(String),
    /// File-system or I/O operation failure outside the framed stream.
    Io(String),
    /// Structured JSON-RPC error returned by the peer or a local handler.
    Rpc(ErrorObject),
}

impl Display for ConduitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Framing(msg) => write!(f, "framing: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Closed(msg) => write!(f, "connection closed: {msg}"),
            Self::Registry(msg) => write!(f, "registry: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Rpc(err) => write!(f, "rpc error {}: {}", err.code, err.message),
        }
    }
}

impl std::error::Error for ConduitError {}

impl From<ErrorObject> for ConduitError {
    fn from(err: ErrorObject) -> Self {
        Self::Rpc(err)
    }
}

impl From<std::io::Error> for ConduitError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
