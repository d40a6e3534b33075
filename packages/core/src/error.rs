//! Error types for the bridge core.

use thiserror::Error;

use crate::addr::PointerWidth;
use crate::record::Opcode;
use crate::status::Status;

/// A mismatch between the two sides of the boundary.
///
/// These are never reported to the guest as a status: they mean the thunks
/// and the handlers were built from different protocol versions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The raw opcode is not part of the protocol.
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u32),

    /// No handler was registered for the opcode.
    #[error("no handler registered for {0:?}")]
    Unhandled(Opcode),

    /// The record does not have the layout the opcode requires.
    #[error("{opcode:?} expects {expected} fields, record has {actual}")]
    Arity {
        opcode: Opcode,
        expected: usize,
        actual: usize,
    },

    /// A handler was registered twice for the same opcode.
    #[error("duplicate handler for {0:?}")]
    DuplicateHandler(Opcode),

    /// The two sides speak different protocol versions.
    #[error("protocol version mismatch: host {host}, guest {guest}")]
    Version { host: u32, guest: u32 },
}

/// Errors from the bridge core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A host address the guest cannot name.
    #[error("host address {addr:#x} is outside the {width:?} guest window")]
    AddressOutOfRange { addr: u64, width: PointerWidth },

    /// A guest memory access outside the mapped region.
    #[error("memory fault at {addr:#x} ({len} bytes)")]
    Fault { addr: u64, len: usize },

    /// A call failed with a status that goes back to the guest as-is.
    #[error("call failed: {0}")]
    Status(Status),

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A lock guarding shared state was poisoned by a panicking thread.
    #[error("lock poisoned: {0}")]
    Poisoned(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// The status the guest sees for this error.
    pub fn status(&self) -> Status {
        match self {
            Error::Status(status) => *status,
            _ => Status::InvalidParameter,
        }
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        Error::Status(status)
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
