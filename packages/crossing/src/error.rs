//! Errors from assembling and driving a bridge.

use crossing_core::{Opcode, ProtocolError, Status};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A required host collaborator was not supplied.
    #[error("bridge needs {0}")]
    Missing(&'static str),

    /// The dispatch table would leave opcodes unhandled.
    #[error("no handler for {0:?}")]
    Incomplete(Vec<Opcode>),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Core(#[from] crossing_core::Error),

    #[error(transparent)]
    Identity(#[from] crossing_identity::Error),

    #[error(transparent)]
    Overlapped(#[from] crossing_overlapped::Error),
}

impl Error {
    /// The status the guest sees for this error.
    pub fn status(&self) -> Status {
        match self {
            Error::Missing(_) | Error::Incomplete(_) | Error::Protocol(_) => Status::InvalidParameter,
            Error::Core(e) => e.status(),
            Error::Identity(e) => e.status(),
            Error::Overlapped(e) => e.status(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
