//! Error types for the identity layer.

use crossing_core::Status;
use thiserror::Error;

use crate::attachment::AttachmentKey;
use crate::interface::InterfaceId;

/// Errors from wrapping and resolving host objects.
#[derive(Debug, Error)]
pub enum Error {
    /// The wrapper class has no facade for the interface.
    #[error("no facade for interface {0}")]
    NoInterface(InterfaceId),

    /// Every wrapper slot is in use.
    #[error("wrapper heap exhausted ({0} slots)")]
    OutOfMemory(usize),

    /// The guest address does not name a live facade.
    #[error("invalid facade {0}")]
    InvalidFacade(crossing_core::GuestAddr),

    /// Release on a wrapper whose count is already zero.
    #[error("release of unreferenced wrapper in slot {0}")]
    OverRelease(usize),

    /// The key is reserved for the bridge.
    #[error("attachment key {0} is reserved")]
    ReservedKey(AttachmentKey),

    /// The wrapper class cannot be instantiated.
    #[error("invalid wrapper class {0}")]
    InvalidClass(&'static str),

    /// The host object refused an operation.
    #[error("host error: {0}")]
    Host(Status),

    #[error(transparent)]
    Core(#[from] crossing_core::Error),
}

impl Error {
    /// The status the guest sees for this error.
    pub fn status(&self) -> Status {
        match self {
            Error::NoInterface(_) => Status::NoInterface,
            Error::OutOfMemory(_) => Status::NoMemory,
            Error::InvalidFacade(_) => Status::InvalidHandle,
            Error::OverRelease(_) | Error::ReservedKey(_) | Error::InvalidClass(_) => {
                Status::InvalidParameter
            }
            Error::Host(status) => *status,
            Error::Core(e) => e.status(),
        }
    }
}

/// Result type alias for identity operations.
pub type Result<T> = std::result::Result<T, Error>;
