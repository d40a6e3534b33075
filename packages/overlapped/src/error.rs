//! Error types for the async bridge.

use crossing_core::{GuestAddr, Status};
use thiserror::Error;

/// Errors from issuing and completing overlapped operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The handle does not name a live event.
    #[error("invalid handle {0}")]
    InvalidHandle(GuestAddr),

    /// Every worker is busy and the queue is full.
    #[error("completion queue is full")]
    QueueFull,

    /// The worker pool has been shut down.
    #[error("worker pool stopped")]
    Stopped,

    /// The host operation failed.
    #[error("host error: {0}")]
    Host(Status),

    /// A blocking task did not run to completion.
    #[error("blocking task failed: {0}")]
    Join(String),

    #[error(transparent)]
    Core(#[from] crossing_core::Error),
}

impl Error {
    /// The status the guest sees for this error.
    pub fn status(&self) -> Status {
        match self {
            Error::InvalidHandle(_) => Status::InvalidHandle,
            Error::QueueFull | Error::Stopped => Status::InsufficientResources,
            Error::Host(status) => *status,
            Error::Join(_) => Status::Cancelled,
            Error::Core(e) => e.status(),
        }
    }
}

/// Result type alias for async bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arming_failures_are_resource_errors() {
        assert_eq!(Error::QueueFull.status(), Status::InsufficientResources);
        assert_eq!(Error::Stopped.status(), Status::InsufficientResources);
    }

    #[test]
    fn host_status_passes_through() {
        let raw = Status::Host(0xC000_0011);
        assert_eq!(Error::Host(raw).status(), raw);
        assert!(Error::Host(raw).to_string().contains("0xc0000011"));
    }
}
