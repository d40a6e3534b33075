//! Status codes carried back across the boundary.

use std::fmt;

/// Result status of a bridged call.
///
/// Values are NT status codes so they pass through to the guest unchanged.
/// Anything the bridge itself does not produce is kept verbatim in
/// [`Status::Host`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    /// An overlapped operation was accepted and will complete later.
    Pending,
    /// A wait expired.
    Timeout,
    /// An alertable wait returned because completion routines ran.
    UserApc,
    /// The object does not expose the requested facade.
    NoInterface,
    NoMemory,
    InsufficientResources,
    InvalidHandle,
    InvalidParameter,
    BufferTooSmall,
    NotFound,
    Cancelled,
    /// A host operation's own status, passed through unchanged.
    Host(u32),
}

impl Status {
    const SUCCESS: u32 = 0x0000_0000;
    const PENDING: u32 = 0x0000_0103;
    const TIMEOUT: u32 = 0x0000_0102;
    const USER_APC: u32 = 0x0000_00C0;
    const NO_INTERFACE: u32 = 0xC000_02B9;
    const NO_MEMORY: u32 = 0xC000_0017;
    const INSUFFICIENT_RESOURCES: u32 = 0xC000_009A;
    const INVALID_HANDLE: u32 = 0xC000_0008;
    const INVALID_PARAMETER: u32 = 0xC000_000D;
    const BUFFER_TOO_SMALL: u32 = 0xC000_0023;
    const NOT_FOUND: u32 = 0xC000_0225;
    const CANCELLED: u32 = 0xC000_0120;

    /// Decode a raw status value.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            Self::SUCCESS => Status::Success,
            Self::PENDING => Status::Pending,
            Self::TIMEOUT => Status::Timeout,
            Self::USER_APC => Status::UserApc,
            Self::NO_INTERFACE => Status::NoInterface,
            Self::NO_MEMORY => Status::NoMemory,
            Self::INSUFFICIENT_RESOURCES => Status::InsufficientResources,
            Self::INVALID_HANDLE => Status::InvalidHandle,
            Self::INVALID_PARAMETER => Status::InvalidParameter,
            Self::BUFFER_TOO_SMALL => Status::BufferTooSmall,
            Self::NOT_FOUND => Status::NotFound,
            Self::CANCELLED => Status::Cancelled,
            other => Status::Host(other),
        }
    }

    /// The raw status value.
    pub fn raw(self) -> u32 {
        match self {
            Status::Success => Self::SUCCESS,
            Status::Pending => Self::PENDING,
            Status::Timeout => Self::TIMEOUT,
            Status::UserApc => Self::USER_APC,
            Status::NoInterface => Self::NO_INTERFACE,
            Status::NoMemory => Self::NO_MEMORY,
            Status::InsufficientResources => Self::INSUFFICIENT_RESOURCES,
            Status::InvalidHandle => Self::INVALID_HANDLE,
            Status::InvalidParameter => Self::INVALID_PARAMETER,
            Status::BufferTooSmall => Self::BUFFER_TOO_SMALL,
            Status::NotFound => Self::NOT_FOUND,
            Status::Cancelled => Self::CANCELLED,
            Status::Host(raw) => raw,
        }
    }

    pub fn is_success(self) -> bool {
        self == Status::Success
    }

    /// Error severity (top two bits set).
    pub fn is_error(self) -> bool {
        self.raw() >> 30 == 0b11
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Host(raw) => write!(f, "host status {:#010x}", raw),
            other => write!(f, "{:?} ({:#010x})", other, other.raw()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_decode_to_named_variants() {
        for status in [
            Status::Success,
            Status::Pending,
            Status::Timeout,
            Status::UserApc,
            Status::NoInterface,
            Status::NoMemory,
            Status::InsufficientResources,
            Status::InvalidHandle,
            Status::InvalidParameter,
            Status::BufferTooSmall,
            Status::NotFound,
            Status::Cancelled,
        ] {
            assert_eq!(Status::from_raw(status.raw()), status);
        }
    }

    #[test]
    fn unknown_codes_pass_through() {
        let s = Status::from_raw(0xC000_0022);
        assert_eq!(s, Status::Host(0xC000_0022));
        assert_eq!(s.raw(), 0xC000_0022);
        assert!(s.is_error());
    }

    #[test]
    fn severity() {
        assert!(!Status::Pending.is_error());
        assert!(!Status::Timeout.is_error());
        assert!(Status::NoInterface.is_error());
        assert!(Status::Success.is_success());
    }

    #[test]
    fn display() {
        assert!(Status::Timeout.to_string().contains("Timeout"));
        assert!(Status::Host(0x1234).to_string().contains("0x00001234"));
    }
}
