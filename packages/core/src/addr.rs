//! Guest and host address spaces.
//!
//! A raw integer crossing the boundary belongs to exactly one of two
//! universes. `GuestAddr` and `HostAddr` keep them apart in the type system;
//! [`AddressTranslator`] is the only code that turns one into the other.
//!
//! # Example
//!
//! ```rust
//! use crossing_core::{AddressTranslator, GuestAddr, PointerWidth};
//!
//! let tr = AddressTranslator::new(0x7f00_0000_0000, PointerWidth::Bits32);
//! let host = tr.to_host(GuestAddr::new(0x1000));
//! assert_eq!(host.raw(), 0x7f00_0000_1000);
//! assert_eq!(tr.to_guest(host), GuestAddr::new(0x1000));
//! assert!(tr.to_host(GuestAddr::NULL).is_null());
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An address (or handle) meaningful only inside the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct GuestAddr(u64);

/// An address (or handle) meaningful only inside the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct HostAddr(u64);

macro_rules! addr_common {
    ($ty:ident, $prefix:literal) => {
        impl $ty {
            /// The null address.
            pub const NULL: Self = Self(0);

            /// Tag a raw value as belonging to this universe.
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// The raw numeric value.
            pub const fn raw(self) -> u64 {
                self.0
            }

            pub const fn is_null(self) -> bool {
                self.0 == 0
            }

            /// Byte offset within the same universe.
            pub const fn offset(self, bytes: u64) -> Self {
                Self(self.0.wrapping_add(bytes))
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, ":{:#x}"), self.0)
            }
        }
    };
}

addr_common!(GuestAddr, "guest");
addr_common!(HostAddr, "host");

/// Pointer width of one side of the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PointerWidth {
    Bits32,
    #[default]
    Bits64,
}

impl PointerWidth {
    /// Width of the running process.
    pub const fn native() -> Self {
        if cfg!(target_pointer_width = "64") {
            PointerWidth::Bits64
        } else {
            PointerWidth::Bits32
        }
    }

    /// Size of a pointer in bytes.
    pub const fn bytes(self) -> u64 {
        match self {
            PointerWidth::Bits32 => 4,
            PointerWidth::Bits64 => 8,
        }
    }

    /// Mask selecting the bits a pointer of this width can hold.
    pub const fn mask(self) -> u64 {
        match self {
            PointerWidth::Bits32 => 0xFFFF_FFFF,
            PointerWidth::Bits64 => u64::MAX,
        }
    }

    /// Sign-extend a value of this width to 64 bits.
    pub const fn sign_extend(self, raw: u64) -> u64 {
        match self {
            PointerWidth::Bits32 => raw as u32 as i32 as i64 as u64,
            PointerWidth::Bits64 => raw,
        }
    }
}

/// Converts addresses between the guest and host universes.
///
/// A guest address is an offset against `guest_base`, narrowed to the guest
/// pointer width. Handles are not addresses: they skip the base and only
/// change width (see [`handle_to_host`](Self::handle_to_host)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressTranslator {
    guest_base: u64,
    guest_width: PointerWidth,
    host_width: PointerWidth,
}

impl AddressTranslator {
    /// Create a translator for a guest mapped at `guest_base` in the host.
    pub fn new(guest_base: u64, guest_width: PointerWidth) -> Self {
        Self::with_host_width(guest_base, guest_width, PointerWidth::native())
    }

    /// Create a translator with an explicit host pointer width.
    pub fn with_host_width(
        guest_base: u64,
        guest_width: PointerWidth,
        host_width: PointerWidth,
    ) -> Self {
        Self {
            guest_base,
            guest_width,
            host_width,
        }
    }

    /// Host address where guest address zero would live.
    pub fn guest_base(&self) -> HostAddr {
        HostAddr(self.guest_base)
    }

    pub fn guest_width(&self) -> PointerWidth {
        self.guest_width
    }

    pub fn host_width(&self) -> PointerWidth {
        self.host_width
    }

    /// Translate a guest address into the host universe. Null stays null.
    ///
    /// The address is narrowed first, so a value that narrows to zero is null.
    pub fn to_host(&self, addr: GuestAddr) -> HostAddr {
        let offset = addr.0 & self.guest_width.mask();
        if offset == 0 {
            return HostAddr::NULL;
        }
        HostAddr(self.guest_base.wrapping_add(offset) & self.host_width.mask())
    }

    /// Translate a host address into the guest universe. Null stays null.
    ///
    /// Bits the guest cannot represent are dropped; use
    /// [`checked_to_guest`](Self::checked_to_guest) where that must be an error.
    pub fn to_guest(&self, addr: HostAddr) -> GuestAddr {
        if addr.is_null() {
            return GuestAddr::NULL;
        }
        GuestAddr(addr.0.wrapping_sub(self.guest_base) & self.guest_width.mask())
    }

    /// Translate a host address the guest must be able to name exactly.
    pub fn checked_to_guest(&self, addr: HostAddr) -> Result<GuestAddr> {
        if addr.is_null() {
            return Ok(GuestAddr::NULL);
        }
        let offset = addr.0.wrapping_sub(self.guest_base);
        if addr.0 < self.guest_base || offset & !self.guest_width.mask() != 0 {
            return Err(Error::AddressOutOfRange {
                addr: addr.0,
                width: self.guest_width,
            });
        }
        Ok(GuestAddr(offset))
    }

    /// Widen a guest handle for host use.
    ///
    /// 32-bit handles are sign-extended so pseudo-handles such as `-1`
    /// keep their meaning on a 64-bit host.
    pub fn handle_to_host(&self, handle: GuestAddr) -> HostAddr {
        HostAddr(self.guest_width.sign_extend(handle.0 & self.guest_width.mask()))
    }

    /// Narrow a host handle for guest use.
    pub fn handle_to_guest(&self, handle: HostAddr) -> GuestAddr {
        GuestAddr(handle.0 & self.guest_width.mask())
    }
}
