//! Call records: an opcode plus a fixed-layout sequence of 64-bit fields.
//!
//! Fields are untyped on the wire. Whether a field is a scalar, a guest
//! address or a handle is known only to the handler for the opcode, which
//! reads it through the matching accessor.

use std::time::Duration;

use crate::addr::GuestAddr;
use crate::error::ProtocolError;
use crate::status::Status;

/// Version of the opcode table. Bumped whenever an opcode or a record
/// layout changes.
pub const PROTOCOL_VERSION: u32 = 2;

/// Timeout field value meaning "wait forever".
pub const INFINITE: u64 = 0xFFFF_FFFF;

macro_rules! opcodes {
    ($( $(#[$meta:meta])* $name:ident = $id:literal, $arity:literal; )*) => {
        /// Every call the bridge understands.
        ///
        /// Ids are dense and stable: both sides index tables by them.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u32)]
        pub enum Opcode {
            $( $(#[$meta])* $name = $id, )*
        }

        impl Opcode {
            /// All opcodes, in id order.
            pub const ALL: &'static [Opcode] = &[$(Opcode::$name),*];

            /// Number of opcodes.
            pub const COUNT: usize = Self::ALL.len();

            /// Decode a raw opcode id.
            pub fn from_raw(raw: u32) -> Result<Self, ProtocolError> {
                match raw {
                    $( $id => Ok(Opcode::$name), )*
                    other => Err(ProtocolError::UnknownOpcode(other)),
                }
            }

            /// Number of fields in this opcode's record.
            pub const fn arity(self) -> usize {
                match self {
                    $( Opcode::$name => $arity, )*
                }
            }
        }
    };
}

opcodes! {
    /// facade, interface id address, out-pointer address
    ObjectQueryInterface = 0, 3;
    /// facade
    ObjectAddRef = 1, 1;
    /// facade
    ObjectRelease = 2, 1;
    /// facade, key address, size address, data address
    ObjectGetPrivateData = 3, 4;
    /// facade, key address, size, data address
    ObjectSetPrivateData = 4, 4;
    /// manual reset, initial state
    EventCreate = 5, 2;
    /// event handle
    EventSet = 6, 1;
    /// event handle
    EventReset = 7, 1;
    /// handle, alertable, timeout in milliseconds
    WaitForSingleObject = 8, 3;
    /// handle
    CloseHandle = 9, 1;
    /// target, buffer, length, returned address, overlapped address, completion routine
    ReadOverlapped = 10, 6;
    /// target, overlapped address, returned address, wait
    GetOverlappedResult = 11, 4;
    /// facade, key address, interface facade
    ObjectSetPrivateDataInterface = 12, 3;
}

impl Opcode {
    /// Stable wire id.
    pub const fn id(self) -> u32 {
        self as u32
    }

    /// Position in a dense dispatch table.
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// An immutable call record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    opcode: Opcode,
    fields: [u64; CallRecord::MAX_FIELDS],
    len: usize,
}

impl CallRecord {
    /// Largest record any opcode uses.
    pub const MAX_FIELDS: usize = 8;

    /// Build a record from raw field values.
    ///
    /// The field count must match the opcode's arity.
    pub fn new(opcode: Opcode, values: &[u64]) -> Result<Self, ProtocolError> {
        if values.len() != opcode.arity() || values.len() > Self::MAX_FIELDS {
            return Err(ProtocolError::Arity {
                opcode,
                expected: opcode.arity(),
                actual: values.len(),
            });
        }
        let mut fields = [0u64; Self::MAX_FIELDS];
        fields[..values.len()].copy_from_slice(values);
        Ok(Self {
            opcode,
            fields,
            len: values.len(),
        })
    }

    /// Start a record field by field.
    pub fn builder(opcode: Opcode) -> CallRecordBuilder {
        CallRecordBuilder {
            opcode,
            values: Vec::with_capacity(opcode.arity()),
        }
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// All fields, raw.
    pub fn fields(&self) -> &[u64] {
        &self.fields[..self.len]
    }

    /// Field `index` as an inline scalar.
    ///
    /// Records are validated against the opcode's arity at construction, so
    /// handlers index within it. Reading past it yields zero.
    pub fn scalar(&self, index: usize) -> u64 {
        self.fields().get(index).copied().unwrap_or(0)
    }

    /// Field `index` as a 32-bit scalar.
    pub fn scalar_u32(&self, index: usize) -> u32 {
        self.scalar(index) as u32
    }

    /// Field `index` as a boolean flag.
    pub fn flag(&self, index: usize) -> bool {
        self.scalar(index) != 0
    }

    /// Field `index` as a guest address (or guest handle).
    pub fn guest(&self, index: usize) -> GuestAddr {
        GuestAddr::new(self.scalar(index))
    }

    /// Field `index` as a wait timeout; `None` means wait forever.
    pub fn timeout(&self, index: usize) -> Option<Duration> {
        timeout_from_field(self.scalar(index))
    }
}

/// Decode a millisecond timeout field.
pub fn timeout_from_field(raw: u64) -> Option<Duration> {
    if raw == INFINITE {
        None
    } else {
        Some(Duration::from_millis(raw))
    }
}

/// Builder for [`CallRecord`].
#[derive(Debug)]
pub struct CallRecordBuilder {
    opcode: Opcode,
    values: Vec<u64>,
}

impl CallRecordBuilder {
    /// Append an inline scalar.
    pub fn scalar(mut self, value: u64) -> Self {
        self.values.push(value);
        self
    }

    /// Append a boolean flag.
    pub fn flag(self, value: bool) -> Self {
        self.scalar(value as u64)
    }

    /// Append a guest address.
    pub fn guest(self, addr: GuestAddr) -> Self {
        self.scalar(addr.raw())
    }

    /// Append a timeout; `None` is `INFINITE`.
    pub fn timeout(self, timeout: Option<Duration>) -> Self {
        let raw = match timeout {
            Some(d) => (d.as_millis() as u64).min(INFINITE - 1),
            None => INFINITE,
        };
        self.scalar(raw)
    }

    pub fn build(self) -> Result<CallRecord, ProtocolError> {
        CallRecord::new(self.opcode, &self.values)
    }
}

/// Immediate result of a dispatched call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub status: Status,
    /// Scalar return value (a handle, a count, a flag).
    pub value: u64,
}

impl Reply {
    pub fn ok(value: u64) -> Self {
        Self {
            status: Status::Success,
            value,
        }
    }

    pub fn status(status: Status) -> Self {
        Self { status, value: 0 }
    }

    pub fn with_value(status: Status, value: u64) -> Self {
        Self { status, value }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

impl From<Status> for Reply {
    fn from(status: Status) -> Self {
        Reply::status(status)
    }
}
