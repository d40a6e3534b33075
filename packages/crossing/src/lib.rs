//! Crossing: calls between a guest and a host address space
//!
//! A guest (for example 32-bit code) calls into a host with a different
//! pointer width and memory layout. Each call crosses as an opcode plus a
//! fixed-layout record of 64-bit fields; the host runs the handler for the
//! opcode and replies with a status and a value.
//!
//! The pieces, bottom-up:
//! - [`crossing_core`]: addresses, call records, the dispatcher, guest memory
//! - [`crossing_identity`]: one wrapper per host object, with several facades
//! - [`crossing_overlapped`]: overlapped reads, events, completion routines
//!
//! [`Bridge`] assembles them from a [`BridgeConfig`]:
//!
//! ```rust,ignore
//! use crossing::{Bridge, BridgeConfig, Opcode};
//!
//! let bridge = Bridge::builder(BridgeConfig::from_file("bridge.json")?)
//!     .source(files)
//!     .executor(guest_cpu)
//!     .build()?;
//!
//! let event = bridge.call(Opcode::EventCreate, &[1, 0]).value;
//! ```

mod bridge;
mod error;

pub use bridge::{Bridge, BridgeBuilder};
pub use error::{Error, Result};

pub use crossing_core::{
    AddressTranslator, BridgeConfig, CallRecord, GuestAddr, HostAddr, HostMemory, HostMemoryExt,
    Opcode, PointerWidth, ProtocolError, Reply, Status, INFINITE, PROTOCOL_VERSION,
};
pub use crossing_identity::{
    AttachmentKey, FacadeDesc, HostObject, InterfaceId, WrapperClass, IID_UNKNOWN, WRAPPER_LINK_KEY,
};
pub use crossing_overlapped::{
    Apc, Completion, GuestExecutor, HostCompletion, Issue, OverlappedSource, ReadRequest,
};

#[cfg(feature = "async")]
pub use crossing_overlapped::AsyncWait;

pub use crossing_core;
pub use crossing_identity;
pub use crossing_overlapped;
