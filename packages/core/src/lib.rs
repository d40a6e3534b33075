//! Crossing Core: the call protocol between guest and host
//!
//! Everything a per-function thunk depends on, below object identity and
//! async completion:
//! - `GuestAddr` / `HostAddr`: addresses tagged with the universe they live in
//! - `AddressTranslator`: the only conversion between the two
//! - `CallRecord`: an opcode plus a fixed-layout field record
//! - `Dispatcher`: the frozen opcode table every call passes through
//! - `HostMemory`: host-side access to guest-visible bytes
//! - `BridgeConfig`: sizes and windows for an assembled bridge
//!
//! # Example
//!
//! ```rust
//! use crossing_core::{CallRecord, Dispatcher, Opcode, Reply, Status};
//!
//! let mut builder = Dispatcher::builder();
//! builder
//!     .register(Opcode::EventSet, |_: &CallRecord| Reply::status(Status::InvalidHandle))
//!     .unwrap();
//! let dispatcher = builder.build();
//!
//! let reply = dispatcher.dispatch_raw(Opcode::EventSet.id(), &[0x104]).unwrap();
//! assert_eq!(reply.status, Status::InvalidHandle);
//! ```

mod addr;
mod config;
mod dispatch;
mod error;
mod memory;
mod record;
mod status;

pub use addr::{AddressTranslator, GuestAddr, HostAddr, PointerWidth};
pub use config::{BridgeConfig, FACADE_STRIDE, WRAPPER_STRIDE};
pub use dispatch::{Dispatcher, DispatcherBuilder, Handler};
pub use error::{Error, ProtocolError, Result};
pub use memory::{GuestRam, HostMemory, HostMemoryExt};
pub use record::{
    timeout_from_field, CallRecord, CallRecordBuilder, Opcode, Reply, INFINITE, PROTOCOL_VERSION,
};
pub use status::Status;
