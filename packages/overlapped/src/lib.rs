//! Crossing Overlapped: asynchronous host operations seen from the guest
//!
//! A guest read that names an OVERLAPPED may finish later. The bridge
//! issues it on the host; if the host accepts it for later, one worker from
//! a fixed pool waits for it and delivers the result:
//!
//! 1. status and byte count are written into the guest OVERLAPPED,
//! 2. the guest event named there is signaled,
//! 3. the completion routine, if any, is queued to the issuing thread and
//!    runs at that thread's next alertable wait.
//!
//! - [`AsyncBridge`]: issue reads, wait on events, query results
//! - [`OverlappedSource`]: the host side of a read
//! - [`GuestExecutor`]: runs guest completion routines
//! - [`OverlappedHandlers`]: the event, wait and I/O opcodes
//!
//! Enable the `async` feature for [`AsyncWait`], which awaits guest events
//! from tokio without blocking the runtime.

mod apc;
mod bridge;
mod error;
mod event;
mod handlers;
mod layout;
mod pool;
pub mod source;

#[cfg(feature = "async")]
mod async_wait;

pub use apc::{Apc, ApcQueues, GuestExecutor};
pub use bridge::{AsyncBridge, OpState, PendingOp, ReadCall};
pub use error::{Error, Result};
pub use event::{Event, EventTable};
pub use handlers::OverlappedHandlers;
pub use layout::OverlappedLayout;
pub use pool::{Job, WorkerPool};
pub use source::{Completion, HostCompletion, Issue, OverlappedSource, ReadRequest};

#[cfg(feature = "async")]
pub use async_wait::AsyncWait;
