//! Handlers for the event, wait and overlapped I/O opcodes.

use std::sync::Arc;

use crossing_core::{CallRecord, DispatcherBuilder, Opcode, ProtocolError, Reply};
use tracing::trace;

use crate::bridge::{AsyncBridge, ReadCall};
use crate::error::{Error, Result};

/// Host-side implementation of the async opcodes.
pub struct OverlappedHandlers {
    bridge: AsyncBridge,
}

impl OverlappedHandlers {
    pub fn new(bridge: AsyncBridge) -> Self {
        Self { bridge }
    }

    pub fn bridge(&self) -> &AsyncBridge {
        &self.bridge
    }

    /// Install a handler for every async opcode.
    pub fn register(self: Arc<Self>, builder: &mut DispatcherBuilder) -> std::result::Result<(), ProtocolError> {
        let this = self.clone();
        builder.register(Opcode::EventCreate, move |r: &CallRecord| {
            let handle = this.bridge.create_event(r.flag(0), r.flag(1));
            Reply::ok(handle.raw())
        })?;
        let this = self.clone();
        builder.register(Opcode::EventSet, move |r: &CallRecord| {
            reply(this.bridge.set_event(r.guest(0)).map(|()| Reply::ok(1)))
        })?;
        let this = self.clone();
        builder.register(Opcode::EventReset, move |r: &CallRecord| {
            reply(this.bridge.reset_event(r.guest(0)).map(|()| Reply::ok(1)))
        })?;
        let this = self.clone();
        builder.register(Opcode::WaitForSingleObject, move |r: &CallRecord| {
            reply(
                this.bridge
                    .wait_event(r.guest(0), r.flag(1), r.timeout(2))
                    .map(Reply::status),
            )
        })?;
        let this = self.clone();
        builder.register(Opcode::CloseHandle, move |r: &CallRecord| {
            reply(this.bridge.close_handle(r.guest(0)).map(|()| Reply::ok(1)))
        })?;
        let this = self.clone();
        builder.register(Opcode::ReadOverlapped, move |r: &CallRecord| {
            reply(this.bridge.issue_read(&ReadCall::from_record(r)))
        })?;
        let this = self;
        builder.register(Opcode::GetOverlappedResult, move |r: &CallRecord| {
            // Field 0 names the target; completion is tracked per OVERLAPPED.
            reply(this.bridge.get_overlapped_result(r.guest(1), r.guest(2), r.flag(3)))
        })?;
        Ok(())
    }
}

fn reply(result: Result<Reply>) -> Reply {
    result.unwrap_or_else(|e: Error| {
        trace!(error = %e, "async call failed");
        Reply::status(e.status())
    })
}
