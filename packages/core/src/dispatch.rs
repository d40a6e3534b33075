//! The call dispatcher: one chokepoint every bridged call passes through.
//!
//! Handlers are registered once against the closed [`Opcode`] set, then the
//! table is frozen. Dispatch takes no lock; the table is read-only after
//! [`DispatcherBuilder::build`].
//!
//! ```rust
//! use crossing_core::{CallRecord, Dispatcher, Opcode, Reply};
//!
//! let mut builder = Dispatcher::builder();
//! builder
//!     .register(Opcode::ObjectAddRef, |record: &CallRecord| Reply::ok(record.scalar(0) + 1))
//!     .unwrap();
//! let dispatcher = builder.build();
//!
//! let record = CallRecord::new(Opcode::ObjectAddRef, &[41]).unwrap();
//! assert_eq!(dispatcher.dispatch(&record).unwrap().value, 42);
//! ```

use std::sync::Arc;

use tracing::{error, trace};

use crate::error::ProtocolError;
use crate::record::{CallRecord, Opcode, Reply, PROTOCOL_VERSION};

/// Host-side implementation of one opcode.
///
/// The handler sees every field untranslated. It decides which fields are
/// addresses and translates them itself.
pub trait Handler: Send + Sync {
    fn handle(&self, record: &CallRecord) -> Reply;
}

impl<F> Handler for F
where
    F: Fn(&CallRecord) -> Reply + Send + Sync,
{
    fn handle(&self, record: &CallRecord) -> Reply {
        self(record)
    }
}

/// Collects handlers before the table is frozen.
pub struct DispatcherBuilder {
    table: Vec<Option<Arc<dyn Handler>>>,
    peer_version: u32,
}

impl DispatcherBuilder {
    fn new() -> Self {
        Self {
            table: vec![None; Opcode::COUNT],
            peer_version: PROTOCOL_VERSION,
        }
    }

    /// Register the handler for `opcode`.
    pub fn register<H>(&mut self, opcode: Opcode, handler: H) -> Result<&mut Self, ProtocolError>
    where
        H: Handler + 'static,
    {
        self.register_arc(opcode, Arc::new(handler))
    }

    /// Register a shared handler for `opcode`.
    pub fn register_arc(
        &mut self,
        opcode: Opcode,
        handler: Arc<dyn Handler>,
    ) -> Result<&mut Self, ProtocolError> {
        let slot = &mut self.table[opcode.index()];
        if slot.is_some() {
            return Err(ProtocolError::DuplicateHandler(opcode));
        }
        *slot = Some(handler);
        Ok(self)
    }

    /// Declare the protocol version the guest side was built with.
    pub fn expect_version(&mut self, guest_version: u32) -> Result<&mut Self, ProtocolError> {
        if guest_version != PROTOCOL_VERSION {
            return Err(ProtocolError::Version {
                host: PROTOCOL_VERSION,
                guest: guest_version,
            });
        }
        self.peer_version = guest_version;
        Ok(self)
    }

    /// Opcodes that still have no handler.
    pub fn missing(&self) -> Vec<Opcode> {
        Opcode::ALL
            .iter()
            .copied()
            .filter(|op| self.table[op.index()].is_none())
            .collect()
    }

    /// Freeze the table.
    pub fn build(self) -> Dispatcher {
        Dispatcher {
            table: self.table.into_boxed_slice(),
            version: self.peer_version,
        }
    }
}

/// Routes call records to their handlers.
pub struct Dispatcher {
    table: Box<[Option<Arc<dyn Handler>>]>,
    version: u32,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Protocol version both sides agreed on.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn handles(&self, opcode: Opcode) -> bool {
        self.table[opcode.index()].is_some()
    }

    /// Run the handler for `record` and return its immediate result.
    ///
    /// Blocks the calling thread until the handler returns. An overlapped
    /// handler returns `Pending` here and completes later on its own.
    pub fn dispatch(&self, record: &CallRecord) -> Result<Reply, ProtocolError> {
        let opcode = record.opcode();
        if record.fields().len() != opcode.arity() {
            return Err(ProtocolError::Arity {
                opcode,
                expected: opcode.arity(),
                actual: record.fields().len(),
            });
        }
        let handler = self.table[opcode.index()].as_ref().ok_or_else(|| {
            error!(?opcode, "no handler registered");
            ProtocolError::Unhandled(opcode)
        })?;

        trace!(?opcode, fields = ?record.fields(), "dispatch");
        let reply = handler.handle(record);
        trace!(?opcode, status = %reply.status, value = reply.value, "reply");
        Ok(reply)
    }

    /// Decode a raw opcode and field list, then dispatch.
    pub fn dispatch_raw(&self, raw_opcode: u32, fields: &[u64]) -> Result<Reply, ProtocolError> {
        let opcode = Opcode::from_raw(raw_opcode).map_err(|e| {
            error!(raw_opcode, "unknown opcode");
            e
        })?;
        let record = CallRecord::new(opcode, fields)?;
        self.dispatch(&record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Status;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn exactly_one_handler_runs() {
        let add_ref_calls = Arc::new(AtomicUsize::new(0));
        let release_calls = Arc::new(AtomicUsize::new(0));

        let mut builder = Dispatcher::builder();
        let counter = add_ref_calls.clone();
        builder
            .register(Opcode::ObjectAddRef, move |_: &CallRecord| {
                counter.fetch_add(1, Ordering::SeqCst);
                Reply::ok(1)
            })
            .unwrap();
        let counter = release_calls.clone();
        builder
            .register(Opcode::ObjectRelease, move |_: &CallRecord| {
                counter.fetch_add(1, Ordering::SeqCst);
                Reply::ok(0)
            })
            .unwrap();
        let dispatcher = builder.build();

        let record = CallRecord::new(Opcode::ObjectAddRef, &[0x10]).unwrap();
        dispatcher.dispatch(&record).unwrap();

        assert_eq!(add_ref_calls.load(Ordering::SeqCst), 1);
        assert_eq!(release_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handler_sees_untranslated_fields() {
        let mut builder = Dispatcher::builder();
        builder
            .register(Opcode::CloseHandle, |record: &CallRecord| {
                Reply::ok(record.guest(0).raw())
            })
            .unwrap();
        let dispatcher = builder.build();

        let reply = dispatcher.dispatch_raw(Opcode::CloseHandle.id(), &[0xFFFF_FFFF]).unwrap();
        assert_eq!(reply.value, 0xFFFF_FFFF);
    }

    #[test]
    fn unregistered_opcode_is_fatal() {
        let dispatcher = Dispatcher::builder().build();
        let record = CallRecord::new(Opcode::EventSet, &[4]).unwrap();
        assert_eq!(
            dispatcher.dispatch(&record),
            Err(ProtocolError::Unhandled(Opcode::EventSet))
        );
    }

    #[test]
    fn unknown_raw_opcode_is_fatal() {
        let dispatcher = Dispatcher::builder().build();
        assert_eq!(
            dispatcher.dispatch_raw(0x7777, &[]),
            Err(ProtocolError::UnknownOpcode(0x7777))
        );
    }

    #[test]
    fn raw_arity_mismatch_is_fatal() {
        let mut builder = Dispatcher::builder();
        builder
            .register(Opcode::EventSet, |_: &CallRecord| Reply::ok(0))
            .unwrap();
        let dispatcher = builder.build();
        assert!(matches!(
            dispatcher.dispatch_raw(Opcode::EventSet.id(), &[1, 2, 3]),
            Err(ProtocolError::Arity { .. })
        ));
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut builder = Dispatcher::builder();
        builder
            .register(Opcode::EventSet, |_: &CallRecord| Reply::ok(0))
            .unwrap();
        let err = builder
            .register(Opcode::EventSet, |_: &CallRecord| Reply::ok(1))
            .err();
        assert_eq!(err, Some(ProtocolError::DuplicateHandler(Opcode::EventSet)));
    }

    #[test]
    fn version_mismatch_rejected() {
        let mut builder = Dispatcher::builder();
        assert!(builder.expect_version(PROTOCOL_VERSION).is_ok());
        assert_eq!(
            builder.expect_version(PROTOCOL_VERSION + 1).err(),
            Some(ProtocolError::Version {
                host: PROTOCOL_VERSION,
                guest: PROTOCOL_VERSION + 1
            })
        );
    }

    #[test]
    fn missing_lists_unregistered() {
        let mut builder = Dispatcher::builder();
        builder
            .register(Opcode::EventSet, |_: &CallRecord| Reply::status(Status::Success))
            .unwrap();
        let missing = builder.missing();
        assert_eq!(missing.len(), Opcode::COUNT - 1);
        assert!(!missing.contains(&Opcode::EventSet));
        assert!(builder.build().handles(Opcode::EventSet));
    }

    #[test]
    fn dispatch_from_many_threads() {
        let mut builder = Dispatcher::builder();
        builder
            .register(Opcode::ObjectAddRef, |r: &CallRecord| Reply::ok(r.scalar(0) * 2))
            .unwrap();
        let dispatcher = Arc::new(builder.build());

        let threads: Vec<_> = (0..8u64)
            .map(|i| {
                let d = dispatcher.clone();
                std::thread::spawn(move || {
                    let record = CallRecord::new(Opcode::ObjectAddRef, &[i]).unwrap();
                    d.dispatch(&record).unwrap().value
                })
            })
            .collect();

        let results: Vec<u64> = threads.into_iter().map(|t| t.join().unwrap()).collect();
        assert_eq!(results, (0..8u64).map(|i| i * 2).collect::<Vec<_>>());
    }
}
