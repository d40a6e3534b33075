//! Issuing overlapped operations and delivering their completions.
//!
//! An overlapped read either finishes on the spot or becomes a
//! [`PendingOp`] owned by one completion worker. The worker blocks on the
//! host completion, writes the result into the guest OVERLAPPED, and only
//! then signals the guest event and queues the completion routine to the
//! thread that issued the read.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crossing_core::{
    AddressTranslator, BridgeConfig, CallRecord, GuestAddr, HostAddr, HostMemory, HostMemoryExt,
    Reply, Status,
};
use tracing::{debug, trace, warn};

use crate::apc::{Apc, ApcQueues, GuestExecutor};
use crate::error::Result;
use crate::event::{lock, EventTable};
use crate::layout::OverlappedLayout;
use crate::pool::WorkerPool;
use crate::source::{Completion, HostCompletion, Issue, OverlappedSource, ReadRequest};

/// Where an operation is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpState {
    /// Tracked and `Pending` in the guest; not yet handed to a worker.
    Issued,
    /// Owned by a worker waiting on the host.
    AwaitingCompletion,
    /// Result written and the guest notified.
    Delivered,
    /// No worker could take it; the caller got the failure.
    FailedBeforeWait,
    /// Finished without ever being pending.
    Done,
}

/// Bookkeeping for one overlapped operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOp {
    pub id: u64,
    /// Host handle of the target.
    pub target: HostAddr,
    /// Guest OVERLAPPED the result is written into.
    pub overlapped: GuestAddr,
    /// Guest event to signal, or null.
    pub event: GuestAddr,
    /// Guest completion routine, or null.
    pub routine: GuestAddr,
    /// Thread the completion routine runs on.
    pub thread: ThreadId,
    /// Name of the worker that took the operation.
    pub worker: Option<String>,
    pub state: OpState,
}

/// Arguments of `ReadOverlapped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCall {
    pub target: GuestAddr,
    pub buffer: GuestAddr,
    pub len: u32,
    /// Where the byte count goes on synchronous completion; may be null.
    pub returned: GuestAddr,
    /// Guest OVERLAPPED; null for a synchronous read.
    pub overlapped: GuestAddr,
    /// Guest completion routine; may be null.
    pub routine: GuestAddr,
}

impl ReadCall {
    pub fn from_record(record: &CallRecord) -> Self {
        Self {
            target: record.guest(0),
            buffer: record.guest(1),
            len: record.scalar_u32(2),
            returned: record.guest(3),
            overlapped: record.guest(4),
            routine: record.guest(5),
        }
    }
}

struct Inner {
    memory: Arc<dyn HostMemory>,
    translator: AddressTranslator,
    layout: OverlappedLayout,
    source: Arc<dyn OverlappedSource>,
    executor: Arc<dyn GuestExecutor>,
    events: EventTable,
    apcs: ApcQueues,
    pool: WorkerPool,
    pending: Mutex<HashMap<u64, PendingOp>>,
    settled: Condvar,
    next_id: AtomicU64,
}

/// The async half of the bridge.
///
/// Cloning shares the same pending table, events and workers.
#[derive(Clone)]
pub struct AsyncBridge {
    inner: Arc<Inner>,
}

impl AsyncBridge {
    pub fn new(
        memory: Arc<dyn HostMemory>,
        translator: AddressTranslator,
        source: Arc<dyn OverlappedSource>,
        executor: Arc<dyn GuestExecutor>,
        config: &BridgeConfig,
    ) -> Result<Self> {
        let pool = WorkerPool::new(config.workers, config.queue_depth)?;
        Ok(Self {
            inner: Arc::new(Inner {
                memory,
                translator,
                layout: OverlappedLayout::new(translator.guest_width()),
                source,
                executor,
                events: EventTable::new(),
                apcs: ApcQueues::new(),
                pool,
                pending: Mutex::new(HashMap::new()),
                settled: Condvar::new(),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    pub fn events(&self) -> &EventTable {
        &self.inner.events
    }

    pub fn apcs(&self) -> &ApcQueues {
        &self.inner.apcs
    }

    /// Start a read.
    ///
    /// Without an OVERLAPPED the read completes before this returns. With
    /// one, the reply is either the final status or `Pending`; a pending
    /// read is delivered later by a worker.
    pub fn issue_read(&self, call: &ReadCall) -> Result<Reply> {
        let inner = &self.inner;
        let mut request = ReadRequest {
            target: inner.translator.handle_to_host(call.target),
            buffer: inner.translator.to_host(call.buffer),
            len: call.len,
            position: 0,
            overlapped: !call.overlapped.is_null(),
        };
        if call.overlapped.is_null() {
            return inner.read_sync(call, &request);
        }

        let memory = inner.memory.as_ref();
        let ov = inner.translator.to_host(call.overlapped);
        let event_handle = inner.normalize(inner.layout.read_event(memory, ov)?);
        let event = if event_handle.is_null() {
            None
        } else {
            Some(inner.events.lookup(event_handle)?)
        };
        request.position = inner.layout.read_position(memory, ov)?;

        if let Some(event) = &event {
            event.reset();
        }

        let op = PendingOp {
            id: inner.next_id.fetch_add(1, Ordering::Relaxed),
            target: request.target,
            overlapped: call.overlapped,
            event: event_handle,
            routine: call.routine,
            thread: thread::current().id(),
            worker: None,
            state: OpState::Issued,
        };
        let id = op.id;
        // Tracked before the guest can observe `Pending`.
        lock(&inner.pending).insert(id, op.clone());
        if let Err(e) = inner.layout.write_status(memory, ov, Status::Pending) {
            inner.settle(id, OpState::Done);
            return Err(e.into());
        }
        if !call.routine.is_null() {
            inner.apcs.register_current();
        }

        match inner.source.start_read(&request) {
            Issue::Failed(status) => {
                let written = inner.layout.write_result(memory, ov, status, 0);
                inner.settle(id, OpState::Done);
                written?;
                debug!(id, %status, "read refused by host");
                Ok(Reply::status(status))
            }
            Issue::Complete(completion) => {
                inner.deliver(&op, completion);
                inner.settle(id, OpState::Done);
                if let Err(e) = inner.write_returned(call.returned, completion.bytes) {
                    warn!(id, returned = %call.returned, error = %e, "byte count not written");
                }
                debug!(id, bytes = completion.bytes, "read completed inline");
                Ok(Reply::with_value(completion.status, completion.bytes.into()))
            }
            Issue::Pending(host) => self.arm(op, host),
        }
    }

    /// Hand a pending operation to a worker.
    fn arm(&self, op: PendingOp, host: Box<dyn HostCompletion>) -> Result<Reply> {
        let inner = &self.inner;
        let id = op.id;
        debug!(id, target = %op.target, overlapped = %op.overlapped, "read pending");
        if let Some(tracked) = lock(&inner.pending).get_mut(&id) {
            tracked.state = OpState::AwaitingCompletion;
        }

        let worker = inner.clone();
        let Err((err, job)) = inner.pool.submit(Box::new(move || worker.complete(id, host))) else {
            return Ok(Reply::status(Status::Pending));
        };

        // Drops the host completion with it.
        drop(job);
        let status = err.status();
        warn!(id, error = %err, "no worker for pending read");
        let ov = inner.translator.to_host(op.overlapped);
        let written = inner.layout.write_result(inner.memory.as_ref(), ov, status, 0);
        inner.settle(id, OpState::FailedBeforeWait);
        written?;
        Ok(Reply::status(status))
    }

    /// Read the result of an overlapped operation.
    ///
    /// With `wait`, blocks until the operation has been delivered.
    pub fn get_overlapped_result(
        &self,
        overlapped: GuestAddr,
        returned: GuestAddr,
        wait: bool,
    ) -> Result<Reply> {
        if overlapped.is_null() {
            return Ok(Reply::status(Status::InvalidParameter));
        }
        let inner = &self.inner;
        let memory = inner.memory.as_ref();
        let ov = inner.translator.to_host(overlapped);

        let mut status = inner.layout.read_status(memory, ov)?;
        if status == Status::Pending {
            if !wait {
                return Ok(Reply::status(Status::Pending));
            }
            inner.wait_until(None, |pending| {
                !pending.values().any(|op| op.overlapped == overlapped)
            });
            status = inner.layout.read_status(memory, ov)?;
        }
        let bytes = inner.layout.read_bytes(memory, ov)?;
        inner.write_returned(returned, bytes)?;
        Ok(Reply::with_value(status, bytes.into()))
    }

    /// Wait for an event on the current thread.
    ///
    /// Returns `Success`, `Timeout`, or with `alertable` set, `UserApc` after
    /// running queued completion routines.
    pub fn wait_event(
        &self,
        handle: GuestAddr,
        alertable: bool,
        timeout: Option<Duration>,
    ) -> Result<Status> {
        let inner = &self.inner;
        let event = inner.events.lookup(inner.normalize(handle))?;
        Ok(inner.apcs.wait(Some(&event), alertable, timeout, inner.executor.as_ref()))
    }

    pub fn create_event(&self, manual_reset: bool, initial: bool) -> GuestAddr {
        self.inner.events.create(manual_reset, initial)
    }

    pub fn set_event(&self, handle: GuestAddr) -> Result<()> {
        self.inner.events.set(self.inner.normalize(handle))
    }

    pub fn reset_event(&self, handle: GuestAddr) -> Result<()> {
        self.inner.events.reset(self.inner.normalize(handle))
    }

    pub fn close_handle(&self, handle: GuestAddr) -> Result<()> {
        self.inner.events.close(self.inner.normalize(handle))
    }

    /// Operations handed to workers and not yet delivered.
    pub fn outstanding(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    pub fn pending_ops(&self) -> Vec<PendingOp> {
        let mut ops: Vec<_> = lock(&self.inner.pending).values().cloned().collect();
        ops.sort_by_key(|op| op.id);
        ops
    }

    /// Wait until nothing is outstanding. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        self.inner.wait_until(timeout, HashMap::is_empty)
    }

    /// Stop accepting operations and wait for the outstanding ones.
    ///
    /// Must not be called from a completion routine or worker.
    pub fn shutdown(&self) {
        debug!(outstanding = self.outstanding(), "async bridge shutting down");
        self.inner.pool.shutdown();
    }
}

impl Inner {
    /// Guest handles compare at the guest's width.
    fn normalize(&self, handle: GuestAddr) -> GuestAddr {
        self.translator
            .handle_to_guest(self.translator.handle_to_host(handle))
    }

    fn write_returned(&self, returned: GuestAddr, bytes: u32) -> Result<()> {
        if !returned.is_null() {
            self.memory
                .write_u32(self.translator.to_host(returned), bytes)?;
        }
        Ok(())
    }

    fn read_sync(&self, call: &ReadCall, request: &ReadRequest) -> Result<Reply> {
        let completion = match self.source.start_read(request) {
            Issue::Complete(completion) => completion,
            Issue::Failed(status) => Completion::new(status, 0),
            Issue::Pending(host) => {
                trace!(target = %request.target, "waiting for read on caller");
                host.wait()
            }
        };
        self.write_returned(call.returned, completion.bytes)?;
        Ok(Reply::with_value(completion.status, completion.bytes.into()))
    }

    /// Worker side of a pending operation.
    fn complete(&self, id: u64, host: Box<dyn HostCompletion>) {
        let op = {
            let mut pending = lock(&self.pending);
            let Some(op) = pending.get_mut(&id) else {
                warn!(id, "completion for unknown operation");
                return;
            };
            op.worker = thread::current().name().map(str::to_owned);
            op.clone()
        };
        trace!(id, worker = ?op.worker, "waiting for host completion");

        let completion = host.wait();
        self.deliver(&op, completion);
        debug!(id, status = %completion.status, bytes = completion.bytes, "read delivered");
        self.settle(id, OpState::Delivered);
    }

    /// Drop the record of a finished operation and wake result waiters.
    fn settle(&self, id: u64, state: OpState) {
        if let Some(mut op) = lock(&self.pending).remove(&id) {
            op.state = state;
            trace!(id, state = ?op.state, "operation settled");
        }
        self.settled.notify_all();
    }

    /// Write the result, then signal the event, then queue the routine.
    fn deliver(&self, op: &PendingOp, completion: Completion) {
        let ov = self.translator.to_host(op.overlapped);
        if let Err(e) =
            self.layout
                .write_result(self.memory.as_ref(), ov, completion.status, completion.bytes)
        {
            warn!(id = op.id, overlapped = %op.overlapped, error = %e, "could not write result");
        }

        if !op.event.is_null() {
            match self.events.get(op.event) {
                Some(event) => event.set(),
                None => warn!(id = op.id, event = %op.event, "event closed before completion; signal dropped"),
            }
        }

        if !op.routine.is_null() {
            self.apcs.queue(
                op.thread,
                Apc {
                    routine: op.routine,
                    status: completion.status,
                    bytes: completion.bytes,
                    overlapped: op.overlapped,
                },
            );
        }
    }

    fn wait_until(
        &self,
        timeout: Option<Duration>,
        done: impl Fn(&HashMap<u64, PendingOp>) -> bool,
    ) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut pending = lock(&self.pending);
        loop {
            if done(&pending) {
                return true;
            }
            pending = match deadline {
                None => self
                    .settled
                    .wait(pending)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    self.settled
                        .wait_timeout(pending, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}
