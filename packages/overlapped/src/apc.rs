//! Completion routines queued to guest threads.
//!
//! A completion routine runs on the thread that issued the operation, and
//! only while that thread is in an alertable wait. Until then it sits in the
//! thread's queue.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crossing_core::{GuestAddr, Status};
use tracing::{debug, trace};

use crate::event::{lock, Event, Parker};

/// A completion routine call waiting for its thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Apc {
    /// Guest address of the routine.
    pub routine: GuestAddr,
    pub status: Status,
    pub bytes: u32,
    /// Guest OVERLAPPED the routine receives.
    pub overlapped: GuestAddr,
}

/// Runs guest code on the current thread.
pub trait GuestExecutor: Send + Sync {
    /// Call `apc.routine(status, bytes, overlapped)` in the guest.
    fn run_completion(&self, apc: &Apc);
}

#[derive(Debug, Default)]
struct ThreadSlot {
    parker: Arc<Parker>,
    queue: Mutex<VecDeque<Apc>>,
}

type Slots = Mutex<HashMap<ThreadId, Arc<ThreadSlot>>>;

thread_local! {
    static EXIT: ExitWatch = ExitWatch::new();
}

/// Removes the current thread's slot from every queue set it joined once
/// the thread exits.
struct ExitWatch {
    thread: ThreadId,
    joined: RefCell<Vec<Weak<Slots>>>,
}

impl ExitWatch {
    fn new() -> Self {
        Self {
            thread: thread::current().id(),
            joined: RefCell::new(Vec::new()),
        }
    }

    fn join(&self, slots: Weak<Slots>) {
        let mut joined = self.joined.borrow_mut();
        joined.retain(|s| s.strong_count() > 0);
        joined.push(slots);
    }
}

impl Drop for ExitWatch {
    fn drop(&mut self) {
        for slots in self.joined.get_mut().drain(..) {
            let Some(slots) = slots.upgrade() else {
                continue;
            };
            let removed = lock(&slots).remove(&self.thread);
            if let Some(slot) = removed {
                let dropped = lock(&slot.queue).len();
                if dropped > 0 {
                    debug!(thread = ?self.thread, dropped, "thread exited with completion routines queued");
                }
            }
        }
    }
}

/// Per-thread APC queues.
///
/// A thread has a queue from its first wait (or registration) until it
/// exits.
#[derive(Debug, Default)]
pub struct ApcQueues {
    threads: Arc<Slots>,
}

impl ApcQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give the current thread a queue, if it has none.
    pub fn register_current(&self) {
        self.current_slot();
    }

    fn current_slot(&self) -> Arc<ThreadSlot> {
        let me = thread::current().id();
        if let Some(slot) = lock(&self.threads).get(&me) {
            return slot.clone();
        }
        let slot = Arc::<ThreadSlot>::default();
        let watched = EXIT
            .try_with(|exit| exit.join(Arc::downgrade(&self.threads)))
            .is_ok();
        // A thread already tearing down gets a queue nobody can reach.
        if watched {
            lock(&self.threads).insert(me, slot.clone());
        }
        slot
    }

    /// Queue `apc` for `thread` and wake it if it is waiting.
    ///
    /// Returns false, dropping the routine, when the thread has no queue:
    /// it has exited or never registered.
    pub fn queue(&self, thread: ThreadId, apc: Apc) -> bool {
        let Some(slot) = lock(&self.threads).get(&thread).cloned() else {
            debug!(?thread, routine = %apc.routine, "no queue for thread; completion routine dropped");
            return false;
        };
        lock(&slot.queue).push_back(apc);
        slot.parker.unpark();
        trace!(?thread, routine = %apc.routine, "apc queued");
        true
    }

    /// Threads that currently have a queue.
    pub fn threads(&self) -> usize {
        lock(&self.threads).len()
    }

    /// Routines queued for `thread` and not yet run.
    pub fn pending(&self, thread: ThreadId) -> usize {
        lock(&self.threads)
            .get(&thread)
            .map(|slot| lock(&slot.queue).len())
            .unwrap_or(0)
    }

    /// Run every routine queued for the current thread. Returns how many ran.
    pub fn run_pending(&self, executor: &dyn GuestExecutor) -> usize {
        let slot = self.current_slot();
        Self::drain(&slot, executor)
    }

    fn drain(slot: &ThreadSlot, executor: &dyn GuestExecutor) -> usize {
        let apcs = std::mem::take(&mut *lock(&slot.queue));
        for apc in &apcs {
            debug!(routine = %apc.routine, status = %apc.status, bytes = apc.bytes, "running completion routine");
            executor.run_completion(apc);
        }
        apcs.len()
    }

    /// Wait on the current thread.
    ///
    /// With an event, returns `Success` once it is acquired. With
    /// `alertable`, queued routines run first and the wait returns
    /// `UserApc`. `None` timeout waits forever; expiry returns `Timeout`.
    pub fn wait(
        &self,
        event: Option<&Event>,
        alertable: bool,
        timeout: Option<Duration>,
        executor: &dyn GuestExecutor,
    ) -> Status {
        let slot = self.current_slot();
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if alertable && Self::drain(&slot, executor) > 0 {
                return Status::UserApc;
            }
            if let Some(event) = event {
                if event.acquire_or_register(&slot.parker) {
                    event.unregister(&slot.parker);
                    return Status::Success;
                }
            }

            let woken = slot.parker.park(deadline);
            if let Some(event) = event {
                event.unregister(&slot.parker);
            }
            if !woken {
                if event.is_some_and(Event::try_acquire) {
                    return Status::Success;
                }
                if alertable && Self::drain(&slot, executor) > 0 {
                    return Status::UserApc;
                }
                return Status::Timeout;
            }
        }
    }
}
