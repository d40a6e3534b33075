//! Guest-visible event objects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crossing_core::GuestAddr;
use tracing::trace;

use crate::error::{Error, Result};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wakes one blocked thread. A wake that arrives before the thread parks is
/// kept, not lost.
#[derive(Debug, Default)]
pub(crate) struct Parker {
    notified: Mutex<bool>,
    cv: Condvar,
}

impl Parker {
    pub(crate) fn unpark(&self) {
        *lock(&self.notified) = true;
        self.cv.notify_all();
    }

    /// Block until unparked or `deadline` passes. Returns false on timeout.
    pub(crate) fn park(&self, deadline: Option<Instant>) -> bool {
        let mut notified = lock(&self.notified);
        loop {
            if *notified {
                *notified = false;
                return true;
            }
            notified = match deadline {
                None => self.cv.wait(notified).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    self.cv
                        .wait_timeout(notified, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}

#[derive(Debug)]
struct EventState {
    signaled: bool,
    waiters: Vec<Arc<Parker>>,
}

/// A manual- or auto-reset event.
#[derive(Debug)]
pub struct Event {
    manual_reset: bool,
    state: Mutex<EventState>,
}

impl Event {
    pub fn new(manual_reset: bool, initial: bool) -> Self {
        Self {
            manual_reset,
            state: Mutex::new(EventState {
                signaled: initial,
                waiters: Vec::new(),
            }),
        }
    }

    pub fn is_manual_reset(&self) -> bool {
        self.manual_reset
    }

    pub fn is_signaled(&self) -> bool {
        lock(&self.state).signaled
    }

    /// Signal the event and wake every waiter.
    pub fn set(&self) {
        let mut state = lock(&self.state);
        state.signaled = true;
        for waiter in &state.waiters {
            waiter.unpark();
        }
    }

    pub fn reset(&self) {
        lock(&self.state).signaled = false;
    }

    /// Consume the signal if present. Auto-reset events go back to
    /// non-signaled.
    pub fn try_acquire(&self) -> bool {
        Self::acquire_locked(self.manual_reset, &mut lock(&self.state))
    }

    fn acquire_locked(manual_reset: bool, state: &mut EventState) -> bool {
        if !state.signaled {
            return false;
        }
        if !manual_reset {
            state.signaled = false;
        }
        true
    }

    /// Acquire the signal, or register `parker` to be woken by the next
    /// [`set`](Self::set).
    pub(crate) fn acquire_or_register(&self, parker: &Arc<Parker>) -> bool {
        let mut state = lock(&self.state);
        if Self::acquire_locked(self.manual_reset, &mut state) {
            return true;
        }
        if !state.waiters.iter().any(|w| Arc::ptr_eq(w, parker)) {
            state.waiters.push(parker.clone());
        }
        false
    }

    pub(crate) fn unregister(&self, parker: &Arc<Parker>) {
        lock(&self.state).waiters.retain(|w| !Arc::ptr_eq(w, parker));
    }
}

/// Handle table for events created by the guest.
///
/// Handles are small multiples of four, like the guest's own handles.
#[derive(Debug)]
pub struct EventTable {
    events: Mutex<HashMap<GuestAddr, Arc<Event>>>,
    next: AtomicU64,
}

impl Default for EventTable {
    fn default() -> Self {
        Self::new()
    }
}

impl EventTable {
    const FIRST_HANDLE: u64 = 0x100;
    const HANDLE_STEP: u64 = 4;

    pub fn new() -> Self {
        Self {
            events: Mutex::new(HashMap::new()),
            next: AtomicU64::new(Self::FIRST_HANDLE),
        }
    }

    /// Create an event and return its guest handle.
    pub fn create(&self, manual_reset: bool, initial: bool) -> GuestAddr {
        let handle = GuestAddr::new(self.next.fetch_add(Self::HANDLE_STEP, Ordering::Relaxed));
        lock(&self.events).insert(handle, Arc::new(Event::new(manual_reset, initial)));
        trace!(%handle, manual_reset, initial, "event created");
        handle
    }

    pub fn get(&self, handle: GuestAddr) -> Option<Arc<Event>> {
        lock(&self.events).get(&handle).cloned()
    }

    pub fn lookup(&self, handle: GuestAddr) -> Result<Arc<Event>> {
        self.get(handle).ok_or(Error::InvalidHandle(handle))
    }

    pub fn set(&self, handle: GuestAddr) -> Result<()> {
        self.lookup(handle)?.set();
        Ok(())
    }

    pub fn reset(&self, handle: GuestAddr) -> Result<()> {
        self.lookup(handle)?.reset();
        Ok(())
    }

    /// Close the handle. Threads already waiting keep their reference.
    pub fn close(&self, handle: GuestAddr) -> Result<()> {
        lock(&self.events)
            .remove(&handle)
            .map(drop)
            .ok_or(Error::InvalidHandle(handle))
    }

    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
