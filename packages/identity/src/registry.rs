//! The object identity registry.
//!
//! Maps host objects to their one wrapper and guest facade addresses back to
//! wrappers. Host -> wrapper goes through the link attached to the host
//! object; facade -> wrapper is arithmetic on the wrapper heap window, so a
//! guest-supplied address is never dereferenced.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossing_core::{BridgeConfig, GuestAddr, HostAddr, FACADE_STRIDE, WRAPPER_STRIDE};
use tracing::{debug, trace, warn};

use crate::attachment::WRAPPER_LINK_KEY;
use crate::error::{Error, Result};
use crate::host::HostObject;
use crate::interface::{InterfaceId, WrapperClass};
use crate::wrapper::{FacadeRef, Wrapper, WrapperLink};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Slots of the wrapper heap. Freed slots are reused oldest first.
struct WrapperHeap {
    entries: Vec<Option<Arc<Wrapper>>>,
    free: VecDeque<usize>,
}

pub(crate) struct Shared {
    heap_base: GuestAddr,
    capacity: usize,
    heap: Mutex<WrapperHeap>,
    stripes: Box<[Mutex<()>]>,
    created: AtomicU64,
    destroyed: AtomicU64,
}

impl Shared {
    fn alloc(
        self: &Arc<Self>,
        class: &'static WrapperClass,
        host: &Arc<dyn HostObject>,
    ) -> Result<Arc<Wrapper>> {
        let mut heap = lock(&self.heap);
        let slot = match heap.free.pop_front() {
            Some(slot) => slot,
            None if heap.entries.len() < self.capacity => {
                heap.entries.push(None);
                heap.entries.len() - 1
            }
            None => return Err(Error::OutOfMemory(self.capacity)),
        };
        let wrapper = Arc::new(Wrapper::new(
            slot,
            self.heap_base.offset(slot as u64 * WRAPPER_STRIDE),
            FACADE_STRIDE,
            class,
            host,
            Arc::downgrade(self),
        ));
        heap.entries[slot] = Some(wrapper.clone());
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(wrapper)
    }

    pub(crate) fn free_slot(&self, slot: usize) {
        let removed = {
            let mut heap = lock(&self.heap);
            let removed = heap.entries.get_mut(slot).and_then(Option::take);
            if removed.is_some() {
                heap.free.push_back(slot);
            }
            removed
        };
        if removed.is_some() {
            self.destroyed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn stripe(&self, host: HostAddr) -> &Mutex<()> {
        let index = (host.raw() >> 4) as usize % self.stripes.len();
        &self.stripes[index]
    }
}

/// Counters describing the wrapper population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStats {
    pub live: usize,
    pub created: u64,
    pub destroyed: u64,
}

/// Host object <-> wrapper identity.
///
/// Cheap to clone; clones share one heap.
#[derive(Clone)]
pub struct Registry {
    shared: Arc<Shared>,
}

impl Registry {
    pub fn new(heap_base: GuestAddr, max_wrappers: usize, identity_slots: usize) -> Self {
        let stripes = (0..identity_slots.max(1))
            .map(|_| Mutex::new(()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shared: Arc::new(Shared {
                heap_base,
                capacity: max_wrappers,
                heap: Mutex::new(WrapperHeap {
                    entries: Vec::new(),
                    free: VecDeque::new(),
                }),
                stripes,
                created: AtomicU64::new(0),
                destroyed: AtomicU64::new(0),
            }),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(
            GuestAddr::new(config.wrapper_heap_base),
            config.max_wrappers,
            config.identity_slots,
        )
    }

    /// Return the facade of `host`'s wrapper answering `iid`, creating the
    /// wrapper if the object has none.
    ///
    /// A new wrapper starts with no guest references.
    pub fn wrap(
        &self,
        host: &Arc<dyn HostObject>,
        class: &'static WrapperClass,
        iid: InterfaceId,
    ) -> Result<FacadeRef> {
        let _guard = lock(self.shared.stripe(host.host_addr()));
        self.wrap_locked(host, class, iid)
    }

    /// Like [`wrap`](Self::wrap), and take one guest reference in the same
    /// critical section.
    pub fn acquire(
        &self,
        host: &Arc<dyn HostObject>,
        class: &'static WrapperClass,
        iid: InterfaceId,
    ) -> Result<FacadeRef> {
        let _guard = lock(self.shared.stripe(host.host_addr()));
        let facade = self.wrap_locked(host, class, iid)?;
        facade.wrapper().refs.fetch_add(1, Ordering::AcqRel);
        Ok(facade)
    }

    fn wrap_locked(
        &self,
        host: &Arc<dyn HostObject>,
        class: &'static WrapperClass,
        iid: InterfaceId,
    ) -> Result<FacadeRef> {
        if let Some(wrapper) = self.lookup(host.as_ref()) {
            let index = wrapper
                .class()
                .facade_for(iid)
                .ok_or_else(|| self.no_interface(&wrapper, iid))?;
            trace!(slot = wrapper.slot(), index, "existing wrapper");
            return Ok(FacadeRef::new(wrapper, index));
        }

        class.validate()?;
        let Some(index) = class.facade_for(iid) else {
            debug!(class = class.name, %iid, "no facade, not wrapping");
            return Err(Error::NoInterface(iid));
        };

        let wrapper = self.shared.alloc(class, host)?;
        let link: Arc<dyn Any + Send + Sync> = Arc::new(WrapperLink::new(wrapper.clone()));
        if let Err(status) = host.set_attachment(WRAPPER_LINK_KEY, link) {
            wrapper.retire();
            return Err(Error::Host(status));
        }
        debug!(
            slot = wrapper.slot(),
            class = class.name,
            host = %host.host_addr(),
            "wrapper created"
        );
        Ok(FacadeRef::new(wrapper, index))
    }

    fn no_interface(&self, wrapper: &Wrapper, iid: InterfaceId) -> Error {
        if wrapper.host().is_some_and(|host| host.supports(iid)) {
            warn!(class = wrapper.class().name, %iid, "host supports an interface the wrapper lacks");
        }
        Error::NoInterface(iid)
    }

    /// The live wrapper of `host`, if it has one. Never creates.
    pub fn lookup(&self, host: &dyn HostObject) -> Option<Arc<Wrapper>> {
        let link = host.attachment(WRAPPER_LINK_KEY)?.downcast::<WrapperLink>().ok()?;
        let wrapper = link.wrapper().clone();
        wrapper.is_live().then_some(wrapper)
    }

    /// Recover the wrapper behind a guest facade address.
    pub fn resolve(&self, addr: GuestAddr) -> Result<FacadeRef> {
        let invalid = || Error::InvalidFacade(addr);
        let offset = addr
            .raw()
            .checked_sub(self.shared.heap_base.raw())
            .ok_or_else(invalid)?;
        let within = offset % WRAPPER_STRIDE;
        if within % FACADE_STRIDE != 0 {
            return Err(invalid());
        }
        let slot = usize::try_from(offset / WRAPPER_STRIDE).map_err(|_| invalid())?;
        let index = (within / FACADE_STRIDE) as usize;

        let wrapper = lock(&self.shared.heap)
            .entries
            .get(slot)
            .and_then(Clone::clone)
            .ok_or_else(invalid)?;
        if index >= wrapper.facades().len() || !wrapper.is_live() {
            return Err(invalid());
        }
        Ok(FacadeRef::new(wrapper, index))
    }

    /// QueryInterface: move from one facade to another of the same wrapper.
    ///
    /// Takes a guest reference on success.
    pub fn query(&self, facade: GuestAddr, iid: InterfaceId) -> Result<FacadeRef> {
        let current = self.resolve(facade)?;
        let wrapper = current.wrapper().clone();
        let index = wrapper
            .class()
            .facade_for(iid)
            .ok_or_else(|| self.no_interface(&wrapper, iid))?;
        self.add_ref(&wrapper)?;
        Ok(FacadeRef::new(wrapper, index))
    }

    /// Take a guest reference. Returns the new count.
    pub fn add_ref(&self, wrapper: &Arc<Wrapper>) -> Result<u32> {
        let mut current = wrapper.refs.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return self.revive(wrapper);
            }
            match wrapper.refs.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(current + 1),
                Err(actual) => current = actual,
            }
        }
    }

    /// 0 -> 1 races with teardown, so it happens under the identity lock.
    fn revive(&self, wrapper: &Arc<Wrapper>) -> Result<u32> {
        let _guard = lock(self.shared.stripe(wrapper.host_addr()));
        if !wrapper.is_live() {
            let addr = wrapper.facade(0).map(|f| f.addr()).unwrap_or_default();
            return Err(Error::InvalidFacade(addr));
        }
        Ok(wrapper.refs.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Drop a guest reference. Returns the new count.
    ///
    /// At zero the wrapper detaches from its host object and gives its slot
    /// back. The host object itself is not released here.
    pub fn release(&self, wrapper: &Arc<Wrapper>) -> Result<u32> {
        let mut current = wrapper.refs.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return Err(Error::OverRelease(wrapper.slot()));
            }
            match wrapper.refs.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        let left = current - 1;
        if left == 0 {
            self.teardown(wrapper);
        }
        Ok(left)
    }

    fn teardown(&self, wrapper: &Arc<Wrapper>) {
        {
            let _guard = lock(self.shared.stripe(wrapper.host_addr()));
            if wrapper.refs.load(Ordering::Acquire) != 0 || !wrapper.retire() {
                return;
            }
            if let Some(host) = wrapper.host() {
                let link = host.remove_attachment(WRAPPER_LINK_KEY);
                drop(link);
            }
        }
        // Stored interfaces release other wrappers, which takes stripe locks.
        drop(wrapper.private_data().take_all());
    }

    /// Whether `addr` falls inside the wrapper heap window.
    pub fn in_heap(&self, addr: GuestAddr) -> bool {
        let len = self.shared.capacity as u64 * WRAPPER_STRIDE;
        addr.raw()
            .checked_sub(self.shared.heap_base.raw())
            .is_some_and(|offset| offset < len)
    }

    pub fn stats(&self) -> RegistryStats {
        let live = lock(&self.shared.heap)
            .entries
            .iter()
            .filter(|e| e.is_some())
            .count();
        RegistryStats {
            live,
            created: self.shared.created.load(Ordering::Relaxed),
            destroyed: self.shared.destroyed.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("heap_base", &self.shared.heap_base)
            .field("capacity", &self.shared.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}
