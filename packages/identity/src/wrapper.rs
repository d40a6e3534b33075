//! Wrapper objects and their facades.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use crossing_core::{GuestAddr, HostAddr};
use tracing::debug;

use crate::attachment::PrivateStore;
use crate::host::HostObject;
use crate::interface::{FacadeDesc, WrapperClass};
use crate::registry::Shared;

/// One polymorphic view of a wrapper.
#[derive(Debug)]
pub struct Facade {
    index: usize,
    desc: &'static FacadeDesc,
    addr: GuestAddr,
}

impl Facade {
    /// Position within the wrapper.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn desc(&self) -> &'static FacadeDesc {
        self.desc
    }

    /// Stable guest address of the facade.
    pub fn addr(&self) -> GuestAddr {
        self.addr
    }
}

/// Guest-visible stand-in for one host object.
///
/// All facades share one reference count. The wrapper never owns its host
/// object; the host object owns the wrapper through a [`WrapperLink`].
pub struct Wrapper {
    slot: usize,
    class: &'static WrapperClass,
    host_addr: HostAddr,
    host: Weak<dyn HostObject>,
    pub(crate) refs: AtomicU32,
    pub(crate) freed: AtomicBool,
    private: PrivateStore,
    facades: Box<[Facade]>,
    registry: Weak<Shared>,
}

impl Wrapper {
    pub(crate) fn new(
        slot: usize,
        slot_base: GuestAddr,
        facade_stride: u64,
        class: &'static WrapperClass,
        host: &Arc<dyn HostObject>,
        registry: Weak<Shared>,
    ) -> Self {
        let facades = class
            .facades
            .iter()
            .enumerate()
            .map(|(index, desc)| Facade {
                index,
                desc,
                addr: slot_base.offset(index as u64 * facade_stride),
            })
            .collect();
        Self {
            slot,
            class,
            host_addr: host.host_addr(),
            host: Arc::downgrade(host),
            refs: AtomicU32::new(0),
            freed: AtomicBool::new(false),
            private: PrivateStore::new(),
            facades,
            registry,
        }
    }

    /// Heap slot the wrapper occupies.
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn class(&self) -> &'static WrapperClass {
        self.class
    }

    pub fn host_addr(&self) -> HostAddr {
        self.host_addr
    }

    /// The host object, while it is alive.
    pub fn host(&self) -> Option<Arc<dyn HostObject>> {
        self.host.upgrade()
    }

    /// References the guest holds across all facades.
    pub fn refs(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    /// False once the wrapper has been torn down.
    pub fn is_live(&self) -> bool {
        !self.freed.load(Ordering::Acquire)
    }

    pub fn facades(&self) -> &[Facade] {
        &self.facades
    }

    pub fn facade(&self, index: usize) -> Option<&Facade> {
        self.facades.get(index)
    }

    /// The guest's private data on this object.
    pub fn private_data(&self) -> &PrivateStore {
        &self.private
    }

    /// Mark the wrapper dead and give its slot back. Runs at most once.
    pub(crate) fn retire(&self) -> bool {
        if self.freed.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(shared) = self.registry.upgrade() {
            shared.free_slot(self.slot);
        }
        debug!(slot = self.slot, class = self.class.name, host = %self.host_addr, "wrapper retired");
        true
    }
}

impl std::fmt::Debug for Wrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wrapper")
            .field("slot", &self.slot)
            .field("class", &self.class.name)
            .field("host_addr", &self.host_addr)
            .field("refs", &self.refs())
            .field("live", &self.is_live())
            .finish()
    }
}

/// Attachment stored on the host object under
/// [`WRAPPER_LINK_KEY`](crate::WRAPPER_LINK_KEY).
///
/// Dropping the last link (the host object destroying its private data)
/// retires the wrapper.
pub struct WrapperLink {
    wrapper: Arc<Wrapper>,
}

impl WrapperLink {
    pub(crate) fn new(wrapper: Arc<Wrapper>) -> Self {
        Self { wrapper }
    }

    pub fn wrapper(&self) -> &Arc<Wrapper> {
        &self.wrapper
    }
}

impl Drop for WrapperLink {
    fn drop(&mut self) {
        if self.wrapper.retire() {
            drop(self.wrapper.private_data().take_all());
        }
    }
}

/// A wrapper seen through one of its facades.
#[derive(Debug, Clone)]
pub struct FacadeRef {
    wrapper: Arc<Wrapper>,
    index: usize,
}

impl FacadeRef {
    pub(crate) fn new(wrapper: Arc<Wrapper>, index: usize) -> Self {
        Self { wrapper, index }
    }

    pub fn wrapper(&self) -> &Arc<Wrapper> {
        &self.wrapper
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn facade(&self) -> &Facade {
        &self.wrapper.facades[self.index]
    }

    /// Guest address of this facade.
    pub fn addr(&self) -> GuestAddr {
        self.facade().addr
    }
}
