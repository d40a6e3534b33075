use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crossing_core::{GuestAddr, HostAddr, Status, FACADE_STRIDE, WRAPPER_STRIDE};
use crossing_identity::{
    AttachmentKey, Error, FacadeDesc, HostObject, InterfaceId, Registry, WrapperClass, IID_UNKNOWN,
};

const HEAP: u64 = 0x4000_0000;
const BUFFER: InterfaceId = InterfaceId::from_u128(0xb0);
const BUFFER_V10: InterfaceId = InterfaceId::from_u128(0xb1);

static BUFFER_CLASS: WrapperClass = WrapperClass::new(
    "buffer",
    &[
        FacadeDesc::new(BUFFER, &[IID_UNKNOWN]),
        FacadeDesc::new(BUFFER_V10, &[IID_UNKNOWN]),
    ],
);

#[derive(Default)]
struct Buffer {
    addr: u64,
    refs: AtomicU32,
    attachments: Mutex<HashMap<AttachmentKey, Arc<dyn Any + Send + Sync>>>,
}

impl Buffer {
    fn new(addr: u64) -> Arc<dyn HostObject> {
        Arc::new(Self {
            addr,
            refs: AtomicU32::new(1),
            ..Self::default()
        })
    }
}

impl HostObject for Buffer {
    fn host_addr(&self) -> HostAddr {
        HostAddr::new(self.addr)
    }

    fn add_ref(&self) -> u32 {
        self.refs.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn release(&self) -> u32 {
        self.refs.fetch_sub(1, Ordering::SeqCst) - 1
    }

    fn attachment(&self, key: AttachmentKey) -> Option<Arc<dyn Any + Send + Sync>> {
        self.attachments.lock().unwrap().get(&key).cloned()
    }

    fn set_attachment(&self, key: AttachmentKey, value: Arc<dyn Any + Send + Sync>) -> Result<(), Status> {
        self.attachments.lock().unwrap().insert(key, value);
        Ok(())
    }

    fn remove_attachment(&self, key: AttachmentKey) -> Option<Arc<dyn Any + Send + Sync>> {
        self.attachments.lock().unwrap().remove(&key)
    }
}

#[test]
fn facade_addresses_follow_the_heap_layout() {
    let registry = Registry::new(GuestAddr::new(HEAP), 4, 2);
    let (first, second) = (Buffer::new(0x1000), Buffer::new(0x2000));
    let a = registry.acquire(&first, &BUFFER_CLASS, BUFFER).unwrap();
    let b = registry.acquire(&second, &BUFFER_CLASS, BUFFER_V10).unwrap();

    assert_eq!(a.addr(), GuestAddr::new(HEAP));
    assert_eq!(b.addr(), GuestAddr::new(HEAP + WRAPPER_STRIDE + FACADE_STRIDE));
    assert!(registry.in_heap(b.addr()));
    assert!(!registry.in_heap(GuestAddr::new(HEAP - 8)));

    // Between facades: not a facade.
    let err = registry.resolve(GuestAddr::new(HEAP + 4)).unwrap_err();
    assert_eq!(err.status(), Status::InvalidHandle);
}

#[test]
fn full_heap_is_out_of_memory_and_wraps_nothing() {
    let registry = Registry::new(GuestAddr::new(HEAP), 2, 2);
    let objects: Vec<_> = (1..=3).map(|i| Buffer::new(i * 0x1000)).collect();

    registry.acquire(&objects[0], &BUFFER_CLASS, BUFFER).unwrap();
    registry.acquire(&objects[1], &BUFFER_CLASS, BUFFER).unwrap();
    let err = registry.acquire(&objects[2], &BUFFER_CLASS, BUFFER).unwrap_err();

    assert!(matches!(err, Error::OutOfMemory(2)));
    assert_eq!(err.status(), Status::NoMemory);
    assert!(registry.lookup(objects[2].as_ref()).is_none());
    assert_eq!(registry.stats().live, 2);
}

#[test]
fn freed_slots_are_reused_oldest_first() {
    let registry = Registry::new(GuestAddr::new(HEAP), 4, 2);
    let objects: Vec<_> = (1..=3).map(|i| Buffer::new(i * 0x1000)).collect();
    let facades: Vec<_> = objects
        .iter()
        .map(|o| registry.acquire(o, &BUFFER_CLASS, BUFFER).unwrap())
        .collect();

    registry.release(facades[1].wrapper()).unwrap();
    registry.release(facades[0].wrapper()).unwrap();
    assert_eq!(registry.stats().destroyed, 2);

    // Stale facades stay invalid.
    assert!(matches!(
        registry.resolve(facades[1].addr()),
        Err(Error::InvalidFacade(_))
    ));

    let late = Buffer::new(0x9000);
    let again = registry.acquire(&late, &BUFFER_CLASS, BUFFER).unwrap();
    assert_eq!(again.wrapper().slot(), facades[1].wrapper().slot());
}

#[test]
fn over_release_is_rejected() {
    let registry = Registry::new(GuestAddr::new(HEAP), 4, 2);
    let buffer = Buffer::new(0x1000);
    let facade = registry.wrap(&buffer, &BUFFER_CLASS, BUFFER).unwrap();

    assert_eq!(facade.wrapper().refs(), 0);
    let err = registry.release(facade.wrapper()).unwrap_err();
    assert!(matches!(err, Error::OverRelease(_)));
    assert_eq!(err.status(), Status::InvalidParameter);
}

#[test]
fn rewrap_after_teardown_starts_from_zero() {
    let registry = Registry::new(GuestAddr::new(HEAP), 4, 2);
    let buffer = Buffer::new(0x1000);
    let first = registry.acquire(&buffer, &BUFFER_CLASS, BUFFER).unwrap();
    registry.add_ref(first.wrapper()).unwrap();
    registry.release(first.wrapper()).unwrap();
    assert_eq!(registry.release(first.wrapper()).unwrap(), 0);
    assert!(!first.wrapper().is_live());

    let again = registry.wrap(&buffer, &BUFFER_CLASS, BUFFER_V10).unwrap();
    assert_eq!(again.wrapper().refs(), 0);
    assert!(!Arc::ptr_eq(again.wrapper(), first.wrapper()));
    assert_eq!(registry.stats().created, 2);
}
