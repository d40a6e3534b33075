//! Host fakes shared by the integration tests.

#![allow(dead_code)]

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crossing::{
    Apc, AttachmentKey, Bridge, BridgeConfig, Completion, FacadeDesc, GuestAddr, GuestExecutor,
    HostAddr, HostCompletion, HostMemoryExt, HostObject, InterfaceId, Issue, OverlappedSource,
    ReadRequest, Status, WrapperClass, IID_UNKNOWN,
};

pub const VIEW: InterfaceId = InterfaceId::from_u128(0x9b7e_4c8f_342c_4106_a19f_4f2704f689f0);
pub const VIEW_V10: InterfaceId = InterfaceId::from_u128(0x9b7e_4c8f_342c_4106_a19f_4f2704f689f1);
pub const TEXTURE: InterfaceId = InterfaceId::from_u128(0x6f15_aaf2_d208_4e89_9ab4_489535d34f9c);

pub static VIEW_CLASS: WrapperClass = WrapperClass::new(
    "shader-resource-view",
    &[
        FacadeDesc::new(VIEW, &[IID_UNKNOWN]),
        FacadeDesc::new(VIEW_V10, &[IID_UNKNOWN]),
    ],
);

/// A reference-counted host object; destroying it drops its attachments.
pub struct HostView {
    addr: HostAddr,
    refs: AtomicU32,
    attachments: Mutex<HashMap<AttachmentKey, Arc<dyn Any + Send + Sync>>>,
}

impl HostView {
    pub fn new(addr: u64) -> Arc<Self> {
        Arc::new(Self {
            addr: HostAddr::new(addr),
            refs: AtomicU32::new(1),
            attachments: Mutex::new(HashMap::new()),
        })
    }

    pub fn as_dyn(self: &Arc<Self>) -> Arc<dyn HostObject> {
        self.clone()
    }

    pub fn refs(&self) -> u32 {
        self.refs.load(Ordering::SeqCst)
    }
}

impl HostObject for HostView {
    fn host_addr(&self) -> HostAddr {
        self.addr
    }

    fn add_ref(&self) -> u32 {
        self.refs.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn release(&self) -> u32 {
        let left = self.refs.fetch_sub(1, Ordering::SeqCst) - 1;
        if left == 0 {
            let drained: Vec<_> = self.attachments.lock().unwrap().drain().collect();
            drop(drained);
        }
        left
    }

    fn supports(&self, iid: InterfaceId) -> bool {
        iid == TEXTURE
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

struct Pending {
    rx: Receiver<Completion>,
    waiting: Arc<AtomicUsize>,
}

impl HostCompletion for Pending {
    fn wait(self: Box<Self>) -> Completion {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let completion = self
            .rx
            .recv()
            .unwrap_or(Completion::new(Status::Cancelled, 0));
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        completion
    }
}

enum Next {
    Complete(Completion),
    Fail(Status),
    Pend(Receiver<Completion>),
}

/// A file whose reads finish however the test scripts them.
#[derive(Default)]
pub struct ScriptedFile {
    next: Mutex<VecDeque<Next>>,
    started: Mutex<Vec<ReadRequest>>,
    waiting: Arc<AtomicUsize>,
}

impl ScriptedFile {
    pub fn complete(&self, completion: Completion) {
        self.next.lock().unwrap().push_back(Next::Complete(completion));
    }

    pub fn fail(&self, status: Status) {
        self.next.lock().unwrap().push_back(Next::Fail(status));
    }

    pub fn pend(&self) -> Sender<Completion> {
        let (tx, rx) = channel();
        self.next.lock().unwrap().push_back(Next::Pend(rx));
        tx
    }

    pub fn started(&self) -> Vec<ReadRequest> {
        self.started.lock().unwrap().clone()
    }

    /// Spin until `n` workers are blocked on pending reads.
    pub fn wait_for_waiters(&self, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.waiting.load(Ordering::SeqCst) < n {
            assert!(Instant::now() < deadline, "pending reads were not picked up");
            thread::yield_now();
        }
    }
}

impl OverlappedSource for ScriptedFile {
    fn start_read(&self, request: &ReadRequest) -> Issue {
        self.started.lock().unwrap().push(*request);
        match self.next.lock().unwrap().pop_front() {
            Some(Next::Complete(c)) => Issue::Complete(c),
            Some(Next::Fail(s)) => Issue::Failed(s),
            Some(Next::Pend(rx)) => Issue::Pending(Box::new(Pending {
                rx,
                waiting: self.waiting.clone(),
            })),
            None => Issue::Failed(Status::InvalidParameter),
        }
    }
}

/// Records completion routines instead of running guest code.
#[derive(Default)]
pub struct GuestCpu {
    ran: Mutex<Vec<(ThreadId, Apc)>>,
}

impl GuestCpu {
    pub fn ran(&self) -> Vec<(ThreadId, Apc)> {
        self.ran.lock().unwrap().clone()
    }
}

impl GuestExecutor for GuestCpu {
    fn run_completion(&self, apc: &Apc) {
        self.ran.lock().unwrap().push((thread::current().id(), *apc));
    }
}

pub struct Harness {
    pub bridge: Bridge,
    pub file: Arc<ScriptedFile>,
    pub cpu: Arc<GuestCpu>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(BridgeConfig::default())
    }

    pub fn with_config(config: BridgeConfig) -> Self {
        let file = Arc::new(ScriptedFile::default());
        let cpu = Arc::new(GuestCpu::default());
        let bridge = Bridge::builder(config)
            .source(file.clone())
            .executor(cpu.clone())
            .build()
            .unwrap();
        Self { bridge, file, cpu }
    }

    fn host(&self, guest: u64) -> HostAddr {
        self.bridge.translator().to_host(GuestAddr::new(guest))
    }

    pub fn write(&self, guest: u64, data: &[u8]) {
        self.bridge.memory().write(self.host(guest), data).unwrap();
    }

    pub fn write_u32(&self, guest: u64, value: u32) {
        self.bridge.memory().write_u32(self.host(guest), value).unwrap();
    }

    pub fn read_u32(&self, guest: u64) -> u32 {
        self.bridge.memory().read_u32(self.host(guest)).unwrap()
    }

    pub fn read_vec(&self, guest: u64, len: usize) -> Vec<u8> {
        self.bridge.memory().read_vec(self.host(guest), len).unwrap()
    }

    /// A zeroed 32-bit OVERLAPPED naming `event`.
    pub fn overlapped(&self, guest: u64, event: u64) -> u64 {
        self.write(guest, &[0u8; 20]);
        self.write_u32(guest + 16, event as u32);
        guest
    }
}
