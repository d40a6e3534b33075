use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use crossing_core::{
    AddressTranslator, BridgeConfig, GuestAddr, GuestRam, HostAddr, HostMemory, HostMemoryExt, PointerWidth,
    Status,
};
use crossing_overlapped::{
    Apc, AsyncBridge, Completion, GuestExecutor, HostCompletion, Issue, OverlappedLayout,
    OverlappedSource, ReadCall, ReadRequest,
};

const BASE: u64 = 0x7f00_0000_0000;
const OV_AT: u64 = 0x100;

struct NoFiles;

impl OverlappedSource for NoFiles {
    fn start_read(&self, _: &ReadRequest) -> Issue {
        Issue::Failed(Status::InvalidHandle)
    }
}

/// Every read pends until the test finishes it.
#[derive(Default)]
struct SlowDisk {
    inflight: Mutex<Vec<Sender<Completion>>>,
}

impl SlowDisk {
    fn finish(&self, completion: Completion) {
        for tx in self.inflight.lock().unwrap().drain(..) {
            tx.send(completion).unwrap();
        }
    }
}

struct Later(Receiver<Completion>);

impl HostCompletion for Later {
    fn wait(self: Box<Self>) -> Completion {
        self.0.recv().unwrap_or(Completion::new(Status::Cancelled, 0))
    }
}

impl OverlappedSource for SlowDisk {
    fn start_read(&self, _: &ReadRequest) -> Issue {
        let (tx, rx) = channel();
        self.inflight.lock().unwrap().push(tx);
        Issue::Pending(Box::new(Later(rx)))
    }
}

struct NoGuest;

impl GuestExecutor for NoGuest {
    fn run_completion(&self, _: &Apc) {}
}

fn bridge_over(ram: Arc<GuestRam>, source: Arc<dyn OverlappedSource>) -> AsyncBridge {
    AsyncBridge::new(
        ram,
        AddressTranslator::with_host_width(BASE, PointerWidth::Bits32, PointerWidth::Bits64),
        source,
        Arc::new(NoGuest),
        &BridgeConfig::default(),
    )
    .unwrap()
}

fn bridge() -> AsyncBridge {
    bridge_over(Arc::new(GuestRam::new(HostAddr::new(BASE), 0x1000)), Arc::new(NoFiles))
}

fn wait_all(bridge: &AsyncBridge, event: GuestAddr, waiters: usize) -> Vec<thread::JoinHandle<Status>> {
    let ready = Arc::new(Barrier::new(waiters + 1));
    let handles = (0..waiters)
        .map(|_| {
            let (bridge, ready) = (bridge.clone(), ready.clone());
            thread::spawn(move || {
                ready.wait();
                bridge
                    .wait_event(event, false, Some(Duration::from_millis(300)))
                    .unwrap_or_else(|e| e.status())
            })
        })
        .collect();
    ready.wait();
    handles
}

#[test]
fn manual_reset_event_releases_every_waiter() {
    let bridge = bridge();
    let event = bridge.create_event(true, false);
    let waiters = wait_all(&bridge, event, 4);

    thread::sleep(Duration::from_millis(20));
    bridge.set_event(event).unwrap();

    for waiter in waiters {
        assert_eq!(waiter.join().unwrap(), Status::Success);
    }
}

#[test]
fn auto_reset_event_releases_one_waiter_per_set() {
    let bridge = bridge();
    let event = bridge.create_event(false, false);
    let waiters = wait_all(&bridge, event, 3);

    thread::sleep(Duration::from_millis(20));
    bridge.set_event(event).unwrap();

    let released = waiters
        .into_iter()
        .map(|w| w.join().unwrap())
        .filter(|s| *s == Status::Success)
        .count();
    assert_eq!(released, 1);
}

#[test]
fn closing_an_event_does_not_strand_its_waiters() {
    let bridge = bridge();
    let event = bridge.create_event(true, false);
    let waiters = wait_all(&bridge, event, 2);

    thread::sleep(Duration::from_millis(20));
    bridge.close_handle(event).unwrap();

    for waiter in waiters {
        let status = waiter.join().unwrap();
        assert!(matches!(status, Status::Timeout | Status::InvalidHandle), "{status}");
    }
    assert!(bridge.events().is_empty());
}

#[test]
fn timed_out_wait_sees_the_later_delivery() {
    let ram = Arc::new(GuestRam::new(HostAddr::new(BASE), 0x1000));
    let disk = Arc::new(SlowDisk::default());
    let bridge = bridge_over(ram.clone(), disk.clone());
    let layout = OverlappedLayout::new(PointerWidth::Bits32);
    let ov_at = HostAddr::new(BASE + OV_AT);

    let event = bridge.create_event(true, false);
    ram.write(ov_at, &[0u8; 20]).unwrap();
    ram.write_u32(ov_at.offset(layout.event()), event.raw() as u32).unwrap();

    let call = ReadCall {
        target: GuestAddr::new(0x44),
        buffer: GuestAddr::new(0x400),
        len: 128,
        returned: GuestAddr::NULL,
        overlapped: GuestAddr::new(OV_AT),
        routine: GuestAddr::NULL,
    };
    assert_eq!(bridge.issue_read(&call).unwrap().status, Status::Pending);

    let waited = bridge
        .wait_event(event, false, Some(Duration::from_millis(20)))
        .unwrap();
    assert_eq!(waited, Status::Timeout);
    assert_eq!(layout.read_status(ram.as_ref(), ov_at).unwrap(), Status::Pending);
    assert_eq!(bridge.outstanding(), 1);

    disk.finish(Completion::success(96));
    let waited = bridge
        .wait_event(event, false, Some(Duration::from_secs(5)))
        .unwrap();
    assert_eq!(waited, Status::Success);
    assert!(bridge.wait_idle(Some(Duration::from_secs(5))));
    assert_eq!(layout.read_status(ram.as_ref(), ov_at).unwrap(), Status::Success);
    assert_eq!(layout.read_bytes(ram.as_ref(), ov_at).unwrap(), 96);
    bridge.shutdown();
}
