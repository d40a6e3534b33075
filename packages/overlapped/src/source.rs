//! Host operations that may complete later.

use crossing_core::{HostAddr, Status};

/// Final outcome of a host operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub status: Status,
    pub bytes: u32,
}

impl Completion {
    pub fn new(status: Status, bytes: u32) -> Self {
        Self { status, bytes }
    }

    pub fn success(bytes: u32) -> Self {
        Self::new(Status::Success, bytes)
    }
}

/// A host operation in flight. Exactly one owner waits on it.
pub trait HostCompletion: Send {
    /// Block until the operation finishes.
    fn wait(self: Box<Self>) -> Completion;
}

/// What a host operation did when it was started.
pub enum Issue {
    /// Finished before returning.
    Complete(Completion),
    /// Refused before anything was started.
    Failed(Status),
    /// Accepted; completes later.
    Pending(Box<dyn HostCompletion>),
}

impl std::fmt::Debug for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Issue::Complete(c) => f.debug_tuple("Complete").field(c).finish(),
            Issue::Failed(s) => f.debug_tuple("Failed").field(s).finish(),
            Issue::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// A read, in host terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    /// Host handle of the object read from.
    pub target: HostAddr,
    /// Host address of the destination buffer.
    pub buffer: HostAddr,
    pub len: u32,
    /// File position, for positioned targets.
    pub position: u64,
    /// Whether the caller supplied an OVERLAPPED.
    pub overlapped: bool,
}

/// The host implementation behind `ReadOverlapped`.
pub trait OverlappedSource: Send + Sync {
    fn start_read(&self, request: &ReadRequest) -> Issue;
}

#[cfg(test)]
pub mod mock {
    //! A scripted source whose pending reads are completed by the test.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::{channel, Receiver, Sender};
    use std::sync::{Arc, Mutex};

    /// A pending read completed through its [`Sender`].
    pub struct ChannelCompletion {
        rx: Receiver<Completion>,
        waiting: Arc<AtomicUsize>,
    }

    impl HostCompletion for ChannelCompletion {
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

    pub enum Script {
        Complete(Completion),
        Fail(Status),
        Pending,
    }

    #[derive(Default)]
    pub struct MockSource {
        script: Mutex<VecDeque<(Script, Option<Receiver<Completion>>)>>,
        requests: Mutex<Vec<ReadRequest>>,
        waiting: Arc<AtomicUsize>,
    }

    impl MockSource {
        pub fn complete_with(&self, completion: Completion) {
            self.push(Script::Complete(completion), None);
        }

        pub fn fail_with(&self, status: Status) {
            self.push(Script::Fail(status), None);
        }

        /// Script a pending read; complete it by sending on the result.
        pub fn pend(&self) -> Sender<Completion> {
            let (tx, rx) = channel();
            self.push(Script::Pending, Some(rx));
            tx
        }

        fn push(&self, script: Script, rx: Option<Receiver<Completion>>) {
            self.script.lock().unwrap().push_back((script, rx));
        }

        pub fn requests(&self) -> Vec<ReadRequest> {
            self.requests.lock().unwrap().clone()
        }

        /// Pending reads somebody is currently blocked on.
        pub fn waiting(&self) -> usize {
            self.waiting.load(Ordering::SeqCst)
        }

        /// Spin until `n` pending reads are being waited on.
        pub fn wait_for_waiters(&self, n: usize) {
            let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
            while self.waiting() < n {
                assert!(std::time::Instant::now() < deadline, "no worker picked up the read");
                std::thread::yield_now();
            }
        }
    }

    impl OverlappedSource for MockSource {
        fn start_read(&self, request: &ReadRequest) -> Issue {
            self.requests.lock().unwrap().push(*request);
            match self.script.lock().unwrap().pop_front() {
                Some((Script::Complete(c), _)) => Issue::Complete(c),
                Some((Script::Fail(s), _)) => Issue::Failed(s),
                Some((Script::Pending, Some(rx))) => Issue::Pending(Box::new(ChannelCompletion {
                    rx,
                    waiting: self.waiting.clone(),
                })),
                _ => Issue::Failed(Status::InvalidParameter),
            }
        }
    }
}
