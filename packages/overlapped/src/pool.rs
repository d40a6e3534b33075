//! Fixed pool of completion workers fed by a bounded queue.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::event::lock;

/// Work handed to a completion worker.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Worker threads that block on host completions.
///
/// Submission never blocks: when every worker is busy and the queue is full
/// the job is handed back.
pub struct WorkerPool {
    sender: Mutex<Option<SyncSender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(workers: usize, queue_depth: usize) -> Result<Self> {
        let (sender, receiver) = mpsc::sync_channel::<Job>(queue_depth);
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers.max(1))
            .map(|i| {
                let receiver = receiver.clone();
                thread::Builder::new()
                    .name(format!("crossing-worker-{i}"))
                    .spawn(move || Self::work(receiver))
                    .map_err(|e| Error::Core(e.into()))
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(workers = handles.len(), queue_depth, "worker pool started");

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
        })
    }

    fn work(receiver: Arc<Mutex<Receiver<Job>>>) {
        loop {
            let job = lock(&receiver).recv();
            let Ok(job) = job else {
                break;
            };
            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                warn!(worker = ?thread::current().name(), "completion job panicked");
            }
        }
    }

    /// Queue `job`. On failure the job comes back with the reason.
    pub fn submit(&self, job: Job) -> std::result::Result<(), (Error, Job)> {
        let sender = lock(&self.sender);
        let Some(sender) = sender.as_ref() else {
            return Err((Error::Stopped, job));
        };
        sender.try_send(job).map_err(|e| match e {
            TrySendError::Full(job) => (Error::QueueFull, job),
            TrySendError::Disconnected(job) => (Error::Stopped, job),
        })
    }

    pub fn is_running(&self) -> bool {
        lock(&self.sender).is_some()
    }

    /// Stop accepting work and wait for queued jobs to finish.
    ///
    /// Must not be called from a job.
    pub fn shutdown(&self) {
        drop(lock(&self.sender).take());
        let workers = std::mem::take(&mut *lock(&self.workers));
        for worker in workers {
            if worker.join().is_err() {
                warn!("completion worker panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Not joined: the last owner may be a worker thread.
        drop(lock(&self.sender).take());
    }
}
