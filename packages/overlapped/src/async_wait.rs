//! Awaiting guest events from async code.
//!
//! Enable the `async` feature to use these:
//!
//! ```toml
//! [dependencies]
//! crossing-overlapped = { version = "0.1", features = ["async"] }
//! ```
//!
//! Waits run on tokio's blocking pool, so they never stall the runtime. A
//! blocking-pool thread has no completion routines queued to it, so these
//! waits are never alertable.

use std::time::Duration;

use async_trait::async_trait;
use crossing_core::{GuestAddr, Status};

use crate::bridge::AsyncBridge;
use crate::error::{Error, Result};

/// Async versions of the bridge's blocking waits.
#[async_trait]
pub trait AsyncWait: Send + Sync {
    /// Wait for a guest event. `None` waits forever.
    async fn wait_event_async(&self, handle: GuestAddr, timeout: Option<Duration>) -> Result<Status>;

    /// Wait until no operation is outstanding. Returns false on timeout.
    async fn wait_idle_async(&self, timeout: Option<Duration>) -> Result<bool>;
}

#[async_trait]
impl AsyncWait for AsyncBridge {
    async fn wait_event_async(&self, handle: GuestAddr, timeout: Option<Duration>) -> Result<Status> {
        let bridge = self.clone();
        tokio::task::spawn_blocking(move || bridge.wait_event(handle, false, timeout))
            .await
            .map_err(|e| Error::Join(e.to_string()))?
    }

    async fn wait_idle_async(&self, timeout: Option<Duration>) -> Result<bool> {
        let bridge = self.clone();
        tokio::task::spawn_blocking(move || bridge.wait_idle(timeout))
            .await
            .map_err(|e| Error::Join(e.to_string()))
    }
}
