//! Private data attached by GUID.
//!
//! Host objects carry attachments the bridge uses to find its own state
//! without an external table. Wrappers carry the same kind of store for the
//! guest's private data.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crossing_core::{HostAddr, HostMemory};
use uuid::Uuid;

use crate::error::{Error, Result};

/// GUID naming one attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttachmentKey(Uuid);

/// Key under which a host object carries the link to its wrapper.
///
/// Reserved: guest code can neither read nor overwrite it.
pub const WRAPPER_LINK_KEY: AttachmentKey =
    AttachmentKey::from_u128(0x2c49_2f6e_8d1b_4a57_9e0f_64d3_1c7a_b5e2);

impl AttachmentKey {
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Read a GUID in its in-memory (mixed-endian) layout.
    pub fn read_from(memory: &dyn HostMemory, addr: HostAddr) -> crossing_core::Result<Self> {
        let mut bytes = [0u8; 16];
        memory.read(addr, &mut bytes)?;
        Ok(Self(Uuid::from_bytes_le(bytes)))
    }

    /// The GUID in its in-memory layout.
    pub fn to_bytes_le(&self) -> [u8; 16] {
        self.0.to_bytes_le()
    }

    pub fn is_reserved(&self) -> bool {
        *self == WRAPPER_LINK_KEY
    }
}

impl std::fmt::Display for AttachmentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.braced())
    }
}

/// One stored attachment.
#[derive(Clone)]
pub enum Attachment {
    /// An opaque blob, copied in and out.
    Data(Vec<u8>),
    /// A host-side object, shared by reference.
    Interface(Arc<dyn Any + Send + Sync>),
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Attachment::Data(data) => f.debug_tuple("Data").field(&data.len()).finish(),
            Attachment::Interface(_) => f.write_str("Interface(..)"),
        }
    }
}

/// Keyed attachments of one object.
#[derive(Debug, Default)]
pub struct PrivateStore {
    entries: Mutex<HashMap<AttachmentKey, Attachment>>,
}

impl PrivateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a copy of `data` under `key`, replacing what was there.
    pub fn set_data(&self, key: AttachmentKey, data: &[u8]) -> Result<()> {
        self.insert(key, Attachment::Data(data.to_vec()))
    }

    /// Store a shared object under `key`.
    pub fn set_interface(&self, key: AttachmentKey, value: Arc<dyn Any + Send + Sync>) -> Result<()> {
        self.insert(key, Attachment::Interface(value))
    }

    fn insert(&self, key: AttachmentKey, attachment: Attachment) -> Result<()> {
        if key.is_reserved() {
            return Err(Error::ReservedKey(key));
        }
        let previous = self.lock()?.insert(key, attachment);
        drop(previous);
        Ok(())
    }

    pub fn get(&self, key: AttachmentKey) -> Result<Option<Attachment>> {
        Ok(self.lock()?.get(&key).cloned())
    }

    /// Remove `key`; returns whether something was stored.
    pub fn remove(&self, key: AttachmentKey) -> Result<bool> {
        if key.is_reserved() {
            return Err(Error::ReservedKey(key));
        }
        let removed = self.lock()?.remove(&key);
        Ok(removed.is_some())
    }

    /// Empty the store. The entries are handed back so the caller drops
    /// them after the store lock is released.
    pub fn take_all(&self) -> Vec<Attachment> {
        match self.entries.lock() {
            Ok(mut entries) => entries.drain().map(|(_, attachment)| attachment).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<AttachmentKey, Attachment>>> {
        self.entries
            .lock()
            .map_err(|_| crossing_core::Error::Poisoned("private store").into())
    }
}
