//! The host side of a wrapped object.

use std::any::Any;
use std::sync::Arc;

use crossing_core::{HostAddr, Status};

use crate::attachment::AttachmentKey;
use crate::interface::InterfaceId;

/// A reference-counted host object that can be handed to the guest.
///
/// The bridge keeps no table from host objects to wrappers. It stores a link
/// on the object itself through [`set_attachment`](Self::set_attachment),
/// so the object must keep attachments until it is destroyed and drop them
/// when it is.
pub trait HostObject: Send + Sync {
    /// Identity of the object in host memory.
    fn host_addr(&self) -> HostAddr;

    /// Take a host reference. Returns the new count.
    fn add_ref(&self) -> u32;

    /// Drop a host reference. Returns the new count.
    fn release(&self) -> u32;

    /// Whether the host object itself implements `iid`.
    ///
    /// Only used for diagnostics when a wrapper class lacks a facade the
    /// host could have served.
    fn supports(&self, _iid: InterfaceId) -> bool {
        false
    }

    fn attachment(&self, key: AttachmentKey) -> Option<Arc<dyn Any + Send + Sync>>;

    /// Attach `value` under `key`, replacing any previous value.
    fn set_attachment(&self, key: AttachmentKey, value: Arc<dyn Any + Send + Sync>)
        -> Result<(), Status>;

    fn remove_attachment(&self, key: AttachmentKey) -> Option<Arc<dyn Any + Send + Sync>>;
}
