//! Crossing Identity: one wrapper per host object
//!
//! A host object handed to the guest is represented by exactly one
//! [`Wrapper`], however many times and through whichever interface it
//! crosses. A wrapper exposes up to four facades (views for different
//! interface generations) that share one reference count.
//!
//! - [`Registry`]: wrap, resolve, QueryInterface, AddRef and Release
//! - [`HostObject`]: what the bridge needs from a host object
//! - [`WrapperClass`] / [`FacadeDesc`]: the static shape of a wrapper
//! - [`ObjectHandlers`]: the `Object*` opcodes on top of the registry
//!
//! The host object owns its wrapper through an attachment stored under
//! [`WRAPPER_LINK_KEY`]; destroying the host object retires the wrapper.

mod attachment;
mod error;
mod handlers;
pub mod host;
mod interface;
mod registry;
mod wrapper;

pub use attachment::{Attachment, AttachmentKey, PrivateStore, WRAPPER_LINK_KEY};
pub use error::{Error, Result};
pub use handlers::ObjectHandlers;
pub use host::HostObject;
pub use interface::{FacadeDesc, InterfaceId, WrapperClass, IID_UNKNOWN};
pub use registry::{Registry, RegistryStats};
pub use wrapper::{Facade, FacadeRef, Wrapper, WrapperLink};
