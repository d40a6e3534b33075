//! Handlers for the object opcodes.
//!
//! Every guest reference on a wrapper mirrors one host reference: `AddRef`
//! and `QueryInterface` take both, `Release` drops both. An interface kept
//! in private data holds one of each until it is replaced, removed, or its
//! holder is torn down.

use std::any::Any;
use std::sync::Arc;

use crossing_core::{
    AddressTranslator, CallRecord, DispatcherBuilder, GuestAddr, HostAddr, HostMemory,
    HostMemoryExt, Opcode, ProtocolError, Reply, Status,
};
use tracing::{trace, warn};

use crate::attachment::{Attachment, AttachmentKey};
use crate::error::{Error, Result};
use crate::interface::InterfaceId;
use crate::registry::Registry;
use crate::wrapper::{FacadeRef, Wrapper};

/// Host-side implementation of the `Object*` opcodes.
pub struct ObjectHandlers {
    registry: Registry,
    memory: Arc<dyn HostMemory>,
    translator: AddressTranslator,
}

impl ObjectHandlers {
    pub fn new(registry: Registry, memory: Arc<dyn HostMemory>, translator: AddressTranslator) -> Self {
        Self {
            registry,
            memory,
            translator,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Install a handler for every object opcode.
    pub fn register(self: Arc<Self>, builder: &mut DispatcherBuilder) -> std::result::Result<(), ProtocolError> {
        let this = self.clone();
        builder.register(Opcode::ObjectQueryInterface, move |r: &CallRecord| {
            reply(this.query_interface(r))
        })?;
        let this = self.clone();
        builder.register(Opcode::ObjectAddRef, move |r: &CallRecord| {
            reply(this.add_ref(r))
        })?;
        let this = self.clone();
        builder.register(Opcode::ObjectRelease, move |r: &CallRecord| {
            reply(this.release(r))
        })?;
        let this = self.clone();
        builder.register(Opcode::ObjectGetPrivateData, move |r: &CallRecord| {
            reply(this.get_private_data(r))
        })?;
        let this = self.clone();
        builder.register(Opcode::ObjectSetPrivateData, move |r: &CallRecord| {
            reply(this.set_private_data(r))
        })?;
        let this = self;
        builder.register(Opcode::ObjectSetPrivateDataInterface, move |r: &CallRecord| {
            reply(this.set_private_data_interface(r))
        })?;
        Ok(())
    }

    fn host(&self, addr: GuestAddr) -> HostAddr {
        self.translator.to_host(addr)
    }

    fn query_interface(&self, record: &CallRecord) -> Result<Reply> {
        let (facade, iid_addr, out) = (record.guest(0), record.guest(1), record.guest(2));
        if out.is_null() || iid_addr.is_null() {
            return Ok(Reply::status(Status::InvalidParameter));
        }
        let iid = InterfaceId::read_from(self.memory.as_ref(), self.host(iid_addr))?;
        let width = self.translator.guest_width();

        // Cleared up front: a faulting out pointer fails before any
        // reference is taken.
        let out_at = self.host(out);
        self.memory.write_ptr(out_at, width, 0)?;

        let found = self.registry.query(facade, iid)?;
        if let Some(host) = found.wrapper().host() {
            host.add_ref();
        }
        trace!(from = %facade, to = %found.addr(), %iid, "query interface");
        self.memory.write_ptr(out_at, width, found.addr().raw())?;
        Ok(Reply::ok(0))
    }

    fn add_ref(&self, record: &CallRecord) -> Result<Reply> {
        let found = self.registry.resolve(record.guest(0))?;
        let count = take_ref(&self.registry, found.wrapper())?;
        Ok(Reply::ok(count.into()))
    }

    fn release(&self, record: &CallRecord) -> Result<Reply> {
        let found = self.registry.resolve(record.guest(0))?;
        let count = drop_ref(&self.registry, found.wrapper())?;
        Ok(Reply::ok(count.into()))
    }

    fn get_private_data(&self, record: &CallRecord) -> Result<Reply> {
        let found = self.registry.resolve(record.guest(0))?;
        let (key_addr, size_addr, data_addr) = (record.guest(1), record.guest(2), record.guest(3));
        if key_addr.is_null() || size_addr.is_null() {
            return Ok(Reply::status(Status::InvalidParameter));
        }
        let key = AttachmentKey::read_from(self.memory.as_ref(), self.host(key_addr))?;
        let size_at = self.host(size_addr);
        let capacity = self.memory.read_u32(size_at)?;

        let data = match found.wrapper().private_data().get(key)? {
            Some(Attachment::Data(data)) => data,
            Some(Attachment::Interface(value)) => match value.downcast::<HeldInterface>() {
                Ok(held) => return self.get_interface(&held, size_at, capacity, data_addr),
                // Host-side interfaces are not visible to the guest.
                Err(_) => return self.not_found(size_at),
            },
            None => return self.not_found(size_at),
        };
        let len = data.len() as u32;
        self.memory.write_u32(size_at, len)?;
        if data_addr.is_null() {
            return Ok(Reply::ok(len.into()));
        }
        if capacity < len {
            return Ok(Reply::with_value(Status::BufferTooSmall, len.into()));
        }
        self.memory.write(self.host(data_addr), &data)?;
        Ok(Reply::ok(len.into()))
    }

    fn not_found(&self, size_at: HostAddr) -> Result<Reply> {
        self.memory.write_u32(size_at, 0)?;
        Ok(Reply::status(Status::NotFound))
    }

    /// Hand out a stored interface pointer with a new reference.
    fn get_interface(
        &self,
        held: &HeldInterface,
        size_at: HostAddr,
        capacity: u32,
        data_addr: GuestAddr,
    ) -> Result<Reply> {
        let width = self.translator.guest_width();
        let len = width.bytes() as u32;
        self.memory.write_u32(size_at, len)?;
        if data_addr.is_null() {
            return Ok(Reply::ok(len.into()));
        }
        if capacity < len {
            return Ok(Reply::with_value(Status::BufferTooSmall, len.into()));
        }
        let data_at = self.host(data_addr);
        self.memory.write_ptr(data_at, width, held.facade.addr().raw())?;
        if let Err(e) = take_ref(&self.registry, held.facade.wrapper()) {
            self.memory.write_ptr(data_at, width, 0)?;
            return Err(e);
        }
        Ok(Reply::ok(len.into()))
    }

    fn set_private_data(&self, record: &CallRecord) -> Result<Reply> {
        let found = self.registry.resolve(record.guest(0))?;
        let (key_addr, size, data_addr) = (record.guest(1), record.scalar_u32(2), record.guest(3));
        if key_addr.is_null() {
            return Ok(Reply::status(Status::InvalidParameter));
        }
        let key = AttachmentKey::read_from(self.memory.as_ref(), self.host(key_addr))?;
        let store = found.wrapper().private_data();

        if data_addr.is_null() {
            store.remove(key)?;
            return Ok(Reply::ok(0));
        }
        let data = self.memory.read_vec(self.host(data_addr), size as usize)?;
        store.set_data(key, &data)?;
        Ok(Reply::ok(0))
    }

    fn set_private_data_interface(&self, record: &CallRecord) -> Result<Reply> {
        let found = self.registry.resolve(record.guest(0))?;
        let (key_addr, interface) = (record.guest(1), record.guest(2));
        if key_addr.is_null() {
            return Ok(Reply::status(Status::InvalidParameter));
        }
        let key = AttachmentKey::read_from(self.memory.as_ref(), self.host(key_addr))?;
        let store = found.wrapper().private_data();

        if interface.is_null() {
            store.remove(key)?;
            return Ok(Reply::ok(0));
        }
        if key.is_reserved() {
            return Err(Error::ReservedKey(key));
        }
        let held = HeldInterface::take(self.registry.clone(), self.registry.resolve(interface)?)?;
        trace!(holder = %found.addr(), held = %held.facade.addr(), %key, "interface stored");
        let value: Arc<dyn Any + Send + Sync> = Arc::new(held);
        store.set_interface(key, value)?;
        Ok(Reply::ok(0))
    }
}

/// A guest interface kept alive by private data.
struct HeldInterface {
    registry: Registry,
    facade: FacadeRef,
}

impl HeldInterface {
    fn take(registry: Registry, facade: FacadeRef) -> Result<Self> {
        take_ref(&registry, facade.wrapper())?;
        Ok(Self { registry, facade })
    }
}

impl Drop for HeldInterface {
    fn drop(&mut self) {
        if let Err(e) = drop_ref(&self.registry, self.facade.wrapper()) {
            warn!(facade = %self.facade.addr(), error = %e, "stored interface already released");
        }
    }
}

/// One guest reference and its host reference.
fn take_ref(registry: &Registry, wrapper: &Arc<Wrapper>) -> Result<u32> {
    let count = registry.add_ref(wrapper)?;
    if let Some(host) = wrapper.host() {
        host.add_ref();
    }
    Ok(count)
}

/// Drop one guest reference, then its host reference.
fn drop_ref(registry: &Registry, wrapper: &Arc<Wrapper>) -> Result<u32> {
    let host = wrapper.host();
    let count = registry.release(wrapper)?;
    if let Some(host) = host {
        host.release();
    }
    Ok(count)
}

fn reply(result: Result<Reply>) -> Reply {
    result.unwrap_or_else(|e: Error| {
        trace!(error = %e, "object call failed");
        Reply::status(e.status())
    })
}
