//! The assembled bridge.

use std::sync::Arc;

use crossing_core::{
    AddressTranslator, BridgeConfig, CallRecord, Dispatcher, GuestAddr, GuestRam, HostMemory,
    Opcode, ProtocolError, Reply, PROTOCOL_VERSION,
};
use crossing_identity::{HostObject, InterfaceId, ObjectHandlers, Registry, WrapperClass};
use crossing_overlapped::{AsyncBridge, GuestExecutor, OverlappedHandlers, OverlappedSource};
use tracing::{debug, error};

use crate::error::{Error, Result};

/// Collects the host collaborators of a [`Bridge`].
pub struct BridgeBuilder {
    config: BridgeConfig,
    memory: Option<Arc<dyn HostMemory>>,
    source: Option<Arc<dyn OverlappedSource>>,
    executor: Option<Arc<dyn GuestExecutor>>,
    guest_version: u32,
}

impl BridgeBuilder {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            memory: None,
            source: None,
            executor: None,
            guest_version: PROTOCOL_VERSION,
        }
    }

    /// Use `memory` for guest RAM instead of a fresh [`GuestRam`].
    pub fn memory(mut self, memory: Arc<dyn HostMemory>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn source(mut self, source: Arc<dyn OverlappedSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn GuestExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Protocol version the guest thunks were built against.
    pub fn guest_version(mut self, version: u32) -> Self {
        self.guest_version = version;
        self
    }

    /// Wire everything together and freeze the dispatch table.
    pub fn build(self) -> Result<Bridge> {
        let config = self.config;
        config.validate()?;
        let source = self.source.ok_or(Error::Missing("an overlapped source"))?;
        let executor = self.executor.ok_or(Error::Missing("a guest executor"))?;

        let translator = AddressTranslator::new(config.guest_base, config.guest_width);
        let memory: Arc<dyn HostMemory> = match self.memory {
            Some(memory) => memory,
            None => Arc::new(GuestRam::new(translator.guest_base(), config.guest_ram_len()?)),
        };
        let registry = Registry::from_config(&config);
        let overlapped = AsyncBridge::new(memory.clone(), translator, source, executor, &config)?;

        let mut builder = Dispatcher::builder();
        builder.expect_version(self.guest_version)?;
        Arc::new(ObjectHandlers::new(registry.clone(), memory.clone(), translator))
            .register(&mut builder)?;
        Arc::new(OverlappedHandlers::new(overlapped.clone())).register(&mut builder)?;

        let missing = builder.missing();
        if !missing.is_empty() {
            return Err(Error::Incomplete(missing));
        }
        debug!(
            guest_width = ?config.guest_width,
            guest_base = config.guest_base,
            workers = config.workers,
            "bridge ready"
        );

        Ok(Bridge {
            config,
            translator,
            memory,
            registry,
            overlapped,
            dispatcher: builder.build(),
        })
    }
}

/// A guest/host call bridge.
///
/// Every guest call enters through [`call`](Self::call): the dispatcher runs
/// the handler for the opcode on the calling thread and returns its reply.
/// Host objects reach the guest through [`export_object`](Self::export_object)
/// and come back as facade addresses.
pub struct Bridge {
    config: BridgeConfig,
    translator: AddressTranslator,
    memory: Arc<dyn HostMemory>,
    registry: Registry,
    overlapped: AsyncBridge,
    dispatcher: Dispatcher,
}

impl Bridge {
    pub fn builder(config: BridgeConfig) -> BridgeBuilder {
        BridgeBuilder::new(config)
    }

    /// Run a guest call.
    ///
    /// # Panics
    ///
    /// On a protocol violation: a field count that does not match the
    /// opcode. Guest and host disagree on the call layout, and nothing the
    /// handler could do with the record would be meaningful.
    pub fn call(&self, opcode: Opcode, fields: &[u64]) -> Reply {
        match self.try_call(opcode, fields) {
            Ok(reply) => reply,
            Err(e) => {
                error!(?opcode, fields = fields.len(), error = %e, "protocol violation");
                panic!("protocol violation: {e}");
            }
        }
    }

    /// Run a guest call, returning protocol violations instead of panicking.
    pub fn try_call(&self, opcode: Opcode, fields: &[u64]) -> std::result::Result<Reply, ProtocolError> {
        let record = CallRecord::new(opcode, fields)?;
        self.dispatcher.dispatch(&record)
    }

    /// Run a guest call given its raw opcode number.
    pub fn call_raw(&self, opcode: u32, fields: &[u64]) -> std::result::Result<Reply, ProtocolError> {
        self.dispatcher.dispatch_raw(opcode, fields)
    }

    /// Hand `host` to the guest as its facade for `iid`.
    ///
    /// The guest receives one reference, mirroring the host reference the
    /// caller transfers with it. The same host object always comes back as
    /// the same wrapper.
    pub fn export_object(
        &self,
        host: &Arc<dyn HostObject>,
        class: &'static WrapperClass,
        iid: InterfaceId,
    ) -> Result<GuestAddr> {
        Ok(self.registry.acquire(host, class, iid)?.addr())
    }

    /// The host object behind a guest facade address.
    pub fn import_object(&self, facade: GuestAddr) -> Result<Arc<dyn HostObject>> {
        let found = self.registry.resolve(facade)?;
        found
            .wrapper()
            .host()
            .ok_or(Error::Identity(crossing_identity::Error::InvalidFacade(facade)))
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn translator(&self) -> &AddressTranslator {
        &self.translator
    }

    pub fn memory(&self) -> &Arc<dyn HostMemory> {
        &self.memory
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn overlapped(&self) -> &AsyncBridge {
        &self.overlapped
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Stop the completion workers once outstanding operations finish.
    pub fn shutdown(&self) {
        self.overlapped.shutdown();
    }
}
