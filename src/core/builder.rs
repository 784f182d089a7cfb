use std::sync::Arc;

use crate::{
    core::{Config, registry::WorkerRegistry, supervisor::Supervisor},
    credential::{CredentialVerifier, TokenShapeVerifier},
    runtime::{ProcessGroup, Sandbox},
    store::{MemoryStore, WorkerStore},
    subscribers::{Subscribe, SubscriberSet},
};

/// Builder for a [`Supervisor`] and its collaborators.
///
/// Anything not supplied falls back to an in-memory store, the offline
/// token-shape verifier and the process-group sandbox.
pub struct SupervisorBuilder {
    cfg: Config,
    store: Option<Arc<dyn WorkerStore>>,
    verifier: Option<Arc<dyn CredentialVerifier>>,
    sandbox: Option<Arc<dyn Sandbox>>,
    registry: Option<Arc<WorkerRegistry>>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl SupervisorBuilder {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            store: None,
            verifier: None,
            sandbox: None,
            registry: None,
            subscribers: Vec::new(),
        }
    }

    /// Persistence collaborator.
    pub fn with_store(mut self, store: Arc<dyn WorkerStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Credential verification collaborator.
    pub fn with_verifier(mut self, verifier: Arc<dyn CredentialVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Hook applied to every worker command before spawn.
    pub fn with_sandbox(mut self, sandbox: Arc<dyn Sandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    /// Shares an existing registry instead of creating one.
    pub fn with_registry(mut self, registry: Arc<WorkerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets event subscribers.
    ///
    /// Each subscriber gets its own bounded queue and worker task.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Wires everything together and starts forwarding bus events to subscribers.
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Arc<Supervisor> {
        let bus = crate::events::Bus::new(self.cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::with_bus(self.subscribers, bus.clone()));

        let sup = Arc::new(Supervisor::new_internal(
            self.cfg,
            bus,
            subs,
            self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
            self.verifier
                .unwrap_or_else(|| Arc::new(TokenShapeVerifier::new())),
            self.sandbox.unwrap_or_else(|| Arc::new(ProcessGroup)),
            self.registry.unwrap_or_default(),
        ));
        sup.subscriber_listener();
        sup
    }
}
