//! Runtime facade
//!
//! Holds the configuration, the captured environment, one shared event
//! dispatcher and a machine registry. Everything built through the runtime
//! picks these up.

use std::sync::Arc;

use tracing::info;

use loom_composite::Composite;
use loom_core::{
    Component, ComponentBuilder, ConfigSource, Environment, EventDispatcher, Identity, LoomResult,
    SharedComponent, Telemetry,
};
use loom_machine::{Machine, MachineKey, MachineRegistry};

use crate::{init_tracing, RuntimeConfig, RuntimeResult, SystemConfigSource, TracingTelemetry};

/// Runtime statistics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub components_spawned: u64,
    pub composites_built: u64,
    pub machines_registered: u64,
}

/// Entry point tying configuration to components, composites and machines
pub struct Runtime {
    config: RuntimeConfig,
    environment: Environment,
    dispatcher: EventDispatcher,
    telemetry: Arc<dyn Telemetry>,
    registry: MachineRegistry,
    stats: RuntimeStats,
}

impl Runtime {
    /// Capture the host environment and build a runtime
    pub fn new(config: RuntimeConfig) -> Self {
        let source = SystemConfigSource::capture(&config.environment);
        Self::from_source(config, &source)
    }

    /// Install tracing from the logging section, then build
    pub fn init(config: RuntimeConfig) -> RuntimeResult<Self> {
        init_tracing(&config.logging)?;
        Ok(Self::new(config))
    }

    pub fn from_source(config: RuntimeConfig, source: &dyn ConfigSource) -> Self {
        let environment = Environment::from_source(source);
        let dispatcher = EventDispatcher::new(config.dispatch_config());
        info!(environment = %environment.id(), facts = environment.facts().len(), "runtime ready");
        Self {
            config,
            environment,
            dispatcher,
            telemetry: Arc::new(TracingTelemetry),
            registry: MachineRegistry::new(),
            stats: RuntimeStats::default(),
        }
    }

    /// Replace the audit sink used for components built from now on
    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn root_identity(&self, reason: &str) -> Identity {
        Identity::create_root(reason, &self.environment)
    }

    /// Builder preloaded with the runtime's environment, config, dispatcher and telemetry
    pub fn component(&self, identity: Identity) -> ComponentBuilder {
        Component::builder(identity)
            .environment(self.environment.clone())
            .config(self.config.component_config())
            .dispatcher(self.dispatcher.clone())
            .telemetry(self.telemetry.clone())
    }

    pub fn spawn_root(&mut self, reason: &str) -> LoomResult<SharedComponent> {
        let handle = self.component(self.root_identity(reason)).build_shared()?;
        self.stats.components_spawned += 1;
        Ok(handle)
    }

    pub fn spawn_child(&mut self, parent: &SharedComponent, reason: &str) -> LoomResult<SharedComponent> {
        let identity = parent.lock().create_child_identity(reason)?;
        let handle = self.component(identity).build_shared()?;
        self.stats.components_spawned += 1;
        Ok(handle)
    }

    pub fn composite(&mut self, name: &str) -> Composite {
        self.stats.composites_built += 1;
        Composite::with_config(
            name,
            &self.environment,
            self.config.composite_config(),
            self.dispatcher.clone(),
        )
    }

    pub fn machine(&self, name: &str) -> Machine {
        Machine::with_dispatcher(name, &self.environment, self.dispatcher.clone())
    }

    pub fn register(&mut self, machine: Machine) -> LoomResult<MachineKey> {
        let key = self.registry.insert(machine)?;
        self.stats.machines_registered += 1;
        Ok(key)
    }

    pub fn registry(&self) -> &MachineRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut MachineRegistry {
        &mut self.registry
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn stats(&self) -> RuntimeStats {
        self.stats.clone()
    }

    /// Terminate every registered machine
    pub fn shutdown(&mut self, reason: &str) {
        self.registry.terminate_all(reason);
        info!(reason, machines = self.registry.len(), "runtime shut down");
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("environment", &self.environment.id())
            .field("registry", &self.registry)
            .field("stats", &self.stats)
            .finish()
    }
}
