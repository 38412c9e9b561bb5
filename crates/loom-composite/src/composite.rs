//! Composite - a named group of components wired by typed connections

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use loom_core::{
    BreakerState, ComponentId, CompositeId, ConnectionId, ConnectionType, Environment, Event,
    EventDispatcher, EventKind, Identity, LifecycleState, LoomError, LoomResult, Phase,
    SharedComponent,
};

use crate::flow::{self, FlowReport};
use crate::topology::FlowGraph;
use crate::{BreakerConfig, Connection, ConnectionOptions};

/// Composite state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompositeState {
    Assembling,
    Ready,
    Active,
    Terminated,
}

impl CompositeState {
    /// READY or ACTIVE: may be handed to a machine and run flows
    #[inline]
    pub fn is_ready_equivalent(self) -> bool {
        matches!(self, CompositeState::Ready | CompositeState::Active)
    }
}

impl fmt::Display for CompositeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompositeState::Assembling => f.write_str("ASSEMBLING"),
            CompositeState::Ready => f.write_str("READY"),
            CompositeState::Active => f.write_str("ACTIVE"),
            CompositeState::Terminated => f.write_str("TERMINATED"),
        }
    }
}

/// Composite configuration
#[derive(Clone, Debug, Default)]
pub struct CompositeConfig {
    /// Breaker settings for connections without an override
    pub breaker: BreakerConfig,
    /// Abort a flow on its first failure
    pub fail_fast: bool,
}

/// Composite statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompositeMetrics {
    pub members: usize,
    pub connections: usize,
    pub flows_executed: u64,
    pub items_processed: u64,
    pub items_failed: u64,
    pub items_short_circuited: u64,
    pub open_breakers: usize,
}

/// Named group of components and the connections between them
pub struct Composite {
    id: CompositeId,
    name: String,
    identity: Identity,
    state: CompositeState,
    config: CompositeConfig,
    members: BTreeMap<ComponentId, SharedComponent>,
    connections: Vec<Connection>,
    next_connection: u64,
    dispatcher: EventDispatcher,
    totals: Mutex<CompositeMetrics>,
}

impl Composite {
    pub fn new(name: &str, environment: &Environment) -> Self {
        Self::with_config(name, environment, CompositeConfig::default(), EventDispatcher::default())
    }

    pub fn with_config(
        name: &str,
        environment: &Environment,
        config: CompositeConfig,
        dispatcher: EventDispatcher,
    ) -> Self {
        let identity = Identity::create_root(&format!("composite:{name}"), environment);
        Self {
            id: CompositeId::generate(),
            name: name.to_string(),
            identity,
            state: CompositeState::Assembling,
            config,
            members: BTreeMap::new(),
            connections: Vec::new(),
            next_connection: 1,
            dispatcher,
            totals: Mutex::new(CompositeMetrics::default()),
        }
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    pub fn add_component(&mut self, handle: SharedComponent) -> LoomResult<ComponentId> {
        self.ensure_not_terminated("add_component")?;

        let (id, state) = {
            let component = handle.lock();
            (component.id(), component.state())
        };
        if self.members.contains_key(&id) {
            return Err(LoomError::DuplicateComponent(id));
        }
        if state.is_terminating_or_terminal() {
            return Err(LoomError::invalid_operation(
                self.label(),
                "add_component",
                format!("component {} is {state}", id.short()),
            ));
        }

        self.members.insert(id, handle);
        debug!(composite = %self.id, component = %id.short(), "component added");
        Ok(id)
    }

    /// Remove a member and every connection touching it
    pub fn remove_component(&mut self, id: ComponentId) -> LoomResult<SharedComponent> {
        self.ensure_not_terminated("remove_component")?;
        let handle = self
            .members
            .remove(&id)
            .ok_or(LoomError::UnknownComponent(id))?;
        self.connections.retain(|c| !c.touches(id));
        debug!(composite = %self.id, component = %id.short(), "component removed");
        Ok(handle)
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    pub fn connect(
        &mut self,
        source: ComponentId,
        target: ComponentId,
        kind: ConnectionType,
    ) -> LoomResult<&Connection> {
        self.connect_with(source, target, kind, ConnectionOptions::default())
    }

    pub fn connect_with(
        &mut self,
        source: ComponentId,
        target: ComponentId,
        kind: ConnectionType,
        options: ConnectionOptions,
    ) -> LoomResult<&Connection> {
        self.ensure_not_terminated("connect")?;

        if source == target {
            return Err(LoomError::DuplicateComponent(source));
        }
        for endpoint in [source, target] {
            if !self.members.contains_key(&endpoint) {
                return Err(LoomError::UnknownComponent(endpoint));
            }
        }
        self.ensure_endpoints_live(source, target)?;

        if self.connections.iter().any(|c| c.links(source, target, kind)) {
            return Err(LoomError::DuplicateConnection {
                upstream: source,
                downstream: target,
                kind,
            });
        }
        if kind.is_acyclic() && self.graph(kind).would_create_cycle(source, target) {
            return Err(LoomError::CycleDetected {
                upstream: source,
                downstream: target,
                kind,
            });
        }

        let id = ConnectionId::new(self.next_connection);
        self.next_connection += 1;
        let breaker = options.breaker.unwrap_or_else(|| self.config.breaker.clone());
        let index = self.connections.len();
        self.connections.push(Connection::new(
            id,
            source,
            target,
            kind,
            options.critical,
            breaker,
        ));

        debug!(
            composite = %self.id,
            connection = %id,
            source = %source.short(),
            target = %target.short(),
            kind = %kind,
            critical = options.critical,
            "components connected"
        );
        Ok(&self.connections[index])
    }

    pub fn disconnect(&mut self, id: ConnectionId) -> LoomResult<()> {
        let before = self.connections.len();
        self.connections.retain(|c| c.id() != id);
        if self.connections.len() == before {
            return Err(LoomError::invalid_operation(
                self.label(),
                "disconnect",
                format!("unknown connection {id}"),
            ));
        }
        Ok(())
    }

    /// Both endpoints are locked in ascending id order
    fn ensure_endpoints_live(&self, source: ComponentId, target: ComponentId) -> LoomResult<()> {
        let (low, high) = if source < target {
            (source, target)
        } else {
            (target, source)
        };
        let (Some(low_handle), Some(high_handle)) = (self.members.get(&low), self.members.get(&high))
        else {
            return Err(LoomError::UnknownComponent(source));
        };
        let low_guard = low_handle.lock();
        let high_guard = high_handle.lock();
        for component in [&*low_guard, &*high_guard] {
            if component.state().is_terminating_or_terminal() {
                return Err(LoomError::invalid_operation(
                    self.label(),
                    "connect",
                    format!("component {} is {}", component.id().short(), component.state()),
                ));
            }
        }
        Ok(())
    }

    /// Graph of one connection kind over all members
    pub fn graph(&self, kind: ConnectionType) -> FlowGraph {
        FlowGraph::from_edges(
            self.members.keys().copied(),
            self.connections
                .iter()
                .filter(|c| c.kind() == kind)
                .map(|c| (c.source(), c.target())),
        )
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// ASSEMBLING -> READY
    pub fn mark_ready(&mut self) -> LoomResult<()> {
        if self.state != CompositeState::Assembling {
            return Err(self.rejected("mark_ready", format!("composite is {}", self.state)));
        }
        if self.members.is_empty() {
            return Err(self.rejected("mark_ready", "composite has no members"));
        }
        if let Some(id) = self.first_member_in(|s| s.is_terminating_or_terminal()) {
            return Err(self.rejected("mark_ready", format!("member {} is terminated", id.short())));
        }
        self.set_state(CompositeState::Ready);
        Ok(())
    }

    /// READY -> ACTIVE, bringing members in CONCEPTION or READY to ACTIVE.
    ///
    /// Members already operational or degraded are left as they are. Any
    /// other member state rejects the call before a member is touched.
    pub fn activate(&mut self) -> LoomResult<()> {
        match self.state {
            CompositeState::Active => return Ok(()),
            CompositeState::Ready => {}
            other => return Err(self.rejected("activate", format!("composite is {other}"))),
        }

        if let Some(id) = self.first_member_in(|s| !activation_accepts(s)) {
            let state = self.members[&id].lock().state();
            return Err(self.rejected(
                "activate",
                format!("member {} is {state}", id.short()),
            ));
        }

        for handle in self.members.values() {
            let mut component = handle.lock();
            if component.state() == LifecycleState::Conception {
                component.initialize()?;
            }
            if component.state() == LifecycleState::Ready {
                component.activate()?;
            }
        }
        self.set_state(CompositeState::Active);
        Ok(())
    }

    /// Terminate every member best-effort. Returns how many were terminated.
    pub fn terminate(&mut self, reason: &str) -> usize {
        if self.state == CompositeState::Terminated {
            return 0;
        }
        let mut terminated = 0;
        for handle in self.members.values() {
            if handle.lock().terminate(reason).is_some() {
                terminated += 1;
            }
        }
        self.set_state(CompositeState::Terminated);
        info!(composite = %self.id, name = %self.name, reason, terminated, "composite terminated");
        terminated
    }

    fn set_state(&mut self, to: CompositeState) {
        let from = self.state;
        self.state = to;
        debug!(composite = %self.id, from = %from, to = %to, "composite state");
    }

    // ------------------------------------------------------------------
    // Data flow
    // ------------------------------------------------------------------

    /// Push `inputs` through the data-flow graph.
    ///
    /// Returns a partial-success report; with fail-fast configured the first
    /// failure is returned as the error instead.
    pub fn execute_data_flow(&self, inputs: Vec<Value>) -> LoomResult<FlowReport> {
        if !self.state.is_ready_equivalent() {
            return Err(self.rejected("execute_data_flow", format!("composite is {}", self.state)));
        }
        flow::execute(self, inputs)
    }

    pub(crate) fn publish_breaker_transitions(&self) {
        for connection in &self.connections {
            for transition in connection.breaker().drain_transitions() {
                if transition.to == BreakerState::Open && connection.is_critical() {
                    warn!(
                        composite = %self.id,
                        connection = %connection.id(),
                        "critical connection opened"
                    );
                }
                self.dispatcher.publish(Event::new(
                    self.identity.clone(),
                    EventKind::BreakerTransition {
                        connection: connection.id(),
                        from: transition.from,
                        to: transition.to,
                    },
                ));
            }
        }
    }

    pub(crate) fn record_flow(&self, report: &FlowReport) {
        {
            let mut totals = self.totals.lock();
            totals.flows_executed += 1;
            totals.items_processed += report.processed as u64;
            totals.items_failed += report.failed as u64;
            totals.items_short_circuited += report.short_circuited as u64;
        }
        self.dispatcher.publish(Event::new(
            self.identity.clone(),
            EventKind::FlowCompleted {
                processed: report.processed,
                failed: report.failed,
                short_circuited: report.short_circuited,
            },
        ));
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn id(&self) -> CompositeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn state(&self) -> CompositeState {
        self.state
    }

    pub fn config(&self) -> &CompositeConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn members(&self) -> Vec<ComponentId> {
        self.members.keys().copied().collect()
    }

    pub fn member(&self, id: ComponentId) -> Option<&SharedComponent> {
        self.members.get(&id)
    }

    pub fn contains(&self, id: ComponentId) -> bool {
        self.members.contains_key(&id)
    }

    pub(crate) fn member_handles(&self) -> impl Iterator<Item = (&ComponentId, &SharedComponent)> {
        self.members.iter()
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id() == id)
    }

    pub fn breaker_states(&self) -> Vec<(ConnectionId, BreakerState)> {
        self.connections
            .iter()
            .map(|c| (c.id(), c.breaker_state()))
            .collect()
    }

    /// Some critical connection has an OPEN breaker
    pub fn has_open_critical_breaker(&self) -> bool {
        self.connections
            .iter()
            .any(|c| c.is_critical() && c.breaker_state() == BreakerState::Open)
    }

    /// Every critical connection's breaker is CLOSED
    pub fn critical_breakers_closed(&self) -> bool {
        self.connections
            .iter()
            .filter(|c| c.is_critical())
            .all(|c| c.breaker_state() == BreakerState::Closed)
    }

    pub fn metrics(&self) -> CompositeMetrics {
        let totals = *self.totals.lock();
        CompositeMetrics {
            members: self.members.len(),
            connections: self.connections.len(),
            open_breakers: self
                .connections
                .iter()
                .filter(|c| c.breaker_state() == BreakerState::Open)
                .count(),
            ..totals
        }
    }

    pub(crate) fn label(&self) -> String {
        format!("composite {}", self.name)
    }

    fn rejected(&self, operation: &str, reason: impl Into<String>) -> LoomError {
        LoomError::invalid_operation(self.label(), operation, reason)
    }

    fn ensure_not_terminated(&self, operation: &str) -> LoomResult<()> {
        if self.state == CompositeState::Terminated {
            return Err(self.rejected(operation, "composite is terminated"));
        }
        Ok(())
    }

    fn first_member_in(&self, predicate: impl Fn(LifecycleState) -> bool) -> Option<ComponentId> {
        self.members
            .iter()
            .find(|(_, handle)| predicate(handle.lock().state()))
            .map(|(id, _)| *id)
    }
}

fn activation_accepts(state: LifecycleState) -> bool {
    matches!(state, LifecycleState::Conception | LifecycleState::Ready)
        || matches!(state.phase(), Phase::Operational | Phase::Degradation)
}

impl fmt::Debug for Composite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Composite")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("members", &self.members.len())
            .field("connections", &self.connections.len())
            .finish()
    }
}
