//! Machine - orchestrates ready composites and tracks their health
//!
//! A machine degrades as soon as any owned composite has an OPEN breaker on
//! a critical connection, and returns to ACTIVE once every critical breaker
//! is CLOSED again. HALF_OPEN keeps the current state.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use tracing::{info, warn};

use loom_composite::{Composite, CompositeState, FlowReport};
use loom_core::{
    CompositeId, Environment, Event, EventDispatcher, EventKind, Identity, LifecycleState,
    LoomError, LoomResult, MachineId, Timestamp,
};

/// Reduced lifecycle of a machine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MachineState {
    Initializing,
    Active,
    Degraded,
    Terminating,
    Terminated,
}

impl MachineState {
    /// Matching component lifecycle state, used in state-change events
    pub fn as_lifecycle(self) -> LifecycleState {
        match self {
            MachineState::Initializing => LifecycleState::Initializing,
            MachineState::Active => LifecycleState::Active,
            MachineState::Degraded => LifecycleState::Degraded,
            MachineState::Terminating => LifecycleState::Terminating,
            MachineState::Terminated => LifecycleState::Terminated,
        }
    }

    #[inline]
    pub fn is_running(self) -> bool {
        matches!(self, MachineState::Active | MachineState::Degraded)
    }

    pub fn can_transition_to(self, to: MachineState) -> bool {
        use MachineState::*;
        matches!(
            (self, to),
            (Initializing, Active)
                | (Active, Degraded)
                | (Degraded, Active)
                | (Initializing, Terminating)
                | (Active, Terminating)
                | (Degraded, Terminating)
                | (Terminating, Terminated)
        )
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.as_lifecycle(), f)
    }
}

/// Machine statistics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MachineMetrics {
    pub composites: usize,
    pub flows_executed: u64,
    pub degradations: u64,
    pub recoveries: u64,
    pub state: Option<MachineState>,
}

/// Owns composites and coordinates their execution
pub struct Machine {
    id: MachineId,
    name: String,
    identity: Identity,
    state: MachineState,
    composites: BTreeMap<CompositeId, Composite>,
    dispatcher: EventDispatcher,
    metrics: MachineMetrics,
    created_at: Timestamp,
}

impl Machine {
    pub fn new(name: &str, environment: &Environment) -> Self {
        Self::with_dispatcher(name, environment, EventDispatcher::default())
    }

    pub fn with_dispatcher(name: &str, environment: &Environment, dispatcher: EventDispatcher) -> Self {
        Self {
            id: MachineId::generate(),
            name: name.to_string(),
            identity: Identity::create_root(&format!("machine:{name}"), environment),
            state: MachineState::Initializing,
            composites: BTreeMap::new(),
            dispatcher,
            metrics: MachineMetrics::default(),
            created_at: Timestamp::now(),
        }
    }

    /// Take ownership of a READY or ACTIVE composite
    pub fn add_composite(&mut self, mut composite: Composite) -> LoomResult<CompositeId> {
        if matches!(self.state, MachineState::Terminating | MachineState::Terminated) {
            return Err(self.rejected("add_composite", format!("machine is {}", self.state)));
        }
        if !composite.state().is_ready_equivalent() {
            return Err(LoomError::InvalidCompositeType {
                composite: composite.id(),
                reason: format!("composite `{}` is {}", composite.name(), composite.state()),
            });
        }
        let id = composite.id();
        if self.composites.contains_key(&id) {
            return Err(self.rejected("add_composite", format!("composite {id} already owned")));
        }

        if self.state.is_running() && composite.state() == CompositeState::Ready {
            composite.activate()?;
        }
        info!(machine = %self.name, composite = %composite.name(), "composite added");
        self.composites.insert(id, composite);
        self.evaluate_health();
        Ok(id)
    }

    pub fn remove_composite(&mut self, id: CompositeId) -> LoomResult<Composite> {
        let composite = self
            .composites
            .remove(&id)
            .ok_or(LoomError::UnknownComposite(id))?;
        self.evaluate_health();
        Ok(composite)
    }

    /// INITIALIZING -> ACTIVE, activating every owned composite
    pub fn start(&mut self) -> LoomResult<()> {
        if self.state != MachineState::Initializing {
            return Err(self.rejected("start", format!("machine is {}", self.state)));
        }
        for composite in self.composites.values_mut() {
            composite.activate()?;
        }
        self.set_state(MachineState::Active);
        self.evaluate_health();
        Ok(())
    }

    /// Run a flow on an owned composite, then re-evaluate health
    pub fn execute_data_flow(
        &mut self,
        composite: CompositeId,
        inputs: Vec<Value>,
    ) -> LoomResult<FlowReport> {
        if !self.state.is_running() {
            return Err(self.rejected("execute_data_flow", format!("machine is {}", self.state)));
        }
        let result = self
            .composites
            .get(&composite)
            .ok_or(LoomError::UnknownComposite(composite))?
            .execute_data_flow(inputs);
        self.metrics.flows_executed += 1;
        self.evaluate_health();
        result
    }

    /// Degrade on an OPEN critical breaker, recover once all are CLOSED
    pub fn evaluate_health(&mut self) -> MachineState {
        match self.state {
            MachineState::Active => {
                if let Some(composite) = self.composites.values().find(|c| c.has_open_critical_breaker()) {
                    warn!(
                        machine = %self.name,
                        composite = %composite.name(),
                        "critical breaker open, degrading"
                    );
                    self.metrics.degradations += 1;
                    self.set_state(MachineState::Degraded);
                }
            }
            MachineState::Degraded => {
                if self.composites.values().all(Composite::critical_breakers_closed) {
                    info!(machine = %self.name, "critical breakers closed, recovering");
                    self.metrics.recoveries += 1;
                    self.set_state(MachineState::Active);
                }
            }
            _ => {}
        }
        self.state
    }

    /// Terminate every composite. Idempotent.
    pub fn terminate(&mut self, reason: &str) {
        if matches!(self.state, MachineState::Terminating | MachineState::Terminated) {
            return;
        }
        self.set_state(MachineState::Terminating);
        for composite in self.composites.values_mut() {
            composite.terminate(reason);
        }
        self.set_state(MachineState::Terminated);
        info!(machine = %self.name, reason, "machine terminated");
    }

    fn set_state(&mut self, to: MachineState) {
        let from = self.state;
        if from == to || !from.can_transition_to(to) {
            return;
        }
        self.state = to;
        self.dispatcher.publish(Event::new(
            self.identity.clone(),
            EventKind::StateChanged {
                from: from.as_lifecycle(),
                to: to.as_lifecycle(),
            },
        ));
    }

    fn rejected(&self, operation: &str, reason: String) -> LoomError {
        LoomError::invalid_operation(format!("machine {}", self.name), operation, reason)
    }

    pub fn id(&self) -> MachineId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn composite(&self, id: CompositeId) -> Option<&Composite> {
        self.composites.get(&id)
    }

    pub fn composite_mut(&mut self, id: CompositeId) -> Option<&mut Composite> {
        self.composites.get_mut(&id)
    }

    pub fn composites(&self) -> impl Iterator<Item = &Composite> {
        self.composites.values()
    }

    pub fn owns(&self, id: CompositeId) -> bool {
        self.composites.contains_key(&id)
    }

    pub fn metrics(&self) -> MachineMetrics {
        MachineMetrics {
            composites: self.composites.len(),
            state: Some(self.state),
            ..self.metrics.clone()
        }
    }
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("composites", &self.composites.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_composite::{BreakerConfig, CircuitBreaker, ConnectionOptions};
    use loom_core::{Component, ConnectionId, ConnectionType, SharedComponent};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn env() -> Environment {
        Environment::new("machine-test")
    }

    fn member(reason: &str) -> SharedComponent {
        Component::create(Identity::create_root(reason, &env()), &env())
            .unwrap()
            .into_shared()
    }

    /// Two-member composite with one critical data-flow connection
    fn critical_pair() -> (Composite, ConnectionId) {
        let mut composite = Composite::new("pair", &env());
        let a = composite.add_component(member("a")).unwrap();
        let b = composite.add_component(member("b")).unwrap();
        let connection = composite
            .connect_with(
                a,
                b,
                ConnectionType::DataFlow,
                ConnectionOptions::critical()
                    .with_breaker(BreakerConfig::default().with_threshold(1)),
            )
            .unwrap()
            .id();
        composite.mark_ready().unwrap();
        (composite, connection)
    }

    fn breaker_of(machine: &Machine, id: CompositeId, connection: ConnectionId) -> &CircuitBreaker {
        machine.composite(id).unwrap().connection(connection).unwrap().breaker()
    }

    #[test]
    fn test_rejects_assembling_composite() {
        let mut machine = Machine::new("m", &env());
        let mut composite = Composite::new("raw", &env());
        composite.add_component(member("x")).unwrap();
        assert!(matches!(
            machine.add_composite(composite),
            Err(LoomError::InvalidCompositeType { .. })
        ));
    }

    #[test]
    fn test_start_activates_composites() {
        let mut machine = Machine::new("m", &env());
        let (composite, _) = critical_pair();
        let id = machine.add_composite(composite).unwrap();
        machine.start().unwrap();
        assert_eq!(machine.state(), MachineState::Active);
        assert_eq!(machine.composite(id).unwrap().state(), CompositeState::Active);
        assert!(machine.start().is_err());
    }

    #[test]
    fn test_degrades_and_recovers_with_critical_breaker() {
        let mut machine = Machine::new("m", &env());
        let (composite, connection) = critical_pair();
        let id = machine.add_composite(composite).unwrap();
        machine.start().unwrap();

        breaker_of(&machine, id, connection).record_failure();
        assert_eq!(machine.evaluate_health(), MachineState::Degraded);

        breaker_of(&machine, id, connection).reset();
        assert_eq!(machine.evaluate_health(), MachineState::Active);
        assert_eq!(machine.metrics().degradations, 1);
        assert_eq!(machine.metrics().recoveries, 1);
    }

    #[test]
    fn test_non_critical_breaker_does_not_degrade() {
        let mut machine = Machine::new("m", &env());
        let mut composite = Composite::new("soft", &env());
        let a = composite.add_component(member("a")).unwrap();
        let b = composite.add_component(member("b")).unwrap();
        let connection = composite
            .connect(a, b, ConnectionType::DataFlow)
            .unwrap()
            .id();
        composite.mark_ready().unwrap();
        let id = machine.add_composite(composite).unwrap();
        machine.start().unwrap();

        let breaker = machine.composite(id).unwrap().connection(connection).unwrap().breaker();
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(machine.evaluate_health(), MachineState::Active);
    }

    #[test]
    fn test_flow_failure_degrades_machine() {
        let mut machine = Machine::new("m", &env());
        let mut composite = Composite::new("flow", &env());
        let a = composite.add_component(member("a")).unwrap();
        let b = composite
            .add_component(
                Component::builder(Identity::create_root("b", &env()))
                    .processor(|_: Value| -> Result<Value, String> { Err("down".into()) })
                    .build_shared()
                    .unwrap(),
            )
            .unwrap();
        composite
            .connect_with(
                a,
                b,
                ConnectionType::DataFlow,
                ConnectionOptions::critical()
                    .with_breaker(BreakerConfig::default().with_threshold(2)),
            )
            .unwrap();
        composite.mark_ready().unwrap();
        let id = machine.add_composite(composite).unwrap();
        machine.start().unwrap();

        let report = machine
            .execute_data_flow(id, vec![Value::from(1), Value::from(2), Value::from(3)])
            .unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(report.short_circuited, 1);
        assert_eq!(machine.state(), MachineState::Degraded);
        assert_eq!(machine.metrics().flows_executed, 1);
    }

    #[test]
    fn test_terminate_is_idempotent() {
        let dispatcher = EventDispatcher::default();
        let mut machine = Machine::with_dispatcher("m", &env(), dispatcher.clone());
        let (composite, _) = critical_pair();
        let id = machine.add_composite(composite).unwrap();
        machine.start().unwrap();

        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = changes.clone();
        let listener = Arc::new(move |event: &Event| {
            if let EventKind::StateChanged { to, .. } = event.kind {
                sink.lock().push(to);
            }
        });
        dispatcher.add_listener(machine.identity().id(), &listener);

        machine.terminate("shutdown");
        machine.terminate("again");
        assert_eq!(machine.state(), MachineState::Terminated);
        assert_eq!(
            *changes.lock(),
            vec![LifecycleState::Terminating, LifecycleState::Terminated]
        );
        assert_eq!(
            machine.composite(id).unwrap().state(),
            CompositeState::Terminated
        );
        assert!(machine.execute_data_flow(id, vec![]).is_err());
        let (late, _) = critical_pair();
        assert!(machine.add_composite(late).is_err());
    }

    #[test]
    fn test_unknown_composite() {
        let mut machine = Machine::new("m", &env());
        machine.start().unwrap();
        let (composite, _) = critical_pair();
        let stray = composite.id();
        assert_eq!(
            machine.execute_data_flow(stray, vec![]).unwrap_err(),
            LoomError::UnknownComposite(stray)
        );
        assert!(machine.remove_composite(stray).is_err());
    }
}
