//! Components: identity-bound units of work with a managed lifecycle
//!
//! A component is not internally synchronized. Callers that share one
//! across threads wrap it in a [`SharedComponent`] and serialize every
//! lifecycle call through that lock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::lifecycle::is_valid_transition;
use crate::{
    AuditAction, AuditRecord, ComponentId, DispatchReport, Environment, Event, EventDispatcher,
    EventKind, EventListener, GraceTimer, Identity, LifecycleState, ListenerId, LoomError,
    LoomResult, NoopTelemetry, Operation, Processor, ReleaseSummary, Resource, ResourceTracker,
    SnapshotStore, StateCell, Telemetry, Timestamp,
};

/// Per-component lock used wherever a component is shared
pub type SharedComponent = Arc<Mutex<Component>>;

/// Metadata key prefix still writable after termination
pub const TERMINATION_PREFIX: &str = "termination.";

/// Component configuration
#[derive(Clone, Debug)]
pub struct ComponentConfig {
    /// Consecutive failures before an operational component degrades (0 disables)
    pub failure_threshold: u32,
    /// Delay applied by [`Component::retire`]
    pub grace_period: Option<Duration>,
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            grace_period: None,
        }
    }
}

/// Component counters
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentMetrics {
    pub transitions: u64,
    pub events_emitted: u64,
    pub processed: u64,
    pub failed: u64,
    pub consecutive_failures: u32,
    pub resources_held: usize,
    pub resources_released: u64,
    pub release_failures: u64,
    pub uptime_ms: u64,
}

/// Serializable projection handed to a [`SnapshotStore`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComponentSnapshot {
    pub id: String,
    pub address: String,
    pub reason: String,
    pub environment: String,
    pub state: LifecycleState,
    pub metadata: BTreeMap<String, String>,
    pub resources: Vec<String>,
    pub metrics: ComponentMetrics,
    pub taken_at: Timestamp,
}

/// Builder and factory for [`Component`]
pub struct ComponentBuilder {
    identity: Identity,
    environment: Environment,
    config: ComponentConfig,
    dispatcher: Option<EventDispatcher>,
    telemetry: Option<Arc<dyn Telemetry>>,
    processor: Option<Box<dyn Processor>>,
}

impl ComponentBuilder {
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn config(mut self, config: ComponentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn dispatcher(mut self, dispatcher: EventDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn processor<P: Processor + 'static>(mut self, processor: P) -> Self {
        self.processor = Some(Box::new(processor));
        self
    }

    /// Bind the identity and create the component in CONCEPTION
    pub fn build(self) -> LoomResult<Component> {
        let identity = self.identity;

        if !identity.parent_resolvable() {
            return Err(LoomError::InvalidIdentity {
                id: identity.id(),
                reason: "parent component no longer exists".to_string(),
            });
        }
        if !identity.bind() {
            return Err(LoomError::InvalidIdentity {
                id: identity.id(),
                reason: "identity already bound to a component".to_string(),
            });
        }

        let component = Component {
            state: Arc::new(StateCell::new(LifecycleState::Conception)),
            environment: self.environment,
            config: self.config,
            resources: ResourceTracker::new(),
            metadata: BTreeMap::new(),
            dispatcher: self
                .dispatcher
                .or_else(|| identity.inherited_dispatcher())
                .unwrap_or_default(),
            telemetry: self
                .telemetry
                .unwrap_or_else(|| Arc::new(NoopTelemetry)),
            processor: self.processor,
            timer: None,
            metrics: ComponentMetrics::default(),
            born: Instant::now(),
            identity,
        };

        debug!(
            component = %component.identity.short_id(),
            address = %component.identity.address(),
            reason = component.identity.reason(),
            "component created"
        );
        component.audit(AuditAction::Created, None, None, component.identity.reason());

        Ok(component)
    }

    pub fn build_shared(self) -> LoomResult<SharedComponent> {
        self.build().map(Component::into_shared)
    }
}

/// A unit of work with an identity, a lifecycle and owned resources
pub struct Component {
    identity: Identity,
    state: Arc<StateCell>,
    environment: Environment,
    config: ComponentConfig,
    resources: ResourceTracker,
    metadata: BTreeMap<String, String>,
    dispatcher: EventDispatcher,
    telemetry: Arc<dyn Telemetry>,
    processor: Option<Box<dyn Processor>>,
    timer: Option<GraceTimer>,
    metrics: ComponentMetrics,
    born: Instant,
}

impl Component {
    /// Create with defaults and a private dispatcher
    pub fn create(identity: Identity, environment: &Environment) -> LoomResult<Component> {
        Component::builder(identity)
            .environment(environment.clone())
            .build()
    }

    pub fn builder(identity: Identity) -> ComponentBuilder {
        ComponentBuilder {
            identity,
            environment: Environment::default(),
            config: ComponentConfig::default(),
            dispatcher: None,
            telemetry: None,
            processor: None,
        }
    }

    pub fn into_shared(self) -> SharedComponent {
        Arc::new(Mutex::new(self))
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Take one listed transition
    pub fn advance(&mut self, target: LifecycleState) -> LoomResult<()> {
        let from = self.state();
        if !is_valid_transition(from, target) {
            return Err(LoomError::InvalidTransition {
                component: self.id(),
                from,
                to: target,
            });
        }
        self.transition(from, target);
        Ok(())
    }

    /// CONCEPTION through the creation chain to READY
    pub fn initialize(&mut self) -> LoomResult<()> {
        for target in [
            LifecycleState::Initializing,
            LifecycleState::Configuring,
            LifecycleState::Specializing,
            LifecycleState::Ready,
        ] {
            self.advance(target)?;
        }
        Ok(())
    }

    pub fn activate(&mut self) -> LoomResult<()> {
        self.advance(LifecycleState::Active)
    }

    pub fn degrade(&mut self, reason: &str) -> LoomResult<()> {
        self.advance(LifecycleState::Degraded)?;
        self.metadata
            .insert("degradation.reason".to_string(), reason.to_string());
        warn!(component = %self.identity.short_id(), reason, "component degraded");
        Ok(())
    }

    pub fn begin_maintenance(&mut self) -> LoomResult<()> {
        self.advance(LifecycleState::Maintaining)
    }

    pub fn recover(&mut self) -> LoomResult<()> {
        self.advance(LifecycleState::Active)?;
        self.metrics.consecutive_failures = 0;
        self.metadata.remove("degradation.reason");
        Ok(())
    }

    pub fn archive(&mut self) -> LoomResult<()> {
        self.advance(LifecycleState::Archived)
    }

    /// Terminate from any non-terminal state.
    ///
    /// Cancels the grace timer, releases every resource (failures are
    /// logged, never raised) and ends in TERMINATED. Returns `None` when
    /// termination had already happened.
    pub fn terminate(&mut self, reason: &str) -> Option<ReleaseSummary> {
        let from = self.state();
        if from.is_terminating_or_terminal() {
            debug!(component = %self.identity.short_id(), state = %from, "terminate ignored");
            return None;
        }

        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }

        self.metadata
            .insert("termination.reason".to_string(), reason.to_string());
        self.metadata.insert(
            "termination.time".to_string(),
            Timestamp::now().as_micros().to_string(),
        );

        self.transition(from, LifecycleState::Terminating);

        let summary = self.resources.release_all();
        for name in &summary.released {
            self.emit(EventKind::ResourceReleased { name: name.clone() });
        }
        for (name, error) in &summary.failures {
            self.audit(
                AuditAction::ReleaseFailed,
                None,
                None,
                &format!("{name}: {error}"),
            );
        }
        self.metrics.resources_released += summary.released.len() as u64;
        self.metrics.release_failures += summary.failures.len() as u64;

        self.transition(LifecycleState::Terminating, LifecycleState::Terminated);
        self.audit(AuditAction::Terminated, Some(from), None, reason);
        self.emit(EventKind::Terminated {
            reason: reason.to_string(),
            released: summary.released.len(),
            release_failures: summary.failures.len(),
        });

        info!(
            component = %self.identity.short_id(),
            reason,
            released = summary.released.len(),
            release_failures = summary.failures.len(),
            "component terminated"
        );

        Some(summary)
    }

    /// Arm (or re-arm) a timer that terminates the component after `grace`
    pub fn schedule_termination(handle: &SharedComponent, grace: Duration) -> LoomResult<()> {
        let weak = Arc::downgrade(handle);
        let mut component = handle.lock();

        if component.state().is_terminating_or_terminal() {
            return Err(component.rejected("schedule_termination", "already terminated"));
        }

        let name = format!("loom-grace-{}", component.identity.short_id());
        let timer = GraceTimer::start(name, grace, move || {
            if let Some(handle) = weak.upgrade() {
                handle.lock().terminate("grace period elapsed");
            }
        })
        .map_err(|e| component.rejected("schedule_termination", &e.to_string()))?;

        if let Some(previous) = component.timer.replace(timer) {
            previous.cancel();
        }
        debug!(
            component = %component.identity.short_id(),
            grace_ms = grace.as_millis() as u64,
            "termination scheduled"
        );
        Ok(())
    }

    /// Terminate after the configured grace period, or now if there is none
    pub fn retire(handle: &SharedComponent) -> LoomResult<()> {
        let grace = handle.lock().config.grace_period;
        match grace {
            Some(grace) => Component::schedule_termination(handle, grace),
            None => {
                handle.lock().terminate("retired");
                Ok(())
            }
        }
    }

    /// Disarm a pending grace timer. Returns whether one was armed.
    pub fn cancel_termination(&mut self) -> bool {
        match self.timer.take() {
            Some(timer) => {
                timer.cancel();
                true
            }
            None => false,
        }
    }

    pub fn termination_scheduled(&self) -> bool {
        self.timer.is_some()
    }

    fn transition(&mut self, from: LifecycleState, to: LifecycleState) {
        self.state.set(to);
        self.metrics.transitions += 1;
        debug!(
            component = %self.identity.short_id(),
            from = %from,
            to = %to,
            "state transition"
        );
        self.audit(AuditAction::Transitioned, Some(from), Some(to), "");
        self.emit(EventKind::StateChanged { from, to });
    }

    // ------------------------------------------------------------------
    // Failures and processing
    // ------------------------------------------------------------------

    /// Count a failure; degrades once the threshold is reached while operational
    pub fn record_failure(&mut self, reason: &str) -> LoomResult<()> {
        if self.state().is_terminating_or_terminal() {
            return Err(self.rejected("record_failure", "component is terminated"));
        }

        self.metrics.consecutive_failures += 1;
        let consecutive = self.metrics.consecutive_failures;
        self.audit(AuditAction::FailureRecorded, None, None, reason);
        self.emit(EventKind::FailureRecorded {
            reason: reason.to_string(),
            consecutive,
        });

        let threshold = self.config.failure_threshold;
        if threshold > 0 && consecutive >= threshold && self.state().is_operational() {
            self.degrade(&format!("{consecutive} consecutive failures: {reason}"))?;
        }
        Ok(())
    }

    pub fn record_success(&mut self) {
        self.metrics.consecutive_failures = 0;
    }

    /// Run the processor on one item. Without a processor the item passes through.
    pub fn process(&mut self, input: Value) -> LoomResult<Value> {
        self.ensure(Operation::ProcessData)?;

        let outcome = match self.processor.as_mut() {
            Some(processor) => processor.process(input),
            None => Ok(input),
        };

        match outcome {
            Ok(output) => {
                self.metrics.processed += 1;
                self.record_success();
                Ok(output)
            }
            Err(reason) => {
                self.metrics.failed += 1;
                self.record_failure(&reason)?;
                Err(LoomError::ProcessingFailed {
                    component: self.id(),
                    reason,
                })
            }
        }
    }

    pub fn can_perform(&self, operation: Operation) -> bool {
        self.state().allows(operation)
    }

    pub fn ensure(&self, operation: Operation) -> LoomResult<()> {
        let state = self.state();
        if state.allows(operation) {
            Ok(())
        } else {
            Err(self.rejected(&operation.to_string(), &format!("not permitted in {state}")))
        }
    }

    fn rejected(&self, operation: &str, reason: &str) -> LoomError {
        LoomError::invalid_operation(
            format!("component {}", self.identity.short_id()),
            operation,
            reason,
        )
    }

    // ------------------------------------------------------------------
    // Resources and metadata
    // ------------------------------------------------------------------

    pub fn acquire_resource<R>(&mut self, name: impl Into<String>, handle: R) -> LoomResult<()>
    where
        R: Resource + 'static,
    {
        self.ensure(Operation::AllocateResource)?;
        let name = name.into();
        if self.resources.insert(name.clone(), Box::new(handle)).is_err() {
            return Err(self.rejected("acquire_resource", &format!("`{name}` already held")));
        }
        self.emit(EventKind::ResourceAcquired { name });
        Ok(())
    }

    pub fn release_resource(&mut self, name: &str) -> LoomResult<()> {
        match self.resources.release(name) {
            None => Err(self.rejected("release_resource", &format!("`{name}` not held"))),
            Some(Ok(())) => {
                self.metrics.resources_released += 1;
                self.emit(EventKind::ResourceReleased {
                    name: name.to_string(),
                });
                Ok(())
            }
            Some(Err(e)) => {
                self.metrics.release_failures += 1;
                warn!(component = %self.identity.short_id(), resource = name, error = %e, "resource release failed");
                Err(LoomError::ResourceRelease {
                    name: name.to_string(),
                    reason: e.reason,
                })
            }
        }
    }

    pub fn resource_names(&self) -> Vec<String> {
        self.resources.names().map(str::to_string).collect()
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) -> LoomResult<()> {
        let key = key.into();
        if self.state().is_terminating_or_terminal() && !key.starts_with(TERMINATION_PREFIX) {
            return Err(self.rejected("set_metadata", "component is terminated"));
        }
        self.metadata.insert(key, value.into());
        Ok(())
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    pub fn add_listener<L: EventListener + 'static>(&self, listener: &Arc<L>) -> ListenerId {
        self.dispatcher.add_listener(self.id(), listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.dispatcher.remove_listener(id)
    }

    /// Publish an application event sourced at this component
    pub fn publish_domain(&mut self, topic: &str, payload: Value) -> LoomResult<DispatchReport> {
        if self.state().is_terminal() {
            return Err(self.rejected("publish_domain", "component is terminated"));
        }
        Ok(self.emit(EventKind::Domain {
            topic: topic.to_string(),
            payload,
        }))
    }

    fn emit(&mut self, kind: EventKind) -> DispatchReport {
        self.metrics.events_emitted += 1;
        self.dispatcher
            .publish(Event::new(self.identity.clone(), kind))
    }

    fn audit(
        &self,
        action: AuditAction,
        from: Option<LifecycleState>,
        to: Option<LifecycleState>,
        detail: &str,
    ) {
        self.telemetry.record(&AuditRecord {
            component: self.identity.id().to_hex(),
            address: self.identity.address(),
            action,
            from,
            to,
            detail: detail.to_string(),
            timestamp: Timestamp::now(),
        });
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    #[inline]
    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    pub(crate) fn state_cell(&self) -> &Arc<StateCell> {
        &self.state
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    #[inline]
    pub fn id(&self) -> ComponentId {
        self.identity.id()
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn config(&self) -> &ComponentConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn create_child_identity(&self, reason: &str) -> LoomResult<Identity> {
        Identity::create_child(self, reason)
    }

    pub fn metrics(&self) -> ComponentMetrics {
        ComponentMetrics {
            resources_held: self.resources.len(),
            uptime_ms: self.born.elapsed().as_millis() as u64,
            ..self.metrics.clone()
        }
    }

    pub fn snapshot(&self) -> ComponentSnapshot {
        ComponentSnapshot {
            id: self.identity.id().to_hex(),
            address: self.identity.address(),
            reason: self.identity.reason().to_string(),
            environment: self.environment.id().to_string(),
            state: self.state(),
            metadata: self.metadata.clone(),
            resources: self.resource_names(),
            metrics: self.metrics(),
            taken_at: Timestamp::now(),
        }
    }

    pub fn persist(&self, store: &dyn SnapshotStore) -> LoomResult<()> {
        let snapshot = self.snapshot();
        store.save(&snapshot).map_err(LoomError::Persistence)?;
        self.audit(AuditAction::Persisted, None, None, &snapshot.address);
        Ok(())
    }
}

impl Drop for Component {
    fn drop(&mut self) {
        if !self.state().is_terminating_or_terminal() {
            self.terminate("component dropped");
        }
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.identity.id())
            .field("state", &self.state())
            .field("resources", &self.resources)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use crate::ResourceError;

    fn env() -> Environment {
        Environment::new("unit")
    }

    fn component(reason: &str) -> Component {
        Component::create(Identity::create_root(reason, &env()), &env()).unwrap()
    }

    #[derive(Default)]
    struct StateLog(Mutex<Vec<(LifecycleState, LifecycleState)>>);

    impl EventListener for StateLog {
        fn on_event(&self, event: &Event) {
            if let EventKind::StateChanged { from, to } = event.kind {
                self.0.lock().push((from, to));
            }
        }
    }

    #[test]
    fn test_starts_in_conception() {
        let c = component("fresh");
        assert_eq!(c.state(), LifecycleState::Conception);
        assert!(c.identity().is_bound());
    }

    #[test]
    fn test_initialize_emits_each_step() {
        let mut c = component("init");
        let log = Arc::new(StateLog::default());
        c.add_listener(&log);

        c.initialize().unwrap();
        c.activate().unwrap();

        assert_eq!(c.state(), LifecycleState::Active);
        assert_eq!(
            *log.0.lock(),
            vec![
                (LifecycleState::Conception, LifecycleState::Initializing),
                (LifecycleState::Initializing, LifecycleState::Configuring),
                (LifecycleState::Configuring, LifecycleState::Specializing),
                (LifecycleState::Specializing, LifecycleState::Ready),
                (LifecycleState::Ready, LifecycleState::Active),
            ]
        );
        assert_eq!(c.metrics().transitions, 5);
    }

    #[test]
    fn test_invalid_transition_leaves_state() {
        let mut c = component("skip");
        let err = c.advance(LifecycleState::Active).unwrap_err();
        assert_eq!(
            err,
            LoomError::InvalidTransition {
                component: c.id(),
                from: LifecycleState::Conception,
                to: LifecycleState::Active,
            }
        );
        assert_eq!(c.state(), LifecycleState::Conception);
    }

    #[test]
    fn test_rebinding_identity_fails() {
        let identity = Identity::create_root("shared", &env());
        let _first = Component::create(identity.clone(), &env()).unwrap();
        let err = Component::create(identity, &env()).unwrap_err();
        assert!(matches!(err, LoomError::InvalidIdentity { .. }));
    }

    #[test]
    fn test_unresolvable_parent_fails() {
        let parent = component("parent");
        let child_identity = parent.create_child_identity("child").unwrap();
        drop(parent);
        let err = Component::create(child_identity, &env()).unwrap_err();
        assert!(matches!(err, LoomError::InvalidIdentity { .. }));
    }

    #[test]
    fn test_child_events_reach_parent_listeners() {
        let parent = component("parent");
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let listener = Arc::new(move |event: &Event| {
            if matches!(event.kind, EventKind::Domain { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        parent.add_listener(&listener);

        let mut child = Component::create(parent.create_child_identity("child").unwrap(), &env()).unwrap();
        let report = child.publish_domain("hello", Value::Null).unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_explicit_dispatcher_overrides_parent() {
        let parent = component("parent");
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let listener = Arc::new(move |_: &Event| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        parent.add_listener(&listener);

        let mut child = Component::builder(parent.create_child_identity("isolated").unwrap())
            .environment(env())
            .dispatcher(EventDispatcher::default())
            .build()
            .unwrap();
        child.publish_domain("hello", Value::Null).unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_terminate_releases_and_is_idempotent() {
        let mut c = component("term");
        let released = Arc::new(AtomicUsize::new(0));
        for name in ["a", "b"] {
            let released = released.clone();
            c.acquire_resource(name, move || -> Result<(), ResourceError> {
                released.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        }
        c.acquire_resource("broken", || -> Result<(), ResourceError> {
            Err(ResourceError::new("stuck"))
        })
        .unwrap();

        let summary = c.terminate("shutdown").unwrap();
        assert_eq!(summary.released.len(), 2);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(released.load(Ordering::SeqCst), 2);
        assert_eq!(c.state(), LifecycleState::Terminated);
        assert_eq!(c.metadata("termination.reason"), Some("shutdown"));
        assert_eq!(c.metrics().release_failures, 1);
        assert!(c.resource_names().is_empty());

        assert!(c.terminate("again").is_none());
        assert_eq!(c.metadata("termination.reason"), Some("shutdown"));
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_terminated_never_reenters() {
        let mut c = component("final");
        c.terminate("done");
        for state in LifecycleState::ALL {
            if state == LifecycleState::Archived {
                continue;
            }
            assert!(c.advance(state).is_err());
        }
        c.archive().unwrap();
        assert_eq!(c.state(), LifecycleState::Archived);
    }

    #[test]
    fn test_duplicate_resource_rejected() {
        let mut c = component("dup");
        c.acquire_resource("db", || -> Result<(), ResourceError> { Ok(()) })
            .unwrap();
        let err = c
            .acquire_resource("db", || -> Result<(), ResourceError> { Ok(()) })
            .unwrap_err();
        assert!(matches!(err, LoomError::InvalidOperation { .. }));
        c.release_resource("db").unwrap();
        assert!(c.release_resource("db").is_err());
    }

    #[test]
    fn test_process_requires_operational_state() {
        let mut c = component("proc");
        assert!(matches!(
            c.process(serde_json::json!(1)),
            Err(LoomError::InvalidOperation { .. })
        ));
        c.initialize().unwrap();
        c.activate().unwrap();
        assert_eq!(c.process(serde_json::json!(1)).unwrap(), serde_json::json!(1));
        assert_eq!(c.metrics().processed, 1);
    }

    #[test]
    fn test_repeated_failures_degrade() {
        let mut c = Component::builder(Identity::create_root("flaky", &env()))
            .processor(|_: Value| -> Result<Value, String> { Err("boom".to_string()) })
            .build()
            .unwrap();
        c.initialize().unwrap();
        c.activate().unwrap();

        for _ in 0..2 {
            assert!(matches!(
                c.process(Value::Null),
                Err(LoomError::ProcessingFailed { .. })
            ));
            assert_eq!(c.state(), LifecycleState::Active);
        }
        assert!(c.process(Value::Null).is_err());
        assert_eq!(c.state(), LifecycleState::Degraded);
        assert_eq!(c.metrics().failed, 3);

        c.begin_maintenance().unwrap();
        c.recover().unwrap();
        assert_eq!(c.state(), LifecycleState::Active);
        assert_eq!(c.metrics().consecutive_failures, 0);
    }

    #[test]
    fn test_metadata_after_termination() {
        let mut c = component("meta");
        c.set_metadata("owner", "ops").unwrap();
        c.terminate("done");
        assert!(c.set_metadata("owner", "dev").is_err());
        c.set_metadata("termination.note", "clean").unwrap();
        assert_eq!(c.metadata("owner"), Some("ops"));
    }

    #[test]
    fn test_grace_timer_terminates() {
        let handle = component("grace").into_shared();
        Component::schedule_termination(&handle, Duration::from_millis(20)).unwrap();
        assert!(handle.lock().termination_scheduled());

        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.lock().state() != LifecycleState::Terminated {
            assert!(Instant::now() < deadline, "grace timer never fired");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(
            handle.lock().metadata("termination.reason"),
            Some("grace period elapsed")
        );
    }

    #[test]
    fn test_terminate_cancels_grace_timer() {
        let handle = component("cancel").into_shared();
        Component::schedule_termination(&handle, Duration::from_millis(30)).unwrap();
        handle.lock().terminate("early");
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(handle.lock().metadata("termination.reason"), Some("early"));
        assert!(Component::schedule_termination(&handle, Duration::ZERO).is_err());
    }

    #[test]
    fn test_drop_terminates() {
        let released = Arc::new(AtomicUsize::new(0));
        {
            let mut c = component("scoped");
            let released = released.clone();
            c.acquire_resource("r", move || -> Result<(), ResourceError> {
                released.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_snapshot_and_persist() {
        #[derive(Default)]
        struct Store(Mutex<Vec<ComponentSnapshot>>);

        impl SnapshotStore for Store {
            fn save(&self, snapshot: &ComponentSnapshot) -> Result<(), String> {
                self.0.lock().push(snapshot.clone());
                Ok(())
            }

            fn load(&self, component: &str) -> Option<ComponentSnapshot> {
                self.0.lock().iter().rev().find(|s| s.id == component).cloned()
            }
        }

        let mut c = component("snap");
        c.initialize().unwrap();
        c.set_metadata("k", "v").unwrap();
        let store = Store::default();
        c.persist(&store).unwrap();

        let loaded = store.load(&c.id().to_hex()).unwrap();
        assert_eq!(loaded.state, LifecycleState::Ready);
        assert_eq!(loaded.metadata.get("k").map(String::as_str), Some("v"));
        assert_eq!(loaded.address, c.identity().address());
    }

    fn any_state() -> impl Strategy<Value = LifecycleState> {
        (0..LifecycleState::ALL.len()).prop_map(|i| LifecycleState::ALL[i])
    }

    proptest! {
        #[test]
        fn test_random_walk_respects_table(targets in proptest::collection::vec(any_state(), 1..40)) {
            let mut c = component("walk");
            for target in targets {
                let before = c.state();
                let result = c.advance(target);
                if is_valid_transition(before, target) {
                    prop_assert!(result.is_ok());
                    prop_assert_eq!(c.state(), target);
                } else {
                    prop_assert!(result.is_err());
                    prop_assert_eq!(c.state(), before);
                }
            }
        }

        #[test]
        fn test_terminate_is_idempotent(calls in 1usize..5, walk in proptest::collection::vec(any_state(), 0..10)) {
            let mut c = component("idem");
            for target in walk {
                let _ = c.advance(target);
            }
            let was_terminal = c.state().is_terminating_or_terminal();
            let first = c.terminate("first");
            prop_assert_eq!(first.is_some(), !was_terminal);
            for _ in 1..calls {
                prop_assert!(c.terminate("again").is_none());
            }
            prop_assert!(c.state().is_terminal());
        }
    }
}
