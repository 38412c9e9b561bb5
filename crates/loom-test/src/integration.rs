//! End-to-end scenarios
//!
//! Each scenario drives the public API the way an embedding application
//! would and returns what it observed:
//! - identity ancestry across a parent/child pair
//! - partial-success reporting on a failing chain
//! - breaker short-circuiting after the failure threshold
//! - machine degradation and recovery on a critical connection

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use loom_composite::{BreakerConfig, FlowReport};
use loom_core::{
    BreakerState, Component, ComponentId, Environment, Identity, LoomError, LoomResult,
};
use loom_machine::{Machine, MachineState};

use crate::faults::FailOnItem;
use crate::pipeline::{numbered_items, PipelineBuilder};

/// What the ancestry scenario observed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AncestryOutcome {
    pub root: ComponentId,
    pub child: ComponentId,
    pub child_has_root: bool,
    pub root_has_child: bool,
    pub child_address: String,
}

/// Root "R" with child "C"
pub fn ancestry_scenario(environment: &Environment) -> LoomResult<AncestryOutcome> {
    let root = Component::create(Identity::create_root("R", environment), environment)?;
    let child_identity = root.create_child_identity("C")?;
    let child = Component::create(child_identity, environment)?;

    Ok(AncestryOutcome {
        root: root.id(),
        child: child.id(),
        child_has_root: child.identity().has_ancestor(root.id()),
        root_has_child: root.identity().has_ancestor(child.id()),
        child_address: child.identity().address(),
    })
}

/// Chain A -> B -> C where B fails on item `fail_at`; the A -> B breaker
/// opens on the first failure, so later items are short-circuited.
pub fn partial_flow_scenario(items: usize, fail_at: usize) -> LoomResult<(FlowReport, ComponentId)> {
    let mut pipeline = PipelineBuilder::new("abc")
        .breaker(BreakerConfig::default().with_threshold(1))
        .stage("A")
        .stage_with("B", FailOnItem::new(fail_at))
        .stage("C")
        .fail_fast(false)
        .build()?;
    pipeline.activate()?;

    let b = pipeline
        .stage_id("B")
        .ok_or(LoomError::UnknownComponent(ComponentId::ZERO))?;
    let report = pipeline.run(numbered_items(items))?;
    Ok((report, b))
}

/// What the breaker scenario observed
#[derive(Clone, Debug, PartialEq)]
pub struct BreakerOutcome {
    pub state_after_failures: BreakerState,
    pub target_calls: usize,
    pub short_circuited: usize,
    pub direct_call: LoomResult<()>,
}

/// A -> B with breaker threshold `threshold`, B always failing. Pushes
/// `threshold + 1` items, then calls through the breaker directly.
pub fn breaker_scenario(threshold: u32) -> LoomResult<BreakerOutcome> {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let mut pipeline = PipelineBuilder::new("guarded")
        .breaker(
            BreakerConfig::default()
                .with_threshold(threshold)
                .with_cool_down(Duration::from_secs(60)),
        )
        .stage("A")
        .stage_with("B", move |_: Value| -> Result<Value, String> {
            counted.fetch_add(1, Ordering::SeqCst);
            Err("target down".to_string())
        })
        .build()?;
    pipeline.activate()?;

    let report = pipeline.run(numbered_items(threshold as usize + 1))?;
    let link = pipeline
        .link(0)
        .and_then(|id| pipeline.composite.connection(id))
        .ok_or_else(|| LoomError::Persistence("pipeline has no link".into()))?;

    let state_after_failures = link.breaker_state();
    let direct_call = link.breaker().call(|| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    Ok(BreakerOutcome {
        state_after_failures,
        target_calls: calls.load(Ordering::SeqCst),
        short_circuited: report.short_circuited,
        direct_call,
    })
}

/// Machine state after each step of the degradation scenario
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DegradationOutcome {
    pub after_start: MachineState,
    pub after_failures: MachineState,
    pub after_recovery: MachineState,
    pub degradations: u64,
    pub recoveries: u64,
}

/// Critical A -> B link opening under failures, then closing again after
/// a successful probe once the cool-down has passed.
pub fn degradation_scenario(environment: &Environment) -> LoomResult<DegradationOutcome> {
    let cool_down = Duration::from_millis(20);
    let pipeline = PipelineBuilder::new("critical")
        .environment(environment.clone())
        .critical()
        .breaker(
            BreakerConfig::default()
                .with_threshold(2)
                .with_cool_down(cool_down),
        )
        .stage("A")
        .stage_with("B", FailOnItem::on_items([1, 2]))
        .build()?;

    let mut machine = Machine::new("scenario", environment);
    let composite = machine.add_composite(pipeline.into_composite())?;
    machine.start()?;
    let after_start = machine.state();

    machine.execute_data_flow(composite, numbered_items(3))?;
    let after_failures = machine.state();

    std::thread::sleep(cool_down * 2);
    machine.execute_data_flow(composite, numbered_items(1))?;
    let after_recovery = machine.state();

    let metrics = machine.metrics();
    machine.terminate("scenario complete");
    Ok(DegradationOutcome {
        after_start,
        after_failures,
        after_recovery,
        degradations: metrics.degradations,
        recoveries: metrics.recoveries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faults::ProbeResource;
    use crate::recorder::{MemorySnapshotStore, RecordingListener, RecordingTelemetry};
    use loom_core::{AuditAction, EventKind, LifecycleState, SnapshotStore};

    fn env() -> Environment {
        Environment::new("integration").with_fact("suite", "loom-test")
    }

    #[test]
    fn test_ancestry_scenario() {
        let outcome = ancestry_scenario(&env()).unwrap();
        assert!(outcome.child_has_root);
        assert!(!outcome.root_has_child);
        assert_eq!(
            outcome.child_address,
            format!("C{}.{}", outcome.root.short(), outcome.child.short())
        );
    }

    #[test]
    fn test_partial_flow_scenario() {
        let (report, b) = partial_flow_scenario(10, 3).unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failing_component(), Some(b));
        assert_eq!(report.first_failure.as_ref().map(|f| f.item), Some(2));
        assert_eq!(report.processed + report.failed + report.short_circuited, 10);
    }

    #[test]
    fn test_breaker_scenario() {
        let outcome = breaker_scenario(3).unwrap();
        assert_eq!(outcome.state_after_failures, BreakerState::Open);
        assert_eq!(outcome.target_calls, 3);
        assert_eq!(outcome.short_circuited, 1);
        assert!(matches!(outcome.direct_call, Err(LoomError::CircuitOpen { .. })));
    }

    #[test]
    fn test_degradation_scenario() {
        let outcome = degradation_scenario(&env()).unwrap();
        assert_eq!(outcome.after_start, MachineState::Active);
        assert_eq!(outcome.after_failures, MachineState::Degraded);
        assert_eq!(outcome.after_recovery, MachineState::Active);
        assert_eq!((outcome.degradations, outcome.recoveries), (1, 1));
    }

    #[test]
    fn test_terminated_component_never_reactivates() {
        let mut component = Component::create(Identity::create_root("t", &env()), &env()).unwrap();
        component.terminate("done");
        let err = component.advance(LifecycleState::Active).unwrap_err();
        assert!(matches!(err, LoomError::InvalidTransition { .. }));
        assert_eq!(component.state(), LifecycleState::Terminated);
    }

    #[test]
    fn test_termination_audits_and_releases() {
        let telemetry = Arc::new(RecordingTelemetry::new());
        let mut component = Component::builder(Identity::create_root("res", &env()))
            .environment(env())
            .telemetry(telemetry.clone())
            .build()
            .unwrap();

        let good = ProbeResource::new();
        let bad = ProbeResource::failing();
        let good_releases = good.releases();
        component.acquire_resource("socket", good).unwrap();
        component.acquire_resource("lock", bad).unwrap();

        let summary = component.terminate("shutdown").unwrap();
        assert_eq!(summary.released, vec!["socket".to_string()]);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(good_releases.load(Ordering::SeqCst), 1);
        assert_eq!(component.state(), LifecycleState::Terminated);

        let actions = telemetry.actions();
        assert_eq!(actions.first(), Some(&AuditAction::Created));
        assert!(actions.contains(&AuditAction::ReleaseFailed));
        assert_eq!(actions.last(), Some(&AuditAction::Terminated));
    }

    #[test]
    fn test_child_events_bubble_to_parent_listener() {
        let parent = Component::create(Identity::create_root("parent", &env()), &env()).unwrap();
        let child_identity = parent.create_child_identity("child").unwrap();
        let mut child = Component::builder(child_identity)
            .environment(env())
            .dispatcher(parent.dispatcher().clone())
            .build()
            .unwrap();

        let listener = Arc::new(RecordingListener::new());
        parent.add_listener(&listener);

        child.initialize().unwrap();
        child.activate().unwrap();
        child
            .publish_domain("orders", serde_json::json!({ "id": 7 }))
            .unwrap();

        assert!(listener.count("state_changed") >= 2);
        assert!(listener
            .kinds()
            .iter()
            .any(|k| matches!(k, EventKind::Domain { topic, .. } if topic == "orders")));
    }

    #[test]
    fn test_snapshot_round_trip_through_store() {
        let store = MemorySnapshotStore::new();
        let mut component = Component::create(Identity::create_root("snap", &env()), &env()).unwrap();
        component.set_metadata("tier", "gold").unwrap();
        component.persist(&store).unwrap();

        let loaded = store.load(&component.id().to_hex()).unwrap();
        assert_eq!(loaded.state, LifecycleState::Conception);
        assert_eq!(loaded.metadata.get("tier").map(String::as_str), Some("gold"));
        assert_eq!(loaded.environment, "integration");

        let rejecting = MemorySnapshotStore::rejecting();
        assert!(matches!(
            component.persist(&rejecting),
            Err(LoomError::Persistence(_))
        ));
        assert!(rejecting.is_empty());
    }
}
