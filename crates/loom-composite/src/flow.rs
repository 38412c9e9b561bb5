//! Data flow execution over a composite's DATA_FLOW graph
//!
//! Items are pushed one at a time. Each item enters at every source,
//! follows data-flow edges in topological order and is collected at the
//! sinks. A failure or an open breaker stops that item on its branch; the
//! rest of the flow continues unless fail-fast is configured.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::MutexGuard;
use serde_json::Value;
use tracing::{debug, info};

use loom_core::{Component, ComponentId, ConnectionType, LoomError, LoomResult};

use crate::{Composite, Connection, Permit};

/// First failure observed during a flow
#[derive(Clone, Debug, PartialEq)]
pub struct FlowFailure {
    /// Zero-based index of the failing item
    pub item: usize,
    pub component: ComponentId,
    pub reason: String,
    pub error: LoomError,
}

/// Partial-success report of one flow
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlowReport {
    pub items: usize,
    /// Items that reached every sink
    pub processed: usize,
    /// Items with at least one processing failure
    pub failed: usize,
    /// Items stopped only by open breakers
    pub short_circuited: usize,
    pub first_failure: Option<FlowFailure>,
    /// Outputs collected at each sink, in item order
    pub outputs: BTreeMap<ComponentId, Vec<Value>>,
}

impl FlowReport {
    fn new(items: usize) -> Self {
        Self {
            items,
            ..Default::default()
        }
    }

    pub fn is_complete_success(&self) -> bool {
        self.processed == self.items
    }

    pub fn failing_component(&self) -> Option<ComponentId> {
        self.first_failure.as_ref().map(|f| f.component)
    }

    pub fn outputs_at(&self, sink: ComponentId) -> &[Value] {
        self.outputs.get(&sink).map(Vec::as_slice).unwrap_or(&[])
    }
}

type Inbox<'c> = BTreeMap<ComponentId, Vec<(Value, Option<(&'c Connection, Permit)>)>>;

pub(crate) fn execute(composite: &Composite, inputs: Vec<Value>) -> LoomResult<FlowReport> {
    let graph = composite.graph(ConnectionType::DataFlow);
    let order = graph.topological_order().ok_or_else(|| {
        LoomError::invalid_operation(
            composite.label(),
            "execute_data_flow",
            "data-flow graph contains a cycle",
        )
    })?;
    let sources = graph.sources();
    let sinks: BTreeSet<ComponentId> = graph.sinks().into_iter().collect();

    let mut outgoing: BTreeMap<ComponentId, Vec<&Connection>> = BTreeMap::new();
    for connection in composite
        .connections()
        .iter()
        .filter(|c| c.kind() == ConnectionType::DataFlow)
    {
        outgoing.entry(connection.source()).or_default().push(connection);
    }

    let fail_fast = composite.config().fail_fast;
    let mut report = FlowReport::new(inputs.len());
    for sink in &sinks {
        report.outputs.insert(*sink, Vec::new());
    }

    // Members are held in a BTreeMap, so this locks in ascending id order.
    let mut guards: BTreeMap<ComponentId, MutexGuard<'_, Component>> = composite
        .member_handles()
        .map(|(id, handle)| (*id, handle.lock()))
        .collect();

    debug!(
        composite = %composite.id(),
        items = report.items,
        members = guards.len(),
        sources = sources.len(),
        sinks = sinks.len(),
        "data flow started"
    );

    for (index, item) in inputs.into_iter().enumerate() {
        let mut inbox: Inbox<'_> = BTreeMap::new();
        for source in &sources {
            inbox.entry(*source).or_default().push((item.clone(), None));
        }

        let mut failure: Option<FlowFailure> = None;
        let mut short_circuited = false;

        for node in &order {
            let Some(pending) = inbox.remove(node) else {
                continue;
            };
            let Some(component) = guards.get_mut(node) else {
                continue;
            };

            for (value, via) in pending {
                match component.process(value) {
                    Ok(output) => {
                        if let Some((connection, _)) = via {
                            connection.breaker().record_success();
                        }
                        if sinks.contains(node) {
                            report.outputs.entry(*node).or_default().push(output);
                            continue;
                        }
                        for connection in outgoing.get(node).into_iter().flatten() {
                            match connection.breaker().try_acquire() {
                                Ok(permit) => inbox
                                    .entry(connection.target())
                                    .or_default()
                                    .push((output.clone(), Some((*connection, permit)))),
                                Err(e) => {
                                    debug!(item = index, error = %e, "traversal short-circuited");
                                    short_circuited = true;
                                }
                            }
                        }
                    }
                    Err(error) => {
                        if let Some((connection, _)) = via {
                            connection.breaker().record_failure();
                        }
                        if fail_fast {
                            release_unused(&inbox);
                            drop(guards);
                            composite.publish_breaker_transitions();
                            return Err(error);
                        }
                        if failure.is_none() {
                            failure = Some(FlowFailure {
                                item: index,
                                component: *node,
                                reason: error.to_string(),
                                error,
                            });
                        }
                    }
                }
            }
        }

        match failure {
            Some(f) => {
                report.failed += 1;
                if report.first_failure.is_none() {
                    report.first_failure = Some(f);
                }
            }
            None if short_circuited => report.short_circuited += 1,
            None => report.processed += 1,
        }
    }

    drop(guards);

    info!(
        composite = %composite.id(),
        items = report.items,
        processed = report.processed,
        failed = report.failed,
        short_circuited = report.short_circuited,
        "data flow finished"
    );

    composite.publish_breaker_transitions();
    composite.record_flow(&report);
    Ok(report)
}

/// Permits acquired for traversals that will never run
fn release_unused(inbox: &Inbox<'_>) {
    for (connection, permit) in inbox.values().flatten().filter_map(|(_, via)| *via) {
        connection.breaker().release_permit(permit);
    }
}
