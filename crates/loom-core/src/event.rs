//! Events published by components, composites and machines
//!
//! The set of event kinds is closed. Extension payloads travel as
//! [`EventKind::Domain`] with a topic string and a JSON value.

use serde_json::Value;

use crate::{BreakerState, ConnectionId, EventId, Identity, LifecycleState, Timestamp};

/// What happened
#[derive(Clone, Debug, PartialEq)]
pub enum EventKind {
    StateChanged {
        from: LifecycleState,
        to: LifecycleState,
    },
    Terminated {
        reason: String,
        released: usize,
        release_failures: usize,
    },
    ResourceAcquired {
        name: String,
    },
    ResourceReleased {
        name: String,
    },
    FailureRecorded {
        reason: String,
        consecutive: u32,
    },
    BreakerTransition {
        connection: ConnectionId,
        from: BreakerState,
        to: BreakerState,
    },
    FlowCompleted {
        processed: usize,
        failed: usize,
        short_circuited: usize,
    },
    Domain {
        topic: String,
        payload: Value,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::StateChanged { .. } => "state_changed",
            EventKind::Terminated { .. } => "terminated",
            EventKind::ResourceAcquired { .. } => "resource_acquired",
            EventKind::ResourceReleased { .. } => "resource_released",
            EventKind::FailureRecorded { .. } => "failure_recorded",
            EventKind::BreakerTransition { .. } => "breaker_transition",
            EventKind::FlowCompleted { .. } => "flow_completed",
            EventKind::Domain { .. } => "domain",
        }
    }
}

/// An event with its source identity
#[derive(Clone, Debug)]
pub struct Event {
    /// Zero until the dispatcher publishes it
    pub id: EventId,
    pub source: Identity,
    pub kind: EventKind,
    pub timestamp: Timestamp,
    /// Propagate to ancestors' listeners after the source's own
    pub bubbles: bool,
}

impl Event {
    pub fn new(source: Identity, kind: EventKind) -> Self {
        Self {
            id: EventId::ZERO,
            source,
            kind,
            timestamp: Timestamp::now(),
            bubbles: true,
        }
    }

    /// Deliver to the source's listeners only
    pub fn local(mut self) -> Self {
        self.bubbles = false;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}
