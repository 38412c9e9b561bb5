//! Directed connections between composite members

use loom_core::{BreakerState, ComponentId, ConnectionId, ConnectionType, Timestamp};

use crate::{BreakerConfig, CircuitBreaker};

/// Per-connection options
#[derive(Clone, Debug, Default)]
pub struct ConnectionOptions {
    /// An OPEN breaker here degrades the owning machine
    pub critical: bool,
    /// Overrides the composite's breaker defaults
    pub breaker: Option<BreakerConfig>,
}

impl ConnectionOptions {
    pub fn critical() -> Self {
        Self {
            critical: true,
            breaker: None,
        }
    }

    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = Some(breaker);
        self
    }
}

/// A directed, typed edge guarded by its own breaker
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    source: ComponentId,
    target: ComponentId,
    kind: ConnectionType,
    critical: bool,
    created_at: Timestamp,
    breaker: CircuitBreaker,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        source: ComponentId,
        target: ComponentId,
        kind: ConnectionType,
        critical: bool,
        breaker: BreakerConfig,
    ) -> Self {
        Self {
            id,
            source,
            target,
            kind,
            critical,
            created_at: Timestamp::now(),
            breaker: CircuitBreaker::new(id, breaker),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn source(&self) -> ComponentId {
        self.source
    }

    pub fn target(&self) -> ComponentId {
        self.target
    }

    pub fn kind(&self) -> ConnectionType {
        self.kind
    }

    pub fn is_critical(&self) -> bool {
        self.critical
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    /// Same endpoints and kind
    pub fn links(&self, source: ComponentId, target: ComponentId, kind: ConnectionType) -> bool {
        self.source == source && self.target == target && self.kind == kind
    }

    pub fn touches(&self, component: ComponentId) -> bool {
        self.source == component || self.target == component
    }
}
