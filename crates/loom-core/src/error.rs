//! Error types for LOOM

use std::time::Duration;

use thiserror::Error;

use crate::{CompositeId, ComponentId, ConnectionId, ConnectionType, LifecycleState};

/// Core LOOM errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoomError {
    // Identity errors
    #[error("Invalid identity {id:?}: {reason}")]
    InvalidIdentity { id: ComponentId, reason: String },

    #[error("Parent {0:?} is terminated")]
    ParentTerminated(ComponentId),

    // Lifecycle errors
    #[error("Invalid transition for {component:?}: {from} -> {to}")]
    InvalidTransition {
        component: ComponentId,
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("Operation `{operation}` rejected on {target}: {reason}")]
    InvalidOperation {
        target: String,
        operation: String,
        reason: String,
    },

    #[error("Processing failed in {component:?}: {reason}")]
    ProcessingFailed { component: ComponentId, reason: String },

    #[error("Resource `{name}` failed to release: {reason}")]
    ResourceRelease { name: String, reason: String },

    // Composite errors
    #[error("Unknown component: {0:?}")]
    UnknownComponent(ComponentId),

    #[error("Duplicate component: {0:?}")]
    DuplicateComponent(ComponentId),

    #[error("Connection {upstream:?} -> {downstream:?} ({kind}) would create a cycle")]
    CycleDetected {
        upstream: ComponentId,
        downstream: ComponentId,
        kind: ConnectionType,
    },

    #[error("Connection {upstream:?} -> {downstream:?} ({kind}) already exists")]
    DuplicateConnection {
        upstream: ComponentId,
        downstream: ComponentId,
        kind: ConnectionType,
    },

    #[error("Circuit open on {connection:?}, retry after {retry_after:?}")]
    CircuitOpen {
        connection: ConnectionId,
        retry_after: Duration,
    },

    // Machine errors
    #[error("Composite {composite:?} is not ready: {reason}")]
    InvalidCompositeType { composite: CompositeId, reason: String },

    #[error("Unknown composite: {0:?}")]
    UnknownComposite(CompositeId),

    // Port errors
    #[error("Persistence failed: {0}")]
    Persistence(String),
}

impl LoomError {
    pub fn invalid_operation(
        target: impl Into<String>,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        LoomError::InvalidOperation {
            target: target.into(),
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Component the error is attributed to, when there is one
    pub fn component(&self) -> Option<ComponentId> {
        match self {
            LoomError::InvalidIdentity { id, .. } => Some(*id),
            LoomError::ParentTerminated(id)
            | LoomError::UnknownComponent(id)
            | LoomError::DuplicateComponent(id) => Some(*id),
            LoomError::InvalidTransition { component, .. }
            | LoomError::ProcessingFailed { component, .. } => Some(*component),
            _ => None,
        }
    }
}

pub type LoomResult<T> = Result<T, LoomError>;
