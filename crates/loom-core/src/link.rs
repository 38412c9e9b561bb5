//! Connection vocabulary shared by components, composites and events

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of a directed connection between two components
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    /// Items flow from source to target during execution
    DataFlow,
    /// Source drives target's lifecycle
    Control,
    /// Source observes target; may form cycles
    Monitoring,
}

impl ConnectionType {
    /// Connections of this kind must keep the graph a DAG
    #[inline]
    pub fn is_acyclic(self) -> bool {
        matches!(self, ConnectionType::DataFlow | ConnectionType::Control)
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionType::DataFlow => f.write_str("data_flow"),
            ConnectionType::Control => f.write_str("control"),
            ConnectionType::Monitoring => f.write_str("monitoring"),
        }
    }
}

/// Circuit breaker state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerState::Closed => f.write_str("CLOSED"),
            BreakerState::Open => f.write_str("OPEN"),
            BreakerState::HalfOpen => f.write_str("HALF_OPEN"),
        }
    }
}
