//! LOOM Composite - Components wired into pipelines
//!
//! A composite groups components and connects them with typed, directed
//! connections. Each connection carries its own circuit breaker. Data flows
//! run over the DATA_FLOW graph in topological order and return a
//! partial-success report.

pub mod breaker;
pub mod connection;
pub mod topology;
pub mod composite;
pub mod flow;

pub use breaker::*;
pub use connection::*;
pub use topology::*;
pub use composite::*;
pub use flow::{FlowFailure, FlowReport};
pub use loom_core::BreakerState;
