//! LOOM Machine - Orchestration of composites
//!
//! A machine owns ready composites, runs their data flows and tracks a
//! reduced lifecycle driven by critical circuit breakers. Machines live in
//! an explicit [`MachineRegistry`] arena rather than a process-wide table.

pub mod machine;
pub mod registry;

pub use machine::*;
pub use registry::*;
