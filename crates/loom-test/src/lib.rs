//! LOOM Test Harness - Fault injection and scenario validation
//!
//! This crate provides:
//! - Fault-injecting processors and resources
//! - Recording listeners, telemetry and snapshot stores
//! - Linear pipeline builders
//! - End-to-end lifecycle, flow and machine scenarios

pub mod faults;
pub mod recorder;
pub mod pipeline;
pub mod integration;

pub use faults::*;
pub use recorder::*;
pub use pipeline::*;
pub use integration::*;
