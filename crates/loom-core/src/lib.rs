//! LOOM Core - Components, identity and lifecycle
//!
//! This crate defines the building blocks every other LOOM crate uses:
//! - Identifiers and timestamps
//! - Lifecycle states, phases and the transition table
//! - Identities with lineage and hierarchical addresses
//! - Events and the hierarchical event dispatcher
//! - Components with resources, metadata and a termination grace timer
//! - Ports for processors, resources, telemetry, snapshots and configuration

pub mod id;
pub mod time;
pub mod error;
pub mod link;
pub mod lifecycle;
pub mod environment;
pub mod identity;
pub mod event;
pub mod dispatch;
pub mod ports;
pub mod resources;
pub mod timer;
pub mod component;

pub use id::*;
pub use time::*;
pub use error::*;
pub use link::*;
pub use lifecycle::*;
pub use environment::*;
pub use identity::*;
pub use event::*;
pub use dispatch::*;
pub use ports::*;
pub use resources::*;
pub use timer::*;
pub use component::*;
