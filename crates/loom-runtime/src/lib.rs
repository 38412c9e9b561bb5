//! LOOM Runtime - Configuration, logging and the runtime facade
//!
//! Wires the core crates to the outside world:
//! - JSON configuration with human-readable durations
//! - `tracing-subscriber` setup (`LOOM_LOG` overrides the configured level)
//! - audit records forwarded to `tracing`
//! - host facts captured with `sysinfo` as the identity environment

pub mod config;
pub mod environment;
pub mod error;
pub mod runtime;
pub mod telemetry;

pub use config::*;
pub use environment::*;
pub use error::*;
pub use runtime::*;
pub use telemetry::*;
