//! Ports: the traits through which components reach the outside world
//!
//! Adapters live in other crates. `loom-runtime` provides tracing-backed
//! telemetry and a host configuration source; `loom-test` provides
//! in-memory stores and recorders.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{ComponentSnapshot, LifecycleState, Timestamp};

/// Transforms one item of a data flow
pub trait Processor: Send {
    fn process(&mut self, input: Value) -> Result<Value, String>;
}

impl<F> Processor for F
where
    F: FnMut(Value) -> Result<Value, String> + Send,
{
    fn process(&mut self, input: Value) -> Result<Value, String> {
        self(input)
    }
}

/// Failure reported by a resource while releasing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct ResourceError {
    pub reason: String,
}

impl ResourceError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Anything a component holds and must give back at termination
pub trait Resource: Send {
    fn release(&mut self) -> Result<(), ResourceError>;
}

impl<F> Resource for F
where
    F: FnMut() -> Result<(), ResourceError> + Send,
{
    fn release(&mut self) -> Result<(), ResourceError> {
        self()
    }
}

/// What happened, for the audit trail
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Transitioned,
    FailureRecorded,
    ReleaseFailed,
    Terminated,
    Persisted,
}

/// One audit trail entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub component: String,
    pub address: String,
    pub action: AuditAction,
    pub from: Option<LifecycleState>,
    pub to: Option<LifecycleState>,
    pub detail: String,
    pub timestamp: Timestamp,
}

/// Receives audit records. Must not block.
pub trait Telemetry: Send + Sync {
    fn record(&self, record: &AuditRecord);
}

/// Telemetry sink that drops everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn record(&self, _record: &AuditRecord) {}
}

/// Durable storage for component snapshots
pub trait SnapshotStore: Send + Sync {
    fn save(&self, snapshot: &ComponentSnapshot) -> Result<(), String>;

    fn load(&self, component: &str) -> Option<ComponentSnapshot>;
}

/// Supplies environment facts at startup
pub trait ConfigSource: Send + Sync {
    fn environment_id(&self) -> String;

    fn facts(&self) -> BTreeMap<String, String>;
}
