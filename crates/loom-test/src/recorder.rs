//! Recording collaborators for assertions

use std::collections::HashMap;

use parking_lot::Mutex;

use loom_core::{
    AuditAction, AuditRecord, ComponentSnapshot, Event, EventKind, EventListener, SnapshotStore,
    Telemetry,
};

/// Listener that keeps every event it sees
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Event>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(|e| e.kind.clone()).collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(Event::name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventListener for RecordingListener {
    fn on_event(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }
}

/// Telemetry sink that keeps every audit record
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    records: Mutex<Vec<AuditRecord>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn actions(&self) -> Vec<AuditAction> {
        self.records.lock().iter().map(|r| r.action).collect()
    }
}

impl Telemetry for RecordingTelemetry {
    fn record(&self, record: &AuditRecord) {
        self.records.lock().push(record.clone());
    }
}

/// Snapshot store kept in memory, keyed by component id
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<HashMap<String, ComponentSnapshot>>,
    reject: bool,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose saves always fail
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&self, snapshot: &ComponentSnapshot) -> Result<(), String> {
        if self.reject {
            return Err("store is read-only".to_string());
        }
        self.snapshots
            .lock()
            .insert(snapshot.id.clone(), snapshot.clone());
        Ok(())
    }

    fn load(&self, component: &str) -> Option<ComponentSnapshot> {
        self.snapshots.lock().get(component).cloned()
    }
}
