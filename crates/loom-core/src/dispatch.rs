//! Hierarchical event dispatch
//!
//! Listeners register against a component id and are held weakly. Publishing
//! delivers to the source's listeners, then walks up the source identity's
//! lineage delivering to each ancestor's listeners, bounded by `max_depth`.
//! Dead registrations are pruned as they are encountered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::trace;

use crate::{ComponentId, Event, EventId, ListenerId};

/// Default number of ancestor levels an event climbs
pub const DEFAULT_MAX_DEPTH: usize = 16;

/// Receives published events. Called on the publisher's thread.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &Event);
}

impl<F> EventListener for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn on_event(&self, event: &Event) {
        self(event)
    }
}

/// Dispatcher configuration
#[derive(Clone, Debug)]
pub struct DispatchConfig {
    /// Ancestor levels visited above the source
    pub max_depth: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Outcome of a single publish
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub event: EventId,
    /// Listener invocations
    pub delivered: usize,
    /// Identities whose listeners were consulted, source included
    pub levels_visited: usize,
    /// Dead registrations removed during this publish
    pub pruned: usize,
    /// The walk stopped at `max_depth` with ancestors left
    pub truncated: bool,
}

/// Dispatcher statistics
#[derive(Clone, Copy, Debug, Default)]
pub struct DispatchStats {
    pub published: u64,
    pub delivered: u64,
    pub pruned: u64,
}

struct Registration {
    id: ListenerId,
    listener: Weak<dyn EventListener>,
}

struct DispatcherInner {
    config: DispatchConfig,
    listeners: RwLock<HashMap<ComponentId, Vec<Registration>>>,
    next_listener: AtomicU64,
    next_event: AtomicU64,
    delivered: AtomicU64,
    pruned: AtomicU64,
}

/// Cheaply clonable handle to a shared listener table
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<DispatcherInner>,
}

impl EventDispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                config,
                listeners: RwLock::new(HashMap::new()),
                next_listener: AtomicU64::new(1),
                next_event: AtomicU64::new(1),
                delivered: AtomicU64::new(0),
                pruned: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    /// Register a listener for events sourced at or below `component`.
    /// The dispatcher keeps only a weak reference.
    pub fn add_listener<L>(&self, component: ComponentId, listener: &Arc<L>) -> ListenerId
    where
        L: EventListener + 'static,
    {
        let shared: Arc<dyn EventListener> = listener.clone();
        self.add_shared_listener(component, &shared)
    }

    pub fn add_shared_listener(
        &self,
        component: ComponentId,
        listener: &Arc<dyn EventListener>,
    ) -> ListenerId {
        let id = ListenerId::new(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        self.inner
            .listeners
            .write()
            .entry(component)
            .or_default()
            .push(Registration {
                id,
                listener: Arc::downgrade(listener),
            });
        id
    }

    /// Remove a registration. Returns false if it was unknown or already pruned.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut table = self.inner.listeners.write();
        let mut removed = false;
        table.retain(|_, registrations| {
            let before = registrations.len();
            registrations.retain(|r| r.id != id);
            removed |= registrations.len() != before;
            !registrations.is_empty()
        });
        removed
    }

    /// Live listeners registered for `component`
    pub fn listener_count(&self, component: ComponentId) -> usize {
        self.inner
            .listeners
            .read()
            .get(&component)
            .map(|rs| rs.iter().filter(|r| r.listener.strong_count() > 0).count())
            .unwrap_or(0)
    }

    /// Deliver `event` to its source's listeners and then its ancestors'
    pub fn publish(&self, mut event: Event) -> DispatchReport {
        event.id = EventId::new(self.inner.next_event.fetch_add(1, Ordering::Relaxed));

        let mut report = DispatchReport {
            event: event.id,
            ..Default::default()
        };

        let max_depth = self.inner.config.max_depth;
        let mut current = Some(&event.source);
        let mut level = 0;

        while let Some(identity) = current {
            if level > max_depth {
                report.truncated = true;
                break;
            }

            let (live, pruned) = self.snapshot(identity.id());
            report.pruned += pruned;
            report.levels_visited += 1;

            for listener in live {
                listener.on_event(&event);
                report.delivered += 1;
            }

            if !event.bubbles {
                break;
            }
            current = identity.parent();
            level += 1;
        }

        self.inner
            .delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.inner
            .pruned
            .fetch_add(report.pruned as u64, Ordering::Relaxed);

        trace!(
            event = %event.id,
            kind = event.name(),
            source = %event.source.short_id(),
            delivered = report.delivered,
            levels = report.levels_visited,
            pruned = report.pruned,
            "event published"
        );

        report
    }

    /// Upgrade the listeners of one level, pruning dead ones. The lock is
    /// released before any listener runs.
    fn snapshot(&self, component: ComponentId) -> (Vec<Arc<dyn EventListener>>, usize) {
        let mut table = self.inner.listeners.write();
        let Some(registrations) = table.get_mut(&component) else {
            return (Vec::new(), 0);
        };

        let mut live = Vec::with_capacity(registrations.len());
        let before = registrations.len();
        registrations.retain(|r| match r.listener.upgrade() {
            Some(listener) => {
                live.push(listener);
                true
            }
            None => false,
        });
        let pruned = before - registrations.len();
        if registrations.is_empty() {
            table.remove(&component);
        }
        (live, pruned)
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            published: self.inner.next_event.load(Ordering::Relaxed) - 1,
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            pruned: self.inner.pruned.load(Ordering::Relaxed),
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DispatchConfig::default())
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("max_depth", &self.inner.config.max_depth)
            .field("components", &self.inner.listeners.read().len())
            .finish()
    }
}
