//! Component identity and lineage
//!
//! An identity is immutable once created. Identifiers are the first 16
//! bytes of a SHA-256 over the creation facts (reason, environment or
//! parent, timestamp and a random nonce). Children hold their parent's
//! identity record plus a weak reference to the parent component's state,
//! so a dropped parent component is detectable without keeping it alive.
//! The link also carries the parent's dispatcher, which a child component
//! adopts unless its builder is given another one.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use sha2::{Digest, Sha256};

use crate::{
    Component, ComponentId, Environment, EventDispatcher, LifecycleState, LoomError, LoomResult,
    StateCell, Timestamp,
};

/// Upper bound on ancestor walks
pub const MAX_LINEAGE_DEPTH: usize = 256;

/// Immutable, cheaply clonable component identity
#[derive(Clone)]
pub struct Identity {
    inner: Arc<IdentityInner>,
}

struct IdentityInner {
    id: ComponentId,
    reason: String,
    environment: String,
    created_at: Timestamp,
    context: BTreeMap<String, String>,
    parent: Option<ParentLink>,
    bound: AtomicBool,
}

struct ParentLink {
    identity: Identity,
    liveness: Weak<StateCell>,
    dispatcher: EventDispatcher,
}

impl Identity {
    /// Create a root identity in an environment
    pub fn create_root(reason: &str, environment: &Environment) -> Identity {
        let created_at = Timestamp::now();
        let id = derive_id(reason, environment.id(), created_at);

        let mut context = environment.facts().clone();
        context.insert("environment".to_string(), environment.id().to_string());

        Identity {
            inner: Arc::new(IdentityInner {
                id,
                reason: reason.to_string(),
                environment: environment.id().to_string(),
                created_at,
                context,
                parent: None,
                bound: AtomicBool::new(false),
            }),
        }
    }

    /// Create a child identity of a live component
    pub fn create_child(parent: &Component, reason: &str) -> LoomResult<Identity> {
        Identity::child_of(
            parent.identity(),
            parent.state_cell(),
            parent.dispatcher(),
            reason,
        )
    }

    pub(crate) fn child_of(
        parent: &Identity,
        liveness: &Arc<StateCell>,
        dispatcher: &EventDispatcher,
        reason: &str,
    ) -> LoomResult<Identity> {
        if liveness.get().is_terminating_or_terminal() {
            return Err(LoomError::ParentTerminated(parent.id()));
        }
        if parent.depth() + 1 > MAX_LINEAGE_DEPTH {
            return Err(LoomError::InvalidIdentity {
                id: parent.id(),
                reason: format!("lineage deeper than {MAX_LINEAGE_DEPTH}"),
            });
        }

        let created_at = Timestamp::now();
        let id = derive_id(reason, &parent.id().to_hex(), created_at);

        Ok(Identity {
            inner: Arc::new(IdentityInner {
                id,
                reason: reason.to_string(),
                environment: parent.inner.environment.clone(),
                created_at,
                context: parent.inner.context.clone(),
                parent: Some(ParentLink {
                    identity: parent.clone(),
                    liveness: Arc::downgrade(liveness),
                    dispatcher: dispatcher.clone(),
                }),
                bound: AtomicBool::new(false),
            }),
        })
    }

    #[inline]
    pub fn id(&self) -> ComponentId {
        self.inner.id
    }

    pub fn short_id(&self) -> String {
        self.inner.id.short()
    }

    pub fn reason(&self) -> &str {
        &self.inner.reason
    }

    pub fn environment_id(&self) -> &str {
        &self.inner.environment
    }

    pub fn created_at(&self) -> Timestamp {
        self.inner.created_at
    }

    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.inner.context
    }

    pub fn parent(&self) -> Option<&Identity> {
        self.inner.parent.as_ref().map(|link| &link.identity)
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.inner.parent.is_none()
    }

    /// Dispatcher of the component this identity was derived from
    pub(crate) fn inherited_dispatcher(&self) -> Option<EventDispatcher> {
        self.inner.parent.as_ref().map(|link| link.dispatcher.clone())
    }

    /// State of the parent's component, if it is still alive
    pub fn parent_state(&self) -> Option<LifecycleState> {
        self.inner
            .parent
            .as_ref()
            .and_then(|link| link.liveness.upgrade())
            .map(|cell| cell.get())
    }

    /// Roots always resolve; children resolve while the parent component exists
    pub fn parent_resolvable(&self) -> bool {
        match &self.inner.parent {
            None => true,
            Some(link) => link.liveness.strong_count() > 0,
        }
    }

    /// Walk up the lineage, nearest ancestor first
    pub fn ancestors(&self) -> Ancestors<'_> {
        Ancestors {
            next: self.parent(),
            remaining: MAX_LINEAGE_DEPTH,
        }
    }

    /// Number of ancestors (0 for a root)
    pub fn depth(&self) -> usize {
        self.ancestors().count()
    }

    /// Ancestor ids from the root down to this identity, inclusive
    pub fn lineage(&self) -> Vec<ComponentId> {
        let mut ids: Vec<ComponentId> = self.ancestors().map(Identity::id).collect();
        ids.reverse();
        ids.push(self.id());
        ids
    }

    /// Dotted short ids from the root, e.g. `C1a2b3c4d.5e6f7a8b`
    pub fn address(&self) -> String {
        let mut parts: Vec<String> = self.ancestors().map(Identity::short_id).collect();
        parts.reverse();
        parts.push(self.short_id());
        format!("C{}", parts.join("."))
    }

    /// Whether `ancestor` appears anywhere above this identity
    pub fn has_ancestor(&self, ancestor: ComponentId) -> bool {
        self.ancestors().any(|a| a.id() == ancestor)
    }

    pub fn is_ancestor_of(&self, other: &Identity) -> bool {
        other.has_ancestor(self.id())
    }

    /// Claim this identity for a component. Succeeds once.
    pub(crate) fn bind(&self) -> bool {
        self.inner
            .bound
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_bound(&self) -> bool {
        self.inner.bound.load(Ordering::Acquire)
    }
}

/// Iterator over an identity's ancestors, bounded by [`MAX_LINEAGE_DEPTH`]
pub struct Ancestors<'a> {
    next: Option<&'a Identity>,
    remaining: usize,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a Identity;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.next?;
        self.remaining -= 1;
        self.next = current.parent();
        Some(current)
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.inner.id)
            .field("reason", &self.inner.reason)
            .field("depth", &self.depth())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

/// First 16 bytes of SHA-256 over the creation facts
fn derive_id(reason: &str, anchor: &str, created_at: Timestamp) -> ComponentId {
    let nonce: u64 = rand::random();
    let mut hasher = Sha256::new();
    hasher.update(reason.as_bytes());
    hasher.update([0u8]);
    hasher.update(anchor.as_bytes());
    hasher.update(created_at.as_micros().to_le_bytes());
    hasher.update(nonce.to_le_bytes());
    let hash = hasher.finalize();
    let mut id_bytes = [0u8; 16];
    id_bytes.copy_from_slice(&hash[..16]);
    ComponentId::from_bytes(id_bytes)
}
