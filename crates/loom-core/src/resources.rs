//! Named resource handles owned by a component

use std::collections::BTreeMap;

use tracing::warn;

use crate::{Resource, ResourceError};

/// Result of releasing every held resource
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReleaseSummary {
    pub released: Vec<String>,
    pub failures: Vec<(String, ResourceError)>,
}

impl ReleaseSummary {
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Handles processed, successful or not
    pub fn attempted(&self) -> usize {
        self.released.len() + self.failures.len()
    }
}

/// Resource table keyed by name, released in name order
#[derive(Default)]
pub struct ResourceTracker {
    handles: BTreeMap<String, Box<dyn Resource>>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a handle. A duplicate name hands the handle back untouched.
    pub fn insert(
        &mut self,
        name: String,
        handle: Box<dyn Resource>,
    ) -> Result<(), Box<dyn Resource>> {
        if self.handles.contains_key(&name) {
            return Err(handle);
        }
        self.handles.insert(name, handle);
        Ok(())
    }

    /// Release one handle. `None` if the name is not tracked.
    pub fn release(&mut self, name: &str) -> Option<Result<(), ResourceError>> {
        let mut handle = self.handles.remove(name)?;
        Some(handle.release())
    }

    /// Release everything, continuing past failures
    pub fn release_all(&mut self) -> ReleaseSummary {
        let mut summary = ReleaseSummary::default();
        for (name, mut handle) in std::mem::take(&mut self.handles) {
            match handle.release() {
                Ok(()) => summary.released.push(name),
                Err(e) => {
                    warn!(resource = %name, error = %e, "resource release failed");
                    summary.failures.push((name, e));
                }
            }
        }
        summary
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handles.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handles.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl std::fmt::Debug for ResourceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.handles.keys()).finish()
    }
}
