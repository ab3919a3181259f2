//! Source Registry
//!
//! Ordered, append-only collection of source handles. Insertion order is
//! parse order, and parse order is merge order: a later source overrides
//! definitions of an earlier one.

use tracing::debug;

use crate::error::Result;
use crate::source::SourceHandle;

/// Ordered set of configuration sources
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<SourceHandle>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handle` unless an equal handle is already registered.
    ///
    /// Returns `Ok(true)` when the handle was added and `Ok(false)` for a
    /// duplicate. Empty handles are rejected.
    pub fn add(&mut self, handle: SourceHandle) -> Result<bool> {
        handle.validate()?;
        if self.contains(&handle) {
            debug!(source = %handle, "Source already registered");
            return Ok(false);
        }
        debug!(source = %handle, position = self.sources.len(), "Source registered");
        self.sources.push(handle);
        Ok(true)
    }

    pub fn contains(&self, handle: &SourceHandle) -> bool {
        self.sources.contains(handle)
    }

    /// Registered handles in insertion order
    pub fn list(&self) -> &[SourceHandle] {
        &self.sources
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SourceHandle> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl<'a> IntoIterator for &'a SourceRegistry {
    type Item = &'a SourceHandle;
    type IntoIter = std::slice::Iter<'a, SourceHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.sources.iter()
    }
}
