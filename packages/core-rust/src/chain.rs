//! Built, immutable interceptor chains.

use std::fmt;
use std::sync::Arc;

use crate::interceptor::Interceptor;
use crate::phase::Phase;

/// One resolved position in a chain.
#[derive(Clone)]
pub struct ChainEntry {
    phase: Phase,
    interceptor: Arc<dyn Interceptor>,
}

impl ChainEntry {
    #[must_use]
    pub fn new(phase: Phase, interceptor: Arc<dyn Interceptor>) -> Self {
        Self { phase, interceptor }
    }

    #[must_use]
    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    #[must_use]
    pub fn interceptor(&self) -> &Arc<dyn Interceptor> {
        &self.interceptor
    }

    #[must_use]
    pub fn id(&self) -> &str {
        self.interceptor.id()
    }
}

impl fmt::Debug for ChainEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainEntry")
            .field("phase", &self.phase.name)
            .field("id", &self.id())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// Totally ordered sequence of interceptors.
///
/// A chain is never mutated after it is built; changing the interceptor set
/// produces a new chain. Clones share storage, so a chain can be handed to any
/// number of concurrent invocations.
#[derive(Clone)]
pub struct Chain {
    entries: Arc<[ChainEntry]>,
}

impl Chain {
    #[must_use]
    pub fn new(entries: Vec<ChainEntry>) -> Self {
        Self {
            entries: entries.into(),
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, position: usize) -> Option<&ChainEntry> {
        self.entries.get(position)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChainEntry> {
        self.entries.iter()
    }

    /// Interceptor ids in execution order.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(ChainEntry::id).collect()
    }

    /// Position of the interceptor with the given id.
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.id() == id)
    }

    /// Returns `true` if both handles share the same built storage.
    #[must_use]
    pub fn same_build(&self, other: &Chain) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.ids()).finish()
    }
}
