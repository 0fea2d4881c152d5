//! Snippet template cache.
//!
//! Prepared snippet graphs are shared by every compilation in the process.
//! Entries are keyed by snippet name and the identity of the options they
//! were prepared under. Builders run outside any lock; when two threads race
//! on the same key both build, the first insert wins and the other result is
//! dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::CompileResult;
use crate::ir::Graph;
use crate::options::CompilerOptions;

/// Cache key: snippet name and option identity.
pub type SnippetKey = (Arc<str>, u64);

/// Process-scoped cache of prepared snippet graphs.
#[derive(Default)]
pub struct SnippetCache {
    entries: DashMap<SnippetKey, Arc<Graph>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SnippetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key for `name` prepared under `options`.
    pub fn key(name: &str, options: &CompilerOptions) -> SnippetKey {
        (Arc::from(name), options.identity())
    }

    /// Cached graph for `key`, building it with `build` on a miss.
    pub fn get_or_build<F>(&self, key: SnippetKey, build: F) -> CompileResult<Arc<Graph>>
    where
        F: FnOnce() -> CompileResult<Graph>,
    {
        if let Some(found) = self.entries.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(&found));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let built = Arc::new(build()?);
        let kept = self.entries.entry(key).or_insert(built);
        Ok(Arc::clone(&kept))
    }

    /// A private copy of the cached graph, ready to be spliced or mutated.
    pub fn instantiate<F>(&self, key: SnippetKey, build: F) -> CompileResult<Graph>
    where
        F: FnOnce() -> CompileResult<Graph>,
    {
        Ok(self.get_or_build(key, build)?.duplicate())
    }

    pub fn get(&self, key: &SnippetKey) -> Option<Arc<Graph>> {
        self.entries.get(key).map(|g| Arc::clone(&g))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl std::fmt::Debug for SnippetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnippetCache")
            .field("entries", &self.entries.len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}
