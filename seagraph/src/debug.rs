//! Per-compilation diagnostics and process-wide metric aggregation.
//!
//! A [`DebugContext`] travels with one compilation and collects named
//! counters, phase timers and diagnostics, and forwards graph snapshots to
//! the registered [`DumpHandler`]s. When the compilation ends its numbers are
//! folded into a shared [`GlobalMetrics`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::ir::Graph;
use crate::options::DumpLevel;

// =============================================================================
// Dump Handlers
// =============================================================================

/// Receiver of graph snapshots taken between phases.
pub trait DumpHandler: Send + Sync {
    fn dump(&self, graph: &Graph, title: &str);
}

/// Emits every snapshot as a `tracing` debug event.
#[derive(Debug, Default)]
pub struct TracingDumpHandler;

impl DumpHandler for TracingDumpHandler {
    fn dump(&self, graph: &Graph, title: &str) {
        tracing::debug!(graph = graph.name(), nodes = graph.len(), "{title}\n{graph:?}");
    }
}

/// Keeps `(title, live node count)` for every snapshot.
#[derive(Debug, Default)]
pub struct CollectingDumpHandler {
    dumps: Mutex<Vec<(String, usize)>>,
}

impl CollectingDumpHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots received so far.
    pub fn dumps(&self) -> Vec<(String, usize)> {
        self.dumps.lock().clone()
    }
}

impl DumpHandler for CollectingDumpHandler {
    fn dump(&self, graph: &Graph, title: &str) {
        self.dumps.lock().push((title.to_string(), graph.len()));
    }
}

// =============================================================================
// Debug Context
// =============================================================================

/// Diagnostics sink for one compilation.
#[derive(Default)]
pub struct DebugContext {
    counters: FxHashMap<&'static str, u64>,
    timers: FxHashMap<&'static str, Duration>,
    diagnostics: Vec<String>,
    dump_level: DumpLevel,
    handlers: Vec<Arc<dyn DumpHandler>>,
}

impl DebugContext {
    pub fn new(dump_level: DumpLevel) -> Self {
        Self {
            dump_level,
            ..Default::default()
        }
    }

    /// Register a dump handler.
    pub fn add_dump_handler(&mut self, handler: Arc<dyn DumpHandler>) {
        self.handlers.push(handler);
    }

    #[inline]
    pub fn dump_level(&self) -> DumpLevel {
        self.dump_level
    }

    /// Add `by` to a named counter.
    #[inline]
    pub fn increment(&mut self, name: &'static str, by: u64) {
        *self.counters.entry(name).or_insert(0) += by;
    }

    /// Current value of a named counter.
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    /// All counters, sorted by name.
    pub fn counters(&self) -> Vec<(&'static str, u64)> {
        let mut all: Vec<_> = self.counters.iter().map(|(k, v)| (*k, *v)).collect();
        all.sort_unstable();
        all
    }

    /// Accumulate time under a named timer.
    pub fn add_time(&mut self, name: &'static str, elapsed: Duration) {
        *self.timers.entry(name).or_default() += elapsed;
    }

    /// Run `f` and charge its wall time to `name`.
    pub fn time<T>(&mut self, name: &'static str, f: impl FnOnce(&mut Self) -> T) -> T {
        let start = Instant::now();
        let result = f(self);
        self.add_time(name, start.elapsed());
        result
    }

    /// Accumulated time for a named timer.
    pub fn timer(&self, name: &str) -> Duration {
        self.timers.get(name).copied().unwrap_or_default()
    }

    /// Record a non-fatal diagnostic.
    pub fn diagnostic(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        self.diagnostics.push(message);
    }

    /// Diagnostics recorded so far.
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    /// Forward a snapshot to the handlers if `level` is enabled.
    pub fn dump(&self, graph: &Graph, level: DumpLevel, title: &str) {
        if level == DumpLevel::None || self.dump_level < level {
            return;
        }
        for handler in &self.handlers {
            handler.dump(graph, title);
        }
    }
}

impl std::fmt::Debug for DebugContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugContext")
            .field("counters", &self.counters)
            .field("timers", &self.timers)
            .field("diagnostics", &self.diagnostics)
            .field("dump_level", &self.dump_level)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

// =============================================================================
// Global Metrics
// =============================================================================

#[derive(Debug, Default, Clone)]
struct MetricsInner {
    counters: FxHashMap<&'static str, u64>,
    timers: FxHashMap<&'static str, Duration>,
    compilations: u64,
    failures: u64,
}

/// Counters and timers aggregated across concurrent compilations.
#[derive(Debug, Default)]
pub struct GlobalMetrics {
    inner: Mutex<MetricsInner>,
}

impl GlobalMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a finished compilation into the totals.
    pub fn record(&self, ctx: &DebugContext, succeeded: bool) {
        let mut inner = self.inner.lock();
        inner.compilations += 1;
        if !succeeded {
            inner.failures += 1;
        }
        for (name, value) in &ctx.counters {
            *inner.counters.entry(*name).or_insert(0) += value;
        }
        for (name, elapsed) in &ctx.timers {
            *inner.timers.entry(*name).or_default() += *elapsed;
        }
    }

    pub fn compilations(&self) -> u64 {
        self.inner.lock().compilations
    }

    pub fn failures(&self) -> u64 {
        self.inner.lock().failures
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.inner.lock().counters.get(name).copied().unwrap_or(0)
    }

    pub fn timer(&self, name: &str) -> Duration {
        self.inner.lock().timers.get(name).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_timers() {
        let mut ctx = DebugContext::new(DumpLevel::None);
        ctx.increment("rewrites", 2);
        ctx.increment("rewrites", 3);
        assert_eq!(ctx.counter("rewrites"), 5);
        assert_eq!(ctx.counter("missing"), 0);
        let value = ctx.time("phase", |c| {
            c.increment("inner", 1);
            7
        });
        assert_eq!(value, 7);
        assert_eq!(ctx.counters(), vec![("inner", 1), ("rewrites", 5)]);
    }

    #[test]
    fn test_dump_levels() {
        let handler = Arc::new(CollectingDumpHandler::new());
        let mut ctx = DebugContext::new(DumpLevel::Tiers);
        ctx.add_dump_handler(handler.clone());
        let graph = Graph::new("g");
        ctx.dump(&graph, DumpLevel::Tiers, "after high tier");
        ctx.dump(&graph, DumpLevel::Phases, "after canonicalizer");
        assert_eq!(handler.dumps(), vec![("after high tier".to_string(), 1)]);
    }

    #[test]
    fn test_global_metrics_aggregate() {
        let metrics = GlobalMetrics::new();
        let mut a = DebugContext::default();
        a.increment("rewrites", 4);
        let mut b = DebugContext::default();
        b.increment("rewrites", 1);
        metrics.record(&a, true);
        metrics.record(&b, false);
        assert_eq!(metrics.compilations(), 2);
        assert_eq!(metrics.failures(), 1);
        assert_eq!(metrics.counter("rewrites"), 5);
    }
}
