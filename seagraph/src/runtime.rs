//! Compiler runtime.
//!
//! Owns everything that outlives a single compilation: the resolved
//! options, the phase suites built from them, the snippet cache and the
//! global metrics. An embedder creates one runtime at startup, compiles any
//! number of graphs through it (concurrently if it likes) and calls
//! [`CompilerRuntime::shutdown`] at teardown.

use std::sync::Arc;

use rayon::prelude::*;

use crate::cache::SnippetCache;
use crate::debug::{DumpHandler, GlobalMetrics, TracingDumpHandler};
use crate::error::CompileResult;
use crate::ir::Graph;
use crate::opt::{PhaseContext, PipelineStats, Suites};
use crate::options::{CompilerOptions, DumpLevel, OptionError};

/// Process-scoped compiler state with an explicit lifecycle.
pub struct CompilerRuntime {
    options: CompilerOptions,
    suites: Suites,
    snippets: SnippetCache,
    metrics: GlobalMetrics,
    dump_handlers: Vec<Arc<dyn DumpHandler>>,
}

impl CompilerRuntime {
    /// Start a runtime with the given options. Dumps go to `tracing` unless
    /// the dump level is `None`.
    pub fn startup(options: CompilerOptions) -> Self {
        tracing::debug!(identity = options.identity(), "compiler runtime started");
        let mut dump_handlers: Vec<Arc<dyn DumpHandler>> = Vec::new();
        if options.dump_level != DumpLevel::None {
            dump_handlers.push(Arc::new(TracingDumpHandler));
        }
        Self {
            suites: Suites::from_options(&options),
            options,
            snippets: SnippetCache::new(),
            metrics: GlobalMetrics::new(),
            dump_handlers,
        }
    }

    /// Start a runtime with options read from the environment.
    pub fn from_env() -> Result<Self, OptionError> {
        Ok(Self::startup(CompilerOptions::from_env()?))
    }

    /// Register a dump handler for every later compilation.
    pub fn add_dump_handler(&mut self, handler: Arc<dyn DumpHandler>) {
        self.dump_handlers.push(handler);
    }

    #[inline]
    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    #[inline]
    pub fn suites(&self) -> &Suites {
        &self.suites
    }

    #[inline]
    pub fn snippets(&self) -> &SnippetCache {
        &self.snippets
    }

    #[inline]
    pub fn metrics(&self) -> &GlobalMetrics {
        &self.metrics
    }

    fn context(&self) -> PhaseContext {
        let mut ctx = PhaseContext::new(self.options.clone());
        for handler in &self.dump_handlers {
            ctx.debug.add_dump_handler(Arc::clone(handler));
        }
        ctx
    }

    /// Compile one graph. The outcome is folded into the global metrics
    /// whether or not it succeeded.
    pub fn compile(&self, graph: &mut Graph) -> CompileResult<PipelineStats> {
        let mut ctx = self.context();
        let result = self.suites.run(graph, &mut ctx);
        self.metrics.record(&ctx.debug, result.is_ok());
        if let Err(err) = &result {
            if err.is_cancelled() {
                tracing::debug!(graph = graph.name(), %err, "compilation cancelled");
            } else {
                tracing::warn!(graph = graph.name(), %err, "compilation failed");
            }
        }
        result
    }

    /// Compile independent graphs in parallel.
    pub fn compile_batch(&self, graphs: &mut [Graph]) -> Vec<CompileResult<PipelineStats>> {
        graphs.par_iter_mut().map(|graph| self.compile(graph)).collect()
    }

    /// A private copy of a prepared snippet graph. `build` produces the
    /// snippet and is only called when no cached copy exists, or always when
    /// the snippet cache is disabled.
    pub fn snippet<F>(&self, name: &str, build: F) -> CompileResult<Graph>
    where
        F: FnOnce() -> CompileResult<Graph>,
    {
        if !self.options.use_snippet_cache {
            return build();
        }
        self.snippets
            .instantiate(SnippetCache::key(name, &self.options), build)
    }

    /// Release process-scoped caches. Metrics stay readable.
    pub fn shutdown(&self) {
        tracing::debug!(
            compilations = self.metrics.compilations(),
            failures = self.metrics.failures(),
            snippets = self.snippets.len(),
            "compiler runtime shut down"
        );
        self.snippets.clear();
    }
}

impl Default for CompilerRuntime {
    fn default() -> Self {
        Self::startup(CompilerOptions::default())
    }
}

impl std::fmt::Debug for CompilerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerRuntime")
            .field("options", &self.options)
            .field("snippets", &self.snippets)
            .field("compilations", &self.metrics.compilations())
            .finish()
    }
}
