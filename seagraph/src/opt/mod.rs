//! Graph Optimization Phases.
//!
//! # Components
//!
//! - **Canonical rules** (`canonical.rs`): Pure per-node rewrites
//! - **Simplifier** (`simplify.rs`): Side-effecting control-flow rewrites
//! - **Canonicalizer** (`canonicalizer.rs`): Worklist fixpoint driver
//! - **Dead code elimination** (`dce.rs`): Reachability-based cleanup
//! - **Memory** (`memory.rs`): Floating and re-fixing of reads
//! - **Guards** (`guards.rs`): Multi-guard helpers, guard lowering, fences
//! - **Pipeline** (`pipeline.rs`): Phase suites and compilation tiers
//!
//! Every phase implements [`Phase`]. A phase owns no graph state between
//! runs; per-compilation state lives in [`PhaseContext`].

pub mod canonical;
pub mod canonicalizer;
pub mod dce;
pub mod guards;
pub mod memory;
pub mod pipeline;
pub mod simplify;
pub mod worklist;

pub use canonical::{CanonicalRule, NodeTemplate, Operand, Replacement, Target};
pub use canonicalizer::{CanonicalizerPhase, CanonicalizerStats, IncrementalCanonicalizerPhase};
pub use dce::{DeadCodeEliminationPhase, Optionality};
pub use guards::{GuardLoweringPhase, InsertGuardFencesPhase};
pub use memory::{FixReadsPhase, FloatingReadPhase};
pub use pipeline::{PhaseStat, PhaseSuite, PipelineStats, Suites, Tier};
pub use worklist::{NodeWorkList, PopOrder};

use crate::debug::DebugContext;
use crate::error::CompileResult;
use crate::ir::Graph;
use crate::options::CompilerOptions;

/// State shared by all phases of one compilation.
#[derive(Debug, Default)]
pub struct PhaseContext {
    pub options: CompilerOptions,
    pub debug: DebugContext,
}

impl PhaseContext {
    pub fn new(options: CompilerOptions) -> Self {
        let debug = DebugContext::new(options.dump_level);
        Self { options, debug }
    }
}

/// A graph transformation.
pub trait Phase: Send + Sync {
    /// Get the phase name.
    fn name(&self) -> &'static str;

    /// Run the phase on a graph.
    fn run(&self, graph: &mut Graph, ctx: &mut PhaseContext) -> CompileResult<()>;
}
