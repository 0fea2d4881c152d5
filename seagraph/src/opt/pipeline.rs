//! Tiered Phase Pipeline.
//!
//! A compilation runs three suites in order:
//!
//! 1. **High tier**: Canonicalization and early cleanup
//! 2. **Mid tier**: Floating reads, guard lowering, speculation barriers
//! 3. **Low tier**: Re-fixing reads and final cleanup
//!
//! Which phases a suite contains is decided once, from [`CompilerOptions`],
//! when the suites are built. Nothing at this level branches on graph
//! content; individual phases may still decide to do nothing.
//!
//! Every phase is preceded by a cancellation check, runs inside its own
//! `tracing` span and is charged to a timer named after it.

use std::time::{Duration, Instant};

use rayon::prelude::*;

use super::canonicalizer::{CanonicalizerPhase, IncrementalCanonicalizerPhase};
use super::dce::DeadCodeEliminationPhase;
use super::guards::{GuardLoweringPhase, InsertGuardFencesPhase};
use super::memory::{FixReadsPhase, FloatingReadPhase};
use super::{Phase, PhaseContext};
use crate::error::CompileResult;
use crate::ir::Graph;
use crate::options::{CompilerOptions, DumpLevel, SpectrePhtBarriers};

// =============================================================================
// Tier
// =============================================================================

/// Compilation tier, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    /// Machine-independent, high-level shape.
    High,
    /// Memory and guard restructuring.
    Mid,
    /// Final form handed to the backend.
    Low,
}

impl Tier {
    /// All tiers in execution order.
    pub const ALL: [Tier; 3] = [Tier::High, Tier::Mid, Tier::Low];

    pub fn name(self) -> &'static str {
        match self {
            Tier::High => "HighTier",
            Tier::Mid => "MidTier",
            Tier::Low => "LowTier",
        }
    }
}

// =============================================================================
// Phase Suite
// =============================================================================

/// An ordered list of phases, itself usable as a phase.
pub struct PhaseSuite {
    name: &'static str,
    phases: Vec<Box<dyn Phase>>,
}

impl PhaseSuite {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            phases: Vec::new(),
        }
    }

    /// Append a phase.
    pub fn append(&mut self, phase: impl Phase + 'static) {
        self.phases.push(Box::new(phase));
    }

    /// Append a phase followed by an incremental canonicalization of the
    /// nodes it touched, or the bare phase when canonicalization is off.
    pub fn append_canonicalized(&mut self, phase: impl Phase + 'static, canonicalize: bool) {
        if canonicalize {
            self.append(IncrementalCanonicalizerPhase::new(phase));
        } else {
            self.append(phase);
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Names of the contained phases, in execution order.
    pub fn phase_names(&self) -> Vec<&'static str> {
        self.phases.iter().map(|p| p.name()).collect()
    }

    /// Run every phase in order, recording one [`PhaseStat`] per phase.
    pub fn run_recorded(
        &self,
        graph: &mut Graph,
        ctx: &mut PhaseContext,
        stats: &mut Vec<PhaseStat>,
    ) -> CompileResult<()> {
        for phase in &self.phases {
            let name = phase.name();
            graph.check_cancellation(name)?;

            let span = tracing::debug_span!("phase", name, suite = self.name);
            let _enter = span.enter();

            let nodes_before = graph.len();
            let start = Instant::now();
            phase.run(graph, ctx)?;
            let time = start.elapsed();
            ctx.debug.add_time(name, time);

            if ctx.options.verify_graphs {
                graph.verify()?;
            }
            ctx.debug.dump(graph, DumpLevel::Phases, &format!("after {name}"));
            tracing::debug!(nodes_before, nodes_after = graph.len(), ?time, "phase done");

            stats.push(PhaseStat {
                name,
                suite: self.name,
                time,
                nodes_before,
                nodes_after: graph.len(),
            });
        }
        Ok(())
    }
}

impl Phase for PhaseSuite {
    fn name(&self) -> &'static str {
        self.name
    }

    fn run(&self, graph: &mut Graph, ctx: &mut PhaseContext) -> CompileResult<()> {
        self.run_recorded(graph, ctx, &mut Vec::new())
    }
}

// =============================================================================
// Suites
// =============================================================================

/// The three tier suites of one pipeline configuration.
pub struct Suites {
    high: PhaseSuite,
    mid: PhaseSuite,
    low: PhaseSuite,
}

impl Suites {
    /// Build the suites for an option set.
    pub fn from_options(options: &CompilerOptions) -> Self {
        let canonicalize = options.canonicalize;

        let mut high = PhaseSuite::new(Tier::High.name());
        if canonicalize {
            high.append(CanonicalizerPhase::new());
        }
        if options.dead_code_elimination {
            high.append(DeadCodeEliminationPhase::optional());
        }

        let mut mid = PhaseSuite::new(Tier::Mid.name());
        if options.opt_floating_reads {
            mid.append_canonicalized(FloatingReadPhase, canonicalize);
        }
        if options.guard_lowering {
            mid.append_canonicalized(GuardLoweringPhase, canonicalize);
        }
        if options.spectre_pht_barriers != SpectrePhtBarriers::None {
            mid.append(InsertGuardFencesPhase);
        }
        if canonicalize {
            mid.append(CanonicalizerPhase::new());
        }

        let mut low = PhaseSuite::new(Tier::Low.name());
        if options.opt_floating_reads {
            low.append(FixReadsPhase);
        }
        if canonicalize {
            low.append(CanonicalizerPhase::new());
        }
        if options.dead_code_elimination {
            low.append(DeadCodeEliminationPhase::optional());
        }

        Self { high, mid, low }
    }

    pub fn suite(&self, tier: Tier) -> &PhaseSuite {
        match tier {
            Tier::High => &self.high,
            Tier::Mid => &self.mid,
            Tier::Low => &self.low,
        }
    }

    pub fn suite_mut(&mut self, tier: Tier) -> &mut PhaseSuite {
        match tier {
            Tier::High => &mut self.high,
            Tier::Mid => &mut self.mid,
            Tier::Low => &mut self.low,
        }
    }

    /// Run all tiers on `graph`.
    pub fn run(&self, graph: &mut Graph, ctx: &mut PhaseContext) -> CompileResult<PipelineStats> {
        let start = Instant::now();
        let mut stats = PipelineStats {
            initial_size: graph.len(),
            ..Default::default()
        };

        for tier in Tier::ALL {
            let span = tracing::debug_span!("tier", graph = graph.name(), tier = tier.name());
            let _enter = span.enter();

            self.suite(tier).run_recorded(graph, ctx, &mut stats.phases)?;
            stats.tiers_run += 1;
            ctx.debug.dump(graph, DumpLevel::Tiers, &format!("after {}", tier.name()));
        }

        stats.total_time = start.elapsed();
        stats.final_size = graph.len();
        tracing::debug!(
            graph = graph.name(),
            initial = stats.initial_size,
            final_size = stats.final_size,
            time = ?stats.total_time,
            "pipeline done"
        );
        Ok(stats)
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics from a single phase run.
#[derive(Debug, Clone)]
pub struct PhaseStat {
    /// Phase name.
    pub name: &'static str,
    /// Suite the phase ran in.
    pub suite: &'static str,
    /// Wall time.
    pub time: Duration,
    /// Live nodes before the phase.
    pub nodes_before: usize,
    /// Live nodes after the phase.
    pub nodes_after: usize,
}

/// Statistics from the entire pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Number of tiers completed.
    pub tiers_run: usize,
    /// One entry per phase run.
    pub phases: Vec<PhaseStat>,
    /// Total time spent.
    pub total_time: Duration,
    /// Initial graph size.
    pub initial_size: usize,
    /// Final graph size.
    pub final_size: usize,
}

impl PipelineStats {
    /// Number of phases run.
    #[inline]
    pub fn phases_run(&self) -> usize {
        self.phases.len()
    }

    /// Get size reduction ratio.
    pub fn size_reduction(&self) -> f64 {
        if self.initial_size == 0 {
            1.0
        } else {
            self.final_size as f64 / self.initial_size as f64
        }
    }
}

// =============================================================================
// Quick Compile Functions
// =============================================================================

/// Run the pipeline for `options` on one graph.
pub fn compile(graph: &mut Graph, options: &CompilerOptions) -> CompileResult<PipelineStats> {
    let mut ctx = PhaseContext::new(options.clone());
    Suites::from_options(options).run(graph, &mut ctx)
}

/// Compile independent graphs in parallel. Each graph gets its own context;
/// a failure only affects its own entry.
pub fn compile_batch(graphs: &mut [Graph], options: &CompilerOptions) -> Vec<CompileResult<PipelineStats>> {
    let suites = Suites::from_options(options);
    graphs
        .par_iter_mut()
        .map(|graph| {
            let mut ctx = PhaseContext::new(options.clone());
            suites.run(graph, &mut ctx)
        })
        .collect()
}

/// Run the default pipeline on a graph.
pub fn optimize(graph: &mut Graph) -> CompileResult<PipelineStats> {
    compile(graph, &CompilerOptions::default())
}

/// Run the minimal pipeline on a graph.
pub fn optimize_minimal(graph: &mut Graph) -> CompileResult<PipelineStats> {
    compile(graph, &CompilerOptions::minimal())
}

/// Run the full pipeline on a graph.
pub fn optimize_full(graph: &mut Graph) -> CompileResult<PipelineStats> {
    compile(graph, &CompilerOptions::full())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::debug::CollectingDumpHandler;
    use crate::error::CompileError;
    use crate::ir::{BinaryOp, GraphBuilder, LocationIdentity, NodeKind, Operator, Stamp, ValueKind};

    fn chain() -> Graph {
        let mut b = GraphBuilder::new("chain");
        let p = b.parameter(0, Stamp::unrestricted(ValueKind::Int(32))).unwrap();
        let one = b.int(32, 1).unwrap();
        let two = b.int(32, 2).unwrap();
        let a = b.binary(BinaryOp::Add, p, one).unwrap();
        let c = b.binary(BinaryOp::Add, a, two).unwrap();
        b.return_value(Some(c)).unwrap();
        b.finish()
    }

    #[test]
    fn test_tier_ordering() {
        assert!(Tier::High < Tier::Mid);
        assert!(Tier::Mid < Tier::Low);
        assert_eq!(Tier::ALL.map(Tier::name), ["HighTier", "MidTier", "LowTier"]);
    }

    #[test]
    fn test_suites_default() {
        let suites = Suites::from_options(&CompilerOptions::default());
        assert_eq!(
            suites.suite(Tier::High).phase_names(),
            ["Canonicalizer", "DeadCodeElimination"]
        );
        assert_eq!(
            suites.suite(Tier::Mid).phase_names(),
            ["FloatingReads", "GuardLowering", "Canonicalizer"]
        );
        assert_eq!(
            suites.suite(Tier::Low).phase_names(),
            ["FixReads", "Canonicalizer", "DeadCodeElimination"]
        );
    }

    #[test]
    fn test_suites_minimal_and_full() {
        let minimal = Suites::from_options(&CompilerOptions::minimal());
        assert_eq!(minimal.suite(Tier::Mid).phase_names(), ["Canonicalizer"]);
        assert_eq!(
            minimal.suite(Tier::Low).phase_names(),
            ["Canonicalizer", "DeadCodeElimination"]
        );

        let full = Suites::from_options(&CompilerOptions::full());
        assert!(full.suite(Tier::Mid).phase_names().contains(&"InsertGuardFences"));
    }

    #[test]
    fn test_suites_everything_off() {
        let options = CompilerOptions {
            canonicalize: false,
            opt_floating_reads: false,
            guard_lowering: false,
            dead_code_elimination: false,
            ..Default::default()
        };
        let suites = Suites::from_options(&options);
        assert!(Tier::ALL.iter().all(|&t| suites.suite(t).is_empty()));

        let mut graph = chain();
        let before = graph.fingerprint();
        let stats = compile(&mut graph, &options).unwrap();
        assert_eq!(stats.tiers_run, 3);
        assert_eq!(stats.phases_run(), 0);
        assert_eq!(graph.fingerprint(), before);
    }

    #[test]
    fn test_pipeline_run_simple() {
        let mut graph = chain();
        let stats = optimize(&mut graph).unwrap();

        assert_eq!(stats.tiers_run, 3);
        assert_eq!(stats.phases_run(), 8);
        assert!(stats.final_size < stats.initial_size);
        assert!(stats.phases.iter().all(|p| !p.name.is_empty()));
        assert!(graph.verify().is_ok(), "{graph:?}");
    }

    #[test]
    fn test_optimize_functions() {
        for run in [optimize, optimize_minimal, optimize_full] {
            let mut graph = GraphBuilder::new("empty").finish();
            let stats = run(&mut graph).unwrap();
            assert_eq!(stats.tiers_run, 3);
            assert_eq!(stats.initial_size, stats.final_size);
        }
    }

    #[test]
    fn test_reads_round_trip_through_tiers() {
        let mut b = GraphBuilder::new("reads");
        let addr = b.parameter(0, Stamp::unrestricted(ValueKind::Int(64))).unwrap();
        let read = b
            .read(LocationIdentity(3), addr, Stamp::unrestricted(ValueKind::Int(32)))
            .unwrap();
        b.return_value(Some(read)).unwrap();
        let mut graph = b.finish();

        optimize(&mut graph).unwrap();
        assert_eq!(graph.snapshot_of(NodeKind::Read).len(), 1);
        assert!(graph.snapshot_of(NodeKind::FloatingRead).is_empty());
        let read = graph.snapshot_of(NodeKind::Read)[0];
        assert_eq!(graph.op(read), Operator::Read(LocationIdentity(3)));
        assert!(graph.verify().is_ok(), "{graph:?}");
    }

    #[test]
    fn test_cancelled_before_first_phase() {
        let mut graph = chain();
        graph.cancellation_token().cancel();
        let err = optimize(&mut graph).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(
            err,
            CompileError::Cancelled {
                phase: "Canonicalizer".to_string()
            }
        );
    }

    #[test]
    fn test_dumps_per_level() {
        for (level, expected) in [(DumpLevel::None, 0), (DumpLevel::Tiers, 3), (DumpLevel::Phases, 11)] {
            let options = CompilerOptions {
                dump_level: level,
                ..Default::default()
            };
            let handler = Arc::new(CollectingDumpHandler::new());
            let mut ctx = PhaseContext::new(options.clone());
            ctx.debug.add_dump_handler(handler.clone());

            let mut graph = chain();
            Suites::from_options(&options).run(&mut graph, &mut ctx).unwrap();
            assert_eq!(handler.dumps().len(), expected, "{level:?}");
        }
    }

    #[test]
    fn test_phase_timers_recorded() {
        let options = CompilerOptions::default();
        let mut ctx = PhaseContext::new(options.clone());
        let mut graph = chain();
        Suites::from_options(&options).run(&mut graph, &mut ctx).unwrap();
        assert!(ctx.debug.counter("canonicalizer.iterations") > 0);
        assert!(ctx.debug.counter("binary.reassociate") >= 1);
    }

    #[test]
    fn test_compile_batch() {
        let mut graphs: Vec<_> = (0..8).map(|_| chain()).collect();
        let results = compile_batch(&mut graphs, &CompilerOptions::default());
        assert_eq!(results.len(), 8);
        assert!(results.iter().all(|r| r.is_ok()));

        let first = graphs[0].fingerprint();
        assert!(graphs.iter().all(|g| g.fingerprint() == first));
    }

    #[test]
    fn test_pipeline_stats() {
        let stats = PipelineStats {
            total_time: Duration::from_millis(100),
            initial_size: 100,
            final_size: 80,
            ..Default::default()
        };

        assert_eq!(stats.size_reduction(), 0.8);
    }

    #[test]
    fn test_pipeline_stats_zero_size() {
        let stats = PipelineStats {
            initial_size: 0,
            final_size: 0,
            ..Default::default()
        };

        assert_eq!(stats.size_reduction(), 1.0);
    }
}
