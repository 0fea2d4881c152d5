//! Worklist-driven canonicalizer.
//!
//! Each popped node goes through, in order:
//!
//! 1. **Dead check**: unused removable nodes are killed with their unused
//!    floating inputs
//! 2. **Value numbering**: an identical node takes over all usages
//! 3. **Canonicalization**: custom rules, then the built-in
//!    [`canonical`](super::canonical::canonical) rules
//! 4. **Simplification**: side-effecting control-flow rewrites
//! 5. **Stamp inference**: stamps are narrowed from the input stamps
//!
//! Any change re-queues the affected nodes. The loop runs to a fixpoint or
//! until the iteration budget is spent, which is reported as
//! [`CompileError::NonTermination`] naming the rule that fired most.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::canonical::{canonical, CanonicalRule, Replacement, Target};
use super::simplify::simplify;
use super::worklist::NodeWorkList;
use super::{Phase, PhaseContext};
use crate::error::{CompileError, CompileResult};
use crate::ir::{Graph, NodeId};

/// Iterations between two cancellation checks.
const CANCEL_CHECK_INTERVAL: usize = 256;

/// Budget per live node when none is configured.
const ITERATIONS_PER_NODE: usize = 100;

/// Budget floor when none is configured.
const MIN_ITERATIONS: usize = 1000;

// =============================================================================
// Statistics
// =============================================================================

/// Statistics from one canonicalizer run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalizerStats {
    /// Nodes popped from the worklist.
    pub iterations: usize,
    /// Canonical replacements and simplifications applied.
    pub rewrites: usize,
    /// Nodes whose stamp narrowed.
    pub stamps_refined: usize,
    /// Nodes deleted.
    pub nodes_killed: usize,
    /// Nodes merged into an identical node.
    pub gvn_merges: usize,
    /// Nodes left alone because no rule handles their shape.
    pub unsupported: usize,
    /// Applications per rule.
    pub rule_counts: FxHashMap<&'static str, usize>,
}

impl CanonicalizerStats {
    fn count(&mut self, rule: &'static str) {
        *self.rule_counts.entry(rule).or_insert(0) += 1;
    }

    /// Rule applied most often, ties broken by name.
    pub fn most_applied(&self) -> Option<(&'static str, usize)> {
        self.rule_counts
            .iter()
            .map(|(r, c)| (*r, *c))
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
    }

    /// Applications of one rule.
    pub fn applied(&self, rule: &str) -> usize {
        self.rule_counts.get(rule).copied().unwrap_or(0)
    }
}

// =============================================================================
// Canonicalizer Phase
// =============================================================================

/// Runs canonicalization to a fixpoint.
#[derive(Clone)]
pub struct CanonicalizerPhase {
    custom: Vec<Arc<dyn CanonicalRule>>,
    simplify: bool,
}

impl CanonicalizerPhase {
    pub fn new() -> Self {
        Self {
            custom: Vec::new(),
            simplify: true,
        }
    }

    /// Canonical rules only; control flow is left untouched.
    pub fn without_simplification() -> Self {
        Self {
            simplify: false,
            ..Self::new()
        }
    }

    /// Register an extra rule, consulted before the built-in ones.
    pub fn with_rule(mut self, rule: impl CanonicalRule + 'static) -> Self {
        self.custom.push(Arc::new(rule));
        self
    }

    /// Canonicalize the whole graph.
    pub fn apply(&self, graph: &mut Graph, ctx: &mut PhaseContext) -> CompileResult<CanonicalizerStats> {
        let seeds = graph.snapshot();
        self.apply_to(graph, ctx, seeds)
    }

    /// Canonicalize starting from `seeds`.
    pub fn apply_to(
        &self,
        graph: &mut Graph,
        ctx: &mut PhaseContext,
        seeds: impl IntoIterator<Item = NodeId>,
    ) -> CompileResult<CanonicalizerStats> {
        graph.check_cancellation(self.name())?;
        let mut worklist = NodeWorkList::new(ctx.options.worklist_order);
        worklist.extend(seeds);

        let budget = match ctx.options.max_worklist_iterations {
            0 => ITERATIONS_PER_NODE * graph.len() + MIN_ITERATIONS,
            n => n,
        };
        let mut stats = CanonicalizerStats::default();
        let result = self.drain(graph, &mut worklist, budget, &mut stats);

        ctx.debug.increment("canonicalizer.iterations", stats.iterations as u64);
        ctx.debug.increment("canonicalizer.rewrites", stats.rewrites as u64);
        ctx.debug.increment("canonicalizer.stamps_refined", stats.stamps_refined as u64);
        ctx.debug.increment("canonicalizer.gvn", stats.gvn_merges as u64);
        ctx.debug.increment("canonicalizer.unsupported", stats.unsupported as u64);
        for (rule, count) in &stats.rule_counts {
            ctx.debug.increment(*rule, *count as u64);
        }
        result.map(|()| stats)
    }

    fn drain(
        &self,
        graph: &mut Graph,
        worklist: &mut NodeWorkList,
        budget: usize,
        stats: &mut CanonicalizerStats,
    ) -> CompileResult<()> {
        while let Some(id) = worklist.pop() {
            stats.iterations += 1;
            if stats.iterations > budget {
                let rule = stats.most_applied().map_or("worklist", |(r, _)| r);
                tracing::warn!(
                    graph = graph.name(),
                    rule,
                    budget,
                    "canonicalizer did not reach a fixpoint"
                );
                return Err(CompileError::NonTermination {
                    rule: rule.to_string(),
                    iterations: stats.iterations,
                    budget,
                });
            }
            if stats.iterations % CANCEL_CHECK_INTERVAL == 0 {
                graph.check_cancellation(self.name())?;
            }
            if graph.contains(id) {
                self.process(graph, id, worklist, stats)?;
            }
        }
        Ok(())
    }

    fn process(
        &self,
        graph: &mut Graph,
        id: NodeId,
        worklist: &mut NodeWorkList,
        stats: &mut CanonicalizerStats,
    ) -> CompileResult<()> {
        let op = graph.op(id);
        if !graph.has_usages(id) && op.is_killable_when_unused() {
            let inputs = graph.inputs(id).to_vec();
            kill(graph, id, stats)?;
            worklist.extend(inputs.into_iter().filter(|i| graph.contains(*i)));
            return Ok(());
        }

        if let Some(duplicate) = graph.find_duplicate(id) {
            worklist.extend(graph.distinct_usages(id));
            graph.replace_all_usages(id, duplicate)?;
            kill(graph, id, stats)?;
            worklist.push(duplicate);
            stats.gvn_merges += 1;
            stats.count("gvn");
            return Ok(());
        }

        if self.try_canonicalize(graph, id, worklist, stats)? {
            return Ok(());
        }

        if self.simplify {
            if let Some(done) = simplify(graph, id)? {
                tracing::trace!(node = %id, rule = done.rule, "simplified");
                stats.rewrites += 1;
                stats.count(done.rule);
                worklist.extend(done.touched);
                return Ok(());
            }
        }

        if graph.try_infer_stamp(id) {
            stats.stamps_refined += 1;
            worklist.push(id);
            worklist.extend(graph.distinct_usages(id));
        }
        Ok(())
    }

    fn try_canonicalize(
        &self,
        graph: &mut Graph,
        id: NodeId,
        worklist: &mut NodeWorkList,
        stats: &mut CanonicalizerStats,
    ) -> CompileResult<bool> {
        let kind = graph.op(id).kind();
        let mut replacement = Replacement::Unchanged;
        for rule in self.custom.iter().filter(|r| r.applies_to(kind)) {
            replacement = rule.canonical(graph, id);
            if !replacement.is_unchanged() {
                break;
            }
        }
        if replacement.is_unchanged() {
            replacement = canonical(graph, id);
        }

        match replacement {
            Replacement::Unchanged => Ok(false),
            Replacement::Unsupported { rule } => {
                tracing::trace!(node = %id, rule, "unsupported shape");
                stats.unsupported += 1;
                Ok(false)
            }
            Replacement::ReplaceWith { target, rule } => {
                let target = match target {
                    Target::Existing(t) => t,
                    Target::New(template) => template.materialize(graph)?,
                };
                if target == id {
                    return Ok(false);
                }
                tracing::trace!(node = %id, %target, rule, "canonicalized");
                worklist.extend(graph.distinct_usages(id));
                let inputs = graph.inputs(id).to_vec();
                if graph.op(id).is_fixed() {
                    let before = graph.len();
                    graph.replace_fixed(id, Some(target))?;
                    stats.nodes_killed += before - graph.len();
                } else {
                    graph.replace_all_usages_except(id, target, target)?;
                    if !graph.has_usages(id) {
                        kill(graph, id, stats)?;
                    }
                }
                worklist.push(target);
                worklist.extend(inputs.into_iter().filter(|i| graph.contains(*i)));
                stats.rewrites += 1;
                stats.count(rule);
                Ok(true)
            }
            Replacement::Delete { rule } => {
                tracing::trace!(node = %id, rule, "deleted");
                let inputs = graph.inputs(id).to_vec();
                if graph.op(id).is_fixed() {
                    worklist.extend(graph.distinct_usages(id));
                    let before = graph.len();
                    graph.replace_fixed(id, None)?;
                    stats.nodes_killed += before - graph.len();
                } else {
                    detach_optional_usages(graph, id, worklist)?;
                    kill(graph, id, stats)?;
                }
                worklist.extend(inputs.into_iter().filter(|i| graph.contains(*i)));
                stats.rewrites += 1;
                stats.count(rule);
                Ok(true)
            }
        }
    }
}

impl Default for CanonicalizerPhase {
    fn default() -> Self {
        Self::new()
    }
}

impl Phase for CanonicalizerPhase {
    fn name(&self) -> &'static str {
        "Canonicalizer"
    }

    fn run(&self, graph: &mut Graph, ctx: &mut PhaseContext) -> CompileResult<()> {
        let stats = self.apply(graph, ctx)?;
        tracing::debug!(
            graph = graph.name(),
            iterations = stats.iterations,
            rewrites = stats.rewrites,
            "canonicalized"
        );
        Ok(())
    }
}

/// Delete `id` and its newly unused floating inputs, counting the nodes.
fn kill(graph: &mut Graph, id: NodeId, stats: &mut CanonicalizerStats) -> CompileResult<()> {
    let before = graph.len();
    graph.kill_with_unused_floating_inputs(id)?;
    stats.nodes_killed += before - graph.len();
    Ok(())
}

/// Drop every usage edge of `id`; all of them must be optional.
fn detach_optional_usages(graph: &mut Graph, id: NodeId, worklist: &mut NodeWorkList) -> CompileResult<()> {
    let mut edges = graph.usage_edges(id);
    // Later slots first so earlier indices stay valid.
    edges.sort_by(|a, b| a.user.cmp(&b.user).then(b.index.cmp(&a.index)));
    for edge in edges {
        if !graph.op(edge.user).is_optional_input(edge.index) {
            return Err(CompileError::invariant(
                id,
                format!("cannot delete: {} needs input {}", edge.user, edge.index),
            ));
        }
        graph.remove_input(edge.user, edge.index)?;
        worklist.push(edge.user);
    }
    Ok(())
}

// =============================================================================
// Incremental Canonicalization
// =============================================================================

/// Runs a phase, then canonicalizes only what that phase touched.
pub struct IncrementalCanonicalizerPhase {
    inner: Box<dyn Phase>,
    canonicalizer: CanonicalizerPhase,
}

impl IncrementalCanonicalizerPhase {
    pub fn new(inner: impl Phase + 'static) -> Self {
        Self {
            inner: Box::new(inner),
            canonicalizer: CanonicalizerPhase::new(),
        }
    }

    pub fn with_canonicalizer(mut self, canonicalizer: CanonicalizerPhase) -> Self {
        self.canonicalizer = canonicalizer;
        self
    }
}

impl Phase for IncrementalCanonicalizerPhase {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn run(&self, graph: &mut Graph, ctx: &mut PhaseContext) -> CompileResult<()> {
        graph.start_tracking();
        let result = self.inner.run(graph, ctx);
        let touched = graph.take_tracked();
        result?;

        let mut seeds = touched.clone();
        for &id in &touched {
            seeds.extend(graph.distinct_usages(id));
        }
        self.canonicalizer.apply_to(graph, ctx, seeds)?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
