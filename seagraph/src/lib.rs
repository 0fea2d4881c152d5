//! Sea-of-Nodes optimizing compiler core.
//!
//! Graph-based IR and the machinery that rewrites it:
//! - Arena-backed node store with bidirectional use-def edges
//! - Stamp lattice for abstract value ranges
//! - Worklist canonicalizer with value numbering and simplification
//! - Dead code elimination
//! - Tiered (high/mid/low) phase pipeline driven by [`CompilerOptions`]
#![forbid(unsafe_code)]

pub mod cache;
pub mod debug;
pub mod error;
pub mod ir;
pub mod opt;
pub mod options;
pub mod runtime;

pub use cache::SnippetCache;
pub use debug::{DebugContext, DumpHandler, GlobalMetrics};
pub use error::{CompileError, CompileResult};
pub use ir::{Graph, GraphBuilder, NodeId, Stamp};
pub use opt::pipeline::{compile, compile_batch};
pub use opt::{Phase, PhaseContext, PipelineStats, Suites, Tier};
pub use options::{CompilerOptions, DumpLevel, OptionError, SpectrePhtBarriers};
pub use runtime::CompilerRuntime;
