//! Compilation errors.
//!
//! Every fallible graph operation returns [`CompileResult`]. Failures are
//! fatal to the compilation they occur in and never to the host process.

use thiserror::Error;

use crate::ir::NodeId;

/// Errors that abort a compilation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// A graph mutation or verification found a broken invariant.
    #[error("invariant violation at {node:?}: {message}")]
    InvariantViolation {
        node: Option<NodeId>,
        message: String,
    },

    /// A rewrite loop exceeded its iteration budget.
    #[error("canonicalization did not terminate: rule `{rule}` kept firing ({iterations} iterations, budget {budget})")]
    NonTermination {
        rule: String,
        iterations: usize,
        budget: usize,
    },

    /// The compilation was cancelled by its owner.
    #[error("compilation cancelled before phase `{phase}`")]
    Cancelled { phase: String },
}

impl CompileError {
    /// Invariant violation attributed to a node.
    pub fn invariant(node: NodeId, message: impl Into<String>) -> Self {
        CompileError::InvariantViolation {
            node: Some(node),
            message: message.into(),
        }
    }

    /// Invariant violation not tied to a single node.
    pub fn graph_invariant(message: impl Into<String>) -> Self {
        CompileError::InvariantViolation {
            node: None,
            message: message.into(),
        }
    }

    /// Check whether this is a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CompileError::Cancelled { .. })
    }
}

/// Result alias for compilation operations.
pub type CompileResult<T> = Result<T, CompileError>;
