//! Symbolic and numeric elimination machinery.
//!
//! - [`ordering`]: fill-reducing elimination orderings with constraint groups
//! - [`elimination_tree`]: column elimination tree and bottom-up elimination
//! - [`bayes_tree`]: the clique tree produced by elimination, with its caches

pub mod bayes_tree;
pub mod elimination_tree;
pub mod ordering;

pub use bayes_tree::{BayesTree, Clique, CliqueId, TreeEdit};
pub use elimination_tree::{EliminatedNode, EliminationTree};
pub use ordering::Ordering;

use crate::core::Key;
use thiserror::Error;
use tracing::error;

/// Structural faults of the factorization.
#[derive(Debug, Clone, Error)]
pub enum InferenceError {
    /// An orphaned subtree's separator is not covered by any re-eliminated clique
    #[error("Detached orphan: clique {clique} with separator {separator:?} has no parent")]
    DetachedOrphan { clique: CliqueId, separator: Vec<Key> },

    /// Ordering does not cover the keys it is used with, or repeats a key
    #[error("Invalid ordering: {0}")]
    InvalidOrdering(String),

    /// A clique's separator is not contained in its parent's variables
    #[error("Running intersection violated: {0}")]
    RunningIntersection(String),
}

impl InferenceError {
    /// Log the error with tracing::error and return self for chaining
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error together with the underlying source error.
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for inference operations
pub type InferenceResult<T> = Result<T, InferenceError>;
