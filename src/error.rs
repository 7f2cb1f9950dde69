//! Error types for the apex-isam library
//!
//! This module provides the main error and result types used throughout the library.
//! All errors use the `thiserror` crate for automatic trait implementations.
//!
//! # Error Hierarchy
//!
//! - **`ApexIsamError`** is the top-level error returned by public APIs
//! - **Module errors** (`CoreError`, `LinAlgError`, `InferenceError`, ...) are
//!   wrapped inside it, so the source chain stays inspectable
//!
//! The module errors fall into three families, queried with
//! [`ApexIsamError::is_input_error`], [`ApexIsamError::is_numerical`] and
//! [`ApexIsamError::is_structural`]:
//!
//! ```text
//! input contract   CoreError::{UnknownVariable, DuplicateVariable, InvalidFactorIndex, ...}
//! numerical        LinAlgError::{IndefiniteSystem, IndeterminantSystem, SingularMatrix, ...}
//! structural       InferenceError::{DetachedOrphan, RunningIntersection, InvalidOrdering}
//! ```

use crate::{
    core::CoreError, inference::InferenceError, linalg::LinAlgError, manifold::ManifoldError,
    optimizer::OptimizerError,
};
use std::error::Error as StdError;
use thiserror::Error;

/// Main result type used throughout the apex-isam library
pub type ApexIsamResult<T> = Result<T, ApexIsamError>;

/// Main error type for the apex-isam library
///
/// # Error Chain Access
///
/// ```rust,ignore
/// if let Err(e) = isam.update(factors, values, &[], None, false) {
///     warn!("Full chain: {}", e.chain());
/// }
/// ```
#[derive(Debug, Error)]
pub enum ApexIsamError {
    /// Core module errors (values, factors, variable index)
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Dense and sparse linear algebra errors
    #[error(transparent)]
    LinearAlgebra(#[from] LinAlgError),

    /// Ordering and Bayes tree errors
    #[error(transparent)]
    Inference(#[from] InferenceError),

    /// Manifold operation errors
    #[error(transparent)]
    Manifold(#[from] ManifoldError),

    /// Batch solver and trust-region errors
    #[error(transparent)]
    Optimizer(#[from] OptimizerError),
}

impl ApexIsamError {
    /// Get the full error chain as a string for logging and debugging.
    pub fn chain(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(format!("  → {}", err));
            source = err.source();
        }

        chain.join("\n")
    }

    /// Get a compact single-line error chain for logging
    ///
    /// ```rust,ignore
    /// error!("Update failed: {}", err.chain_compact());
    /// ```
    pub fn chain_compact(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(err.to_string());
            source = err.source();
        }

        chain.join(" → ")
    }

    /// The caller passed something the estimator cannot accept.
    pub fn is_input_error(&self) -> bool {
        match self {
            ApexIsamError::Core(CoreError::Manifold(_)) => false,
            ApexIsamError::Core(_) => true,
            ApexIsamError::Manifold(_) => true,
            ApexIsamError::Optimizer(OptimizerError::InvalidParameters(_)) => true,
            _ => false,
        }
    }

    /// Elimination or a linear solve broke down numerically.
    pub fn is_numerical(&self) -> bool {
        match self {
            ApexIsamError::LinearAlgebra(_) => true,
            ApexIsamError::Optimizer(
                OptimizerError::LinAlg(_) | OptimizerError::LinearSolveFailed(_),
            ) => true,
            _ => false,
        }
    }

    /// The Bayes tree or an ordering is inconsistent.
    pub fn is_structural(&self) -> bool {
        matches!(self, ApexIsamError::Inference(_))
    }
}
