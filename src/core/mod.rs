//! Core data structures for incremental factor graph estimation
//!
//! This module contains the bookkeeping the incremental engine sits on:
//! - Variable keys and the nonlinear value container
//! - The nonlinear factor graph with stable factor slots
//! - The variable index (variable → factors adjacency)

pub mod factor_graph;
pub mod values;
pub mod variable_index;

use crate::manifold::ManifoldError;
use thiserror::Error;
use tracing::error;

/// Opaque integer identifier of one unknown in the estimation problem.
pub type Key = usize;

/// Core module error types: input contract violations.
///
/// Every variant is raised before any state is mutated, so a rejected call
/// leaves the estimator untouched.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// A factor references a variable that is neither known nor being added
    #[error("Unknown variable: key {0} has no value")]
    UnknownVariable(Key),

    /// A variable was inserted that is already known
    #[error("Duplicate variable: key {0} is already present")]
    DuplicateVariable(Key),

    /// Removal of a factor index that does not exist or was already removed
    #[error("Invalid factor index: {0}")]
    InvalidFactorIndex(usize),

    /// Dimension mismatch between residual/Jacobian/variables
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Factor linearization failed
    #[error("Factor linearization failed: {0}")]
    FactorLinearization(String),

    /// Invalid input parameter or configuration
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A value or delta does not fit the variable's manifold
    #[error("Manifold error: {0}")]
    Manifold(#[from] ManifoldError),
}

impl CoreError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// # Example
    /// ```ignore
    /// operation()
    ///     .map_err(|e| CoreError::from(e).log())?;
    /// ```
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

/// Result type for core module operations
pub type CoreResult<T> = Result<T, CoreError>;
