//! Solvers for the linear correction `Δ` and the batch reference solver.
//!
//! - [`wildfire`]: bounded back-substitution through the Bayes tree
//! - [`dog_leg`]: Powell's dogleg trust-region step on the Bayes tree
//! - [`gauss_newton`]: batch Gauss-Newton over the whole graph, used as the
//!   reference the incremental solver is checked against

use crate::linalg;
use std::{
    fmt,
    fmt::{Display, Formatter},
    time,
};
use thiserror::Error;
use tracing::error;

pub mod dog_leg;
pub mod gauss_newton;
pub mod wildfire;

pub use dog_leg::{DoglegIteration, StepType, TrustRegionAdaptationMode};
pub use gauss_newton::{BatchGaussNewton, GaussNewtonConfig};
pub use wildfire::{WildfireUpdate, back_substitute, wildfire};

/// Optimizer-specific error types for apex-isam
#[derive(Debug, Clone, Error)]
pub enum OptimizerError {
    /// Linear system solve failed during optimization
    #[error("Linear system solve failed: {0}")]
    LinearSolveFailed(String),

    /// Invalid optimization parameters provided
    #[error("Invalid optimization parameters: {0}")]
    InvalidParameters(String),

    /// Linear algebra operation failed
    #[error("Linear algebra error: {0}")]
    LinAlg(#[from] linalg::LinAlgError),

    /// Problem has no variables to optimize
    #[error("Problem has no variables to optimize")]
    EmptyProblem,
}

impl OptimizerError {
    /// Log the error with tracing::error and return self for chaining
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error with the original source error from a third-party library
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Status of a batch optimization run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizationStatus {
    /// Maximum number of iterations reached
    MaxIterationsReached,
    /// Cost function tolerance reached
    CostToleranceReached,
    /// Parameter tolerance reached
    ParameterToleranceReached,
    /// Gradient tolerance reached
    GradientToleranceReached,
    /// Timeout reached
    Timeout,
    /// NaN or Inf detected in cost or parameters
    InvalidNumericalValues,
}

impl OptimizationStatus {
    /// Whether the run stopped because a tolerance was met.
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            OptimizationStatus::CostToleranceReached
                | OptimizationStatus::ParameterToleranceReached
                | OptimizationStatus::GradientToleranceReached
        )
    }
}

impl Display for OptimizationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationStatus::MaxIterationsReached => write!(f, "Maximum iterations reached"),
            OptimizationStatus::CostToleranceReached => write!(f, "Cost tolerance reached"),
            OptimizationStatus::ParameterToleranceReached => {
                write!(f, "Parameter tolerance reached")
            }
            OptimizationStatus::GradientToleranceReached => write!(f, "Gradient tolerance reached"),
            OptimizationStatus::Timeout => write!(f, "Timeout"),
            OptimizationStatus::InvalidNumericalValues => {
                write!(f, "Invalid numerical values (NaN/Inf) detected")
            }
        }
    }
}

/// Result of a solver execution.
#[derive(Debug, Clone)]
pub struct SolverResult<T> {
    /// Final parameters
    pub parameters: T,
    /// Final optimization status
    pub status: OptimizationStatus,
    /// Initial cost value
    pub initial_cost: f64,
    /// Final cost value
    pub final_cost: f64,
    /// Number of iterations performed
    pub iterations: usize,
    /// Total time elapsed
    pub elapsed_time: time::Duration,
}

impl<T> Display for SolverResult<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} after {} iterations: cost {:.6e} -> {:.6e} ({:?})",
            self.status, self.iterations, self.initial_cost, self.final_cost, self.elapsed_time
        )
    }
}
