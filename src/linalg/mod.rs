//! Linear algebra for Gaussian elimination on factor graphs.
//!
//! Two levels live here:
//! - dense, per-clique objects used by the incremental engine
//!   ([`JacobianFactor`], [`GaussianConditional`], [`VectorValues`]), built on nalgebra;
//! - sparse whole-problem solvers ([`SparseCholeskySolver`], [`SparseQRSolver`]), built
//!   on faer and used by the batch reference optimizer.

pub mod cholesky;
pub mod conditional;
pub mod jacobian_factor;
pub mod qr;
pub mod vector_values;

use crate::core::Key;
use faer::{Mat, sparse::SparseColMat};
use std::{
    fmt,
    fmt::{Display, Formatter},
};
use thiserror::Error;
use tracing::error;

pub use cholesky::SparseCholeskySolver;
pub use conditional::GaussianConditional;
pub use jacobian_factor::JacobianFactor;
pub use qr::SparseQRSolver;
pub use vector_values::VectorValues;

/// Numeric method used to eliminate one variable from a joint factor.
///
/// QR works on the stacked Jacobian directly and never square-roots an
/// indefinite pivot; Cholesky forms the augmented information matrix and is
/// cheaper per clique.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Factorization {
    #[default]
    Cholesky,
    QR,
}

impl Display for Factorization {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Factorization::Cholesky => write!(f, "Cholesky"),
            Factorization::QR => write!(f, "QR"),
        }
    }
}

/// Linear algebra specific error types: numerical faults.
#[derive(Debug, Clone, Error)]
pub enum LinAlgError {
    /// Non-positive pivot while Cholesky-eliminating a variable
    #[error("Indefinite system: non-positive pivot while eliminating key {key}")]
    IndefiniteSystem { key: Key },

    /// Rank-deficient frontal block, typically an under-constrained variable
    #[error("Indeterminant system: key {key} is under-constrained")]
    IndeterminantSystem { key: Key },

    /// Matrix factorization failed (Cholesky, QR, etc.)
    #[error("Matrix factorization failed: {0}")]
    FactorizationFailed(String),

    /// Singular or near-singular matrix detected
    #[error("Singular matrix detected (matrix is not invertible)")]
    SingularMatrix,

    /// Failed to create sparse matrix from triplets
    #[error("Failed to create sparse matrix: {0}")]
    SparseMatrixCreation(String),

    /// Matrix format conversion failed
    #[error("Matrix conversion failed: {0}")]
    MatrixConversion(String),

    /// Block sizes disagree between factors, conditionals or vectors
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Back-substitution reached a conditional whose parent has no solution yet
    #[error("Missing solution for key {0}")]
    MissingSolution(Key),
}

impl LinAlgError {
    /// Log the error with tracing::error and return self for chaining
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error with the original source error from a third-party library
    ///
    /// This logs both the LinAlgError and the underlying error from faer
    /// (FaerError, LltError, CreationError), giving full debugging context.
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for linear algebra operations
pub type LinAlgResult<T> = Result<T, LinAlgError>;

/// Trait for sparse linear solvers of the Gauss-Newton normal equations.
pub trait SparseLinearSolver {
    /// Solve the normal equation: (J^T * J) * dx = -J^T * r
    ///
    /// # Errors
    /// Returns `LinAlgError` if:
    /// - Matrix factorization fails
    /// - Matrix is singular or ill-conditioned
    fn solve_normal_equation(
        &mut self,
        residuals: &Mat<f64>,
        jacobians: &SparseColMat<usize, f64>,
    ) -> LinAlgResult<Mat<f64>>;

    /// Get the cached Hessian matrix (J^T * J) from the last solve
    fn get_hessian(&self) -> Option<&SparseColMat<usize, f64>>;

    /// Get the cached gradient vector (J^T * r) from the last solve
    fn get_gradient(&self) -> Option<&Mat<f64>>;
}

/// Build a sparse linear solver for the given factorization.
pub fn sparse_solver(factorization: Factorization) -> Box<dyn SparseLinearSolver> {
    match factorization {
        Factorization::Cholesky => Box::new(SparseCholeskySolver::new()),
        Factorization::QR => Box::new(SparseQRSolver::new()),
    }
}
