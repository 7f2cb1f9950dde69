//! Manifold representations for variables living on non-Euclidean spaces.
//!
//! Two groups are provided, which is what the incremental engine needs from its
//! value collaborators:
//! - **Rⁿ**: Euclidean vectors (landmarks, biases, calibration)
//! - **SE(2)**: Rigid transformations in 2D (planar robot poses)
//!
//! Lie group M,° | size   | dim | X ∈ M             | Exp(T)        | Comp. | Action
//! ------------- | ------ | --- | ----------------- | ------------- | ----- | ------
//! n-D vector    | Rⁿ,+   | n   | v ∈ Rⁿ            | v = exp(v)    | v₁+v₂ | v + x
//! Rigid motion  | SE(2),.| 3   | M = [R t; 0 1]    | Exp([v̂])      | M₁M₂  | Rx+t
//!
//! Perturbations are taken on the right, following the
//! [manif](https://github.com/artivis/manif) conventions:
//!
//! ```text
//! X ⊞ τ = X ∘ Exp(τ)
//! Y ⊟ X = Log(X⁻¹ ∘ Y)
//! ```
//!
//! Tangent vectors are plain `DVector<f64>` so that heterogeneous variables can
//! share one linear delta container.

use nalgebra::{DMatrix, DVector};
use std::fmt;
use thiserror::Error;

pub mod rn;
pub mod se2;

/// Errors that can occur during manifold operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ManifoldError {
    /// Invalid tangent vector dimension
    #[error("Invalid tangent dimension: expected {expected}, got {actual}")]
    InvalidTangentDimension { expected: usize, actual: usize },

    /// Two values of different manifold types were combined
    #[error("Manifold type mismatch: {expected} vs {actual}")]
    TypeMismatch {
        expected: ManifoldType,
        actual: ManifoldType,
    },

    /// Dimension validation failed during conversion
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// NaN or Inf detected in manifold element
    #[error("Invalid number: NaN or Inf detected")]
    InvalidNumber,
}

/// Result type for manifold operations.
pub type ManifoldResult<T> = Result<T, ManifoldError>;

/// The manifold a variable lives on. Used to select per-type relinearization
/// thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ManifoldType {
    RN,
    SE2,
}

impl fmt::Display for ManifoldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifoldType::RN => write!(f, "Rn"),
            ManifoldType::SE2 => write!(f, "SE2"),
        }
    }
}

/// Core trait for Lie group operations used by factors and values.
///
/// Jacobians are with respect to right perturbations in the tangent space.
pub trait LieGroup: Clone + PartialEq + fmt::Debug + Send + Sync {
    /// Tangent space dimension (degrees of freedom) of this element.
    fn tangent_dim(&self) -> usize;

    /// Group inverse X⁻¹.
    fn inverse(&self) -> Self;

    /// Group composition X ∘ Y.
    fn compose(&self, other: &Self) -> Self;

    /// Exponential map from the tangent space.
    fn exp(tangent: &DVector<f64>) -> Self;

    /// Logarithmic map to the tangent space.
    fn log(&self) -> DVector<f64>;

    /// Adjoint matrix Ad(X), mapping tangent vectors at X to the identity.
    fn adjoint(&self) -> DMatrix<f64>;

    /// Right Jacobian Jr(τ) of the exponential map.
    fn right_jacobian(tangent: &DVector<f64>) -> DMatrix<f64>;

    /// Inverse of the right Jacobian.
    fn right_jacobian_inverse(tangent: &DVector<f64>) -> DMatrix<f64> {
        let jr = Self::right_jacobian(tangent);
        let n = jr.nrows();
        jr.try_inverse().unwrap_or_else(|| DMatrix::identity(n, n))
    }

    /// Right plus: X ⊞ τ = X ∘ Exp(τ).
    fn plus(&self, tangent: &DVector<f64>) -> Self {
        self.compose(&Self::exp(tangent))
    }

    /// Right minus: self ⊟ other = Log(other⁻¹ ∘ self).
    fn minus(&self, other: &Self) -> DVector<f64> {
        other.inverse().compose(self).log()
    }

    /// Approximate equality in the tangent space.
    fn is_approx(&self, other: &Self, tolerance: f64) -> bool {
        self.minus(other).amax() <= tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifold::{rn::Rn, se2::SE2};
    use nalgebra::dvector;

    const TOLERANCE: f64 = 1e-9;

    #[test]
    fn test_plus_minus_roundtrip_se2() {
        let a = SE2::from_xy_angle(1.0, -2.0, 0.7);
        let b = SE2::from_xy_angle(-0.5, 3.0, -2.1);
        let tau = b.minus(&a);
        assert!(a.plus(&tau).is_approx(&b, TOLERANCE));
    }

    #[test]
    fn test_right_jacobian_inverse_is_inverse() {
        let tau = dvector![0.3, -0.2, 0.9];
        let product = SE2::right_jacobian(&tau) * SE2::right_jacobian_inverse(&tau);
        assert!((product - DMatrix::<f64>::identity(3, 3)).amax() < TOLERANCE);
    }

    #[test]
    fn test_rn_group_is_vector_addition() {
        let a = Rn::from_vec(vec![1.0, 2.0]);
        let b = Rn::from_vec(vec![4.0, -1.0]);
        assert_eq!(a.compose(&b).data(), &dvector![5.0, 1.0]);
        assert_eq!(b.minus(&a), dvector![3.0, -3.0]);
    }

    #[test]
    fn test_manifold_error_display() {
        let err = ManifoldError::TypeMismatch {
            expected: ManifoldType::SE2,
            actual: ManifoldType::RN,
        };
        assert!(err.to_string().contains("SE2"));
    }
}
