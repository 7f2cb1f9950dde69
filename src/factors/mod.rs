//! Factor implementations for incremental factor graph estimation.
//!
//! Factors (also called constraints or error functions) represent measurements or relationships
//! between variables in a factor graph. Each factor computes a residual (error) vector and its
//! Jacobian with respect to the connected variables.
//!
//! # Factor Graph Formulation
//!
//! ```text
//! minimize Σ_i ||W_i r_i(x)||²
//! ```
//!
//! where:
//! - `x` is the set of variables (poses, landmarks, etc.)
//! - `r_i(x)` is the residual function for factor i
//! - `W_i` is the square-root information (whitening) matrix of its noise model
//!
//! # Two layers
//!
//! - [`Factor`]: the measurement model alone. It sees raw variable vectors and
//!   returns a residual and a Jacobian in tangent coordinates.
//! - [`NonlinearFactor`]: what the incremental engine consumes. It knows its
//!   variable keys, evaluates error on a [`Values`] assignment and linearizes into a
//!   whitened [`JacobianFactor`]. [`NoiseModelFactor`] adapts any [`Factor`].
//!
//! # Pose Factors
//! - [`BetweenFactor`]: relative pose constraints (SE2, Rⁿ)
//! - [`PriorFactor`]: unary constraints on single variables

use crate::core::{CoreResult, Key, values::Values};
use crate::linalg::JacobianFactor;
use nalgebra::{DMatrix, DVector};

pub mod between_factor;
pub mod noise_model_factor;
pub mod prior_factor;

pub use between_factor::BetweenFactor;
pub use noise_model_factor::NoiseModelFactor;
pub use prior_factor::PriorFactor;

/// Trait for measurement models.
///
/// A factor represents a measurement or constraint connecting one or more variables.
/// It computes the residual (error) and Jacobian for the current variable values.
///
/// # Thread Safety
///
/// Factors must be `Send + Sync` so that affected factors can be relinearized in parallel.
///
/// # Example
///
/// ```
/// use apex_isam::factors::Factor;
/// use nalgebra::{DMatrix, DVector};
///
/// // Simple 1D range measurement factor
/// struct RangeFactor {
///     measurement: f64,  // Measured distance
/// }
///
/// impl Factor for RangeFactor {
///     fn linearize(&self, params: &[DVector<f64>], compute_jacobian: bool) -> (DVector<f64>, Option<DMatrix<f64>>) {
///         // params[0] is a 2D point [x, y]
///         let x = params[0][0];
///         let y = params[0][1];
///
///         let predicted_distance = (x * x + y * y).sqrt();
///         let residual = DVector::from_vec(vec![predicted_distance - self.measurement]);
///
///         let jacobian = if compute_jacobian {
///             Some(DMatrix::from_row_slice(1, 2, &[
///                 x / predicted_distance,
///                 y / predicted_distance,
///             ]))
///         } else {
///             None
///         };
///
///         (residual, jacobian)
///     }
///
///     fn get_dimension(&self) -> usize { 1 }
///
///     fn num_variables(&self) -> usize { 1 }
/// }
/// ```
pub trait Factor: Send + Sync {
    /// Compute the residual and Jacobian at the given parameter values.
    ///
    /// # Arguments
    ///
    /// * `params` - Slice of variable values (one `DVector` per connected variable)
    /// * `compute_jacobian` - Whether to compute the Jacobian matrix
    ///
    /// # Returns
    ///
    /// Tuple `(residual, jacobian)` where:
    /// - `residual`: N-dimensional error vector
    /// - `jacobian`: N × M matrix where M is the total tangent dimension of all variables,
    ///   with perturbations taken on the right (`X ⊞ δ = X ∘ Exp(δ)`)
    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> (DVector<f64>, Option<DMatrix<f64>>);

    /// Get the dimension of the residual vector.
    fn get_dimension(&self) -> usize;

    /// Number of variables `linearize` expects in `params`.
    fn num_variables(&self) -> usize;
}

/// The capability set the incremental engine needs from a factor.
pub trait NonlinearFactor: Send + Sync {
    /// Ordered variable keys this factor touches.
    fn keys(&self) -> &[Key];

    /// Residual (row) dimension.
    fn dim(&self) -> usize;

    /// Whitened linearization `A δ - b` around `values`.
    fn linearize(&self, values: &Values) -> CoreResult<JacobianFactor>;

    /// Nonlinear error `0.5 * ||W r(x)||²`.
    fn error(&self, values: &Values) -> CoreResult<f64>;
}
