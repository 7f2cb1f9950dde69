//! Prior factor for unary constraints on variables.

use super::Factor;
use crate::manifold::LieGroup;
use nalgebra::{DMatrix, DVector};

/// Prior factor (unary constraint) on a single variable.
///
/// Represents a direct measurement or prior belief about a variable's value. This is used
/// to anchor variables to known values, e.g. the first pose of a trajectory.
///
/// # Mathematical Formulation
///
/// The residual is measured on the manifold:
///
/// ```text
/// r = Log(X_prior⁻¹ ∘ X)
/// J = Jr⁻¹(r)
/// ```
///
/// For Rⁿ this reduces to `r = x - x_prior` with an identity Jacobian.
///
/// # Example
///
/// ```
/// use apex_isam::factors::{Factor, PriorFactor};
/// use apex_isam::manifold::se2::SE2;
/// use nalgebra::DVector;
///
/// let prior = PriorFactor::new(SE2::identity());
/// let current_pose = DVector::from_vec(vec![0.1, 0.05, 0.02]);
/// let (residual, jacobian) = prior.linearize(&[current_pose], true);
/// assert_eq!(residual.len(), 3);
/// assert!(jacobian.is_some());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PriorFactor<T: LieGroup> {
    /// The prior value (measurement or known value)
    pub prior: T,
}

impl<T: LieGroup> PriorFactor<T> {
    pub fn new(prior: T) -> Self {
        Self { prior }
    }
}

impl<T> Factor for PriorFactor<T>
where
    T: LieGroup + From<DVector<f64>>,
{
    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> (DVector<f64>, Option<DMatrix<f64>>) {
        let current = T::from(params[0].clone());
        let residual = current.minus(&self.prior);
        let jacobian = compute_jacobian.then(|| T::right_jacobian_inverse(&residual));
        (residual, jacobian)
    }

    fn get_dimension(&self) -> usize {
        self.prior.tangent_dim()
    }

    fn num_variables(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifold::{rn::Rn, se2::SE2};
    use nalgebra::dvector;

    const TOLERANCE: f64 = 1e-10;

    #[test]
    fn test_rn_prior_is_difference() {
        let prior = PriorFactor::new(Rn::from_vec(vec![1.0, 2.0]));
        let (residual, jacobian) = prior.linearize(&[dvector![1.5, 2.3]], true);
        assert!((residual[0] - 0.5).abs() < TOLERANCE);
        assert!((residual[1] - 0.3).abs() < TOLERANCE);
        assert_eq!(jacobian, Some(DMatrix::identity(2, 2)));
        assert_eq!(prior.get_dimension(), 2);
    }

    #[test]
    fn test_se2_prior_jacobian_matches_finite_difference() {
        let prior = PriorFactor::new(SE2::from_xy_angle(1.0, -1.0, 0.3));
        let x = SE2::from_xy_angle(1.2, -0.7, 0.8);
        let (r0, jacobian) = prior.linearize(&[x.clone().into()], true);
        let Some(jacobian) = jacobian else {
            panic!("jacobian requested");
        };
        let eps = 1e-7;
        for k in 0..3 {
            let mut delta = DVector::zeros(3);
            delta[k] = eps;
            let (r1, _) = prior.linearize(&[x.plus(&delta).into()], false);
            let column = (r1 - &r0) / eps;
            for row in 0..3 {
                assert!((column[row] - jacobian[(row, k)]).abs() < 1e-5);
            }
        }
    }
}
