use super::Factor;
use crate::manifold::LieGroup;
use nalgebra::{DMatrix, DVector};

/// Generic between factor for Lie group pose constraints.
///
/// Represents a relative pose measurement `Z` between two poses of any Lie group
/// manifold type, e.g. odometry or a loop closure in a 2D pose graph.
///
/// # Mathematical Formulation
///
/// ```text
/// r = Log(Z⁻¹ ∘ X_i⁻¹ ∘ X_j)
/// ```
///
/// # Jacobian Computation
///
/// With right perturbations on both poses:
///
/// ```text
/// ∂r/∂X_j = Jr⁻¹(r)
/// ∂r/∂X_i = -Jr⁻¹(r) · Ad(X_j⁻¹ ∘ X_i)
/// ```
///
/// The Jacobian is `DOF × (2 × DOF)`: `[∂r/∂X_i | ∂r/∂X_j]`.
///
/// # Example
///
/// ```
/// use apex_isam::factors::{Factor, BetweenFactor};
/// use apex_isam::manifold::se2::SE2;
/// use nalgebra::DVector;
///
/// // Measurement: robot moved 1m forward and rotated 0.1 rad
/// let between = BetweenFactor::new(SE2::from_xy_angle(1.0, 0.0, 0.1));
///
/// // Current pose estimates (in [x, y, theta] format)
/// let pose_i = DVector::from_vec(vec![0.0, 0.0, 0.0]);
/// let pose_j = DVector::from_vec(vec![0.95, 0.05, 0.12]);
///
/// let (residual, jacobian) = between.linearize(&[pose_i, pose_j], true);
/// assert_eq!(residual.len(), 3);
/// assert_eq!(jacobian.map(|j| j.ncols()), Some(6));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BetweenFactor<T: LieGroup> {
    /// The measured relative pose transformation between the two connected poses
    pub relative_pose: T,
}

impl<T: LieGroup> BetweenFactor<T> {
    /// Create a new between factor from a relative pose measurement.
    pub fn new(relative_pose: T) -> Self {
        Self { relative_pose }
    }
}

impl<T> Factor for BetweenFactor<T>
where
    T: LieGroup + From<DVector<f64>>,
{
    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> (DVector<f64>, Option<DMatrix<f64>>) {
        let pose_i = T::from(params[0].clone());
        let pose_j = T::from(params[1].clone());

        let predicted = pose_i.inverse().compose(&pose_j);
        let residual = self.relative_pose.inverse().compose(&predicted).log();

        let jacobian = compute_jacobian.then(|| {
            let dof = residual.len();
            let jr_inv = T::right_jacobian_inverse(&residual);
            let j_wrt_i = -(&jr_inv * pose_j.inverse().compose(&pose_i).adjoint());

            // Assemble full Jacobian: [∂r/∂pose_i | ∂r/∂pose_j]
            let mut jacobian = DMatrix::<f64>::zeros(dof, 2 * dof);
            jacobian.view_mut((0, 0), (dof, dof)).copy_from(&j_wrt_i);
            jacobian.view_mut((0, dof), (dof, dof)).copy_from(&jr_inv);
            jacobian
        });
        (residual, jacobian)
    }

    fn get_dimension(&self) -> usize {
        self.relative_pose.tangent_dim()
    }

    fn num_variables(&self) -> usize {
        2
    }
}
