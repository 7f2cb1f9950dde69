//! SE(2) - Special Euclidean Group in 2D
//!
//! This module implements the Special Euclidean group SE(2), which represents
//! rigid body transformations in 2D space (rotation + translation).
//!
//! SE(2) elements are represented as a combination of a `UnitComplex` rotation and
//! a `Vector2` translation. Tangent elements are `[x, y, theta]`, where x,y is the
//! translational component and theta the rotational component.
//!
//! The formulas follow the [manif](https://github.com/artivis/manif) C++ library.

use crate::manifold::LieGroup;
use nalgebra::{DMatrix, DVector, Matrix2, Matrix3, UnitComplex, Vector2};
use std::{
    fmt,
    fmt::{Display, Formatter},
};

/// Below this angle the series expansions of sin(θ)/θ and (1-cos θ)/θ are used.
const SMALL_ANGLE: f64 = 1e-10;

/// SE(2) group element representing rigid body transformations in 2D.
#[derive(Clone, Debug, PartialEq)]
pub struct SE2 {
    translation: Vector2<f64>,
    rotation: UnitComplex<f64>,
}

impl Display for SE2 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let t = self.translation();
        write!(
            f,
            "SE2(translation: [{:.4}, {:.4}], rotation: {:.4})",
            t.x,
            t.y,
            self.angle()
        )
    }
}

impl From<DVector<f64>> for SE2 {
    fn from(data: DVector<f64>) -> Self {
        // Input order is [x, y, theta]
        SE2::from_xy_angle(data[0], data[1], data[2])
    }
}

impl From<SE2> for DVector<f64> {
    fn from(se2: SE2) -> Self {
        DVector::from_vec(vec![
            se2.translation.x,
            se2.translation.y,
            se2.rotation.angle(),
        ])
    }
}

impl SE2 {
    /// Degrees of freedom - dimension of the tangent space
    pub const DOF: usize = 3;

    /// Get the identity element of the group.
    pub fn identity() -> Self {
        SE2 {
            translation: Vector2::zeros(),
            rotation: UnitComplex::identity(),
        }
    }

    /// Create a new SE2 element from translation and rotation.
    pub fn new(translation: Vector2<f64>, rotation: UnitComplex<f64>) -> Self {
        SE2 {
            translation,
            rotation,
        }
    }

    /// Create SE2 from translation components and angle.
    pub fn from_xy_angle(x: f64, y: f64, theta: f64) -> Self {
        Self::new(Vector2::new(x, y), UnitComplex::from_angle(theta))
    }

    pub fn translation(&self) -> Vector2<f64> {
        self.translation
    }

    pub fn rotation_matrix(&self) -> Matrix2<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    pub fn x(&self) -> f64 {
        self.translation.x
    }

    pub fn y(&self) -> f64 {
        self.translation.y
    }

    /// Rotation angle in (-π, π].
    pub fn angle(&self) -> f64 {
        self.rotation.angle()
    }

    /// Homogeneous 3×3 matrix form.
    pub fn matrix(&self) -> Matrix3<f64> {
        let r = self.rotation_matrix();
        Matrix3::new(
            r[(0, 0)],
            r[(0, 1)],
            self.translation.x,
            r[(1, 0)],
            r[(1, 1)],
            self.translation.y,
            0.0,
            0.0,
            1.0,
        )
    }
}

/// Returns (sin θ / θ, (1 - cos θ) / θ) with small-angle series near zero.
fn sinc_terms(theta: f64) -> (f64, f64) {
    if theta.abs() < SMALL_ANGLE {
        (1.0 - theta * theta / 6.0, theta / 2.0)
    } else {
        (theta.sin() / theta, (1.0 - theta.cos()) / theta)
    }
}

impl LieGroup for SE2 {
    fn tangent_dim(&self) -> usize {
        Self::DOF
    }

    fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        SE2 {
            translation: -(rotation * self.translation),
            rotation,
        }
    }

    fn compose(&self, other: &Self) -> Self {
        SE2 {
            translation: self.translation + self.rotation * other.translation,
            rotation: self.rotation * other.rotation,
        }
    }

    fn exp(tangent: &DVector<f64>) -> Self {
        let theta = tangent[2];
        let (a, b) = sinc_terms(theta);
        let translation = Vector2::new(
            a * tangent[0] - b * tangent[1],
            b * tangent[0] + a * tangent[1],
        );
        SE2::new(translation, UnitComplex::from_angle(theta))
    }

    fn log(&self) -> DVector<f64> {
        let theta = self.angle();
        let (a, b) = sinc_terms(theta);
        let den = a * a + b * b;
        let t = self.translation;
        DVector::from_vec(vec![
            (a * t.x + b * t.y) / den,
            (-b * t.x + a * t.y) / den,
            theta,
        ])
    }

    fn adjoint(&self) -> DMatrix<f64> {
        let r = self.rotation_matrix();
        let t = self.translation;
        DMatrix::from_row_slice(
            3,
            3,
            &[
                r[(0, 0)],
                r[(0, 1)],
                t.y,
                r[(1, 0)],
                r[(1, 1)],
                -t.x,
                0.0,
                0.0,
                1.0,
            ],
        )
    }

    fn right_jacobian(tangent: &DVector<f64>) -> DMatrix<f64> {
        let (x, y, theta) = (tangent[0], tangent[1], tangent[2]);
        let (a, b) = sinc_terms(theta);
        let (j02, j12) = if theta.abs() < SMALL_ANGLE {
            (-y / 2.0 + theta * x / 6.0, x / 2.0 + theta * y / 6.0)
        } else {
            let (s, c) = theta.sin_cos();
            let theta_sq = theta * theta;
            (
                (theta * x - y + y * c - x * s) / theta_sq,
                (x + theta * y - x * c - y * s) / theta_sq,
            )
        };
        DMatrix::from_row_slice(3, 3, &[a, b, j02, -b, a, j12, 0.0, 0.0, 1.0])
    }
}
