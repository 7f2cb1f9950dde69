//! Rn - n-dimensional Euclidean Space
//!
//! This module implements the n-dimensional Euclidean space Rⁿ with vector addition
//! as the group operation. Elements and tangent vectors are both `DVector<f64>`,
//! so every Jacobian is the identity and retraction is plain addition.

use crate::manifold::LieGroup;
use nalgebra::{DMatrix, DVector};
use std::{
    fmt,
    fmt::{Display, Formatter},
};

/// Rⁿ group element representing n-dimensional Euclidean vectors.
#[derive(Clone, Debug, PartialEq)]
pub struct Rn {
    data: DVector<f64>,
}

impl Display for Rn {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Rn(dim: {}, data: [", self.data.len())?;
        for (i, val) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:.4}", val)?;
        }
        write!(f, "])")
    }
}

impl From<DVector<f64>> for Rn {
    fn from(data: DVector<f64>) -> Self {
        Rn::new(data)
    }
}

impl From<Rn> for DVector<f64> {
    fn from(rn: Rn) -> Self {
        rn.data
    }
}

impl Rn {
    /// Create a new Rⁿ element from a vector.
    pub fn new(data: DVector<f64>) -> Self {
        Rn { data }
    }

    /// Create Rⁿ from a slice.
    pub fn from_slice(slice: &[f64]) -> Self {
        Rn::new(DVector::from_row_slice(slice))
    }

    /// Create Rⁿ from owned components.
    pub fn from_vec(components: Vec<f64>) -> Self {
        Rn::new(DVector::from_vec(components))
    }

    /// Zero vector of the given dimension.
    pub fn zeros(dim: usize) -> Self {
        Rn::new(DVector::zeros(dim))
    }

    /// Get the underlying vector.
    pub fn data(&self) -> &DVector<f64> {
        &self.data
    }

    /// Get the dimension of the space.
    pub fn dim(&self) -> usize {
        self.data.len()
    }
}

impl LieGroup for Rn {
    fn tangent_dim(&self) -> usize {
        self.data.len()
    }

    fn inverse(&self) -> Self {
        Rn::new(-&self.data)
    }

    fn compose(&self, other: &Self) -> Self {
        Rn::new(&self.data + &other.data)
    }

    fn exp(tangent: &DVector<f64>) -> Self {
        Rn::new(tangent.clone())
    }

    fn log(&self) -> DVector<f64> {
        self.data.clone()
    }

    fn adjoint(&self) -> DMatrix<f64> {
        DMatrix::identity(self.data.len(), self.data.len())
    }

    fn right_jacobian(tangent: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::identity(tangent.len(), tangent.len())
    }

    fn right_jacobian_inverse(tangent: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::identity(tangent.len(), tangent.len())
    }
}
