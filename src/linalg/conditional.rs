//! Gaussian conditional produced by eliminating one variable.
//!
//! A conditional stores the square-root form
//!
//! ```text
//! R x_f + S x_s = d
//! ```
//!
//! where `x_f` is the frontal variable, `x_s` the stacked separator
//! (parent) variables and `R` is upper triangular.

use crate::core::Key;
use crate::linalg::{LinAlgError, LinAlgResult, VectorValues};
use nalgebra::{DMatrix, DVector};

#[derive(Debug, Clone, PartialEq)]
pub struct GaussianConditional {
    frontal: Key,
    parents: Vec<Key>,
    parent_dims: Vec<usize>,
    r: DMatrix<f64>,
    s: DMatrix<f64>,
    d: DVector<f64>,
}

impl GaussianConditional {
    pub fn new(
        frontal: Key,
        parents: Vec<Key>,
        parent_dims: Vec<usize>,
        r: DMatrix<f64>,
        s: DMatrix<f64>,
        d: DVector<f64>,
    ) -> LinAlgResult<Self> {
        let n = r.nrows();
        let sep: usize = parent_dims.iter().sum();
        if r.ncols() != n || s.nrows() != n || s.ncols() != sep || d.len() != n {
            return Err(LinAlgError::DimensionMismatch(format!(
                "conditional on key {frontal}: R {}x{}, S {}x{}, d {}, separator dim {sep}",
                r.nrows(),
                r.ncols(),
                s.nrows(),
                s.ncols(),
                d.len()
            ))
            .log());
        }
        if parents.len() != parent_dims.len() {
            return Err(LinAlgError::DimensionMismatch(format!(
                "conditional on key {frontal}: {} parents but {} block sizes",
                parents.len(),
                parent_dims.len()
            ))
            .log());
        }
        Ok(GaussianConditional {
            frontal,
            parents,
            parent_dims,
            r,
            s,
            d,
        })
    }

    pub fn frontal(&self) -> Key {
        self.frontal
    }

    pub fn frontal_dim(&self) -> usize {
        self.r.nrows()
    }

    /// Separator keys, in elimination order.
    pub fn parents(&self) -> &[Key] {
        &self.parents
    }

    pub fn parent_dims(&self) -> &[usize] {
        &self.parent_dims
    }

    pub fn r(&self) -> &DMatrix<f64> {
        &self.r
    }

    pub fn s(&self) -> &DMatrix<f64> {
        &self.s
    }

    pub fn d(&self) -> &DVector<f64> {
        &self.d
    }

    /// Number of stored matrix entries in `[R S d]`, counting R as triangular.
    pub fn nnz(&self) -> usize {
        let n = self.r.nrows();
        n * (n + 1) / 2 + self.s.len() + self.d.len()
    }

    fn stacked_parents(&self, values: &VectorValues) -> LinAlgResult<DVector<f64>> {
        if let Some(&missing) = self.parents.iter().find(|&&k| !values.contains(k)) {
            return Err(LinAlgError::MissingSolution(missing));
        }
        values
            .stack(&self.parents)
            .ok_or(LinAlgError::MissingSolution(self.frontal))
    }

    /// Back-substitute for the frontal variable given solved parents.
    pub fn solve(&self, parents: &VectorValues) -> LinAlgResult<DVector<f64>> {
        let rhs = if self.parents.is_empty() {
            self.d.clone()
        } else {
            &self.d - &self.s * self.stacked_parents(parents)?
        };
        self.r
            .solve_upper_triangular(&rhs)
            .ok_or_else(|| LinAlgError::SingularMatrix.log())
    }

    /// `R x_f + S x_s` for the given assignment.
    pub fn apply(&self, x: &VectorValues) -> LinAlgResult<DVector<f64>> {
        let frontal = x
            .get(self.frontal)
            .ok_or(LinAlgError::MissingSolution(self.frontal))?;
        let mut out = &self.r * frontal;
        if !self.parents.is_empty() {
            out += &self.s * self.stacked_parents(x)?;
        }
        Ok(out)
    }

    /// `0.5 * ||R x_f + S x_s - d||²`
    pub fn error(&self, x: &VectorValues) -> LinAlgResult<f64> {
        let residual = self.apply(x)? - &self.d;
        Ok(0.5 * residual.norm_squared())
    }

    /// Gradient of [`Self::error`] at zero, `-[R S]ᵀ d`, split per key.
    pub fn gradient_at_zero(&self) -> VectorValues {
        let mut g = VectorValues::new();
        g.insert(self.frontal, -(self.r.transpose() * &self.d));
        let st_d = -(self.s.transpose() * &self.d);
        let mut offset = 0;
        for (&key, &dim) in self.parents.iter().zip(&self.parent_dims) {
            g.insert(key, st_d.rows(offset, dim).into_owned());
            offset += dim;
        }
        g
    }
}
