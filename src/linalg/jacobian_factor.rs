//! Linear (Gaussian) factors in Jacobian form and dense partial elimination.
//!
//! A [`JacobianFactor`] represents the quadratic error
//!
//! ```text
//! 0.5 * || A x - b ||²
//! ```
//!
//! stored as one augmented matrix `[A | b]` whose column blocks follow the
//! factor's key order. Eliminating the first key splits it into a
//! [`GaussianConditional`] on that key and a factor on the remaining keys.

use crate::core::Key;
use crate::linalg::{Factorization, GaussianConditional, LinAlgError, LinAlgResult, VectorValues};
use nalgebra::{DMatrix, DVector};
use std::collections::HashMap;

/// Relative tolerance on a QR diagonal entry before a frontal block is
/// declared rank deficient.
const RANK_TOLERANCE: f64 = 1e-9;

/// Relative tolerance on a Cholesky pivot.
const PIVOT_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct JacobianFactor {
    keys: Vec<Key>,
    dims: Vec<usize>,
    ab: DMatrix<f64>,
}

impl JacobianFactor {
    /// Build a factor from per-key Jacobian blocks and the right-hand side.
    pub fn new(blocks: Vec<(Key, DMatrix<f64>)>, b: DVector<f64>) -> LinAlgResult<Self> {
        let rows = b.len();
        if let Some((key, block)) = blocks.iter().find(|(_, a)| a.nrows() != rows) {
            return Err(LinAlgError::DimensionMismatch(format!(
                "block for key {key} has {} rows, rhs has {rows}",
                block.nrows()
            ))
            .log());
        }
        let dims: Vec<usize> = blocks.iter().map(|(_, a)| a.ncols()).collect();
        let total: usize = dims.iter().sum();
        let mut ab = DMatrix::zeros(rows, total + 1);
        let mut offset = 0;
        for (_, a) in &blocks {
            ab.view_mut((0, offset), (rows, a.ncols())).copy_from(a);
            offset += a.ncols();
        }
        ab.column_mut(total).copy_from(&b);
        Ok(JacobianFactor {
            keys: blocks.into_iter().map(|(k, _)| k).collect(),
            dims,
            ab,
        })
    }

    fn from_parts(keys: Vec<Key>, dims: Vec<usize>, ab: DMatrix<f64>) -> Self {
        JacobianFactor { keys, dims, ab }
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rows(&self) -> usize {
        self.ab.nrows()
    }

    /// Sum of the variable block widths.
    pub fn cols(&self) -> usize {
        self.ab.ncols() - 1
    }

    /// The augmented matrix `[A | b]`.
    pub fn augmented(&self) -> &DMatrix<f64> {
        &self.ab
    }

    /// Jacobian block of the `i`-th key.
    pub fn a_block(&self, i: usize) -> DMatrix<f64> {
        let offset: usize = self.dims[..i].iter().sum();
        self.ab.columns(offset, self.dims[i]).into_owned()
    }

    pub fn b(&self) -> DVector<f64> {
        self.ab.column(self.cols()).into_owned()
    }

    /// `0.5 * ||A x - b||²`
    pub fn error(&self, x: &VectorValues) -> LinAlgResult<f64> {
        let Some(&first) = self.keys.first() else {
            return Ok(0.5 * self.b().norm_squared());
        };
        if let Some(&missing) = self.keys.iter().find(|&&k| !x.contains(k)) {
            return Err(LinAlgError::MissingSolution(missing));
        }
        let stacked = x
            .stack(&self.keys)
            .ok_or_else(|| LinAlgError::MissingSolution(first))?;
        if stacked.len() != self.cols() {
            return Err(LinAlgError::DimensionMismatch(format!(
                "factor has {} columns, assignment has {}",
                self.cols(),
                stacked.len()
            )));
        }
        let residual = self.ab.columns(0, self.cols()) * stacked - self.b();
        Ok(0.5 * residual.norm_squared())
    }

    /// Stack several factors into one joint factor whose keys are sorted by
    /// elimination position. Keys without a position sort last by key.
    pub fn combine(
        factors: &[&JacobianFactor],
        position: &HashMap<Key, usize>,
    ) -> LinAlgResult<JacobianFactor> {
        let mut key_dims: HashMap<Key, usize> = HashMap::new();
        for factor in factors {
            for (&key, &dim) in factor.keys.iter().zip(&factor.dims) {
                match key_dims.get(&key) {
                    Some(&known) if known != dim => {
                        return Err(LinAlgError::DimensionMismatch(format!(
                            "key {key} appears with widths {known} and {dim}"
                        ))
                        .log());
                    }
                    _ => {
                        key_dims.insert(key, dim);
                    }
                }
            }
        }

        let mut keys: Vec<Key> = key_dims.keys().copied().collect();
        keys.sort_by_key(|k| (position.get(k).copied().unwrap_or(usize::MAX), *k));
        let dims: Vec<usize> = keys.iter().map(|k| key_dims[k]).collect();

        let mut column_of = HashMap::with_capacity(keys.len());
        let mut offset = 0;
        for (&key, &dim) in keys.iter().zip(&dims) {
            column_of.insert(key, offset);
            offset += dim;
        }
        let total = offset;
        let rows: usize = factors.iter().map(|f| f.rows()).sum();

        let mut ab = DMatrix::zeros(rows, total + 1);
        let mut row = 0;
        for factor in factors {
            let mut src = 0;
            for (key, &dim) in factor.keys.iter().zip(&factor.dims) {
                let dst = column_of[key];
                ab.view_mut((row, dst), (factor.rows(), dim))
                    .copy_from(&factor.ab.view((0, src), (factor.rows(), dim)));
                src += dim;
            }
            ab.view_mut((row, total), (factor.rows(), 1))
                .copy_from(&factor.ab.view((0, src), (factor.rows(), 1)));
            row += factor.rows();
        }
        Ok(JacobianFactor::from_parts(keys, dims, ab))
    }

    /// Eliminate the first key, returning its conditional and the factor on
    /// the remaining keys (possibly with zero rows).
    pub fn eliminate_first(
        &self,
        method: Factorization,
    ) -> LinAlgResult<(GaussianConditional, JacobianFactor)> {
        let Some(&frontal) = self.keys.first() else {
            return Err(LinAlgError::FactorizationFailed(
                "cannot eliminate a factor without keys".to_string(),
            )
            .log());
        };
        let split = match method {
            Factorization::QR => self.eliminate_qr(frontal)?,
            Factorization::Cholesky => self.eliminate_cholesky(frontal)?,
        };
        let (upper, remaining) = split;

        let n = self.dims[0];
        let total = self.cols();
        let mut rsd = upper;
        // Positive diagonal keeps both methods producing the same conditional.
        for i in 0..n {
            if rsd[(i, i)] < 0.0 {
                rsd.row_mut(i).neg_mut();
            }
        }
        let conditional = GaussianConditional::new(
            frontal,
            self.keys[1..].to_vec(),
            self.dims[1..].to_vec(),
            rsd.view((0, 0), (n, n)).upper_triangle(),
            rsd.view((0, n), (n, total - n)).into_owned(),
            rsd.column(total).into_owned(),
        )?;
        let separator = JacobianFactor::from_parts(
            self.keys[1..].to_vec(),
            self.dims[1..].to_vec(),
            remaining,
        );
        Ok((conditional, separator))
    }

    /// Returns the first `n` rows of the triangular factor and the trailing
    /// rows restricted to separator columns.
    fn eliminate_qr(&self, frontal: Key) -> LinAlgResult<(DMatrix<f64>, DMatrix<f64>)> {
        let n = self.dims[0];
        let ncols = self.ab.ncols();
        if self.rows() < n {
            return Err(LinAlgError::IndeterminantSystem { key: frontal }.log());
        }
        let r = self.ab.clone().qr().r();
        let scale = self.ab.columns(0, n).amax().max(1.0);
        if (0..n).any(|i| !(r[(i, i)].abs() > RANK_TOLERANCE * scale)) {
            return Err(LinAlgError::IndeterminantSystem { key: frontal }.log());
        }
        let upper = r.view((0, 0), (n, ncols)).into_owned();
        let trailing_rows = r.nrows() - n;
        let remaining = r.view((n, n), (trailing_rows, ncols - n)).into_owned();
        Ok((upper, remaining))
    }

    fn eliminate_cholesky(&self, frontal: Key) -> LinAlgResult<(DMatrix<f64>, DMatrix<f64>)> {
        let n = self.dims[0];
        let ncols = self.ab.ncols();
        let mut h = self.ab.transpose() * &self.ab;

        for k in 0..n {
            let pivot = h[(k, k)];
            let reference = self.ab.column(k).norm_squared();
            if !(pivot > PIVOT_TOLERANCE * reference) || pivot <= 0.0 {
                return Err(LinAlgError::IndefiniteSystem { key: frontal }.log());
            }
            partial_cholesky_step(&mut h, k);
        }

        let upper = h.view((0, 0), (n, ncols)).into_owned();
        let schur = h.view((n, n), (ncols - n, ncols - n)).into_owned();
        Ok((upper, square_root_rows(schur)))
    }
}

/// One right-looking Cholesky step on the upper triangle of `h` at pivot `k`.
fn partial_cholesky_step(h: &mut DMatrix<f64>, k: usize) {
    let ncols = h.ncols();
    let rkk = h[(k, k)].sqrt();
    h[(k, k)] = rkk;
    for j in (k + 1)..ncols {
        h[(k, j)] /= rkk;
    }
    for i in (k + 1)..ncols {
        let hki = h[(k, i)];
        if hki == 0.0 {
            continue;
        }
        for j in i..ncols {
            h[(i, j)] -= hki * h[(k, j)];
        }
    }
    for i in (k + 1)..ncols {
        h[(i, k)] = 0.0;
    }
}

/// Turn a symmetric positive semi-definite augmented information block back
/// into Jacobian rows `U` with `UᵀU = schur`. Vanishing pivots drop their row.
fn square_root_rows(schur: DMatrix<f64>) -> DMatrix<f64> {
    let p = schur.nrows();
    let mut u = schur.upper_triangle();
    let reference: Vec<f64> = (0..p).map(|i| schur[(i, i)].abs()).collect();
    let mut kept = Vec::with_capacity(p);
    for k in 0..p {
        let pivot = u[(k, k)];
        if pivot <= PIVOT_TOLERANCE * reference[k] || pivot <= 0.0 {
            for j in k..p {
                u[(k, j)] = 0.0;
            }
            continue;
        }
        partial_cholesky_step(&mut u, k);
        kept.push(k);
    }
    let mut rows = DMatrix::zeros(kept.len(), p);
    for (dst, &src) in kept.iter().enumerate() {
        rows.row_mut(dst).copy_from(&u.row(src));
    }
    rows
}
