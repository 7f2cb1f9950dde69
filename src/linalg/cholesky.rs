use faer::{
    Mat, Side,
    linalg::solvers::Solve,
    sparse::linalg::solvers::{Llt, SymbolicLlt},
    sparse::SparseColMat,
};
use std::ops::Mul;

use crate::linalg::{LinAlgError, LinAlgResult, SparseLinearSolver};

/// Sparse Cholesky (LLᵀ) solver for the whole-problem normal equations.
#[derive(Debug, Clone, Default)]
pub struct SparseCholeskySolver {
    /// Cached symbolic factorization, reused while the Hessian keeps the same
    /// shape and number of stored entries.
    symbolic_factorization: Option<(SymbolicLlt<usize>, usize, usize)>,

    /// The Hessian matrix `J^T * J` from the last solve.
    hessian: Option<SparseColMat<usize, f64>>,

    /// The gradient vector `J^T * r` from the last solve.
    gradient: Option<Mat<f64>>,
}

impl SparseCholeskySolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn symbolic_for(
        &mut self,
        hessian: &SparseColMat<usize, f64>,
    ) -> LinAlgResult<SymbolicLlt<usize>> {
        let shape = (hessian.ncols(), hessian.symbolic().compute_nnz());
        if let Some((sym, n, nnz)) = &self.symbolic_factorization
            && (*n, *nnz) == shape
        {
            // SymbolicLlt is reference-counted, so clone() is O(1)
            return Ok(sym.clone());
        }
        let sym = SymbolicLlt::try_new(hessian.symbolic(), Side::Lower).map_err(|e| {
            LinAlgError::FactorizationFailed("Symbolic Cholesky decomposition failed".to_string())
                .log_with_source(e)
        })?;
        self.symbolic_factorization = Some((sym.clone(), shape.0, shape.1));
        Ok(sym)
    }
}

impl SparseLinearSolver for SparseCholeskySolver {
    fn solve_normal_equation(
        &mut self,
        residuals: &Mat<f64>,
        jacobians: &SparseColMat<usize, f64>,
    ) -> LinAlgResult<Mat<f64>> {
        // Form the normal equations: H = J^T * J
        let jt = jacobians.as_ref().transpose();
        let hessian = jt
            .to_col_major()
            .map_err(|e| {
                LinAlgError::MatrixConversion(
                    "Failed to convert transposed Jacobian to column-major format".to_string(),
                )
                .log_with_source(e)
            })?
            .mul(jacobians.as_ref());

        // g = J^T * r
        let gradient = jacobians.as_ref().transpose().mul(residuals);

        let sym = self.symbolic_for(&hessian)?;
        let cholesky = Llt::try_new_with_symbolic(sym, hessian.as_ref(), Side::Lower)
            .map_err(|e| LinAlgError::SingularMatrix.log_with_source(e))?;

        let dx = cholesky.solve(-&gradient);
        self.hessian = Some(hessian);
        self.gradient = Some(gradient);

        Ok(dx)
    }

    fn get_hessian(&self) -> Option<&SparseColMat<usize, f64>> {
        self.hessian.as_ref()
    }

    fn get_gradient(&self) -> Option<&Mat<f64>> {
        self.gradient.as_ref()
    }
}
