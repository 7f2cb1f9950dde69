use faer::{
    Mat,
    linalg::solvers::Solve,
    sparse::linalg::solvers::{Qr, SymbolicQr},
    sparse::SparseColMat,
};
use std::ops::Mul;

use crate::linalg::{LinAlgError, LinAlgResult, SparseLinearSolver};

/// Sparse QR solver for the whole-problem normal equations.
#[derive(Debug, Clone, Default)]
pub struct SparseQRSolver {
    /// Cached symbolic factorization keyed by (columns, stored entries).
    symbolic_factorization: Option<(SymbolicQr<usize>, usize, usize)>,

    hessian: Option<SparseColMat<usize, f64>>,

    gradient: Option<Mat<f64>>,
}

impl SparseQRSolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn symbolic_for(
        &mut self,
        hessian: &SparseColMat<usize, f64>,
    ) -> LinAlgResult<SymbolicQr<usize>> {
        let shape = (hessian.ncols(), hessian.symbolic().compute_nnz());
        if let Some((sym, n, nnz)) = &self.symbolic_factorization
            && (*n, *nnz) == shape
        {
            return Ok(sym.clone());
        }
        let sym = SymbolicQr::try_new(hessian.symbolic()).map_err(|e| {
            LinAlgError::FactorizationFailed("Symbolic QR decomposition failed".to_string())
                .log_with_source(e)
        })?;
        self.symbolic_factorization = Some((sym.clone(), shape.0, shape.1));
        Ok(sym)
    }
}

impl SparseLinearSolver for SparseQRSolver {
    fn solve_normal_equation(
        &mut self,
        residuals: &Mat<f64>,
        jacobians: &SparseColMat<usize, f64>,
    ) -> LinAlgResult<Mat<f64>> {
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

        // g = J^T * r (stored as positive, negated when solving)
        let gradient = jacobians.as_ref().transpose().mul(residuals);

        let sym = self.symbolic_for(&hessian)?;
        let qr = Qr::try_new_with_symbolic(sym, hessian.as_ref())
            .map_err(|e| LinAlgError::SingularMatrix.log_with_source(e))?;

        let dx = qr.solve(-&gradient);
        if (0..dx.nrows()).any(|i| !dx[(i, 0)].is_finite()) {
            return Err(LinAlgError::SingularMatrix.log());
        }
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
