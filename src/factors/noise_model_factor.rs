//! Adapter from a measurement model to the engine's nonlinear factor capability.

use super::{Factor, NonlinearFactor};
use crate::core::{CoreError, CoreResult, Key, values::Values};
use crate::linalg::JacobianFactor;
use nalgebra::{DMatrix, DVector};

/// A [`Factor`] bound to variable keys and a Gaussian noise model.
///
/// The noise model is stored as its square-root information matrix `W`, so
/// linearization yields the whitened system `W J δ = -W r`.
pub struct NoiseModelFactor {
    keys: Vec<Key>,
    factor: Box<dyn Factor>,
    sqrt_information: DMatrix<f64>,
}

impl std::fmt::Debug for NoiseModelFactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoiseModelFactor")
            .field("keys", &self.keys)
            .field("dim", &self.factor.get_dimension())
            .finish()
    }
}

impl NoiseModelFactor {
    /// Diagonal noise model from standard deviations.
    pub fn new(
        keys: Vec<Key>,
        factor: Box<dyn Factor>,
        sigmas: DVector<f64>,
    ) -> CoreResult<Self> {
        if let Some(bad) = sigmas.iter().find(|s| !(**s > 0.0) || !s.is_finite()) {
            return Err(CoreError::InvalidInput(format!(
                "noise sigma must be positive and finite, got {bad}"
            ))
            .log());
        }
        let sqrt_information = DMatrix::from_diagonal(&sigmas.map(|s| 1.0 / s));
        Self::with_sqrt_information(keys, factor, sqrt_information)
    }

    /// Unit noise (identity whitening).
    pub fn unit(keys: Vec<Key>, factor: Box<dyn Factor>) -> CoreResult<Self> {
        let dim = factor.get_dimension();
        Self::with_sqrt_information(keys, factor, DMatrix::identity(dim, dim))
    }

    /// Full square-root information matrix.
    pub fn with_sqrt_information(
        keys: Vec<Key>,
        factor: Box<dyn Factor>,
        sqrt_information: DMatrix<f64>,
    ) -> CoreResult<Self> {
        let dim = factor.get_dimension();
        if sqrt_information.nrows() != dim || sqrt_information.ncols() != dim {
            return Err(CoreError::DimensionMismatch(format!(
                "residual dimension {dim} but sqrt information is {}x{}",
                sqrt_information.nrows(),
                sqrt_information.ncols()
            ))
            .log());
        }
        if keys.len() != factor.num_variables() {
            return Err(CoreError::InvalidInput(format!(
                "factor connects {} variables but was given keys {keys:?}",
                factor.num_variables()
            ))
            .log());
        }
        Ok(NoiseModelFactor {
            keys,
            factor,
            sqrt_information,
        })
    }

    fn params(&self, values: &Values) -> CoreResult<Vec<DVector<f64>>> {
        self.keys
            .iter()
            .map(|&k| values.at(k).map(|v| v.to_vector()))
            .collect()
    }

    fn whitened_residual(&self, residual: &DVector<f64>) -> CoreResult<DVector<f64>> {
        if residual.len() != self.sqrt_information.ncols() {
            return Err(CoreError::DimensionMismatch(format!(
                "factor on {:?} returned residual of size {}, expected {}",
                self.keys,
                residual.len(),
                self.sqrt_information.ncols()
            ))
            .log());
        }
        Ok(&self.sqrt_information * residual)
    }
}

impl NonlinearFactor for NoiseModelFactor {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn dim(&self) -> usize {
        self.factor.get_dimension()
    }

    fn linearize(&self, values: &Values) -> CoreResult<JacobianFactor> {
        let params = self.params(values)?;
        let (residual, jacobian) = self.factor.linearize(&params, true);
        let jacobian = jacobian.ok_or_else(|| {
            CoreError::FactorLinearization(format!(
                "factor on {:?} returned no Jacobian",
                self.keys
            ))
            .log()
        })?;

        let dims: Vec<usize> = self
            .keys
            .iter()
            .map(|&k| values.at(k).map(|v| v.dim()))
            .collect::<CoreResult<_>>()?;
        let total: usize = dims.iter().sum();
        if jacobian.ncols() != total || jacobian.nrows() != residual.len() {
            return Err(CoreError::DimensionMismatch(format!(
                "factor on {:?}: Jacobian {}x{}, residual {}, variables {total}",
                self.keys,
                jacobian.nrows(),
                jacobian.ncols(),
                residual.len()
            ))
            .log());
        }

        let b = -self.whitened_residual(&residual)?;
        let whitened = &self.sqrt_information * jacobian;
        let mut blocks = Vec::with_capacity(self.keys.len());
        let mut offset = 0;
        for (&key, &dim) in self.keys.iter().zip(&dims) {
            blocks.push((key, whitened.columns(offset, dim).into_owned()));
            offset += dim;
        }
        JacobianFactor::new(blocks, b).map_err(|e| {
            CoreError::FactorLinearization(format!("factor on {:?}", self.keys)).log_with_source(e)
        })
    }

    fn error(&self, values: &Values) -> CoreResult<f64> {
        let params = self.params(values)?;
        let (residual, _) = self.factor.linearize(&params, false);
        Ok(0.5 * self.whitened_residual(&residual)?.norm_squared())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::{BetweenFactor, PriorFactor};
    use crate::manifold::{rn::Rn, se2::SE2};
    use nalgebra::dvector;

    const TOLERANCE: f64 = 1e-10;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_key_count_must_match_the_measurement_model() {
        let one_key = NoiseModelFactor::new(
            vec![0],
            Box::new(BetweenFactor::new(SE2::identity())),
            dvector![0.1, 0.1, 0.1],
        );
        assert!(matches!(one_key, Err(CoreError::InvalidInput(_))));

        let no_keys = NoiseModelFactor::unit(vec![], Box::new(PriorFactor::new(SE2::identity())));
        assert!(matches!(no_keys, Err(CoreError::InvalidInput(_))));
    }

    #[test]
    fn test_whitening_scales_rows() -> TestResult {
        let factor = NoiseModelFactor::new(
            vec![0],
            Box::new(PriorFactor::new(Rn::from_vec(vec![1.0, 1.0]))),
            dvector![0.5, 2.0],
        )?;
        let mut values = Values::new();
        values.insert(0, Rn::from_vec(vec![2.0, 3.0]))?;

        let linear = factor.linearize(&values)?;
        assert_eq!(linear.a_block(0), DMatrix::from_diagonal(&dvector![2.0, 0.5]));
        assert_eq!(linear.b(), dvector![-2.0, -1.0]);
        // 0.5 * ((1/0.5)² + (2/2)²)
        assert!((factor.error(&values)? - 2.5).abs() < TOLERANCE);
        Ok(())
    }

    #[test]
    fn test_linear_error_at_zero_equals_nonlinear_error() -> TestResult {
        let factor = NoiseModelFactor::new(
            vec![1, 2],
            Box::new(BetweenFactor::new(SE2::from_xy_angle(1.0, 0.0, 0.0))),
            dvector![0.2, 0.2, 0.1],
        )?;
        let mut values = Values::new();
        values.insert(1, SE2::identity())?;
        values.insert(2, SE2::from_xy_angle(1.1, 0.1, 0.05))?;
        let linear = factor.linearize(&values)?;
        let zero = values.zero_vectors();
        assert!((linear.error(&zero)? - factor.error(&values)?).abs() < TOLERANCE);
        assert_eq!(linear.keys(), &[1, 2]);
        Ok(())
    }

    #[test]
    fn test_rejects_bad_noise_and_missing_values() -> TestResult {
        assert!(matches!(
            NoiseModelFactor::new(
                vec![0],
                Box::new(PriorFactor::new(Rn::zeros(1))),
                dvector![0.0]
            ),
            Err(CoreError::InvalidInput(_))
        ));
        assert!(matches!(
            NoiseModelFactor::new(
                vec![0],
                Box::new(PriorFactor::new(Rn::zeros(2))),
                dvector![1.0]
            ),
            Err(CoreError::DimensionMismatch(_))
        ));
        let factor = NoiseModelFactor::unit(vec![4], Box::new(PriorFactor::new(Rn::zeros(1))))?;
        assert!(matches!(
            factor.linearize(&Values::new()),
            Err(CoreError::UnknownVariable(4))
        ));
        Ok(())
    }
}
